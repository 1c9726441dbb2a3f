//! Core abstractions for the trapcast real-time push subsystem.
//!
//! This crate provides the fundamental building blocks:
//! - `EventMessage` - Tagged server-push message schemas
//! - Status and stats records for the managed subsystems
//! - Collaborator traits (`SessionValidator`, `StateSource`, `Broadcaster`)

pub mod event;
pub mod state;
pub mod traits;

pub use event::{EventMessage, TrapRecord, Varbind};
pub use state::{
    MibSummary, SimulatorSnapshot, SimulatorStatus, Stats, TrapReceiverStatus, format_uptime,
};
pub use traits::{Broadcaster, SessionIdentity, SessionValidator, StateSource, ValidationError};
