//! Worker process supervision for trapcast.
//!
//! Provides:
//! - `Supervisor` - Start/stop/restart the simulator and trap receiver,
//!   publishing `status` and `stats` events after each mutation
//! - `StatsStore` - Counters with optional JSON persistence
//! - Command building utilities

pub mod command;
pub mod lifecycle;
pub mod process;
pub mod stats;

pub use command::{CommandBuilder, CommandParts};
pub use lifecycle::{
    LifecycleOutcome, SimulatorOverrides, Supervisor, SupervisorError, WorkerSettings,
};
pub use process::WorkerProcess;
pub use stats::{StatsError, StatsStore};
