//! Session token storage for trapcast.
//!
//! Provides:
//! - `MemorySessionStore` - In-process token store implementing `SessionValidator`

pub mod storage;

#[cfg(feature = "memory")]
pub use storage::MemorySessionStore;
pub use storage::StoreError;
