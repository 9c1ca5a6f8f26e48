//! Session lifecycle
//!
//! The session manager orchestrates admission, provider selection, worker
//! startup, progress polling, stall detection and teardown. Lifecycle
//! events fan out on a broadcast bus so cleanup and observability never
//! reach into the manager's internals.

pub mod events;
pub mod manager;

pub use events::SessionEvent;
pub use manager::{SessionManager, StartOptions, StopAllReport};
