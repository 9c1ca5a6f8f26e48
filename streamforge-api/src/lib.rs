//! Streamforge HTTP surface
//!
//! Thin axum layer binding the playback engine to JSON endpoints and the
//! adaptive streaming server. Handlers never mutate session state directly;
//! every write goes through the session manager.

pub mod http;

pub use http::{create_router, AppState};
