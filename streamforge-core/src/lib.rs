//! Streamforge core — the playback engine of a media server.
//!
//! This crate hosts the decision, transcoding and retention subsystems:
//! probing media, deciding between direct play and transcode, brokering
//! transcode work to out-of-process worker providers over gRPC, tracking
//! session lifecycle in durable storage, and garbage-collecting the
//! content-addressed output store.
//!
//! The HTTP surface lives in `streamforge-api`; the worker RPC contract in
//! `streamforge-proto`.

pub mod cleanup;
pub mod config;
pub mod decision;
pub mod error;
pub mod fallback;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod probe;
pub mod process;
pub mod provider;
pub mod repository;
pub mod resilience;
pub mod session;
pub mod store;
pub mod validation;

pub use config::Config;
pub use error::{Error, Result};
