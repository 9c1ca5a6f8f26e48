//! Transcoding providers
//!
//! A provider is an out-of-process worker that owns encoder processes. The
//! core addresses providers through the [`TranscodeProvider`] trait; the
//! production implementation is a thin gRPC wrapper, tests use in-process
//! fakes. A provider crash is an RPC error, never a panic here.

pub mod error;
pub mod grpc;
pub mod registry;
pub mod traits;

pub use error::ProviderError;
pub use grpc::GrpcTranscodeProvider;
pub use registry::ProviderRegistry;
pub use traits::{ProgressReport, StreamHandle, TranscodeProvider};
