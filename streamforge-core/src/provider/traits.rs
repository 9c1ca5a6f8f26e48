use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::ProviderError;
use crate::models::{ProviderInfo, TranscodeRequest};

/// Opaque reference to a running stream inside a worker.
#[derive(Debug, Clone)]
pub struct StreamHandle {
    pub session_id: Uuid,
    pub provider_id: String,
    pub directory_path: PathBuf,
    pub start_time: DateTime<Utc>,
    pub pid: Option<u32>,
}

impl StreamHandle {
    #[must_use]
    pub fn to_proto(&self) -> streamforge_proto::transcoder::StreamHandle {
        streamforge_proto::transcoder::StreamHandle {
            session_id: self.session_id.to_string(),
            provider_id: self.provider_id.clone(),
            directory_path: self.directory_path.to_string_lossy().into_owned(),
            start_time_unix_ms: self.start_time.timestamp_millis(),
            pid: self.pid.unwrap_or(0),
        }
    }
}

/// One progress sample from a worker.
#[derive(Debug, Clone, Default)]
pub struct ProgressReport {
    pub percent: f64,
    pub bytes_written: u64,
    pub speed_ratio: f64,
    /// Non-empty when the encoder has failed; the poller treats this as a
    /// worker exit.
    pub error: Option<String>,
}

/// Capability interface every transcoding provider implements.
///
/// Providers live out of process; every async method is an RPC and may fail
/// with a transport error. `info` is served from metadata captured at
/// discovery time and is always available.
#[async_trait]
pub trait TranscodeProvider: Send + Sync {
    /// Static metadata captured when the provider was registered.
    fn info(&self) -> ProviderInfo;

    /// Ask the worker whether it can service this exact request.
    async fn can_transcode(&self, req: &TranscodeRequest) -> Result<bool, ProviderError>;

    /// Start transcoding into `output_dir`. Returns once the worker has
    /// spawned its encoder and begun producing output.
    async fn start_stream(
        &self,
        req: &TranscodeRequest,
        session_id: Uuid,
        output_dir: &Path,
    ) -> Result<StreamHandle, ProviderError>;

    /// Poll progress for a live handle.
    async fn progress(&self, handle: &StreamHandle) -> Result<ProgressReport, ProviderError>;

    /// Stop the stream behind a handle. Idempotent.
    async fn stop_stream(&self, handle: &StreamHandle) -> Result<(), ProviderError>;

    /// Progressive single-file delivery for mp4/webm output.
    async fn fetch_stream(
        &self,
        handle: &StreamHandle,
    ) -> Result<BoxStream<'static, Result<Bytes, ProviderError>>, ProviderError>;
}
