//! gRPC-backed provider client
//!
//! Thin wrapper around the generated `TranscoderClient`. Every call is
//! bounded by a deadline; transport failures map onto `ProviderError` so a
//! worker crash looks like any other RPC error to the caller.

use async_trait::async_trait;
use backon::Retryable;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};
use tracing::debug;
use uuid::Uuid;

use streamforge_proto::transcoder::transcoder_client::TranscoderClient;
use streamforge_proto::transcoder::InfoRequest;

use super::traits::{ProgressReport, StreamHandle, TranscodeProvider};
use super::ProviderError;
use crate::models::{ProviderInfo, TranscodeRequest};
use crate::resilience::{retry, timeout};

/// Client for one out-of-process transcoder worker.
pub struct GrpcTranscodeProvider {
    channel: Channel,
    info: ProviderInfo,
}

impl GrpcTranscodeProvider {
    /// Connect to a worker endpoint and capture its advertised metadata.
    /// The `Info` call is retried with backoff: workers racing the core at
    /// startup are the common case, not the exception.
    pub async fn discover(endpoint: &str) -> Result<Self, ProviderError> {
        let channel = connect(endpoint).await?;

        let fetch_info = || async {
            let mut client = TranscoderClient::new(channel.clone());
            let response = tokio::time::timeout(
                timeout::DISCOVERY_TIMEOUT,
                client.info(tonic::Request::new(InfoRequest {})),
            )
            .await
            .map_err(|_| ProviderError::Network("info call timed out".to_string()))?
            .map_err(ProviderError::from)?;
            Ok::<_, ProviderError>(response.into_inner())
        };

        let proto_info = fetch_info
            .retry(retry::rpc_backoff())
            .when(retry::should_retry)
            .await?;

        let info = ProviderInfo::from(proto_info);
        debug!(provider = %info.id, endpoint = %endpoint, "discovered provider");

        Ok(Self { channel, info })
    }

    async fn with_deadline<T>(
        deadline: Duration,
        fut: impl std::future::Future<Output = Result<tonic::Response<T>, tonic::Status>>,
    ) -> Result<T, ProviderError> {
        tokio::time::timeout(deadline, fut)
            .await
            .map_err(|_| ProviderError::Network(format!("rpc deadline {deadline:?} exceeded")))?
            .map(tonic::Response::into_inner)
            .map_err(ProviderError::from)
    }
}

/// Build a channel for a worker endpoint URI. Lazy connect: the first RPC
/// establishes the transport, so a worker that is still booting does not
/// fail registration.
async fn connect(endpoint: &str) -> Result<Channel, ProviderError> {
    let endpoint = Endpoint::from_shared(endpoint.to_string())
        .map_err(|e| ProviderError::InvalidConfig(format!("bad endpoint: {e}")))?
        .connect_timeout(Duration::from_secs(5));
    Ok(endpoint.connect_lazy())
}

#[async_trait]
impl TranscodeProvider for GrpcTranscodeProvider {
    fn info(&self) -> ProviderInfo {
        self.info.clone()
    }

    async fn can_transcode(&self, req: &TranscodeRequest) -> Result<bool, ProviderError> {
        let channel = self.channel.clone();
        let proto_req = req.to_proto(Uuid::nil(), Path::new(""));

        let call = || {
            let channel = channel.clone();
            let proto_req = proto_req.clone();
            async move {
                let mut client = TranscoderClient::new(channel);
                Self::with_deadline(
                    timeout::CONTROL_RPC_TIMEOUT,
                    client.can_transcode(tonic::Request::new(proto_req)),
                )
                .await
            }
        };

        let response = call
            .retry(retry::rpc_backoff())
            .when(retry::should_retry)
            .await?;
        Ok(response.supported)
    }

    async fn start_stream(
        &self,
        req: &TranscodeRequest,
        session_id: Uuid,
        output_dir: &Path,
    ) -> Result<StreamHandle, ProviderError> {
        let mut client = TranscoderClient::new(self.channel.clone());
        let proto_req = req.to_proto(session_id, output_dir);

        // No retry: starting a transcode is not idempotent. Recovery is the
        // fallback engine's job.
        let handle = Self::with_deadline(
            timeout::CONTROL_RPC_TIMEOUT,
            client.start_stream(tonic::Request::new(proto_req)),
        )
        .await?;

        let session_id = Uuid::parse_str(&handle.session_id)
            .map_err(|e| ProviderError::Api(format!("worker returned bad session id: {e}")))?;

        Ok(StreamHandle {
            session_id,
            provider_id: handle.provider_id,
            directory_path: PathBuf::from(handle.directory_path),
            start_time: chrono::DateTime::from_timestamp_millis(handle.start_time_unix_ms)
                .unwrap_or_else(chrono::Utc::now),
            pid: (handle.pid != 0).then_some(handle.pid),
        })
    }

    async fn progress(&self, handle: &StreamHandle) -> Result<ProgressReport, ProviderError> {
        let channel = self.channel.clone();
        let proto_handle = handle.to_proto();

        let call = || {
            let channel = channel.clone();
            let proto_handle = proto_handle.clone();
            async move {
                let mut client = TranscoderClient::new(channel);
                Self::with_deadline(
                    timeout::PROGRESS_POLL_TIMEOUT,
                    client.progress(tonic::Request::new(proto_handle)),
                )
                .await
            }
        };

        let report = call
            .retry(retry::rpc_backoff())
            .when(retry::should_retry)
            .await?;

        Ok(ProgressReport {
            percent: report.percent,
            bytes_written: report.bytes_written,
            speed_ratio: report.speed_ratio,
            error: (!report.error.is_empty()).then_some(report.error),
        })
    }

    async fn stop_stream(&self, handle: &StreamHandle) -> Result<(), ProviderError> {
        let mut client = TranscoderClient::new(self.channel.clone());
        Self::with_deadline(
            timeout::CONTROL_RPC_TIMEOUT,
            client.stop_stream(tonic::Request::new(handle.to_proto())),
        )
        .await?;
        Ok(())
    }

    async fn fetch_stream(
        &self,
        handle: &StreamHandle,
    ) -> Result<BoxStream<'static, Result<Bytes, ProviderError>>, ProviderError> {
        let mut client = TranscoderClient::new(self.channel.clone());
        let streaming = Self::with_deadline(
            timeout::CONTROL_RPC_TIMEOUT,
            client.get_stream(tonic::Request::new(handle.to_proto())),
        )
        .await?;

        let stream = streaming.map(|chunk| {
            chunk
                .map(|c| Bytes::from(c.data))
                .map_err(ProviderError::from)
        });

        Ok(stream.boxed())
    }
}
