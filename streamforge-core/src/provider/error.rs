use thiserror::Error;

/// Errors surfaced by transcoding providers.
///
/// The display strings matter: the fallback cascade matches on them to pick
/// a recovery strategy, so keep the underlying worker message intact.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Provider error: {0}")]
    Api(String),

    #[error("Request not supported: {0}")]
    Unsupported(String),

    #[error("Invalid provider configuration: {0}")]
    InvalidConfig(String),

    #[error("Worker exited: {0}")]
    WorkerExit(String),
}

impl From<tonic::Status> for ProviderError {
    fn from(status: tonic::Status) -> Self {
        match status.code() {
            tonic::Code::Unavailable | tonic::Code::DeadlineExceeded => {
                Self::Network(status.message().to_string())
            }
            tonic::Code::Unimplemented => Self::Unsupported(status.message().to_string()),
            tonic::Code::Aborted => Self::WorkerExit(status.message().to_string()),
            _ => Self::Api(status.message().to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let err: ProviderError = tonic::Status::unavailable("connection refused").into();
        assert!(matches!(err, ProviderError::Network(_)));

        let err: ProviderError = tonic::Status::aborted("encoder died").into();
        assert!(matches!(err, ProviderError::WorkerExit(_)));

        let err: ProviderError = tonic::Status::invalid_argument("bad codec").into();
        assert!(matches!(err, ProviderError::Api(_)));
    }
}
