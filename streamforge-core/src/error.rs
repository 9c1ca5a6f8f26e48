use thiserror::Error;
use uuid::Uuid;

use crate::probe::ProbeError;
use crate::provider::ProviderError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Media validation failed: {0}")]
    MediaValidation(String),

    #[error("No provider available: {0}")]
    ProviderUnavailable(String),

    #[error("Circuit open for provider {provider}")]
    CircuitOpen { provider: String },

    #[error("Worker exited abnormally: {0}")]
    WorkerExit(String),

    #[error("Session limit reached ({limit} concurrent sessions)")]
    Overloaded { limit: usize },

    #[error("Session {0} stalled")]
    SessionStalled(Uuid),

    #[error("Session {0} not found")]
    SessionNotFound(Uuid),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Probe error: {0}")]
    Probe(#[from] ProbeError),

    #[error(transparent)]
    Provider(ProviderError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable code, carried in API error payloads and
    /// persisted on failed session rows.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::MediaValidation(_) | Self::Probe(_) => "media_validation",
            Self::ProviderUnavailable(_) => "provider_unavailable",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::WorkerExit(_) => "worker_exit",
            Self::Overloaded { .. } => "overloaded",
            Self::SessionStalled(_) => "session_stalled",
            Self::SessionNotFound(_) => "session_not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Cancelled => "cancelled",
            Self::Provider(_) => "provider_error",
            Self::Io(_) | Self::Database(_) | Self::Serialization(_) => "internal_io",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::Internal("Row not found".to_string()),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().unwrap_or_default();
                match code.as_ref() {
                    // SQLite primary/extended result codes:
                    // 1555 = SQLITE_CONSTRAINT_PRIMARYKEY, 2067 = SQLITE_CONSTRAINT_UNIQUE
                    "1555" | "2067" => {
                        Self::BadRequest("Resource already exists".to_string())
                    }
                    // 787 = SQLITE_CONSTRAINT_FOREIGNKEY
                    "787" => Self::BadRequest("Referenced resource not found".to_string()),
                    // 1299 = SQLITE_CONSTRAINT_NOTNULL
                    "1299" => Self::BadRequest("Required field is missing".to_string()),
                    _ => Self::Database(err),
                }
            }
            _ => Self::Database(err),
        }
    }
}

impl From<ProviderError> for Error {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::WorkerExit(msg) => Self::WorkerExit(msg),
            ProviderError::Network(msg) => Self::ProviderUnavailable(msg),
            other => Self::Provider(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(Error::MediaValidation("x".into()).code(), "media_validation");
        assert_eq!(
            Error::CircuitOpen {
                provider: "p".into()
            }
            .code(),
            "circuit_open"
        );
        assert_eq!(Error::Overloaded { limit: 4 }.code(), "overloaded");
        assert_eq!(Error::Cancelled.code(), "cancelled");
    }

    #[test]
    fn test_provider_error_mapping() {
        let err: Error = ProviderError::WorkerExit("exit status 1".into()).into();
        assert!(matches!(err, Error::WorkerExit(_)));

        let err: Error = ProviderError::Network("connection refused".into()).into();
        assert!(matches!(err, Error::ProviderUnavailable(_)));
    }
}
