// HTTP error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type for HTTP handlers
pub type AppResult<T> = Result<T, AppError>;

/// Application error with HTTP status, stable code and request id
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub request_id: String,
}

/// Client closed request; nginx convention, no constant in `StatusCode`.
const CLIENT_CLOSED_REQUEST: u16 = 499;

impl AppError {
    pub fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.to_string(),
            message: message.into(),
            request_id: streamforge_core::logging::generate_request_id(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "service_unavailable",
            message,
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for AppError {}

/// Error response JSON structure
#[derive(Debug, Serialize, Deserialize)]
struct ErrorResponse {
    error: String,
    code: String,
    request_id: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.message,
            code: self.code,
            request_id: self.request_id,
        });

        (self.status, body).into_response()
    }
}

/// Map engine errors onto HTTP statuses. Internal causes are logged here and
/// replaced by a generic message; user-caused failures pass through.
impl From<streamforge_core::Error> for AppError {
    fn from(err: streamforge_core::Error) -> Self {
        use streamforge_core::Error;

        let code = err.code();
        match &err {
            Error::MediaValidation(_) | Error::BadRequest(_) | Error::Probe(_) => {
                Self::new(StatusCode::BAD_REQUEST, code, err.to_string())
            }
            Error::SessionNotFound(_) => Self::new(StatusCode::NOT_FOUND, code, err.to_string()),
            Error::Overloaded { .. } | Error::ProviderUnavailable(_) | Error::CircuitOpen { .. } => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, code, err.to_string())
            }
            Error::Cancelled => Self::new(
                StatusCode::from_u16(CLIENT_CLOSED_REQUEST)
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                code,
                err.to_string(),
            ),
            Error::WorkerExit(_) | Error::SessionStalled(_) | Error::Provider(_) => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, code, err.to_string())
            }
            Error::Io(e) => {
                tracing::error!("I/O error: {}", e);
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, code, "Storage error")
            }
            Error::Database(e) => {
                tracing::error!("Database error: {}", e);
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, code, "Storage error")
            }
            Error::Serialization(e) => {
                tracing::error!("Serialization error: {}", e);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    code,
                    "Data processing error",
                )
            }
            Error::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    code,
                    "Internal server error",
                )
            }
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!("JSON error: {}", err);
        Self::bad_request("Invalid request data format")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamforge_core::Error;
    use uuid::Uuid;

    #[test]
    fn test_status_mapping() {
        let e: AppError = Error::MediaValidation("bad".into()).into();
        assert_eq!(e.status, StatusCode::BAD_REQUEST);
        assert_eq!(e.code, "media_validation");

        let e: AppError = Error::SessionNotFound(Uuid::new_v4()).into();
        assert_eq!(e.status, StatusCode::NOT_FOUND);

        let e: AppError = Error::Overloaded { limit: 2 }.into();
        assert_eq!(e.status, StatusCode::SERVICE_UNAVAILABLE);

        let e: AppError = Error::CircuitOpen {
            provider: "p".into(),
        }
        .into();
        assert_eq!(e.status, StatusCode::SERVICE_UNAVAILABLE);

        let e: AppError = Error::Cancelled.into();
        assert_eq!(e.status.as_u16(), 499);

        let e: AppError = Error::WorkerExit("boom".into()).into();
        assert_eq!(e.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_request_id_present() {
        let e = AppError::bad_request("x");
        assert_eq!(e.request_id.len(), 32);
    }
}
