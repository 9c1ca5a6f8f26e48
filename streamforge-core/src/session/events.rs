use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle events published by the session manager.
///
/// Consumers subscribe through `SessionManager::subscribe`; a lagging
/// subscriber loses old events, never blocks the manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Queued {
        session_id: Uuid,
        provider_id: String,
    },
    Started {
        session_id: Uuid,
        provider_id: String,
        pid: Option<u32>,
    },
    Progress {
        session_id: Uuid,
        percent: f64,
        bytes_written: u64,
    },
    Completed {
        session_id: Uuid,
        content_hash: String,
    },
    Failed {
        session_id: Uuid,
        code: String,
        message: String,
    },
    Cancelled {
        session_id: Uuid,
    },
}

impl SessionEvent {
    #[must_use]
    pub const fn session_id(&self) -> Uuid {
        match self {
            Self::Queued { session_id, .. }
            | Self::Started { session_id, .. }
            | Self::Progress { session_id, .. }
            | Self::Completed { session_id, .. }
            | Self::Failed { session_id, .. }
            | Self::Cancelled { session_id } => *session_id,
        }
    }
}
