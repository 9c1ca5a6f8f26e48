use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a transcode session.
///
/// Transitions are strictly forward: queued -> starting -> running ->
/// (cancelling) -> terminal. `can_transition` rejects anything that would
/// move a session backwards or out of a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Queued,
    Starting,
    Running,
    Cancelling,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Cancelling => "cancelling",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "starting" => Some(Self::Starting),
            "running" => Some(Self::Running),
            "cancelling" => Some(Self::Cancelling),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    const fn rank(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Starting => 1,
            Self::Running => 2,
            Self::Cancelling => 3,
            Self::Completed | Self::Failed | Self::Cancelled => 4,
        }
    }

    /// Whether moving from `self` to `next` preserves monotonicity.
    #[must_use]
    pub const fn can_transition(self, next: Self) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable record of a transcode session.
///
/// One row per session, written only by the session manager. `request_json`
/// is the serialized `TranscodeRequest`, kept opaque to the store so that a
/// session can be replayed (seek-ahead) without schema coupling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodeSession {
    pub id: Uuid,
    pub provider_id: String,
    pub media_id: Option<String>,
    pub request_json: String,
    pub status: SessionStatus,
    pub progress_percent: f64,
    pub start_time: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub directory_path: String,
    pub content_hash: Option<String>,
    pub process_pid: Option<u32>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub bytes_written: i64,
}

impl TranscodeSession {
    #[must_use]
    pub fn new(
        id: Uuid,
        provider_id: String,
        media_id: Option<String>,
        request_json: String,
        directory_path: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            provider_id,
            media_id,
            request_json,
            status: SessionStatus::Queued,
            progress_percent: 0.0,
            start_time: now,
            last_activity: now,
            directory_path,
            content_hash: None,
            process_pid: None,
            error_code: None,
            error_message: None,
            bytes_written: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            SessionStatus::Queued,
            SessionStatus::Starting,
            SessionStatus::Running,
            SessionStatus::Cancelling,
            SessionStatus::Completed,
            SessionStatus::Failed,
            SessionStatus::Cancelled,
        ] {
            assert_eq!(SessionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SessionStatus::parse("bogus"), None);
    }

    #[test]
    fn test_transitions_are_monotonic() {
        use SessionStatus::*;

        assert!(Queued.can_transition(Starting));
        assert!(Starting.can_transition(Running));
        assert!(Running.can_transition(Completed));
        assert!(Running.can_transition(Cancelling));
        assert!(Cancelling.can_transition(Cancelled));
        assert!(Queued.can_transition(Failed));

        // No backwards moves.
        assert!(!Running.can_transition(Queued));
        assert!(!Running.can_transition(Starting));
        assert!(!Cancelling.can_transition(Running));

        // Terminal states absorb.
        assert!(!Completed.can_transition(Failed));
        assert!(!Failed.can_transition(Running));
        assert!(!Cancelled.can_transition(Cancelling));
    }
}
