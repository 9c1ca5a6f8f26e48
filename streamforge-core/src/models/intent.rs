use serde::{Deserialize, Serialize};

use super::TranscodeRequest;

/// Output of the decision engine: either the client can play the original
/// bytes, or it gets a normalized transcode request plus the reason the
/// source was rejected for direct play.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlayIntent {
    DirectPlay {
        url: String,
    },
    Transcode {
        request: TranscodeRequest,
        reason: String,
    },
}

impl PlayIntent {
    #[must_use]
    pub const fn is_direct(&self) -> bool {
        matches!(self, Self::DirectPlay { .. })
    }
}
