use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Post-finalization record for content-addressed output.
///
/// Created when a session finalizes, touched on every access, destroyed by
/// the retention engine once expired and under size pressure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentEntry {
    /// Hex SHA-256 over the canonical manifest + segment byte stream.
    pub content_hash: String,
    pub path: String,
    pub size_bytes: i64,
    pub media_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: i64,
    pub expires_at: DateTime<Utc>,
}

impl ContentEntry {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// Aggregate content store statistics, served by the stats endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentStats {
    pub entry_count: i64,
    pub total_size_bytes: i64,
}
