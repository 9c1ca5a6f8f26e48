use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Live worker process tracked by the process registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessEntry {
    pub pid: u32,
    pub session_id: Uuid,
    pub provider_id: String,
    pub start_time: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

impl ProcessEntry {
    #[must_use]
    pub fn new(pid: u32, session_id: Uuid, provider_id: String) -> Self {
        let now = Utc::now();
        Self {
            pid,
            session_id,
            provider_id,
            start_time: now,
            last_heartbeat: now,
        }
    }
}
