use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;

use crate::models::{SessionStatus, TranscodeSession};
use crate::{Error, Result};

const SESSION_COLUMNS: &str = "id, provider_id, media_id, request_json, status, \
     progress_percent, start_time, last_activity, directory_path, content_hash, \
     process_pid, error_code, error_message, bytes_written";

/// Durable record of every transcode session.
///
/// The session manager is the single writer; everything else reads.
#[derive(Clone)]
pub struct SessionRepository {
    pool: SqlitePool,
}

impl SessionRepository {
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, session: &TranscodeSession) -> Result<()> {
        sqlx::query(
            "INSERT INTO transcode_sessions \
             (id, provider_id, media_id, request_json, status, progress_percent, \
              start_time, last_activity, directory_path, content_hash, process_pid, \
              error_code, error_message, bytes_written) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(session.id.to_string())
        .bind(&session.provider_id)
        .bind(&session.media_id)
        .bind(&session.request_json)
        .bind(session.status.as_str())
        .bind(session.progress_percent)
        .bind(session.start_time)
        .bind(session.last_activity)
        .bind(&session.directory_path)
        .bind(&session.content_hash)
        .bind(session.process_pid.map(i64::from))
        .bind(&session.error_code)
        .bind(&session.error_message)
        .bind(session.bytes_written)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<TranscodeSession>> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM transcode_sessions WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_session).transpose()
    }

    pub async fn list(&self) -> Result<Vec<TranscodeSession>> {
        let rows = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM transcode_sessions ORDER BY start_time DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_session).collect()
    }

    /// Sessions in a non-terminal state.
    pub async fn list_active(&self) -> Result<Vec<TranscodeSession>> {
        let rows = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM transcode_sessions \
             WHERE status NOT IN ('completed', 'failed', 'cancelled') \
             ORDER BY start_time ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_session).collect()
    }

    /// Update the lifecycle state. Enforces monotonicity at the storage
    /// boundary: a row already past `status` is left untouched and reported.
    pub async fn update_status(&self, id: Uuid, status: SessionStatus) -> Result<bool> {
        let current = self
            .get(id)
            .await?
            .ok_or(Error::SessionNotFound(id))?;

        if !current.status.can_transition(status) {
            return Ok(false);
        }

        sqlx::query(
            "UPDATE transcode_sessions SET status = ?, last_activity = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(true)
    }

    pub async fn update_progress(
        &self,
        id: Uuid,
        progress_percent: f64,
        bytes_written: i64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE transcode_sessions \
             SET progress_percent = ?, bytes_written = ?, last_activity = ? \
             WHERE id = ?",
        )
        .bind(progress_percent.clamp(0.0, 100.0))
        .bind(bytes_written)
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_pid(&self, id: Uuid, pid: Option<u32>) -> Result<()> {
        sqlx::query("UPDATE transcode_sessions SET process_pid = ? WHERE id = ?")
            .bind(pid.map(i64::from))
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Persist the request actually in effect, after fallback mutation or a
    /// provider re-selection changed it.
    pub async fn set_request(
        &self,
        id: Uuid,
        provider_id: &str,
        request_json: &str,
        directory_path: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE transcode_sessions \
             SET provider_id = ?, request_json = ?, directory_path = ? \
             WHERE id = ?",
        )
        .bind(provider_id)
        .bind(request_json)
        .bind(directory_path)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_failed(&self, id: Uuid, code: &str, message: &str) -> Result<()> {
        sqlx::query(
            "UPDATE transcode_sessions \
             SET status = 'failed', error_code = ?, error_message = ?, last_activity = ? \
             WHERE id = ? AND status NOT IN ('completed', 'failed', 'cancelled')",
        )
        .bind(code)
        .bind(message)
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_completed(&self, id: Uuid, content_hash: &str) -> Result<()> {
        sqlx::query(
            "UPDATE transcode_sessions \
             SET status = 'completed', progress_percent = 100.0, content_hash = ?, \
                 last_activity = ? \
             WHERE id = ? AND status NOT IN ('completed', 'failed', 'cancelled')",
        )
        .bind(content_hash)
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_cancelled(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE transcode_sessions SET status = 'cancelled', last_activity = ? \
             WHERE id = ? AND status NOT IN ('completed', 'failed', 'cancelled')",
        )
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Count of non-terminal sessions, used by stats reporting.
    pub async fn count_active(&self) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM transcode_sessions \
             WHERE status NOT IN ('completed', 'failed', 'cancelled')",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("n")?)
    }
}

fn row_to_session(row: SqliteRow) -> Result<TranscodeSession> {
    let id_str: String = row.try_get("id")?;
    let status_str: String = row.try_get("status")?;
    let pid: Option<i64> = row.try_get("process_pid")?;

    Ok(TranscodeSession {
        id: Uuid::parse_str(&id_str)
            .map_err(|e| Error::Internal(format!("bad session id in store: {e}")))?,
        provider_id: row.try_get("provider_id")?,
        media_id: row.try_get("media_id")?,
        request_json: row.try_get("request_json")?,
        status: SessionStatus::parse(&status_str)
            .ok_or_else(|| Error::Internal(format!("bad session status in store: {status_str}")))?,
        progress_percent: row.try_get("progress_percent")?,
        start_time: row.try_get::<DateTime<Utc>, _>("start_time")?,
        last_activity: row.try_get::<DateTime<Utc>, _>("last_activity")?,
        directory_path: row.try_get("directory_path")?,
        content_hash: row.try_get("content_hash")?,
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        process_pid: pid.map(|p| p as u32),
        error_code: row.try_get("error_code")?,
        error_message: row.try_get("error_message")?,
        bytes_written: row.try_get("bytes_written")?,
    })
}
