use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use crate::models::{ContentEntry, ContentStats};
use crate::Result;

const CONTENT_COLUMNS: &str = "content_hash, path, size_bytes, media_id, created_at, \
     last_accessed, access_count, expires_at";

/// Index of finalized, content-addressed output.
#[derive(Clone)]
pub struct ContentRepository {
    pool: SqlitePool,
}

impl ContentRepository {
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, entry: &ContentEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO content_entries \
             (content_hash, path, size_bytes, media_id, created_at, last_accessed, \
              access_count, expires_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (content_hash) DO UPDATE SET last_accessed = excluded.last_accessed",
        )
        .bind(&entry.content_hash)
        .bind(&entry.path)
        .bind(entry.size_bytes)
        .bind(&entry.media_id)
        .bind(entry.created_at)
        .bind(entry.last_accessed)
        .bind(entry.access_count)
        .bind(entry.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, content_hash: &str) -> Result<Option<ContentEntry>> {
        let row = sqlx::query(&format!(
            "SELECT {CONTENT_COLUMNS} FROM content_entries WHERE content_hash = ?"
        ))
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_entry).transpose()
    }

    /// Record an access: bumps `last_accessed` and the access counter.
    pub async fn touch(&self, content_hash: &str) -> Result<()> {
        sqlx::query(
            "UPDATE content_entries \
             SET last_accessed = ?, access_count = access_count + 1 \
             WHERE content_hash = ?",
        )
        .bind(Utc::now())
        .bind(content_hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn by_media(&self, media_id: &str) -> Result<Vec<ContentEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {CONTENT_COLUMNS} FROM content_entries \
             WHERE media_id = ? ORDER BY created_at DESC"
        ))
        .bind(media_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_entry).collect()
    }

    pub async fn stats(&self) -> Result<ContentStats> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS entry_count, COALESCE(SUM(size_bytes), 0) AS total_size \
             FROM content_entries",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(ContentStats {
            entry_count: row.try_get("entry_count")?,
            total_size_bytes: row.try_get("total_size")?,
        })
    }

    /// Eviction order for size-pressure GC: soonest-expiring first, then
    /// least recently accessed.
    pub async fn eviction_candidates(&self) -> Result<Vec<ContentEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {CONTENT_COLUMNS} FROM content_entries \
             ORDER BY expires_at ASC, last_accessed ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_entry).collect()
    }

    pub async fn delete(&self, content_hash: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM content_entries WHERE content_hash = ?")
            .bind(content_hash)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn row_to_entry(row: SqliteRow) -> Result<ContentEntry> {
    Ok(ContentEntry {
        content_hash: row.try_get("content_hash")?,
        path: row.try_get("path")?,
        size_bytes: row.try_get("size_bytes")?,
        media_id: row.try_get("media_id")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        last_accessed: row.try_get::<DateTime<Utc>, _>("last_accessed")?,
        access_count: row.try_get("access_count")?,
        expires_at: row.try_get::<DateTime<Utc>, _>("expires_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn memory_repo() -> ContentRepository {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("../migrations").run(&pool).await.unwrap();
        ContentRepository::new(pool)
    }

    fn entry(hash: &str, expires_in_hours: i64, size: i64) -> ContentEntry {
        let now = Utc::now();
        ContentEntry {
            content_hash: hash.to_string(),
            path: format!("/data/content/{hash}"),
            size_bytes: size,
            media_id: Some("m1".into()),
            created_at: now,
            last_accessed: now,
            access_count: 0,
            expires_at: now + Duration::hours(expires_in_hours),
        }
    }

    #[tokio::test]
    async fn test_insert_get_touch() {
        let repo = memory_repo().await;
        repo.insert(&entry("aa11", 24, 1000)).await.unwrap();

        let loaded = repo.get("aa11").await.unwrap().unwrap();
        assert_eq!(loaded.access_count, 0);

        repo.touch("aa11").await.unwrap();
        repo.touch("aa11").await.unwrap();
        let loaded = repo.get("aa11").await.unwrap().unwrap();
        assert_eq!(loaded.access_count, 2);
    }

    #[tokio::test]
    async fn test_stats_and_eviction_order() {
        let repo = memory_repo().await;
        repo.insert(&entry("cc33", 48, 300)).await.unwrap();
        repo.insert(&entry("aa11", 1, 100)).await.unwrap();
        repo.insert(&entry("bb22", 24, 200)).await.unwrap();

        let stats = repo.stats().await.unwrap();
        assert_eq!(stats.entry_count, 3);
        assert_eq!(stats.total_size_bytes, 600);

        let candidates = repo.eviction_candidates().await.unwrap();
        let hashes: Vec<&str> = candidates.iter().map(|e| e.content_hash.as_str()).collect();
        assert_eq!(hashes, vec!["aa11", "bb22", "cc33"]);
    }

    #[tokio::test]
    async fn test_by_media_and_delete() {
        let repo = memory_repo().await;
        repo.insert(&entry("aa11", 24, 100)).await.unwrap();

        let found = repo.by_media("m1").await.unwrap();
        assert_eq!(found.len(), 1);
        assert!(repo.by_media("m2").await.unwrap().is_empty());

        assert!(repo.delete("aa11").await.unwrap());
        assert!(!repo.delete("aa11").await.unwrap());
    }
}
