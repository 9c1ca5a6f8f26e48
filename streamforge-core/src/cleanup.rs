//! Cleanup & retention engine
//!
//! Background sweeper over four concerns: orphaned session directories,
//! content-store size pressure, dead or orphaned worker processes, and
//! durable-vs-memory state reconciliation after a crash. Runs on a timer
//! and on demand from the maintenance endpoints.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::RetentionConfig;
use crate::process::ProcessRegistry;
use crate::repository::ContentRepository;
use crate::session::SessionManager;
use crate::store::{ContentStore, OutputDirectoryManager};
use crate::Result;

/// Eviction stops once the store is back under this fraction of the cap.
const EVICTION_TARGET_RATIO: f64 = 0.9;

/// Rows with activity newer than this are never reconciled away: a start in
/// flight has inserted its row but not yet its in-memory entry.
const RECONCILE_GRACE: chrono::Duration = chrono::Duration::seconds(60);

/// Summary of one cleanup pass, surfaced by the maintenance endpoints.
#[derive(Debug, Default, serde::Serialize)]
pub struct CleanupReport {
    pub directories_removed: usize,
    pub content_entries_evicted: usize,
    pub processes_reaped: usize,
    pub processes_killed: usize,
    pub sessions_orphaned: usize,
}

pub struct CleanupEngine {
    retention: RetentionConfig,
    manager: Arc<SessionManager>,
    content: ContentRepository,
    content_store: ContentStore,
    dirs: OutputDirectoryManager,
    processes: Arc<ProcessRegistry>,
}

impl CleanupEngine {
    #[must_use]
    pub fn new(
        retention: RetentionConfig,
        manager: Arc<SessionManager>,
        content: ContentRepository,
        content_store: ContentStore,
        dirs: OutputDirectoryManager,
        processes: Arc<ProcessRegistry>,
    ) -> Arc<Self> {
        Arc::new(Self {
            retention,
            manager,
            content,
            content_store,
            dirs,
            processes,
        })
    }

    /// Timer loop. One failed pass is logged and retried next interval.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) {
        let engine = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(engine.retention.cleanup_interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match engine.run_once().await {
                            Ok(report) => info!(?report, "cleanup pass finished"),
                            Err(e) => warn!(error = %e, "cleanup pass failed"),
                        }
                    }
                }
            }
        });
    }

    /// One full pass over every cleanup concern.
    pub async fn run_once(&self) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();

        let active = self.manager.list_non_terminal().await?;
        let active_ids: HashSet<Uuid> = active.iter().map(|s| s.id).collect();
        let active_hashes: HashSet<&str> = active
            .iter()
            .filter_map(|s| s.content_hash.as_deref())
            .collect();

        report.directories_removed = self.sweep_session_dirs(&active_ids).await?;
        report.content_entries_evicted = self.evict_content(&active_hashes).await?;
        let (reaped, killed) = self.reap_processes(&active_ids).await;
        report.processes_reaped = reaped;
        report.processes_killed = killed;
        report.sessions_orphaned = self.reconcile_sessions(&active).await;

        Ok(report)
    }

    /// Pass 1+2: remove session directories with no live owner once they
    /// age out. A directory whose owner became active again between the
    /// snapshot and the unlink is re-checked at the last moment.
    async fn sweep_session_dirs(&self, active_ids: &HashSet<Uuid>) -> Result<usize> {
        let max_age = Duration::from_secs(self.retention.retention_hours * 3600);
        let now = SystemTime::now();
        let mut removed = 0;

        for dir in self.dirs.list_session_dirs().await? {
            if let Some(session_id) = dir.session_id {
                if active_ids.contains(&session_id) {
                    continue;
                }
                // Re-check at the unlink moment: the snapshot may be stale.
                if self.manager.has_live(session_id) {
                    continue;
                }
            }

            let age = now
                .duration_since(dir.modified)
                .unwrap_or(Duration::ZERO);
            if age < max_age {
                continue;
            }

            info!(dir = %dir.path.display(), "removing expired session directory");
            self.dirs.remove(&dir.path).await;
            removed += 1;
        }

        Ok(removed)
    }

    /// Pass 3: size-pressure eviction in (expires_at, last_accessed) order,
    /// skipping entries still referenced by a non-terminal session.
    async fn evict_content(&self, active_hashes: &HashSet<&str>) -> Result<usize> {
        let cap = self.retention.max_disk_usage_bytes();
        let stats = self.content.stats().await?;
        #[allow(clippy::cast_sign_loss)]
        let mut total = stats.total_size_bytes.max(0) as u64;
        if total <= cap {
            return Ok(0);
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let target = (cap as f64 * EVICTION_TARGET_RATIO) as u64;
        let mut evicted = 0;

        for entry in self.content.eviction_candidates().await? {
            if total <= target {
                break;
            }
            if active_hashes.contains(entry.content_hash.as_str()) {
                continue;
            }

            info!(hash = %entry.content_hash, bytes = entry.size_bytes, "evicting content entry");
            self.content_store.remove(&entry.content_hash).await;
            self.content.delete(&entry.content_hash).await?;
            #[allow(clippy::cast_sign_loss)]
            {
                total = total.saturating_sub(entry.size_bytes.max(0) as u64);
            }
            evicted += 1;
        }

        Ok(evicted)
    }

    /// On-demand zombie sweep for the monitoring endpoints: passes 4 only.
    pub async fn reap_zombies(&self) -> Result<(usize, usize)> {
        let active = self.manager.list_non_terminal().await?;
        let active_ids: HashSet<Uuid> = active.iter().map(|s| s.id).collect();
        Ok(self.reap_processes(&active_ids).await)
    }

    /// Pass 4: drop registry entries whose PID is gone, and escalate-kill
    /// processes whose session is terminal or absent.
    async fn reap_processes(&self, active_ids: &HashSet<Uuid>) -> (usize, usize) {
        let reaped = self.processes.remove_dead().len();

        let mut killed = 0;
        for orphan in self.processes.orphans(active_ids) {
            warn!(
                pid = orphan.pid,
                session_id = %orphan.session_id,
                "killing worker process with no live session"
            );
            if self.processes.terminate(orphan.pid).await {
                killed += 1;
            }
        }

        (reaped, killed)
    }

    /// Pass 5: crash recovery. A row that claims to be running with no
    /// in-memory session and no live PID belongs to a previous process
    /// incarnation; fail it so its directory becomes reclaimable.
    async fn reconcile_sessions(&self, active: &[crate::models::TranscodeSession]) -> usize {
        let mut orphaned = 0;

        for row in active {
            if self.manager.has_live(row.id) {
                // Durable and in-memory status must agree within a pass.
                if let Some(live_status) = self.manager.live_status(row.id) {
                    if live_status != row.status && !row.status.is_terminal() {
                        warn!(
                            session_id = %row.id,
                            durable = %row.status,
                            memory = %live_status,
                            "session status drift detected"
                        );
                    }
                }
                continue;
            }

            let pid_alive = row
                .process_pid
                .is_some_and(ProcessRegistry::is_alive);
            if pid_alive {
                continue;
            }

            if chrono::Utc::now() - row.last_activity < RECONCILE_GRACE {
                continue;
            }

            warn!(session_id = %row.id, "orphaned session row, marking failed");
            self.manager
                .fail_session(row.id, "worker_exit", "orphaned after crash recovery")
                .await;
            orphaned += 1;
        }

        orphaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TranscodingConfig;
    use crate::metrics::Metrics;
    use crate::models::{ContentEntry, OutputContainer, TranscodeSession};
    use crate::provider::ProviderRegistry;
    use crate::repository::SessionRepository;
    use chrono::Utc;

    struct Harness {
        engine: Arc<CleanupEngine>,
        sessions: SessionRepository,
        content: ContentRepository,
        dirs: OutputDirectoryManager,
        store: ContentStore,
        pool: sqlx::SqlitePool,
        _tmp: tempfile::TempDir,
    }

    impl Harness {
        /// Rewind a row's activity clock past the reconciliation grace.
        async fn backdate_activity(&self, id: Uuid) {
            sqlx::query("UPDATE transcode_sessions SET last_activity = ? WHERE id = ?")
                .bind(Utc::now() - chrono::Duration::hours(1))
                .bind(id.to_string())
                .execute(&self.pool)
                .await
                .unwrap();
        }
    }

    async fn harness(retention: RetentionConfig) -> Harness {
        let tmp = tempfile::tempdir().unwrap();
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("../migrations").run(&pool).await.unwrap();

        let data_dir = tmp.path().to_path_buf();
        let sessions = SessionRepository::new(pool.clone());
        let content = ContentRepository::new(pool.clone());
        let dirs = OutputDirectoryManager::new(data_dir.clone());
        let store = ContentStore::new(data_dir.clone());
        let processes = Arc::new(ProcessRegistry::new(Duration::from_secs(1)));

        let manager = SessionManager::new(
            TranscodingConfig {
                data_dir,
                ..Default::default()
            },
            retention.clone(),
            Arc::new(ProviderRegistry::new()),
            sessions.clone(),
            content.clone(),
            dirs.clone(),
            store.clone(),
            Arc::clone(&processes),
            Arc::new(Metrics::new().unwrap()),
        );

        let engine = CleanupEngine::new(
            retention,
            manager,
            content.clone(),
            store.clone(),
            dirs.clone(),
            processes,
        );

        Harness {
            engine,
            sessions,
            content,
            dirs,
            store,
            pool,
            _tmp: tmp,
        }
    }

    fn content_entry(hash: &str, size: i64, expires_hours: i64) -> ContentEntry {
        let now = Utc::now();
        ContentEntry {
            content_hash: hash.into(),
            path: String::new(),
            size_bytes: size,
            media_id: None,
            created_at: now,
            last_accessed: now,
            access_count: 0,
            expires_at: now + chrono::Duration::hours(expires_hours),
        }
    }

    #[tokio::test]
    async fn test_sweeps_orphan_directories() {
        // Zero retention: any unowned directory is immediately expired.
        let h = harness(RetentionConfig {
            retention_hours: 0,
            ..Default::default()
        })
        .await;

        let orphan_id = Uuid::new_v4();
        let dir = h
            .dirs
            .allocate(OutputContainer::Dash, "p", orphan_id)
            .await
            .unwrap();
        assert!(dir.exists());

        let report = h.engine.run_once().await.unwrap();
        assert_eq!(report.directories_removed, 1);
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_keeps_directories_of_active_sessions() {
        let h = harness(RetentionConfig {
            retention_hours: 0,
            ..Default::default()
        })
        .await;

        let id = Uuid::new_v4();
        let dir = h.dirs.allocate(OutputContainer::Dash, "p", id).await.unwrap();
        let row = TranscodeSession::new(
            id,
            "p".into(),
            None,
            "{}".into(),
            dir.to_string_lossy().into_owned(),
        );
        h.sessions.insert(&row).await.unwrap();
        h.backdate_activity(id).await;

        // Row is queued (non-terminal) but has no live entry and no PID:
        // reconciliation will orphan it, but the directory sweep must not
        // touch the directory while the row was non-terminal at snapshot.
        let report = h.engine.run_once().await.unwrap();
        assert_eq!(report.directories_removed, 0);
        assert!(dir.exists());
        assert_eq!(report.sessions_orphaned, 1);
    }

    #[tokio::test]
    async fn test_evicts_content_under_pressure() {
        // 0 GB cap: everything over zero bytes is pressure.
        let h = harness(RetentionConfig {
            max_disk_usage_gb: 0,
            ..Default::default()
        })
        .await;

        h.content
            .insert(&content_entry("aaaa", 500, 1))
            .await
            .unwrap();
        h.content
            .insert(&content_entry("bbbb", 500, 48))
            .await
            .unwrap();

        let report = h.engine.run_once().await.unwrap();
        assert_eq!(report.content_entries_evicted, 2);
        assert_eq!(h.content.stats().await.unwrap().entry_count, 0);
    }

    #[tokio::test]
    async fn test_eviction_skips_referenced_entries() {
        let h = harness(RetentionConfig {
            max_disk_usage_gb: 0,
            retention_hours: 1000,
            ..Default::default()
        })
        .await;

        // A non-terminal session referencing hash "aaaa".
        let id = Uuid::new_v4();
        let mut row = TranscodeSession::new(id, "p".into(), None, "{}".into(), "/x".into());
        row.content_hash = Some("aaaa".into());
        // Give it a live-looking PID so reconciliation leaves it alone.
        row.process_pid = Some(std::process::id());
        h.sessions.insert(&row).await.unwrap();

        h.content
            .insert(&content_entry("aaaa", 500, 1))
            .await
            .unwrap();
        h.content
            .insert(&content_entry("bbbb", 500, 48))
            .await
            .unwrap();

        let report = h.engine.run_once().await.unwrap();
        assert_eq!(report.content_entries_evicted, 1);
        assert!(h.content.get("aaaa").await.unwrap().is_some());
        assert!(h.content.get("bbbb").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reconciliation_orphans_running_rows() {
        let h = harness(RetentionConfig::default()).await;

        let id = Uuid::new_v4();
        let row = TranscodeSession::new(id, "p".into(), None, "{}".into(), "/x".into());
        h.sessions.insert(&row).await.unwrap();
        h.sessions
            .update_status(id, crate::models::SessionStatus::Starting)
            .await
            .unwrap();
        h.sessions
            .update_status(id, crate::models::SessionStatus::Running)
            .await
            .unwrap();
        // Dead PID recorded from a previous incarnation.
        h.sessions.set_pid(id, Some(4_000_000)).await.unwrap();
        h.backdate_activity(id).await;

        let report = h.engine.run_once().await.unwrap();
        assert_eq!(report.sessions_orphaned, 1);

        let loaded = h.sessions.get(id).await.unwrap().unwrap();
        assert_eq!(loaded.status, crate::models::SessionStatus::Failed);
        assert_eq!(loaded.error_code.as_deref(), Some("worker_exit"));
    }

    #[tokio::test]
    async fn test_reaps_dead_process_entries() {
        let h = harness(RetentionConfig::default()).await;
        h.engine
            .processes
            .register(crate::models::ProcessEntry::new(
                4_000_001,
                Uuid::new_v4(),
                "p".into(),
            ));

        let report = h.engine.run_once().await.unwrap();
        assert_eq!(report.processes_reaped, 1);
        assert!(h.engine.processes.is_empty());
    }

    #[tokio::test]
    async fn test_empty_pass_is_clean() {
        let h = harness(RetentionConfig::default()).await;
        let report = h.engine.run_once().await.unwrap();
        assert_eq!(report.directories_removed, 0);
        assert_eq!(report.content_entries_evicted, 0);
        assert_eq!(report.sessions_orphaned, 0);
        drop(h.store);
    }
}
