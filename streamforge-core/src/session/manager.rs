use chrono::Duration as ChronoDuration;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{RetentionConfig, TranscodingConfig};
use crate::fallback::FallbackEngine;
use crate::metrics::Metrics;
use crate::probe::MediaProber;
use crate::models::{
    ProcessEntry, SessionStatus, TranscodeRequest, TranscodeSession,
};
use crate::process::ProcessRegistry;
use crate::provider::{ProviderRegistry, StreamHandle, TranscodeProvider};
use crate::repository::{ContentRepository, SessionRepository};
use crate::resilience::BreakerRegistry;
use crate::session::SessionEvent;
use crate::store::{ContentStore, OutputDirectoryManager};
use crate::{validation, Error, Result};

/// Capacity of the lifecycle event bus. Laggy subscribers drop old events.
const EVENT_BUS_CAPACITY: usize = 256;

/// Durable progress writes are debounced to at most one per second per
/// session; terminal transitions always write immediately.
const PROGRESS_WRITE_DEBOUNCE: Duration = Duration::from_secs(1);

/// In-memory state for one live session.
struct LiveSession {
    session_id: Uuid,
    provider: Arc<dyn TranscodeProvider>,
    provider_id: String,
    handle: StreamHandle,
    request: TranscodeRequest,
    media_id: Option<String>,
    cancel: CancellationToken,
    status: Mutex<SessionStatus>,
    last_activity: Mutex<Instant>,
}

impl LiveSession {
    fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }
}

/// Parameters for starting a session.
#[derive(Debug, Clone)]
pub struct StartOptions {
    pub media_id: Option<String>,
    pub request: TranscodeRequest,
    /// Pin provider selection to one id (seek-ahead replays on the same
    /// provider).
    pub provider_override: Option<String>,
}

/// Result of a stop-all sweep.
#[derive(Debug, Default, serde::Serialize)]
pub struct StopAllReport {
    pub stopped_count: usize,
    pub total_sessions: usize,
    pub errors: Vec<String>,
}

/// Orchestrator for transcode sessions.
///
/// Owns the in-memory session table and is the single writer of the durable
/// session store. HTTP handlers and background engines call methods here;
/// nothing else mutates session state.
pub struct SessionManager {
    config: TranscodingConfig,
    retention: RetentionConfig,
    registry: Arc<ProviderRegistry>,
    sessions: SessionRepository,
    content: ContentRepository,
    dirs: OutputDirectoryManager,
    content_store: ContentStore,
    processes: Arc<ProcessRegistry>,
    breakers: Arc<BreakerRegistry>,
    fallback: FallbackEngine,
    prober: MediaProber,
    metrics: Arc<Metrics>,
    live: DashMap<Uuid, Arc<LiveSession>>,
    events: broadcast::Sender<SessionEvent>,
    /// Self-handle for spawning supervisor tasks from `&self` methods.
    self_ref: Weak<Self>,
}

impl SessionManager {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        config: TranscodingConfig,
        retention: RetentionConfig,
        registry: Arc<ProviderRegistry>,
        sessions: SessionRepository,
        content: ContentRepository,
        dirs: OutputDirectoryManager,
        content_store: ContentStore,
        processes: Arc<ProcessRegistry>,
        metrics: Arc<Metrics>,
    ) -> Arc<Self> {
        let breakers = Arc::new(BreakerRegistry::new(
            config.breaker_failure_threshold,
            Duration::from_secs(config.breaker_open_timeout_secs),
        ));
        let prober = MediaProber::new(
            config.ffprobe_path.clone(),
            Duration::from_secs(config.probe_timeout_secs),
        );
        let (events, _) = broadcast::channel(EVENT_BUS_CAPACITY);

        Arc::new_cyclic(|self_ref| Self {
            config,
            retention,
            registry,
            sessions,
            content,
            dirs,
            content_store,
            processes,
            breakers,
            fallback: FallbackEngine::default(),
            prober,
            metrics,
            live: DashMap::new(),
            events,
            self_ref: self_ref.clone(),
        })
    }

    /// Subscribe to lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: SessionEvent) {
        // Zero subscribers is normal at startup.
        let _ = self.events.send(event);
    }

    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    #[must_use]
    pub fn live_ids(&self) -> HashSet<Uuid> {
        self.live.iter().map(|e| *e.key()).collect()
    }

    #[must_use]
    pub fn has_live(&self, id: Uuid) -> bool {
        self.live.contains_key(&id)
    }

    /// In-memory status of a live session, for reconciliation.
    #[must_use]
    pub fn live_status(&self, id: Uuid) -> Option<SessionStatus> {
        self.live.get(&id).map(|e| *e.status.lock())
    }

    pub async fn get(&self, id: Uuid) -> Result<TranscodeSession> {
        self.sessions
            .get(id)
            .await?
            .ok_or(Error::SessionNotFound(id))
    }

    pub async fn list(&self) -> Result<Vec<TranscodeSession>> {
        self.sessions.list().await
    }

    pub async fn list_non_terminal(&self) -> Result<Vec<TranscodeSession>> {
        self.sessions.list_active().await
    }

    /// Admit and start a transcode session.
    pub async fn start(
        &self,
        opts: StartOptions,
        cancel: &CancellationToken,
    ) -> Result<TranscodeSession> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        if self.config.full_validation {
            validation::validate_media_file_full(&opts.request.input_path, &self.prober).await?;
        } else {
            validation::validate_media_file(&opts.request.input_path).await?;
        }

        if self.live.len() >= self.config.max_concurrent_sessions {
            return Err(Error::Overloaded {
                limit: self.config.max_concurrent_sessions,
            });
        }

        let candidates = self.candidate_providers(&opts).await?;
        let session_id = Uuid::new_v4();

        let mut row_inserted = false;
        let mut last_err: Option<Error> = None;

        for provider in candidates {
            let provider_id = provider.info().id;

            if let Err(e) = self.breakers.check(&provider_id) {
                self.metrics.breaker_rejections.inc();
                warn!(session_id = %session_id, provider = %provider_id, "provider breaker open");
                last_err = Some(e);
                continue;
            }

            let dir = self
                .dirs
                .allocate(opts.request.output_container, &provider_id, session_id)
                .await?;
            let dir_str = dir.to_string_lossy().into_owned();
            let request_json = serde_json::to_string(&opts.request)?;

            if row_inserted {
                self.sessions
                    .set_request(session_id, &provider_id, &request_json, &dir_str)
                    .await?;
            } else {
                let row = TranscodeSession::new(
                    session_id,
                    provider_id.clone(),
                    opts.media_id.clone(),
                    request_json,
                    dir_str,
                );
                self.sessions.insert(&row).await?;
                row_inserted = true;
                self.publish(SessionEvent::Queued {
                    session_id,
                    provider_id: provider_id.clone(),
                });
            }

            let attempt_provider = Arc::clone(&provider);
            let attempt_dir = dir.clone();
            let breakers = Arc::clone(&self.breakers);
            let attempt_provider_id = provider_id.clone();

            let execution = self.fallback.execute(&opts.request, move |req| {
                let provider = Arc::clone(&attempt_provider);
                let dir = attempt_dir.clone();
                let breakers = Arc::clone(&breakers);
                let provider_id = attempt_provider_id.clone();
                async move {
                    match provider.start_stream(&req, session_id, &dir).await {
                        Ok(handle) => {
                            breakers.record_success(&provider_id);
                            Ok(handle)
                        }
                        Err(e) => {
                            breakers.record_failure(&provider_id);
                            Err(e)
                        }
                    }
                }
            });

            let outcome = tokio::select! {
                outcome = execution => outcome,
                () = cancel.cancelled() => {
                    self.dirs.remove(&dir).await;
                    self.sessions.mark_cancelled(session_id).await?;
                    self.publish(SessionEvent::Cancelled { session_id });
                    return Err(Error::Cancelled);
                }
            };

            match outcome {
                Ok(outcome) => {
                    if outcome.fallbacks_applied > 0 {
                        #[allow(clippy::cast_possible_truncation)]
                        self.metrics
                            .fallback_activations
                            .inc_by(outcome.fallbacks_applied as u64);
                        // Persist the request that actually worked so replay
                        // and seek-ahead start from it.
                        let effective_json = serde_json::to_string(&outcome.effective_request)?;
                        self.sessions
                            .set_request(
                                session_id,
                                &provider_id,
                                &effective_json,
                                &dir.to_string_lossy(),
                            )
                            .await?;
                    }

                    return self
                        .activate(
                            session_id,
                            provider,
                            provider_id,
                            outcome.value,
                            outcome.effective_request,
                            opts.media_id.clone(),
                        )
                        .await;
                }
                Err(e) => {
                    warn!(
                        session_id = %session_id,
                        provider = %provider_id,
                        error = %e,
                        "provider failed to start session"
                    );
                    self.dirs.remove(&dir).await;
                    last_err = Some(e);
                }
            }
        }

        let err = last_err
            .unwrap_or_else(|| Error::ProviderUnavailable("no provider available".to_string()));
        if row_inserted {
            self.sessions
                .mark_failed(session_id, err.code(), &err.to_string())
                .await?;
            self.metrics.sessions_failed.inc();
            self.publish(SessionEvent::Failed {
                session_id,
                code: err.code().to_string(),
                message: err.to_string(),
            });
        }
        Err(err)
    }

    async fn candidate_providers(
        &self,
        opts: &StartOptions,
    ) -> Result<Vec<Arc<dyn TranscodeProvider>>> {
        let candidates = if let Some(provider_id) = &opts.provider_override {
            let provider = self
                .registry
                .get(provider_id)
                .await
                .ok_or_else(|| {
                    Error::ProviderUnavailable(format!("provider {provider_id} not registered"))
                })?;
            vec![provider]
        } else {
            self.registry.select_for(&opts.request).await
        };

        if candidates.is_empty() {
            return Err(Error::ProviderUnavailable(
                "no registered provider covers this request".to_string(),
            ));
        }
        Ok(candidates)
    }

    /// Transition a freshly started session into the running state and hand
    /// it to the poller.
    async fn activate(
        &self,
        session_id: Uuid,
        provider: Arc<dyn TranscodeProvider>,
        provider_id: String,
        handle: StreamHandle,
        request: TranscodeRequest,
        media_id: Option<String>,
    ) -> Result<TranscodeSession> {
        self.sessions
            .update_status(session_id, SessionStatus::Starting)
            .await?;

        if let Some(pid) = handle.pid {
            self.processes
                .register(ProcessEntry::new(pid, session_id, provider_id.clone()));
            self.sessions.set_pid(session_id, Some(pid)).await?;
        }

        self.sessions
            .update_status(session_id, SessionStatus::Running)
            .await?;

        let entry = Arc::new(LiveSession {
            session_id,
            provider,
            provider_id: provider_id.clone(),
            handle: handle.clone(),
            request,
            media_id,
            cancel: CancellationToken::new(),
            status: Mutex::new(SessionStatus::Running),
            last_activity: Mutex::new(Instant::now()),
        });
        self.live.insert(session_id, Arc::clone(&entry));
        self.update_live_gauge();

        self.metrics.sessions_started.inc();
        self.publish(SessionEvent::Started {
            session_id,
            provider_id,
            pid: handle.pid,
        });

        if let Some(manager) = self.self_ref.upgrade() {
            tokio::spawn(async move {
                manager.poll_progress(entry).await;
            });
        }

        info!(session_id = %session_id, "session running");
        self.get(session_id).await
    }

    /// Per-session progress poller. Exits on cancel, completion or worker
    /// failure; whatever the path, the live entry is removed.
    async fn poll_progress(self: Arc<Self>, entry: Arc<LiveSession>) {
        let mut ticker = tokio::time::interval(self.config.progress_poll_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut last_write = Instant::now()
            .checked_sub(PROGRESS_WRITE_DEBOUNCE)
            .unwrap_or_else(Instant::now);

        loop {
            tokio::select! {
                () = entry.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match entry.provider.progress(&entry.handle).await {
                        Ok(report) => {
                            if let Some(worker_error) = report.error {
                                self.on_worker_failure(&entry, &worker_error).await;
                                break;
                            }

                            entry.touch();
                            if let Some(pid) = entry.handle.pid {
                                self.processes.heartbeat(pid);
                            }

                            self.publish(SessionEvent::Progress {
                                session_id: entry.session_id,
                                percent: report.percent,
                                bytes_written: report.bytes_written,
                            });

                            // Debounced durable write; the newest sample wins.
                            if last_write.elapsed() >= PROGRESS_WRITE_DEBOUNCE {
                                #[allow(clippy::cast_possible_wrap)]
                                if let Err(e) = self
                                    .sessions
                                    .update_progress(
                                        entry.session_id,
                                        report.percent,
                                        report.bytes_written as i64,
                                    )
                                    .await
                                {
                                    error!(session_id = %entry.session_id, error = %e,
                                        "failed to persist progress");
                                }
                                last_write = Instant::now();
                            }

                            if report.percent >= 100.0 {
                                self.finalize_session(&entry).await;
                                break;
                            }
                        }
                        Err(e) => {
                            // progress() already retried transient failures;
                            // a surviving error means the worker is gone.
                            self.breakers.record_failure(&entry.provider_id);
                            self.on_worker_failure(&entry, &e.to_string()).await;
                            break;
                        }
                    }
                }
            }
        }

        self.live.remove(&entry.session_id);
        self.update_live_gauge();
    }

    /// Compute the content address for a finished session and flip it to
    /// completed.
    async fn finalize_session(&self, entry: &LiveSession) {
        let container = entry.request.output_container;
        let primary_file = container
            .manifest_file_name()
            .or_else(|| container.progressive_file_name())
            .unwrap_or("stream.out");

        #[allow(clippy::cast_possible_wrap)]
        let retention = ChronoDuration::hours(self.retention.extended_hours as i64);

        match self
            .content_store
            .finalize(
                &entry.handle.directory_path,
                primary_file,
                entry.media_id.as_deref(),
                retention,
            )
            .await
        {
            Ok((finalized, content_entry)) => {
                if let Err(e) = self.content.insert(&content_entry).await {
                    error!(session_id = %entry.session_id, error = %e,
                        "failed to persist content entry");
                }
                if let Err(e) = self
                    .sessions
                    .mark_completed(entry.session_id, &finalized.content_hash)
                    .await
                {
                    error!(session_id = %entry.session_id, error = %e,
                        "failed to mark session completed");
                }
                *entry.status.lock() = SessionStatus::Completed;
                self.metrics.sessions_completed.inc();
                if let Ok(stats) = self.content.stats().await {
                    self.metrics.content_store_bytes.set(stats.total_size_bytes);
                }
                self.publish(SessionEvent::Completed {
                    session_id: entry.session_id,
                    content_hash: finalized.content_hash,
                });
                info!(session_id = %entry.session_id, "session completed");
            }
            Err(e) => {
                warn!(session_id = %entry.session_id, error = %e, "finalization failed");
                self.fail_session(entry.session_id, "internal_io", &e.to_string())
                    .await;
            }
        }

        if let Some(pid) = entry.handle.pid {
            self.processes.deregister(pid);
        }
    }

    async fn on_worker_failure(&self, entry: &LiveSession, message: &str) {
        warn!(session_id = %entry.session_id, error = %message, "worker failed");
        *entry.status.lock() = SessionStatus::Failed;
        self.fail_session(entry.session_id, "worker_exit", message)
            .await;
        if let Some(pid) = entry.handle.pid {
            if ProcessRegistry::is_alive(pid) {
                self.processes.terminate(pid).await;
            } else {
                self.processes.deregister(pid);
            }
        }
    }

    /// Durably fail a session and publish the event. Used by the poller,
    /// the watchdog and crash recovery; safe to call for sessions with no
    /// live entry.
    pub async fn fail_session(&self, session_id: Uuid, code: &str, message: &str) {
        if let Err(e) = self.sessions.mark_failed(session_id, code, message).await {
            error!(session_id = %session_id, error = %e, "failed to persist failure");
        }
        self.metrics.sessions_failed.inc();
        self.publish(SessionEvent::Failed {
            session_id,
            code: code.to_string(),
            message: message.to_string(),
        });
    }

    /// Stop a session: cancel its poller, stop the worker stream, escalate
    /// to the process registry if the encoder lingers, release the
    /// directory for GC.
    pub async fn stop(&self, session_id: Uuid) -> Result<()> {
        let Some((_, entry)) = self.live.remove(&session_id) else {
            // Not live: stopping an already-terminal session is idempotent,
            // a queued leftover row is cancelled in place.
            let row = self.get(session_id).await?;
            if !row.status.is_terminal() {
                self.sessions.mark_cancelled(session_id).await?;
                self.publish(SessionEvent::Cancelled { session_id });
            }
            return Ok(());
        };
        self.update_live_gauge();

        *entry.status.lock() = SessionStatus::Cancelling;
        if let Err(e) = self
            .sessions
            .update_status(session_id, SessionStatus::Cancelling)
            .await
        {
            warn!(session_id = %session_id, error = %e, "failed to persist cancelling state");
        }
        entry.cancel.cancel();

        let stop_result = tokio::time::timeout(
            self.config.shutdown_timeout(),
            entry.provider.stop_stream(&entry.handle),
        )
        .await;
        match stop_result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(session_id = %session_id, error = %e, "provider stop_stream failed")
            }
            Err(_) => warn!(session_id = %session_id, "provider stop_stream timed out"),
        }

        if let Some(pid) = entry.handle.pid {
            if ProcessRegistry::is_alive(pid) {
                debug!(session_id = %session_id, pid, "escalating worker shutdown");
                self.processes.terminate(pid).await;
            } else {
                self.processes.deregister(pid);
            }
        }

        *entry.status.lock() = SessionStatus::Cancelled;
        self.sessions.mark_cancelled(session_id).await?;
        self.metrics.sessions_cancelled.inc();
        self.publish(SessionEvent::Cancelled { session_id });
        info!(session_id = %session_id, "session cancelled");
        Ok(())
    }

    /// Stop every live session, collecting per-session failures.
    pub async fn stop_all(&self) -> StopAllReport {
        let ids: Vec<Uuid> = self.live_ids().into_iter().collect();
        let mut report = StopAllReport {
            total_sessions: ids.len(),
            ..Default::default()
        };

        for id in ids {
            match self.stop(id).await {
                Ok(()) => report.stopped_count += 1,
                Err(e) => report.errors.push(format!("{id}: {e}")),
            }
        }
        report
    }

    /// Fast seek inside a live title: replay the stored request with a new
    /// seek offset on the same provider. The original session keeps running
    /// so the client can fall back to its timeline; retention reclaims it.
    pub async fn seek_ahead(
        &self,
        session_id: Uuid,
        seek_seconds: f64,
        cancel: &CancellationToken,
    ) -> Result<TranscodeSession> {
        let row = self.get(session_id).await?;
        let mut request: TranscodeRequest = serde_json::from_str(&row.request_json)?;
        request.seek_offset_seconds = seek_seconds.max(0.0);

        self.start(
            StartOptions {
                media_id: row.media_id,
                request,
                provider_override: Some(row.provider_id),
            },
            cancel,
        )
        .await
    }

    /// Watchdog pass: fail and stop sessions idle past the stall threshold.
    pub async fn reap_stalled(&self) -> usize {
        let threshold = self.config.stall_threshold();
        let stalled: Vec<Uuid> = self
            .live
            .iter()
            .filter(|e| e.idle_for() > threshold)
            .map(|e| *e.key())
            .collect();

        let count = stalled.len();
        for id in stalled {
            warn!(session_id = %id, "session stalled, reaping");
            self.fail_session(id, "session_stalled", "no activity within stall threshold")
                .await;
            if let Some((_, entry)) = self.live.remove(&id) {
                entry.cancel.cancel();
                let _ = tokio::time::timeout(
                    self.config.shutdown_timeout(),
                    entry.provider.stop_stream(&entry.handle),
                )
                .await;
                if let Some(pid) = entry.handle.pid {
                    self.processes.terminate(pid).await;
                }
            }
            self.update_live_gauge();
        }
        count
    }

    /// Background watchdog loop.
    pub fn spawn_watchdog(&self, cancel: CancellationToken) {
        let Some(manager) = self.self_ref.upgrade() else {
            return;
        };
        // Check at a fraction of the threshold so a stall is caught within
        // ~10% of its deadline.
        let interval = (self.config.stall_threshold() / 10).max(Duration::from_secs(5));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        manager.reap_stalled().await;
                    }
                }
            }
        });
    }

    fn update_live_gauge(&self) {
        #[allow(clippy::cast_possible_wrap)]
        self.metrics.live_sessions.set(self.live.len() as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OutputContainer, ProviderInfo, SpeedPriority};
    use crate::provider::{ProgressReport, ProviderError};
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::stream::BoxStream;
    use std::path::{Path, PathBuf};
    use std::result::Result;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scriptable in-process provider: fails the first `fail_times` starts,
    /// then succeeds and writes plausible DASH output.
    struct ScriptedProvider {
        info: ProviderInfo,
        fail_times: usize,
        fail_message: String,
        starts: AtomicUsize,
        progress_percent: parking_lot::Mutex<f64>,
    }

    impl ScriptedProvider {
        fn new(id: &str, priority: i32) -> Self {
            Self {
                info: ProviderInfo {
                    id: id.into(),
                    display_name: id.to_uppercase(),
                    priority,
                    containers: vec!["dash".into(), "hls".into(), "mp4".into()],
                    video_codecs: vec!["h264".into(), "hevc".into()],
                    audio_codecs: vec!["aac".into()],
                    hardware: false,
                    max_concurrent: 4,
                },
                fail_times: 0,
                fail_message: String::new(),
                starts: AtomicUsize::new(0),
                progress_percent: parking_lot::Mutex::new(50.0),
            }
        }

        fn failing(mut self, times: usize, message: &str) -> Self {
            self.fail_times = times;
            self.fail_message = message.to_string();
            self
        }
    }

    #[async_trait]
    impl TranscodeProvider for ScriptedProvider {
        fn info(&self) -> ProviderInfo {
            self.info.clone()
        }

        async fn can_transcode(&self, _req: &TranscodeRequest) -> Result<bool, ProviderError> {
            Ok(true)
        }

        async fn start_stream(
            &self,
            _req: &TranscodeRequest,
            session_id: Uuid,
            output_dir: &Path,
        ) -> Result<StreamHandle, ProviderError> {
            let attempt = self.starts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.fail_times {
                return Err(ProviderError::Api(self.fail_message.clone()));
            }

            tokio::fs::write(output_dir.join("manifest.mpd"), b"<MPD></MPD>")
                .await
                .map_err(|e| ProviderError::Api(e.to_string()))?;
            tokio::fs::write(output_dir.join("chunk-0-00001.m4s"), vec![1u8; 64])
                .await
                .map_err(|e| ProviderError::Api(e.to_string()))?;

            Ok(StreamHandle {
                session_id,
                provider_id: self.info.id.clone(),
                directory_path: output_dir.to_path_buf(),
                start_time: chrono::Utc::now(),
                pid: None,
            })
        }

        async fn progress(&self, _handle: &StreamHandle) -> Result<ProgressReport, ProviderError> {
            Ok(ProgressReport {
                percent: *self.progress_percent.lock(),
                bytes_written: 64,
                speed_ratio: 1.5,
                error: None,
            })
        }

        async fn stop_stream(&self, _handle: &StreamHandle) -> Result<(), ProviderError> {
            Ok(())
        }

        async fn fetch_stream(
            &self,
            _handle: &StreamHandle,
        ) -> Result<BoxStream<'static, Result<Bytes, ProviderError>>, ProviderError> {
            Err(ProviderError::Unsupported("progressive".into()))
        }
    }

    struct Harness {
        manager: Arc<SessionManager>,
        registry: Arc<ProviderRegistry>,
        _tmp: tempfile::TempDir,
        media_path: PathBuf,
    }

    async fn harness(max_sessions: usize) -> Harness {
        harness_with(max_sessions, 300).await
    }

    async fn harness_with(max_sessions: usize, stall_threshold_secs: u64) -> Harness {
        let tmp = tempfile::tempdir().unwrap();

        // A plausible mp4: ftyp magic, big enough to pass validation.
        let media_path = tmp.path().join("movie.mp4");
        let mut media = vec![0u8; 4096];
        media[4..8].copy_from_slice(b"ftyp");
        std::fs::write(&media_path, &media).unwrap();

        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("../migrations").run(&pool).await.unwrap();

        let data_dir = tmp.path().join("data");
        let config = TranscodingConfig {
            data_dir: data_dir.clone(),
            max_concurrent_sessions: max_sessions,
            progress_poll_secs: 1,
            stall_threshold_secs,
            ..Default::default()
        };
        let registry = Arc::new(ProviderRegistry::new());
        let manager = SessionManager::new(
            config,
            RetentionConfig::default(),
            Arc::clone(&registry),
            SessionRepository::new(pool.clone()),
            ContentRepository::new(pool),
            OutputDirectoryManager::new(data_dir.clone()),
            ContentStore::new(data_dir),
            Arc::new(ProcessRegistry::new(Duration::from_secs(1))),
            Arc::new(Metrics::new().unwrap()),
        );

        Harness {
            manager,
            registry,
            _tmp: tmp,
            media_path,
        }
    }

    fn dash_request(input: &Path) -> TranscodeRequest {
        TranscodeRequest {
            input_path: input.to_path_buf(),
            seek_offset_seconds: 0.0,
            output_container: OutputContainer::Dash,
            video_codec: "h264".into(),
            audio_codec: "aac".into(),
            quality: 70,
            speed_priority: SpeedPriority::Balanced,
            target_resolution: None,
            enable_abr: true,
            prefer_hardware: false,
            hardware_type: None,
            provider_overrides: Vec::new(),
        }
    }

    fn options(h: &Harness) -> StartOptions {
        StartOptions {
            media_id: Some("m1".into()),
            request: dash_request(&h.media_path),
            provider_override: None,
        }
    }

    #[tokio::test]
    async fn test_start_runs_session() {
        let h = harness(4).await;
        h.registry
            .add(Arc::new(ScriptedProvider::new("ffmpeg", 50)))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let session = h.manager.start(options(&h), &cancel).await.unwrap();

        assert_eq!(session.status, SessionStatus::Running);
        assert_eq!(session.provider_id, "ffmpeg");
        assert!(h.manager.has_live(session.id));
        assert!(Path::new(&session.directory_path).exists());
    }

    #[tokio::test]
    async fn test_admission_cap() {
        let h = harness(1).await;
        h.registry
            .add(Arc::new(ScriptedProvider::new("ffmpeg", 50)))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        h.manager.start(options(&h), &cancel).await.unwrap();

        let err = h.manager.start(options(&h), &cancel).await.unwrap_err();
        assert!(matches!(err, Error::Overloaded { limit: 1 }));
    }

    #[tokio::test]
    async fn test_validation_rejects_missing_media() {
        let h = harness(4).await;
        h.registry
            .add(Arc::new(ScriptedProvider::new("ffmpeg", 50)))
            .await
            .unwrap();

        let mut opts = options(&h);
        opts.request.input_path = PathBuf::from("/no/such/file.mp4");

        let cancel = CancellationToken::new();
        let err = h.manager.start(opts, &cancel).await.unwrap_err();
        assert_eq!(err.code(), "media_validation");
    }

    #[tokio::test]
    async fn test_no_provider_available() {
        let h = harness(4).await;
        let cancel = CancellationToken::new();
        let err = h.manager.start(options(&h), &cancel).await.unwrap_err();
        assert!(matches!(err, Error::ProviderUnavailable(_)));
    }

    #[tokio::test]
    async fn test_fallback_recovers_codec_error() {
        let h = harness(4).await;
        h.registry
            .add(Arc::new(
                ScriptedProvider::new("flaky", 50).failing(1, "unsupported codec hevc"),
            ))
            .await
            .unwrap();

        let mut opts = options(&h);
        opts.request.video_codec = "hevc".into();

        let cancel = CancellationToken::new();
        let session = h.manager.start(opts, &cancel).await.unwrap();
        assert_eq!(session.status, SessionStatus::Running);

        // The effective request was persisted with the fallback codec.
        let stored: TranscodeRequest = serde_json::from_str(&session.request_json).unwrap();
        assert_eq!(stored.video_codec, "h264");
    }

    #[tokio::test]
    async fn test_second_provider_used_when_first_exhausts() {
        let h = harness(4).await;
        h.registry
            .add(Arc::new(
                ScriptedProvider::new("p-hi", 100).failing(usize::MAX, "unsupported codec"),
            ))
            .await
            .unwrap();
        h.registry
            .add(Arc::new(ScriptedProvider::new("p-lo", 50)))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let session = h.manager.start(options(&h), &cancel).await.unwrap();
        assert_eq!(session.provider_id, "p-lo");
    }

    #[tokio::test]
    async fn test_stop_cancels_session() {
        let h = harness(4).await;
        h.registry
            .add(Arc::new(ScriptedProvider::new("ffmpeg", 50)))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let session = h.manager.start(options(&h), &cancel).await.unwrap();

        h.manager.stop(session.id).await.unwrap();

        let row = h.manager.get(session.id).await.unwrap();
        assert_eq!(row.status, SessionStatus::Cancelled);
        assert!(!h.manager.has_live(session.id));

        // Idempotent.
        h.manager.stop(session.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_unknown_session() {
        let h = harness(4).await;
        let err = h.manager.stop(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, Error::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_seek_ahead_spawns_new_session() {
        let h = harness(4).await;
        h.registry
            .add(Arc::new(ScriptedProvider::new("ffmpeg", 50)))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let original = h.manager.start(options(&h), &cancel).await.unwrap();

        let seeked = h
            .manager
            .seek_ahead(original.id, 300.0, &cancel)
            .await
            .unwrap();

        assert_ne!(seeked.id, original.id);
        assert_eq!(seeked.provider_id, original.provider_id);
        let request: TranscodeRequest = serde_json::from_str(&seeked.request_json).unwrap();
        assert!((request.seek_offset_seconds - 300.0).abs() < f64::EPSILON);

        // The original session keeps running.
        assert!(h.manager.has_live(original.id));
    }

    #[tokio::test]
    async fn test_stop_all() {
        let h = harness(4).await;
        h.registry
            .add(Arc::new(ScriptedProvider::new("ffmpeg", 50)))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        h.manager.start(options(&h), &cancel).await.unwrap();
        h.manager.start(options(&h), &cancel).await.unwrap();

        let report = h.manager.stop_all().await;
        assert_eq!(report.total_sessions, 2);
        assert_eq!(report.stopped_count, 2);
        assert!(report.errors.is_empty());
        assert_eq!(h.manager.live_count(), 0);
    }

    #[tokio::test]
    async fn test_events_published() {
        let h = harness(4).await;
        h.registry
            .add(Arc::new(ScriptedProvider::new("ffmpeg", 50)))
            .await
            .unwrap();

        let mut events = h.manager.subscribe();
        let cancel = CancellationToken::new();
        let session = h.manager.start(options(&h), &cancel).await.unwrap();

        let first = events.recv().await.unwrap();
        assert!(matches!(first, SessionEvent::Queued { session_id, .. } if session_id == session.id));
        let second = events.recv().await.unwrap();
        assert!(matches!(second, SessionEvent::Started { session_id, .. } if session_id == session.id));
    }

    #[tokio::test]
    async fn test_watchdog_reaps_stalled_session() {
        // Zero stall threshold: any idle gap at all counts as a stall.
        let h = harness_with(4, 0).await;
        h.registry
            .add(Arc::new(ScriptedProvider::new("ffmpeg", 50)))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let session = h.manager.start(options(&h), &cancel).await.unwrap();

        let reaped = h.manager.reap_stalled().await;
        assert_eq!(reaped, 1);

        let row = h.manager.get(session.id).await.unwrap();
        assert_eq!(row.status, SessionStatus::Failed);
        assert_eq!(row.error_code.as_deref(), Some("session_stalled"));
    }
}
