//! Engine metrics
//!
//! Prometheus counters and gauges for session and store activity. The HTTP
//! layer serves a JSON projection through the stats endpoint; there is no
//! separate scrape surface in this subsystem.

use prometheus::{IntCounter, IntGauge, Opts, Registry};
use serde_json::json;

pub struct Metrics {
    registry: Registry,
    pub sessions_started: IntCounter,
    pub sessions_completed: IntCounter,
    pub sessions_failed: IntCounter,
    pub sessions_cancelled: IntCounter,
    pub fallback_activations: IntCounter,
    pub breaker_rejections: IntCounter,
    pub bytes_served: IntCounter,
    pub live_sessions: IntGauge,
    pub content_store_bytes: IntGauge,
}

impl Metrics {
    /// Create and register every metric. Registration of hard-coded names
    /// against a fresh registry cannot collide.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let sessions_started = IntCounter::with_opts(Opts::new(
            "streamforge_sessions_started_total",
            "Transcode sessions admitted and started",
        ))?;
        let sessions_completed = IntCounter::with_opts(Opts::new(
            "streamforge_sessions_completed_total",
            "Transcode sessions that finalized successfully",
        ))?;
        let sessions_failed = IntCounter::with_opts(Opts::new(
            "streamforge_sessions_failed_total",
            "Transcode sessions that ended in failure",
        ))?;
        let sessions_cancelled = IntCounter::with_opts(Opts::new(
            "streamforge_sessions_cancelled_total",
            "Transcode sessions stopped by request",
        ))?;
        let fallback_activations = IntCounter::with_opts(Opts::new(
            "streamforge_fallback_activations_total",
            "Fallback strategies applied to failing starts",
        ))?;
        let breaker_rejections = IntCounter::with_opts(Opts::new(
            "streamforge_breaker_rejections_total",
            "Requests short-circuited by an open provider breaker",
        ))?;
        let bytes_served = IntCounter::with_opts(Opts::new(
            "streamforge_bytes_served_total",
            "Bytes of manifests and segments served",
        ))?;
        let live_sessions = IntGauge::with_opts(Opts::new(
            "streamforge_live_sessions",
            "Currently live transcode sessions",
        ))?;
        let content_store_bytes = IntGauge::with_opts(Opts::new(
            "streamforge_content_store_bytes",
            "Total size of the content-addressed store",
        ))?;

        registry.register(Box::new(sessions_started.clone()))?;
        registry.register(Box::new(sessions_completed.clone()))?;
        registry.register(Box::new(sessions_failed.clone()))?;
        registry.register(Box::new(sessions_cancelled.clone()))?;
        registry.register(Box::new(fallback_activations.clone()))?;
        registry.register(Box::new(breaker_rejections.clone()))?;
        registry.register(Box::new(bytes_served.clone()))?;
        registry.register(Box::new(live_sessions.clone()))?;
        registry.register(Box::new(content_store_bytes.clone()))?;

        Ok(Self {
            registry,
            sessions_started,
            sessions_completed,
            sessions_failed,
            sessions_cancelled,
            fallback_activations,
            breaker_rejections,
            bytes_served,
            live_sessions,
            content_store_bytes,
        })
    }

    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    /// JSON projection for the stats endpoint.
    #[must_use]
    pub fn snapshot(&self) -> serde_json::Value {
        json!({
            "sessions_started": self.sessions_started.get(),
            "sessions_completed": self.sessions_completed.get(),
            "sessions_failed": self.sessions_failed.get(),
            "sessions_cancelled": self.sessions_cancelled.get(),
            "fallback_activations": self.fallback_activations.get(),
            "breaker_rejections": self.breaker_rejections.get(),
            "bytes_served": self.bytes_served.get(),
            "live_sessions": self.live_sessions.get(),
            "content_store_bytes": self.content_store_bytes.get(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_snapshot() {
        let metrics = Metrics::new().unwrap();
        metrics.sessions_started.inc();
        metrics.sessions_started.inc();
        metrics.live_sessions.set(2);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot["sessions_started"], 2);
        assert_eq!(snapshot["live_sessions"], 2);
        assert_eq!(snapshot["sessions_failed"], 0);
    }
}
