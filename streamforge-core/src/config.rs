use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub transcoding: TranscodingConfig,
    pub retention: RetentionConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Path prefix for every HTTP route (e.g. "/api").
    pub api_prefix: String,
    /// CORS allowed origins. Empty means "*", which streaming clients need
    /// for cross-origin manifest fetches.
    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            api_prefix: "/api".to_string(),
            cors_allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// sqlx SQLite URL, e.g. "sqlite://streamforge.db".
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://streamforge.db".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodingConfig {
    /// Root directory for per-session output directories and the content store.
    pub data_dir: PathBuf,
    /// Root directory media file ids are resolved against.
    pub media_root: PathBuf,
    /// Global admission cap on concurrent live sessions.
    pub max_concurrent_sessions: usize,
    /// Transcoder worker endpoints, as tonic URIs (e.g. "http://127.0.0.1:50061").
    pub provider_endpoints: Vec<String>,
    pub ffprobe_path: PathBuf,
    pub probe_timeout_secs: u64,
    /// Run a comprehensive probe during admission instead of only the quick
    /// filesystem and magic-number checks.
    pub full_validation: bool,
    /// Interval between progress polls per running session.
    pub progress_poll_secs: u64,
    /// Sessions with no activity for this long are failed by the watchdog.
    pub stall_threshold_secs: u64,
    pub operation_timeout_secs: u64,
    pub shutdown_timeout_secs: u64,
    pub force_kill_timeout_secs: u64,
    pub breaker_failure_threshold: u32,
    pub breaker_open_timeout_secs: u64,
    /// Decision defaults applied when a request does not pin them.
    pub default_quality: u8,
    pub default_preset: String,
}

impl Default for TranscodingConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./transcoding-data"),
            media_root: PathBuf::from("./media"),
            max_concurrent_sessions: 8,
            provider_endpoints: Vec::new(),
            ffprobe_path: PathBuf::from("ffprobe"),
            probe_timeout_secs: 15,
            full_validation: false,
            progress_poll_secs: 2,
            stall_threshold_secs: 300,
            operation_timeout_secs: 30,
            shutdown_timeout_secs: 60,
            force_kill_timeout_secs: 10,
            breaker_failure_threshold: 3,
            breaker_open_timeout_secs: 30,
            default_quality: 70,
            default_preset: "balanced".to_string(),
        }
    }
}

impl TranscodingConfig {
    #[must_use]
    pub const fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    #[must_use]
    pub const fn force_kill_timeout(&self) -> Duration {
        Duration::from_secs(self.force_kill_timeout_secs)
    }

    #[must_use]
    pub const fn stall_threshold(&self) -> Duration {
        Duration::from_secs(self.stall_threshold_secs)
    }

    #[must_use]
    pub const fn progress_poll_interval(&self) -> Duration {
        Duration::from_secs(self.progress_poll_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Interval between cleanup passes.
    pub cleanup_interval_secs: u64,
    /// Session output directories older than this with no live session are removed.
    pub retention_hours: u64,
    /// TTL for finalized content entries.
    pub extended_hours: u64,
    /// Content store size ceiling. Eviction targets 0.9 x this value.
    pub max_disk_usage_gb: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            cleanup_interval_secs: 300,
            retention_hours: 24,
            extended_hours: 72,
            max_disk_usage_gb: 50,
        }
    }
}

impl RetentionConfig {
    #[must_use]
    pub const fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    #[must_use]
    pub const fn max_disk_usage_bytes(&self) -> u64 {
        self.max_disk_usage_gb * 1024 * 1024 * 1024
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// "json" or "pretty".
    pub format: String,
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from an optional TOML file, then layer
    /// STREAMFORGE_-prefixed environment variables, then the legacy flat
    /// environment variables recognized for deployment compatibility.
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            builder = builder.add_source(File::from(Path::new(path)));
        } else if Path::new("streamforge.toml").exists() {
            builder = builder.add_source(File::from(Path::new("streamforge.toml")));
        }

        builder = builder.add_source(
            Environment::with_prefix("STREAMFORGE")
                .separator("__")
                .try_parsing(true),
        );

        let mut config: Self = builder.build()?.try_deserialize()?;
        config.apply_legacy_env();
        Ok(config)
    }

    /// Load from environment variables only (for containers).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Apply the flat environment variables this subsystem has historically
    /// been configured with. These win over file and prefixed-env values.
    pub fn apply_legacy_env(&mut self) {
        if let Some(v) = env_parse::<usize>("MAX_CONCURRENT_SESSIONS") {
            self.transcoding.max_concurrent_sessions = v;
        }
        if let Some(v) = env_parse::<u64>("SESSION_TIMEOUT_MINUTES") {
            self.transcoding.stall_threshold_secs = v * 60;
        }
        if let Some(v) = env_parse::<u64>("CLEANUP_INTERVAL_MINUTES") {
            self.retention.cleanup_interval_secs = v * 60;
        }
        if let Some(v) = env_parse::<u64>("RETENTION_HOURS") {
            self.retention.retention_hours = v;
        }
        if let Some(v) = env_parse::<u64>("EXTENDED_HOURS") {
            self.retention.extended_hours = v;
        }
        if let Some(v) = env_parse::<u64>("MAX_DISK_USAGE_GB") {
            self.retention.max_disk_usage_gb = v;
        }
        if let Some(v) = env_parse::<u64>("OPERATION_TIMEOUT") {
            self.transcoding.operation_timeout_secs = v;
        }
        if let Some(v) = env_parse::<u64>("SHUTDOWN_TIMEOUT") {
            self.transcoding.shutdown_timeout_secs = v;
        }
        if let Some(v) = env_parse::<u64>("FORCE_KILL_TIMEOUT") {
            self.transcoding.force_kill_timeout_secs = v;
        }
        if let Ok(v) = std::env::var("TRANSCODING_DATA_DIR") {
            if !v.is_empty() {
                self.transcoding.data_dir = PathBuf::from(v);
            }
        }
        if let Some(v) = env_parse::<u8>("DEFAULT_QUALITY") {
            self.transcoding.default_quality = v.min(100);
        }
        if let Ok(v) = std::env::var("DEFAULT_PRESET") {
            if !v.is_empty() {
                self.transcoding.default_preset = v;
            }
        }
    }

    /// Validate configuration, collecting every problem instead of stopping
    /// at the first.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.transcoding.max_concurrent_sessions == 0 {
            errors.push("transcoding.max_concurrent_sessions must be at least 1".to_string());
        }
        if self.transcoding.progress_poll_secs == 0 {
            errors.push("transcoding.progress_poll_secs must be at least 1".to_string());
        }
        if self.transcoding.default_quality > 100 {
            errors.push("transcoding.default_quality must be within 0..=100".to_string());
        }
        if self.retention.max_disk_usage_gb == 0 {
            errors.push("retention.max_disk_usage_gb must be at least 1".to_string());
        }
        if self.retention.cleanup_interval_secs == 0 {
            errors.push("retention.cleanup_interval_secs must be at least 1".to_string());
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be \"json\" or \"pretty\", got {:?}",
                self.logging.format
            ));
        }
        if !self.server.api_prefix.is_empty() && !self.server.api_prefix.starts_with('/') {
            errors.push("server.api_prefix must start with '/'".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
