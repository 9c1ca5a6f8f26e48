// Module: http
// JSON REST API plus the adaptive streaming server.

pub mod content;
pub mod error;
pub mod monitor;
pub mod playback;
pub mod stream;

use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use streamforge_core::cleanup::CleanupEngine;
use streamforge_core::metrics::Metrics;
use streamforge_core::probe::MediaProber;
use streamforge_core::process::ProcessRegistry;
use streamforge_core::provider::ProviderRegistry;
use streamforge_core::repository::ContentRepository;
use streamforge_core::session::SessionManager;
use streamforge_core::store::ContentStore;
use streamforge_core::Config;

pub use error::{AppError, AppResult};

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub manager: Arc<SessionManager>,
    pub registry: Arc<ProviderRegistry>,
    pub prober: Arc<MediaProber>,
    pub content_repo: ContentRepository,
    pub content_store: ContentStore,
    pub processes: Arc<ProcessRegistry>,
    pub cleanup: Arc<CleanupEngine>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// The configured path prefix, e.g. "/api".
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.config.server.api_prefix
    }
}

/// Build the full router under the configured prefix.
pub fn create_router(state: AppState) -> Router {
    let prefix = state.config.server.api_prefix.clone();

    let routes = Router::new()
        // Playback decisions and session lifecycle
        .route("/playback/decide", post(playback::decide))
        .route("/playback/start", post(playback::start))
        .route("/playback/seek-ahead", post(playback::seek_ahead))
        .route("/playback/session/{id}", get(playback::get_session))
        .route("/playback/session/{id}", delete(playback::delete_session))
        .route("/playback/sessions", get(playback::list_sessions))
        .route("/playback/sessions/stop-all", post(playback::stop_all))
        .route("/playback/health", get(playback::health))
        .route("/playback/stats", get(playback::stats))
        .route("/playback/plugins/refresh", post(playback::refresh_providers))
        // Live session streaming
        .route("/playback/stream/{sid}/{file}", get(stream::stream_file))
        .route(
            "/playback/stream/{sid}/segment/{file}",
            get(stream::stream_segment),
        )
        // Session fallback surface (redirects once finalized)
        .route("/sessions/{sid}/{file}", get(stream::session_file))
        // Content-addressed store
        .route("/content/stats", get(content::stats))
        .route("/content/cleanup", post(content::cleanup))
        .route("/content/by-media/{media_id}", get(content::by_media))
        .route("/content/{hash}/info", get(content::info))
        .route("/content/{hash}/{file}", get(content::file))
        // Worker process monitoring
        .route(
            "/playback/monitor/ffmpeg-processes",
            get(monitor::worker_processes),
        )
        .route("/playback/monitor/kill-zombies", post(monitor::kill_zombies))
        .route(
            "/playback/monitor/emergency-cleanup",
            post(monitor::emergency_cleanup),
        );

    let routes = if prefix.is_empty() {
        routes
    } else {
        Router::new().nest(&prefix, routes)
    };

    // Streaming clients fetch manifests cross-origin; CORS stays permissive
    // unless origins are pinned in config.
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_headers(Any)
        .allow_origin(Any);

    routes
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
