//! Server bootstrap: storage, engine components, HTTP, graceful shutdown.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use streamforge_api::{create_router, AppState};
use streamforge_core::cleanup::CleanupEngine;
use streamforge_core::metrics::Metrics;
use streamforge_core::probe::MediaProber;
use streamforge_core::process::ProcessRegistry;
use streamforge_core::provider::ProviderRegistry;
use streamforge_core::repository::{ContentRepository, SessionRepository};
use streamforge_core::session::SessionManager;
use streamforge_core::store::{ContentStore, OutputDirectoryManager};
use streamforge_core::Config;

pub async fn run(config: Config) -> Result<()> {
    let config = Arc::new(config);

    let pool = init_database(&config).await?;
    run_migrations(&pool).await?;

    let dirs = OutputDirectoryManager::new(config.transcoding.data_dir.clone());
    dirs.ensure_root()
        .await
        .context("failed to create transcoding data directory")?;

    let metrics = Arc::new(Metrics::new().context("failed to register metrics")?);
    let registry = Arc::new(ProviderRegistry::new());
    let processes = Arc::new(ProcessRegistry::new(
        config.transcoding.force_kill_timeout(),
    ));
    let sessions = SessionRepository::new(pool.clone());
    let content_repo = ContentRepository::new(pool.clone());
    let content_store = ContentStore::new(config.transcoding.data_dir.clone());
    let prober = Arc::new(MediaProber::new(
        config.transcoding.ffprobe_path.clone(),
        Duration::from_secs(config.transcoding.probe_timeout_secs),
    ));

    let manager = SessionManager::new(
        config.transcoding.clone(),
        config.retention.clone(),
        Arc::clone(&registry),
        sessions,
        content_repo.clone(),
        dirs.clone(),
        content_store.clone(),
        Arc::clone(&processes),
        Arc::clone(&metrics),
    );

    let cleanup = CleanupEngine::new(
        config.retention.clone(),
        Arc::clone(&manager),
        content_repo.clone(),
        content_store.clone(),
        dirs.clone(),
        Arc::clone(&processes),
    );

    // Initial provider discovery; a fleet that is still booting just leaves
    // the registry empty until the next refresh.
    let discovered = registry
        .refresh_from_endpoints(&config.transcoding.provider_endpoints)
        .await;
    if discovered == 0 {
        warn!("no transcoding providers discovered at startup");
    } else {
        info!(providers = discovered, "provider discovery complete");
    }

    // One recovery pass before serving: rows left running by a crashed
    // incarnation become failed, their processes get reaped.
    match cleanup.run_once().await {
        Ok(report) => info!(?report, "startup recovery pass finished"),
        Err(e) => warn!(error = %e, "startup recovery pass failed"),
    }

    let shutdown = CancellationToken::new();
    Arc::clone(&cleanup).spawn(shutdown.clone());
    manager.spawn_watchdog(shutdown.clone());

    let state = AppState {
        config: Arc::clone(&config),
        manager: Arc::clone(&manager),
        registry,
        prober,
        content_repo,
        content_store,
        processes,
        cleanup,
        metrics,
    };
    let router = create_router(state);

    let address = config.http_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;
    info!(address = %address, "http server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .context("http server error")?;

    // Stop background tasks, then the sessions they supervise.
    shutdown.cancel();
    info!("stopping live sessions");
    let report = tokio::time::timeout(
        config.transcoding.shutdown_timeout(),
        manager.stop_all(),
    )
    .await;
    match report {
        Ok(report) if report.errors.is_empty() => {
            info!(stopped = report.stopped_count, "shutdown complete");
        }
        Ok(report) => {
            for e in &report.errors {
                error!(error = %e, "session failed to stop during shutdown");
            }
        }
        Err(_) => error!("session shutdown timed out"),
    }

    Ok(())
}

async fn init_database(config: &Config) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&config.database.url)
        .with_context(|| format!("invalid database url {:?}", config.database.url))?
        .create_if_missing(true);

    SqlitePoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect_with(options)
        .await
        .context("failed to open database")
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    info!("running database migrations");
    sqlx::migrate!("../migrations")
        .run(pool)
        .await
        .context("migration failed")?;
    Ok(())
}

/// Resolve on ctrl-c or SIGTERM, cancelling the shared token either way.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install ctrl-c handler");
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => error!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    tokio::select! {
        () = ctrl_c => info!("received ctrl-c"),
        () = terminate => info!("received SIGTERM"),
    }
    token.cancel();
}
