//! Worker process monitoring and emergency maintenance endpoints.

use axum::{extract::State, Json};
use serde_json::json;

use streamforge_core::models::ProcessEntry;

use super::{AppResult, AppState};

/// GET /playback/monitor/ffmpeg-processes
pub async fn worker_processes(State(state): State<AppState>) -> Json<serde_json::Value> {
    let processes: Vec<ProcessEntry> = state.processes.list();
    Json(json!({
        "count": processes.len(),
        "processes": processes,
    }))
}

/// POST /playback/monitor/kill-zombies
///
/// Reap registry entries whose PID is gone and escalate-kill workers whose
/// session is terminal or missing.
pub async fn kill_zombies(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    let (reaped, killed) = state.cleanup.reap_zombies().await?;
    Ok(Json(json!({
        "reaped": reaped,
        "killed": killed,
    })))
}

/// POST /playback/monitor/emergency-cleanup
///
/// Stop every live session, then run a full cleanup pass. The blunt
/// instrument for a wedged box.
pub async fn emergency_cleanup(
    State(state): State<AppState>,
) -> AppResult<Json<serde_json::Value>> {
    let stop_report = state.manager.stop_all().await;
    let cleanup_report = state.cleanup.run_once().await?;

    Ok(Json(json!({
        "sessions": stop_report,
        "cleanup": cleanup_report,
    })))
}
