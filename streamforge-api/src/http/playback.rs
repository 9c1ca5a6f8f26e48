//! Playback endpoints: decide, session lifecycle, health and stats.

use axum::{
    extract::{Path, State},
    Json,
};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use streamforge_core::decision;
use streamforge_core::models::{
    DeviceProfile, OutputContainer, PlayIntent, SpeedPriority, TranscodeRequest,
    TranscodeSession,
};
use streamforge_core::session::{StartOptions, StopAllReport};
use streamforge_core::validation;

use super::{AppError, AppResult, AppState};

#[derive(Debug, Deserialize)]
pub struct DecideRequest {
    pub media_path: String,
    pub device_profile: DeviceProfile,
}

/// POST /playback/decide
pub async fn decide(
    State(state): State<AppState>,
    Json(body): Json<DecideRequest>,
) -> AppResult<Json<PlayIntent>> {
    let path = PathBuf::from(&body.media_path);
    validation::validate_media_file(&path).await?;

    let media = state
        .prober
        .probe(&path)
        .await
        .map_err(streamforge_core::Error::from)?;

    let direct_url = direct_play_url(&body.media_path);
    let intent = decision::decide(&media, &body.device_profile, &path, &direct_url)?;
    Ok(Json(intent))
}

/// Direct-play URL on the library file server, which owns original bytes.
fn direct_play_url(media_path: &str) -> String {
    format!(
        "/library/files/{}",
        utf8_percent_encode(media_path, NON_ALPHANUMERIC)
    )
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StartRequest {
    pub media_file_id: Option<String>,
    pub media_path: Option<String>,
    pub container: Option<String>,
    pub seek_position: Option<f64>,
    pub enable_abr: Option<bool>,
    pub device_profile: Option<DeviceProfile>,
    /// Full request form: used verbatim, the fields above are ignored.
    pub request: Option<TranscodeRequest>,
}

#[derive(Debug, Serialize)]
pub struct StartSessionResponse {
    pub id: Uuid,
    pub status: String,
    pub manifest_url: String,
    pub provider: String,
}

/// POST /playback/start
pub async fn start(
    State(state): State<AppState>,
    Json(body): Json<StartRequest>,
) -> AppResult<Json<StartSessionResponse>> {
    let (request, media_id) = resolve_request(&state, body).await?;

    let session = state
        .manager
        .start(
            StartOptions {
                media_id,
                request,
                provider_override: None,
            },
            &CancellationToken::new(),
        )
        .await?;

    Ok(Json(session_response(&state, &session)?))
}

/// Build the normalized request from either form of the start body.
async fn resolve_request(
    state: &AppState,
    body: StartRequest,
) -> AppResult<(TranscodeRequest, Option<String>)> {
    if let Some(mut request) = body.request {
        if request.quality == 0 {
            request.quality = state.config.transcoding.default_quality;
        }
        return Ok((request, body.media_file_id));
    }

    let (path, media_id) = match (&body.media_path, &body.media_file_id) {
        (Some(path), _) => (PathBuf::from(path), body.media_file_id.clone()),
        (None, Some(id)) => (
            state.config.transcoding.media_root.join(id),
            Some(id.clone()),
        ),
        (None, None) => {
            return Err(AppError::bad_request(
                "one of media_path, media_file_id or request is required",
            ))
        }
    };

    validation::validate_media_file(&path).await?;
    let media = state
        .prober
        .probe(&path)
        .await
        .map_err(streamforge_core::Error::from)?;
    let device_known = body.device_profile.is_some();
    let device = body.device_profile.unwrap_or_default();

    // The caller asked for a session, so plan a transcode even when the
    // media would direct-play.
    let mut request = decision::plan_transcode(&media, &device, &path)?;

    // With no device profile the speed heuristics had nothing to go on;
    // fall back to the configured preset.
    if !device_known {
        if let Some(preset) = SpeedPriority::parse(&state.config.transcoding.default_preset) {
            request.speed_priority = preset;
        }
    }

    if let Some(container) = &body.container {
        request.output_container = OutputContainer::parse(container)
            .ok_or_else(|| AppError::bad_request(format!("unknown container {container:?}")))?;
        if !request.output_container.is_adaptive() {
            request.enable_abr = false;
        }
    }
    if let Some(seek) = body.seek_position {
        if !seek.is_finite() || seek < 0.0 {
            return Err(AppError::bad_request("seek_position must be >= 0"));
        }
        request.seek_offset_seconds = seek;
    }
    if let Some(enable_abr) = body.enable_abr {
        request.enable_abr = enable_abr && request.output_container.is_adaptive();
    }

    Ok((request, media_id))
}

fn session_response(
    state: &AppState,
    session: &TranscodeSession,
) -> AppResult<StartSessionResponse> {
    let request: TranscodeRequest = serde_json::from_str(&session.request_json)?;
    let file = request
        .output_container
        .manifest_file_name()
        .or_else(|| request.output_container.progressive_file_name())
        .unwrap_or("stream.out");

    Ok(StartSessionResponse {
        id: session.id,
        status: session.status.as_str().to_string(),
        manifest_url: format!("{}/playback/stream/{}/{file}", state.prefix(), session.id),
        provider: session.provider_id.clone(),
    })
}

#[derive(Debug, Deserialize)]
pub struct SeekAheadRequest {
    pub session_id: Uuid,
    pub seek_position: f64,
}

/// POST /playback/seek-ahead
pub async fn seek_ahead(
    State(state): State<AppState>,
    Json(body): Json<SeekAheadRequest>,
) -> AppResult<Json<StartSessionResponse>> {
    if !body.seek_position.is_finite() || body.seek_position < 0.0 {
        return Err(AppError::bad_request("seek_position must be >= 0"));
    }

    let session = state
        .manager
        .seek_ahead(body.session_id, body.seek_position, &CancellationToken::new())
        .await?;

    Ok(Json(session_response(&state, &session)?))
}

/// GET /playback/session/{id}
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<TranscodeSession>> {
    Ok(Json(state.manager.get(id).await?))
}

/// DELETE /playback/session/{id}
pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    state.manager.stop(id).await?;
    Ok(Json(json!({ "stopped": true, "id": id })))
}

#[derive(Debug, Serialize)]
pub struct SessionsResponse {
    pub sessions: Vec<TranscodeSession>,
}

/// GET /playback/sessions
pub async fn list_sessions(
    State(state): State<AppState>,
) -> AppResult<Json<SessionsResponse>> {
    Ok(Json(SessionsResponse {
        sessions: state.manager.list().await?,
    }))
}

/// POST /playback/sessions/stop-all
pub async fn stop_all(State(state): State<AppState>) -> AppResult<Json<StopAllReport>> {
    Ok(Json(state.manager.stop_all().await))
}

/// GET /playback/health
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let providers = state.registry.list().await;
    let names: Vec<&str> = providers.iter().map(|p| p.id.as_str()).collect();
    let ready = !providers.is_empty();

    Json(json!({
        "status": if ready { "healthy" } else { "degraded" },
        "providers": {
            "count": providers.len(),
            "names": names,
        },
        "ready": ready,
        "message": if ready {
            "transcoding available"
        } else {
            "no transcoding providers registered"
        },
    }))
}

/// GET /playback/stats
pub async fn stats(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    let sessions = state.manager.list().await?;
    let mut by_status = std::collections::BTreeMap::<&str, usize>::new();
    for session in &sessions {
        *by_status.entry(session.status.as_str()).or_default() += 1;
    }

    let content_stats = state.content_repo.stats().await?;

    Ok(Json(json!({
        "sessions": {
            "total": sessions.len(),
            "live": state.manager.live_count(),
            "by_status": by_status,
        },
        "content": content_stats,
        "engine": state.metrics.snapshot(),
    })))
}

/// POST /playback/plugins/refresh
pub async fn refresh_providers(
    State(state): State<AppState>,
) -> AppResult<Json<serde_json::Value>> {
    let endpoints = state.config.transcoding.provider_endpoints.clone();
    let count = state.registry.refresh_from_endpoints(&endpoints).await;
    Ok(Json(json!({
        "providers": count,
        "endpoints": endpoints.len(),
    })))
}
