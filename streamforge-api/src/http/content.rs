//! Content-addressed store endpoints.

use axum::{
    extract::{Path as AxumPath, State},
    http::HeaderMap,
    response::Response,
    Json,
};
use serde_json::json;

use streamforge_core::models::{ContentEntry, ContentStats};

use super::stream::{serve_file_ranged, CachePolicy};
use super::{AppError, AppResult, AppState};

/// GET /content/{hash}/info
pub async fn info(
    State(state): State<AppState>,
    AxumPath(hash): AxumPath<String>,
) -> AppResult<Json<ContentEntry>> {
    let entry = state
        .content_repo
        .get(&hash)
        .await?
        .ok_or_else(|| AppError::not_found(format!("content {hash} not found")))?;
    Ok(Json(entry))
}

/// GET /content/{hash}/{file}
///
/// Immutable by construction: the hash addresses the bytes, so the response
/// carries an aggressive cache policy with the hash itself as the ETag.
pub async fn file(
    State(state): State<AppState>,
    AxumPath((hash, file)): AxumPath<(String, String)>,
    headers: HeaderMap,
) -> AppResult<Response> {
    let entry = state
        .content_repo
        .get(&hash)
        .await?
        .ok_or_else(|| AppError::not_found(format!("content {hash} not found")))?;

    let path = state.content_store.resolve_file(&entry.content_hash, &file)?;
    state.content_repo.touch(&hash).await?;

    serve_file_ranged(
        &state,
        &path,
        &headers,
        CachePolicy::Immutable {
            etag: Some(format!("\"{hash}\"")),
        },
    )
    .await
}

/// GET /content/by-media/{media_id}
pub async fn by_media(
    State(state): State<AppState>,
    AxumPath(media_id): AxumPath<String>,
) -> AppResult<Json<Vec<ContentEntry>>> {
    Ok(Json(state.content_repo.by_media(&media_id).await?))
}

/// GET /content/stats
pub async fn stats(State(state): State<AppState>) -> AppResult<Json<ContentStats>> {
    Ok(Json(state.content_repo.stats().await?))
}

/// POST /content/cleanup — run one retention pass now.
pub async fn cleanup(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    let report = state.cleanup.run_once().await?;
    Ok(Json(json!({ "report": report })))
}
