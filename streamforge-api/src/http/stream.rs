//! Adaptive streaming server
//!
//! Serves manifests and segments from live, still-growing session
//! directories, and from the immutable content store. Segments are streamed
//! through a bounded buffer; a 404 on a segment the encoder has not yet
//! produced is expected behavior the client retries.

use axum::{
    body::Body,
    extract::{Path as AxumPath, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use super::{AppError, AppResult, AppState};

/// Chunk size for streamed reads. Bounded regardless of file size.
const READ_BUF_SIZE: usize = 64 * 1024;

const DASH_MANIFEST: &str = "manifest.mpd";
const HLS_PLAYLIST: &str = "playlist.m3u8";

/// GET /playback/stream/{sid}/{file}
///
/// Dispatches between manifest serving (with rewrite) and segment serving.
pub async fn stream_file(
    State(state): State<AppState>,
    AxumPath((sid, file)): AxumPath<(Uuid, String)>,
    headers: HeaderMap,
) -> AppResult<Response> {
    match file.as_str() {
        DASH_MANIFEST | HLS_PLAYLIST => serve_manifest(&state, sid, &file, &headers).await,
        _ => serve_session_segment(&state, sid, &file, &headers).await,
    }
}

/// GET /playback/stream/{sid}/segment/{file} — explicit segment alias.
pub async fn stream_segment(
    State(state): State<AppState>,
    AxumPath((sid, file)): AxumPath<(Uuid, String)>,
    headers: HeaderMap,
) -> AppResult<Response> {
    serve_session_segment(&state, sid, &file, &headers).await
}

/// GET /sessions/{sid}/{file}
///
/// Fallback surface: redirects to the permanent content address once the
/// session has finalized, serves from the session directory before that.
pub async fn session_file(
    State(state): State<AppState>,
    AxumPath((sid, file)): AxumPath<(Uuid, String)>,
    headers: HeaderMap,
) -> AppResult<Response> {
    let session = state.manager.get(sid).await?;
    if let Some(hash) = &session.content_hash {
        sanitize_file_name(&file)?;
        let target = format!("{}/content/{hash}/{file}", state.prefix());
        return Ok(Redirect::temporary(&target).into_response());
    }
    serve_session_segment(&state, sid, &file, &headers).await
}

async fn serve_manifest(
    state: &AppState,
    sid: Uuid,
    file: &str,
    headers: &HeaderMap,
) -> AppResult<Response> {
    let session = state.manager.get(sid).await?;
    let path = PathBuf::from(&session.directory_path).join(file);

    let content = match tokio::fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            // The encoder has not produced the manifest yet.
            return Err(AppError::not_found("manifest not yet available"));
        }
        Err(e) => return Err(AppError::internal(format!("manifest read: {e}"))),
    };

    let (content, content_type) = if file == DASH_MANIFEST {
        let base = stream_base_url(state, sid, headers);
        (
            inject_base_url(&content, &base),
            "application/dash+xml",
        )
    } else {
        (content, "application/vnd.apple.mpegurl")
    };

    state.metrics.bytes_served.inc_by(content.len() as u64);

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, content.len())
        .header(header::CACHE_CONTROL, "no-cache, no-store, must-revalidate")
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .body(Body::from(content))
        .map_err(|e| AppError::internal(e.to_string()))?;
    Ok(response)
}

/// Absolute URL prefix for this session's stream, derived from forwarding
/// headers so relative segment references resolve from any client origin.
fn stream_base_url(state: &AppState, sid: Uuid, headers: &HeaderMap) -> String {
    let scheme = header_str(headers, "x-forwarded-proto").unwrap_or("http");

    let host = header_str(headers, "x-forwarded-host")
        .or_else(|| header_str(headers, &header::HOST))
        .map(str::to_string)
        .or_else(|| {
            // Last resort: the origin the player page came from.
            header_str(headers, &header::ORIGIN)
                .or_else(|| header_str(headers, &header::REFERER))
                .and_then(|o| {
                    o.strip_prefix("https://")
                        .or_else(|| o.strip_prefix("http://"))
                        .map(|rest| rest.split('/').next().unwrap_or(rest).to_string())
                })
        })
        .unwrap_or_else(|| "localhost".to_string());

    format!(
        "{scheme}://{host}{}/playback/stream/{sid}/",
        state.prefix()
    )
}

fn header_str<'a>(headers: &'a HeaderMap, name: impl header::AsHeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Insert a `<BaseURL>` element right after the MPD opening tag so every
/// relative segment reference resolves against this server.
fn inject_base_url(manifest: &str, base_url: &str) -> String {
    if manifest.contains("<BaseURL>") {
        return manifest.to_string();
    }
    let Some(mpd_start) = manifest.find("<MPD") else {
        return manifest.to_string();
    };
    let Some(tag_end) = manifest[mpd_start..].find('>') else {
        return manifest.to_string();
    };
    let insert_at = mpd_start + tag_end + 1;
    format!(
        "{}\n  <BaseURL>{}</BaseURL>{}",
        &manifest[..insert_at],
        base_url,
        &manifest[insert_at..]
    )
}

async fn serve_session_segment(
    state: &AppState,
    sid: Uuid,
    file: &str,
    headers: &HeaderMap,
) -> AppResult<Response> {
    sanitize_file_name(file)?;
    let session = state.manager.get(sid).await?;
    let path = PathBuf::from(&session.directory_path).join(file);

    let cache = if is_media_segment(file) {
        CachePolicy::Immutable {
            etag: segment_etag(&path).await,
        }
    } else {
        CachePolicy::NoCache
    };

    serve_file_ranged(state, &path, headers, cache).await
}

/// Reject traversal and nested paths in client-supplied file names.
fn sanitize_file_name(file: &str) -> AppResult<()> {
    if file.is_empty() || file.contains('/') || file.contains('\\') || file.contains("..") {
        return Err(AppError::bad_request("invalid file name"));
    }
    Ok(())
}

fn is_media_segment(file: &str) -> bool {
    Path::new(file)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            matches!(
                ext.to_ascii_lowercase().as_str(),
                "m4s" | "ts" | "mp4" | "m4a" | "m4v" | "webm"
            )
        })
}

/// Weak validator from size + mtime; segments are write-once so this is
/// stable for the file's lifetime.
async fn segment_etag(path: &Path) -> Option<String> {
    let metadata = tokio::fs::metadata(path).await.ok()?;
    let mtime = metadata
        .modified()
        .ok()?
        .duration_since(std::time::UNIX_EPOCH)
        .ok()?;
    Some(format!("\"{:x}-{:x}\"", metadata.len(), mtime.as_secs()))
}

pub(crate) enum CachePolicy {
    Immutable { etag: Option<String> },
    NoCache,
}

impl CachePolicy {
    fn cache_control(&self) -> &'static str {
        match self {
            Self::Immutable { .. } => "public, max-age=31536000, immutable",
            Self::NoCache => "no-cache, no-store, must-revalidate",
        }
    }

    fn etag(&self) -> Option<&str> {
        match self {
            Self::Immutable { etag } => etag.as_deref(),
            Self::NoCache => None,
        }
    }
}

/// Outcome of parsing a Range header against a known file size.
#[derive(Debug, PartialEq, Eq)]
enum RangeOutcome {
    /// No (usable) range: serve the whole entity.
    Full,
    /// Single satisfiable range, inclusive bounds.
    Partial(u64, u64),
    Unsatisfiable,
}

/// RFC 7233 single-range parsing, including suffix (`-N`) and open-ended
/// (`N-`) forms. Multi-range and malformed headers fall back to the full
/// entity, per the RFC's "may ignore" allowance.
fn parse_range(header: &str, file_size: u64) -> RangeOutcome {
    let Some(spec) = header.strip_prefix("bytes=") else {
        return RangeOutcome::Full;
    };
    if spec.contains(',') {
        return RangeOutcome::Full;
    }
    let Some((start_str, end_str)) = spec.split_once('-') else {
        return RangeOutcome::Full;
    };

    match (start_str.is_empty(), end_str.is_empty()) {
        // "-N": the final N bytes.
        (true, false) => {
            let Ok(suffix) = end_str.parse::<u64>() else {
                return RangeOutcome::Full;
            };
            if suffix == 0 || file_size == 0 {
                return RangeOutcome::Unsatisfiable;
            }
            let len = suffix.min(file_size);
            RangeOutcome::Partial(file_size - len, file_size - 1)
        }
        // "N-": from N to the end.
        (false, true) => {
            let Ok(start) = start_str.parse::<u64>() else {
                return RangeOutcome::Full;
            };
            if start >= file_size {
                return RangeOutcome::Unsatisfiable;
            }
            RangeOutcome::Partial(start, file_size - 1)
        }
        // "N-M": inclusive, clamped to the entity.
        (false, false) => {
            let (Ok(start), Ok(end)) = (start_str.parse::<u64>(), end_str.parse::<u64>()) else {
                return RangeOutcome::Full;
            };
            if start > end || start >= file_size {
                return RangeOutcome::Unsatisfiable;
            }
            RangeOutcome::Partial(start, end.min(file_size - 1))
        }
        (true, true) => RangeOutcome::Full,
    }
}

fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("mpd") => "application/dash+xml",
        Some("m3u8") => "application/vnd.apple.mpegurl",
        Some("m4s") => "video/iso.segment",
        Some("ts") => "video/mp2t",
        Some("mp4" | "m4v") => "video/mp4",
        Some("m4a") => "audio/mp4",
        Some("webm") => "video/webm",
        Some("vtt") => "text/vtt",
        Some("aac") => "audio/aac",
        _ => "application/octet-stream",
    }
}

/// Serve a file honouring a single byte range, streaming through a bounded
/// buffer. Files may still be growing: the length observed at open time is
/// the entity size for this response.
pub(crate) async fn serve_file_ranged(
    state: &AppState,
    path: &Path,
    headers: &HeaderMap,
    cache: CachePolicy,
) -> AppResult<Response> {
    let mut file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            // Expected for segments the encoder has not produced yet.
            return Err(AppError::not_found("file not yet available"));
        }
        Err(e) => return Err(AppError::internal(format!("open: {e}"))),
    };
    let file_size = file
        .metadata()
        .await
        .map_err(|e| AppError::internal(format!("stat: {e}")))?
        .len();

    let range = header_str(headers, header::RANGE)
        .map_or(RangeOutcome::Full, |h| parse_range(h, file_size));

    let mut builder = Response::builder()
        .header(header::CONTENT_TYPE, content_type_for(path))
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CACHE_CONTROL, cache.cache_control())
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*");
    if let Some(etag) = cache.etag() {
        builder = builder.header(header::ETAG, etag);
    }

    let (status, start, len) = match range {
        RangeOutcome::Unsatisfiable => {
            let response = builder
                .status(StatusCode::RANGE_NOT_SATISFIABLE)
                .header(header::CONTENT_RANGE, format!("bytes */{file_size}"))
                .body(Body::empty())
                .map_err(|e| AppError::internal(e.to_string()))?;
            return Ok(response);
        }
        RangeOutcome::Full => (StatusCode::OK, 0, file_size),
        RangeOutcome::Partial(start, end) => {
            builder = builder.header(
                header::CONTENT_RANGE,
                format!("bytes {start}-{end}/{file_size}"),
            );
            (StatusCode::PARTIAL_CONTENT, start, end - start + 1)
        }
    };

    if start > 0 {
        file.seek(std::io::SeekFrom::Start(start))
            .await
            .map_err(|e| AppError::internal(format!("seek: {e}")))?;
    }

    state.metrics.bytes_served.inc_by(len);

    let reader = file.take(len);
    let stream = ReaderStream::with_capacity(reader, READ_BUF_SIZE);

    let response = builder
        .status(status)
        .header(header::CONTENT_LENGTH, len)
        .body(Body::from_stream(stream))
        .map_err(|e| AppError::internal(e.to_string()))?;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range_forms() {
        assert_eq!(parse_range("bytes=0-1023", 2048), RangeOutcome::Partial(0, 1023));
        assert_eq!(parse_range("bytes=1024-", 2048), RangeOutcome::Partial(1024, 2047));
        assert_eq!(parse_range("bytes=-512", 2048), RangeOutcome::Partial(1536, 2047));
        // End clamped to the entity.
        assert_eq!(parse_range("bytes=0-99999", 2048), RangeOutcome::Partial(0, 2047));
        // Suffix longer than the file: the whole file.
        assert_eq!(parse_range("bytes=-99999", 100), RangeOutcome::Partial(0, 99));
    }

    #[test]
    fn test_parse_range_unsatisfiable() {
        assert_eq!(parse_range("bytes=2048-", 2048), RangeOutcome::Unsatisfiable);
        assert_eq!(parse_range("bytes=5000-6000", 2048), RangeOutcome::Unsatisfiable);
        assert_eq!(parse_range("bytes=-0", 2048), RangeOutcome::Unsatisfiable);
        assert_eq!(parse_range("bytes=10-5", 2048), RangeOutcome::Unsatisfiable);
        assert_eq!(parse_range("bytes=0-", 0), RangeOutcome::Unsatisfiable);
    }

    #[test]
    fn test_parse_range_ignored_forms() {
        // Multi-range and malformed specs fall back to the full entity.
        assert_eq!(parse_range("bytes=0-1,5-9", 2048), RangeOutcome::Full);
        assert_eq!(parse_range("items=0-1", 2048), RangeOutcome::Full);
        assert_eq!(parse_range("bytes=abc-def", 2048), RangeOutcome::Full);
        assert_eq!(parse_range("bytes=-", 2048), RangeOutcome::Full);
    }

    #[test]
    fn test_range_tiling_covers_file() {
        // Ranges that tile [0, L-1] reconstruct the full length.
        let size = 1000u64;
        let tiles = [(0u64, 249u64), (250, 499), (500, 749), (750, 999)];
        let mut covered = 0;
        for (start, end) in tiles {
            let RangeOutcome::Partial(s, e) = parse_range(&format!("bytes={start}-{end}"), size)
            else {
                panic!("expected partial");
            };
            covered += e - s + 1;
        }
        assert_eq!(covered, size);
    }

    #[test]
    fn test_inject_base_url() {
        let manifest = r#"<?xml version="1.0"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="dynamic">
  <Period></Period>
</MPD>"#;

        let rewritten = inject_base_url(manifest, "http://example.com/api/playback/stream/x/");
        assert!(rewritten.contains("<BaseURL>http://example.com/api/playback/stream/x/</BaseURL>"));

        // The BaseURL lands after the MPD opening tag, before Period.
        let base_pos = rewritten.find("<BaseURL>").unwrap();
        let period_pos = rewritten.find("<Period>").unwrap();
        let mpd_pos = rewritten.find("<MPD").unwrap();
        assert!(mpd_pos < base_pos && base_pos < period_pos);

        // Idempotent: an existing BaseURL is left alone.
        let again = inject_base_url(&rewritten, "http://other.example/");
        assert_eq!(again, rewritten);
    }

    #[test]
    fn test_inject_base_url_non_mpd_untouched() {
        let playlist = "#EXTM3U\n#EXT-X-VERSION:7\n";
        assert_eq!(inject_base_url(playlist, "http://x/"), playlist);
    }

    #[test]
    fn test_sanitize_file_name() {
        assert!(sanitize_file_name("chunk-0-00001.m4s").is_ok());
        assert!(sanitize_file_name("../secrets").is_err());
        assert!(sanitize_file_name("a/b.m4s").is_err());
        assert!(sanitize_file_name("").is_err());
    }

    #[test]
    fn test_media_segment_classification() {
        assert!(is_media_segment("chunk-1.m4s"));
        assert!(is_media_segment("seg_00001.ts"));
        assert!(is_media_segment("init.mp4"));
        assert!(!is_media_segment("playlist.m3u8"));
        assert!(!is_media_segment("manifest.mpd"));
        assert!(!is_media_segment("stderr.log"));
    }

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for(Path::new("manifest.mpd")), "application/dash+xml");
        assert_eq!(
            content_type_for(Path::new("playlist.m3u8")),
            "application/vnd.apple.mpegurl"
        );
        assert_eq!(content_type_for(Path::new("chunk.m4s")), "video/iso.segment");
        assert_eq!(content_type_for(Path::new("seg.ts")), "video/mp2t");
        assert_eq!(content_type_for(Path::new("x.unknown")), "application/octet-stream");
    }
}
