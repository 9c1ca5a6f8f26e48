//! Media prober
//!
//! Produces a [`MediaDescriptor`] by spawning `ffprobe` and parsing its JSON
//! output. Bounded wall-clock, no caching: callers that probe the same file
//! repeatedly are expected to hold on to the descriptor themselves.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::models::MediaDescriptor;

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Media file not found: {0}")]
    NotFound(String),

    #[error("Media file unreadable: {0}")]
    Unreadable(String),

    #[error("Media file corrupt: {0}")]
    Corrupt(String),

    #[error("Media format unsupported: {0}")]
    Unsupported(String),

    #[error("Probe timed out after {0:?}")]
    Timeout(Duration),
}

/// ffprobe wrapper with a bounded wall-clock.
#[derive(Debug, Clone)]
pub struct MediaProber {
    ffprobe_path: PathBuf,
    timeout: Duration,
}

impl Default for MediaProber {
    fn default() -> Self {
        Self {
            ffprobe_path: PathBuf::from("ffprobe"),
            timeout: Duration::from_secs(15),
        }
    }
}

impl MediaProber {
    #[must_use]
    pub const fn new(ffprobe_path: PathBuf, timeout: Duration) -> Self {
        Self {
            ffprobe_path,
            timeout,
        }
    }

    /// Probe a media file and normalize the result.
    pub async fn probe(&self, path: &Path) -> Result<MediaDescriptor, ProbeError> {
        let metadata = tokio::fs::metadata(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ProbeError::NotFound(path.display().to_string())
            } else {
                ProbeError::Unreadable(format!("{}: {e}", path.display()))
            }
        })?;
        if !metadata.is_file() {
            return Err(ProbeError::Unreadable(format!(
                "{}: not a regular file",
                path.display()
            )));
        }

        let output = tokio::time::timeout(
            self.timeout,
            Command::new(&self.ffprobe_path)
                .args(["-v", "quiet"])
                .args(["-print_format", "json"])
                .args(["-show_format", "-show_streams"])
                .arg(path)
                .stdin(Stdio::null())
                .output(),
        )
        .await
        .map_err(|_| ProbeError::Timeout(self.timeout))?
        .map_err(|e| ProbeError::Unreadable(format!("spawn ffprobe: {e}")))?;

        if !output.status.success() {
            return Err(ProbeError::Corrupt(format!(
                "ffprobe exited with {}",
                output.status
            )));
        }

        let parsed: FfprobeOutput = serde_json::from_slice(&output.stdout)
            .map_err(|e| ProbeError::Corrupt(format!("ffprobe output: {e}")))?;

        let descriptor = parsed.into_descriptor()?;
        debug!(
            container = %descriptor.container,
            video = %descriptor.video_codec,
            audio = %descriptor.audio_codec,
            "probed media file"
        );
        Ok(descriptor)
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    #[serde(default)]
    format_name: String,
    duration: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    bit_rate: Option<String>,
    color_transfer: Option<String>,
    bits_per_raw_sample: Option<String>,
}

impl FfprobeOutput {
    fn into_descriptor(self) -> Result<MediaDescriptor, ProbeError> {
        if self.streams.is_empty() {
            return Err(ProbeError::Unsupported("no streams found".to_string()));
        }

        let format = self
            .format
            .ok_or_else(|| ProbeError::Corrupt("missing format section".to_string()))?;

        // ffprobe reports container aliases comma-separated; the first one is
        // the canonical name ("mov,mp4,m4a,3gp,3g2,mj2" -> "mov").
        let container = format
            .format_name
            .split(',')
            .next()
            .unwrap_or_default()
            .to_string();

        let video = self
            .streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("video"));
        let audio = self
            .streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("audio"));
        let has_subtitles = self
            .streams
            .iter()
            .any(|s| s.codec_type.as_deref() == Some("subtitle"));

        let video_bitrate_kbps = video
            .and_then(|s| s.bit_rate.as_deref())
            .or(format.bit_rate.as_deref())
            .and_then(|b| b.parse::<u64>().ok())
            .map_or(0, |bps| bps / 1000);

        let has_hdr = video.is_some_and(|s| {
            let transfer_hdr = matches!(
                s.color_transfer.as_deref(),
                Some("smpte2084") | Some("arib-std-b67")
            );
            let deep_sample = s
                .bits_per_raw_sample
                .as_deref()
                .and_then(|b| b.parse::<u32>().ok())
                .is_some_and(|bits| bits > 8);
            transfer_hdr || deep_sample
        });

        Ok(MediaDescriptor {
            container,
            video_codec: video
                .and_then(|s| s.codec_name.clone())
                .unwrap_or_default(),
            audio_codec: audio
                .and_then(|s| s.codec_name.clone())
                .unwrap_or_default(),
            width: video.and_then(|s| s.width).unwrap_or(0),
            height: video.and_then(|s| s.height).unwrap_or(0),
            video_bitrate_kbps,
            duration_seconds: format
                .duration
                .as_deref()
                .and_then(|d| d.parse::<f64>().ok())
                .unwrap_or(0.0),
            has_hdr,
            has_subtitles,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ffprobe_output() {
        let json = r#"{
            "format": {
                "format_name": "mov,mp4,m4a,3gp,3g2,mj2",
                "duration": "734.100000",
                "bit_rate": "4800000"
            },
            "streams": [
                {
                    "codec_type": "video",
                    "codec_name": "h264",
                    "width": 1920,
                    "height": 1080,
                    "bit_rate": "4500000",
                    "color_transfer": "bt709"
                },
                {
                    "codec_type": "audio",
                    "codec_name": "aac",
                    "bit_rate": "192000"
                },
                {
                    "codec_type": "subtitle",
                    "codec_name": "mov_text"
                }
            ]
        }"#;

        let parsed: FfprobeOutput = serde_json::from_str(json).unwrap();
        let desc = parsed.into_descriptor().unwrap();

        assert_eq!(desc.container, "mov");
        assert_eq!(desc.video_codec, "h264");
        assert_eq!(desc.audio_codec, "aac");
        assert_eq!((desc.width, desc.height), (1920, 1080));
        assert_eq!(desc.video_bitrate_kbps, 4500);
        assert!((desc.duration_seconds - 734.1).abs() < 0.01);
        assert!(!desc.has_hdr);
        assert!(desc.has_subtitles);
    }

    #[test]
    fn test_hdr_detection_from_transfer() {
        let json = r#"{
            "format": { "format_name": "matroska,webm", "duration": "10" },
            "streams": [
                { "codec_type": "video", "codec_name": "hevc",
                  "width": 3840, "height": 2160, "color_transfer": "smpte2084" }
            ]
        }"#;

        let parsed: FfprobeOutput = serde_json::from_str(json).unwrap();
        let desc = parsed.into_descriptor().unwrap();
        assert!(desc.has_hdr);
        assert_eq!(desc.container, "matroska");
    }

    #[test]
    fn test_no_streams_is_unsupported() {
        let json = r#"{ "format": { "format_name": "mp3" }, "streams": [] }"#;
        let parsed: FfprobeOutput = serde_json::from_str(json).unwrap();
        assert!(matches!(
            parsed.into_descriptor(),
            Err(ProbeError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn test_probe_missing_file() {
        let prober = MediaProber::default();
        let err = prober
            .probe(Path::new("/nonexistent/path/movie.mkv"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::NotFound(_)));
    }
}
