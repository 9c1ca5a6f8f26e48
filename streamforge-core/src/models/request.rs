use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Output container for a transcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputContainer {
    Mp4,
    Dash,
    Hls,
    Webm,
}

impl OutputContainer {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Dash => "dash",
            Self::Hls => "hls",
            Self::Webm => "webm",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "mp4" => Some(Self::Mp4),
            "dash" | "mpd" => Some(Self::Dash),
            "hls" | "m3u8" => Some(Self::Hls),
            "webm" => Some(Self::Webm),
            _ => None,
        }
    }

    /// True for segment-based adaptive containers.
    #[must_use]
    pub const fn is_adaptive(self) -> bool {
        matches!(self, Self::Dash | Self::Hls)
    }

    /// Manifest file name inside a session directory, for adaptive output.
    #[must_use]
    pub const fn manifest_file_name(self) -> Option<&'static str> {
        match self {
            Self::Dash => Some("manifest.mpd"),
            Self::Hls => Some("playlist.m3u8"),
            Self::Mp4 | Self::Webm => None,
        }
    }

    /// File name of the progressive output, for single-file containers.
    #[must_use]
    pub const fn progressive_file_name(self) -> Option<&'static str> {
        match self {
            Self::Mp4 => Some("stream.mp4"),
            Self::Webm => Some("stream.webm"),
            Self::Dash | Self::Hls => None,
        }
    }
}

impl std::fmt::Display for OutputContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encoder speed/quality trade-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedPriority {
    Fastest,
    Balanced,
    Quality,
}

impl SpeedPriority {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fastest => "fastest",
            Self::Balanced => "balanced",
            Self::Quality => "quality",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "fastest" => Some(Self::Fastest),
            "balanced" => Some(Self::Balanced),
            "quality" => Some(Self::Quality),
            _ => None,
        }
    }
}

/// Normalized request handed to a transcoding provider.
///
/// This is the replayable unit: it is serialized onto the session row and
/// re-parsed for seek-ahead, so every field must round-trip through JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscodeRequest {
    pub input_path: PathBuf,
    #[serde(default)]
    pub seek_offset_seconds: f64,
    pub output_container: OutputContainer,
    pub video_codec: String,
    pub audio_codec: String,
    /// 0..=100, mapped by providers onto their encoder's quality scale.
    pub quality: u8,
    pub speed_priority: SpeedPriority,
    /// (width, height). None keeps the source resolution.
    #[serde(default)]
    pub target_resolution: Option<(u32, u32)>,
    #[serde(default)]
    pub enable_abr: bool,
    #[serde(default)]
    pub prefer_hardware: bool,
    #[serde(default)]
    pub hardware_type: Option<String>,
    /// Opaque provider-specific options, passed through unmodified.
    #[serde(default)]
    pub provider_overrides: Vec<u8>,
}

impl TranscodeRequest {
    /// Wire form for the worker RPC.
    #[must_use]
    pub fn to_proto(
        &self,
        session_id: uuid::Uuid,
        output_dir: &std::path::Path,
    ) -> streamforge_proto::transcoder::StartStreamRequest {
        let (width, height) = self.target_resolution.unwrap_or((0, 0));
        streamforge_proto::transcoder::StartStreamRequest {
            session_id: session_id.to_string(),
            input_path: self.input_path.to_string_lossy().into_owned(),
            seek_offset_seconds: self.seek_offset_seconds,
            output_container: self.output_container.as_str().to_string(),
            video_codec: self.video_codec.clone(),
            audio_codec: self.audio_codec.clone(),
            quality: u32::from(self.quality),
            speed_priority: self.speed_priority.as_str().to_string(),
            target_width: width,
            target_height: height,
            enable_abr: self.enable_abr,
            prefer_hardware: self.prefer_hardware,
            hardware_type: self.hardware_type.clone().unwrap_or_default(),
            output_dir: output_dir.to_string_lossy().into_owned(),
            provider_overrides: self.provider_overrides.clone().into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_parse_aliases() {
        assert_eq!(OutputContainer::parse("DASH"), Some(OutputContainer::Dash));
        assert_eq!(OutputContainer::parse("mpd"), Some(OutputContainer::Dash));
        assert_eq!(OutputContainer::parse("m3u8"), Some(OutputContainer::Hls));
        assert_eq!(OutputContainer::parse("mkv"), None);
    }

    #[test]
    fn test_manifest_names() {
        assert_eq!(
            OutputContainer::Dash.manifest_file_name(),
            Some("manifest.mpd")
        );
        assert_eq!(
            OutputContainer::Hls.manifest_file_name(),
            Some("playlist.m3u8")
        );
        assert_eq!(OutputContainer::Mp4.manifest_file_name(), None);
        assert_eq!(
            OutputContainer::Mp4.progressive_file_name(),
            Some("stream.mp4")
        );
    }

    #[test]
    fn test_request_json_round_trip() {
        let req = TranscodeRequest {
            input_path: PathBuf::from("/media/movie.mkv"),
            seek_offset_seconds: 42.5,
            output_container: OutputContainer::Dash,
            video_codec: "h264".into(),
            audio_codec: "aac".into(),
            quality: 70,
            speed_priority: SpeedPriority::Balanced,
            target_resolution: Some((1280, 720)),
            enable_abr: true,
            prefer_hardware: false,
            hardware_type: None,
            provider_overrides: Vec::new(),
        };

        let json = serde_json::to_string(&req).unwrap();
        let back: TranscodeRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(req, back);
    }
}
