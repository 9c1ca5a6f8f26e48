use serde::{Deserialize, Serialize};

use super::TranscodeRequest;

/// Static capability metadata advertised by a transcoding provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub id: String,
    pub display_name: String,
    /// Higher is preferred during selection.
    pub priority: i32,
    pub containers: Vec<String>,
    pub video_codecs: Vec<String>,
    pub audio_codecs: Vec<String>,
    pub hardware: bool,
    pub max_concurrent: u32,
}

impl ProviderInfo {
    /// Whether the advertised capabilities cover the request. Used for
    /// registry-side filtering; providers may still reject via
    /// `can_transcode` (e.g. load-based).
    #[must_use]
    pub fn covers(&self, req: &TranscodeRequest) -> bool {
        let container_ok = self
            .containers
            .iter()
            .any(|c| c.eq_ignore_ascii_case(req.output_container.as_str()));
        let video_ok = self
            .video_codecs
            .iter()
            .any(|c| c.eq_ignore_ascii_case(&req.video_codec));
        let audio_ok = self
            .audio_codecs
            .iter()
            .any(|c| c.eq_ignore_ascii_case(&req.audio_codec));
        container_ok && video_ok && audio_ok
    }
}

impl From<streamforge_proto::transcoder::ProviderInfo> for ProviderInfo {
    fn from(p: streamforge_proto::transcoder::ProviderInfo) -> Self {
        Self {
            id: p.id,
            display_name: p.display_name,
            priority: p.priority,
            containers: p.containers,
            video_codecs: p.video_codecs,
            audio_codecs: p.audio_codecs,
            hardware: p.hardware,
            max_concurrent: p.max_concurrent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OutputContainer, SpeedPriority};
    use std::path::PathBuf;

    fn request(container: OutputContainer, video: &str) -> TranscodeRequest {
        TranscodeRequest {
            input_path: PathBuf::from("/media/in.mkv"),
            seek_offset_seconds: 0.0,
            output_container: container,
            video_codec: video.into(),
            audio_codec: "aac".into(),
            quality: 70,
            speed_priority: SpeedPriority::Balanced,
            target_resolution: None,
            enable_abr: false,
            prefer_hardware: false,
            hardware_type: None,
            provider_overrides: Vec::new(),
        }
    }

    #[test]
    fn test_covers_checks_all_axes() {
        let info = ProviderInfo {
            id: "ffmpeg".into(),
            display_name: "FFmpeg".into(),
            priority: 50,
            containers: vec!["dash".into(), "hls".into(), "mp4".into()],
            video_codecs: vec!["h264".into(), "hevc".into()],
            audio_codecs: vec!["aac".into(), "opus".into()],
            hardware: false,
            max_concurrent: 4,
        };

        assert!(info.covers(&request(OutputContainer::Dash, "h264")));
        assert!(!info.covers(&request(OutputContainer::Webm, "h264")));
        assert!(!info.covers(&request(OutputContainer::Dash, "av1")));
    }
}
