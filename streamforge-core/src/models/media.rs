use serde::{Deserialize, Serialize};

/// Immutable probe result for a media file.
///
/// Produced by the media prober, consumed by the decision engine. Fields are
/// normalized: codec names are lowercase ffprobe identifiers, bitrate is in
/// kbps so it compares directly against device limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaDescriptor {
    pub container: String,
    pub video_codec: String,
    pub audio_codec: String,
    pub width: u32,
    pub height: u32,
    pub video_bitrate_kbps: u64,
    pub duration_seconds: f64,
    pub has_hdr: bool,
    pub has_subtitles: bool,
}

impl MediaDescriptor {
    /// True when the probe found nothing the decision engine can work with.
    #[must_use]
    pub fn is_playable(&self) -> bool {
        !self.video_codec.is_empty() || !self.audio_codec.is_empty()
    }
}
