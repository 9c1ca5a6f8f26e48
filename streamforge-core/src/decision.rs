//! Playback decision engine
//!
//! Pure function from (media descriptor, device profile) to a play intent.
//! No filesystem, no network, no clocks: identical inputs always produce the
//! identical intent, which the round-trip tests rely on.

use crate::models::{
    DeviceClass, DeviceProfile, MediaDescriptor, OutputContainer, PlayIntent, SpeedPriority,
    TranscodeRequest,
};
use crate::{Error, Result};
use std::path::Path;

/// Bitrate ladder keyed by target height, in kbps.
const BITRATE_LADDER: &[(u32, u64)] = &[
    (240, 400),
    (360, 800),
    (480, 1500),
    (720, 3000),
    (1080, 6000),
    (1440, 10_000),
    (2160, 16_000),
];

/// Decide how a media file should reach a device.
///
/// `direct_url` is the URL the caller serves the original bytes from; it is
/// only embedded in the intent, never dereferenced here.
pub fn decide(
    media: &MediaDescriptor,
    device: &DeviceProfile,
    source_path: &Path,
    direct_url: &str,
) -> Result<PlayIntent> {
    if !media.is_playable() {
        return Err(Error::MediaValidation(format!(
            "media has no decodable streams: {}",
            source_path.display()
        )));
    }

    if let Some(reason) = direct_play_blocker(media, device) {
        let request = build_transcode_request(media, device, source_path)?;
        Ok(PlayIntent::Transcode { request, reason })
    } else {
        Ok(PlayIntent::DirectPlay {
            url: direct_url.to_string(),
        })
    }
}

/// Returns None when every direct-play predicate holds, otherwise the first
/// reason the source cannot be played as-is.
fn direct_play_blocker(media: &MediaDescriptor, device: &DeviceProfile) -> Option<String> {
    let class = device.device_class();

    let container_supported = class
        .native_containers()
        .iter()
        .any(|c| c.eq_ignore_ascii_case(&media.container))
        || device
            .supported_containers
            .iter()
            .any(|c| c.eq_ignore_ascii_case(&media.container));
    if !container_supported {
        return Some(format!("container {} not supported by device", media.container));
    }

    if !device.supports_codec(&media.video_codec) {
        return Some(format!("video codec {} not supported", media.video_codec));
    }
    if !device.supports_codec(&media.audio_codec) {
        return Some(format!("audio codec {} not supported", media.audio_codec));
    }

    if device.max_bitrate_kbps > 0 && media.video_bitrate_kbps > device.max_bitrate_kbps {
        return Some(format!(
            "bitrate {} kbps exceeds device limit {} kbps",
            media.video_bitrate_kbps, device.max_bitrate_kbps
        ));
    }

    if device.max_resolution_height > 0 && media.height > device.max_resolution_height {
        return Some(format!(
            "resolution {}p exceeds device limit {}p",
            media.height, device.max_resolution_height
        ));
    }

    if media.has_hdr && !device.supports_hdr {
        return Some("source is HDR but device does not support HDR".to_string());
    }

    None
}

/// Build the normalized transcode request the decision rules produce for
/// this media/device pair, independent of whether direct play would have
/// been possible. Start endpoints use this when the caller forces a
/// transcode (e.g. pins a container) on direct-playable media.
pub fn plan_transcode(
    media: &MediaDescriptor,
    device: &DeviceProfile,
    source_path: &Path,
) -> Result<TranscodeRequest> {
    if !media.is_playable() {
        return Err(Error::MediaValidation(format!(
            "media has no decodable streams: {}",
            source_path.display()
        )));
    }
    build_transcode_request(media, device, source_path)
}

fn build_transcode_request(
    media: &MediaDescriptor,
    device: &DeviceProfile,
    source_path: &Path,
) -> Result<TranscodeRequest> {
    let class = device.device_class();

    let video_codec = select_video_codec(device, class);
    let output_container = select_container(class);
    let audio_codec = match output_container {
        OutputContainer::Webm => "opus",
        _ => "aac",
    }
    .to_string();

    let target_height = select_target_height(media, device);
    let bitrate_kbps = select_bitrate(target_height, device.max_bitrate_kbps);
    let quality = quality_for_bitrate(bitrate_kbps);

    let enable_abr = output_container.is_adaptive()
        && (class.is_browser()
            || device.max_bitrate_kbps >= 2000
            || media.duration_seconds > 600.0
            || media.video_bitrate_kbps > 5000);

    let speed_priority = select_speed_priority(device, class);

    let target_resolution = if target_height > 0 && target_height < media.height {
        Some((scaled_width(media, target_height), target_height))
    } else {
        None
    };

    Ok(TranscodeRequest {
        input_path: source_path.to_path_buf(),
        seek_offset_seconds: 0.0,
        output_container,
        video_codec,
        audio_codec,
        quality,
        speed_priority,
        target_resolution,
        enable_abr,
        prefer_hardware: false,
        hardware_type: None,
        provider_overrides: Vec::new(),
    })
}

/// Target codec preference order, gated on declared device capability.
fn select_video_codec(device: &DeviceProfile, class: DeviceClass) -> String {
    if device.supports_codec("h264") {
        return "h264".to_string();
    }
    if device.supports_hevc && device.supports_codec("hevc") {
        return "hevc".to_string();
    }
    if device.supports_av1 && device.supports_codec("av1") {
        return "av1".to_string();
    }
    if class.is_browser() && device.supports_codec("vp9") {
        return "vp9".to_string();
    }
    if class.is_browser() && device.supports_codec("vp8") {
        return "vp8".to_string();
    }
    // Universal fallback: every mainstream decoder handles h264.
    "h264".to_string()
}

const fn select_container(class: DeviceClass) -> OutputContainer {
    match class {
        DeviceClass::IosSafari => OutputContainer::Hls,
        _ => OutputContainer::Dash,
    }
}

fn select_target_height(media: &MediaDescriptor, device: &DeviceProfile) -> u32 {
    if device.max_resolution_height > 0 {
        media.height.min(device.max_resolution_height)
    } else {
        media.height
    }
}

fn select_bitrate(target_height: u32, max_bitrate_kbps: u64) -> u64 {
    let ladder_bitrate = BITRATE_LADDER
        .iter()
        .find(|(height, _)| target_height <= *height)
        .map_or(BITRATE_LADDER[BITRATE_LADDER.len() - 1].1, |(_, kbps)| *kbps);

    if max_bitrate_kbps > 0 {
        ladder_bitrate.min(max_bitrate_kbps)
    } else {
        ladder_bitrate
    }
}

/// Map a bitrate band onto the provider-facing 0..=100 quality scale.
const fn quality_for_bitrate(bitrate_kbps: u64) -> u8 {
    match bitrate_kbps {
        0..=500 => 30,
        501..=1000 => 40,
        1001..=2000 => 50,
        2001..=4000 => 65,
        4001..=8000 => 75,
        8001..=12_000 => 85,
        _ => 95,
    }
}

fn select_speed_priority(device: &DeviceProfile, class: DeviceClass) -> SpeedPriority {
    if class.is_mobile() {
        SpeedPriority::Fastest
    } else if class == DeviceClass::DesktopBrowser {
        SpeedPriority::Balanced
    } else if device.max_bitrate_kbps >= 10_000 {
        SpeedPriority::Quality
    } else {
        SpeedPriority::Balanced
    }
}

/// Keep the source aspect ratio, rounded to an even width for the encoder.
fn scaled_width(media: &MediaDescriptor, target_height: u32) -> u32 {
    if media.height == 0 || media.width == 0 {
        return 0;
    }
    let width = u64::from(media.width) * u64::from(target_height) / u64::from(media.height);
    #[allow(clippy::cast_possible_truncation)]
    let width = width as u32;
    width & !1
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const CHROME_DESKTOP: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0 Safari/537.36";
    const IPHONE: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 Version/17.0 Mobile/15E148 Safari/604.1";

    fn h264_720p() -> MediaDescriptor {
        MediaDescriptor {
            container: "mp4".into(),
            video_codec: "h264".into(),
            audio_codec: "aac".into(),
            width: 1280,
            height: 720,
            video_bitrate_kbps: 2500,
            duration_seconds: 1200.0,
            has_hdr: false,
            has_subtitles: false,
        }
    }

    fn hevc_4k_hdr() -> MediaDescriptor {
        MediaDescriptor {
            container: "matroska".into(),
            video_codec: "hevc".into(),
            audio_codec: "eac3".into(),
            width: 3840,
            height: 2160,
            video_bitrate_kbps: 24_000,
            duration_seconds: 7200.0,
            has_hdr: true,
            has_subtitles: true,
        }
    }

    fn desktop_chrome() -> DeviceProfile {
        DeviceProfile {
            user_agent: CHROME_DESKTOP.into(),
            supported_codecs: vec!["h264".into(), "vp9".into(), "aac".into(), "opus".into()],
            supported_containers: Vec::new(),
            max_resolution_height: 1080,
            max_bitrate_kbps: 8000,
            supports_hevc: false,
            supports_av1: false,
            supports_hdr: false,
            client_ip: None,
        }
    }

    fn path() -> PathBuf {
        PathBuf::from("/media/title.mkv")
    }

    #[test]
    fn test_direct_play_when_everything_matches() {
        let intent = decide(&h264_720p(), &desktop_chrome(), &path(), "/library/file/1").unwrap();
        assert_eq!(
            intent,
            PlayIntent::DirectPlay {
                url: "/library/file/1".into()
            }
        );
    }

    #[test]
    fn test_transcode_on_unsupported_codec() {
        let intent = decide(&hevc_4k_hdr(), &desktop_chrome(), &path(), "/u").unwrap();
        let PlayIntent::Transcode { request, reason } = intent else {
            panic!("expected transcode intent");
        };

        assert!(reason.contains("container") || reason.contains("codec"));
        assert_eq!(request.video_codec, "h264");
        assert_eq!(request.output_container, OutputContainer::Dash);
        // 2160p source clamped to the device's 1080p ceiling.
        assert_eq!(request.target_resolution, Some((1920, 1080)));
        assert!(request.enable_abr);
    }

    #[test]
    fn test_ios_gets_hls() {
        let mut device = desktop_chrome();
        device.user_agent = IPHONE.into();

        let intent = decide(&hevc_4k_hdr(), &device, &path(), "/u").unwrap();
        let PlayIntent::Transcode { request, .. } = intent else {
            panic!("expected transcode intent");
        };
        assert_eq!(request.output_container, OutputContainer::Hls);
        assert_eq!(request.speed_priority, SpeedPriority::Fastest);
    }

    #[test]
    fn test_bitrate_exceeds_device_limit() {
        let mut media = h264_720p();
        media.video_bitrate_kbps = 9000;

        let intent = decide(&media, &desktop_chrome(), &path(), "/u").unwrap();
        let PlayIntent::Transcode { reason, .. } = intent else {
            panic!("expected transcode intent");
        };
        assert!(reason.contains("bitrate"));
    }

    #[test]
    fn test_hdr_blocked_without_device_support() {
        let mut media = h264_720p();
        media.has_hdr = true;

        let intent = decide(&media, &desktop_chrome(), &path(), "/u").unwrap();
        assert!(!intent.is_direct());
    }

    #[test]
    fn test_bitrate_ladder_clamped() {
        assert_eq!(select_bitrate(720, 0), 3000);
        assert_eq!(select_bitrate(2160, 0), 16_000);
        assert_eq!(select_bitrate(2160, 8000), 8000);
        assert_eq!(select_bitrate(100, 0), 400);
    }

    #[test]
    fn test_determinism() {
        let media = hevc_4k_hdr();
        let device = desktop_chrome();
        let a = decide(&media, &device, &path(), "/u").unwrap();
        let b = decide(&media, &device, &path(), "/u").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_unplayable_media_rejected() {
        let mut media = h264_720p();
        media.video_codec.clear();
        media.audio_codec.clear();

        let err = decide(&media, &desktop_chrome(), &path(), "/u").unwrap_err();
        assert_eq!(err.code(), "media_validation");
    }

    #[test]
    fn test_scaled_width_stays_even() {
        let media = MediaDescriptor {
            container: "mp4".into(),
            video_codec: "h264".into(),
            audio_codec: "aac".into(),
            width: 1998,
            height: 1080,
            video_bitrate_kbps: 5000,
            duration_seconds: 60.0,
            has_hdr: false,
            has_subtitles: false,
        };
        let width = scaled_width(&media, 720);
        assert_eq!(width % 2, 0);
        assert_eq!(width, 1332);
    }
}
