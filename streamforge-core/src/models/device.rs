use serde::{Deserialize, Serialize};

/// Client capability declaration, usually assembled by the frontend from the
/// browser's media capabilities API plus server-side user-agent inspection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceProfile {
    pub user_agent: String,
    /// Codec identifiers the client can decode ("h264", "hevc", "aac", ...).
    /// An empty list means "unknown"; the decision engine then assumes the
    /// h264/aac baseline every mainstream device carries.
    pub supported_codecs: Vec<String>,
    /// Containers the client explicitly declares, unioned with those
    /// inferred from the user-agent class.
    pub supported_containers: Vec<String>,
    /// 0 means unlimited.
    pub max_resolution_height: u32,
    /// 0 means unlimited.
    pub max_bitrate_kbps: u64,
    pub supports_hevc: bool,
    pub supports_av1: bool,
    pub supports_hdr: bool,
    pub client_ip: Option<String>,
}

impl DeviceProfile {
    #[must_use]
    pub fn supports_codec(&self, codec: &str) -> bool {
        if self.supported_codecs.is_empty() {
            // Unknown capability set: assume the universal baseline.
            return matches!(codec, "h264" | "aac");
        }
        self.supported_codecs.iter().any(|c| c.eq_ignore_ascii_case(codec))
    }

    #[must_use]
    pub fn device_class(&self) -> DeviceClass {
        DeviceClass::from_user_agent(&self.user_agent)
    }
}

/// Coarse device family derived from the user agent. Drives container
/// inference, ABR and speed-priority heuristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    IosSafari,
    MobileBrowser,
    DesktopBrowser,
    Tv,
    Generic,
}

impl DeviceClass {
    #[must_use]
    pub fn from_user_agent(user_agent: &str) -> Self {
        let ua = user_agent.to_lowercase();

        if ua.contains("iphone") || ua.contains("ipad") || ua.contains("ipod") {
            return Self::IosSafari;
        }
        // Desktop Safari shares the HLS-native media stack with iOS.
        if ua.contains("safari") && ua.contains("mac os") && !ua.contains("chrome") {
            return Self::IosSafari;
        }
        if ua.contains("smart-tv")
            || ua.contains("smarttv")
            || ua.contains("tizen")
            || ua.contains("webos")
            || ua.contains("roku")
            || ua.contains("appletv")
            || ua.contains("crkey")
        {
            return Self::Tv;
        }
        if ua.contains("android") || ua.contains("mobile") {
            return Self::MobileBrowser;
        }
        if ua.contains("chrome")
            || ua.contains("firefox")
            || ua.contains("edg/")
            || ua.contains("mozilla")
        {
            return Self::DesktopBrowser;
        }

        Self::Generic
    }

    /// True for classes whose player is a web browser.
    #[must_use]
    pub const fn is_browser(self) -> bool {
        matches!(
            self,
            Self::IosSafari | Self::MobileBrowser | Self::DesktopBrowser
        )
    }

    #[must_use]
    pub const fn is_mobile(self) -> bool {
        matches!(self, Self::IosSafari | Self::MobileBrowser)
    }

    /// Containers this device family direct-plays without a remux.
    #[must_use]
    pub const fn native_containers(self) -> &'static [&'static str] {
        match self {
            Self::IosSafari => &["mp4", "mov", "m4v"],
            Self::MobileBrowser | Self::DesktopBrowser => &["mp4", "webm"],
            Self::Tv => &["mp4", "mkv", "ts"],
            Self::Generic => &["mp4"],
        }
    }
}
