#![forbid(unsafe_code)]

// Client configuration and media constants

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// RTP sender priority tier, applied to the first simulcast encoding only
/// (browsers ignore it on the others).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NetworkPriority {
    High,
    Medium,
    Low,
    VeryLow,
}

/// Per-source network priorities.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkPriorities {
    pub audio: NetworkPriority,
    pub main_video: NetworkPriority,
    pub additional_videos: NetworkPriority,
    pub extra_video: NetworkPriority,
    pub screen_share: NetworkPriority,
}

impl Default for NetworkPriorities {
    fn default() -> Self {
        Self {
            audio: NetworkPriority::High,
            main_video: NetworkPriority::High,
            additional_videos: NetworkPriority::Low,
            extra_video: NetworkPriority::Low,
            screen_share: NetworkPriority::Medium,
        }
    }
}

/// Named capture resolutions mapping to frame widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VideoResolution {
    Low,
    #[default]
    Medium,
    High,
    VeryHigh,
    Ultra,
}

impl VideoResolution {
    pub fn width(self) -> u32 {
        match self {
            VideoResolution::Low => 320,
            VideoResolution::Medium => 640,
            VideoResolution::High => 1280,
            VideoResolution::VeryHigh => 1920,
            VideoResolution::Ultra => 3840,
        }
    }

    /// 16:9 height for the nominal width.
    pub fn height(self) -> u32 {
        self.width() * 9 / 16
    }
}

/// One simulcast encoding step from the profile table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulcastProfile {
    pub scale_resolution_down_by: f64,
    pub max_bit_rate: u32,
}

fn default_simulcast_profiles() -> BTreeMap<u32, Vec<SimulcastProfile>> {
    fn p(scale: f64, rate: u32) -> SimulcastProfile {
        SimulcastProfile { scale_resolution_down_by: scale, max_bit_rate: rate }
    }

    BTreeMap::from([
        (320, vec![p(1.0, 150_000)]),
        (640, vec![p(2.0, 150_000), p(1.0, 500_000)]),
        (1280, vec![p(4.0, 150_000), p(2.0, 500_000), p(1.0, 1_200_000)]),
        (1920, vec![p(6.0, 150_000), p(3.0, 500_000), p(1.0, 3_500_000)]),
        (3840, vec![p(12.0, 150_000), p(6.0, 500_000), p(1.0, 10_000_000)]),
    ])
}

fn default_request_timeout_ms() -> u64 {
    20_000
}

fn default_request_retries() -> usize {
    3
}

fn default_hide_timeout_ms() -> u64 {
    3_000
}

fn default_last_n() -> usize {
    4
}

fn default_mobile_last_n() -> usize {
    1
}

fn default_adaptive_scaling_factor() -> f64 {
    0.75
}

fn default_auto_mute_threshold() -> usize {
    4
}

fn default_true() -> bool {
    true
}

fn default_supported_browsers() -> Vec<String> {
    ["chrome", "chromium", "edge", "firefox", "safari", "opera"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// Room client configuration. Deserialized from the single config object the
/// embedding shell passes in (the `config` URL parameter in the browser).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    /// UI auto-hide delay, consumed by shells; carried in the config object.
    #[serde(rename = "hideTimeout")]
    pub hide_timeout_ms: u64,
    /// Signaling request timeout per attempt.
    #[serde(rename = "requestTimeout")]
    pub request_timeout_ms: u64,
    /// Attempts per signaling request (timeouts only).
    pub request_retries: usize,
    /// Simulcast for webcam/extra video producers.
    pub simulcast: bool,
    /// Simulcast for screen sharing producers.
    #[serde(rename = "simulcastSharing")]
    pub simulcast_sharing: bool,
    /// Encoding steps keyed by capture width.
    pub simulcast_profiles: BTreeMap<u32, Vec<SimulcastProfile>>,
    /// Spotlight cap on desktop.
    pub last_n: usize,
    /// Spotlight cap on mobile.
    pub mobile_last_n: usize,
    /// Viewport factor for preferred-layer selection; clamped to [0.5, 1.0].
    pub adaptive_scaling_factor: f64,
    /// Join with a muted mic when the room already has at least this many peers.
    pub auto_mute_threshold: usize,
    pub network_priorities: NetworkPriorities,
    pub notification_sounds: bool,
    pub supported_browsers: Vec<String>,
    /// Route audio consumers through the opus inspection transform.
    pub enable_opus_details: bool,
    pub background: Option<String>,
    pub theme: Option<String>,
    pub login_enabled: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            hide_timeout_ms: default_hide_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            request_retries: default_request_retries(),
            simulcast: true,
            simulcast_sharing: false,
            simulcast_profiles: default_simulcast_profiles(),
            last_n: default_last_n(),
            mobile_last_n: default_mobile_last_n(),
            adaptive_scaling_factor: default_adaptive_scaling_factor(),
            auto_mute_threshold: default_auto_mute_threshold(),
            network_priorities: NetworkPriorities::default(),
            notification_sounds: true,
            supported_browsers: default_supported_browsers(),
            enable_opus_details: false,
            background: None,
            theme: None,
            login_enabled: default_true(),
        }
    }
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Clamped to [0.5, 1.0] regardless of what the config object carried.
    pub fn adaptive_scaling_factor(&self) -> f64 {
        self.adaptive_scaling_factor.clamp(0.5, 1.0)
    }

    /// Spotlight cap for the current form factor.
    pub fn max_spotlights(&self, mobile: bool) -> usize {
        if mobile {
            self.mobile_last_n
        } else {
            self.last_n
        }
    }
}
