#![forbid(unsafe_code)]

// Media module - capture interfaces and local/remote media lifecycle
// The concrete capture stack (getUserMedia, screen capture, effects) lives in
// the embedding shell; this crate drives it through the traits below.

pub mod consumers;
pub mod encodings;
pub mod producers;

pub use consumers::ConsumerRegistry;
pub use producers::ProducerRegistry;

use crate::error::ClientResult;
use async_trait::async_trait;
use mediasoup::prelude::MediaKind;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Constraints for audio capture.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioConstraints {
    pub device_id: Option<String>,
    pub sample_rate: u32,
    pub channel_count: u8,
    pub sample_size: u8,
    pub auto_gain_control: bool,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
}

/// Constraints for video capture (webcam, extra cameras, screen).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoConstraints {
    pub device_id: Option<String>,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
}

/// Live capture settings as reported by the track.
#[derive(Debug, Clone, Default)]
pub struct TrackSettings {
    pub device_id: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<u32>,
}

/// Handle to a live media track. Owned by exactly one producer (or consumer);
/// `stop` releases the capture device.
#[async_trait]
pub trait MediaTrack: Send + Sync {
    fn id(&self) -> String;
    fn kind(&self) -> MediaKind;
    fn label(&self) -> String;
    fn settings(&self) -> TrackSettings;
    fn ended(&self) -> bool;
    fn stop(&self);
    /// Re-tune a live video track without re-acquisition.
    async fn apply_constraints(&self, constraints: &VideoConstraints) -> ClientResult<()>;
}

/// Screen capture result; audio is present only when the platform offers it.
pub struct ScreenCapture {
    pub video: Arc<dyn MediaTrack>,
    pub audio: Option<Arc<dyn MediaTrack>>,
}

/// Local capture stack.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn acquire_audio(&self, constraints: &AudioConstraints) -> ClientResult<Arc<dyn MediaTrack>>;
    async fn acquire_video(&self, constraints: &VideoConstraints) -> ClientResult<Arc<dyn MediaTrack>>;
    async fn acquire_screen(&self, constraints: &VideoConstraints) -> ClientResult<ScreenCapture>;
}

/// Virtual-background effect. Pipes a raw camera track and returns the
/// processed one; `destroy` releases the pipeline.
#[async_trait]
pub trait VideoEffect: Send + Sync {
    async fn pipe(&self, track: Arc<dyn MediaTrack>) -> ClientResult<Arc<dyn MediaTrack>>;
    fn destroy(&self);
}

/// Codec tuning passed to the device library when producing.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerCodecOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opus_stereo: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opus_fec: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opus_dtx: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opus_max_playback_rate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opus_ptime: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_google_start_bitrate: Option<u32>,
}
