#![forbid(unsafe_code)]

// Encoding selection - simulcast profiles, SVC modes and the scale-down
// factors used by adaptive layer selection

use crate::config::{NetworkPriority, SimulcastProfile};
use mediasoup::prelude::RtpParameters;
use mediasoup::scalability_modes::ScalabilityMode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Start bitrate hint handed to the local encoder for video producers.
pub const VIDEO_GOOGLE_START_BITRATE: u32 = 1000;

/// One send-side encoding handed to the device library.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RtpEncoding {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale_resolution_down_by: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_bitrate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scalability_mode: Option<ScalabilityMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dtx: Option<bool>,
    /// Honored by browsers on the first encoding only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_priority: Option<NetworkPriority>,
}

/// Encodings for a camera/extra-video producer.
///
/// VP9 gets a single keyed-SVC encoding; otherwise the profile table entry
/// for the capture size decides the simulcast ladder.
pub fn video_encodings(
    first_codec_is_vp9: bool,
    profiles: &BTreeMap<u32, Vec<SimulcastProfile>>,
    width: u32,
    height: u32,
) -> Vec<RtpEncoding> {
    if first_codec_is_vp9 {
        return vec![RtpEncoding {
            scalability_mode: "S3T3_KEY".parse().ok(),
            ..RtpEncoding::default()
        }];
    }

    simulcast_ladder(profiles, width, height)
}

/// Encodings for a screen-sharing producer.
///
/// VP9 gets full SVC with discontinuous transmission; any other codec gets
/// the simulcast ladder with `dtx` on every encoding (screen content is
/// mostly static).
pub fn screen_sharing_encodings(
    first_codec_is_vp9: bool,
    profiles: &BTreeMap<u32, Vec<SimulcastProfile>>,
    width: u32,
    height: u32,
) -> Vec<RtpEncoding> {
    if first_codec_is_vp9 {
        return vec![RtpEncoding {
            scalability_mode: "S3T3".parse().ok(),
            dtx: Some(true),
            ..RtpEncoding::default()
        }];
    }

    let mut encodings = simulcast_ladder(profiles, width, height);
    for encoding in &mut encodings {
        encoding.dtx = Some(true);
    }
    encodings
}

/// Pick the profile entry for the capture size: the smallest table width that
/// covers it, or the largest entry when the capture exceeds the table.
fn simulcast_ladder(
    profiles: &BTreeMap<u32, Vec<SimulcastProfile>>,
    width: u32,
    height: u32,
) -> Vec<RtpEncoding> {
    let size = width.max(height);

    let entry = profiles
        .range(size..)
        .next()
        .map(|(_, profiles)| profiles)
        .or_else(|| profiles.values().next_back());

    let Some(entry) = entry else {
        return vec![RtpEncoding::default()];
    };

    entry
        .iter()
        .map(|profile| RtpEncoding {
            scale_resolution_down_by: Some(profile.scale_resolution_down_by),
            max_bitrate: Some(profile.max_bit_rate),
            ..RtpEncoding::default()
        })
        .collect()
}

/// Scale-down factor per spatial level, highest factor first.
///
/// A single encoding is SVC: the factors are powers of two down from the
/// spatial layer count of its scalability mode. Multiple encodings are
/// simulcast: explicit `scaleResolutionDownBy` values are used (clamped up
/// to 1.0), and when none of them is set the same power-of-two ladder
/// applies.
pub fn resolution_scalings(encodings: &[RtpEncoding]) -> Vec<f64> {
    if encodings.is_empty() {
        return Vec::new();
    }

    if encodings.len() == 1 {
        let spatial_layers = encodings[0]
            .scalability_mode
            .as_ref()
            .map(|mode| mode.spatial_layers().get())
            .unwrap_or(1);
        return power_of_two_ladder(spatial_layers as usize);
    }

    if encodings.iter().all(|e| e.scale_resolution_down_by.is_none()) {
        return power_of_two_ladder(encodings.len());
    }

    encodings
        .iter()
        .map(|e| e.scale_resolution_down_by.map_or(1.0, |v| v.max(1.0)))
        .collect()
}

fn power_of_two_ladder(levels: usize) -> Vec<f64> {
    (0..levels).rev().map(|i| (1u32 << i) as f64).collect()
}

/// Scale-down factors for a consumer, from the RTP parameters the SFU sent
/// with `newConsumer`.
pub fn consumer_resolution_scalings(rtp_parameters: &RtpParameters) -> Vec<f64> {
    let encodings: Vec<RtpEncoding> = rtp_parameters
        .encodings
        .iter()
        .map(|e| RtpEncoding {
            scale_resolution_down_by: e.scale_resolution_down_by,
            scalability_mode: Some(e.scalability_mode.clone()),
            ..RtpEncoding::default()
        })
        .collect();
    resolution_scalings(&encodings)
}

/// Spatial and temporal layer counts of a consumer, parsed from the
/// scalability mode of its first encoding.
pub fn consumer_layers(rtp_parameters: &RtpParameters) -> (u8, u8) {
    rtp_parameters
        .encodings
        .first()
        .map(|e| {
            (e.scalability_mode.spatial_layers().get(), e.scalability_mode.temporal_layers().get())
        })
        .unwrap_or((1, 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;

    #[test]
    fn svc_encoding_scales_by_spatial_layers() {
        let encodings = vec![RtpEncoding {
            scalability_mode: "S3T3_KEY".parse().ok(),
            ..RtpEncoding::default()
        }];
        assert_eq!(resolution_scalings(&encodings), vec![4.0, 2.0, 1.0]);
    }

    #[test]
    fn simulcast_without_explicit_scales_uses_power_ladder() {
        let encodings = vec![RtpEncoding::default(), RtpEncoding::default(), RtpEncoding::default()];
        assert_eq!(resolution_scalings(&encodings), vec![4.0, 2.0, 1.0]);
    }

    #[test]
    fn explicit_scales_are_clamped_and_defaulted() {
        let encodings = vec![
            RtpEncoding { scale_resolution_down_by: Some(0.5), ..RtpEncoding::default() },
            RtpEncoding::default(),
        ];
        assert_eq!(resolution_scalings(&encodings), vec![1.0, 1.0]);
    }

    #[test]
    fn single_encoding_without_mode_is_one_level() {
        let encodings = vec![RtpEncoding::default()];
        assert_eq!(resolution_scalings(&encodings), vec![1.0]);
    }

    #[test]
    fn profile_table_selects_by_capture_size() {
        let profiles = ClientConfig::default().simulcast_profiles;

        let encodings = video_encodings(false, &profiles, 1280, 720);
        assert_eq!(encodings.len(), 3);
        assert_eq!(encodings[0].scale_resolution_down_by, Some(4.0));
        assert_eq!(encodings[2].scale_resolution_down_by, Some(1.0));
        assert_eq!(encodings[2].max_bitrate, Some(1_200_000));

        // low resolution hits the single-step entry
        let encodings = video_encodings(false, &profiles, 320, 180);
        assert_eq!(encodings.len(), 1);

        // larger than any table entry falls back to the largest
        let encodings = video_encodings(false, &profiles, 7680, 4320);
        assert_eq!(encodings.len(), 3);
        assert_eq!(encodings[0].scale_resolution_down_by, Some(12.0));
    }

    #[test]
    fn vp9_uses_keyed_svc_for_camera_and_full_svc_for_screen() {
        let profiles = ClientConfig::default().simulcast_profiles;

        let encodings = video_encodings(true, &profiles, 1280, 720);
        assert_eq!(encodings.len(), 1);
        let mode = encodings[0].scalability_mode.as_ref().unwrap();
        assert_eq!(mode.spatial_layers().get(), 3);
        assert!(mode.ksvc());

        let encodings = screen_sharing_encodings(true, &profiles, 1920, 1080);
        assert_eq!(encodings.len(), 1);
        assert_eq!(encodings[0].dtx, Some(true));
        let mode = encodings[0].scalability_mode.as_ref().unwrap();
        assert_eq!(mode.spatial_layers().get(), 3);
        assert!(!mode.ksvc());
    }

    #[test]
    fn non_vp9_screen_sharing_gets_dtx_everywhere() {
        let profiles = ClientConfig::default().simulcast_profiles;
        let encodings = screen_sharing_encodings(false, &profiles, 1920, 1080);
        assert!(encodings.len() > 1);
        assert!(encodings.iter().all(|e| e.dtx == Some(true)));
    }
}
