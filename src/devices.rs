#![forbid(unsafe_code)]

// Device enumeration - local audio/video device registry

use crate::error::ClientResult;
use crate::notify::Notifier;
use crate::store::{MediaDeviceInfo, MediaDeviceKind, Store, StoreAction};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Platform device enumeration (navigator.mediaDevices-shaped).
#[async_trait]
pub trait DeviceEnumerator: Send + Sync {
    async fn enumerate(&self) -> ClientResult<Vec<MediaDeviceInfo>>;
}

/// Keeps the store's device list current. The embedding shell calls
/// `update` on its devicechange events and after permission grants
/// (labels only appear once capture was allowed).
pub struct DeviceMonitor {
    enumerator: Arc<dyn DeviceEnumerator>,
    store: Store,
    notifier: Notifier,
}

impl DeviceMonitor {
    pub fn new(enumerator: Arc<dyn DeviceEnumerator>, store: Store, notifier: Notifier) -> Self {
        Self { enumerator, store, notifier }
    }

    /// Re-enumerate and diff; returns whether the list changed.
    pub async fn update(&self) -> ClientResult<bool> {
        let devices = self.enumerator.enumerate().await?;
        let changed = self.store.with(|state| state.devices != devices);

        if changed {
            debug!("media devices changed ({} devices)", devices.len());
            self.store.dispatch(StoreAction::SetMediaDevices(devices));
            self.notifier.info("Your media devices changed");
        }

        Ok(changed)
    }

    pub fn audio_inputs(&self) -> Vec<MediaDeviceInfo> {
        self.devices_of_kind(MediaDeviceKind::AudioInput)
    }

    pub fn audio_outputs(&self) -> Vec<MediaDeviceInfo> {
        self.devices_of_kind(MediaDeviceKind::AudioOutput)
    }

    pub fn video_inputs(&self) -> Vec<MediaDeviceInfo> {
        self.devices_of_kind(MediaDeviceKind::VideoInput)
    }

    fn devices_of_kind(&self, kind: MediaDeviceKind) -> Vec<MediaDeviceInfo> {
        self.store.with(|state| {
            state.devices.iter().filter(|d| d.kind == kind).cloned().collect()
        })
    }
}
