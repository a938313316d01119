#![forbid(unsafe_code)]

// Consumer registry - lifecycle of remote inbound media

use super::encodings::{consumer_layers, consumer_resolution_scalings};
use crate::config::ClientConfig;
use crate::device::{ConsumeOptions, ConsumerHandle, DeviceManager};
use crate::error::ClientResult;
use crate::signaling::protocol::{
    ConsumerAppData, PeerId, RoomRequest,
};
use crate::signaling::SignalingSession;
use crate::speaking::{rounded_db, VoiceActivityDetector, VolumeEvent};
use crate::store::{ConsumerState, Store, StoreAction};
use mediasoup::consumer::{ConsumerScore, ConsumerType};
use mediasoup::prelude::{MediaKind, RtpParameters};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Payload of a `newConsumer` notification.
pub struct NewConsumerInfo {
    pub peer_id: PeerId,
    pub producer_id: String,
    pub id: String,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    pub consumer_type: ConsumerType,
    pub app_data: ConsumerAppData,
    pub producer_paused: bool,
    pub score: Option<ConsumerScore>,
}

struct ConsumerEntry {
    peer_id: PeerId,
    handle: Arc<dyn ConsumerHandle>,
}

/// Lifecycle of remote consumers: creation from `newConsumer`, pause/resume
/// against the SFU, preferred-layer adaptation and per-peer audio levels.
pub struct ConsumerRegistry {
    config: Arc<ClientConfig>,
    store: Store,
    signaling: Arc<SignalingSession>,
    devices: Arc<DeviceManager>,
    vad: Arc<dyn VoiceActivityDetector>,
    handles: StdMutex<HashMap<String, ConsumerEntry>>,
    volume_tasks: StdMutex<HashMap<String, JoinHandle<()>>>,
}

impl ConsumerRegistry {
    pub fn new(
        config: Arc<ClientConfig>,
        store: Store,
        signaling: Arc<SignalingSession>,
        devices: Arc<DeviceManager>,
        vad: Arc<dyn VoiceActivityDetector>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            signaling,
            devices,
            vad,
            handles: StdMutex::new(HashMap::new()),
            volume_tasks: StdMutex::new(HashMap::new()),
        })
    }

    /// Consume a new remote producer. Audio starts immediately; video starts
    /// only when its peer is spotlighted, otherwise it stays paused.
    pub async fn add_consumer(&self, info: NewConsumerInfo) -> ClientResult<()> {
        let transport = self.devices.recv_transport()?;

        let enable_rtp_inspection =
            self.config.enable_opus_details && info.kind == MediaKind::Audio;

        let handle = transport
            .consume(ConsumeOptions {
                id: info.id.clone(),
                producer_id: info.producer_id.clone(),
                kind: info.kind,
                rtp_parameters: info.rtp_parameters.clone(),
                peer_id: info.peer_id.clone(),
                enable_rtp_inspection,
            })
            .await?;

        let (spatial_layers, temporal_layers) = consumer_layers(&info.rtp_parameters);
        // the producer advertises its ladder in appData; fall back to the
        // RTP parameters when it did not
        let resolution_scalings = info
            .app_data
            .resolution_scalings
            .clone()
            .unwrap_or_else(|| consumer_resolution_scalings(&info.rtp_parameters));
        let settings = handle.track().settings();
        let width = info.app_data.width.or(settings.width);
        let height = info.app_data.height.or(settings.height);

        let spotlighted = self
            .store
            .with(|s| s.room.spotlights.iter().any(|id| id == &info.peer_id));
        let start = info.kind == MediaKind::Audio || spotlighted;

        self.store.dispatch(StoreAction::AddConsumer(ConsumerState {
            id: info.id.clone(),
            peer_id: info.peer_id.clone(),
            kind: info.kind,
            consumer_type: info.consumer_type,
            source: info.app_data.source,
            locally_paused: !start,
            remotely_paused: info.producer_paused,
            spatial_layers,
            temporal_layers,
            preferred_spatial_layer: spatial_layers.saturating_sub(1),
            preferred_temporal_layer: temporal_layers.saturating_sub(1),
            current_spatial_layer: None,
            current_temporal_layer: None,
            priority: 1,
            score: info.score,
            width,
            height,
            resolution_scalings,
            audio_gain: 1.0,
            opus_inspected: enable_rtp_inspection,
        }));

        if info.kind == MediaKind::Audio {
            self.attach_volume_detection(&info.id, &info.peer_id, &handle);
        }

        self.handles.lock().unwrap_or_else(|e| e.into_inner()).insert(
            info.id.clone(),
            ConsumerEntry { peer_id: info.peer_id, handle },
        );

        if start {
            self.resume_consumer(&info.id, true).await?;
        }

        debug!("consumer {} added ({:?})", info.id, info.kind);
        Ok(())
    }

    /// Close locally: the SFU already removed its side (or is gone).
    pub fn close_consumer(&self, consumer_id: &str) {
        if let Some(task) =
            self.volume_tasks.lock().unwrap_or_else(|e| e.into_inner()).remove(consumer_id)
        {
            task.abort();
        }
        if let Some(entry) =
            self.handles.lock().unwrap_or_else(|e| e.into_inner()).remove(consumer_id)
        {
            entry.handle.close();
        }
        self.store.dispatch(StoreAction::RemoveConsumer { consumer_id: consumer_id.to_string() });
    }

    /// Close every consumer belonging to a departed peer.
    pub fn close_peer_consumers(&self, peer_id: &str) {
        let ids: Vec<String> = self
            .handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(_, entry)| entry.peer_id == peer_id)
            .map(|(id, _)| id.clone())
            .collect();
        for id in ids {
            self.close_consumer(&id);
        }
    }

    /// Drop everything locally; used on disconnect teardown.
    pub fn teardown(&self) {
        for (_, task) in self.volume_tasks.lock().unwrap_or_else(|e| e.into_inner()).drain() {
            task.abort();
        }
        for (_, entry) in self.handles.lock().unwrap_or_else(|e| e.into_inner()).drain() {
            entry.handle.close();
        }
        self.store.dispatch(StoreAction::ClearConsumers);
    }

    /// Resume against the SFU. Sends `resumeConsumer` only on the initial
    /// start or when the consumer is actually paused.
    pub async fn resume_consumer(&self, consumer_id: &str, initial: bool) -> ClientResult<()> {
        let state = self.store.with(|s| {
            s.consumers.get(consumer_id).map(|c| c.locally_paused)
        });
        let Some(locally_paused) = state else {
            return Ok(()); // already closed
        };

        if !initial && !locally_paused {
            return Ok(());
        }

        self.store.dispatch(StoreAction::SetConsumerLocallyPaused {
            consumer_id: consumer_id.to_string(),
            paused: false,
        });
        self.request_or_close(
            consumer_id,
            RoomRequest::ResumeConsumer { consumer_id: consumer_id.to_string() },
        )
        .await
    }

    /// Pause against the SFU; no-op when already locally paused or closed.
    pub async fn pause_consumer(&self, consumer_id: &str) -> ClientResult<()> {
        let state = self.store.with(|s| {
            s.consumers.get(consumer_id).map(|c| c.locally_paused)
        });
        let Some(locally_paused) = state else {
            return Ok(());
        };
        if locally_paused {
            return Ok(());
        }

        self.store.dispatch(StoreAction::SetConsumerLocallyPaused {
            consumer_id: consumer_id.to_string(),
            paused: true,
        });
        self.request_or_close(
            consumer_id,
            RoomRequest::PauseConsumer { consumer_id: consumer_id.to_string() },
        )
        .await
    }

    pub fn on_remote_paused(&self, consumer_id: &str) {
        self.store.dispatch(StoreAction::SetConsumerRemotelyPaused {
            consumer_id: consumer_id.to_string(),
            paused: true,
        });
    }

    pub fn on_remote_resumed(&self, consumer_id: &str) {
        self.store.dispatch(StoreAction::SetConsumerRemotelyPaused {
            consumer_id: consumer_id.to_string(),
            paused: false,
        });
    }

    /// One batched pass after a spotlight change: video consumers of
    /// spotlighted peers resume, all others pause.
    pub async fn update_spotlights(&self, spotlights: &[PeerId]) {
        let video_consumers: Vec<(String, PeerId)> = self.store.with(|s| {
            s.consumers
                .values()
                .filter(|c| c.kind == MediaKind::Video)
                .map(|c| (c.id.clone(), c.peer_id.clone()))
                .collect()
        });

        for (consumer_id, peer_id) in video_consumers {
            let result = if spotlights.contains(&peer_id) {
                self.resume_consumer(&consumer_id, false).await
            } else {
                self.pause_consumer(&consumer_id).await
            };
            if let Err(error) = result {
                warn!("spotlight update failed for consumer {}: {}", consumer_id, error);
            }
        }
    }

    /// Re-pick preferred layers for a viewport size. Simple consumers are
    /// left alone; a change is pushed to the SFU only when it differs.
    pub async fn adapt_preferred_layers(
        &self,
        consumer_id: &str,
        viewport_width: u32,
        viewport_height: u32,
    ) -> ClientResult<()> {
        let snapshot = self.store.with(|s| s.consumers.get(consumer_id).cloned());
        let Some(consumer) = snapshot else {
            return Ok(());
        };

        if consumer.consumer_type == ConsumerType::Simple
            || consumer.kind != MediaKind::Video
            || consumer.resolution_scalings.is_empty()
        {
            return Ok(());
        }

        let (Some(width), Some(height)) = (consumer.width, consumer.height) else {
            return Ok(());
        };

        let factor = self.config.adaptive_scaling_factor();
        let scalings = &consumer.resolution_scalings;

        let mut preferred_spatial = 0u8;
        for (index, scaling) in scalings.iter().enumerate().rev() {
            let level_width = factor * f64::from(width) / scaling;
            let level_height = factor * f64::from(height) / scaling;
            if f64::from(viewport_width) >= level_width
                || f64::from(viewport_height) >= level_height
            {
                preferred_spatial = index as u8;
                break;
            }
        }

        let mut preferred_temporal = consumer.temporal_layers.saturating_sub(1);
        if preferred_spatial == 0 && !scalings.is_empty() {
            let lowest_width = f64::from(width) / scalings[0];
            let lowest_height = f64::from(height) / scalings[0];
            if f64::from(viewport_width) < lowest_width / 2.0
                && f64::from(viewport_height) < lowest_height / 2.0
            {
                preferred_temporal = preferred_temporal.saturating_sub(1);
            }
            if f64::from(viewport_width) < lowest_width / 4.0
                && f64::from(viewport_height) < lowest_height / 4.0
            {
                preferred_temporal = preferred_temporal.saturating_sub(1);
            }
        }

        if preferred_spatial == consumer.preferred_spatial_layer
            && preferred_temporal == consumer.preferred_temporal_layer
        {
            return Ok(());
        }

        self.store.dispatch(StoreAction::SetConsumerPreferredLayers {
            consumer_id: consumer_id.to_string(),
            spatial: preferred_spatial,
            temporal: preferred_temporal,
        });
        self.request_or_close(
            consumer_id,
            RoomRequest::SetConsumerPreferredLayers {
                consumer_id: consumer_id.to_string(),
                spatial_layer: preferred_spatial,
                temporal_layer: preferred_temporal,
            },
        )
        .await
    }

    pub async fn set_consumer_priority(&self, consumer_id: &str, priority: u8) -> ClientResult<()> {
        self.store.dispatch(StoreAction::SetConsumerPriority {
            consumer_id: consumer_id.to_string(),
            priority,
        });
        self.request_or_close(
            consumer_id,
            RoomRequest::SetConsumerPriority { consumer_id: consumer_id.to_string(), priority },
        )
        .await
    }

    pub async fn request_keyframe(&self, consumer_id: &str) -> ClientResult<()> {
        self.request_or_close(
            consumer_id,
            RoomRequest::RequestConsumerKeyFrame { consumer_id: consumer_id.to_string() },
        )
        .await
    }

    /// Playback gain is applied locally; only the store needs to know.
    pub fn set_audio_gain(&self, consumer_id: &str, gain: f64) {
        self.store.dispatch(StoreAction::SetConsumerAudioGain {
            consumer_id: consumer_id.to_string(),
            gain,
        });
    }

    async fn request_or_close(&self, consumer_id: &str, request: RoomRequest) -> ClientResult<()> {
        match self.signaling.request(request).await {
            Ok(_) => Ok(()),
            Err(error) if error.is_not_found_in_sfu() => {
                debug!("consumer {} unknown to SFU, closing locally", consumer_id);
                self.close_consumer(consumer_id);
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    fn attach_volume_detection(
        &self,
        consumer_id: &str,
        peer_id: &str,
        handle: &Arc<dyn ConsumerHandle>,
    ) {
        let mut events = self.vad.attach(handle.track());
        let store = self.store.clone();
        let peer_id = peer_id.to_string();

        let task = tokio::spawn(async move {
            let mut published: Option<i16> = None;
            while let Some(event) = events.recv().await {
                if let VolumeEvent::Volume(db) = event {
                    let rounded = rounded_db(db);
                    if published != Some(rounded) {
                        published = Some(rounded);
                        store.dispatch(StoreAction::SetPeerVolume {
                            peer_id: peer_id.clone(),
                            volume: Some(rounded),
                        });
                    }
                }
            }
        });

        self.volume_tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(consumer_id.to_string(), task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::protocol::ProducerSource;
    use crate::signaling::transport::TransportError;
    use crate::store::{BrowserInfo, Peer};
    use crate::testing::{FakeDevice, FakeSignalingTransport, FakeVad};
    use mediasoup::rtp_parameters::RtpEncodingParameters;
    use serde_json::json;

    struct Env {
        registry: Arc<ConsumerRegistry>,
        store: Store,
        signaling: Arc<FakeSignalingTransport>,
        device: Arc<FakeDevice>,
        vad: Arc<FakeVad>,
    }

    async fn setup(config: ClientConfig) -> Env {
        let signaling_transport = FakeSignalingTransport::with_defaults();
        let config = Arc::new(config);
        let session = Arc::new(SignalingSession::new(signaling_transport.clone(), &config));
        let device = FakeDevice::new();
        let devices = Arc::new(DeviceManager::new(device.clone(), session.clone()));
        devices
            .create_transports(false, false, &[], &BrowserInfo::default())
            .await
            .unwrap();

        let store = Store::new();
        let vad = FakeVad::new();
        let registry =
            ConsumerRegistry::new(config, store.clone(), session, devices, vad.clone());

        Env { registry, store, signaling: signaling_transport, device, vad }
    }

    fn svc_rtp_parameters(mode: &str) -> RtpParameters {
        let mut parameters = RtpParameters::default();
        parameters.encodings.push(RtpEncodingParameters {
            scalability_mode: mode.parse().expect("valid scalability mode"),
            ..RtpEncodingParameters::default()
        });
        parameters
    }

    fn new_consumer(id: &str, peer_id: &str, kind: MediaKind) -> NewConsumerInfo {
        let (rtp_parameters, consumer_type, source) = match kind {
            MediaKind::Audio => {
                (RtpParameters::default(), ConsumerType::Simple, ProducerSource::Mic)
            }
            MediaKind::Video => {
                (svc_rtp_parameters("S3T3"), ConsumerType::Simulcast, ProducerSource::Webcam)
            }
        };
        NewConsumerInfo {
            peer_id: peer_id.to_string(),
            producer_id: format!("remote-{id}"),
            id: id.to_string(),
            kind,
            rtp_parameters,
            consumer_type,
            app_data: ConsumerAppData {
                source,
                peer_id: Some(peer_id.to_string()),
                width: None,
                height: None,
                resolution_scalings: None,
            },
            producer_paused: false,
            score: None,
        }
    }

    fn add_peer(store: &Store, peer_id: &str) {
        store.dispatch(StoreAction::AddPeer(Peer {
            id: peer_id.to_string(),
            ..Peer::default()
        }));
    }

    #[tokio::test]
    async fn audio_consumer_starts_and_attaches_volume_detection() {
        let env = setup(ClientConfig::default()).await;
        add_peer(&env.store, "p1");

        env.registry.add_consumer(new_consumer("c1", "p1", MediaKind::Audio)).await.unwrap();

        assert_eq!(env.signaling.request_count("resumeConsumer"), 1);
        assert_eq!(env.vad.attached_count(), 1);
        env.store.with(|s| {
            let consumer = &s.consumers["c1"];
            assert!(!consumer.locally_paused);
            assert_eq!(s.peers["p1"].consumers, vec!["c1".to_string()]);
        });

        env.vad.emit_last(VolumeEvent::Volume(-42.2));
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        env.store.with(|s| assert_eq!(s.peers["p1"].volume, Some(-42)));

        // sub-integer changes are coalesced
        env.vad.emit_last(VolumeEvent::Volume(-42.4));
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        env.store.with(|s| assert_eq!(s.peers["p1"].volume, Some(-42)));
    }

    #[tokio::test]
    async fn video_consumer_outside_spotlights_stays_paused() {
        let env = setup(ClientConfig::default()).await;
        add_peer(&env.store, "p1");

        env.registry.add_consumer(new_consumer("c1", "p1", MediaKind::Video)).await.unwrap();

        assert_eq!(env.signaling.request_count("resumeConsumer"), 0);
        env.store.with(|s| {
            let consumer = &s.consumers["c1"];
            assert!(consumer.locally_paused);
            assert_eq!(consumer.spatial_layers, 3);
            assert_eq!(consumer.temporal_layers, 3);
            assert_eq!(consumer.resolution_scalings, vec![4.0, 2.0, 1.0]);
            assert_eq!(consumer.preferred_spatial_layer, 2);
        });
    }

    #[tokio::test]
    async fn spotlighted_video_consumer_starts_immediately() {
        let env = setup(ClientConfig::default()).await;
        add_peer(&env.store, "p1");
        env.store.dispatch(StoreAction::SetSpotlights(vec!["p1".to_string()]));

        env.registry.add_consumer(new_consumer("c1", "p1", MediaKind::Video)).await.unwrap();

        assert_eq!(env.signaling.request_count("resumeConsumer"), 1);
        env.store.with(|s| assert!(!s.consumers["c1"].locally_paused));
    }

    #[tokio::test]
    async fn update_spotlights_batches_pause_and_resume() {
        let env = setup(ClientConfig::default()).await;
        add_peer(&env.store, "p1");
        add_peer(&env.store, "p2");
        env.store.dispatch(StoreAction::SetSpotlights(vec!["p1".to_string()]));

        env.registry.add_consumer(new_consumer("c1", "p1", MediaKind::Video)).await.unwrap();
        env.registry.add_consumer(new_consumer("c2", "p2", MediaKind::Video)).await.unwrap();

        env.registry.update_spotlights(&["p2".to_string()]).await;

        env.store.with(|s| {
            assert!(s.consumers["c1"].locally_paused);
            assert!(!s.consumers["c2"].locally_paused);
        });
        assert_eq!(env.signaling.request_count("pauseConsumer"), 1);
        // c1 initial resume + c2 spotlight resume
        assert_eq!(env.signaling.request_count("resumeConsumer"), 2);
    }

    #[tokio::test]
    async fn pause_resume_round_trip_preserves_spotlight_state() {
        let env = setup(ClientConfig::default()).await;
        add_peer(&env.store, "p1");
        env.store.dispatch(StoreAction::SetSpotlights(vec!["p1".to_string()]));
        env.registry.add_consumer(new_consumer("c1", "p1", MediaKind::Video)).await.unwrap();

        env.registry.on_remote_paused("c1");
        env.store.with(|s| assert!(s.consumers["c1"].remotely_paused));
        env.registry.on_remote_resumed("c1");
        env.store.with(|s| {
            let consumer = &s.consumers["c1"];
            assert!(!consumer.remotely_paused);
            // spotlight membership (local pause state) is untouched
            assert!(!consumer.locally_paused);
        });
    }

    #[tokio::test]
    async fn adapt_preferred_layers_small_viewport_picks_lowest_spatial() {
        let env = setup(ClientConfig::default()).await;
        add_peer(&env.store, "p1");
        env.store.dispatch(StoreAction::SetSpotlights(vec!["p1".to_string()]));
        env.registry.add_consumer(new_consumer("c1", "p1", MediaKind::Video)).await.unwrap();

        // width 1280, scalings [4,2,1], F=0.75:
        // 320 >= 0.75*1280/4 = 240 but not >= 480 -> spatial 0
        env.registry.adapt_preferred_layers("c1", 320, 180).await.unwrap();

        env.store.with(|s| {
            let consumer = &s.consumers["c1"];
            assert_eq!(consumer.preferred_spatial_layer, 0);
            // viewport is not below half of the lowest level (320/2)
            assert_eq!(consumer.preferred_temporal_layer, 2);
        });
        let request = env.signaling.last_request("setConsumerPreferedLayers").unwrap();
        assert_eq!(request["data"], json!({"consumerId": "c1", "spatialLayer": 0, "temporalLayer": 2}));
    }

    #[tokio::test]
    async fn adapt_preferred_layers_tiny_viewport_drops_temporal() {
        let env = setup(ClientConfig::default()).await;
        add_peer(&env.store, "p1");
        env.store.dispatch(StoreAction::SetSpotlights(vec!["p1".to_string()]));
        env.registry.add_consumer(new_consumer("c1", "p1", MediaKind::Video)).await.unwrap();

        // below half of the lowest level (160x90) in both dimensions
        env.registry.adapt_preferred_layers("c1", 150, 80).await.unwrap();
        env.store.with(|s| {
            let consumer = &s.consumers["c1"];
            assert_eq!(consumer.preferred_spatial_layer, 0);
            assert_eq!(consumer.preferred_temporal_layer, 1);
        });

        // below a quarter (80x45) drops once more
        env.registry.adapt_preferred_layers("c1", 70, 40).await.unwrap();
        env.store.with(|s| {
            assert_eq!(s.consumers["c1"].preferred_temporal_layer, 0);
        });
    }

    #[tokio::test]
    async fn adapt_preferred_layers_no_change_sends_nothing() {
        let env = setup(ClientConfig::default()).await;
        add_peer(&env.store, "p1");
        env.store.dispatch(StoreAction::SetSpotlights(vec!["p1".to_string()]));
        env.registry.add_consumer(new_consumer("c1", "p1", MediaKind::Video)).await.unwrap();

        // big viewport keeps the highest layers, which are already preferred
        env.registry.adapt_preferred_layers("c1", 1920, 1080).await.unwrap();
        assert_eq!(env.signaling.request_count("setConsumerPreferedLayers"), 0);
    }

    #[tokio::test]
    async fn simple_consumers_are_not_adapted() {
        let env = setup(ClientConfig::default()).await;
        add_peer(&env.store, "p1");
        env.registry.add_consumer(new_consumer("c1", "p1", MediaKind::Audio)).await.unwrap();
        env.registry.adapt_preferred_layers("c1", 10, 10).await.unwrap();
        assert_eq!(env.signaling.request_count("setConsumerPreferedLayers"), 0);
    }

    #[tokio::test]
    async fn not_found_in_sfu_closes_locally_and_silently() {
        let env = setup(ClientConfig::default()).await;
        add_peer(&env.store, "p1");
        env.store.dispatch(StoreAction::SetSpotlights(vec!["p1".to_string()]));
        env.registry.add_consumer(new_consumer("c1", "p1", MediaKind::Video)).await.unwrap();

        env.signaling.fail_next("pauseConsumer", || {
            TransportError::Server(json!({"notFoundInMediasoupError": true}))
        });
        env.registry.pause_consumer("c1").await.unwrap();

        env.store.with(|s| assert!(!s.consumers.contains_key("c1")));
        let recv = env.device.latest_recv_transport().unwrap();
        let consumers = recv.consumers.lock().unwrap();
        assert!(consumers[0].closed());
    }

    #[tokio::test]
    async fn opus_inspection_flag_follows_config() {
        let mut config = ClientConfig::default();
        config.enable_opus_details = true;
        let env = setup(config).await;
        add_peer(&env.store, "p1");

        env.registry.add_consumer(new_consumer("c1", "p1", MediaKind::Audio)).await.unwrap();
        env.registry.add_consumer(new_consumer("c2", "p1", MediaKind::Video)).await.unwrap();

        let recv = env.device.latest_recv_transport().unwrap();
        let records = recv.consume_records();
        assert!(records[0].rtp_inspection);
        assert!(!records[1].rtp_inspection);
    }

    #[tokio::test]
    async fn close_peer_consumers_drops_only_that_peer() {
        let env = setup(ClientConfig::default()).await;
        add_peer(&env.store, "p1");
        add_peer(&env.store, "p2");
        env.registry.add_consumer(new_consumer("c1", "p1", MediaKind::Audio)).await.unwrap();
        env.registry.add_consumer(new_consumer("c2", "p2", MediaKind::Audio)).await.unwrap();

        env.registry.close_peer_consumers("p1");

        env.store.with(|s| {
            assert!(!s.consumers.contains_key("c1"));
            assert!(s.consumers.contains_key("c2"));
        });
    }
}
