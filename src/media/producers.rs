#![forbid(unsafe_code)]

// Producer registry - lifecycle of local outbound media

use super::encodings::{
    self, RtpEncoding, VIDEO_GOOGLE_START_BITRATE,
};
use super::{AudioConstraints, MediaSource, ProducerCodecOptions, VideoConstraints, VideoEffect};
use crate::config::ClientConfig;
use crate::device::{DeviceManager, ProduceOptions, ProducerHandle};
use crate::error::{ClientError, ClientResult};
use crate::signaling::protocol::{ProduceResponse, ProducerAppData, ProducerSource, RoomRequest};
use crate::signaling::SignalingSession;
use crate::speaking::{MicCommand, SpeakingMachine, VoiceActivityDetector, VolumeEvent};
use crate::store::{ProducerState, Store, StoreAction};
use mediasoup::prelude::MediaKind;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
pub struct MicUpdate {
    pub start: bool,
    pub restart: bool,
    pub new_device_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct WebcamUpdate {
    pub init: bool,
    pub start: bool,
    pub restart: bool,
    pub new_device_id: Option<String>,
    pub new_resolution: Option<crate::config::VideoResolution>,
    pub new_frame_rate: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct ScreenSharingUpdate {
    pub start: bool,
    pub new_resolution: Option<crate::config::VideoResolution>,
    pub new_frame_rate: Option<u32>,
}

/// A live local producer: server id plus the device-library handle.
struct Producer {
    id: String,
    source: ProducerSource,
    handle: Arc<dyn ProducerHandle>,
}

/// Clears an in-progress flag when the operation ends, error paths included.
struct Progress {
    store: Store,
    make: fn(bool) -> StoreAction,
}

impl Progress {
    fn begin(store: &Store, make: fn(bool) -> StoreAction) -> Self {
        store.dispatch(make(true));
        Self { store: store.clone(), make }
    }
}

impl Drop for Progress {
    fn drop(&mut self) {
        self.store.dispatch((self.make)(false));
    }
}

/// Lifecycle of local producers. Operations on the same source are
/// serialized through per-source async locks; the in-progress flags in the
/// store are advisory mirrors for UIs.
pub struct ProducerRegistry {
    config: Arc<ClientConfig>,
    store: Store,
    signaling: Arc<SignalingSession>,
    devices: Arc<DeviceManager>,
    source: Arc<dyn MediaSource>,
    vad: Arc<dyn VoiceActivityDetector>,
    effect: Option<Arc<dyn VideoEffect>>,

    mic: StdMutex<Option<Producer>>,
    webcam: StdMutex<Option<Producer>>,
    screen: StdMutex<Option<Producer>>,
    screen_audio: StdMutex<Option<Producer>>,
    extra_videos: StdMutex<HashMap<String, Producer>>,

    mic_op: AsyncMutex<()>,
    webcam_op: AsyncMutex<()>,
    screen_op: AsyncMutex<()>,
    extra_op: AsyncMutex<()>,

    speaking_task: StdMutex<Option<JoinHandle<()>>>,
}

impl ProducerRegistry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<ClientConfig>,
        store: Store,
        signaling: Arc<SignalingSession>,
        devices: Arc<DeviceManager>,
        source: Arc<dyn MediaSource>,
        vad: Arc<dyn VoiceActivityDetector>,
        effect: Option<Arc<dyn VideoEffect>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            signaling,
            devices,
            source,
            vad,
            effect,
            mic: StdMutex::new(None),
            webcam: StdMutex::new(None),
            screen: StdMutex::new(None),
            screen_audio: StdMutex::new(None),
            extra_videos: StdMutex::new(HashMap::new()),
            mic_op: AsyncMutex::new(()),
            webcam_op: AsyncMutex::new(()),
            screen_op: AsyncMutex::new(()),
            extra_op: AsyncMutex::new(()),
            speaking_task: StdMutex::new(None),
        })
    }

    // -- mic ---------------------------------------------------------------

    pub async fn update_mic(self: &Arc<Self>, update: MicUpdate) -> ClientResult<()> {
        let _op = self.mic_op.lock().await;
        let _progress = Progress::begin(&self.store, StoreAction::SetAudioInProgress);

        if update.new_device_id.is_some() && !update.restart {
            return Err(ClientError::InvalidArgument(
                "changing audio device requires restart".into(),
            ));
        }

        if !self.devices.can_produce(MediaKind::Audio) {
            return Err(ClientError::DeviceCapability(MediaKind::Audio));
        }

        let existing = self.take_slot(&self.mic);
        let should_produce = update.start || (update.restart && existing.is_some());

        if !should_produce {
            // nothing to (re)start; put the producer back untouched
            if let Some(producer) = existing {
                self.put_slot(&self.mic, producer);
            }
            return Ok(());
        }

        if let Some(producer) = existing {
            self.close_producer_remote(producer).await;
            self.stop_speaking_detection();
        }

        if let Some(device_id) = &update.new_device_id {
            let mut settings = self.store.with(|s| s.settings.clone());
            settings.selected_audio_device = Some(device_id.clone());
            self.store.dispatch(StoreAction::SetSettings(Box::new(settings)));
        }

        let (audio, device_id) = self.store.with(|s| {
            (s.settings.audio.clone(), s.settings.selected_audio_device.clone())
        });

        let constraints = AudioConstraints {
            device_id,
            sample_rate: audio.sample_rate,
            channel_count: audio.channel_count,
            sample_size: audio.sample_size,
            auto_gain_control: audio.auto_gain_control,
            echo_cancellation: audio.echo_cancellation,
            noise_suppression: audio.noise_suppression,
        };
        let track = self.source.acquire_audio(&constraints).await?;

        let codec_options = ProducerCodecOptions {
            opus_stereo: Some(audio.opus_stereo),
            opus_fec: Some(audio.opus_fec),
            opus_dtx: Some(audio.opus_dtx),
            opus_max_playback_rate: Some(audio.opus_max_playback_rate),
            opus_ptime: Some(audio.opus_ptime),
            ..ProducerCodecOptions::default()
        };

        let producer = self
            .produce(ProducerSource::Mic, track, Vec::new(), codec_options, None)
            .await?;

        self.start_speaking_detection(&producer);
        self.put_slot(&self.mic, producer);
        info!("mic producer started");
        Ok(())
    }

    pub async fn mute_mic(&self) -> ClientResult<()> {
        let _op = self.mic_op.lock().await;
        let Some((id, handle)) = self.slot_ref(&self.mic) else {
            return Ok(());
        };

        handle.pause();
        self.store.dispatch(StoreAction::SetProducerPaused { producer_id: id.clone(), paused: true });
        self.signaling.request(RoomRequest::PauseProducer { producer_id: id }).await?;
        Ok(())
    }

    pub async fn unmute_mic(self: &Arc<Self>) -> ClientResult<()> {
        {
            let _op = self.mic_op.lock().await;
            if let Some((id, handle)) = self.slot_ref(&self.mic) {
                handle.resume();
                self.store.dispatch(StoreAction::SetProducerPaused {
                    producer_id: id.clone(),
                    paused: false,
                });
                self.store.dispatch(StoreAction::SetAutoMuted(false));
                self.signaling.request(RoomRequest::ResumeProducer { producer_id: id }).await?;
                return Ok(());
            }
        }
        self.update_mic(MicUpdate { start: true, ..MicUpdate::default() }).await
    }

    pub async fn disable_mic(&self) -> ClientResult<()> {
        let _op = self.mic_op.lock().await;
        let _progress = Progress::begin(&self.store, StoreAction::SetAudioInProgress);

        if let Some(producer) = self.take_slot(&self.mic) {
            self.close_producer_remote(producer).await;
        }
        self.stop_speaking_detection();
        self.store.dispatch(StoreAction::SetSpeaking(false));
        self.store.dispatch(StoreAction::SetMyVolume(None));
        self.store.dispatch(StoreAction::SetAutoMuted(false));
        Ok(())
    }

    // -- webcam ------------------------------------------------------------

    pub async fn update_webcam(self: &Arc<Self>, update: WebcamUpdate) -> ClientResult<()> {
        let _op = self.webcam_op.lock().await;
        let _progress = Progress::begin(&self.store, StoreAction::SetVideoInProgress);

        if update.new_device_id.is_some() && !update.restart {
            return Err(ClientError::InvalidArgument(
                "changing video device requires restart".into(),
            ));
        }

        if !self.devices.can_produce(MediaKind::Video) {
            return Err(ClientError::DeviceCapability(MediaKind::Video));
        }

        if update.new_resolution.is_some() || update.new_frame_rate.is_some() {
            let mut settings = self.store.with(|s| s.settings.clone());
            if let Some(resolution) = update.new_resolution {
                settings.resolution = resolution;
            }
            if let Some(frame_rate) = update.new_frame_rate {
                settings.frame_rate = frame_rate;
            }
            self.store.dispatch(StoreAction::SetSettings(Box::new(settings)));
        }

        let existing = self.take_slot(&self.webcam);
        let should_produce = update.start || (update.restart && existing.is_some());

        if !should_produce {
            if let Some(producer) = existing {
                // live re-tune without re-acquisition
                if update.new_resolution.is_some() || update.new_frame_rate.is_some() {
                    let constraints = self.video_constraints(None);
                    producer.handle.track().apply_constraints(&constraints).await?;
                }
                self.put_slot(&self.webcam, producer);
            }
            return Ok(());
        }

        if let Some(producer) = existing {
            self.close_producer_remote(producer).await;
        }

        if let Some(device_id) = &update.new_device_id {
            let mut settings = self.store.with(|s| s.settings.clone());
            settings.selected_webcam = Some(device_id.clone());
            self.store.dispatch(StoreAction::SetSettings(Box::new(settings)));
        }

        let device_id = self.store.with(|s| s.settings.selected_webcam.clone());
        let constraints = self.video_constraints(device_id);
        let mut track = self.source.acquire_video(&constraints).await?;

        let virtual_background =
            self.store.with(|s| s.settings.virtual_background_enabled);
        if virtual_background {
            if let Some(effect) = &self.effect {
                track = effect.pipe(track).await?;
            }
        }

        let encodings = self.video_producer_encodings(
            &track.settings(),
            &constraints,
            self.config.network_priorities.main_video,
        );

        let codec_options = ProducerCodecOptions {
            video_google_start_bitrate: Some(VIDEO_GOOGLE_START_BITRATE),
            ..ProducerCodecOptions::default()
        };

        let producer = self
            .produce(ProducerSource::Webcam, track, encodings, codec_options, None)
            .await?;
        self.put_slot(&self.webcam, producer);
        info!("webcam producer started");
        Ok(())
    }

    pub async fn disable_webcam(&self) -> ClientResult<()> {
        let _op = self.webcam_op.lock().await;
        let _progress = Progress::begin(&self.store, StoreAction::SetVideoInProgress);

        if let Some(producer) = self.take_slot(&self.webcam) {
            self.close_producer_remote(producer).await;
        }
        if let Some(effect) = &self.effect {
            effect.destroy();
        }
        Ok(())
    }

    // -- extra video -------------------------------------------------------

    pub async fn add_extra_video(self: &Arc<Self>, device_id: &str) -> ClientResult<()> {
        let _op = self.extra_op.lock().await;
        let _progress = Progress::begin(&self.store, StoreAction::SetVideoInProgress);

        if !self.devices.can_produce(MediaKind::Video) {
            return Err(ClientError::DeviceCapability(MediaKind::Video));
        }

        let constraints = self.video_constraints(Some(device_id.to_string()));
        let track = self.source.acquire_video(&constraints).await?;

        if self.track_label_in_use(&track.label()) {
            track.stop();
            return Err(ClientError::InvalidArgument(format!(
                "video device {device_id} is already shared"
            )));
        }

        let encodings = self.video_producer_encodings(
            &track.settings(),
            &constraints,
            self.config.network_priorities.extra_video,
        );

        let codec_options = ProducerCodecOptions {
            video_google_start_bitrate: Some(VIDEO_GOOGLE_START_BITRATE),
            ..ProducerCodecOptions::default()
        };

        let producer = self
            .produce(ProducerSource::ExtraVideo, track, encodings, codec_options, None)
            .await?;
        self.extra_videos
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(producer.id.clone(), producer);
        Ok(())
    }

    pub async fn disable_extra_video(&self, producer_id: &str) -> ClientResult<()> {
        let _op = self.extra_op.lock().await;
        let producer = self
            .extra_videos
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(producer_id)
            .ok_or_else(|| ClientError::NotFound(format!("extra video {producer_id}")))?;
        self.close_producer_remote(producer).await;
        Ok(())
    }

    // -- screen sharing ----------------------------------------------------

    pub async fn update_screen_sharing(
        self: &Arc<Self>,
        update: ScreenSharingUpdate,
    ) -> ClientResult<()> {
        let _op = self.screen_op.lock().await;
        let _progress = Progress::begin(&self.store, StoreAction::SetScreenSharingInProgress);

        if !self.devices.can_produce(MediaKind::Video) {
            return Err(ClientError::DeviceCapability(MediaKind::Video));
        }

        if update.new_resolution.is_some() || update.new_frame_rate.is_some() {
            let mut settings = self.store.with(|s| s.settings.clone());
            if let Some(resolution) = update.new_resolution {
                settings.screen_sharing_resolution = resolution;
            }
            if let Some(frame_rate) = update.new_frame_rate {
                settings.screen_sharing_frame_rate = frame_rate;
            }
            self.store.dispatch(StoreAction::SetSettings(Box::new(settings)));
        }

        if !update.start {
            if let Some((_, handle)) = self.slot_ref(&self.screen) {
                let constraints = self.screen_constraints();
                handle.track().apply_constraints(&constraints).await?;
            }
            return Ok(());
        }

        if let Some(producer) = self.take_slot(&self.screen) {
            self.close_producer_remote(producer).await;
        }
        if let Some(producer) = self.take_slot(&self.screen_audio) {
            self.close_producer_remote(producer).await;
        }

        let constraints = self.screen_constraints();
        let capture = self.source.acquire_screen(&constraints).await?;

        let encodings = if self.config.simulcast_sharing {
            let settings = capture.video.settings();
            let width = settings.width.unwrap_or(constraints.width);
            let height = settings.height.unwrap_or(constraints.height);
            let mut encodings = encodings::screen_sharing_encodings(
                self.devices.first_video_codec_is_vp9(),
                &self.config.simulcast_profiles,
                width,
                height,
            );
            if let Some(first) = encodings.first_mut() {
                first.network_priority = Some(self.config.network_priorities.screen_share);
            }
            encodings
        } else {
            vec![RtpEncoding {
                network_priority: Some(self.config.network_priorities.screen_share),
                ..RtpEncoding::default()
            }]
        };

        let codec_options = ProducerCodecOptions {
            video_google_start_bitrate: Some(VIDEO_GOOGLE_START_BITRATE),
            ..ProducerCodecOptions::default()
        };

        let producer = self
            .produce(ProducerSource::Screen, capture.video, encodings, codec_options, None)
            .await?;
        self.put_slot(&self.screen, producer);

        if let Some(audio_track) = capture.audio {
            let audio = self.store.with(|s| s.settings.audio.clone());
            let codec_options = ProducerCodecOptions {
                opus_stereo: Some(audio.opus_stereo),
                opus_fec: Some(audio.opus_fec),
                opus_dtx: Some(audio.opus_dtx),
                opus_max_playback_rate: Some(audio.opus_max_playback_rate),
                opus_ptime: Some(audio.opus_ptime),
                ..ProducerCodecOptions::default()
            };
            // Produced as source "mic" so the SFU mixes it into audio
            // spotlighting; tracked locally as the screen-audio producer and
            // monitored at zero volume.
            let producer = self
                .produce(
                    ProducerSource::ScreenAudio,
                    audio_track,
                    Vec::new(),
                    codec_options,
                    Some(0.0),
                )
                .await?;
            self.put_slot(&self.screen_audio, producer);
        }

        info!("screen sharing started");
        Ok(())
    }

    pub async fn disable_screen_sharing(&self) -> ClientResult<()> {
        let _op = self.screen_op.lock().await;
        let _progress = Progress::begin(&self.store, StoreAction::SetScreenSharingInProgress);

        if let Some(producer) = self.take_slot(&self.screen) {
            self.close_producer_remote(producer).await;
        }
        if let Some(producer) = self.take_slot(&self.screen_audio) {
            self.close_producer_remote(producer).await;
        }
        Ok(())
    }

    // -- teardown ----------------------------------------------------------

    /// Close every producer locally without telling the SFU; used when the
    /// signaling channel dropped or the room is closing.
    pub fn teardown(&self) {
        for slot in [&self.mic, &self.webcam, &self.screen, &self.screen_audio] {
            if let Some(producer) = self.take_slot(slot) {
                producer.handle.close();
            }
        }
        for (_, producer) in
            self.extra_videos.lock().unwrap_or_else(|e| e.into_inner()).drain()
        {
            producer.handle.close();
        }
        self.stop_speaking_detection();
        self.store.dispatch(StoreAction::ClearProducers);
        self.store.dispatch(StoreAction::SetSpeaking(false));
        self.store.dispatch(StoreAction::SetMyVolume(None));
    }

    pub fn has_mic(&self) -> bool {
        self.mic.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    // -- internals ---------------------------------------------------------

    async fn produce(
        &self,
        source: ProducerSource,
        track: Arc<dyn super::MediaTrack>,
        encodings: Vec<RtpEncoding>,
        codec_options: ProducerCodecOptions,
        volume: Option<f64>,
    ) -> ClientResult<Producer> {
        let transport = self.devices.send_transport()?;
        let track_label = track.label();

        // video producers advertise their capture size and scale-down
        // ladder so receivers can pick layers without probing
        let app_data = if track.kind() == MediaKind::Video {
            let settings = track.settings();
            ProducerAppData {
                source: source.wire_source(),
                width: settings.width,
                height: settings.height,
                resolution_scalings: Some(encodings::resolution_scalings(&encodings)),
            }
        } else {
            ProducerAppData {
                source: source.wire_source(),
                width: None,
                height: None,
                resolution_scalings: None,
            }
        };

        let handle = transport
            .produce(ProduceOptions { track, encodings, codec_options })
            .await?;

        let response: ProduceResponse = self
            .signaling
            .request_as(RoomRequest::Produce {
                transport_id: transport.id(),
                kind: handle.kind(),
                rtp_parameters: handle.rtp_parameters(),
                app_data,
            })
            .await
            .map_err(|error| {
                // never leave a half-registered producer behind
                handle.close();
                error
            })?;

        self.store.dispatch(StoreAction::AddProducer(ProducerState {
            id: response.id.clone(),
            source,
            kind: handle.kind(),
            paused: false,
            track_label: Some(track_label),
            codec: None,
            score: Vec::new(),
            volume,
        }));

        Ok(Producer { id: response.id, source, handle })
    }

    /// Close locally and tell the SFU; `closeProducer` is sent exactly once.
    async fn close_producer_remote(&self, producer: Producer) {
        producer.handle.close();
        self.store.dispatch(StoreAction::RemoveProducer { producer_id: producer.id.clone() });
        if let Err(error) = self
            .signaling
            .request(RoomRequest::CloseProducer { producer_id: producer.id.clone() })
            .await
        {
            debug!("closeProducer {} failed: {}", producer.id, error);
        } else {
            debug!("{:?} producer {} closed", producer.source, producer.id);
        }
    }

    fn video_constraints(&self, device_id: Option<String>) -> VideoConstraints {
        self.store.with(|s| VideoConstraints {
            device_id: device_id.or_else(|| s.settings.selected_webcam.clone()),
            width: s.settings.resolution.width(),
            height: s.settings.resolution.height(),
            frame_rate: s.settings.frame_rate,
        })
    }

    fn screen_constraints(&self) -> VideoConstraints {
        self.store.with(|s| VideoConstraints {
            device_id: None,
            width: s.settings.screen_sharing_resolution.width(),
            height: s.settings.screen_sharing_resolution.height(),
            frame_rate: s.settings.screen_sharing_frame_rate,
        })
    }

    fn video_producer_encodings(
        &self,
        settings: &super::TrackSettings,
        constraints: &VideoConstraints,
        priority: crate::config::NetworkPriority,
    ) -> Vec<RtpEncoding> {
        let width = settings.width.unwrap_or(constraints.width);
        let height = settings.height.unwrap_or(constraints.height);

        let mut list = if self.config.simulcast {
            encodings::video_encodings(
                self.devices.first_video_codec_is_vp9(),
                &self.config.simulcast_profiles,
                width,
                height,
            )
        } else {
            vec![RtpEncoding::default()]
        };

        if let Some(first) = list.first_mut() {
            first.network_priority = Some(priority);
        }
        list
    }

    fn track_label_in_use(&self, label: &str) -> bool {
        let same = |slot: &StdMutex<Option<Producer>>| {
            slot.lock()
                .unwrap_or_else(|e| e.into_inner())
                .as_ref()
                .map(|p| p.handle.track().label() == label)
                .unwrap_or(false)
        };
        same(&self.webcam)
            || self
                .extra_videos
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .values()
                .any(|p| p.handle.track().label() == label)
    }

    fn take_slot(&self, slot: &StdMutex<Option<Producer>>) -> Option<Producer> {
        slot.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    fn put_slot(&self, slot: &StdMutex<Option<Producer>>, producer: Producer) {
        *slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(producer);
    }

    fn slot_ref(&self, slot: &StdMutex<Option<Producer>>) -> Option<(String, Arc<dyn ProducerHandle>)> {
        slot.lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|p| (p.id.clone(), p.handle.clone()))
    }

    // -- speaking detection ------------------------------------------------

    fn start_speaking_detection(self: &Arc<Self>, producer: &Producer) {
        self.stop_speaking_detection();

        let mut events = self.vad.attach(producer.handle.track());
        let registry = self.clone();
        let handle = producer.handle.clone();

        let task = tokio::spawn(async move {
            let mut machine = SpeakingMachine::new();
            let mut published: Option<i16> = None;

            while let Some(event) = events.recv().await {
                let voice_activated =
                    registry.store.with(|s| s.settings.voice_activated_unmute);
                let update = machine.on_event(event, voice_activated, handle.paused());

                if let Some(volume) = update.volume {
                    let rounded = crate::speaking::rounded_db(volume);
                    if published != Some(rounded) {
                        published = Some(rounded);
                        registry.store.dispatch(StoreAction::SetMyVolume(Some(rounded)));
                    }
                }
                if let Some(speaking) = update.speaking {
                    registry.store.dispatch(StoreAction::SetSpeaking(speaking));
                }
                match update.mic {
                    Some(MicCommand::Resume) => {
                        if let Err(error) = registry.unmute_mic().await {
                            warn!("voice-activated unmute failed: {}", error);
                        }
                    }
                    Some(MicCommand::PauseAuto) => {
                        registry.store.dispatch(StoreAction::SetAutoMuted(true));
                        if let Err(error) = registry.mute_mic().await {
                            warn!("voice-activated mute failed: {}", error);
                        }
                    }
                    None => {}
                }
            }
        });

        *self.speaking_task.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);
    }

    fn stop_speaking_detection(&self) {
        if let Some(task) = self.speaking_task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ConnectionState;
    use crate::testing::{
        FakeDevice, FakeMediaSource, FakeSignalingTransport, FakeVad, FakeVideoEffect,
    };
    use crate::store::BrowserInfo;
    use serde_json::json;

    struct Env {
        registry: Arc<ProducerRegistry>,
        store: Store,
        signaling: Arc<FakeSignalingTransport>,
        device: Arc<FakeDevice>,
        source: Arc<FakeMediaSource>,
        vad: Arc<FakeVad>,
        effect: Arc<FakeVideoEffect>,
    }

    async fn setup() -> Env {
        let signaling_transport = FakeSignalingTransport::with_defaults();
        let config = Arc::new(ClientConfig::default());
        let session = Arc::new(SignalingSession::new(signaling_transport.clone(), &config));
        let device = FakeDevice::new();
        let devices = Arc::new(DeviceManager::new(device.clone(), session.clone()));
        devices
            .create_transports(true, false, &[], &BrowserInfo::default())
            .await
            .unwrap();

        let store = Store::new();
        store.dispatch(StoreAction::SetRoomState(ConnectionState::Connected));
        let source = FakeMediaSource::new();
        let vad = FakeVad::new();
        let effect = FakeVideoEffect::new();

        let registry = ProducerRegistry::new(
            config,
            store.clone(),
            session,
            devices,
            source.clone(),
            vad.clone(),
            Some(effect.clone()),
        );

        Env { registry, store, signaling: signaling_transport, device, source, vad, effect }
    }

    fn send_transport(env: &Env) -> Arc<crate::testing::FakeMediaTransport> {
        env.device.latest_send_transport().expect("send transport")
    }

    #[tokio::test]
    async fn update_mic_produces_with_opus_options_and_mic_source() {
        let env = setup().await;
        env.registry.update_mic(MicUpdate { start: true, ..MicUpdate::default() }).await.unwrap();

        let produce = env.signaling.last_request("produce").expect("produce sent");
        assert_eq!(produce["data"]["appData"]["source"], "mic");
        assert_eq!(produce["data"]["kind"], "audio");

        let records = send_transport(&env).produce_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].codec_options.opus_fec, Some(true));
        assert_eq!(records[0].codec_options.opus_ptime, Some(20));

        env.store.with(|s| {
            assert_eq!(s.producers.len(), 1);
            assert!(!s.me.audio_in_progress);
        });
        assert_eq!(env.vad.attached_count(), 1);
    }

    #[tokio::test]
    async fn device_change_without_restart_fails_untouched() {
        let env = setup().await;
        env.registry.update_mic(MicUpdate { start: true, ..MicUpdate::default() }).await.unwrap();

        let error = env
            .registry
            .update_mic(MicUpdate {
                new_device_id: Some("usb-mic".into()),
                ..MicUpdate::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(error, ClientError::InvalidArgument(_)));

        // the existing producer survives and the flag is cleared
        assert!(env.registry.has_mic());
        assert_eq!(env.source.audio_acquisitions.load(std::sync::atomic::Ordering::SeqCst), 1);
        env.store.with(|s| assert!(!s.me.audio_in_progress));
    }

    #[tokio::test]
    async fn mute_then_unmute_keeps_a_single_producer() {
        let env = setup().await;
        env.registry.update_mic(MicUpdate { start: true, ..MicUpdate::default() }).await.unwrap();

        env.registry.mute_mic().await.unwrap();
        assert_eq!(env.signaling.request_count("pauseProducer"), 1);
        env.store.with(|s| {
            assert!(s.producers.values().next().unwrap().paused);
        });

        env.registry.unmute_mic().await.unwrap();
        assert_eq!(env.signaling.request_count("resumeProducer"), 1);
        // no second producer was created
        assert_eq!(env.signaling.request_count("produce"), 1);
        env.store.with(|s| {
            assert_eq!(s.producers.len(), 1);
            assert!(!s.producers.values().next().unwrap().paused);
        });
    }

    #[tokio::test]
    async fn unmute_without_producer_starts_one() {
        let env = setup().await;
        env.registry.unmute_mic().await.unwrap();
        assert_eq!(env.signaling.request_count("produce"), 1);
        assert!(env.registry.has_mic());
    }

    #[tokio::test]
    async fn webcam_uses_simulcast_ladder_with_priority_on_first() {
        let env = setup().await;
        env.registry
            .update_webcam(WebcamUpdate { start: true, ..WebcamUpdate::default() })
            .await
            .unwrap();

        let records = send_transport(&env).produce_records();
        assert_eq!(records.len(), 1);
        // default settings: 640 wide -> two simulcast steps
        assert_eq!(records[0].encodings.len(), 2);
        assert!(records[0].encodings[0].network_priority.is_some());
        assert!(records[0].encodings[1].network_priority.is_none());
        assert_eq!(
            records[0].codec_options.video_google_start_bitrate,
            Some(VIDEO_GOOGLE_START_BITRATE)
        );

        let produce = env.signaling.last_request("produce").unwrap();
        assert_eq!(produce["data"]["appData"]["source"], "webcam");
        // 640-wide ladder: explicit scale factors 2 and 1
        assert_eq!(produce["data"]["appData"]["resolutionScalings"], json!([2.0, 1.0]));
        assert_eq!(produce["data"]["appData"]["width"], 640);
    }

    #[tokio::test]
    async fn webcam_restart_replaces_producer_and_closes_old() {
        let env = setup().await;
        env.registry
            .update_webcam(WebcamUpdate { start: true, ..WebcamUpdate::default() })
            .await
            .unwrap();
        env.registry
            .update_webcam(WebcamUpdate {
                restart: true,
                new_device_id: Some("cam-2".into()),
                ..WebcamUpdate::default()
            })
            .await
            .unwrap();

        assert_eq!(env.signaling.request_count("closeProducer"), 1);
        assert_eq!(env.signaling.request_count("produce"), 2);
        env.store.with(|s| assert_eq!(s.producers.len(), 1));
    }

    #[tokio::test]
    async fn virtual_background_pipes_webcam_track() {
        let env = setup().await;
        let mut settings = env.store.with(|s| s.settings.clone());
        settings.virtual_background_enabled = true;
        env.store.dispatch(StoreAction::SetSettings(Box::new(settings)));

        env.registry
            .update_webcam(WebcamUpdate { start: true, ..WebcamUpdate::default() })
            .await
            .unwrap();

        assert_eq!(env.effect.piped.load(std::sync::atomic::Ordering::SeqCst), 1);
        let records = send_transport(&env).produce_records();
        assert!(records[0].track_label.starts_with("vbg:"));

        env.registry.disable_webcam().await.unwrap();
        assert!(env.effect.destroyed.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn extra_video_rejects_duplicate_track_label() {
        let env = setup().await;
        env.registry
            .update_webcam(WebcamUpdate {
                start: true,
                restart: true,
                new_device_id: Some("cam-1".into()),
                ..WebcamUpdate::default()
            })
            .await
            .unwrap();

        let error = env.registry.add_extra_video("cam-1").await.unwrap_err();
        assert!(matches!(error, ClientError::InvalidArgument(_)));
        // only the webcam produce went out
        assert_eq!(env.signaling.request_count("produce"), 1);

        env.registry.add_extra_video("cam-2").await.unwrap();
        assert_eq!(env.signaling.request_count("produce"), 2);
    }

    #[tokio::test]
    async fn screen_sharing_audio_is_tagged_mic_and_muted_locally() {
        let env = setup().await;
        env.source.screen_has_audio.store(true, std::sync::atomic::Ordering::SeqCst);
        env.registry
            .update_screen_sharing(ScreenSharingUpdate { start: true, ..Default::default() })
            .await
            .unwrap();

        let produces = env.signaling.requests_for("produce");
        assert_eq!(produces.len(), 2);
        assert_eq!(produces[0]["data"]["appData"]["source"], "screen");
        // screen audio goes out tagged as mic
        assert_eq!(produces[1]["data"]["appData"]["source"], "mic");

        env.store.with(|s| {
            let screen_audio = s
                .producers
                .values()
                .find(|p| p.source == ProducerSource::ScreenAudio)
                .expect("screen audio tracked distinctly");
            assert_eq!(screen_audio.volume, Some(0.0));
        });
    }

    #[tokio::test]
    async fn voice_activated_unmute_resumes_paused_mic() {
        let env = setup().await;
        env.store.dispatch(StoreAction::SetVoiceActivatedUnmute(true));
        env.registry.update_mic(MicUpdate { start: true, ..MicUpdate::default() }).await.unwrap();
        env.registry.mute_mic().await.unwrap();

        env.vad.emit_last(VolumeEvent::Speaking);
        // let the detection task run
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert_eq!(env.signaling.request_count("resumeProducer"), 1);
        env.store.with(|s| {
            assert!(s.me.speaking);
            assert!(!s.me.auto_muted);
        });

        env.vad.emit_last(VolumeEvent::StoppedSpeaking);
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert_eq!(env.signaling.request_count("pauseProducer"), 2);
        env.store.with(|s| assert!(s.me.auto_muted));
    }

    #[tokio::test]
    async fn teardown_stops_tracks_without_signaling() {
        let env = setup().await;
        env.registry.update_mic(MicUpdate { start: true, ..MicUpdate::default() }).await.unwrap();
        env.registry
            .update_webcam(WebcamUpdate { start: true, ..WebcamUpdate::default() })
            .await
            .unwrap();
        let before = env.signaling.request_count("closeProducer");

        env.registry.teardown();

        assert_eq!(env.signaling.request_count("closeProducer"), before);
        env.store.with(|s| assert!(s.producers.is_empty()));
        let transport = send_transport(&env);
        let producers = transport.producers.lock().unwrap();
        assert!(producers.iter().all(|p| p.closed()));
    }
}
