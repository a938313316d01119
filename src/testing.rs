#![forbid(unsafe_code)]

// Shared test doubles for the external collaborators: signaling transport,
// SFU device library, capture stack, voice-activity detection.

use crate::device::{
    ConsumeOptions, ConsumerHandle, IceTransportPolicy, MediaDevice, MediaTransport,
    ProduceOptions, ProducerHandle, TransportConnectionState, TransportOptions,
};
use crate::error::{ClientError, ClientResult};
use crate::media::encodings::RtpEncoding;
use crate::media::{
    AudioConstraints, MediaSource, MediaTrack, ProducerCodecOptions, ScreenCapture, TrackSettings,
    VideoConstraints, VideoEffect,
};
use crate::signaling::transport::{SignalingTransport, TransportError};
use crate::speaking::{VoiceActivityDetector, VolumeEvent, VolumeEvents};
use async_trait::async_trait;
use mediasoup::data_structures::DtlsRole;
use mediasoup::prelude::*;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use tokio::sync::{mpsc, watch};

// ---------------------------------------------------------------------------
// Signaling transport

enum NextBehavior {
    Fail(fn() -> TransportError),
    Hang,
}

/// Scripted signaling transport: records every emitted envelope and answers
/// from canned per-method responses, with one-shot failure/hang injection.
pub struct FakeSignalingTransport {
    requests: StdMutex<Vec<Value>>,
    overrides: StdMutex<HashMap<String, Value>>,
    next: StdMutex<HashMap<String, VecDeque<NextBehavior>>>,
    transport_counter: AtomicUsize,
    producer_counter: AtomicUsize,
}

impl FakeSignalingTransport {
    pub fn with_defaults() -> Arc<Self> {
        Arc::new(Self {
            requests: StdMutex::new(Vec::new()),
            overrides: StdMutex::new(HashMap::new()),
            next: StdMutex::new(HashMap::new()),
            transport_counter: AtomicUsize::new(0),
            producer_counter: AtomicUsize::new(0),
        })
    }

    pub fn respond_to(&self, method: &str, response: Value) {
        self.overrides
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(method.to_string(), response);
    }

    pub fn fail_next(&self, method: &str, make: fn() -> TransportError) {
        self.next
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(method.to_string())
            .or_default()
            .push_back(NextBehavior::Fail(make));
    }

    pub fn hang_next(&self, method: &str) {
        self.next
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(method.to_string())
            .or_default()
            .push_back(NextBehavior::Hang);
    }

    pub fn all_requests(&self) -> Vec<Value> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn requests_for(&self, method: &str) -> Vec<Value> {
        self.all_requests()
            .into_iter()
            .filter(|req| req["method"] == method)
            .collect()
    }

    pub fn request_count(&self, method: &str) -> usize {
        self.requests_for(method).len()
    }

    pub fn last_request(&self, method: &str) -> Option<Value> {
        self.requests_for(method).pop()
    }

    fn default_response(&self, method: &str) -> Value {
        match method {
            "getRouterRtpCapabilities" => json!({"codecs": [], "headerExtensions": []}),
            "createWebRtcTransport" => {
                let n = self.transport_counter.fetch_add(1, Ordering::SeqCst) + 1;
                json!({
                    "id": format!("transport-{n}"),
                    "iceParameters": ice_parameters_json(),
                    "iceCandidates": [],
                    "dtlsParameters": {"role": "auto", "fingerprints": []},
                })
            }
            "restartIce" => json!({"iceParameters": ice_parameters_json()}),
            "produce" => {
                let n = self.producer_counter.fetch_add(1, Ordering::SeqCst) + 1;
                json!({"id": format!("producer-{n}")})
            }
            _ => json!({}),
        }
    }
}

fn ice_parameters_json() -> Value {
    json!({"usernameFragment": "uf", "password": "pw", "iceLite": true})
}

#[async_trait]
impl SignalingTransport for FakeSignalingTransport {
    async fn emit(&self, payload: Value) -> Result<Value, TransportError> {
        let method = payload["method"].as_str().unwrap_or("unknown").to_string();
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).push(payload);

        let behavior = self
            .next
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(&method)
            .and_then(VecDeque::pop_front);

        match behavior {
            Some(NextBehavior::Fail(make)) => return Err(make()),
            Some(NextBehavior::Hang) => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            None => {}
        }

        let canned = self
            .overrides
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&method)
            .cloned();
        Ok(canned.unwrap_or_else(|| self.default_response(&method)))
    }

    fn close(&self) {}
}

// ---------------------------------------------------------------------------
// Media tracks and capture

pub struct FakeMediaTrack {
    id: String,
    kind: MediaKind,
    label: String,
    stopped: AtomicBool,
    settings: StdMutex<TrackSettings>,
}

static TRACK_COUNTER: AtomicUsize = AtomicUsize::new(0);

impl FakeMediaTrack {
    fn next_id() -> String {
        format!("track-{}", TRACK_COUNTER.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn audio(label: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: Self::next_id(),
            kind: MediaKind::Audio,
            label: label.into(),
            stopped: AtomicBool::new(false),
            settings: StdMutex::new(TrackSettings::default()),
        })
    }

    pub fn video(label: impl Into<String>, width: u32, height: u32) -> Arc<Self> {
        Arc::new(Self {
            id: Self::next_id(),
            kind: MediaKind::Video,
            label: label.into(),
            stopped: AtomicBool::new(false),
            settings: StdMutex::new(TrackSettings {
                device_id: None,
                width: Some(width),
                height: Some(height),
                frame_rate: None,
            }),
        })
    }

    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaTrack for FakeMediaTrack {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn label(&self) -> String {
        self.label.clone()
    }

    fn settings(&self) -> TrackSettings {
        self.settings.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn ended(&self) -> bool {
        self.stopped()
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    async fn apply_constraints(&self, constraints: &VideoConstraints) -> ClientResult<()> {
        let mut settings = self.settings.lock().unwrap_or_else(|e| e.into_inner());
        settings.width = Some(constraints.width);
        settings.height = Some(constraints.height);
        settings.frame_rate = Some(constraints.frame_rate);
        Ok(())
    }
}

/// Scripted capture stack.
pub struct FakeMediaSource {
    pub fail_audio: AtomicBool,
    pub fail_video: AtomicBool,
    pub screen_has_audio: AtomicBool,
    pub audio_acquisitions: AtomicUsize,
    pub video_acquisitions: AtomicUsize,
    pub screen_acquisitions: AtomicUsize,
    pub last_audio_constraints: StdMutex<Option<AudioConstraints>>,
    pub last_video_constraints: StdMutex<Option<VideoConstraints>>,
}

impl FakeMediaSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            fail_audio: AtomicBool::new(false),
            fail_video: AtomicBool::new(false),
            screen_has_audio: AtomicBool::new(false),
            audio_acquisitions: AtomicUsize::new(0),
            video_acquisitions: AtomicUsize::new(0),
            screen_acquisitions: AtomicUsize::new(0),
            last_audio_constraints: StdMutex::new(None),
            last_video_constraints: StdMutex::new(None),
        })
    }
}

#[async_trait]
impl MediaSource for FakeMediaSource {
    async fn acquire_audio(
        &self,
        constraints: &AudioConstraints,
    ) -> ClientResult<Arc<dyn MediaTrack>> {
        if self.fail_audio.load(Ordering::SeqCst) {
            return Err(ClientError::MediaAcquisition("audio denied".into()));
        }
        self.audio_acquisitions.fetch_add(1, Ordering::SeqCst);
        *self.last_audio_constraints.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(constraints.clone());
        let device = constraints.device_id.clone().unwrap_or_else(|| "default".into());
        Ok(FakeMediaTrack::audio(format!("mic:{device}")))
    }

    async fn acquire_video(
        &self,
        constraints: &VideoConstraints,
    ) -> ClientResult<Arc<dyn MediaTrack>> {
        if self.fail_video.load(Ordering::SeqCst) {
            return Err(ClientError::MediaAcquisition("video denied".into()));
        }
        self.video_acquisitions.fetch_add(1, Ordering::SeqCst);
        *self.last_video_constraints.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(constraints.clone());
        let device = constraints.device_id.clone().unwrap_or_else(|| "default".into());
        Ok(FakeMediaTrack::video(format!("cam:{device}"), constraints.width, constraints.height))
    }

    async fn acquire_screen(&self, constraints: &VideoConstraints) -> ClientResult<ScreenCapture> {
        self.screen_acquisitions.fetch_add(1, Ordering::SeqCst);
        let audio = if self.screen_has_audio.load(Ordering::SeqCst) {
            Some(FakeMediaTrack::audio("screen-audio") as Arc<dyn MediaTrack>)
        } else {
            None
        };
        Ok(ScreenCapture {
            video: FakeMediaTrack::video("screen", constraints.width, constraints.height),
            audio,
        })
    }
}

/// Virtual-background stand-in: re-labels the track.
pub struct FakeVideoEffect {
    pub piped: AtomicUsize,
    pub destroyed: AtomicBool,
}

impl FakeVideoEffect {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { piped: AtomicUsize::new(0), destroyed: AtomicBool::new(false) })
    }
}

#[async_trait]
impl VideoEffect for FakeVideoEffect {
    async fn pipe(&self, track: Arc<dyn MediaTrack>) -> ClientResult<Arc<dyn MediaTrack>> {
        self.piped.fetch_add(1, Ordering::SeqCst);
        let settings = track.settings();
        Ok(FakeMediaTrack::video(
            format!("vbg:{}", track.label()),
            settings.width.unwrap_or(640),
            settings.height.unwrap_or(360),
        ))
    }

    fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Device and transports

pub struct FakeProducerHandle {
    kind: MediaKind,
    track: Arc<dyn MediaTrack>,
    paused: AtomicBool,
    closed: AtomicBool,
}

impl FakeProducerHandle {
    fn new(track: Arc<dyn MediaTrack>) -> Arc<Self> {
        Arc::new(Self {
            kind: track.kind(),
            track,
            paused: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }
}

impl ProducerHandle for FakeProducerHandle {
    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn rtp_parameters(&self) -> RtpParameters {
        RtpParameters::default()
    }

    fn track(&self) -> Arc<dyn MediaTrack> {
        self.track.clone()
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    fn paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.track.stop();
    }

    fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct FakeConsumerHandle {
    pub id: String,
    track: Arc<dyn MediaTrack>,
    closed: AtomicBool,
}

impl FakeConsumerHandle {
    pub fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl ConsumerHandle for FakeConsumerHandle {
    fn track(&self) -> Arc<dyn MediaTrack> {
        self.track.clone()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.track.stop();
    }
}

#[derive(Clone)]
pub struct ProduceRecord {
    pub track_label: String,
    pub encodings: Vec<RtpEncoding>,
    pub codec_options: ProducerCodecOptions,
}

#[derive(Clone)]
pub struct ConsumeRecord {
    pub id: String,
    pub peer_id: String,
    pub kind: MediaKind,
    pub rtp_inspection: bool,
}

pub struct FakeMediaTransport {
    id: String,
    state_tx: watch::Sender<TransportConnectionState>,
    pub producers: StdMutex<Vec<Arc<FakeProducerHandle>>>,
    pub consumers: StdMutex<Vec<Arc<FakeConsumerHandle>>>,
    produce_log: StdMutex<Vec<ProduceRecord>>,
    consume_log: StdMutex<Vec<ConsumeRecord>>,
    ice_restarts: AtomicUsize,
    pub fail_produce: AtomicBool,
    closed: AtomicBool,
}

impl FakeMediaTransport {
    pub fn new(id: impl Into<String>) -> Self {
        let (state_tx, _) = watch::channel(TransportConnectionState::New);
        Self {
            id: id.into(),
            state_tx,
            producers: StdMutex::new(Vec::new()),
            consumers: StdMutex::new(Vec::new()),
            produce_log: StdMutex::new(Vec::new()),
            consume_log: StdMutex::new(Vec::new()),
            ice_restarts: AtomicUsize::new(0),
            fail_produce: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn set_connection_state(&self, state: TransportConnectionState) {
        self.state_tx.send_replace(state);
    }

    pub fn ice_restart_count(&self) -> usize {
        self.ice_restarts.load(Ordering::SeqCst)
    }

    pub fn produce_records(&self) -> Vec<ProduceRecord> {
        self.produce_log.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn consume_records(&self) -> Vec<ConsumeRecord> {
        self.consume_log.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaTransport for FakeMediaTransport {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn dtls_parameters(&self) -> DtlsParameters {
        DtlsParameters { role: DtlsRole::Client, fingerprints: vec![] }
    }

    async fn produce(&self, options: ProduceOptions) -> ClientResult<Arc<dyn ProducerHandle>> {
        if self.fail_produce.load(Ordering::SeqCst) {
            return Err(ClientError::Device("produce failed".into()));
        }
        self.produce_log.lock().unwrap_or_else(|e| e.into_inner()).push(ProduceRecord {
            track_label: options.track.label(),
            encodings: options.encodings.clone(),
            codec_options: options.codec_options,
        });
        let handle = FakeProducerHandle::new(options.track);
        self.producers.lock().unwrap_or_else(|e| e.into_inner()).push(handle.clone());
        Ok(handle)
    }

    async fn consume(&self, options: ConsumeOptions) -> ClientResult<Arc<dyn ConsumerHandle>> {
        self.consume_log.lock().unwrap_or_else(|e| e.into_inner()).push(ConsumeRecord {
            id: options.id.clone(),
            peer_id: options.peer_id.clone(),
            kind: options.kind,
            rtp_inspection: options.enable_rtp_inspection,
        });
        let track: Arc<dyn MediaTrack> = match options.kind {
            MediaKind::Audio => FakeMediaTrack::audio(format!("consumer:{}", options.id)),
            MediaKind::Video => FakeMediaTrack::video(format!("consumer:{}", options.id), 1280, 720),
        };
        let handle = Arc::new(FakeConsumerHandle {
            id: options.id,
            track,
            closed: AtomicBool::new(false),
        });
        self.consumers.lock().unwrap_or_else(|e| e.into_inner()).push(handle.clone());
        Ok(handle)
    }

    async fn restart_ice(&self, _ice_parameters: IceParameters) -> ClientResult<()> {
        self.ice_restarts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn connection_state(&self) -> watch::Receiver<TransportConnectionState> {
        self.state_tx.subscribe()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub struct FakeDevice {
    loaded: AtomicBool,
    loaded_caps: StdMutex<Option<RtpCapabilitiesFinalized>>,
    pub can_audio: AtomicBool,
    pub can_video: AtomicBool,
    pub vp9_first: AtomicBool,
    pub send_transports: StdMutex<Vec<Arc<FakeMediaTransport>>>,
    pub recv_transports: StdMutex<Vec<Arc<FakeMediaTransport>>>,
    last_policy: StdMutex<Option<IceTransportPolicy>>,
}

impl FakeDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            loaded: AtomicBool::new(false),
            loaded_caps: StdMutex::new(None),
            can_audio: AtomicBool::new(true),
            can_video: AtomicBool::new(true),
            vp9_first: AtomicBool::new(false),
            send_transports: StdMutex::new(Vec::new()),
            recv_transports: StdMutex::new(Vec::new()),
            last_policy: StdMutex::new(None),
        })
    }

    pub fn loaded_capabilities(&self) -> Option<RtpCapabilitiesFinalized> {
        self.loaded_caps.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn last_transport_policy(&self) -> Option<IceTransportPolicy> {
        *self.last_policy.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn latest_send_transport(&self) -> Option<Arc<FakeMediaTransport>> {
        self.send_transports.lock().unwrap_or_else(|e| e.into_inner()).last().cloned()
    }

    pub fn latest_recv_transport(&self) -> Option<Arc<FakeMediaTransport>> {
        self.recv_transports.lock().unwrap_or_else(|e| e.into_inner()).last().cloned()
    }
}

#[async_trait]
impl MediaDevice for FakeDevice {
    async fn load(&self, router_rtp_capabilities: RtpCapabilitiesFinalized) -> ClientResult<()> {
        *self.loaded_caps.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(router_rtp_capabilities);
        self.loaded.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    fn rtp_capabilities(&self) -> RtpCapabilities {
        let mut capabilities = RtpCapabilities::default();
        if self.vp9_first.load(Ordering::SeqCst) {
            capabilities.codecs.push(RtpCodecCapability::Video {
                mime_type: MimeTypeVideo::Vp9,
                preferred_payload_type: Some(98),
                clock_rate: NonZeroU32::new(90_000).expect("non-zero"),
                parameters: RtpCodecParametersParameters::default(),
                rtcp_feedback: vec![],
            });
        }
        capabilities
    }

    fn can_produce(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Audio => self.can_audio.load(Ordering::SeqCst),
            MediaKind::Video => self.can_video.load(Ordering::SeqCst),
        }
    }

    async fn create_send_transport(
        &self,
        options: TransportOptions,
    ) -> ClientResult<Arc<dyn MediaTransport>> {
        *self.last_policy.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(options.ice_transport_policy);
        let transport = Arc::new(FakeMediaTransport::new(options.id));
        self.send_transports.lock().unwrap_or_else(|e| e.into_inner()).push(transport.clone());
        Ok(transport)
    }

    async fn create_recv_transport(
        &self,
        options: TransportOptions,
    ) -> ClientResult<Arc<dyn MediaTransport>> {
        *self.last_policy.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(options.ice_transport_policy);
        let transport = Arc::new(FakeMediaTransport::new(options.id));
        self.recv_transports.lock().unwrap_or_else(|e| e.into_inner()).push(transport.clone());
        Ok(transport)
    }
}

// ---------------------------------------------------------------------------
// Voice activity

/// Detector double that exposes the sender side of every attached stream.
pub struct FakeVad {
    pub attached: StdMutex<Vec<(String, mpsc::UnboundedSender<VolumeEvent>)>>,
}

impl FakeVad {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { attached: StdMutex::new(Vec::new()) })
    }

    pub fn attached_count(&self) -> usize {
        self.attached.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Push an event into the most recently attached stream.
    pub fn emit_last(&self, event: VolumeEvent) {
        if let Some((_, tx)) = self.attached.lock().unwrap_or_else(|e| e.into_inner()).last() {
            let _ = tx.send(event);
        }
    }

    /// Push an event into the stream attached for a track label.
    pub fn emit_to(&self, label: &str, event: VolumeEvent) {
        let attached = self.attached.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((_, tx)) = attached.iter().rev().find(|(l, _)| l == label) {
            let _ = tx.send(event);
        }
    }
}

impl VoiceActivityDetector for FakeVad {
    fn attach(&self, track: Arc<dyn MediaTrack>) -> VolumeEvents {
        let (tx, rx) = mpsc::unbounded_channel();
        self.attached.lock().unwrap_or_else(|e| e.into_inner()).push((track.label(), tx));
        rx
    }
}
