#![forbid(unsafe_code)]

// Device and transport management - wraps the external SFU device library
// and owns the send/recv transport pair

pub mod ice;

pub use ice::IceRestartControl;

use crate::error::{ClientError, ClientResult};
use crate::media::{MediaTrack, ProducerCodecOptions};
use crate::media::encodings::RtpEncoding;
use crate::signaling::protocol::{
    IceServer, PeerId, RoomRequest, TransportCreated,
};
use crate::signaling::SignalingSession;
use crate::store::BrowserInfo;
use async_trait::async_trait;
use mediasoup::prelude::*;
use mediasoup::rtp_parameters::RtpHeaderExtensionUri;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Candidate gathering policy for a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IceTransportPolicy {
    #[default]
    All,
    /// TURN relay only. Forced for Firefox when TURN servers are configured.
    Relay,
}

/// Parameters for constructing a local transport against the SFU.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub id: String,
    pub ice_parameters: IceParameters,
    pub ice_candidates: Vec<IceCandidate>,
    pub dtls_parameters: DtlsParameters,
    pub ice_servers: Vec<IceServer>,
    pub ice_transport_policy: IceTransportPolicy,
}

/// Connection state of the underlying peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportConnectionState {
    #[default]
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Options for producing a local track.
pub struct ProduceOptions {
    pub track: Arc<dyn MediaTrack>,
    pub encodings: Vec<RtpEncoding>,
    pub codec_options: ProducerCodecOptions,
}

/// Options for consuming a remote producer, from the `newConsumer` payload.
pub struct ConsumeOptions {
    pub id: String,
    pub producer_id: String,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    pub peer_id: PeerId,
    /// Route the receiver through the opus inspection transform.
    pub enable_rtp_inspection: bool,
}

/// Local producer handle owned by the Producer Registry. Closing stops the
/// underlying track.
pub trait ProducerHandle: Send + Sync {
    fn kind(&self) -> MediaKind;
    fn rtp_parameters(&self) -> RtpParameters;
    fn track(&self) -> Arc<dyn MediaTrack>;
    fn pause(&self);
    fn resume(&self);
    fn paused(&self) -> bool;
    fn close(&self);
    fn closed(&self) -> bool;
}

/// Local consumer handle owned by the Consumer Registry.
pub trait ConsumerHandle: Send + Sync {
    fn track(&self) -> Arc<dyn MediaTrack>;
    fn close(&self);
}

/// One WebRTC peer connection to the SFU, send or recv role.
#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// Server-assigned transport id.
    fn id(&self) -> String;
    /// Local DTLS parameters for `connectWebRtcTransport`.
    fn dtls_parameters(&self) -> DtlsParameters;
    async fn produce(&self, options: ProduceOptions) -> ClientResult<Arc<dyn ProducerHandle>>;
    async fn consume(&self, options: ConsumeOptions) -> ClientResult<Arc<dyn ConsumerHandle>>;
    async fn restart_ice(&self, ice_parameters: IceParameters) -> ClientResult<()>;
    fn connection_state(&self) -> watch::Receiver<TransportConnectionState>;
    fn close(&self);
}

/// The external SFU device library ("mediasoup-client device" shaped).
#[async_trait]
pub trait MediaDevice: Send + Sync {
    async fn load(&self, router_rtp_capabilities: RtpCapabilitiesFinalized) -> ClientResult<()>;
    fn loaded(&self) -> bool;
    fn rtp_capabilities(&self) -> RtpCapabilities;
    fn can_produce(&self, kind: MediaKind) -> bool;
    async fn create_send_transport(
        &self,
        options: TransportOptions,
    ) -> ClientResult<Arc<dyn MediaTransport>>;
    async fn create_recv_transport(
        &self,
        options: TransportOptions,
    ) -> ClientResult<Arc<dyn MediaTransport>>;
}

struct TransportSlot {
    transport: Arc<dyn MediaTransport>,
    ice: IceRestartControl,
    monitor: JoinHandle<()>,
}

impl TransportSlot {
    fn shutdown(self) {
        self.monitor.abort();
        self.ice.cancel_pending();
        self.transport.close();
    }
}

/// Owns the device and the send/recv transport pair.
pub struct DeviceManager {
    device: Arc<dyn MediaDevice>,
    signaling: Arc<SignalingSession>,
    send: StdMutex<Option<TransportSlot>>,
    recv: StdMutex<Option<TransportSlot>>,
}

impl DeviceManager {
    pub fn new(device: Arc<dyn MediaDevice>, signaling: Arc<SignalingSession>) -> Self {
        Self { device, signaling, send: StdMutex::new(None), recv: StdMutex::new(None) }
    }

    /// Fetch router capabilities and load the device. The
    /// `urn:3gpp:video-orientation` extension is stripped first: rotation is
    /// applied locally, and advertising the extension breaks rotation on
    /// some mobile senders.
    pub async fn load(&self) -> ClientResult<()> {
        let mut capabilities: RtpCapabilitiesFinalized = self
            .signaling
            .request_as(RoomRequest::GetRouterRtpCapabilities)
            .await?;

        capabilities
            .header_extensions
            .retain(|ext| ext.uri != RtpHeaderExtensionUri::VideoOrientation);

        self.device.load(capabilities).await?;
        info!("device loaded");
        Ok(())
    }

    pub fn loaded(&self) -> bool {
        self.device.loaded()
    }

    pub fn rtp_capabilities(&self) -> RtpCapabilities {
        self.device.rtp_capabilities()
    }

    pub fn can_produce(&self, kind: MediaKind) -> bool {
        self.device.can_produce(kind)
    }

    /// True when the device negotiated VP9 as its first video codec.
    pub fn first_video_codec_is_vp9(&self) -> bool {
        self.device
            .rtp_capabilities()
            .codecs
            .iter()
            .find_map(|codec| match codec {
                RtpCodecCapability::Video { mime_type, .. } => {
                    Some(*mime_type == MimeTypeVideo::Vp9)
                }
                RtpCodecCapability::Audio { .. } => None,
            })
            .unwrap_or(false)
    }

    /// Create the transport pair: send only when producing, recv always.
    pub async fn create_transports(
        &self,
        produce: bool,
        force_tcp: bool,
        turn_servers: &[IceServer],
        browser: &BrowserInfo,
    ) -> ClientResult<()> {
        // Firefox needs relay-only candidates when TURN is available,
        // otherwise ICE against mediasoup stalls behind symmetric NATs.
        let policy = if browser.name.eq_ignore_ascii_case("firefox") && !turn_servers.is_empty() {
            IceTransportPolicy::Relay
        } else {
            IceTransportPolicy::All
        };

        if produce {
            let slot = self.create_transport(true, force_tcp, turn_servers, policy).await?;
            if let Some(old) = self.send.lock().unwrap_or_else(|e| e.into_inner()).replace(slot) {
                old.shutdown();
            }
        }

        let slot = self.create_transport(false, force_tcp, turn_servers, policy).await?;
        if let Some(old) = self.recv.lock().unwrap_or_else(|e| e.into_inner()).replace(slot) {
            old.shutdown();
        }

        Ok(())
    }

    async fn create_transport(
        &self,
        producing: bool,
        force_tcp: bool,
        turn_servers: &[IceServer],
        policy: IceTransportPolicy,
    ) -> ClientResult<TransportSlot> {
        let created: TransportCreated = self
            .signaling
            .request_as(RoomRequest::CreateWebRtcTransport {
                force_tcp,
                producing,
                consuming: !producing,
            })
            .await?;

        let options = TransportOptions {
            id: created.id,
            ice_parameters: created.ice_parameters,
            ice_candidates: created.ice_candidates,
            dtls_parameters: created.dtls_parameters,
            ice_servers: turn_servers.to_vec(),
            ice_transport_policy: policy,
        };

        let transport = if producing {
            self.device.create_send_transport(options).await?
        } else {
            self.device.create_recv_transport(options).await?
        };

        self.signaling
            .request(RoomRequest::ConnectWebRtcTransport {
                transport_id: transport.id(),
                dtls_parameters: transport.dtls_parameters(),
            })
            .await?;

        debug!(
            "{} transport {} connected",
            if producing { "send" } else { "recv" },
            transport.id()
        );

        let ice = IceRestartControl::new(transport.clone(), self.signaling.clone());
        let monitor = spawn_connection_monitor(transport.clone(), ice.clone());

        Ok(TransportSlot { transport, ice, monitor })
    }

    pub fn send_transport(&self) -> ClientResult<Arc<dyn MediaTransport>> {
        self.send
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|slot| slot.transport.clone())
            .ok_or_else(|| ClientError::NotFound("send transport".into()))
    }

    pub fn recv_transport(&self) -> ClientResult<Arc<dyn MediaTransport>> {
        self.recv
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|slot| slot.transport.clone())
            .ok_or_else(|| ClientError::NotFound("recv transport".into()))
    }

    /// Close both transports and their restart controllers.
    pub fn close_transports(&self) {
        if let Some(slot) = self.send.lock().unwrap_or_else(|e| e.into_inner()).take() {
            slot.shutdown();
        }
        if let Some(slot) = self.recv.lock().unwrap_or_else(|e| e.into_inner()).take() {
            slot.shutdown();
        }
    }
}

/// Watch a transport's connection state. `disconnected`/`failed` schedule an
/// ICE restart; any other state clears the pending timer.
fn spawn_connection_monitor(
    transport: Arc<dyn MediaTransport>,
    ice: IceRestartControl,
) -> JoinHandle<()> {
    let mut states = transport.connection_state();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow();
            match state {
                TransportConnectionState::Disconnected | TransportConnectionState::Failed => {
                    warn!("transport {} {:?}, scheduling ICE restart", transport.id(), state);
                    ice.schedule();
                }
                _ => ice.cancel_pending(),
            }
        }
    })
}
