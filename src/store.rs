#![forbid(unsafe_code)]

// Reactive store - room state data model and atomic delta dispatch.
//
// The state lives behind a std RwLock held only for synchronous apply/read
// (never across await points); every applied delta is re-broadcast so UI
// layers can project the change.

use crate::config::VideoResolution;
use crate::signaling::protocol::{
    ChatMessage, FileMessage, IceServer, LobbyPeerInfo, LocalRecordingState, PeerId, PeerInfo,
    RoleDef, RoleId,
};
use mediasoup::consumer::{ConsumerScore, ConsumerType};
use mediasoup::prelude::MediaKind;
use mediasoup::producer::ProducerScore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::RwLock as StdRwLock;
use tokio::sync::broadcast;

use crate::signaling::protocol::ProducerSource;

/// Room connection lifecycle. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    New,
    Connecting,
    Connected,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RoomLayout {
    #[default]
    Democratic,
    Filmstrip,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserInfo {
    pub name: String,
    pub version: String,
    pub mobile: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaCapabilities {
    pub can_send_mic: bool,
    pub can_send_webcam: bool,
    pub can_share_screen: bool,
}

/// Audio capture and opus encoding settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AudioSettings {
    pub sample_rate: u32,
    pub channel_count: u8,
    pub sample_size: u8,
    pub auto_gain_control: bool,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub opus_stereo: bool,
    pub opus_fec: bool,
    pub opus_dtx: bool,
    pub opus_max_playback_rate: u32,
    pub opus_ptime: u8,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channel_count: 1,
            sample_size: 16,
            auto_gain_control: true,
            echo_cancellation: true,
            noise_suppression: true,
            opus_stereo: false,
            opus_fec: true,
            opus_dtx: true,
            opus_max_playback_rate: 48_000,
            opus_ptime: 20,
        }
    }
}

/// User-tunable settings mirrored into the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub selected_audio_device: Option<String>,
    pub selected_webcam: Option<String>,
    pub resolution: VideoResolution,
    pub frame_rate: u32,
    pub screen_sharing_resolution: VideoResolution,
    pub screen_sharing_frame_rate: u32,
    pub audio: AudioSettings,
    /// Auto-unmute on speech and auto-mute on silence.
    pub voice_activated_unmute: bool,
    /// dB threshold below which the mic counts as silent.
    pub noise_threshold: f32,
    pub hide_no_video_participants: bool,
    pub virtual_background_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            selected_audio_device: None,
            selected_webcam: None,
            resolution: VideoResolution::Medium,
            frame_rate: 15,
            screen_sharing_resolution: VideoResolution::VeryHigh,
            screen_sharing_frame_rate: 5,
            audio: AudioSettings::default(),
            voice_activated_unmute: false,
            noise_threshold: -50.0,
            hide_no_video_participants: false,
            virtual_background_enabled: false,
        }
    }
}

/// Local media device as enumerated by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaDeviceInfo {
    pub device_id: String,
    pub kind: MediaDeviceKind,
    pub label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaDeviceKind {
    #[serde(rename = "audioinput")]
    AudioInput,
    #[serde(rename = "audiooutput")]
    AudioOutput,
    #[serde(rename = "videoinput")]
    VideoInput,
}

/// A remote participant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Peer {
    pub id: PeerId,
    pub display_name: Option<String>,
    pub picture: Option<String>,
    pub roles: BTreeSet<RoleId>,
    pub raised_hand: bool,
    pub raised_hand_timestamp: Option<i64>,
    pub local_recording_state: Option<LocalRecordingState>,
    /// Consumer ids owned by this peer, in creation order. A lookup list,
    /// never an ownership edge; rebuilt on consumer add/remove.
    pub consumers: Vec<String>,
    /// Last published volume in dB, rounded.
    pub volume: Option<i16>,
}

impl From<PeerInfo> for Peer {
    fn from(info: PeerInfo) -> Self {
        Self {
            id: info.id,
            display_name: info.display_name,
            picture: info.picture,
            roles: info.roles.into_iter().collect(),
            raised_hand: info.raised_hand,
            raised_hand_timestamp: info.raised_hand_timestamp,
            local_recording_state: None,
            consumers: Vec::new(),
            volume: None,
        }
    }
}

/// The local participant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeState {
    pub peer_id: PeerId,
    pub display_name: String,
    pub picture: Option<String>,
    pub from: Option<String>,
    pub browser: BrowserInfo,
    pub roles: BTreeSet<RoleId>,
    pub media_capabilities: MediaCapabilities,
    pub raised_hand: bool,
    pub raised_hand_timestamp: Option<i64>,
    pub speaking: bool,
    /// Set when voice-activated unmute paused the mic, so speech can resume it.
    pub auto_muted: bool,
    pub logged_in: bool,
    pub local_recording_state: Option<LocalRecordingState>,
    pub volume: Option<i16>,
    // Per-source in-progress flags; advisory for UIs, the registries hold
    // the authoritative per-source locks.
    pub audio_in_progress: bool,
    pub video_in_progress: bool,
    pub screen_sharing_in_progress: bool,
}

/// A local producer as reflected in the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerState {
    pub id: String,
    pub source: ProducerSource,
    pub kind: MediaKind,
    pub paused: bool,
    pub track_label: Option<String>,
    pub codec: Option<String>,
    #[serde(default)]
    pub score: Vec<ProducerScore>,
    /// Local monitor volume; zero for the screen-audio producer so the
    /// sender does not hear their own capture.
    #[serde(default)]
    pub volume: Option<f64>,
}

/// A remote consumer as reflected in the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerState {
    pub id: String,
    pub peer_id: PeerId,
    pub kind: MediaKind,
    pub consumer_type: ConsumerType,
    pub source: ProducerSource,
    pub locally_paused: bool,
    pub remotely_paused: bool,
    pub spatial_layers: u8,
    pub temporal_layers: u8,
    pub preferred_spatial_layer: u8,
    pub preferred_temporal_layer: u8,
    pub current_spatial_layer: Option<u8>,
    pub current_temporal_layer: Option<u8>,
    pub priority: u8,
    pub score: Option<ConsumerScore>,
    /// Producer-side capture size, when known.
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Scale-down factor per spatial level, lowest level first.
    pub resolution_scalings: Vec<f64>,
    pub audio_gain: f64,
    pub opus_inspected: bool,
}

impl ConsumerState {
    pub fn paused(&self) -> bool {
        self.locally_paused || self.remotely_paused
    }
}

/// Room-level state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    pub room_id: Option<String>,
    pub state: ConnectionState,
    pub in_lobby: bool,
    pub joined: bool,
    pub locked: bool,
    pub access_code: Option<String>,
    pub join_by_access_code: bool,
    pub over_room_limit: bool,
    pub sign_in_required: bool,
    pub active_speaker_id: Option<PeerId>,
    pub spotlights: Vec<PeerId>,
    pub selected_peers: Vec<PeerId>,
    pub layout: RoomLayout,
    pub user_roles: HashMap<String, RoleDef>,
    pub room_permissions: HashMap<String, Vec<RoleDef>>,
    pub allow_when_role_missing: Vec<String>,
    pub turn_servers: Vec<IceServer>,
    /// Consent given per peer for local recording.
    pub recording_consents: HashMap<PeerId, bool>,
    /// Server-defined stats blobs keyed by transport id.
    pub transport_stats: HashMap<String, Value>,
}

/// The complete client-side state tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomState {
    pub room: RoomInfo,
    pub me: MeState,
    pub peers: HashMap<PeerId, Peer>,
    pub lobby_peers: HashMap<PeerId, LobbyPeerInfo>,
    pub producers: HashMap<String, ProducerState>,
    pub consumers: HashMap<String, ConsumerState>,
    pub chat: Vec<ChatMessage>,
    pub files: Vec<FileMessage>,
    pub settings: Settings,
    pub devices: Vec<MediaDeviceInfo>,
}

impl RoomState {
    /// Permission check against room permissions and own roles. When no role
    /// in the room grants the permission and the server listed it under
    /// `allowWhenRoleMissing`, everyone has it.
    pub fn has_permission(&self, permission: &str) -> bool {
        let Some(permitted) = self.room.room_permissions.get(permission) else {
            return false;
        };

        if permitted.iter().any(|role| self.me.roles.contains(&role.id)) {
            return true;
        }

        if self.room.allow_when_role_missing.iter().any(|p| p == permission) {
            let anyone_holds_role = self
                .peers
                .values()
                .any(|peer| permitted.iter().any(|role| peer.roles.contains(&role.id)));
            return !anyone_holds_role;
        }

        false
    }

    pub fn producer_by_source(&self, source: ProducerSource) -> Option<&ProducerState> {
        self.producers.values().find(|p| p.source == source)
    }
}

/// State delta. Every mutation of the store goes through exactly one of
/// these, applied atomically under the state lock.
#[derive(Debug, Clone)]
pub enum StoreAction {
    // Room
    SetRoomId(String),
    SetRoomState(ConnectionState),
    SetInLobby(bool),
    SetJoined(bool),
    SetLocked(bool),
    SetAccessCode(Option<String>),
    SetJoinByAccessCode(bool),
    SetOverRoomLimit(bool),
    SetSignInRequired(bool),
    SetActiveSpeaker(Option<PeerId>),
    SetSpotlights(Vec<PeerId>),
    SetSelectedPeers(Vec<PeerId>),
    SetLayout(RoomLayout),
    SetUserRoles(HashMap<String, RoleDef>),
    SetRoomPermissions(HashMap<String, Vec<RoleDef>>),
    SetAllowWhenRoleMissing(Vec<String>),
    SetTurnServers(Vec<IceServer>),
    SetRecordingConsent { peer_id: PeerId, consent: bool },
    SetTransportStats { transport_id: String, stats: Value },

    // Me
    SetMe { peer_id: PeerId, display_name: String, picture: Option<String>, from: Option<String> },
    SetBrowser(BrowserInfo),
    SetDisplayName(String),
    SetPicture(Option<String>),
    SetMediaCapabilities(MediaCapabilities),
    AddRole(RoleId),
    RemoveRole(RoleId),
    SetRaisedHand { raised_hand: bool, timestamp: Option<i64> },
    SetSpeaking(bool),
    SetAutoMuted(bool),
    SetLoggedIn(bool),
    SetMyLocalRecording(Option<LocalRecordingState>),
    SetMyVolume(Option<i16>),
    SetAudioInProgress(bool),
    SetVideoInProgress(bool),
    SetScreenSharingInProgress(bool),

    // Peers
    AddPeer(Peer),
    RemovePeer { peer_id: PeerId },
    ClearPeers,
    SetPeerDisplayName { peer_id: PeerId, display_name: String },
    SetPeerPicture { peer_id: PeerId, picture: String },
    SetPeerRaisedHand { peer_id: PeerId, raised_hand: bool, timestamp: Option<i64> },
    GivePeerRole { peer_id: PeerId, role_id: RoleId },
    RemovePeerRole { peer_id: PeerId, role_id: RoleId },
    SetPeerLocalRecording { peer_id: PeerId, state: LocalRecordingState },
    SetPeerVolume { peer_id: PeerId, volume: Option<i16> },

    // Lobby
    AddLobbyPeer(LobbyPeerInfo),
    RemoveLobbyPeer { peer_id: PeerId },
    SetLobbyPeers(Vec<LobbyPeerInfo>),
    SetLobbyPeerDisplayName { peer_id: PeerId, display_name: String },
    SetLobbyPeerPicture { peer_id: PeerId, picture: String },

    // Producers
    AddProducer(ProducerState),
    RemoveProducer { producer_id: String },
    ClearProducers,
    SetProducerPaused { producer_id: String, paused: bool },
    SetProducerScore { producer_id: String, score: Vec<ProducerScore> },

    // Consumers
    AddConsumer(ConsumerState),
    RemoveConsumer { consumer_id: String },
    ClearConsumers,
    SetConsumerLocallyPaused { consumer_id: String, paused: bool },
    SetConsumerRemotelyPaused { consumer_id: String, paused: bool },
    SetConsumerPreferredLayers { consumer_id: String, spatial: u8, temporal: u8 },
    SetConsumerCurrentLayers { consumer_id: String, spatial: Option<u8>, temporal: Option<u8> },
    SetConsumerPriority { consumer_id: String, priority: u8 },
    SetConsumerScore { consumer_id: String, score: ConsumerScore },
    SetConsumerAudioGain { consumer_id: String, gain: f64 },

    // Chat & files
    AddChatMessage(ChatMessage),
    SetChatHistory(Vec<ChatMessage>),
    ClearChat,
    AddFile(FileMessage),
    SetFileHistory(Vec<FileMessage>),

    // Settings & devices
    SetSettings(Box<Settings>),
    SetVoiceActivatedUnmute(bool),
    SetHideNoVideoParticipants(bool),
    SetMediaDevices(Vec<MediaDeviceInfo>),
}

/// Shared observable store.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    state: StdRwLock<RoomState>,
    deltas: broadcast::Sender<StoreAction>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        let (deltas, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(StoreInner { state: StdRwLock::new(RoomState::default()), deltas }),
        }
    }

    /// Apply a delta atomically, then broadcast it to subscribers.
    pub fn dispatch(&self, action: StoreAction) {
        {
            let mut state = self.inner.state.write().unwrap_or_else(|e| e.into_inner());
            apply(&mut state, &action);
        }
        let _ = self.inner.deltas.send(action);
    }

    /// Read the state under the lock. The closure must not block or await.
    pub fn with<R>(&self, f: impl FnOnce(&RoomState) -> R) -> R {
        let state = self.inner.state.read().unwrap_or_else(|e| e.into_inner());
        f(&state)
    }

    pub fn snapshot(&self) -> RoomState {
        self.with(Clone::clone)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreAction> {
        self.inner.deltas.subscribe()
    }
}

fn apply(state: &mut RoomState, action: &StoreAction) {
    use StoreAction::*;

    match action {
        SetRoomId(id) => state.room.room_id = Some(id.clone()),
        SetRoomState(s) => state.room.state = *s,
        SetInLobby(v) => state.room.in_lobby = *v,
        SetJoined(v) => state.room.joined = *v,
        SetLocked(v) => state.room.locked = *v,
        SetAccessCode(code) => state.room.access_code = code.clone(),
        SetJoinByAccessCode(v) => state.room.join_by_access_code = *v,
        SetOverRoomLimit(v) => state.room.over_room_limit = *v,
        SetSignInRequired(v) => state.room.sign_in_required = *v,
        SetActiveSpeaker(peer_id) => state.room.active_speaker_id = peer_id.clone(),
        SetSpotlights(list) => state.room.spotlights = list.clone(),
        SetSelectedPeers(list) => state.room.selected_peers = list.clone(),
        SetLayout(layout) => state.room.layout = *layout,
        SetUserRoles(roles) => state.room.user_roles = roles.clone(),
        SetRoomPermissions(perms) => state.room.room_permissions = perms.clone(),
        SetAllowWhenRoleMissing(list) => state.room.allow_when_role_missing = list.clone(),
        SetTurnServers(servers) => state.room.turn_servers = servers.clone(),
        SetRecordingConsent { peer_id, consent } => {
            state.room.recording_consents.insert(peer_id.clone(), *consent);
        }
        SetTransportStats { transport_id, stats } => {
            state.room.transport_stats.insert(transport_id.clone(), stats.clone());
        }

        SetMe { peer_id, display_name, picture, from } => {
            state.me.peer_id = peer_id.clone();
            state.me.display_name = display_name.clone();
            state.me.picture = picture.clone();
            state.me.from = from.clone();
        }
        SetBrowser(info) => state.me.browser = info.clone(),
        SetDisplayName(name) => state.me.display_name = name.clone(),
        SetPicture(picture) => state.me.picture = picture.clone(),
        SetMediaCapabilities(caps) => state.me.media_capabilities = *caps,
        AddRole(role_id) => {
            state.me.roles.insert(*role_id);
        }
        RemoveRole(role_id) => {
            state.me.roles.remove(role_id);
        }
        SetRaisedHand { raised_hand, timestamp } => {
            state.me.raised_hand = *raised_hand;
            state.me.raised_hand_timestamp = *timestamp;
        }
        SetSpeaking(v) => state.me.speaking = *v,
        SetAutoMuted(v) => state.me.auto_muted = *v,
        SetLoggedIn(v) => state.me.logged_in = *v,
        SetMyLocalRecording(s) => state.me.local_recording_state = *s,
        SetMyVolume(v) => state.me.volume = *v,
        SetAudioInProgress(v) => state.me.audio_in_progress = *v,
        SetVideoInProgress(v) => state.me.video_in_progress = *v,
        SetScreenSharingInProgress(v) => state.me.screen_sharing_in_progress = *v,

        AddPeer(peer) => {
            state.peers.insert(peer.id.clone(), peer.clone());
        }
        RemovePeer { peer_id } => {
            // Removing a peer drops its consumers in the same delta.
            state.peers.remove(peer_id);
            state.consumers.retain(|_, c| &c.peer_id != peer_id);
        }
        ClearPeers => state.peers.clear(),
        SetPeerDisplayName { peer_id, display_name } => {
            if let Some(peer) = state.peers.get_mut(peer_id) {
                peer.display_name = Some(display_name.clone());
            }
        }
        SetPeerPicture { peer_id, picture } => {
            if let Some(peer) = state.peers.get_mut(peer_id) {
                peer.picture = Some(picture.clone());
            }
        }
        SetPeerRaisedHand { peer_id, raised_hand, timestamp } => {
            if let Some(peer) = state.peers.get_mut(peer_id) {
                peer.raised_hand = *raised_hand;
                peer.raised_hand_timestamp = *timestamp;
            }
        }
        GivePeerRole { peer_id, role_id } => {
            if let Some(peer) = state.peers.get_mut(peer_id) {
                peer.roles.insert(*role_id);
            }
        }
        RemovePeerRole { peer_id, role_id } => {
            if let Some(peer) = state.peers.get_mut(peer_id) {
                peer.roles.remove(role_id);
            }
        }
        SetPeerLocalRecording { peer_id, state: rec } => {
            if let Some(peer) = state.peers.get_mut(peer_id) {
                peer.local_recording_state = Some(*rec);
            }
        }
        SetPeerVolume { peer_id, volume } => {
            if let Some(peer) = state.peers.get_mut(peer_id) {
                peer.volume = *volume;
            }
        }

        AddLobbyPeer(info) => {
            state.lobby_peers.insert(info.id.clone(), info.clone());
        }
        RemoveLobbyPeer { peer_id } => {
            state.lobby_peers.remove(peer_id);
        }
        SetLobbyPeers(list) => {
            state.lobby_peers = list.iter().map(|p| (p.id.clone(), p.clone())).collect();
        }
        SetLobbyPeerDisplayName { peer_id, display_name } => {
            if let Some(peer) = state.lobby_peers.get_mut(peer_id) {
                peer.display_name = Some(display_name.clone());
            }
        }
        SetLobbyPeerPicture { peer_id, picture } => {
            if let Some(peer) = state.lobby_peers.get_mut(peer_id) {
                peer.picture = Some(picture.clone());
            }
        }

        AddProducer(producer) => {
            state.producers.insert(producer.id.clone(), producer.clone());
        }
        RemoveProducer { producer_id } => {
            state.producers.remove(producer_id);
        }
        ClearProducers => state.producers.clear(),
        SetProducerPaused { producer_id, paused } => {
            if let Some(producer) = state.producers.get_mut(producer_id) {
                producer.paused = *paused;
            }
        }
        SetProducerScore { producer_id, score } => {
            if let Some(producer) = state.producers.get_mut(producer_id) {
                producer.score = score.clone();
            }
        }

        AddConsumer(consumer) => {
            if let Some(peer) = state.peers.get_mut(&consumer.peer_id) {
                peer.consumers.push(consumer.id.clone());
            }
            state.consumers.insert(consumer.id.clone(), consumer.clone());
        }
        RemoveConsumer { consumer_id } => {
            if let Some(consumer) = state.consumers.remove(consumer_id) {
                if let Some(peer) = state.peers.get_mut(&consumer.peer_id) {
                    peer.consumers.retain(|id| id != consumer_id);
                }
            }
        }
        ClearConsumers => {
            state.consumers.clear();
            for peer in state.peers.values_mut() {
                peer.consumers.clear();
            }
        }
        SetConsumerLocallyPaused { consumer_id, paused } => {
            if let Some(consumer) = state.consumers.get_mut(consumer_id) {
                consumer.locally_paused = *paused;
            }
        }
        SetConsumerRemotelyPaused { consumer_id, paused } => {
            if let Some(consumer) = state.consumers.get_mut(consumer_id) {
                consumer.remotely_paused = *paused;
            }
        }
        SetConsumerPreferredLayers { consumer_id, spatial, temporal } => {
            if let Some(consumer) = state.consumers.get_mut(consumer_id) {
                consumer.preferred_spatial_layer = *spatial;
                consumer.preferred_temporal_layer = *temporal;
            }
        }
        SetConsumerCurrentLayers { consumer_id, spatial, temporal } => {
            if let Some(consumer) = state.consumers.get_mut(consumer_id) {
                consumer.current_spatial_layer = *spatial;
                consumer.current_temporal_layer = *temporal;
            }
        }
        SetConsumerPriority { consumer_id, priority } => {
            if let Some(consumer) = state.consumers.get_mut(consumer_id) {
                consumer.priority = *priority;
            }
        }
        SetConsumerScore { consumer_id, score } => {
            if let Some(consumer) = state.consumers.get_mut(consumer_id) {
                consumer.score = Some(score.clone());
            }
        }
        SetConsumerAudioGain { consumer_id, gain } => {
            if let Some(consumer) = state.consumers.get_mut(consumer_id) {
                consumer.audio_gain = *gain;
            }
        }

        AddChatMessage(message) => state.chat.push(message.clone()),
        SetChatHistory(history) => state.chat = history.clone(),
        ClearChat => state.chat.clear(),
        AddFile(file) => state.files.push(file.clone()),
        SetFileHistory(history) => state.files = history.clone(),

        SetSettings(settings) => state.settings = (**settings).clone(),
        SetVoiceActivatedUnmute(v) => state.settings.voice_activated_unmute = *v,
        SetHideNoVideoParticipants(v) => state.settings.hide_no_video_participants = *v,
        SetMediaDevices(devices) => state.devices = devices.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(id: &str) -> Peer {
        Peer { id: id.into(), ..Peer::default() }
    }

    fn consumer(id: &str, peer_id: &str) -> ConsumerState {
        ConsumerState {
            id: id.into(),
            peer_id: peer_id.into(),
            kind: MediaKind::Video,
            consumer_type: ConsumerType::Simulcast,
            source: ProducerSource::Webcam,
            locally_paused: false,
            remotely_paused: false,
            spatial_layers: 3,
            temporal_layers: 3,
            preferred_spatial_layer: 2,
            preferred_temporal_layer: 2,
            current_spatial_layer: None,
            current_temporal_layer: None,
            priority: 1,
            score: None,
            width: Some(1280),
            height: Some(720),
            resolution_scalings: vec![4.0, 2.0, 1.0],
            audio_gain: 1.0,
            opus_inspected: false,
        }
    }

    #[test]
    fn remove_peer_cascades_to_consumers() {
        let store = Store::new();
        store.dispatch(StoreAction::AddPeer(peer("p1")));
        store.dispatch(StoreAction::AddPeer(peer("p2")));
        store.dispatch(StoreAction::AddConsumer(consumer("c1", "p1")));
        store.dispatch(StoreAction::AddConsumer(consumer("c2", "p2")));

        store.dispatch(StoreAction::RemovePeer { peer_id: "p1".into() });

        store.with(|state| {
            assert!(!state.peers.contains_key("p1"));
            assert!(!state.consumers.contains_key("c1"));
            assert!(state.consumers.contains_key("c2"));
        });
    }

    #[test]
    fn consumer_list_on_peer_is_rebuilt() {
        let store = Store::new();
        store.dispatch(StoreAction::AddPeer(peer("p1")));
        store.dispatch(StoreAction::AddConsumer(consumer("c1", "p1")));
        store.dispatch(StoreAction::AddConsumer(consumer("c2", "p1")));
        store.with(|state| {
            assert_eq!(state.peers["p1"].consumers, vec!["c1".to_string(), "c2".to_string()]);
        });

        store.dispatch(StoreAction::RemoveConsumer { consumer_id: "c1".into() });
        store.with(|state| {
            assert_eq!(state.peers["p1"].consumers, vec!["c2".to_string()]);
        });
    }

    #[test]
    fn lobby_and_joined_sets_stay_disjoint_through_promotion() {
        let store = Store::new();
        let lobby = LobbyPeerInfo { id: "p1".into(), display_name: None, picture: None };
        store.dispatch(StoreAction::AddLobbyPeer(lobby));
        store.with(|state| {
            assert!(state.lobby_peers.contains_key("p1"));
            assert!(!state.peers.contains_key("p1"));
        });

        // Promotion: the server sends lobby:promotedPeer then newPeer.
        store.dispatch(StoreAction::RemoveLobbyPeer { peer_id: "p1".into() });
        store.dispatch(StoreAction::AddPeer(peer("p1")));
        store.with(|state| {
            assert!(!state.lobby_peers.contains_key("p1"));
            assert!(state.peers.contains_key("p1"));
        });
    }

    #[test]
    fn permission_check_uses_roles_and_fallback() {
        let store = Store::new();
        let moderator = RoleDef { id: 3, label: "moderator".into(), level: 50, promotable: false };
        store.dispatch(StoreAction::SetRoomPermissions(HashMap::from([(
            "MODERATE_ROOM".to_string(),
            vec![moderator.clone()],
        ), (
            "SHARE_AUDIO".to_string(),
            vec![moderator.clone()],
        )])));

        store.with(|state| assert!(!state.has_permission("MODERATE_ROOM")));

        store.dispatch(StoreAction::AddRole(3));
        store.with(|state| {
            assert!(state.has_permission("MODERATE_ROOM"));
            // unknown permission is never granted
            assert!(!state.has_permission("FLY"));
        });

        store.dispatch(StoreAction::RemoveRole(3));
        store.dispatch(StoreAction::SetAllowWhenRoleMissing(vec!["SHARE_AUDIO".to_string()]));
        // nobody in the room holds the role, fallback applies
        store.with(|state| assert!(state.has_permission("SHARE_AUDIO")));

        let mut holder = peer("p1");
        holder.roles.insert(3);
        store.dispatch(StoreAction::AddPeer(holder));
        store.with(|state| assert!(!state.has_permission("SHARE_AUDIO")));
    }

    #[test]
    fn dispatch_broadcasts_applied_deltas() {
        let store = Store::new();
        let mut rx = store.subscribe();
        store.dispatch(StoreAction::SetRoomState(ConnectionState::Connecting));
        match rx.try_recv().unwrap() {
            StoreAction::SetRoomState(state) => assert_eq!(state, ConnectionState::Connecting),
            other => panic!("unexpected delta: {other:?}"),
        }
    }
}
