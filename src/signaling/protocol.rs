#![forbid(unsafe_code)]

// Signaling protocol - request and notification types exchanged with the SFU

use mediasoup::consumer::{ConsumerScore, ConsumerType};
use mediasoup::prelude::*;
use mediasoup::producer::ProducerScore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type PeerId = String;
pub type RoleId = u32;

/// Origin of a local producer.
///
/// Screen-share audio is produced with `source: "mic"` on the wire so the SFU
/// mixes it into audio spotlighting; locally it is tracked as its own source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProducerSource {
    #[serde(rename = "mic")]
    Mic,
    #[serde(rename = "webcam")]
    Webcam,
    #[serde(rename = "extravideo")]
    ExtraVideo,
    #[serde(rename = "screen")]
    Screen,
    #[serde(rename = "screen-audio")]
    ScreenAudio,
}

impl ProducerSource {
    /// Value placed in `appData.source` for the `produce` request.
    pub fn wire_source(self) -> ProducerSource {
        match self {
            ProducerSource::ScreenAudio => ProducerSource::Mic,
            other => other,
        }
    }
}

/// `appData` attached to `produce` requests. Video producers carry their
/// capture size and scale-down ladder so receivers can adapt layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerAppData {
    pub source: ProducerSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution_scalings: Option<Vec<f64>>,
}

/// `appData` received with `newConsumer`; echoes the producer's app data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerAppData {
    pub source: ProducerSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<PeerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution_scalings: Option<Vec<f64>>,
}

/// ICE server entry received with `roomReady` (TURN relays).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// Role definition as the server describes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleDef {
    pub id: RoleId,
    pub label: String,
    pub level: u32,
    #[serde(default)]
    pub promotable: bool,
}

/// Roster entry for a joined peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    pub id: PeerId,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
    #[serde(default)]
    pub roles: Vec<RoleId>,
    #[serde(default)]
    pub raised_hand: bool,
    #[serde(default)]
    pub raised_hand_timestamp: Option<i64>,
    #[serde(default)]
    pub returning: bool,
}

/// Roster entry for a peer parked in the lobby.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyPeerInfo {
    pub id: PeerId,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(default)]
    pub peer_id: Option<PeerId>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
    pub text: String,
    #[serde(default)]
    pub time: Option<i64>,
}

/// Announcement of a shared file (the torrent layer moves the bytes).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMessage {
    #[serde(default)]
    pub peer_id: Option<PeerId>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
    pub magnet_uri: String,
    #[serde(default)]
    pub time: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocalRecordingState {
    Start,
    Resume,
    Pause,
    Stop,
}

/// Client-to-server requests, each acked with a response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "data", rename_all = "camelCase")]
pub enum RoomRequest {
    GetRouterRtpCapabilities,
    #[serde(rename_all = "camelCase")]
    CreateWebRtcTransport {
        force_tcp: bool,
        producing: bool,
        consuming: bool,
    },
    #[serde(rename_all = "camelCase")]
    ConnectWebRtcTransport {
        transport_id: String,
        dtls_parameters: DtlsParameters,
    },
    #[serde(rename_all = "camelCase")]
    RestartIce { transport_id: String },
    #[serde(rename_all = "camelCase")]
    Join {
        display_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        picture: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        rtp_capabilities: RtpCapabilities,
        returning: bool,
    },
    #[serde(rename_all = "camelCase")]
    Produce {
        transport_id: String,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        app_data: ProducerAppData,
    },
    #[serde(rename_all = "camelCase")]
    CloseProducer { producer_id: String },
    #[serde(rename_all = "camelCase")]
    PauseProducer { producer_id: String },
    #[serde(rename_all = "camelCase")]
    ResumeProducer { producer_id: String },
    #[serde(rename_all = "camelCase")]
    PauseConsumer { consumer_id: String },
    #[serde(rename_all = "camelCase")]
    ResumeConsumer { consumer_id: String },
    /// Wire spelling kept from the upstream protocol.
    #[serde(rename = "setConsumerPreferedLayers", rename_all = "camelCase")]
    SetConsumerPreferredLayers {
        consumer_id: String,
        spatial_layer: u8,
        temporal_layer: u8,
    },
    #[serde(rename_all = "camelCase")]
    SetConsumerPriority { consumer_id: String, priority: u8 },
    #[serde(rename_all = "camelCase")]
    RequestConsumerKeyFrame { consumer_id: String },
    #[serde(rename_all = "camelCase")]
    GetTransportStats { transport_id: String },
    #[serde(rename_all = "camelCase")]
    ChangeDisplayName { display_name: String },
    ChangePicture { picture: String },
    #[serde(rename_all = "camelCase")]
    ChatMessage { chat_message: ChatMessage },
    #[serde(rename_all = "camelCase")]
    SendFile { magnet_uri: String },
    #[serde(rename_all = "camelCase")]
    RaisedHand { raised_hand: bool },
    LockRoom,
    UnlockRoom,
    #[serde(rename_all = "camelCase")]
    SetAccessCode { access_code: String },
    #[serde(rename_all = "camelCase")]
    SetJoinByAccessCode { join_by_access_code: bool },
    AddConsentForRecording { consent: bool },
    #[serde(rename_all = "camelCase")]
    PromotePeer { peer_id: PeerId },
    PromoteAllPeers,
    #[serde(rename = "moderator:clearChat")]
    ModeratorClearChat,
    #[serde(rename = "moderator:giveRole", rename_all = "camelCase")]
    ModeratorGiveRole { peer_id: PeerId, role_id: RoleId },
    #[serde(rename = "moderator:removeRole", rename_all = "camelCase")]
    ModeratorRemoveRole { peer_id: PeerId, role_id: RoleId },
    #[serde(rename = "moderator:kickPeer", rename_all = "camelCase")]
    ModeratorKickPeer { peer_id: PeerId },
    #[serde(rename = "moderator:mute", rename_all = "camelCase")]
    ModeratorMute { peer_id: PeerId },
    #[serde(rename = "moderator:muteAll")]
    ModeratorMuteAll,
    #[serde(rename = "moderator:stopVideo", rename_all = "camelCase")]
    ModeratorStopVideo { peer_id: PeerId },
    #[serde(rename = "moderator:stopAllVideo")]
    ModeratorStopAllVideo,
    #[serde(rename = "moderator:stopScreenSharing", rename_all = "camelCase")]
    ModeratorStopScreenSharing { peer_id: PeerId },
    #[serde(rename = "moderator:stopAllScreenSharing")]
    ModeratorStopAllScreenSharing,
    #[serde(rename = "moderator:closeMeeting")]
    ModeratorCloseMeeting,
    #[serde(rename = "moderator:lowerHand", rename_all = "camelCase")]
    ModeratorLowerHand { peer_id: PeerId },
}

/// Response to `createWebRtcTransport`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportCreated {
    pub id: String,
    pub ice_parameters: IceParameters,
    pub ice_candidates: Vec<IceCandidate>,
    pub dtls_parameters: DtlsParameters,
}

/// Response to `restartIce`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceRestarted {
    pub ice_parameters: IceParameters,
}

/// Response to `produce`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProduceResponse {
    pub id: String,
}

/// Response to `join`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinResponse {
    #[serde(default)]
    pub authenticated: bool,
    #[serde(default)]
    pub roles: Vec<RoleId>,
    #[serde(default)]
    pub peers: Vec<PeerInfo>,
    #[serde(default)]
    pub tracker: Option<String>,
    #[serde(default)]
    pub room_permissions: HashMap<String, Vec<RoleDef>>,
    #[serde(default)]
    pub user_roles: HashMap<String, RoleDef>,
    #[serde(default)]
    pub allow_when_role_missing: Vec<String>,
    #[serde(default)]
    pub chat_history: Vec<ChatMessage>,
    #[serde(default)]
    pub file_history: Vec<FileMessage>,
    #[serde(default)]
    pub last_n_history: Vec<PeerId>,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub lobby_peers: Vec<LobbyPeerInfo>,
    #[serde(default)]
    pub access_code: Option<String>,
}

/// Server-to-client notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "data", rename_all = "camelCase")]
pub enum RoomNotification {
    EnteredLobby,
    SignInRequired,
    OverRoomLimit,
    #[serde(rename_all = "camelCase")]
    RoomReady {
        #[serde(default)]
        turn_servers: Vec<IceServer>,
    },
    RoomBack,
    LockRoom,
    UnlockRoom,
    #[serde(rename_all = "camelCase")]
    ParkedPeer { peer_id: PeerId },
    #[serde(rename_all = "camelCase")]
    ParkedPeers { lobby_peers: Vec<LobbyPeerInfo> },
    #[serde(rename = "lobby:peerClosed", rename_all = "camelCase")]
    LobbyPeerClosed { peer_id: PeerId },
    #[serde(rename = "lobby:promotedPeer", rename_all = "camelCase")]
    LobbyPromotedPeer { peer_id: PeerId },
    #[serde(rename = "lobby:changeDisplayName", rename_all = "camelCase")]
    LobbyChangeDisplayName { peer_id: PeerId, display_name: String },
    #[serde(rename = "lobby:changePicture", rename_all = "camelCase")]
    LobbyChangePicture { peer_id: PeerId, picture: String },
    #[serde(rename_all = "camelCase")]
    SetAccessCode { access_code: String },
    #[serde(rename_all = "camelCase")]
    SetJoinByAccessCode { join_by_access_code: bool },
    #[serde(rename_all = "camelCase")]
    ActiveSpeaker { peer_id: Option<PeerId> },
    #[serde(rename_all = "camelCase")]
    ChangeDisplayName {
        peer_id: PeerId,
        display_name: String,
        #[serde(default)]
        old_display_name: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ChangePicture { peer_id: PeerId, picture: String },
    #[serde(rename_all = "camelCase")]
    RaisedHand {
        peer_id: PeerId,
        raised_hand: bool,
        #[serde(default)]
        raised_hand_timestamp: Option<i64>,
    },
    #[serde(rename_all = "camelCase")]
    ChatMessage {
        peer_id: PeerId,
        chat_message: ChatMessage,
    },
    #[serde(rename = "moderator:clearChat")]
    ModeratorClearChat,
    SendFile(FileMessage),
    #[serde(rename_all = "camelCase")]
    ProducerScore {
        producer_id: String,
        score: Vec<ProducerScore>,
    },
    NewPeer(PeerInfo),
    #[serde(rename_all = "camelCase")]
    PeerClosed { peer_id: PeerId },
    #[serde(rename_all = "camelCase")]
    NewConsumer {
        peer_id: PeerId,
        producer_id: String,
        id: String,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        #[serde(rename = "type")]
        consumer_type: ConsumerType,
        app_data: ConsumerAppData,
        producer_paused: bool,
        #[serde(default)]
        score: Option<ConsumerScore>,
    },
    #[serde(rename_all = "camelCase")]
    ConsumerClosed { consumer_id: String },
    #[serde(rename_all = "camelCase")]
    ConsumerPaused { consumer_id: String },
    #[serde(rename_all = "camelCase")]
    ConsumerResumed { consumer_id: String },
    #[serde(rename_all = "camelCase")]
    ConsumerLayersChanged {
        consumer_id: String,
        #[serde(default)]
        spatial_layer: Option<u8>,
        #[serde(default)]
        temporal_layer: Option<u8>,
    },
    #[serde(rename_all = "camelCase")]
    ConsumerScore {
        consumer_id: String,
        score: ConsumerScore,
    },
    #[serde(rename = "moderator:mute")]
    ModeratorMute,
    #[serde(rename = "moderator:stopVideo")]
    ModeratorStopVideo,
    #[serde(rename = "moderator:stopScreenSharing")]
    ModeratorStopScreenSharing,
    #[serde(rename = "moderator:kick")]
    ModeratorKick,
    #[serde(rename = "moderator:lowerHand")]
    ModeratorLowerHand,
    #[serde(rename_all = "camelCase")]
    GotRole { peer_id: PeerId, role_id: RoleId },
    #[serde(rename_all = "camelCase")]
    LostRole { peer_id: PeerId, role_id: RoleId },
    #[serde(rename_all = "camelCase")]
    AddConsentForRecording { peer_id: PeerId, consent: bool },
    #[serde(rename_all = "camelCase")]
    SetLocalRecording {
        peer_id: PeerId,
        local_recording_state: LocalRecordingState,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_envelope_has_method_and_data() {
        let req = RoomRequest::PauseConsumer { consumer_id: "c1".into() };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value, json!({"method": "pauseConsumer", "data": {"consumerId": "c1"}}));
    }

    #[test]
    fn unit_requests_serialize_without_data() {
        let value = serde_json::to_value(RoomRequest::LockRoom).unwrap();
        assert_eq!(value, json!({"method": "lockRoom"}));
    }

    #[test]
    fn moderator_methods_keep_colon_names() {
        let req = RoomRequest::ModeratorGiveRole { peer_id: "p1".into(), role_id: 2 };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["method"], "moderator:giveRole");
        assert_eq!(value["data"], json!({"peerId": "p1", "roleId": 2}));
    }

    #[test]
    fn preferred_layers_keeps_wire_spelling() {
        let req = RoomRequest::SetConsumerPreferredLayers {
            consumer_id: "c1".into(),
            spatial_layer: 2,
            temporal_layer: 1,
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["method"], "setConsumerPreferedLayers");
    }

    #[test]
    fn screen_audio_produces_as_mic_on_the_wire() {
        assert_eq!(ProducerSource::ScreenAudio.wire_source(), ProducerSource::Mic);
        assert_eq!(ProducerSource::Webcam.wire_source(), ProducerSource::Webcam);
        let app_data = ProducerAppData {
            source: ProducerSource::ScreenAudio.wire_source(),
            width: None,
            height: None,
            resolution_scalings: None,
        };
        assert_eq!(serde_json::to_value(&app_data).unwrap(), json!({"source": "mic"}));
    }

    #[test]
    fn notifications_deserialize_from_method_envelope() {
        let value = json!({"method": "activeSpeaker", "data": {"peerId": "p7"}});
        let notification: RoomNotification = serde_json::from_value(value).unwrap();
        match notification {
            RoomNotification::ActiveSpeaker { peer_id } => {
                assert_eq!(peer_id.as_deref(), Some("p7"));
            }
            other => panic!("unexpected notification: {other:?}"),
        }

        let value = json!({"method": "lobby:peerClosed", "data": {"peerId": "p2"}});
        let notification: RoomNotification = serde_json::from_value(value).unwrap();
        assert!(matches!(notification, RoomNotification::LobbyPeerClosed { .. }));
    }

    #[test]
    fn unknown_notification_method_is_an_error() {
        let value = json!({"method": "noSuchMethod", "data": {}});
        assert!(serde_json::from_value::<RoomNotification>(value).is_err());
    }
}
