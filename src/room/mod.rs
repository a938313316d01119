#![forbid(unsafe_code)]

// Room client - the long-lived controller tying signaling, transports,
// producers, consumers, spotlights and the store together

mod notifications;

use crate::config::ClientConfig;
use crate::device::{DeviceManager, MediaDevice};
use crate::devices::{DeviceEnumerator, DeviceMonitor};
use crate::error::{ClientError, ClientResult};
use crate::media::producers::{MicUpdate, ScreenSharingUpdate, WebcamUpdate};
use crate::media::{ConsumerRegistry, MediaSource, ProducerRegistry, VideoEffect};
use crate::notify::{Notifications, Notifier};
use crate::signaling::protocol::{
    ChatMessage, FileMessage, JoinResponse, RoleId, RoomRequest,
};
use crate::signaling::transport::SignalingTransport;
use crate::signaling::{SignalingEvent, SignalingEvents, SignalingSession};
use crate::speaking::VoiceActivityDetector;
use crate::spotlights::SpotlightSelector;
use crate::store::{
    BrowserInfo, ConnectionState, MediaCapabilities, Peer, Store, StoreAction,
};
use mediasoup::prelude::MediaKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Permissions checked before auto-starting media on join.
pub const PERMISSION_SHARE_AUDIO: &str = "SHARE_AUDIO";
pub const PERMISSION_SHARE_VIDEO: &str = "SHARE_VIDEO";
pub const PERMISSION_SHARE_SCREEN: &str = "SHARE_SCREEN";

/// External collaborators handed to the room client at construction.
pub struct RoomClientDeps {
    pub signaling: Arc<dyn SignalingTransport>,
    pub device: Arc<dyn MediaDevice>,
    pub media_source: Arc<dyn MediaSource>,
    pub vad: Arc<dyn VoiceActivityDetector>,
    pub video_effect: Option<Arc<dyn VideoEffect>>,
    pub device_enumerator: Option<Arc<dyn DeviceEnumerator>>,
}

#[derive(Debug, Clone, Default)]
pub struct JoinOptions {
    pub room_id: String,
    pub display_name: String,
    pub picture: Option<String>,
    pub from: Option<String>,
    pub join_video: bool,
    pub join_audio: bool,
    /// Produce at all; headless viewers set this to false.
    pub produce: bool,
    pub force_tcp: bool,
    /// Join with the mic muted regardless of the room size threshold.
    pub muted: bool,
    pub returning: bool,
}

/// The singleton controller for one conferencing session. Created once at
/// bootstrap, torn down by `close()`.
pub struct RoomClient {
    config: Arc<ClientConfig>,
    store: Store,
    notifier: Notifier,
    signaling: Arc<SignalingSession>,
    devices: Arc<DeviceManager>,
    producers: Arc<ProducerRegistry>,
    consumers: Arc<ConsumerRegistry>,
    spotlights: StdMutex<SpotlightSelector>,
    device_monitor: Option<DeviceMonitor>,

    produce: AtomicBool,
    force_tcp: AtomicBool,
    join_audio: AtomicBool,
    join_video: AtomicBool,
    join_muted: AtomicBool,
    returning: AtomicBool,
    closed: AtomicBool,
}

impl RoomClient {
    pub fn new(
        config: ClientConfig,
        browser: BrowserInfo,
        deps: RoomClientDeps,
    ) -> (Arc<Self>, Notifications) {
        let config = Arc::new(config);
        let store = Store::new();
        let (notifier, notifications) = Notifier::new(config.notification_sounds);

        store.dispatch(StoreAction::SetBrowser(browser.clone()));
        store.dispatch(StoreAction::SetMe {
            peer_id: Uuid::new_v4().to_string(),
            display_name: String::new(),
            picture: None,
            from: None,
        });

        let signaling = Arc::new(SignalingSession::new(deps.signaling, &config));
        let devices = Arc::new(DeviceManager::new(deps.device, signaling.clone()));
        let producers = ProducerRegistry::new(
            config.clone(),
            store.clone(),
            signaling.clone(),
            devices.clone(),
            deps.media_source,
            deps.vad.clone(),
            deps.video_effect,
        );
        let consumers = ConsumerRegistry::new(
            config.clone(),
            store.clone(),
            signaling.clone(),
            devices.clone(),
            deps.vad,
        );

        let spotlights =
            StdMutex::new(SpotlightSelector::new(config.max_spotlights(browser.mobile)));

        let device_monitor = deps
            .device_enumerator
            .map(|enumerator| DeviceMonitor::new(enumerator, store.clone(), notifier.clone()));

        let client = Arc::new(Self {
            config,
            store,
            notifier,
            signaling,
            devices,
            producers,
            consumers,
            spotlights,
            device_monitor,
            produce: AtomicBool::new(true),
            force_tcp: AtomicBool::new(false),
            join_audio: AtomicBool::new(false),
            join_video: AtomicBool::new(false),
            join_muted: AtomicBool::new(false),
            returning: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });

        (client, notifications)
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Drive the client from the signaling event stream until it ends or the
    /// room closes.
    pub async fn run(self: Arc<Self>, mut events: SignalingEvents) {
        while let Some(event) = events.recv().await {
            match event {
                SignalingEvent::Connect => {
                    debug!("signaling connected");
                }
                SignalingEvent::Disconnect { reason } => self.on_disconnect(&reason),
                SignalingEvent::Reconnect => self.on_reconnect(),
                SignalingEvent::ReconnectFailed => {
                    self.notifier.error("Unable to reconnect to the server");
                    self.close();
                }
                SignalingEvent::Notification(value) => {
                    self.handle_notification_value(value).await;
                }
                SignalingEvent::Request { payload, ack } => {
                    SignalingSession::reject_peer_request(&payload, ack);
                }
            }

            if self.closed.load(Ordering::SeqCst) {
                break;
            }
        }
    }

    // -- lifecycle ---------------------------------------------------------

    /// Enter a room. The server answers with `roomReady` (or `enteredLobby`)
    /// through the notification stream; media starts from there.
    pub fn join(&self, options: JoinOptions) {
        self.produce.store(options.produce, Ordering::SeqCst);
        self.force_tcp.store(options.force_tcp, Ordering::SeqCst);
        self.join_audio.store(options.join_audio, Ordering::SeqCst);
        self.join_video.store(options.join_video, Ordering::SeqCst);
        self.join_muted.store(options.muted, Ordering::SeqCst);
        self.returning.store(options.returning, Ordering::SeqCst);

        let peer_id = self.store.with(|s| s.me.peer_id.clone());
        self.store.dispatch(StoreAction::SetMe {
            peer_id,
            display_name: options.display_name,
            picture: options.picture,
            from: options.from,
        });
        self.store.dispatch(StoreAction::SetRoomId(options.room_id));
        self.store.dispatch(StoreAction::SetRoomState(ConnectionState::Connecting));
        info!("joining room");
    }

    /// Permanent teardown: closes media, transports and the channel.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("closing room client");

        self.producers.teardown();
        self.consumers.teardown();
        self.devices.close_transports();
        self.signaling.close();

        {
            let mut spotlights = self.spotlights.lock().unwrap_or_else(|e| e.into_inner());
            spotlights.clear();
        }
        self.store.dispatch(StoreAction::SetSpotlights(Vec::new()));
        self.store.dispatch(StoreAction::SetSelectedPeers(Vec::new()));
        self.store.dispatch(StoreAction::SetRoomState(ConnectionState::Closed));
    }

    /// `io server disconnect` is permanent; everything else tears media down
    /// and waits for the transport to reconnect on the same session.
    pub(crate) fn on_disconnect(&self, reason: &str) {
        if reason == crate::signaling::SERVER_DISCONNECT_REASON {
            warn!("server closed the signaling session");
            self.close();
            return;
        }

        warn!("signaling lost ({reason}), tearing down media");
        self.producers.teardown();
        self.consumers.teardown();
        self.devices.close_transports();
        {
            let mut spotlights = self.spotlights.lock().unwrap_or_else(|e| e.into_inner());
            spotlights.clear();
        }
        self.store.dispatch(StoreAction::ClearPeers);
        self.store.dispatch(StoreAction::SetSpotlights(Vec::new()));
        self.store.dispatch(StoreAction::SetSelectedPeers(Vec::new()));
        self.store.dispatch(StoreAction::SetRoomState(ConnectionState::Connecting));
        self.notifier.error("Connection lost, reconnecting");
    }

    pub(crate) fn on_reconnect(&self) {
        // The SFU correlates on the signaling session; no rejoin needed.
        info!("signaling reconnected");
        self.store.dispatch(StoreAction::SetRoomState(ConnectionState::Connected));
        self.notifier.info("Reconnected to the server");
    }

    /// `roomReady`: negotiate transports, join on the SFU and hydrate state.
    pub(crate) async fn join_room(
        self: &Arc<Self>,
        turn_servers: Vec<crate::signaling::protocol::IceServer>,
    ) -> ClientResult<()> {
        self.store.dispatch(StoreAction::SetTurnServers(turn_servers.clone()));
        self.store.dispatch(StoreAction::SetInLobby(false));

        self.devices.load().await?;

        let browser = self.store.with(|s| s.me.browser.clone());
        let produce = self.produce.load(Ordering::SeqCst);
        self.devices
            .create_transports(
                produce,
                self.force_tcp.load(Ordering::SeqCst),
                &turn_servers,
                &browser,
            )
            .await?;

        self.store.dispatch(StoreAction::SetMediaCapabilities(MediaCapabilities {
            can_send_mic: self.devices.can_produce(MediaKind::Audio),
            can_send_webcam: self.devices.can_produce(MediaKind::Video),
            can_share_screen: self.devices.can_produce(MediaKind::Video),
        }));

        let (display_name, picture, from) =
            self.store.with(|s| (s.me.display_name.clone(), s.me.picture.clone(), s.me.from.clone()));

        let response: JoinResponse = self
            .signaling
            .request_as(RoomRequest::Join {
                display_name,
                picture,
                from,
                rtp_capabilities: self.devices.rtp_capabilities(),
                returning: self.returning.load(Ordering::SeqCst),
            })
            .await?;

        self.hydrate(response);
        self.store.dispatch(StoreAction::SetJoined(true));
        self.store.dispatch(StoreAction::SetRoomState(ConnectionState::Connected));
        self.push_spotlights().await;

        if produce {
            self.start_join_media().await;
        }

        info!("joined room");
        Ok(())
    }

    fn hydrate(&self, response: JoinResponse) {
        // The `tracker` field from the join response is intentionally
        // dropped: nothing reads it (see DESIGN.md).
        self.store.dispatch(StoreAction::SetLoggedIn(response.authenticated));
        for role_id in response.roles {
            self.store.dispatch(StoreAction::AddRole(role_id));
        }
        self.store.dispatch(StoreAction::SetUserRoles(response.user_roles));
        self.store.dispatch(StoreAction::SetRoomPermissions(response.room_permissions));
        self.store.dispatch(StoreAction::SetAllowWhenRoleMissing(response.allow_when_role_missing));
        self.store.dispatch(StoreAction::SetChatHistory(response.chat_history));
        self.store.dispatch(StoreAction::SetFileHistory(response.file_history));
        self.store.dispatch(StoreAction::SetLocked(response.locked));
        self.store.dispatch(StoreAction::SetLobbyPeers(response.lobby_peers));
        self.store.dispatch(StoreAction::SetAccessCode(response.access_code));

        {
            let mut spotlights = self.spotlights.lock().unwrap_or_else(|e| e.into_inner());
            // recent speakers first, then the rest of the roster
            spotlights.add_peers(response.last_n_history.iter().map(String::as_str));
            spotlights.add_peers(response.peers.iter().map(|p| p.id.as_str()));
        }

        for info in response.peers {
            self.store.dispatch(StoreAction::AddPeer(Peer::from(info)));
        }
    }

    async fn start_join_media(self: &Arc<Self>) {
        let (can_video, can_audio, peer_count) = self.store.with(|s| {
            (
                s.has_permission(PERMISSION_SHARE_VIDEO) && s.me.media_capabilities.can_send_webcam,
                s.has_permission(PERMISSION_SHARE_AUDIO) && s.me.media_capabilities.can_send_mic,
                s.peers.len(),
            )
        });

        if self.join_video.load(Ordering::SeqCst) && can_video {
            if let Err(e) = self
                .producers
                .update_webcam(WebcamUpdate { init: true, start: true, ..WebcamUpdate::default() })
                .await
            {
                self.surface("Unable to start your camera", e);
            }
        }

        if self.join_audio.load(Ordering::SeqCst) && can_audio {
            match self.producers.update_mic(MicUpdate { start: true, ..MicUpdate::default() }).await
            {
                Ok(()) => {
                    let over_threshold = peer_count >= self.config.auto_mute_threshold;
                    if self.join_muted.load(Ordering::SeqCst) || over_threshold {
                        if let Err(e) = self.producers.mute_mic().await {
                            self.surface("Unable to mute your microphone", e);
                        }
                    }
                }
                Err(e) => self.surface("Unable to start your microphone", e),
            }
        }
    }

    // -- media commands ----------------------------------------------------

    pub async fn mute_mic(&self) {
        if let Err(e) = self.producers.mute_mic().await {
            self.surface("Unable to mute your microphone", e);
        }
    }

    pub async fn unmute_mic(self: &Arc<Self>) {
        if let Err(e) = self.producers.unmute_mic().await {
            self.surface("Unable to unmute your microphone", e);
        }
    }

    pub async fn update_mic(self: &Arc<Self>, update: MicUpdate) {
        if let Err(e) = self.producers.update_mic(update).await {
            self.surface("An error occurred with your microphone", e);
        }
    }

    pub async fn disable_mic(&self) {
        if let Err(e) = self.producers.disable_mic().await {
            self.surface("Unable to stop your microphone", e);
        }
    }

    pub async fn update_webcam(self: &Arc<Self>, update: WebcamUpdate) {
        if let Err(e) = self.producers.update_webcam(update).await {
            self.surface("An error occurred with your camera", e);
        }
    }

    pub async fn disable_webcam(&self) {
        if let Err(e) = self.producers.disable_webcam().await {
            self.surface("Unable to stop your camera", e);
        }
    }

    pub async fn add_extra_video(self: &Arc<Self>, device_id: &str) {
        if let Err(e) = self.producers.add_extra_video(device_id).await {
            self.surface("Unable to share the additional camera", e);
        }
    }

    pub async fn disable_extra_video(&self, producer_id: &str) {
        if let Err(e) = self.producers.disable_extra_video(producer_id).await {
            self.surface("Unable to stop the additional camera", e);
        }
    }

    pub async fn update_screen_sharing(self: &Arc<Self>, update: ScreenSharingUpdate) {
        if let Err(e) = self.producers.update_screen_sharing(update).await {
            self.surface("Unable to share your screen", e);
        }
    }

    pub async fn disable_screen_sharing(&self) {
        if let Err(e) = self.producers.disable_screen_sharing().await {
            self.surface("Unable to stop screen sharing", e);
        }
    }

    pub async fn adapt_consumer_preferred_layers(
        &self,
        consumer_id: &str,
        viewport_width: u32,
        viewport_height: u32,
    ) {
        if let Err(e) = self
            .consumers
            .adapt_preferred_layers(consumer_id, viewport_width, viewport_height)
            .await
        {
            debug!("layer adaptation failed for {}: {}", consumer_id, e);
        }
    }

    pub async fn set_consumer_priority(&self, consumer_id: &str, priority: u8) {
        if let Err(e) = self.consumers.set_consumer_priority(consumer_id, priority).await {
            self.surface("A server request failed", e);
        }
    }

    pub async fn request_consumer_keyframe(&self, consumer_id: &str) {
        if let Err(e) = self.consumers.request_keyframe(consumer_id).await {
            self.surface("A server request failed", e);
        }
    }

    pub fn set_consumer_audio_gain(&self, consumer_id: &str, gain: f64) {
        self.consumers.set_audio_gain(consumer_id, gain);
    }

    /// Re-enumerate local devices; the shell calls this on devicechange.
    pub async fn update_media_devices(&self) {
        if let Some(monitor) = &self.device_monitor {
            if let Err(e) = monitor.update().await {
                self.surface("Unable to list your media devices", e);
            }
        }
    }

    // -- spotlight commands ------------------------------------------------

    pub async fn add_selected_peer(&self, peer_id: &str) {
        {
            let mut spotlights = self.spotlights.lock().unwrap_or_else(|e| e.into_inner());
            spotlights.add_selected(peer_id);
        }
        self.push_spotlights().await;
    }

    pub async fn set_selected_peer(&self, peer_id: &str) {
        {
            let mut spotlights = self.spotlights.lock().unwrap_or_else(|e| e.into_inner());
            spotlights.set_selected(peer_id);
        }
        self.push_spotlights().await;
    }

    pub async fn remove_selected_peer(&self, peer_id: &str) {
        {
            let mut spotlights = self.spotlights.lock().unwrap_or_else(|e| e.into_inner());
            spotlights.remove_selected(peer_id);
        }
        self.push_spotlights().await;
    }

    pub async fn clear_selected_peers(&self) {
        {
            let mut spotlights = self.spotlights.lock().unwrap_or_else(|e| e.into_inner());
            spotlights.clear_selected();
        }
        self.push_spotlights().await;
    }

    pub async fn set_hide_no_video_participants(&self, hide: bool) {
        self.store.dispatch(StoreAction::SetHideNoVideoParticipants(hide));
        {
            let mut spotlights = self.spotlights.lock().unwrap_or_else(|e| e.into_inner());
            spotlights.set_hide_no_video(hide);
        }
        self.push_spotlights().await;
    }

    /// Recompute spotlights and apply them: store, selection trimming and a
    /// batched consumer pause/resume pass.
    pub(crate) async fn push_spotlights(&self) {
        let (list, selected) = {
            let mut spotlights = self.spotlights.lock().unwrap_or_else(|e| e.into_inner());
            let list = spotlights.spotlights();
            // peers that fell out of the spotlight set lose their selection
            let stale: Vec<String> = spotlights
                .selected()
                .iter()
                .filter(|id| !list.contains(id))
                .cloned()
                .collect();
            for peer_id in &stale {
                spotlights.remove_selected(peer_id);
            }
            (list, spotlights.selected().to_vec())
        };

        self.store.dispatch(StoreAction::SetSpotlights(list.clone()));
        self.store.dispatch(StoreAction::SetSelectedPeers(selected));
        self.consumers.update_spotlights(&list).await;
    }

    // -- room commands -----------------------------------------------------

    pub async fn change_display_name(&self, display_name: String) {
        match self
            .signaling
            .request(RoomRequest::ChangeDisplayName { display_name: display_name.clone() })
            .await
        {
            Ok(_) => {
                self.store.dispatch(StoreAction::SetDisplayName(display_name));
                self.notifier.info("Your display name changed");
            }
            Err(e) => self.surface("Unable to change your display name", e),
        }
    }

    pub async fn change_picture(&self, picture: String) {
        match self.signaling.request(RoomRequest::ChangePicture { picture: picture.clone() }).await
        {
            Ok(_) => self.store.dispatch(StoreAction::SetPicture(Some(picture))),
            Err(e) => self.surface("Unable to change your picture", e),
        }
    }

    pub async fn send_chat_message(&self, text: String) {
        let message = self.store.with(|s| ChatMessage {
            peer_id: Some(s.me.peer_id.clone()),
            display_name: Some(s.me.display_name.clone()),
            picture: s.me.picture.clone(),
            text,
            time: None,
        });
        match self
            .signaling
            .request(RoomRequest::ChatMessage { chat_message: message.clone() })
            .await
        {
            Ok(_) => self.store.dispatch(StoreAction::AddChatMessage(message)),
            Err(e) => self.surface("Unable to send the message", e),
        }
    }

    pub async fn send_file(&self, magnet_uri: String) {
        match self.signaling.request(RoomRequest::SendFile { magnet_uri: magnet_uri.clone() }).await
        {
            Ok(_) => {
                let file = self.store.with(|s| FileMessage {
                    peer_id: Some(s.me.peer_id.clone()),
                    display_name: Some(s.me.display_name.clone()),
                    picture: s.me.picture.clone(),
                    magnet_uri,
                    time: None,
                });
                self.store.dispatch(StoreAction::AddFile(file));
            }
            Err(e) => self.surface("Unable to share the file", e),
        }
    }

    pub async fn set_raised_hand(&self, raised_hand: bool) {
        match self.signaling.request(RoomRequest::RaisedHand { raised_hand }).await {
            Ok(_) => self
                .store
                .dispatch(StoreAction::SetRaisedHand { raised_hand, timestamp: None }),
            Err(e) => self.surface("Unable to change your raised hand", e),
        }
    }

    pub async fn lock_room(&self) {
        match self.signaling.request(RoomRequest::LockRoom).await {
            Ok(_) => {
                self.store.dispatch(StoreAction::SetLocked(true));
                self.notifier.info("You locked the room");
            }
            Err(e) => self.surface("Unable to lock the room", e),
        }
    }

    pub async fn unlock_room(&self) {
        match self.signaling.request(RoomRequest::UnlockRoom).await {
            Ok(_) => {
                self.store.dispatch(StoreAction::SetLocked(false));
                self.notifier.info("You unlocked the room");
            }
            Err(e) => self.surface("Unable to unlock the room", e),
        }
    }

    pub async fn set_access_code(&self, access_code: String) {
        match self
            .signaling
            .request(RoomRequest::SetAccessCode { access_code: access_code.clone() })
            .await
        {
            Ok(_) => self.store.dispatch(StoreAction::SetAccessCode(Some(access_code))),
            Err(e) => self.surface("Unable to set the access code", e),
        }
    }

    pub async fn set_join_by_access_code(&self, join_by_access_code: bool) {
        match self
            .signaling
            .request(RoomRequest::SetJoinByAccessCode { join_by_access_code })
            .await
        {
            Ok(_) => self.store.dispatch(StoreAction::SetJoinByAccessCode(join_by_access_code)),
            Err(e) => self.surface("Unable to change the access code setting", e),
        }
    }

    pub async fn add_consent_for_recording(&self, consent: bool) {
        let peer_id = self.store.with(|s| s.me.peer_id.clone());
        match self.signaling.request(RoomRequest::AddConsentForRecording { consent }).await {
            Ok(_) => self.store.dispatch(StoreAction::SetRecordingConsent { peer_id, consent }),
            Err(e) => self.surface("Unable to update the recording consent", e),
        }
    }

    pub async fn promote_lobby_peer(&self, peer_id: &str) {
        if let Err(e) =
            self.signaling.request(RoomRequest::PromotePeer { peer_id: peer_id.to_string() }).await
        {
            self.surface("Unable to promote the peer", e);
        }
    }

    pub async fn promote_all_lobby_peers(&self) {
        if let Err(e) = self.signaling.request(RoomRequest::PromoteAllPeers).await {
            self.surface("Unable to promote the lobby", e);
        }
    }

    pub async fn get_transport_stats(&self, transport_id: &str) {
        match self
            .signaling
            .request(RoomRequest::GetTransportStats { transport_id: transport_id.to_string() })
            .await
        {
            Ok(stats) => self.store.dispatch(StoreAction::SetTransportStats {
                transport_id: transport_id.to_string(),
                stats,
            }),
            Err(e) => debug!("getTransportStats failed: {}", e),
        }
    }

    // -- moderator commands ------------------------------------------------

    pub async fn moderator_clear_chat(&self) {
        match self.signaling.request(RoomRequest::ModeratorClearChat).await {
            Ok(_) => self.store.dispatch(StoreAction::ClearChat),
            Err(e) => self.surface("Unable to clear the chat", e),
        }
    }

    pub async fn moderator_give_role(&self, peer_id: &str, role_id: RoleId) {
        self.moderate(RoomRequest::ModeratorGiveRole { peer_id: peer_id.to_string(), role_id })
            .await;
    }

    pub async fn moderator_remove_role(&self, peer_id: &str, role_id: RoleId) {
        self.moderate(RoomRequest::ModeratorRemoveRole { peer_id: peer_id.to_string(), role_id })
            .await;
    }

    pub async fn moderator_kick_peer(&self, peer_id: &str) {
        self.moderate(RoomRequest::ModeratorKickPeer { peer_id: peer_id.to_string() }).await;
    }

    pub async fn moderator_mute_peer(&self, peer_id: &str) {
        self.moderate(RoomRequest::ModeratorMute { peer_id: peer_id.to_string() }).await;
    }

    pub async fn moderator_mute_all(&self) {
        self.moderate(RoomRequest::ModeratorMuteAll).await;
    }

    pub async fn moderator_stop_video(&self, peer_id: &str) {
        self.moderate(RoomRequest::ModeratorStopVideo { peer_id: peer_id.to_string() }).await;
    }

    pub async fn moderator_stop_all_video(&self) {
        self.moderate(RoomRequest::ModeratorStopAllVideo).await;
    }

    pub async fn moderator_stop_screen_sharing(&self, peer_id: &str) {
        self.moderate(RoomRequest::ModeratorStopScreenSharing { peer_id: peer_id.to_string() })
            .await;
    }

    pub async fn moderator_stop_all_screen_sharing(&self) {
        self.moderate(RoomRequest::ModeratorStopAllScreenSharing).await;
    }

    pub async fn moderator_close_meeting(&self) {
        self.moderate(RoomRequest::ModeratorCloseMeeting).await;
    }

    pub async fn moderator_lower_hand(&self, peer_id: &str) {
        self.moderate(RoomRequest::ModeratorLowerHand { peer_id: peer_id.to_string() }).await;
    }

    async fn moderate(&self, request: RoomRequest) {
        if let Err(e) = self.signaling.request(request).await {
            self.surface("The moderator action failed", e);
        }
    }

    // -- internals ---------------------------------------------------------

    fn surface(&self, text: &str, error: ClientError) {
        error!("{}: {}", text, error);
        self.notifier.error(text);
    }
}
