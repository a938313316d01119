#![forbid(unsafe_code)]

// Inbound notification dispatcher

use super::RoomClient;
use crate::error::ClientResult;
use crate::media::consumers::NewConsumerInfo;
use crate::notify::NotificationSound;
use crate::signaling::protocol::{LobbyPeerInfo, RoomNotification};
use crate::store::{Peer, StoreAction};
use mediasoup::prelude::MediaKind;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error};

impl RoomClient {
    /// Decode and dispatch one inbound notification. Unknown methods are
    /// logged and swallowed; handler errors surface a generic toast without
    /// breaking the dispatcher.
    pub(crate) async fn handle_notification_value(self: &Arc<Self>, value: Value) {
        let notification = match serde_json::from_value::<RoomNotification>(value.clone()) {
            Ok(notification) => notification,
            Err(_) => {
                let method = value.get("method").and_then(Value::as_str).unwrap_or("?");
                error!("unknown notification method: {}", method);
                return;
            }
        };

        if let Err(e) = self.handle_notification(notification).await {
            error!("notification handling failed: {}", e);
            self.notifier.error("A server request failed");
        }
    }

    async fn handle_notification(self: &Arc<Self>, notification: RoomNotification) -> ClientResult<()> {
        use RoomNotification::*;

        match notification {
            EnteredLobby => {
                self.store.dispatch(StoreAction::SetInLobby(true));
                self.notifier.info("You are in the lobby, waiting to be let in");
            }
            SignInRequired => {
                self.store.dispatch(StoreAction::SetSignInRequired(true));
                self.notifier.info("You need to sign in to join this room");
            }
            OverRoomLimit => {
                self.store.dispatch(StoreAction::SetOverRoomLimit(true));
                self.notifier.error("The room is full");
            }
            RoomReady { turn_servers } => {
                self.join_room(turn_servers).await?;
            }
            RoomBack => {
                self.store.dispatch(StoreAction::SetRoomState(
                    crate::store::ConnectionState::Connected,
                ));
            }
            LockRoom => {
                self.store.dispatch(StoreAction::SetLocked(true));
                self.notifier.info("The room is now locked");
            }
            UnlockRoom => {
                self.store.dispatch(StoreAction::SetLocked(false));
                self.notifier.info("The room is now unlocked");
            }
            ParkedPeer { peer_id } => {
                self.store.dispatch(StoreAction::AddLobbyPeer(LobbyPeerInfo {
                    id: peer_id,
                    display_name: None,
                    picture: None,
                }));
                self.notifier
                    .info_with_sound("Someone entered the lobby", NotificationSound::ParkedPeer);
            }
            ParkedPeers { lobby_peers } => {
                for peer in lobby_peers {
                    self.store.dispatch(StoreAction::AddLobbyPeer(peer));
                }
            }
            LobbyPeerClosed { peer_id } => {
                self.store.dispatch(StoreAction::RemoveLobbyPeer { peer_id });
            }
            LobbyPromotedPeer { peer_id } => {
                // the peer re-enters through newPeer
                self.store.dispatch(StoreAction::RemoveLobbyPeer { peer_id });
            }
            LobbyChangeDisplayName { peer_id, display_name } => {
                self.store
                    .dispatch(StoreAction::SetLobbyPeerDisplayName { peer_id, display_name });
            }
            LobbyChangePicture { peer_id, picture } => {
                self.store.dispatch(StoreAction::SetLobbyPeerPicture { peer_id, picture });
            }
            SetAccessCode { access_code } => {
                self.store.dispatch(StoreAction::SetAccessCode(Some(access_code)));
            }
            SetJoinByAccessCode { join_by_access_code } => {
                self.store.dispatch(StoreAction::SetJoinByAccessCode(join_by_access_code));
            }
            ActiveSpeaker { peer_id } => {
                self.store.dispatch(StoreAction::SetActiveSpeaker(peer_id.clone()));
                if let Some(peer_id) = peer_id {
                    let me = self.store.with(|s| s.me.peer_id.clone());
                    if peer_id != me {
                        {
                            let mut spotlights =
                                self.spotlights.lock().unwrap_or_else(|e| e.into_inner());
                            spotlights.on_active_speaker(&peer_id);
                        }
                        self.push_spotlights().await;
                    }
                }
            }
            ChangeDisplayName { peer_id, display_name, old_display_name } => {
                let text = match old_display_name {
                    Some(old) if !old.is_empty() => {
                        format!("{old} is now {display_name}")
                    }
                    _ => format!("A participant is now {display_name}"),
                };
                self.store.dispatch(StoreAction::SetPeerDisplayName { peer_id, display_name });
                self.notifier.info(text);
            }
            ChangePicture { peer_id, picture } => {
                self.store.dispatch(StoreAction::SetPeerPicture { peer_id, picture });
            }
            RaisedHand { peer_id, raised_hand, raised_hand_timestamp } => {
                self.store.dispatch(StoreAction::SetPeerRaisedHand {
                    peer_id,
                    raised_hand,
                    timestamp: raised_hand_timestamp,
                });
                if raised_hand {
                    self.notifier.info_with_sound(
                        "A participant raised their hand",
                        NotificationSound::RaisedHand,
                    );
                }
            }
            ChatMessage { peer_id: _, chat_message } => {
                self.store.dispatch(StoreAction::AddChatMessage(chat_message));
                self.notifier
                    .info_with_sound("New chat message", NotificationSound::ChatMessage);
            }
            ModeratorClearChat => {
                self.store.dispatch(StoreAction::ClearChat);
                self.notifier.info("A moderator cleared the chat");
            }
            SendFile(file) => {
                self.store.dispatch(StoreAction::AddFile(file));
                self.notifier.info_with_sound("A file was shared", NotificationSound::SendFile);
            }
            ProducerScore { producer_id, score } => {
                self.store.dispatch(StoreAction::SetProducerScore { producer_id, score });
            }
            NewPeer(info) => {
                let me = self.store.with(|s| s.me.peer_id.clone());
                if info.id == me {
                    return Ok(());
                }
                let name = info.display_name.clone().unwrap_or_else(|| "Someone".into());
                let returning = info.returning;
                {
                    let mut spotlights =
                        self.spotlights.lock().unwrap_or_else(|e| e.into_inner());
                    spotlights.add_peer(&info.id);
                }
                self.store.dispatch(StoreAction::AddPeer(Peer::from(info)));
                self.push_spotlights().await;
                if !returning {
                    self.notifier.info_with_sound(
                        format!("{name} joined the room"),
                        NotificationSound::Default,
                    );
                }
            }
            PeerClosed { peer_id } => {
                self.consumers.close_peer_consumers(&peer_id);
                {
                    let mut spotlights =
                        self.spotlights.lock().unwrap_or_else(|e| e.into_inner());
                    spotlights.remove_peer(&peer_id);
                }
                self.store.dispatch(StoreAction::RemovePeer { peer_id });
                self.push_spotlights().await;
            }
            NewConsumer {
                peer_id,
                producer_id,
                id,
                kind,
                rtp_parameters,
                consumer_type,
                app_data,
                producer_paused,
                score,
            } => {
                let is_video = kind == MediaKind::Video;
                self.consumers
                    .add_consumer(NewConsumerInfo {
                        peer_id: peer_id.clone(),
                        producer_id,
                        id,
                        kind,
                        rtp_parameters,
                        consumer_type,
                        app_data,
                        producer_paused,
                        score,
                    })
                    .await?;
                if is_video {
                    {
                        let mut spotlights =
                            self.spotlights.lock().unwrap_or_else(|e| e.into_inner());
                        spotlights.set_peer_video(&peer_id, true);
                    }
                    self.push_spotlights().await;
                }
            }
            ConsumerClosed { consumer_id } => {
                let owner = self.store.with(|s| {
                    s.consumers.get(&consumer_id).map(|c| (c.peer_id.clone(), c.kind))
                });
                self.consumers.close_consumer(&consumer_id);
                if let Some((peer_id, MediaKind::Video)) = owner {
                    let still_has_video = self.store.with(|s| {
                        s.consumers
                            .values()
                            .any(|c| c.peer_id == peer_id && c.kind == MediaKind::Video)
                    });
                    if !still_has_video {
                        let mut spotlights =
                            self.spotlights.lock().unwrap_or_else(|e| e.into_inner());
                        spotlights.set_peer_video(&peer_id, false);
                        drop(spotlights);
                        self.push_spotlights().await;
                    }
                }
            }
            ConsumerPaused { consumer_id } => self.consumers.on_remote_paused(&consumer_id),
            ConsumerResumed { consumer_id } => self.consumers.on_remote_resumed(&consumer_id),
            ConsumerLayersChanged { consumer_id, spatial_layer, temporal_layer } => {
                self.store.dispatch(StoreAction::SetConsumerCurrentLayers {
                    consumer_id,
                    spatial: spatial_layer,
                    temporal: temporal_layer,
                });
            }
            ConsumerScore { consumer_id, score } => {
                self.store.dispatch(StoreAction::SetConsumerScore { consumer_id, score });
            }
            ModeratorMute => {
                self.producers.mute_mic().await?;
                self.notifier.info("A moderator muted your audio");
            }
            ModeratorStopVideo => {
                self.producers.disable_webcam().await?;
                self.notifier.info("A moderator stopped your video");
            }
            ModeratorStopScreenSharing => {
                self.producers.disable_screen_sharing().await?;
                self.notifier.info("A moderator stopped your screen sharing");
            }
            ModeratorKick => {
                self.notifier.error("A moderator removed you from the room");
                self.close();
            }
            ModeratorLowerHand => {
                self.set_raised_hand(false).await;
            }
            GotRole { peer_id, role_id } => {
                let me = self.store.with(|s| s.me.peer_id.clone());
                if peer_id == me {
                    self.store.dispatch(StoreAction::AddRole(role_id));
                    self.notifier.info("You were given a new role");
                } else {
                    self.store.dispatch(StoreAction::GivePeerRole { peer_id, role_id });
                }
            }
            LostRole { peer_id, role_id } => {
                let me = self.store.with(|s| s.me.peer_id.clone());
                if peer_id == me {
                    self.store.dispatch(StoreAction::RemoveRole(role_id));
                    self.notifier.info("A role was taken from you");
                } else {
                    self.store.dispatch(StoreAction::RemovePeerRole { peer_id, role_id });
                }
            }
            AddConsentForRecording { peer_id, consent } => {
                self.store.dispatch(StoreAction::SetRecordingConsent { peer_id, consent });
            }
            SetLocalRecording { peer_id, local_recording_state } => {
                let me = self.store.with(|s| s.me.peer_id.clone());
                if peer_id == me {
                    self.store
                        .dispatch(StoreAction::SetMyLocalRecording(Some(local_recording_state)));
                } else {
                    self.store.dispatch(StoreAction::SetPeerLocalRecording {
                        peer_id,
                        state: local_recording_state,
                    });
                    debug!("peer local recording: {:?}", local_recording_state);
                    if local_recording_state
                        == crate::signaling::protocol::LocalRecordingState::Start
                    {
                        self.notifier.info("A participant started local recording");
                    }
                }
            }
        }

        Ok(())
    }
}
