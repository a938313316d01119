#![forbid(unsafe_code)]

// Notification surface - user-visible events emitted to the embedding shell

use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Info,
    Error,
}

/// Sound cue identifiers; the shell owns the actual audio assets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationSound {
    Default,
    ChatMessage,
    RaisedHand,
    SendFile,
    ParkedPeer,
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub text: String,
    pub kind: NotificationKind,
    pub sound: Option<NotificationSound>,
}

/// Centralized emitter for user-visible events. Sounds are dropped when the
/// config disables them; text always goes through.
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<Notification>,
    sounds_enabled: bool,
}

pub type Notifications = mpsc::UnboundedReceiver<Notification>;

impl Notifier {
    pub fn new(sounds_enabled: bool) -> (Self, Notifications) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, sounds_enabled }, rx)
    }

    pub fn info(&self, text: impl Into<String>) {
        self.emit(text.into(), NotificationKind::Info, None);
    }

    pub fn info_with_sound(&self, text: impl Into<String>, sound: NotificationSound) {
        self.emit(text.into(), NotificationKind::Info, Some(sound));
    }

    pub fn error(&self, text: impl Into<String>) {
        self.emit(text.into(), NotificationKind::Error, None);
    }

    fn emit(&self, text: String, kind: NotificationKind, sound: Option<NotificationSound>) {
        let sound = if self.sounds_enabled { sound } else { None };
        debug!("notification ({kind:?}): {text}");
        // A shell that dropped the receiver just stops seeing toasts.
        let _ = self.tx.send(Notification { text, kind, sound });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sounds_are_gated_by_config() {
        let (notifier, mut rx) = Notifier::new(false);
        notifier.info_with_sound("hand raised", NotificationSound::RaisedHand);
        let notification = rx.try_recv().unwrap();
        assert_eq!(notification.sound, None);

        let (notifier, mut rx) = Notifier::new(true);
        notifier.info_with_sound("hand raised", NotificationSound::RaisedHand);
        let notification = rx.try_recv().unwrap();
        assert_eq!(notification.sound, Some(NotificationSound::RaisedHand));
        assert_eq!(notification.kind, NotificationKind::Info);
    }
}
