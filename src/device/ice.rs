#![forbid(unsafe_code)]

// ICE restart controller - one per transport, single restart in flight,
// exponential backoff on failure

use super::MediaTransport;
use crate::error::ClientResult;
use crate::signaling::protocol::{IceRestarted, RoomRequest};
use crate::signaling::SignalingSession;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const INITIAL_RESTART_DELAY: Duration = Duration::from_millis(2_000);
pub const MAX_RESTART_DELAY: Duration = Duration::from_secs(30);

/// Schedules ICE restarts for one transport. Re-entry while a restart is in
/// flight is suppressed by the `restarting` flag; a failed restart doubles
/// the delay and reschedules.
#[derive(Clone)]
pub struct IceRestartControl {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn MediaTransport>,
    signaling: Arc<SignalingSession>,
    restarting: AtomicBool,
    timer: StdMutex<Option<JoinHandle<()>>>,
}

impl IceRestartControl {
    pub fn new(transport: Arc<dyn MediaTransport>, signaling: Arc<SignalingSession>) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                signaling,
                restarting: AtomicBool::new(false),
                timer: StdMutex::new(None),
            }),
        }
    }

    /// Schedule a restart after the initial delay, replacing any pending one.
    pub fn schedule(&self) {
        self.schedule_after(INITIAL_RESTART_DELAY);
    }

    pub fn schedule_after(&self, delay: Duration) {
        self.cancel_pending();

        let ctl = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Detach: once the timer fires, the restart itself is no longer
            // cancellable by a newer schedule.
            tokio::spawn(ctl.fire(delay));
        });

        let mut timer = self.inner.timer.lock().unwrap_or_else(|e| e.into_inner());
        *timer = Some(handle);
    }

    /// Abort a pending (not yet fired) restart timer.
    pub fn cancel_pending(&self) {
        let mut timer = self.inner.timer.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = timer.take() {
            handle.abort();
        }
    }

    pub fn restarting(&self) -> bool {
        self.inner.restarting.load(Ordering::SeqCst)
    }

    async fn fire(self, delay: Duration) {
        if self.inner.restarting.swap(true, Ordering::SeqCst) {
            debug!(
                "ICE restart already in flight on transport {}",
                self.inner.transport.id()
            );
            return;
        }

        let result = self.restart().await;
        self.inner.restarting.store(false, Ordering::SeqCst);

        match result {
            Ok(()) => info!("ICE restarted on transport {}", self.inner.transport.id()),
            Err(error) => {
                let next = (delay * 2).min(MAX_RESTART_DELAY);
                warn!(
                    "ICE restart failed on transport {}: {}; retrying in {:?}",
                    self.inner.transport.id(),
                    error,
                    next
                );
                self.schedule_after(next);
            }
        }
    }

    async fn restart(&self) -> ClientResult<()> {
        let response: IceRestarted = self
            .inner
            .signaling
            .request_as(RoomRequest::RestartIce { transport_id: self.inner.transport.id() })
            .await?;
        self.inner.transport.restart_ice(response.ice_parameters).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::signaling::transport::TransportError;
    use crate::testing::{FakeMediaTransport, FakeSignalingTransport};
    use serde_json::json;

    fn setup() -> (IceRestartControl, Arc<FakeMediaTransport>, Arc<FakeSignalingTransport>) {
        let signaling_transport = FakeSignalingTransport::with_defaults();
        let mut config = ClientConfig::default();
        config.request_retries = 1;
        let signaling = Arc::new(SignalingSession::new(signaling_transport.clone(), &config));
        let media_transport = Arc::new(FakeMediaTransport::new("t1"));
        let ctl = IceRestartControl::new(media_transport.clone(), signaling);
        (ctl, media_transport, signaling_transport)
    }

    #[tokio::test(start_paused = true)]
    async fn restart_fires_after_delay_and_clears_flag() {
        let (ctl, media_transport, signaling_transport) = setup();

        ctl.schedule();
        assert_eq!(signaling_transport.request_count("restartIce"), 0);

        tokio::time::sleep(Duration::from_millis(2_100)).await;
        tokio::task::yield_now().await;

        assert_eq!(signaling_transport.request_count("restartIce"), 1);
        assert_eq!(media_transport.ice_restart_count(), 1);
        assert!(!ctl.restarting());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_before_fire_suppresses_restart() {
        let (ctl, _, signaling_transport) = setup();

        ctl.schedule();
        tokio::time::sleep(Duration::from_millis(500)).await;
        ctl.cancel_pending();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(signaling_transport.request_count("restartIce"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_reschedules_with_doubled_delay() {
        let (ctl, _, signaling_transport) = setup();
        // first restartIce attempt is rejected, later ones succeed
        signaling_transport.fail_next("restartIce", || {
            TransportError::Server(json!({"message": "not ready"}))
        });

        ctl.schedule();
        tokio::time::sleep(Duration::from_millis(2_100)).await;
        tokio::task::yield_now().await;
        assert_eq!(signaling_transport.request_count("restartIce"), 1);

        // next attempt should come ~4s after the failure, not 2s
        tokio::time::sleep(Duration::from_millis(2_000)).await;
        tokio::task::yield_now().await;
        assert_eq!(signaling_transport.request_count("restartIce"), 1);

        tokio::time::sleep(Duration::from_millis(2_200)).await;
        tokio::task::yield_now().await;
        assert_eq!(signaling_transport.request_count("restartIce"), 2);
        assert!(!ctl.restarting());
    }

    #[tokio::test(start_paused = true)]
    async fn only_one_restart_in_flight() {
        let (ctl, media_transport, signaling_transport) = setup();
        // hold the restartIce ack so the first restart stays in flight
        signaling_transport.hang_next("restartIce");

        ctl.schedule();
        tokio::time::sleep(Duration::from_millis(2_100)).await;
        tokio::task::yield_now().await;
        assert!(ctl.restarting());

        // a second timer firing while the first is in flight must bail out
        ctl.schedule_after(Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(200)).await;
        tokio::task::yield_now().await;

        assert_eq!(signaling_transport.request_count("restartIce"), 1);
        assert_eq!(media_transport.ice_restart_count(), 0);
    }
}
