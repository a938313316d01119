#![forbid(unsafe_code)]

// Signaling transport interface - implemented by the concrete framing layer
// (socket.io-style channel with per-message acknowledgements)

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Disconnect reason that marks the session permanently closed by the server.
/// Any other reason is transient and the transport will try to reconnect.
pub const SERVER_DISCONNECT_REASON: &str = "io server disconnect";

#[derive(Error, Debug)]
pub enum TransportError {
    /// Channel is closed; no ack will ever arrive.
    #[error("signaling channel closed")]
    Closed,
    /// The server acked with an error payload.
    #[error("server error: {0}")]
    Server(Value),
    /// The channel failed before an ack arrived.
    #[error("transport failure: {0}")]
    Failed(String),
}

/// Error reply for inbound peer requests.
#[derive(Debug, Clone)]
pub struct RequestRejection {
    pub code: u16,
    pub reason: String,
}

pub type RequestAck = oneshot::Sender<Result<Value, RequestRejection>>;

/// Connection lifecycle and inbound traffic, in arrival order.
#[derive(Debug)]
pub enum SignalingEvent {
    Connect,
    Disconnect { reason: String },
    Reconnect,
    ReconnectFailed,
    /// Inbound `{method, data}` notification.
    Notification(Value),
    /// Inbound request from the server-side peer. This client answers
    /// `500 unknown method` to everything.
    Request { payload: Value, ack: RequestAck },
}

impl SignalingEvent {
    /// True when the disconnect reason means the server closed us for good.
    pub fn is_permanent_disconnect(&self) -> bool {
        matches!(self, SignalingEvent::Disconnect { reason } if reason == SERVER_DISCONNECT_REASON)
    }
}

pub type SignalingEvents = mpsc::UnboundedReceiver<SignalingEvent>;

/// Outbound side of the signaling channel. The concrete implementation wraps
/// the message framing library; it owns serialization to the wire and the
/// per-message ack plumbing, and feeds `SignalingEvent`s into the receiver
/// handed to the room client.
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Emit one `{method, data}` request and await its acknowledgement.
    /// No FIFO ordering is guaranteed across concurrent emits.
    async fn emit(&self, payload: Value) -> Result<Value, TransportError>;

    /// Tear the channel down. Subsequent emits fail with `Closed`.
    fn close(&self);
}
