#![forbid(unsafe_code)]

// Signaling session - request/response with timeout and retry over the
// persistent channel

pub mod protocol;
pub mod transport;

pub use protocol::{RoomNotification, RoomRequest};
pub use transport::{
    SignalingEvent, SignalingEvents, SignalingTransport, TransportError, SERVER_DISCONNECT_REASON,
};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult, NOT_FOUND_IN_MEDIASOUP_KEY};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use transport::{RequestAck, RequestRejection};

/// Request/response layer over the signaling transport.
///
/// Each request is serialized once and retried on timeout only; other
/// failures propagate to the caller. Responses may arrive in any order
/// relative to other in-flight requests.
pub struct SignalingSession {
    transport: Arc<dyn SignalingTransport>,
    request_timeout: Duration,
    request_retries: usize,
    closed: AtomicBool,
}

impl SignalingSession {
    pub fn new(transport: Arc<dyn SignalingTransport>, config: &ClientConfig) -> Self {
        Self {
            transport,
            request_timeout: config.request_timeout(),
            request_retries: config.request_retries.max(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Send a request and await its ack, deserialized into `T`.
    pub async fn request_as<T: DeserializeOwned>(&self, request: RoomRequest) -> ClientResult<T> {
        let response = self.request(request).await?;
        Ok(serde_json::from_value(response)?)
    }

    /// Send a request and await its raw ack payload.
    pub async fn request(&self, request: RoomRequest) -> ClientResult<Value> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Disconnected);
        }

        let payload = serde_json::to_value(&request)?;
        let method = payload
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();

        for attempt in 1..=self.request_retries {
            match tokio::time::timeout(self.request_timeout, self.transport.emit(payload.clone()))
                .await
            {
                Ok(Ok(response)) => {
                    debug!("request {} acked on attempt {}", method, attempt);
                    return Ok(response);
                }
                Ok(Err(error)) => return Err(map_transport_error(&method, error)),
                Err(_) => {
                    warn!(
                        "request {} timed out (attempt {}/{})",
                        method, attempt, self.request_retries
                    );
                }
            }
        }

        Err(ClientError::SignalingTimeout { method, attempts: self.request_retries })
    }

    /// Answer an inbound peer request. This client understands none of them.
    pub fn reject_peer_request(payload: &Value, ack: RequestAck) {
        let method = payload.get("method").and_then(Value::as_str).unwrap_or("unknown");
        debug!("rejecting inbound request {}", method);
        let _ = ack.send(Err(RequestRejection { code: 500, reason: "unknown method".into() }));
    }

    /// Mark the session closed and tear down the channel. In-flight requests
    /// fail with `Closed` from the transport; later calls short-circuit.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.transport.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

fn map_transport_error(method: &str, error: TransportError) -> ClientError {
    match error {
        TransportError::Closed => ClientError::Disconnected,
        TransportError::Failed(reason) => ClientError::Channel(reason),
        TransportError::Server(value) => {
            let not_found = value
                .get(NOT_FOUND_IN_MEDIASOUP_KEY)
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if not_found {
                ClientError::NotFoundInSfu(method.to_string())
            } else {
                let reason = value
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| value.to_string());
                ClientError::ServerRejected { method: method.to_string(), reason }
            }
        }
    }
}
