#![forbid(unsafe_code)]

// Error taxonomy for room client operations

use mediasoup::prelude::MediaKind;
use thiserror::Error;

/// Marker key the SFU sets on error acks when the referenced producer or
/// consumer no longer exists server-side.
pub const NOT_FOUND_IN_MEDIASOUP_KEY: &str = "notFoundInMediasoupError";

#[derive(Error, Debug)]
pub enum ClientError {
    /// A signaling request exceeded `request_timeout` on every attempt.
    #[error("signaling request {method:?} timed out after {attempts} attempts")]
    SignalingTimeout { method: String, attempts: usize },

    /// The SFU no longer knows the referenced producer/consumer. Callers
    /// close the local counterpart silently.
    #[error("resource not found in SFU: {0}")]
    NotFoundInSfu(String),

    /// The SFU acked the request with an error payload.
    #[error("server rejected {method}: {reason}")]
    ServerRejected { method: String, reason: String },

    /// The underlying signaling channel failed before an ack arrived.
    #[error("signaling channel error: {0}")]
    Channel(String),

    /// The signaling channel is closed; the room has been torn down.
    #[error("signaling disconnected")]
    Disconnected,

    /// getUserMedia / screen capture failed or was denied.
    #[error("media acquisition failed: {0}")]
    MediaAcquisition(String),

    /// The device cannot produce the requested kind.
    #[error("device cannot produce {0:?}")]
    DeviceCapability(MediaKind),

    /// The SFU device library reported an error.
    #[error("media device error: {0}")]
    Device(String),

    /// Programmatic misuse, e.g. device change without restart.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The referenced local resource does not exist.
    #[error("{0} not found")]
    NotFound(String),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ClientError {
    /// True when the error should close the local producer/consumer rather
    /// than surface to the user.
    pub fn is_not_found_in_sfu(&self) -> bool {
        matches!(self, ClientError::NotFoundInSfu(_))
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
