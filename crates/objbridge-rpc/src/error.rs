use std::time::Duration;

use objbridge_transport::TransportError;

use crate::message::ErrorObject;

/// Errors surfaced by the correlation layer.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The underlying channel failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A message could not be serialized or parsed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The peer answered the call with an error.
    #[error("remote error: {}", .0.message)]
    Remote(ErrorObject),

    /// No response arrived within the configured call timeout.
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    /// The channel closed while the call was still pending.
    #[error("connection closed before response to request {0}")]
    Closed(u64),
}

pub type Result<T> = std::result::Result<T, RpcError>;
