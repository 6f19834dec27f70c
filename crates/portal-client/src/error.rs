//! Error types for portal-client.

use std::time::Duration;

use portal_proto::CallId;
use thiserror::Error;

/// Errors raised by a transport when handing it an outbound event.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport has been shut down and accepts no further events.
    #[error("transport closed")]
    Closed,

    /// The event could not be encoded for the wire.
    #[error("failed to encode event: {0}")]
    Encode(String),
}

/// Errors that settle a call.
///
/// [`CallError::Remote`] and [`CallError::ConnectionClosed`] keep the exact
/// message texts callers historically matched on, while the variant tells
/// the two apart.
#[derive(Debug, Error)]
pub enum CallError {
    /// The peer executed the call and reported a failure.
    #[error("{0}")]
    Remote(String),

    /// The connection was lost before a response arrived.
    #[error("Connection closed")]
    ConnectionClosed,

    /// A pre-built envelope reused an identifier that is still pending.
    #[error("call id already pending: {0}")]
    DuplicateCallId(CallId),

    /// No response arrived within the caller's deadline.
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    /// The transport refused the outbound call.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Call parameters could not be encoded.
    #[error("failed to encode params: {0}")]
    Encode(String),

    /// The response body did not match the expected result type.
    #[error("failed to decode result: {0}")]
    Decode(String),
}

impl CallError {
    /// Whether the call failed because the connection went away.
    #[must_use]
    pub const fn is_connection_loss(&self) -> bool {
        matches!(self, Self::ConnectionClosed)
    }

    /// Whether the peer reported an application error.
    #[must_use]
    pub const fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }
}

/// Errors from client construction, configuration and the CLI.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A call failed.
    #[error("call failed: {0}")]
    Call(#[from] CallError),
}
