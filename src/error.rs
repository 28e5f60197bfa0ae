use std::time::Duration;

use thiserror::Error;

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors raised while establishing or driving a realtime connection.
///
/// Everything that can go wrong during `connect` surfaces as one of these.
/// Steady-state failures (sends, inbound parsing) are logged instead.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The token endpoint failed or returned something unusable.
    #[error("failed to get session token: {0}")]
    Session(String),

    /// Missing credential fields or an unusable endpoint target.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Microphone access was denied.
    #[error("microphone access denied: {0}")]
    Permission(String),

    /// The capture facility is missing or failed.
    #[error("audio capture unavailable: {0}")]
    Media(String),

    /// The peer backend rejected an operation.
    #[error("peer connection error: {0}")]
    Peer(String),

    /// The SDP exchange answered with a non-success status.
    #[error("failed to connect to realtime endpoint: {status} - {body}")]
    Negotiation { status: u16, body: String },

    /// The connection failed or closed before it became ready.
    #[error("connection lost before it became ready: {0}")]
    Liveness(String),

    #[error("timed out after {0:?} waiting for the connection to become ready")]
    Timeout(Duration),

    #[error("already connected")]
    AlreadyConnected,

    #[error("a connection attempt is already in progress")]
    ConnectInProgress,

    /// `disconnect` was called while `connect` was still in flight.
    #[error("connection attempt cancelled by disconnect")]
    Cancelled,

    /// The event channel is not open.
    #[error("event channel is not open")]
    NotReady,

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TransportError {
    pub fn session<S: Into<String>>(msg: S) -> Self {
        Self::Session(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    pub fn permission<S: Into<String>>(msg: S) -> Self {
        Self::Permission(msg.into())
    }

    pub fn media<S: Into<String>>(msg: S) -> Self {
        Self::Media(msg.into())
    }

    pub fn peer<S: Into<String>>(msg: S) -> Self {
        Self::Peer(msg.into())
    }

    pub fn liveness<S: Into<String>>(msg: S) -> Self {
        Self::Liveness(msg.into())
    }
}
