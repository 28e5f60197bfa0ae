//! Platform seams: peer connection, event channel and local media.
//!
//! The transport drives a connection only through these traits. Backends
//! report asynchronous notifications (state changes, channel open/close,
//! inbound messages, remote tracks) as [`PeerEvent`]s on the sender handed to
//! [`PeerConnector::create_peer`]. The transport consumes them in order on a
//! single task.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::sync::mpsc;

use crate::error::Result;

/// Lifecycle of the underlying peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    /// Also reported when no peer connection exists.
    #[default]
    Disconnected,
    Failed,
    Closed,
}

impl PeerConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerConnectionState::New => "new",
            PeerConnectionState::Connecting => "connecting",
            PeerConnectionState::Connected => "connected",
            PeerConnectionState::Disconnected => "disconnected",
            PeerConnectionState::Failed => "failed",
            PeerConnectionState::Closed => "closed",
        }
    }

    /// Failed and closed connections never come back.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PeerConnectionState::Failed | PeerConnectionState::Closed)
    }
}

impl fmt::Display for PeerConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ready state of the event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Notification from a backend to the transport.
pub enum PeerEvent {
    ConnectionStateChanged(PeerConnectionState),
    ChannelOpened,
    ChannelClosed,
    /// One text message received on the event channel.
    ChannelMessage(String),
    RemoteTrack(Arc<dyn RemoteAudioTrack>),
}

impl fmt::Debug for PeerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerEvent::ConnectionStateChanged(state) => {
                f.debug_tuple("ConnectionStateChanged").field(state).finish()
            }
            PeerEvent::ChannelOpened => f.write_str("ChannelOpened"),
            PeerEvent::ChannelClosed => f.write_str("ChannelClosed"),
            PeerEvent::ChannelMessage(text) => f.debug_tuple("ChannelMessage").field(text).finish(),
            PeerEvent::RemoteTrack(track) => f.debug_tuple("RemoteTrack").field(&track.id()).finish(),
        }
    }
}

pub type PeerEventSender = mpsc::UnboundedSender<PeerEvent>;

/// A captured local audio track.
pub trait LocalAudioTrack: Send + Sync {
    fn id(&self) -> &str;

    /// Stop capturing. Must be idempotent.
    fn stop(&self);

    fn as_any(&self) -> &dyn Any;
}

/// The local input stream of one connection.
#[derive(Clone, Default)]
pub struct LocalAudioStream {
    tracks: Vec<Arc<dyn LocalAudioTrack>>,
}

impl LocalAudioStream {
    pub fn new(tracks: Vec<Arc<dyn LocalAudioTrack>>) -> Self {
        Self { tracks }
    }

    pub fn tracks(&self) -> &[Arc<dyn LocalAudioTrack>] {
        &self.tracks
    }

    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

impl fmt::Debug for LocalAudioStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.tracks.iter().map(|t| t.id())).finish()
    }
}

/// Platform audio capture, e.g. a microphone.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MediaCapture: Send + Sync {
    /// Acquire a local audio input stream.
    ///
    /// Denied access is reported as `TransportError::Permission`, a missing
    /// facility as `TransportError::Media`.
    async fn open_audio(&self) -> Result<LocalAudioStream>;
}

/// Audio arriving from the remote peer.
pub trait RemoteAudioTrack: Send + Sync {
    fn id(&self) -> &str;

    fn stream_id(&self) -> &str;

    fn as_any(&self) -> &dyn Any;
}

/// Anything that can play a remote media stream.
pub trait AudioSink: Send + Sync {
    fn attach_remote_track(&self, track: Arc<dyn RemoteAudioTrack>);
}

/// The bidirectional event channel carried next to the media.
pub trait EventChannel: Send + Sync {
    fn label(&self) -> &str;

    fn ready_state(&self) -> ChannelState;

    /// Queue one text message. Must not block.
    fn send_text(&self, text: String) -> Result<()>;

    fn close(&self);
}

/// One peer-to-peer media and data connection.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn add_local_audio(&self, stream: &LocalAudioStream) -> Result<()>;

    async fn create_event_channel(&self, label: &str) -> Result<Arc<dyn EventChannel>>;

    /// Create an offer, set it as the local description and return its SDP.
    async fn create_offer(&self) -> Result<String>;

    /// Apply the remote answer SDP.
    async fn apply_answer(&self, sdp: String) -> Result<()>;

    fn connection_state(&self) -> PeerConnectionState;

    /// Close the connection. Must be idempotent and must not block.
    fn close(&self);
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Create a fresh peer connection that reports its notifications on `events`.
    async fn create_peer(&self, events: PeerEventSender) -> Result<Arc<dyn PeerConnection>>;
}
