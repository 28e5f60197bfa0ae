mod error;
pub mod peer;
pub mod session;
pub mod signaling;
mod transport;

#[cfg(feature = "webrtc")]
pub mod native;

pub use voice_rtc_types as types;

pub use error::{Result, TransportError};
pub use peer::{
    AudioSink, ChannelState, EventChannel, LocalAudioStream, LocalAudioTrack, MediaCapture, PeerConnection,
    PeerConnectionState, PeerConnector, PeerEvent, PeerEventSender, RemoteAudioTrack,
};
pub use session::{HttpTokenProvider, SessionCredential, SessionIssuer, TokenProvider};
pub use signaling::{HttpSignaling, Signaling};
pub use transport::{
    resolve_endpoint, Config, ConfigBuilder, RealtimeTransport, Speaker, Stats, Subscription, TranscriptEvent,
    TransportBuilder,
};
