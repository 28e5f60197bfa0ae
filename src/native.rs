//! Peer backend on top of the pure-Rust `webrtc` stack.
//!
//! Audio goes up as Opus through [`SampleTrack`]s that the application feeds
//! with encoded frames. Remote audio arrives as [`WebRtcRemoteTrack`]s whose
//! RTP the application reads and decodes.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS};
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::error::{Result, TransportError};
use crate::peer::{
    ChannelState, EventChannel, LocalAudioStream, LocalAudioTrack, MediaCapture, PeerConnection,
    PeerConnectionState, PeerConnector, PeerEvent, PeerEventSender, RemoteAudioTrack,
};

const OPUS_CLOCK_RATE: u32 = 48_000;
const OPUS_CHANNELS: u16 = 2;

fn peer_error(context: &str, e: webrtc::Error) -> TransportError {
    TransportError::peer(format!("{context}: {e}"))
}

fn on_runtime<F>(task: F)
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(task);
        }
        Err(_) => tracing::warn!("no tokio runtime available; skipping webrtc close"),
    }
}

impl From<RTCPeerConnectionState> for PeerConnectionState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => PeerConnectionState::New,
            RTCPeerConnectionState::Connecting => PeerConnectionState::Connecting,
            RTCPeerConnectionState::Connected => PeerConnectionState::Connected,
            RTCPeerConnectionState::Disconnected => PeerConnectionState::Disconnected,
            RTCPeerConnectionState::Failed => PeerConnectionState::Failed,
            RTCPeerConnectionState::Closed => PeerConnectionState::Closed,
        }
    }
}

/// Creates webrtc-rs peer connections with the default codecs and interceptors.
#[derive(Debug, Clone, Default)]
pub struct WebRtcConnector {
    ice_servers: Vec<String>,
}

impl WebRtcConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a STUN/TURN url, e.g. `stun:stun.l.google.com:19302`.
    pub fn with_ice_server(mut self, url: &str) -> Self {
        self.ice_servers.push(url.to_string());
        self
    }
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    async fn create_peer(&self, events: PeerEventSender) -> Result<Arc<dyn PeerConnection>> {
        let mut media = MediaEngine::default();
        media
            .register_default_codecs()
            .map_err(|e| peer_error("register codecs", e))?;
        let registry = register_default_interceptors(Registry::new(), &mut media)
            .map_err(|e| peer_error("register interceptors", e))?;
        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: if self.ice_servers.is_empty() {
                Vec::new()
            } else {
                vec![RTCIceServer {
                    urls: self.ice_servers.clone(),
                    ..Default::default()
                }]
            },
            ..Default::default()
        };
        let pc = Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(|e| peer_error("create peer connection", e))?,
        );

        let state_events = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            // The transport may already be gone; nothing to report to then.
            let _ = state_events.send(PeerEvent::ConnectionStateChanged(state.into()));
            Box::pin(async {})
        }));

        let track_events = events.clone();
        pc.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
            let remote = WebRtcRemoteTrack {
                id: track.id(),
                stream_id: track.stream_id(),
                track,
            };
            let _ = track_events.send(PeerEvent::RemoteTrack(Arc::new(remote)));
            Box::pin(async {})
        }));

        tracing::debug!(ice_servers = self.ice_servers.len(), "webrtc peer created");
        Ok(Arc::new(WebRtcPeer { pc, events }))
    }
}

pub struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
    events: PeerEventSender,
}

#[async_trait]
impl PeerConnection for WebRtcPeer {
    async fn add_local_audio(&self, stream: &LocalAudioStream) -> Result<()> {
        for track in stream.tracks() {
            let sample = track
                .as_any()
                .downcast_ref::<SampleTrack>()
                .ok_or_else(|| TransportError::media(format!("track {} is not a webrtc sample track", track.id())))?;

            let sender = self
                .pc
                .add_track(Arc::clone(&sample.track) as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(|e| peer_error("add local track", e))?;

            // RTCP has to be drained for the interceptors to work.
            tokio::spawn(async move {
                let mut buf = vec![0u8; 1500];
                while sender.read(&mut buf).await.is_ok() {}
            });
        }
        Ok(())
    }

    async fn create_event_channel(&self, label: &str) -> Result<Arc<dyn EventChannel>> {
        let dc = self
            .pc
            .create_data_channel(label, None)
            .await
            .map_err(|e| peer_error("create data channel", e))?;

        let open_events = self.events.clone();
        dc.on_open(Box::new(move || {
            let _ = open_events.send(PeerEvent::ChannelOpened);
            Box::pin(async {})
        }));

        let close_events = self.events.clone();
        dc.on_close(Box::new(move || {
            let _ = close_events.send(PeerEvent::ChannelClosed);
            Box::pin(async {})
        }));

        let message_events = self.events.clone();
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            match String::from_utf8(msg.data.to_vec()) {
                Ok(text) => {
                    let _ = message_events.send(PeerEvent::ChannelMessage(text));
                }
                Err(e) => tracing::warn!(error = %e, "dropping non-utf8 event channel message"),
            }
            Box::pin(async {})
        }));

        let (outbound, mut queue) = mpsc::unbounded_channel::<String>();
        let writer = Arc::clone(&dc);
        tokio::spawn(async move {
            while let Some(text) = queue.recv().await {
                if let Err(e) = writer.send_text(text).await {
                    tracing::warn!(error = %e, "event channel write failed");
                }
            }
        });

        Ok(Arc::new(WebRtcChannel {
            label: label.to_string(),
            dc,
            outbound,
        }))
    }

    async fn create_offer(&self) -> Result<String> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| peer_error("create offer", e))?;
        let mut gathered = self.pc.gathering_complete_promise().await;
        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| peer_error("set local description", e))?;
        // Non-trickle: the offer goes out once with every candidate in it.
        let _ = gathered.recv().await;

        self.pc
            .local_description()
            .await
            .map(|desc| desc.sdp)
            .ok_or_else(|| TransportError::peer("no local description after gathering"))
    }

    async fn apply_answer(&self, sdp: String) -> Result<()> {
        let answer = RTCSessionDescription::answer(sdp).map_err(|e| peer_error("parse answer", e))?;
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(|e| peer_error("set remote description", e))
    }

    fn connection_state(&self) -> PeerConnectionState {
        self.pc.connection_state().into()
    }

    fn close(&self) {
        let pc = Arc::clone(&self.pc);
        on_runtime(async move {
            if let Err(e) = pc.close().await {
                tracing::debug!(error = %e, "peer close failed");
            }
        });
    }
}

pub struct WebRtcChannel {
    label: String,
    dc: Arc<RTCDataChannel>,
    outbound: mpsc::UnboundedSender<String>,
}

impl EventChannel for WebRtcChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn ready_state(&self) -> ChannelState {
        match self.dc.ready_state() {
            RTCDataChannelState::Open => ChannelState::Open,
            RTCDataChannelState::Closing => ChannelState::Closing,
            RTCDataChannelState::Closed => ChannelState::Closed,
            _ => ChannelState::Connecting,
        }
    }

    fn send_text(&self, text: String) -> Result<()> {
        self.outbound
            .send(text)
            .map_err(|_| TransportError::peer("event channel writer stopped"))
    }

    fn close(&self) {
        let dc = Arc::clone(&self.dc);
        on_runtime(async move {
            if let Err(e) = dc.close().await {
                tracing::debug!(error = %e, "data channel close failed");
            }
        });
    }
}

/// Remote audio as delivered by webrtc-rs.
pub struct WebRtcRemoteTrack {
    id: String,
    stream_id: String,
    track: Arc<TrackRemote>,
}

impl WebRtcRemoteTrack {
    /// Read RTP packets from here and decode them for playback.
    pub fn track(&self) -> &Arc<TrackRemote> {
        &self.track
    }
}

impl RemoteAudioTrack for WebRtcRemoteTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn stream_id(&self) -> &str {
        &self.stream_id
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// An Opus track the application writes encoded frames into.
pub struct SampleTrack {
    id: String,
    track: Arc<TrackLocalStaticSample>,
    stopped: AtomicBool,
}

impl SampleTrack {
    fn new(id: &str) -> Self {
        let codec = RTPCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: OPUS_CLOCK_RATE,
            channels: OPUS_CHANNELS,
            ..Default::default()
        };
        Self {
            id: id.to_string(),
            track: Arc::new(TrackLocalStaticSample::new(
                codec,
                id.to_string(),
                "voice-rtc".to_owned(),
            )),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Write one encoded Opus frame. Frames written after `stop` are dropped.
    pub async fn write_opus_frame(&self, frame: Bytes, duration: Duration) -> Result<()> {
        if self.is_stopped() {
            return Ok(());
        }
        self.track
            .write_sample(&Sample {
                data: frame,
                duration,
                ..Default::default()
            })
            .await
            .map_err(|e| TransportError::media(format!("write opus frame: {e}")))
    }
}

impl LocalAudioTrack for SampleTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            tracing::debug!(track_id = %self.id, "local audio track stopped");
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// `MediaCapture` handing every opened track to the application.
///
/// Each `open_audio` creates a fresh [`SampleTrack`] and sends it on the
/// receiver returned by [`SampleTrackCapture::new`]; the application feeds it
/// until it reports stopped.
pub struct SampleTrackCapture {
    tracks: mpsc::UnboundedSender<Arc<SampleTrack>>,
}

impl SampleTrackCapture {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Arc<SampleTrack>>) {
        let (tracks, rx) = mpsc::unbounded_channel();
        (Self { tracks }, rx)
    }
}

#[async_trait]
impl MediaCapture for SampleTrackCapture {
    async fn open_audio(&self) -> Result<LocalAudioStream> {
        let track = Arc::new(SampleTrack::new("microphone"));
        self.tracks
            .send(Arc::clone(&track))
            .map_err(|_| TransportError::media("no audio source is feeding the capture"))?;
        Ok(LocalAudioStream::new(vec![track]))
    }
}
