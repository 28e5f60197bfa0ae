mod config;
pub(crate) mod consts;
mod dispatch;
mod stats;
mod subscribers;
mod utils;

use std::mem;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use voice_rtc_types::events::client::{
    InputAudioBufferClearEvent, InputAudioBufferCommitEvent, ResponseCreateEvent, SessionUpdateEvent,
};
use voice_rtc_types::{ClientEvent, SessionConfig, TurnDetection};

use crate::error::{Result, TransportError};
use crate::peer::{
    AudioSink, ChannelState, EventChannel, LocalAudioStream, MediaCapture, PeerConnection, PeerConnectionState,
    PeerConnector, PeerEvent,
};
use crate::session::{HttpTokenProvider, TokenProvider};
use crate::signaling::{HttpSignaling, Signaling};
use crate::transport::consts::READY_POLL_INTERVAL;

pub use config::{Config, ConfigBuilder};
pub use stats::Stats;
pub use subscribers::{Speaker, Subscription, TranscriptEvent};
pub use utils::resolve_endpoint;

use dispatch::EventRouter;
use subscribers::Subscribers;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Connecting,
    Connected,
}

/// Everything one connection owns. Fields fill in as `connect` acquires them.
#[derive(Default)]
struct Connection {
    stream: Option<LocalAudioStream>,
    peer: Option<Arc<dyn PeerConnection>>,
    channel: Option<Arc<dyn EventChannel>>,
    pump: Option<JoinHandle<()>>,
}

impl Connection {
    fn release(&mut self) {
        if let Some(channel) = self.channel.take() {
            channel.close();
        }
        if let Some(peer) = self.peer.take() {
            peer.close();
        }
        if let Some(stream) = self.stream.take() {
            stream.stop();
        }
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

struct State {
    /// Bumped by every `connect` and `disconnect`.
    epoch: u64,
    phase: Phase,
    conn: Connection,
    speaking: bool,
    turn_detection: bool,
}

/// Last notifications seen by the event pump. Changes wake the ready wait.
#[derive(Debug, Clone, Copy, Default)]
struct Readiness {
    state: PeerConnectionState,
    channel_closed: bool,
}

struct Inner {
    config: Config,
    token_provider: Arc<dyn TokenProvider>,
    signaling: Arc<dyn Signaling>,
    media_capture: Arc<dyn MediaCapture>,
    peer_connector: Arc<dyn PeerConnector>,
    state: Mutex<State>,
    subscribers: Arc<Subscribers>,
    stats: Arc<Mutex<Stats>>,
}

impl Inner {
    fn begin(&self) -> Result<u64> {
        let mut state = self.state.lock();
        match state.phase {
            Phase::Connected => Err(TransportError::AlreadyConnected),
            Phase::Connecting => Err(TransportError::ConnectInProgress),
            Phase::Idle => {
                state.epoch += 1;
                state.phase = Phase::Connecting;
                Ok(state.epoch)
            }
        }
    }

    fn ensure_current(&self, epoch: u64) -> Result<()> {
        if self.state.lock().epoch == epoch {
            Ok(())
        } else {
            Err(TransportError::Cancelled)
        }
    }

    /// Hand a freshly acquired resource to the connection of `epoch`. If that
    /// attempt was cancelled meanwhile the resource is released on the spot.
    fn adopt(&self, epoch: u64, store: impl FnOnce(&mut Connection)) -> Result<()> {
        let mut state = self.state.lock();
        if state.epoch == epoch {
            store(&mut state.conn);
            return Ok(());
        }
        drop(state);

        let mut orphan = Connection::default();
        store(&mut orphan);
        orphan.release();
        Err(TransportError::Cancelled)
    }

    /// Tear down a failed attempt. Returns the error to surface.
    fn abandon(&self, epoch: u64, error: TransportError) -> TransportError {
        let mut conn = {
            let mut state = self.state.lock();
            if state.epoch != epoch {
                // disconnect already released everything
                return TransportError::Cancelled;
            }
            state.phase = Phase::Idle;
            state.speaking = false;
            state.turn_detection = false;
            mem::take(&mut state.conn)
        };
        conn.release();
        error
    }

    fn shutdown(&self) {
        let (mut conn, phase) = {
            let mut state = self.state.lock();
            state.epoch += 1;
            let phase = mem::replace(&mut state.phase, Phase::Idle);
            state.speaking = false;
            state.turn_detection = false;
            (mem::take(&mut state.conn), phase)
        };
        conn.release();
        if phase != Phase::Idle {
            tracing::info!(?phase, "disconnected");
        }
    }

    fn connection_state(&self) -> PeerConnectionState {
        self.state
            .lock()
            .conn
            .peer
            .as_ref()
            .map(|peer| peer.connection_state())
            .unwrap_or_default()
    }

    /// The event channel, if control messages may be sent right now.
    ///
    /// Controls hold the state lock from this check through their sends and
    /// the flag update, so concurrent controls and `disconnect` are serialized.
    /// Sending under the lock relies on `EventChannel::send_text` not blocking.
    fn control_channel(&self, state: &State, operation: &'static str) -> Option<Arc<dyn EventChannel>> {
        let peer_state = state
            .conn
            .peer
            .as_ref()
            .map(|peer| peer.connection_state())
            .unwrap_or_default();

        match &state.conn.channel {
            Some(channel)
                if state.phase == Phase::Connected
                    && peer_state == PeerConnectionState::Connected
                    && channel.ready_state() == ChannelState::Open =>
            {
                Some(channel.clone())
            }
            channel => {
                tracing::warn!(
                    operation,
                    phase = ?state.phase,
                    peer_state = %peer_state,
                    channel_state = ?channel.as_ref().map(|c| c.ready_state()),
                    "event channel not ready; ignoring"
                );
                self.stats.lock().record_send_dropped();
                None
            }
        }
    }

    fn send_event(&self, channel: &dyn EventChannel, event: &ClientEvent) -> Result<()> {
        let text = serde_json::to_string(event)?;
        self.send_text(channel, event.event_type(), text)
    }

    fn send_text(&self, channel: &dyn EventChannel, event_type: &str, text: String) -> Result<()> {
        if channel.ready_state() != ChannelState::Open {
            self.stats.lock().record_send_dropped();
            return Err(TransportError::NotReady);
        }
        channel.send_text(text)?;
        self.stats.lock().record_sent();
        tracing::debug!(event_type, "sent event");
        Ok(())
    }

    fn session_update(&self, enable: bool) -> ClientEvent {
        let session = if enable {
            SessionConfig::builder()
                .with_turn_detection_enable(TurnDetection::ServerVad(self.config.turn_detection().clone()))
                .build()
        } else {
            SessionConfig::builder().with_turn_detection_disable().build()
        };
        ClientEvent::SessionUpdate(SessionUpdateEvent::new(session))
    }

    /// Send the session update and cache `enable`, both under the caller's
    /// state guard.
    fn apply_turn_detection(&self, state: &mut State, channel: &dyn EventChannel, enable: bool) -> Result<()> {
        self.send_event(channel, &self.session_update(enable))?;
        state.turn_detection = enable;
        tracing::info!(enabled = enable, "turn detection updated");
        Ok(())
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.state.get_mut().conn.release();
    }
}

/// A real-time voice session with a remote assistant.
///
/// One transport holds at most one connection: a peer connection carrying
/// microphone audio up and assistant audio down, plus an event channel for
/// control messages and transcripts. Clones share the same connection, so a
/// `disconnect` from one clone cancels a `connect` awaited on another.
#[derive(Clone)]
pub struct RealtimeTransport {
    inner: Arc<Inner>,
}

impl RealtimeTransport {
    pub fn builder(config: Config) -> TransportBuilder {
        TransportBuilder::new(config)
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Establish the connection and enable server-side turn detection.
    ///
    /// Remote audio is handed to `sink` as it arrives, for as long as the
    /// connection lives. On failure everything acquired so far is released
    /// and the transport is idle again.
    pub async fn connect(&self, sink: Arc<dyn AudioSink>) -> Result<()> {
        let epoch = self.inner.begin()?;
        tracing::info!(epoch, "connecting");

        match self.establish(epoch, sink).await {
            Ok(()) => {
                tracing::info!(epoch, "connected");
                Ok(())
            }
            Err(e) => {
                let e = self.inner.abandon(epoch, e);
                tracing::error!(epoch, error = %e, "connect failed");
                Err(e)
            }
        }
    }

    async fn establish(&self, epoch: u64, sink: Arc<dyn AudioSink>) -> Result<()> {
        let inner = &self.inner;

        let credential = inner.token_provider.fetch_credential().await?;
        inner.ensure_current(epoch)?;
        let endpoint = resolve_endpoint(&inner.config, &credential)?;
        tracing::debug!(endpoint = %endpoint, "resolved realtime endpoint");

        let stream = inner.media_capture.open_audio().await?;
        inner.adopt(epoch, |conn| conn.stream = Some(stream.clone()))?;
        tracing::debug!(tracks = stream.tracks().len(), "local audio acquired");

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let peer = inner.peer_connector.create_peer(events_tx).await?;
        inner.adopt(epoch, |conn| conn.peer = Some(peer.clone()))?;

        let (ready_tx, ready_rx) = watch::channel(Readiness::default());
        let router = EventRouter::new(inner.subscribers.clone(), inner.stats.clone());
        let pump = tokio::spawn(run_event_pump(events_rx, ready_tx, router, sink));
        inner.adopt(epoch, |conn| conn.pump = Some(pump))?;

        peer.add_local_audio(&stream).await?;
        inner.ensure_current(epoch)?;

        let channel = peer.create_event_channel(inner.config.channel_label()).await?;
        inner.adopt(epoch, |conn| conn.channel = Some(channel.clone()))?;

        let offer = peer.create_offer().await?;
        inner.ensure_current(epoch)?;

        let answer = inner.signaling.exchange_sdp(endpoint.as_str(), &credential, offer).await?;
        drop(credential);
        inner.ensure_current(epoch)?;

        peer.apply_answer(answer).await?;
        inner.ensure_current(epoch)?;

        self.wait_until_ready(peer.as_ref(), channel.as_ref(), ready_rx).await?;

        let mut state = inner.state.lock();
        if state.epoch != epoch {
            return Err(TransportError::Cancelled);
        }
        state.phase = Phase::Connected;
        inner.apply_turn_detection(&mut state, channel.as_ref(), true)
    }

    /// Wait until the peer is connected and the channel open. Wakes on every
    /// backend notification and re-checks at least every `READY_POLL_INTERVAL`.
    async fn wait_until_ready(
        &self,
        peer: &dyn PeerConnection,
        channel: &dyn EventChannel,
        mut wake: watch::Receiver<Readiness>,
    ) -> Result<()> {
        let timeout = self.inner.config.ready_timeout();
        let wait = async {
            loop {
                let seen = *wake.borrow_and_update();
                let state = peer.connection_state();
                if let Some(terminal) = [state, seen.state].into_iter().find(PeerConnectionState::is_terminal) {
                    return Err(TransportError::liveness(format!("peer connection {terminal}")));
                }
                let channel_state = channel.ready_state();
                if seen.channel_closed || channel_state == ChannelState::Closed {
                    return Err(TransportError::liveness("event channel closed"));
                }
                if state == PeerConnectionState::Connected && channel_state == ChannelState::Open {
                    return Ok(());
                }
                if let Ok(Err(_)) = tokio::time::timeout(READY_POLL_INTERVAL, wake.changed()).await {
                    return Err(TransportError::liveness("peer event stream ended"));
                }
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(timeout)),
        }
    }

    /// Close the connection. Idempotent; also cancels an in-flight `connect`.
    pub fn disconnect(&self) {
        self.inner.shutdown();
    }

    /// Flip push-to-talk and return the new state.
    ///
    /// Starting to speak clears the server's input buffer. Stopping commits
    /// it and asks for a response. Nothing changes when not connected. Once
    /// the first event of a transition is out the flag flips, even if a later
    /// one fails.
    pub fn toggle_speaking(&self) -> bool {
        let inner = &self.inner;
        let mut state = inner.state.lock();
        let Some(channel) = inner.control_channel(&state, "toggle_speaking") else {
            return state.speaking;
        };

        let speaking = !state.speaking;
        let events = if speaking {
            vec![ClientEvent::InputAudioBufferClear(InputAudioBufferClearEvent::new())]
        } else {
            vec![
                ClientEvent::InputAudioBufferCommit(InputAudioBufferCommitEvent::new()),
                ClientEvent::ResponseCreate(ResponseCreateEvent::new()),
            ]
        };

        let mut sent = 0;
        for event in &events {
            if let Err(e) = inner.send_event(channel.as_ref(), event) {
                tracing::warn!(error = %e, event_type = event.event_type(), sent, "push-to-talk toggle failed");
                break;
            }
            sent += 1;
        }
        if sent == 0 {
            return state.speaking;
        }
        if sent < events.len() {
            tracing::warn!(speaking, sent, total = events.len(), "push-to-talk toggled partially");
        }

        state.speaking = speaking;
        tracing::info!(speaking, "push-to-talk toggled");
        speaking
    }

    /// Switch server-side voice activity detection on or off.
    pub fn toggle_turn_detection(&self, enable: bool) {
        let mut state = self.inner.state.lock();
        let Some(channel) = self.inner.control_channel(&state, "toggle_turn_detection") else {
            return;
        };
        if let Err(e) = self.inner.apply_turn_detection(&mut state, channel.as_ref(), enable) {
            tracing::warn!(error = %e, enable, "failed to update turn detection");
        }
    }

    /// Re-send the cached turn-detection setting.
    pub fn refresh_turn_detection(&self) {
        let mut state = self.inner.state.lock();
        let Some(channel) = self.inner.control_channel(&state, "refresh_turn_detection") else {
            return;
        };
        let enable = state.turn_detection;
        if let Err(e) = self.inner.apply_turn_detection(&mut state, channel.as_ref(), enable) {
            tracing::warn!(error = %e, enable, "failed to refresh turn detection");
        }
    }

    /// Send an arbitrary JSON event as-is. Best effort.
    pub fn send_custom_event(&self, event: serde_json::Value) {
        let state = self.inner.state.lock();
        let Some(channel) = self.inner.control_channel(&state, "send_custom_event") else {
            return;
        };
        let event_type = event
            .get("type")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("custom")
            .to_string();
        let result = serde_json::to_string(&event)
            .map_err(TransportError::from)
            .and_then(|text| self.inner.send_text(channel.as_ref(), &event_type, text));
        if let Err(e) = result {
            tracing::warn!(error = %e, event_type, "failed to send custom event");
        }
    }

    /// State of the current peer connection, `Disconnected` when there is none.
    pub fn connection_state(&self) -> PeerConnectionState {
        self.inner.connection_state()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == PeerConnectionState::Connected
    }

    pub fn is_speaking(&self) -> bool {
        self.inner.state.lock().speaking
    }

    pub fn is_turn_detection_enabled(&self) -> bool {
        self.inner.state.lock().turn_detection
    }

    /// Call `f` for every user transcript until the returned handle is dropped.
    pub fn on_user_message<F>(&self, f: F) -> Subscription
    where
        F: Fn(&TranscriptEvent) + Send + Sync + 'static,
    {
        self.inner.subscribers.subscribe(Speaker::User, f)
    }

    /// Call `f` for every assistant transcript until the returned handle is dropped.
    pub fn on_assistant_message<F>(&self, f: F) -> Subscription
    where
        F: Fn(&TranscriptEvent) + Send + Sync + 'static,
    {
        self.inner.subscribers.subscribe(Speaker::Assistant, f)
    }

    /// Every transcript from both speakers as a stream. Slow receivers lag.
    pub fn subscribe_transcripts(&self) -> broadcast::Receiver<TranscriptEvent> {
        self.inner.subscribers.stream()
    }

    pub fn stats(&self) -> Stats {
        self.inner.stats.lock().clone()
    }
}

async fn run_event_pump(
    mut events: mpsc::UnboundedReceiver<PeerEvent>,
    ready: watch::Sender<Readiness>,
    router: EventRouter,
    sink: Arc<dyn AudioSink>,
) {
    while let Some(event) = events.recv().await {
        match event {
            PeerEvent::ConnectionStateChanged(state) => {
                if state.is_terminal() {
                    tracing::warn!(state = %state, "peer connection state changed");
                } else {
                    tracing::info!(state = %state, "peer connection state changed");
                }
                ready.send_modify(|r| r.state = state);
            }
            PeerEvent::ChannelOpened => {
                tracing::info!("event channel opened");
                ready.send_modify(|_| {});
            }
            PeerEvent::ChannelClosed => {
                tracing::info!("event channel closed");
                ready.send_modify(|r| r.channel_closed = true);
            }
            PeerEvent::ChannelMessage(text) => router.handle_message(&text),
            PeerEvent::RemoteTrack(track) => {
                tracing::info!(track_id = track.id(), stream_id = track.stream_id(), "remote audio track received");
                sink.attach_remote_track(track);
            }
        }
    }
    tracing::debug!("peer event stream ended");
}

pub struct TransportBuilder {
    config: Config,
    token_provider: Option<Arc<dyn TokenProvider>>,
    signaling: Option<Arc<dyn Signaling>>,
    media_capture: Option<Arc<dyn MediaCapture>>,
    peer_connector: Option<Arc<dyn PeerConnector>>,
}

impl TransportBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            token_provider: None,
            signaling: None,
            media_capture: None,
            peer_connector: None,
        }
    }

    /// Defaults to a `GET` against `Config::token_url`.
    pub fn token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.token_provider = Some(provider);
        self
    }

    /// Defaults to [`HttpSignaling`].
    pub fn signaling(mut self, signaling: Arc<dyn Signaling>) -> Self {
        self.signaling = Some(signaling);
        self
    }

    pub fn media_capture(mut self, capture: Arc<dyn MediaCapture>) -> Self {
        self.media_capture = Some(capture);
        self
    }

    pub fn peer_connector(mut self, connector: Arc<dyn PeerConnector>) -> Self {
        self.peer_connector = Some(connector);
        self
    }

    pub fn build(self) -> Result<RealtimeTransport> {
        let media_capture = self
            .media_capture
            .ok_or_else(|| TransportError::config("a media capture backend is required"))?;
        let peer_connector = self
            .peer_connector
            .ok_or_else(|| TransportError::config("a peer connector is required"))?;
        let token_provider = self
            .token_provider
            .unwrap_or_else(|| Arc::new(HttpTokenProvider::new(self.config.token_url())));
        let signaling = self.signaling.unwrap_or_else(|| Arc::new(HttpSignaling::new()));

        let subscribers = Arc::new(Subscribers::new(self.config.event_capacity()));
        Ok(RealtimeTransport {
            inner: Arc::new(Inner {
                config: self.config,
                token_provider,
                signaling,
                media_capture,
                peer_connector,
                state: Mutex::new(State {
                    epoch: 0,
                    phase: Phase::Idle,
                    conn: Connection::default(),
                    speaking: false,
                    turn_detection: false,
                }),
                subscribers,
                stats: Arc::new(Mutex::new(Stats::new())),
            }),
        })
    }
}
