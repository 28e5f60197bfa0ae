#![allow(dead_code)]

use std::any::Any;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

use voice_rtc::{
    AudioSink, ChannelState, Config, EventChannel, LocalAudioStream, LocalAudioTrack, MediaCapture, PeerConnection,
    PeerConnectionState, PeerConnector, PeerEvent, PeerEventSender, RealtimeTransport, RemoteAudioTrack, Result,
    SessionCredential, Signaling, TokenProvider, TransportError,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_timer(ChronoLocal::rfc_3339())
        .with_test_writer()
        .try_init();
}

/// Wait until `check` passes, polling briefly. Panics after one second.
pub async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("future did not complete in time")
}

/// What a fake peer does once the remote answer is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnAnswer {
    /// Report connecting, connected and an open channel.
    Connect,
    /// Report a failed connection.
    Fail,
    /// Connect, but the channel closes instead of opening.
    CloseChannel,
    /// Report nothing.
    Silent,
}

pub struct FakeChannel {
    label: String,
    state: Mutex<ChannelState>,
    sent: Mutex<Vec<String>>,
    send_delay: Mutex<Option<Duration>>,
    reject_type: Mutex<Option<String>>,
}

impl FakeChannel {
    fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            state: Mutex::new(ChannelState::Connecting),
            sent: Mutex::new(Vec::new()),
            send_delay: Mutex::new(None),
            reject_type: Mutex::new(None),
        }
    }

    /// Block every later `send_text` for `delay` after recording the message.
    pub fn set_send_delay(&self, delay: Duration) {
        *self.send_delay.lock() = Some(delay);
    }

    /// Fail sends of events with this `type` without recording them.
    pub fn reject_type(&self, event_type: &str) {
        *self.reject_type.lock() = Some(event_type.to_string());
    }

    pub fn set_state(&self, state: ChannelState) {
        *self.state.lock() = state;
    }

    pub fn sent(&self) -> Vec<Value> {
        self.sent
            .lock()
            .iter()
            .map(|text| serde_json::from_str(text).expect("sent text is json"))
            .collect()
    }

    pub fn sent_types(&self) -> Vec<String> {
        self.sent()
            .iter()
            .map(|event| event["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    pub fn clear_sent(&self) {
        self.sent.lock().clear();
    }
}

impl EventChannel for FakeChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn ready_state(&self) -> ChannelState {
        *self.state.lock()
    }

    fn send_text(&self, text: String) -> Result<()> {
        if self.ready_state() != ChannelState::Open {
            return Err(TransportError::NotReady);
        }
        if let Some(rejected) = self.reject_type.lock().as_deref() {
            let event: Value = serde_json::from_str(&text)?;
            if event["type"] == rejected {
                return Err(TransportError::peer(format!("send of {rejected} failed")));
            }
        }
        self.sent.lock().push(text);
        let delay = *self.send_delay.lock();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        Ok(())
    }

    fn close(&self) {
        self.set_state(ChannelState::Closed);
    }
}

pub struct FakePeer {
    events: PeerEventSender,
    on_answer: OnAnswer,
    state: Mutex<PeerConnectionState>,
    channel: Mutex<Option<Arc<FakeChannel>>>,
    local_tracks: AtomicUsize,
    offers: AtomicUsize,
    closed: AtomicBool,
}

impl FakePeer {
    pub fn channel(&self) -> Arc<FakeChannel> {
        self.channel.lock().clone().expect("event channel created")
    }

    pub fn is_channel_created(&self) -> bool {
        self.channel.lock().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn local_tracks(&self) -> usize {
        self.local_tracks.load(Ordering::SeqCst)
    }

    pub fn set_state(&self, state: PeerConnectionState) {
        *self.state.lock() = state;
        let _ = self.events.send(PeerEvent::ConnectionStateChanged(state));
    }

    pub fn open_channel(&self) {
        self.channel().set_state(ChannelState::Open);
        let _ = self.events.send(PeerEvent::ChannelOpened);
    }

    /// Deliver `json` as if the server had sent it on the event channel.
    pub fn inject(&self, json: &str) {
        let _ = self.events.send(PeerEvent::ChannelMessage(json.to_string()));
    }

    pub fn emit_remote_track(&self, id: &str) {
        let _ = self.events.send(PeerEvent::RemoteTrack(Arc::new(FakeRemoteTrack {
            id: id.to_string(),
        })));
    }
}

#[async_trait]
impl PeerConnection for FakePeer {
    async fn add_local_audio(&self, stream: &LocalAudioStream) -> Result<()> {
        self.local_tracks.fetch_add(stream.tracks().len(), Ordering::SeqCst);
        Ok(())
    }

    async fn create_event_channel(&self, label: &str) -> Result<Arc<dyn EventChannel>> {
        let channel = Arc::new(FakeChannel::new(label));
        *self.channel.lock() = Some(channel.clone());
        Ok(channel)
    }

    async fn create_offer(&self) -> Result<String> {
        let n = self.offers.fetch_add(1, Ordering::SeqCst);
        Ok(format!("v=0 fake offer {n}"))
    }

    async fn apply_answer(&self, sdp: String) -> Result<()> {
        if sdp == "reject" {
            return Err(TransportError::peer("malformed answer"));
        }
        match self.on_answer {
            OnAnswer::Connect => {
                self.set_state(PeerConnectionState::Connecting);
                self.set_state(PeerConnectionState::Connected);
                self.open_channel();
            }
            OnAnswer::Fail => {
                self.set_state(PeerConnectionState::Connecting);
                self.set_state(PeerConnectionState::Failed);
            }
            OnAnswer::CloseChannel => {
                self.set_state(PeerConnectionState::Connected);
                self.channel().set_state(ChannelState::Closed);
                let _ = self.events.send(PeerEvent::ChannelClosed);
            }
            OnAnswer::Silent => {}
        }
        Ok(())
    }

    fn connection_state(&self) -> PeerConnectionState {
        *self.state.lock()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        *self.state.lock() = PeerConnectionState::Closed;
    }
}

pub struct FakeConnector {
    on_answer: Mutex<OnAnswer>,
    peers: Mutex<Vec<Arc<FakePeer>>>,
}

impl FakeConnector {
    pub fn new(on_answer: OnAnswer) -> Self {
        Self {
            on_answer: Mutex::new(on_answer),
            peers: Mutex::new(Vec::new()),
        }
    }

    pub fn set_on_answer(&self, on_answer: OnAnswer) {
        *self.on_answer.lock() = on_answer;
    }

    pub fn peers(&self) -> Vec<Arc<FakePeer>> {
        self.peers.lock().clone()
    }

    pub fn last_peer(&self) -> Arc<FakePeer> {
        self.peers.lock().last().cloned().expect("a peer was created")
    }
}

#[async_trait]
impl PeerConnector for FakeConnector {
    async fn create_peer(&self, events: PeerEventSender) -> Result<Arc<dyn PeerConnection>> {
        let peer = Arc::new(FakePeer {
            events,
            on_answer: *self.on_answer.lock(),
            state: Mutex::new(PeerConnectionState::New),
            channel: Mutex::new(None),
            local_tracks: AtomicUsize::new(0),
            offers: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        });
        self.peers.lock().push(peer.clone());
        Ok(peer)
    }
}

pub struct FakeTrack {
    id: String,
    stopped: AtomicBool,
}

impl FakeTrack {
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl LocalAudioTrack for FakeTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Default)]
pub struct FakeCapture {
    deny: AtomicBool,
    tracks: Mutex<Vec<Arc<FakeTrack>>>,
}

impl FakeCapture {
    pub fn deny(&self, deny: bool) {
        self.deny.store(deny, Ordering::SeqCst);
    }

    pub fn tracks(&self) -> Vec<Arc<FakeTrack>> {
        self.tracks.lock().clone()
    }

    pub fn live_tracks(&self) -> usize {
        self.tracks.lock().iter().filter(|t| !t.is_stopped()).count()
    }
}

#[async_trait]
impl MediaCapture for FakeCapture {
    async fn open_audio(&self) -> Result<LocalAudioStream> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(TransportError::permission("NotAllowedError"));
        }
        let mut tracks = self.tracks.lock();
        let track = Arc::new(FakeTrack {
            id: format!("mic-{}", tracks.len()),
            stopped: AtomicBool::new(false),
        });
        tracks.push(track.clone());
        Ok(LocalAudioStream::new(vec![track]))
    }
}

/// Token provider that fails a configurable number of times first.
pub struct FakeTokens {
    failures_left: AtomicUsize,
    calls: AtomicUsize,
    realtime_url: Mutex<Option<String>>,
}

impl FakeTokens {
    pub fn new() -> Self {
        Self::failing(0)
    }

    pub fn failing(times: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(times),
            calls: AtomicUsize::new(0),
            realtime_url: Mutex::new(None),
        }
    }

    pub fn with_realtime_url(self, url: &str) -> Self {
        *self.realtime_url.lock() = Some(url.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenProvider for FakeTokens {
    async fn fetch_credential(&self) -> Result<SessionCredential> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(TransportError::session("500 Internal Server Error - boom"));
        }

        let credential = SessionCredential::new("ek_test").with_resource("contoso");
        Ok(match self.realtime_url.lock().as_deref() {
            Some(url) => credential.with_realtime_url(url),
            None => credential,
        })
    }
}

/// Answers every offer with a fixed SDP.
pub struct FakeSignaling {
    answer: Mutex<String>,
    offers: Mutex<Vec<(String, String)>>,
}

impl FakeSignaling {
    pub fn new() -> Self {
        Self {
            answer: Mutex::new("v=0 fake answer".to_string()),
            offers: Mutex::new(Vec::new()),
        }
    }

    pub fn set_answer(&self, answer: &str) {
        *self.answer.lock() = answer.to_string();
    }

    /// `(endpoint, offer)` pairs in arrival order.
    pub fn offers(&self) -> Vec<(String, String)> {
        self.offers.lock().clone()
    }
}

#[async_trait]
impl Signaling for FakeSignaling {
    async fn exchange_sdp(&self, endpoint: &str, _credential: &SessionCredential, offer: String) -> Result<String> {
        self.offers.lock().push((endpoint.to_string(), offer));
        Ok(self.answer.lock().clone())
    }
}

pub struct FakeRemoteTrack {
    id: String,
}

impl RemoteAudioTrack for FakeRemoteTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn stream_id(&self) -> &str {
        "remote-stream"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Default)]
pub struct RecordingSink {
    tracks: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn tracks(&self) -> Vec<String> {
        self.tracks.lock().clone()
    }
}

impl AudioSink for RecordingSink {
    fn attach_remote_track(&self, track: Arc<dyn RemoteAudioTrack>) {
        self.tracks.lock().push(track.id().to_string());
    }
}

/// A transport wired to fakes.
pub struct Harness {
    pub transport: RealtimeTransport,
    pub connector: Arc<FakeConnector>,
    pub capture: Arc<FakeCapture>,
    pub tokens: Arc<FakeTokens>,
    pub signaling: Arc<FakeSignaling>,
    pub sink: Arc<RecordingSink>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(OnAnswer::Connect, FakeTokens::new(), None, Duration::from_secs(5))
    }

    pub fn with_answer(on_answer: OnAnswer) -> Self {
        Self::build(on_answer, FakeTokens::new(), None, Duration::from_secs(5))
    }

    pub fn build(
        on_answer: OnAnswer,
        tokens: FakeTokens,
        signaling: Option<Arc<dyn Signaling>>,
        ready_timeout: Duration,
    ) -> Self {
        init_tracing();

        let connector = Arc::new(FakeConnector::new(on_answer));
        let capture = Arc::new(FakeCapture::default());
        let tokens = Arc::new(tokens);
        let fake_signaling = Arc::new(FakeSignaling::new());
        let config = Config::builder()
            .with_realtime_url_template("https://{resource}.realtime.test/v1/realtimertc?model={model}")
            .with_model("gpt-rt")
            .with_ready_timeout(ready_timeout)
            .build();

        let transport = RealtimeTransport::builder(config)
            .token_provider(tokens.clone())
            .signaling(signaling.unwrap_or_else(|| fake_signaling.clone() as Arc<dyn Signaling>))
            .media_capture(capture.clone())
            .peer_connector(connector.clone())
            .build()
            .expect("transport builds");

        Self {
            transport,
            connector,
            capture,
            tokens,
            signaling: fake_signaling,
            sink: Arc::new(RecordingSink::default()),
        }
    }

    pub async fn connect(&self) -> Result<()> {
        self.transport.connect(self.sink.clone()).await
    }

    pub fn peer(&self) -> Arc<FakePeer> {
        self.connector.last_peer()
    }

    pub fn channel(&self) -> Arc<FakeChannel> {
        self.peer().channel()
    }
}
