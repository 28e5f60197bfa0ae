/// Cumulative event-channel counters for one transport.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Stats {
    messages_received: u64,
    transcripts_delivered: u64,
    unhandled_events: u64,
    malformed_messages: u64,
    server_errors: u64,
    events_sent: u64,
    sends_dropped: u64,
}

impl Stats {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_received(&mut self) {
        self.messages_received += 1;
    }

    pub(crate) fn record_transcript(&mut self) {
        self.transcripts_delivered += 1;
    }

    pub(crate) fn record_unhandled(&mut self) {
        self.unhandled_events += 1;
    }

    pub(crate) fn record_malformed(&mut self) {
        self.malformed_messages += 1;
    }

    pub(crate) fn record_server_error(&mut self) {
        self.server_errors += 1;
    }

    pub(crate) fn record_sent(&mut self) {
        self.events_sent += 1;
    }

    pub(crate) fn record_send_dropped(&mut self) {
        self.sends_dropped += 1;
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received
    }

    pub fn transcripts_delivered(&self) -> u64 {
        self.transcripts_delivered
    }

    pub fn unhandled_events(&self) -> u64 {
        self.unhandled_events
    }

    pub fn malformed_messages(&self) -> u64 {
        self.malformed_messages
    }

    pub fn server_errors(&self) -> u64 {
        self.server_errors
    }

    pub fn events_sent(&self) -> u64 {
        self.events_sent
    }

    /// Sends dropped because the event channel was not open.
    pub fn sends_dropped(&self) -> u64 {
        self.sends_dropped
    }
}
