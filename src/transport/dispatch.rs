use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use voice_rtc_types::ServerEvent;
use voice_rtc_types::events::server::TranscriptEvent as WireTranscript;

use crate::transport::stats::Stats;
use crate::transport::subscribers::{Speaker, Subscribers, TranscriptEvent};

/// Routes inbound event-channel messages to transcript subscribers.
///
/// Never fails: anything it cannot use is logged, counted and dropped.
#[derive(Clone)]
pub(crate) struct EventRouter {
    subscribers: Arc<Subscribers>,
    stats: Arc<Mutex<Stats>>,
}

impl EventRouter {
    pub(crate) fn new(subscribers: Arc<Subscribers>, stats: Arc<Mutex<Stats>>) -> Self {
        Self { subscribers, stats }
    }

    pub(crate) fn handle_message(&self, text: &str) {
        self.stats.lock().record_received();

        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed event channel message");
                self.stats.lock().record_malformed();
                return;
            }
        };

        let Some(event_type) = value.get("type").and_then(Value::as_str).map(str::to_string) else {
            tracing::warn!("dropping event channel message without a type");
            self.stats.lock().record_malformed();
            return;
        };
        tracing::debug!(
            event_type,
            event_id = value.get("event_id").and_then(|id| id.as_str()).unwrap_or_default(),
            "received server event"
        );

        let event = match serde_json::from_value::<ServerEvent>(value) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(event_type, error = %e, "dropping undecodable server event");
                self.stats.lock().record_malformed();
                return;
            }
        };

        match event {
            ServerEvent::InputAudioTranscriptionCompleted(e) => self.deliver(Speaker::User, e, false),
            ServerEvent::InputAudioTranscriptionPartial(e) => self.deliver(Speaker::User, e, true),
            ServerEvent::ResponseAudioTranscriptDone(e) => self.deliver(Speaker::Assistant, e, false),
            ServerEvent::ResponseAudioTranscriptPartial(e) => self.deliver(Speaker::Assistant, e, true),
            ServerEvent::SessionCreated(e) | ServerEvent::SessionUpdated(e) => {
                tracing::info!(
                    event_type,
                    turn_detection = e.turn_detection_type().unwrap_or("none"),
                    "session acknowledged"
                );
            }
            ServerEvent::Error(e) => {
                let details = e.error();
                tracing::error!(
                    error_type = details.error_type(),
                    code = details.code().unwrap_or_default(),
                    param = details.param().unwrap_or_default(),
                    message = details.message(),
                    "server reported an error"
                );
                self.stats.lock().record_server_error();
            }
            ServerEvent::Other => {
                tracing::debug!(event_type, "unhandled server event");
                self.stats.lock().record_unhandled();
            }
        }
    }

    fn deliver(&self, speaker: Speaker, wire: WireTranscript, partial: bool) {
        let event = TranscriptEvent::new(speaker, wire.into_transcript(), partial);
        tracing::debug!(?speaker, partial, len = event.text.len(), "transcript received");
        self.subscribers.deliver(&event);
        self.stats.lock().record_transcript();
    }
}
