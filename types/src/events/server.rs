pub mod error;

use error::ErrorDetails;

/// `error` event
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ErrorEvent {
    #[serde(default)]
    event_id: Option<String>,

    /// Details about the error
    error: ErrorDetails,
}

impl ErrorEvent {
    pub fn new(error: ErrorDetails) -> Self {
        Self {
            event_id: None,
            error,
        }
    }

    pub fn event_id(&self) -> Option<&str> {
        self.event_id.as_deref()
    }

    pub fn error(&self) -> &ErrorDetails {
        &self.error
    }
}

/// `session.created` and `session.updated` events
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SessionEvent {
    #[serde(default)]
    event_id: Option<String>,

    /// The session as the server now sees it. Kept as raw JSON: the server
    /// may report turn-detection modes and fields this crate never sends.
    #[serde(default)]
    session: serde_json::Value,
}

impl SessionEvent {
    pub fn event_id(&self) -> Option<&str> {
        self.event_id.as_deref()
    }

    pub fn session(&self) -> &serde_json::Value {
        &self.session
    }

    /// `type` of the acknowledged turn detection, `None` when it is off.
    pub fn turn_detection_type(&self) -> Option<&str> {
        self.session
            .get("turn_detection")
            .and_then(|turn_detection| turn_detection.get("type"))
            .and_then(|kind| kind.as_str())
    }
}

/// Transcript of user input or assistant audio, final or partial.
///
/// Partial (`delta`) events carry their text in `delta` instead of `transcript`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TranscriptEvent {
    #[serde(default)]
    event_id: Option<String>,

    #[serde(default)]
    item_id: Option<String>,

    #[serde(alias = "delta")]
    transcript: String,
}

impl TranscriptEvent {
    pub fn new(transcript: &str) -> Self {
        Self {
            event_id: None,
            item_id: None,
            transcript: transcript.to_string(),
        }
    }

    pub fn event_id(&self) -> Option<&str> {
        self.event_id.as_deref()
    }

    pub fn item_id(&self) -> Option<&str> {
        self.item_id.as_deref()
    }

    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    pub fn into_transcript(self) -> String {
        self.transcript
    }
}
