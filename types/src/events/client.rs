use crate::session::SessionConfig;

/// `session.update` event
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SessionUpdateEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    event_id: Option<String>,

    /// The session configuration to update
    session: SessionConfig,
}

impl SessionUpdateEvent {
    pub fn new(session: SessionConfig) -> Self {
        Self {
            event_id: None,
            session,
        }
    }

    pub fn with_event_id(mut self, event_id: &str) -> Self {
        self.event_id = Some(event_id.to_string());
        self
    }

    pub fn session(&self) -> &SessionConfig {
        &self.session
    }
}

/// `input_audio_buffer.commit` event, closes the current utterance
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct InputAudioBufferCommitEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    event_id: Option<String>,
}

impl InputAudioBufferCommitEvent {
    pub fn new() -> Self {
        Self { event_id: None }
    }

    pub fn with_event_id(mut self, event_id: &str) -> Self {
        self.event_id = Some(event_id.to_string());
        self
    }
}

/// `input_audio_buffer.clear` event
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct InputAudioBufferClearEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    event_id: Option<String>,
}

impl InputAudioBufferClearEvent {
    pub fn new() -> Self {
        Self { event_id: None }
    }

    pub fn with_event_id(mut self, event_id: &str) -> Self {
        self.event_id = Some(event_id.to_string());
        self
    }
}

/// `response.create` event
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ResponseCreateEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    event_id: Option<String>,

    /// Per-response overrides of the session configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    response: Option<SessionConfig>,
}

impl ResponseCreateEvent {
    pub fn new() -> Self {
        Self {
            event_id: None,
            response: None,
        }
    }

    pub fn with_event_id(mut self, event_id: &str) -> Self {
        self.event_id = Some(event_id.to_string());
        self
    }

    pub fn with_update_session(mut self, response: SessionConfig) -> Self {
        self.response = Some(response);
        self
    }
}
