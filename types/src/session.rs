use crate::audio::TurnDetection;

/// Partial session configuration carried by `session.update`.
///
/// `turn_detection` is always serialized: `null` switches server-side turn
/// detection off and leaves turn-taking to the client.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SessionConfig {
    /// Configuration for turn detection. Set to null to turn it off.
    #[serde(default)]
    turn_detection: Option<TurnDetection>,

    /// System instructions prepended to model calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    instructions: Option<String>,

    /// Voice the model answers with, e.g. "alloy".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    voice: Option<String>,
}

impl SessionConfig {
    pub fn builder() -> SessionConfigurator {
        SessionConfigurator::new()
    }

    pub fn turn_detection(&self) -> Option<&TurnDetection> {
        self.turn_detection.as_ref()
    }

    pub fn instructions(&self) -> Option<&str> {
        self.instructions.as_deref()
    }

    pub fn voice(&self) -> Option<&str> {
        self.voice.as_deref()
    }
}

pub struct SessionConfigurator {
    session: SessionConfig,
}

impl Default for SessionConfigurator {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionConfigurator {
    pub fn new() -> Self {
        Self {
            session: SessionConfig::default(),
        }
    }

    pub fn with_turn_detection(mut self, turn_detection: Option<TurnDetection>) -> Self {
        self.session.turn_detection = turn_detection;
        self
    }

    pub fn with_turn_detection_enable(mut self, turn_detection: TurnDetection) -> Self {
        self.session.turn_detection = Some(turn_detection);
        self
    }

    pub fn with_turn_detection_disable(mut self) -> Self {
        self.session.turn_detection = None;
        self
    }

    pub fn with_instructions(mut self, instructions: &str) -> Self {
        self.session.instructions = Some(instructions.to_string());
        self
    }

    pub fn with_voice(mut self, voice: &str) -> Self {
        self.session.voice = Some(voice.to_string());
        self
    }

    pub fn build(self) -> SessionConfig {
        self.session
    }
}
