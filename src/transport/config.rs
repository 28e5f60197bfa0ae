use std::time::Duration;

use voice_rtc_types::ServerVadTurnDetection;

use crate::transport::consts::{
    DATA_CHANNEL_LABEL, DEFAULT_EVENT_CAPACITY, DEFAULT_MODEL, DEFAULT_READY_TIMEOUT,
    DEFAULT_REALTIME_URL_TEMPLATE, DEFAULT_TOKEN_URL, MODEL_ENV, REALTIME_URL_TEMPLATE_ENV, TOKEN_URL_ENV,
};

#[derive(Debug, Clone)]
pub struct Config {
    token_url: String,
    realtime_url_template: String,
    model: String,
    channel_label: String,
    ready_timeout: Duration,
    turn_detection: ServerVadTurnDetection,
    event_capacity: usize,
}

pub struct ConfigBuilder {
    config: Config,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::new(),
        }
    }

    pub fn with_token_url(mut self, token_url: &str) -> Self {
        self.config.token_url = token_url.to_string();
        self
    }

    /// Template for the SDP endpoint. `{resource}`, `{deployment}` and
    /// `{model}` are substituted from the session credential.
    pub fn with_realtime_url_template(mut self, template: &str) -> Self {
        self.config.realtime_url_template = template.to_string();
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.config.model = model.to_string();
        self
    }

    pub fn with_channel_label(mut self, label: &str) -> Self {
        self.config.channel_label = label.to_string();
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.config.ready_timeout = timeout;
        self
    }

    pub fn with_turn_detection(mut self, turn_detection: ServerVadTurnDetection) -> Self {
        self.config.turn_detection = turn_detection;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Defaults, overridden by `VOICE_RTC_*` environment variables when set.
    pub fn new() -> Self {
        Self {
            token_url: env_or(TOKEN_URL_ENV, DEFAULT_TOKEN_URL),
            realtime_url_template: env_or(REALTIME_URL_TEMPLATE_ENV, DEFAULT_REALTIME_URL_TEMPLATE),
            model: env_or(MODEL_ENV, DEFAULT_MODEL),
            channel_label: DATA_CHANNEL_LABEL.to_string(),
            ready_timeout: DEFAULT_READY_TIMEOUT,
            turn_detection: ServerVadTurnDetection::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    pub fn realtime_url_template(&self) -> &str {
        &self.realtime_url_template
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn channel_label(&self) -> &str {
        &self.channel_label
    }

    pub fn ready_timeout(&self) -> Duration {
        self.ready_timeout
    }

    /// Voice-activity parameters sent whenever turn detection is enabled.
    pub fn turn_detection(&self) -> &ServerVadTurnDetection {
        &self.turn_detection
    }

    pub fn event_capacity(&self) -> usize {
        self.event_capacity
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}
