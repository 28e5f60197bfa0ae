use std::time::Duration;

pub const TOKEN_URL_ENV: &str = "VOICE_RTC_TOKEN_URL";
pub const REALTIME_URL_TEMPLATE_ENV: &str = "VOICE_RTC_REALTIME_URL_TEMPLATE";
pub const MODEL_ENV: &str = "VOICE_RTC_MODEL";

pub const DEFAULT_TOKEN_URL: &str = "http://localhost:8000/session";
pub const DEFAULT_REALTIME_URL_TEMPLATE: &str =
    "https://{resource}.realtimeapi-preview.ai.azure.com/v1/realtimertc?model={model}";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini-realtime-preview";

pub const DATA_CHANNEL_LABEL: &str = "oai-events";
pub const SDP_CONTENT_TYPE: &str = "application/sdp";

pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(30);
pub const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_EVENT_CAPACITY: usize = 64;
