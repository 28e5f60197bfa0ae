pub mod client;
pub mod server;

use client::*;
use server::*;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate(SessionUpdateEvent),
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit(InputAudioBufferCommitEvent),
    #[serde(rename = "input_audio_buffer.clear")]
    InputAudioBufferClear(InputAudioBufferClearEvent),
    #[serde(rename = "response.create")]
    ResponseCreate(ResponseCreateEvent),
}

impl ClientEvent {
    /// The wire `type` of this event.
    pub fn event_type(&self) -> &'static str {
        match self {
            ClientEvent::SessionUpdate(_) => "session.update",
            ClientEvent::InputAudioBufferCommit(_) => "input_audio_buffer.commit",
            ClientEvent::InputAudioBufferClear(_) => "input_audio_buffer.clear",
            ClientEvent::ResponseCreate(_) => "response.create",
        }
    }
}

/// Inbound events the client understands. Every other `type` decodes to
/// [`ServerEvent::Other`].
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "error")]
    Error(ErrorEvent),
    #[serde(rename = "session.created")]
    SessionCreated(SessionEvent),
    #[serde(rename = "session.updated")]
    SessionUpdated(SessionEvent),
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputAudioTranscriptionCompleted(TranscriptEvent),
    #[serde(
        rename = "conversation.item.input_audio_transcription.partial",
        alias = "conversation.item.input_audio_transcription.delta"
    )]
    InputAudioTranscriptionPartial(TranscriptEvent),
    #[serde(rename = "response.audio_transcript.done")]
    ResponseAudioTranscriptDone(TranscriptEvent),
    #[serde(
        rename = "response.audio_transcript.partial",
        alias = "response.audio_transcript.delta"
    )]
    ResponseAudioTranscriptPartial(TranscriptEvent),
    #[serde(other)]
    Other,
}
