// Wire messages exchanged with the conversation backend over the duplex channel.
//
// Frames are flat JSON objects tagged by `type`.

use base64::Engine;
use serde::Serialize;

use crate::error::CallError;
use crate::types::{CharacterId, Utterance};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundMessage {
    Audio {
        audio: String,
        #[serde(rename = "characterId")]
        character_id: i64,
        #[serde(rename = "isVoiceMode")]
        is_voice_mode: bool,
    },
    AssistantSpeaking {
        speaking: bool,
    },
}

impl OutboundMessage {
    /// Consumes the utterance; its bytes are not kept after this call.
    pub fn audio(utterance: Utterance, character: CharacterId) -> Self {
        let audio = base64::engine::general_purpose::STANDARD.encode(utterance.bytes);
        OutboundMessage::Audio {
            audio,
            character_id: character.0,
            is_voice_mode: true,
        }
    }

    pub fn assistant_speaking(speaking: bool) -> Self {
        OutboundMessage::AssistantSpeaking { speaking }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::Audio { .. } => "AUDIO",
            OutboundMessage::AssistantSpeaking { .. } => "ASSISTANT_SPEAKING",
        }
    }

    pub fn to_json(&self) -> String {
        // Serializing these variants cannot fail: all fields are strings, ints or bools.
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    ConnectionReady,
    UserTranscript { content: String },
    /// `TTS_RESPONSE` and `VOICE_RESPONSE` share a shape.
    SpeechAudio { audio: String, provider: Option<String> },
    /// Text-only reply; the backend failed to synthesize audio.
    TextResponse { content: String },
    Error { content: String },
    End,
    Other { kind: String },
}

impl InboundMessage {
    pub fn kind(&self) -> &str {
        match self {
            InboundMessage::ConnectionReady => "CONNECTION_READY",
            InboundMessage::UserTranscript { .. } => "USER_TRANSCRIPT",
            InboundMessage::SpeechAudio { .. } => "VOICE_RESPONSE",
            InboundMessage::TextResponse { .. } => "RESPONSE",
            InboundMessage::Error { .. } => "ERROR",
            InboundMessage::End => "END",
            InboundMessage::Other { kind } => kind,
        }
    }
}

fn str_field(v: &serde_json::Value, key: &str) -> Option<String> {
    v.get(key).and_then(|v| v.as_str()).map(|s| s.to_string())
}

pub fn parse_inbound_message(s: &str) -> Result<InboundMessage, CallError> {
    let v: serde_json::Value = serde_json::from_str(s)
        .map_err(|e| CallError::MalformedMessage(format!("decode json: {e}")))?;
    let t = v
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| CallError::MalformedMessage("missing type".into()))?;

    match t {
        "CONNECTION_READY" => Ok(InboundMessage::ConnectionReady),
        "USER_TRANSCRIPT" => {
            let content = str_field(&v, "content")
                .ok_or_else(|| CallError::MalformedMessage("USER_TRANSCRIPT without content".into()))?;
            Ok(InboundMessage::UserTranscript { content })
        }
        "TTS_RESPONSE" | "VOICE_RESPONSE" => {
            // An absent payload is an empty response, not a decode failure.
            let audio = str_field(&v, "audio").unwrap_or_default();
            Ok(InboundMessage::SpeechAudio {
                audio,
                provider: str_field(&v, "provider"),
            })
        }
        "RESPONSE" => {
            let content = str_field(&v, "content")
                .or_else(|| str_field(&v, "message"))
                .unwrap_or_default();
            Ok(InboundMessage::TextResponse { content })
        }
        "ERROR" => {
            let content = str_field(&v, "content")
                .or_else(|| str_field(&v, "message"))
                .unwrap_or_default();
            Ok(InboundMessage::Error { content })
        }
        "END" => Ok(InboundMessage::End),
        other => Ok(InboundMessage::Other {
            kind: other.to_string(),
        }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Connecting,
    Open,
    Reconnecting,
    Closed,
}

impl ChannelStatus {
    pub fn is_open(self) -> bool {
        self == ChannelStatus::Open
    }
}

/// Outbound half of the duplex channel as seen by the call engine.
pub trait MessageSink: Send + Sync {
    /// Fails with `SendWhileDisconnected` instead of queueing when not open.
    fn send(&self, msg: OutboundMessage) -> Result<(), CallError>;

    fn status(&self) -> ChannelStatus;

    /// Caller-initiated close; suppresses reconnection.
    fn close(&self);
}
