use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId(pub Uuid);

impl CallId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CharacterId(pub i64);

impl std::fmt::Display for CharacterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Persona metadata served by the character-lookup service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterDetails {
    pub name: String,
    pub category_name: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterRef {
    pub id: CharacterId,
    pub details: Option<CharacterDetails>,
}

impl CharacterRef {
    pub fn new(id: CharacterId) -> Self {
        Self { id, details: None }
    }

    pub fn display_name(&self) -> String {
        self.details
            .as_ref()
            .map(|d| d.name.clone())
            .unwrap_or_else(|| format!("character #{}", self.id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Connecting,
    Listening,
    Processing,
    Speaking,
    Muted,
    Ended,
}

impl CallState {
    /// Stable label for UI display.
    pub fn label(self) -> &'static str {
        match self {
            CallState::Connecting => "connecting",
            CallState::Listening => "listening",
            CallState::Processing => "processing",
            CallState::Speaking => "speaking",
            CallState::Muted => "muted",
            CallState::Ended => "ended",
        }
    }
}

/// Mutable per-call state. Only the call engine writes to it; the detector and
/// the channel client read it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSession {
    pub id: CallId,
    pub state: CallState,
    pub muted: bool,
    pub character: CharacterRef,
    pub last_speech_ms: Option<u64>,
    pub user_transcript: Option<String>,
}

impl CallSession {
    pub fn new(character: CharacterRef) -> Self {
        Self {
            id: CallId::new(),
            state: CallState::Connecting,
            muted: false,
            character,
            last_speech_ms: None,
            user_transcript: None,
        }
    }

    /// Whether the microphone should be open for the current state.
    pub fn capture_expected(&self) -> bool {
        !self.muted && matches!(self.state, CallState::Listening | CallState::Speaking)
    }
}

/// One encoded speech segment, consumed by value when sent.
#[derive(Clone, PartialEq, Eq)]
pub struct Utterance {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub sample_rate_hz: u32,
    pub duration_ms: u64,
}

impl std::fmt::Debug for Utterance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Utterance")
            .field("bytes_len", &self.bytes.len())
            .field("mime_type", &self.mime_type)
            .field("sample_rate_hz", &self.sample_rate_hz)
            .field("duration_ms", &self.duration_ms)
            .finish()
    }
}

/// Byte-scaled (0..=255) frequency bins of the live capture stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpectrumFrame {
    pub bins: Vec<u8>,
    pub sample_rate_hz: u32,
    pub fft_size: usize,
}

impl SpectrumFrame {
    pub fn bin_width_hz(&self) -> f32 {
        if self.fft_size == 0 {
            return 0.0;
        }
        self.sample_rate_hz as f32 / self.fft_size as f32
    }
}
