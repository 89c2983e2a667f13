use async_trait::async_trait;
use tutorcall_core::{CallError, CharacterDetails, CharacterId, SpectrumFrame, Utterance};

use crate::playback::PlaybackId;

/// Microphone seam. Implementations own the device stream exclusively.
#[async_trait]
pub trait AudioCapture: Send + Sync {
    /// Opens the device and starts buffering. No-op when already active.
    async fn start(&self) -> Result<(), CallError>;

    /// Releases the device. `Ok(None)` when idle or nothing was captured.
    async fn stop(&self) -> Result<Option<Utterance>, CallError>;

    fn is_active(&self) -> bool;

    /// Latest analyser view; `None` while inactive.
    fn spectrum(&self) -> Option<SpectrumFrame>;
}

#[async_trait]
pub trait SpeechPlayer: Send + Sync {
    /// Starts `bytes` immediately, replacing anything playing. Resolves once the
    /// clip is decoded and audible; natural completion is reported out of band
    /// with the same id.
    async fn play(&self, id: PlaybackId, bytes: Vec<u8>) -> Result<(), CallError>;

    fn stop(&self);
}

#[async_trait]
pub trait CharacterLookup: Send + Sync {
    async fn details(&self, id: CharacterId) -> anyhow::Result<CharacterDetails>;
}

pub trait HangupNavigator: Send + Sync {
    fn after_hangup(&self, character: CharacterId);
}
