use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tutorcall_audio::{CaptureManager, PlaybackError, SpeechOutput};
use tutorcall_core::{
    CallError, CaptureSettings, CharacterDetails, CharacterId, SpectrumFrame, Utterance,
};
use tutorcall_engine::PlaybackId;
use tutorcall_engine::traits::{AudioCapture, CharacterLookup, SpeechPlayer};
use tutorcall_providers::CharacterService;

/// Real microphone behind the engine's capture seam.
///
/// Opening and draining the device block on the audio worker, so both run on the
/// blocking pool.
#[derive(Clone)]
pub struct DeviceCapture {
    inner: Arc<Mutex<CaptureManager>>,
}

impl DeviceCapture {
    pub fn new(settings: CaptureSettings) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CaptureManager::new(settings))),
        }
    }

    fn poisoned() -> CallError {
        CallError::Capture("capture state poisoned".into())
    }
}

#[async_trait]
impl AudioCapture for DeviceCapture {
    async fn start(&self) -> Result<(), CallError> {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let mut capture = inner.lock().map_err(|_| Self::poisoned())?;
            capture.start()
        })
        .await
        .map_err(|e| CallError::Capture(format!("capture task failed: {e}")))?
    }

    async fn stop(&self) -> Result<Option<Utterance>, CallError> {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let mut capture = inner.lock().map_err(|_| Self::poisoned())?;
            capture.stop()
        })
        .await
        .map_err(|e| CallError::Capture(format!("capture task failed: {e}")))?
    }

    fn is_active(&self) -> bool {
        self.inner.lock().map(|c| c.is_active()).unwrap_or(false)
    }

    fn spectrum(&self) -> Option<SpectrumFrame> {
        self.inner.lock().ok()?.spectrum()
    }
}

pub struct DevicePlayer {
    output: Arc<SpeechOutput>,
}

impl DevicePlayer {
    /// Opens the default output. Natural completions are posted to `done`.
    pub fn open(done: mpsc::UnboundedSender<PlaybackId>) -> Result<Self, PlaybackError> {
        let output = SpeechOutput::open(Arc::new(move |id| {
            let _ = done.send(PlaybackId(id));
        }))?;
        Ok(Self {
            output: Arc::new(output),
        })
    }
}

#[async_trait]
impl SpeechPlayer for DevicePlayer {
    /// Decoding waits on the speaker worker, so it runs on the blocking pool.
    async fn play(&self, id: PlaybackId, bytes: Vec<u8>) -> Result<(), CallError> {
        let output = self.output.clone();
        tokio::task::spawn_blocking(move || output.play(id.0, bytes))
            .await
            .map_err(|e| CallError::Playback(format!("playback task failed: {e}")))?
            .map_err(|e| CallError::Playback(e.to_string()))
    }

    fn stop(&self) {
        self.output.stop();
    }
}

pub struct ServiceLookup(pub CharacterService);

#[async_trait]
impl CharacterLookup for ServiceLookup {
    async fn details(&self, id: CharacterId) -> anyhow::Result<CharacterDetails> {
        self.0.details(id).await
    }
}
