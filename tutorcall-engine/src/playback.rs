use std::sync::Arc;

use base64::Engine;
use tutorcall_core::{CallError, MessageSink, OutboundMessage};

use crate::traits::SpeechPlayer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlaybackId(pub u64);

/// Holds at most one live playback and keeps the backend informed of whether
/// the assistant is audible.
pub struct PlaybackController {
    player: Arc<dyn SpeechPlayer>,
    sink: Arc<dyn MessageSink>,
    next_id: u64,
    current: Option<PlaybackId>,
}

impl PlaybackController {
    pub fn new(player: Arc<dyn SpeechPlayer>, sink: Arc<dyn MessageSink>) -> Self {
        Self {
            player,
            sink,
            next_id: 0,
            current: None,
        }
    }

    pub fn current(&self) -> Option<PlaybackId> {
        self.current
    }

    pub fn is_playing(&self) -> bool {
        self.current.is_some()
    }

    fn announce(&self, speaking: bool) {
        if let Err(e) = self.sink.send(OutboundMessage::assistant_speaking(speaking)) {
            log::warn!("playback: could not send speaking={speaking}: {e}");
        }
    }

    /// Undecodable payloads fail with `MalformedMessage` before anything playing is touched.
    pub async fn play(&mut self, audio_b64: &str) -> Result<PlaybackId, CallError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(audio_b64.trim())
            .map_err(|e| CallError::MalformedMessage(format!("invalid base64 audio: {e}")))?;
        if bytes.is_empty() {
            return Err(CallError::MalformedMessage("empty audio payload".into()));
        }

        if let Some(prev) = self.current.take() {
            log::debug!("playback: replacing {prev:?}");
            self.player.stop();
        }

        self.next_id += 1;
        let id = PlaybackId(self.next_id);
        self.announce(true);

        match self.player.play(id, bytes).await {
            Ok(()) => {
                self.current = Some(id);
                Ok(id)
            }
            Err(e) => {
                self.announce(false);
                Err(e)
            }
        }
    }

    /// Halts immediately. Returns whether anything was playing.
    pub fn stop(&mut self) -> bool {
        self.player.stop();
        match self.current.take() {
            Some(_) => {
                self.announce(false);
                true
            }
            None => false,
        }
    }

    /// Natural completion. Ids that were already replaced or stopped are ignored.
    pub fn finished(&mut self, id: PlaybackId) -> bool {
        if self.current != Some(id) {
            log::debug!("playback: ignoring completion of superseded {id:?}");
            return false;
        }
        self.current = None;
        self.announce(false);
        true
    }
}
