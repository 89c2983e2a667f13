use std::sync::Arc;

use tokio::sync::mpsc;
use tutorcall_core::{
    CallError, CallSession, CallSettings, CallState, ChannelStatus, CharacterDetails, CharacterRef,
    InboundMessage, MessageSink, OutboundMessage, VadConfig, VadSignal, VoiceActivityDetector,
};

use crate::playback::{PlaybackController, PlaybackId};
use crate::traits::{AudioCapture, HangupNavigator, SpeechPlayer};

/// Best-effort notifications for the UI. Dropped when the receiver lags.
#[derive(Debug, Clone, PartialEq)]
pub enum CallEvent {
    StateChanged { from: CallState, to: CallState },
    CharacterLoaded(CharacterDetails),
    Transcript(String),
    AssistantText(String),
    Level { average_energy: f32, voice: bool },
    Error(String),
}

pub struct CallDeps {
    pub capture: Arc<dyn AudioCapture>,
    pub player: Arc<dyn SpeechPlayer>,
    pub sink: Arc<dyn MessageSink>,
    pub navigator: Arc<dyn HangupNavigator>,
}

/// The call state machine. Sole writer of the `CallSession`.
///
/// Every entry point takes the current time in milliseconds on a monotonic
/// clock chosen by the caller, so the machine can be driven deterministically.
pub struct CallEngine {
    session: CallSession,
    settings: CallSettings,
    vad: VoiceActivityDetector,
    playback: PlaybackController,
    capture: Arc<dyn AudioCapture>,
    sink: Arc<dyn MessageSink>,
    navigator: Arc<dyn HangupNavigator>,
    events: mpsc::Sender<CallEvent>,
    processing_since_ms: Option<u64>,
}

impl CallEngine {
    pub fn new(
        character: CharacterRef,
        vad: VadConfig,
        settings: CallSettings,
        deps: CallDeps,
        events: mpsc::Sender<CallEvent>,
    ) -> Self {
        Self {
            session: CallSession::new(character),
            settings,
            vad: VoiceActivityDetector::new(vad),
            playback: PlaybackController::new(deps.player, deps.sink.clone()),
            capture: deps.capture,
            sink: deps.sink,
            navigator: deps.navigator,
            events,
            processing_since_ms: None,
        }
    }

    pub fn session(&self) -> &CallSession {
        &self.session
    }

    pub fn state(&self) -> CallState {
        self.session.state
    }

    pub fn is_ended(&self) -> bool {
        self.session.state == CallState::Ended
    }

    pub fn current_playback(&self) -> Option<PlaybackId> {
        self.playback.current()
    }

    pub fn into_session(self) -> CallSession {
        self.session
    }

    fn emit(&self, event: CallEvent) {
        let _ = self.events.try_send(event);
    }

    fn report(&self, err: &CallError) {
        log::warn!("call {}: {err}", self.session.id);
        self.emit(CallEvent::Error(err.to_string()));
    }

    fn transition(&mut self, next: CallState) {
        let prev = self.session.state;
        if prev == next {
            return;
        }
        log::info!("call state: {prev:?} -> {next:?}");
        self.session.state = next;
        self.emit(CallEvent::StateChanged { from: prev, to: next });
    }

    pub fn set_character_details(&mut self, details: CharacterDetails) {
        log::info!("call {}: talking to {}", self.session.id, details.name);
        self.session.character.details = Some(details.clone());
        self.emit(CallEvent::CharacterLoaded(details));
    }

    async fn start_capture(&mut self) -> Result<(), CallError> {
        self.vad.reset();
        self.capture.start().await
    }

    /// Stops capture and throws the buffered audio away.
    async fn discard_capture(&mut self) {
        if !self.capture.is_active() {
            return;
        }
        match self.capture.stop().await {
            Ok(Some(u)) => log::debug!("discarded {} ms of capture", u.duration_ms),
            Ok(None) => {}
            Err(e) => self.report(&e),
        }
        self.vad.reset();
    }

    /// Common exit back to the user's turn. Lands in `Muted` when muted.
    /// With `fresh`, any running capture is restarted so earlier audio is dropped.
    async fn resume_listening(&mut self, fresh: bool) {
        self.processing_since_ms = None;
        if self.session.muted {
            self.discard_capture().await;
            self.transition(CallState::Muted);
            return;
        }
        if fresh {
            self.discard_capture().await;
        }
        if !self.capture.is_active() {
            if let Err(e) = self.start_capture().await {
                self.report(&e);
            }
        }
        self.transition(CallState::Listening);
    }

    pub async fn on_channel_status(&mut self, status: ChannelStatus, _now_ms: u64) {
        match status {
            ChannelStatus::Open if self.session.state == CallState::Connecting => {
                if self.session.muted {
                    self.transition(CallState::Muted);
                    return;
                }
                match self.start_capture().await {
                    Ok(()) => self.transition(CallState::Listening),
                    // The user has to fix the device; stay put.
                    Err(e) => self.report(&e),
                }
            }
            ChannelStatus::Open => log::info!("call {}: channel open", self.session.id),
            ChannelStatus::Reconnecting | ChannelStatus::Closed => {
                if !self.is_ended() {
                    log::warn!(
                        "call {}: channel {status:?} while {}",
                        self.session.id,
                        self.session.state.label()
                    );
                }
            }
            ChannelStatus::Connecting => {}
        }
    }

    pub async fn on_tick(&mut self, now_ms: u64) {
        match self.session.state {
            CallState::Ended | CallState::Connecting => return,
            CallState::Processing => {
                let since = *self.processing_since_ms.get_or_insert(now_ms);
                if now_ms.saturating_sub(since) >= self.settings.response_timeout_ms {
                    self.report(&CallError::ChannelClosed(format!(
                        "no response within {} ms",
                        self.settings.response_timeout_ms
                    )));
                    self.resume_listening(false).await;
                }
                return;
            }
            _ => {}
        }

        if !self.capture.is_active() {
            return;
        }
        let Some(frame) = self.capture.spectrum() else {
            return;
        };

        let outcome = self.vad.tick(&self.session, &frame, now_ms);
        if let Some(ev) = outcome.event {
            self.emit(CallEvent::Level {
                average_energy: ev.average_energy,
                voice: ev.is_voice(),
            });
        }
        self.session.last_speech_ms = self.vad.last_speech_ms();

        match outcome.signal {
            Some(VadSignal::SpeechStart) => {
                self.session.user_transcript = None;
                if self.session.state == CallState::Speaking {
                    self.barge_in();
                }
            }
            Some(VadSignal::SpeechEnd) if self.session.state == CallState::Listening => {
                self.finish_utterance(now_ms).await;
            }
            _ => {}
        }
    }

    /// User spoke over the assistant. Capture keeps running so the interruption
    /// becomes the next utterance.
    fn barge_in(&mut self) {
        log::info!("call {}: barge-in", self.session.id);
        self.playback.stop();
        self.transition(CallState::Listening);
    }

    async fn finish_utterance(&mut self, now_ms: u64) {
        let flushed = self.capture.stop().await;
        self.vad.reset();

        let utterance = match flushed {
            Ok(Some(u)) => u,
            Ok(None) => {
                log::info!("call {}: speech ended with no audio", self.session.id);
                self.resume_listening(true).await;
                return;
            }
            Err(e) => {
                self.report(&e);
                self.resume_listening(true).await;
                return;
            }
        };

        log::info!(
            "call {}: sending utterance ({} ms, {} bytes)",
            self.session.id,
            utterance.duration_ms,
            utterance.bytes.len()
        );
        self.transition(CallState::Processing);
        self.processing_since_ms = Some(now_ms);
        let msg = OutboundMessage::audio(utterance, self.session.character.id);
        if let Err(e) = self.sink.send(msg) {
            self.report(&e);
            self.resume_listening(false).await;
        }
    }

    pub async fn on_inbound(&mut self, msg: InboundMessage, _now_ms: u64) {
        if self.is_ended() {
            return;
        }
        match msg {
            InboundMessage::UserTranscript { content } => {
                self.session.user_transcript = Some(content.clone());
                self.emit(CallEvent::Transcript(content));
            }
            InboundMessage::SpeechAudio { audio, provider } => {
                self.on_speech_audio(&audio, provider.as_deref()).await;
            }
            InboundMessage::TextResponse { content } => {
                log::warn!("call {}: text-only response; speech synthesis failed", self.session.id);
                self.emit(CallEvent::AssistantText(content));
                if self.session.state == CallState::Processing {
                    self.resume_listening(false).await;
                }
            }
            InboundMessage::Error { content } => {
                log::warn!("call {}: backend error: {content}", self.session.id);
                self.emit(CallEvent::Error(content));
                if self.session.state == CallState::Processing {
                    self.resume_listening(false).await;
                }
            }
            InboundMessage::End => {
                if self.session.state == CallState::Processing {
                    log::info!("call {}: response ended without audio", self.session.id);
                    self.resume_listening(false).await;
                }
            }
            InboundMessage::ConnectionReady => {}
            InboundMessage::Other { kind } => {
                log::debug!("call {}: ignoring inbound {kind}", self.session.id);
            }
        }
    }

    async fn on_speech_audio(&mut self, audio: &str, provider: Option<&str>) {
        let state = self.session.state;
        if !matches!(state, CallState::Processing | CallState::Speaking) {
            let err = CallError::StalePlaybackPacket {
                state: state.label(),
            };
            log::warn!("call {}: {err}", self.session.id);
            return;
        }

        if audio.trim().is_empty() {
            if state == CallState::Processing {
                log::info!("call {}: empty audio response", self.session.id);
                self.resume_listening(false).await;
            }
            return;
        }

        match self.playback.play(audio).await {
            Ok(id) => {
                log::info!(
                    "call {}: playing {id:?} from {}",
                    self.session.id,
                    provider.unwrap_or("backend")
                );
                if state == CallState::Processing {
                    self.transition(CallState::Speaking);
                    // Listen for barge-in while the assistant talks.
                    if !self.session.muted {
                        if let Err(e) = self.start_capture().await {
                            self.report(&e);
                        }
                    }
                }
            }
            Err(e @ CallError::MalformedMessage(_)) => {
                log::warn!("call {}: {e}", self.session.id);
                // The reply already playing stays audible and interruptible.
                if state == CallState::Processing {
                    self.resume_listening(false).await;
                }
            }
            Err(e) => {
                self.report(&e);
                self.playback.stop();
                self.resume_listening(true).await;
            }
        }
    }

    pub async fn on_playback_finished(&mut self, id: PlaybackId, _now_ms: u64) {
        if !self.playback.finished(id) {
            return;
        }
        if self.session.state == CallState::Speaking {
            self.resume_listening(true).await;
        }
    }

    /// Idempotent: repeating the current value does nothing.
    pub async fn set_muted(&mut self, muted: bool, _now_ms: u64) {
        if self.session.muted == muted || self.is_ended() {
            return;
        }
        self.session.muted = muted;
        log::info!("call {}: muted={muted}", self.session.id);

        if muted {
            self.discard_capture().await;
            if self.session.state == CallState::Listening {
                self.transition(CallState::Muted);
            }
            return;
        }

        match self.session.state {
            CallState::Muted => self.resume_listening(true).await,
            CallState::Speaking => {
                if let Err(e) = self.start_capture().await {
                    self.report(&e);
                }
            }
            _ => {}
        }
    }

    pub async fn toggle_mute(&mut self, now_ms: u64) {
        let next = !self.session.muted;
        self.set_muted(next, now_ms).await;
    }

    pub async fn hang_up(&mut self, _now_ms: u64) {
        if self.is_ended() {
            return;
        }
        self.discard_capture().await;
        self.playback.stop();
        self.sink.close();
        self.transition(CallState::Ended);
        self.navigator.after_hangup(self.session.character.id);
    }
}
