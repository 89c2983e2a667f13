use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tutorcall_core::{
    CallError, CallSettings, CallState, ChannelStatus, CharacterDetails, CharacterId,
    CharacterRef, InboundMessage, MessageSink, OutboundMessage, SpectrumFrame, Utterance,
    VadConfig,
};
use tutorcall_engine::traits::{AudioCapture, CharacterLookup, HangupNavigator, SpeechPlayer};
use tutorcall_engine::{
    CallCommand, CallDeps, CallEngine, CallEvent, CallIo, PlaybackId, run_call,
};

const TICK: u64 = 16;

fn voice_frame() -> SpectrumFrame {
    let mut bins = vec![0u8; 128];
    for b in &mut bins[4..=54] {
        *b = 255;
    }
    SpectrumFrame {
        bins,
        sample_rate_hz: 16_000,
        fft_size: 256,
    }
}

fn silent_frame() -> SpectrumFrame {
    SpectrumFrame {
        bins: vec![0u8; 128],
        sample_rate_hz: 16_000,
        fft_size: 256,
    }
}

struct FakeCapture {
    active: AtomicBool,
    starts: AtomicUsize,
    stops: AtomicUsize,
    frame: Mutex<SpectrumFrame>,
    deny: bool,
    yields_audio: AtomicBool,
}

impl FakeCapture {
    fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            frame: Mutex::new(silent_frame()),
            deny: false,
            yields_audio: AtomicBool::new(true),
        }
    }

    fn denied() -> Self {
        Self {
            deny: true,
            ..Self::new()
        }
    }

    fn speak(&self, voiced: bool) {
        *self.frame.lock().unwrap() = if voiced { voice_frame() } else { silent_frame() };
    }
}

#[async_trait::async_trait]
impl AudioCapture for FakeCapture {
    async fn start(&self) -> Result<(), CallError> {
        if self.deny {
            return Err(CallError::DeviceUnavailable("permission denied".into()));
        }
        if !self.active.swap(true, Ordering::SeqCst) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn stop(&self) -> Result<Option<Utterance>, CallError> {
        if !self.active.swap(false, Ordering::SeqCst) {
            return Ok(None);
        }
        self.stops.fetch_add(1, Ordering::SeqCst);
        if !self.yields_audio.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(Some(Utterance {
            bytes: vec![1, 2, 3],
            mime_type: "audio/wav".into(),
            sample_rate_hz: 16_000,
            duration_ms: 600,
        }))
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn spectrum(&self) -> Option<SpectrumFrame> {
        self.is_active().then(|| self.frame.lock().unwrap().clone())
    }
}

#[derive(Default)]
struct FakePlayer {
    plays: Mutex<Vec<PlaybackId>>,
    stops: AtomicUsize,
}

#[async_trait::async_trait]
impl SpeechPlayer for FakePlayer {
    async fn play(&self, id: PlaybackId, _bytes: Vec<u8>) -> Result<(), CallError> {
        self.plays.lock().unwrap().push(id);
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct FakeSink {
    sent: Mutex<Vec<OutboundMessage>>,
    closed: AtomicBool,
    offline: AtomicBool,
}

impl FakeSink {
    fn audio_count(&self) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|m| matches!(m, OutboundMessage::Audio { .. }))
            .count()
    }

    fn sent_len(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    fn last(&self) -> Option<OutboundMessage> {
        self.sent.lock().unwrap().last().cloned()
    }
}

impl MessageSink for FakeSink {
    fn send(&self, msg: OutboundMessage) -> Result<(), CallError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(CallError::SendWhileDisconnected);
        }
        self.sent.lock().unwrap().push(msg);
        Ok(())
    }

    fn status(&self) -> ChannelStatus {
        if self.offline.load(Ordering::SeqCst) {
            ChannelStatus::Reconnecting
        } else {
            ChannelStatus::Open
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct FakeNavigator {
    visits: Mutex<Vec<CharacterId>>,
}

impl HangupNavigator for FakeNavigator {
    fn after_hangup(&self, character: CharacterId) {
        self.visits.lock().unwrap().push(character);
    }
}

struct Harness {
    engine: CallEngine,
    capture: Arc<FakeCapture>,
    player: Arc<FakePlayer>,
    sink: Arc<FakeSink>,
    navigator: Arc<FakeNavigator>,
    events: mpsc::Receiver<CallEvent>,
}

impl Harness {
    fn with_capture(capture: FakeCapture) -> Self {
        let capture = Arc::new(capture);
        let player = Arc::new(FakePlayer::default());
        let sink = Arc::new(FakeSink::default());
        let navigator = Arc::new(FakeNavigator::default());
        let (tx, events) = mpsc::channel(4096);

        let engine = CallEngine::new(
            CharacterRef::new(CharacterId(42)),
            VadConfig::default(),
            CallSettings::default(),
            CallDeps {
                capture: capture.clone(),
                player: player.clone(),
                sink: sink.clone(),
                navigator: navigator.clone(),
            },
            tx,
        );

        Self {
            engine,
            capture,
            player,
            sink,
            navigator,
            events,
        }
    }

    fn new() -> Self {
        Self::with_capture(FakeCapture::new())
    }

    async fn open(&mut self) {
        self.engine.on_channel_status(ChannelStatus::Open, 0).await;
    }

    /// Ticks every 16 ms over `[from, to)`.
    async fn ticks(&mut self, from: u64, to: u64) {
        let mut t = from;
        while t < to {
            self.engine.on_tick(t).await;
            t += TICK;
        }
    }

    /// Drives listening -> processing with one utterance. Returns the time after.
    async fn speak_one_utterance(&mut self) -> u64 {
        self.capture.speak(true);
        self.ticks(0, 600).await;
        self.capture.speak(false);
        self.ticks(608, 608 + 1300).await;
        608 + 1300
    }

    fn errors(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(ev) = self.events.try_recv() {
            if let CallEvent::Error(e) = ev {
                out.push(e);
            }
        }
        out
    }
}

fn voice_response() -> InboundMessage {
    InboundMessage::SpeechAudio {
        audio: "AQID".into(),
        provider: Some("test".into()),
    }
}

#[tokio::test]
async fn end_to_end_turn_with_barge_in() {
    let mut h = Harness::new();
    h.open().await;
    assert_eq!(h.engine.state(), CallState::Listening);
    assert!(h.capture.is_active());

    let t = h.speak_one_utterance().await;
    assert_eq!(h.sink.audio_count(), 1);
    assert_eq!(h.engine.state(), CallState::Processing);
    assert!(!h.capture.is_active());
    match h.sink.last() {
        Some(OutboundMessage::Audio {
            audio,
            character_id,
            is_voice_mode,
        }) => {
            assert_eq!(audio, "AQID");
            assert_eq!(character_id, 42);
            assert!(is_voice_mode);
        }
        other => panic!("unexpected last message: {other:?}"),
    }

    let reply_at = t + 100;
    h.engine.on_inbound(voice_response(), reply_at).await;
    assert_eq!(h.engine.state(), CallState::Speaking);
    assert_eq!(h.player.plays.lock().unwrap().len(), 1);
    assert_eq!(
        h.sink.last(),
        Some(OutboundMessage::AssistantSpeaking { speaking: true })
    );
    assert!(h.capture.is_active(), "capture listens for barge-in");

    h.ticks(reply_at, reply_at + 200).await;
    assert_eq!(h.engine.state(), CallState::Speaking);

    // User talks over the reply 200 ms in.
    h.capture.speak(true);
    let sent_before = h.sink.sent_len();
    let mut t = reply_at + 200;
    let stops_before = h.player.stops.load(Ordering::SeqCst);
    while h.engine.state() == CallState::Speaking {
        assert!(t < reply_at + 1_000, "barge-in never fired");
        h.engine.on_tick(t).await;
        t += TICK;
    }

    assert_eq!(h.engine.state(), CallState::Listening);
    assert_eq!(h.player.stops.load(Ordering::SeqCst), stops_before + 1);
    assert_eq!(h.sink.sent_len(), sent_before + 1);
    assert_eq!(
        h.sink.last(),
        Some(OutboundMessage::AssistantSpeaking { speaking: false })
    );
    assert!(h.capture.is_active(), "capture keeps running after barge-in");
    assert_eq!(h.engine.current_playback(), None);
    assert_eq!(h.sink.audio_count(), 1);
}

#[tokio::test]
async fn barge_in_speech_becomes_next_utterance() {
    let mut h = Harness::new();
    h.open().await;
    let t = h.speak_one_utterance().await;
    h.engine.on_inbound(voice_response(), t).await;

    h.capture.speak(true);
    h.ticks(t, t + 400).await;
    assert_eq!(h.engine.state(), CallState::Listening);

    h.capture.speak(false);
    h.ticks(t + 400, t + 2_000).await;
    assert_eq!(h.sink.audio_count(), 2);
    assert_eq!(h.engine.state(), CallState::Processing);
}

#[tokio::test]
async fn muting_twice_stops_capture_once() {
    let mut h = Harness::new();
    h.open().await;
    assert_eq!(h.capture.starts.load(Ordering::SeqCst), 1);

    h.engine.set_muted(true, 10).await;
    h.engine.set_muted(true, 20).await;
    assert_eq!(h.capture.stops.load(Ordering::SeqCst), 1);
    assert_eq!(h.engine.state(), CallState::Muted);
    assert!(!h.capture.is_active());

    // Muted input never reaches the detector.
    h.capture.speak(true);
    h.ticks(30, 2_000).await;
    assert_eq!(h.sink.audio_count(), 0);

    h.engine.toggle_mute(2_000).await;
    assert_eq!(h.engine.state(), CallState::Listening);
    assert_eq!(h.capture.starts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn muted_before_open_lands_in_muted() {
    let mut h = Harness::new();
    h.engine.set_muted(true, 0).await;
    assert_eq!(h.engine.state(), CallState::Connecting);
    h.open().await;
    assert_eq!(h.engine.state(), CallState::Muted);
    assert_eq!(h.capture.starts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn mute_while_speaking_returns_to_muted() {
    let mut h = Harness::new();
    h.open().await;
    let t = h.speak_one_utterance().await;
    h.engine.on_inbound(voice_response(), t).await;
    assert!(h.capture.is_active());

    h.engine.set_muted(true, t + 10).await;
    assert_eq!(h.engine.state(), CallState::Speaking);
    assert!(!h.capture.is_active());

    let id = h.engine.current_playback().unwrap();
    h.engine.on_playback_finished(id, t + 500).await;
    assert_eq!(h.engine.state(), CallState::Muted);
    assert!(!h.capture.is_active());
}

#[tokio::test]
async fn permission_denied_stays_connecting() {
    let mut h = Harness::with_capture(FakeCapture::denied());
    h.open().await;

    assert_eq!(h.engine.state(), CallState::Connecting);
    assert_eq!(h.sink.audio_count(), 0);
    let errors = h.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("permission denied"));

    h.ticks(0, 2_000).await;
    assert_eq!(h.sink.audio_count(), 0);
}

#[tokio::test]
async fn natural_finish_restarts_capture() {
    let mut h = Harness::new();
    h.open().await;
    let t = h.speak_one_utterance().await;
    h.engine.on_inbound(voice_response(), t).await;
    let id = h.engine.current_playback().unwrap();
    let starts = h.capture.starts.load(Ordering::SeqCst);
    let stops = h.capture.stops.load(Ordering::SeqCst);

    h.engine.on_playback_finished(id, t + 900).await;
    assert_eq!(h.engine.state(), CallState::Listening);
    assert_eq!(
        h.sink.last(),
        Some(OutboundMessage::AssistantSpeaking { speaking: false })
    );
    assert_eq!(h.capture.stops.load(Ordering::SeqCst), stops + 1);
    assert_eq!(h.capture.starts.load(Ordering::SeqCst), starts + 1);
    assert!(h.capture.is_active());
}

#[tokio::test]
async fn replacement_audio_ignores_superseded_completion() {
    let mut h = Harness::new();
    h.open().await;
    let t = h.speak_one_utterance().await;
    h.engine.on_inbound(voice_response(), t).await;
    let first = h.engine.current_playback().unwrap();

    h.engine.on_inbound(voice_response(), t + 50).await;
    let second = h.engine.current_playback().unwrap();
    assert_ne!(first, second);
    assert_eq!(h.engine.state(), CallState::Speaking);

    h.engine.on_playback_finished(first, t + 60).await;
    assert_eq!(h.engine.state(), CallState::Speaking);
    h.engine.on_playback_finished(second, t + 900).await;
    assert_eq!(h.engine.state(), CallState::Listening);
}

#[tokio::test]
async fn late_audio_is_never_played() {
    let mut h = Harness::new();
    h.open().await;
    h.engine.on_inbound(voice_response(), 10).await;
    assert_eq!(h.engine.state(), CallState::Listening);
    assert!(h.player.plays.lock().unwrap().is_empty());
    assert_eq!(h.sink.sent_len(), 0);
}

#[tokio::test]
async fn late_audio_after_barge_in_is_discarded() {
    let mut h = Harness::new();
    h.open().await;
    let t = h.speak_one_utterance().await;
    h.engine.on_inbound(voice_response(), t).await;
    assert_eq!(h.engine.state(), CallState::Speaking);

    h.capture.speak(true);
    h.ticks(t, t + 400).await;
    assert_eq!(h.engine.state(), CallState::Listening);
    let plays = h.player.plays.lock().unwrap().len();
    let sent = h.sink.sent_len();

    h.engine.on_inbound(voice_response(), t + 410).await;
    assert_eq!(h.engine.state(), CallState::Listening);
    assert_eq!(h.player.plays.lock().unwrap().len(), plays);
    assert_eq!(h.sink.sent_len(), sent);
    assert_eq!(h.engine.current_playback(), None);
}

#[tokio::test]
async fn undecodable_audio_while_speaking_keeps_the_reply() {
    let mut h = Harness::new();
    h.open().await;
    let t = h.speak_one_utterance().await;
    h.engine.on_inbound(voice_response(), t).await;
    let id = h.engine.current_playback().unwrap();
    let stops = h.player.stops.load(Ordering::SeqCst);

    h.engine
        .on_inbound(
            InboundMessage::SpeechAudio {
                audio: "%%%not-base64".into(),
                provider: None,
            },
            t + 50,
        )
        .await;
    assert_eq!(h.engine.state(), CallState::Speaking);
    assert_eq!(h.engine.current_playback(), Some(id));
    assert_eq!(h.player.stops.load(Ordering::SeqCst), stops);
    assert_eq!(
        h.sink.last(),
        Some(OutboundMessage::AssistantSpeaking { speaking: true })
    );

    // Still interruptible.
    h.capture.speak(true);
    h.ticks(t + 60, t + 400).await;
    assert_eq!(h.engine.state(), CallState::Listening);
    assert_eq!(h.player.stops.load(Ordering::SeqCst), stops + 1);
}

#[tokio::test]
async fn undecodable_first_reply_returns_to_listening() {
    let mut h = Harness::new();
    h.open().await;
    let t = h.speak_one_utterance().await;
    h.engine
        .on_inbound(
            InboundMessage::SpeechAudio {
                audio: "%%%".into(),
                provider: None,
            },
            t,
        )
        .await;
    assert_eq!(h.engine.state(), CallState::Listening);
    assert!(h.player.plays.lock().unwrap().is_empty());
    assert!(h.capture.is_active());
}

#[tokio::test]
async fn non_audio_responses_return_to_listening() {
    for msg in [
        InboundMessage::Error {
            content: "llm down".into(),
        },
        InboundMessage::TextResponse {
            content: "hola".into(),
        },
        InboundMessage::End,
        InboundMessage::SpeechAudio {
            audio: String::new(),
            provider: None,
        },
    ] {
        let mut h = Harness::new();
        h.open().await;
        let t = h.speak_one_utterance().await;
        assert_eq!(h.engine.state(), CallState::Processing);

        h.engine.on_inbound(msg.clone(), t).await;
        assert_eq!(h.engine.state(), CallState::Listening, "after {msg:?}");
        assert!(h.capture.is_active());
        assert!(h.player.plays.lock().unwrap().is_empty());
    }
}

#[tokio::test]
async fn transcript_is_recorded_and_cleared_on_next_speech() {
    let mut h = Harness::new();
    h.open().await;
    let t = h.speak_one_utterance().await;
    h.engine
        .on_inbound(
            InboundMessage::UserTranscript {
                content: "how do I say cat".into(),
            },
            t,
        )
        .await;
    assert_eq!(
        h.engine.session().user_transcript.as_deref(),
        Some("how do I say cat")
    );

    h.engine.on_inbound(InboundMessage::End, t + 10).await;
    h.capture.speak(true);
    h.ticks(t + 20, t + 200).await;
    assert_eq!(h.engine.session().user_transcript, None);
}

#[tokio::test]
async fn empty_utterance_keeps_listening() {
    let mut h = Harness::new();
    h.capture.yields_audio.store(false, Ordering::SeqCst);
    h.open().await;
    h.speak_one_utterance().await;

    assert_eq!(h.sink.audio_count(), 0);
    assert_eq!(h.engine.state(), CallState::Listening);
    assert!(h.capture.is_active());
}

#[tokio::test]
async fn send_failure_returns_to_listening() {
    let mut h = Harness::new();
    h.open().await;
    h.sink.offline.store(true, Ordering::SeqCst);
    h.speak_one_utterance().await;

    assert_eq!(h.engine.state(), CallState::Listening);
    assert!(h.capture.is_active());
    let errors = h.errors();
    assert!(errors.iter().any(|e| e.contains("not open")), "{errors:?}");
}

#[tokio::test]
async fn response_timeout_returns_to_listening() {
    let mut h = Harness::new();
    h.open().await;
    let t = h.speak_one_utterance().await;
    assert_eq!(h.engine.state(), CallState::Processing);

    h.engine.on_tick(t + 29_000).await;
    assert_eq!(h.engine.state(), CallState::Processing);
    h.engine.on_tick(t + 31_000).await;
    assert_eq!(h.engine.state(), CallState::Listening);
}

#[tokio::test]
async fn hang_up_tears_everything_down() {
    let mut h = Harness::new();
    h.open().await;
    let t = h.speak_one_utterance().await;
    h.engine.on_inbound(voice_response(), t).await;

    h.engine.hang_up(t + 10).await;
    assert_eq!(h.engine.state(), CallState::Ended);
    assert!(!h.capture.is_active());
    assert_eq!(h.engine.current_playback(), None);
    assert!(h.sink.closed.load(Ordering::SeqCst));
    assert_eq!(h.navigator.visits.lock().unwrap().as_slice(), &[CharacterId(42)]);

    h.engine.hang_up(t + 20).await;
    assert_eq!(h.navigator.visits.lock().unwrap().len(), 1);

    // Nothing revives an ended call.
    h.engine.on_inbound(voice_response(), t + 30).await;
    h.engine.set_muted(true, t + 40).await;
    assert_eq!(h.engine.state(), CallState::Ended);
}

struct FakeLookup;

#[async_trait::async_trait]
impl CharacterLookup for FakeLookup {
    async fn details(&self, id: CharacterId) -> anyhow::Result<CharacterDetails> {
        Ok(CharacterDetails {
            name: format!("Tutor {id}"),
            category_name: None,
            avatar_url: None,
        })
    }
}

#[tokio::test]
async fn driver_runs_until_hang_up() {
    let h = Harness::new();
    let (in_tx, in_rx) = mpsc::channel(8);
    let (status_tx, status_rx) = watch::channel(ChannelStatus::Connecting);
    let (_done_tx, done_rx) = mpsc::unbounded_channel::<PlaybackId>();
    let (cmd_tx, cmd_rx) = mpsc::channel(8);

    let capture = h.capture.clone();
    let sink = h.sink.clone();
    let navigator = h.navigator.clone();
    let io = CallIo {
        inbound: in_rx,
        status: status_rx,
        playback_done: done_rx,
        commands: cmd_rx,
    };
    let call = tokio::spawn(run_call(
        h.engine,
        io,
        Some(Arc::new(FakeLookup)),
        Duration::from_millis(5),
    ));

    status_tx.send(ChannelStatus::Open).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(capture.is_active());

    in_tx
        .send(InboundMessage::UserTranscript {
            content: "hi".into(),
        })
        .await
        .unwrap();
    cmd_tx.send(CallCommand::SetMuted(true)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!capture.is_active());

    cmd_tx.send(CallCommand::HangUp).await.unwrap();
    let session = tokio::time::timeout(Duration::from_secs(2), call)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(session.state, CallState::Ended);
    assert!(session.muted);
    assert_eq!(session.user_transcript.as_deref(), Some("hi"));
    assert_eq!(
        session.character.details.map(|d| d.name),
        Some("Tutor 42".to_string())
    );
    assert!(sink.closed.load(Ordering::SeqCst));
    assert_eq!(navigator.visits.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn driver_treats_dropped_commands_as_hang_up() {
    let h = Harness::new();
    let (_in_tx, in_rx) = mpsc::channel(8);
    let (_status_tx, status_rx) = watch::channel(ChannelStatus::Open);
    let (_done_tx, done_rx) = mpsc::unbounded_channel::<PlaybackId>();
    let (cmd_tx, cmd_rx) = mpsc::channel::<CallCommand>(8);
    let navigator = h.navigator.clone();

    let io = CallIo {
        inbound: in_rx,
        status: status_rx,
        playback_done: done_rx,
        commands: cmd_rx,
    };
    drop(cmd_tx);
    let session = tokio::time::timeout(
        Duration::from_secs(2),
        run_call(h.engine, io, None, Duration::from_millis(5)),
    )
    .await
    .unwrap();

    assert_eq!(session.state, CallState::Ended);
    assert_eq!(navigator.visits.lock().unwrap().len(), 1);
}
