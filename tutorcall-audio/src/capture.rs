use std::sync::{Arc, Mutex};

use tutorcall_core::{CallError, CaptureSettings, SpectrumFrame, Utterance};

use crate::analyser::SpectrumAnalyser;
use crate::encode::{WAV_MIME, duration_ms, encode_wav_pcm16, noise_gate, normalise_peak};
use crate::recorder::{AudioCaptureError, MicRecorder, RawCapture};
use crate::resample::{UTTERANCE_RATE_HZ, resample_mono};

struct ActiveCapture {
    recorder: MicRecorder,
    analyser: Arc<Mutex<SpectrumAnalyser>>,
}

/// Owns the microphone stream for the duration of one utterance.
///
/// `start` opens the device and begins buffering; `stop` releases the device and
/// hands back the encoded utterance. Between the two, `spectrum` exposes the live
/// analyser view used for voice-activity detection.
pub struct CaptureManager {
    settings: CaptureSettings,
    active: Option<ActiveCapture>,
    echo_warning_logged: bool,
}

impl CaptureManager {
    pub fn new(settings: CaptureSettings) -> Self {
        Self {
            settings,
            active: None,
            echo_warning_logged: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn start(&mut self) -> Result<(), CallError> {
        if self.active.is_some() {
            return Ok(());
        }
        if self.settings.echo_cancellation && !self.echo_warning_logged {
            log::info!("echo cancellation requested but not available on this host; continuing without it");
            self.echo_warning_logged = true;
        }

        let recorder = MicRecorder::open(self.settings.microphone_device.as_deref())
            .map_err(|e| CallError::DeviceUnavailable(e.to_string()))?;

        let analyser = Arc::new(Mutex::new(SpectrumAnalyser::new(recorder.sample_rate_hz())));
        let feed = analyser.clone();
        recorder.set_sample_tap(Arc::new(move |chunk: &[f32]| {
            if let Ok(mut a) = feed.lock() {
                a.push_samples(chunk);
            }
        }));
        recorder
            .begin()
            .map_err(|e| CallError::DeviceUnavailable(e.to_string()))?;

        log::info!("capture started at {} Hz", recorder.sample_rate_hz());
        self.active = Some(ActiveCapture { recorder, analyser });
        Ok(())
    }

    /// Safe to call when idle; returns `None` if nothing was captured.
    pub fn stop(&mut self) -> Result<Option<Utterance>, CallError> {
        let Some(active) = self.active.take() else {
            return Ok(None);
        };

        let raw = active.recorder.finish();
        active.recorder.close();
        let raw = raw.map_err(|e| CallError::Capture(e.to_string()))?;

        build_utterance(raw, &self.settings).map_err(|e| CallError::Capture(e.to_string()))
    }

    pub fn spectrum(&self) -> Option<SpectrumFrame> {
        let active = self.active.as_ref()?;
        let mut analyser = active.analyser.lock().ok()?;
        Some(analyser.frame())
    }
}

pub fn build_utterance(
    raw: RawCapture,
    settings: &CaptureSettings,
) -> Result<Option<Utterance>, AudioCaptureError> {
    if raw.samples.is_empty() {
        return Ok(None);
    }

    let mut pcm = resample_mono(&raw.samples, raw.sample_rate_hz, UTTERANCE_RATE_HZ)
        .map_err(AudioCaptureError::Resample)?;
    if settings.noise_suppression {
        noise_gate(&mut pcm);
    }
    if settings.auto_gain_control {
        normalise_peak(&mut pcm);
    }
    if pcm.is_empty() {
        return Ok(None);
    }

    let bytes = encode_wav_pcm16(&pcm, UTTERANCE_RATE_HZ)?;
    Ok(Some(Utterance {
        duration_ms: duration_ms(pcm.len(), UTTERANCE_RATE_HZ),
        bytes,
        mime_type: WAV_MIME.to_string(),
        sample_rate_hz: UTTERANCE_RATE_HZ,
    }))
}
