use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::config::VadConfig;
use crate::types::{CallSession, CallState, SpectrumFrame};

const VOICE_BAND_LOW_HZ: f32 = 300.0;
const VOICE_BAND_HIGH_HZ: f32 = 3400.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Speech,
    Silence,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoiceActivityEvent {
    pub timestamp_ms: u64,
    pub average_energy: f32,
    pub voice_band_energy: f32,
    pub spectral_flatness: f32,
    pub classification: Classification,
}

impl VoiceActivityEvent {
    pub fn is_voice(&self) -> bool {
        self.classification == Classification::Speech
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadSignal {
    SpeechStart,
    SpeechEnd,
}

/// Result of one detector tick. Both fields are empty when the tick was gated.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VadOutcome {
    pub event: Option<VoiceActivityEvent>,
    pub signal: Option<VadSignal>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameFeatures {
    pub average_energy: f32,
    pub voice_band_energy: f32,
    pub spectral_flatness: f32,
}

/// Extracts energy and tonality features from one byte-scaled spectrum.
pub fn analyze_frame(frame: &SpectrumFrame) -> FrameFeatures {
    let bins = &frame.bins;
    if bins.is_empty() {
        return FrameFeatures {
            average_energy: 0.0,
            voice_band_energy: 0.0,
            spectral_flatness: 1.0,
        };
    }

    let n = bins.len() as f32;
    let average_energy = bins.iter().map(|&b| b as f32).sum::<f32>() / n;

    let bin_hz = frame.bin_width_hz();
    let voice_band_energy = if bin_hz > 0.0 {
        let lo = (VOICE_BAND_LOW_HZ / bin_hz).floor() as usize;
        let hi = ((VOICE_BAND_HIGH_HZ / bin_hz).floor() as usize).min(bins.len() - 1);
        if lo <= hi {
            let sum: f32 = bins[lo..=hi].iter().map(|&b| b as f32).sum();
            sum / (hi - lo + 1) as f32
        } else {
            0.0
        }
    } else {
        0.0
    };

    // Geometric over arithmetic mean, both offset by one so silent bins stay finite.
    let log_mean = bins.iter().map(|&b| (b as f32 + 1.0).ln()).sum::<f32>() / n;
    let spectral_flatness = log_mean.exp() / (average_energy + 1.0);

    FrameFeatures {
        average_energy,
        voice_band_energy,
        spectral_flatness,
    }
}

pub fn classify(features: &FrameFeatures, cfg: &VadConfig) -> Classification {
    let voice = features.voice_band_energy > cfg.voice_threshold
        && features.average_energy > cfg.voice_threshold * 0.9
        && features.spectral_flatness < cfg.flatness_threshold;
    if voice {
        Classification::Speech
    } else {
        Classification::Silence
    }
}

/// Spectral voice-activity detector with window-based hysteresis.
///
/// Fires `SpeechStart` once enough voice frames accumulate inside the rolling
/// window, and `SpeechEnd` once no voice frame has been seen for the configured
/// silence duration.
#[derive(Debug, Clone)]
pub struct VoiceActivityDetector {
    cfg: VadConfig,
    window: VecDeque<VoiceActivityEvent>,
    speaking: bool,
    last_speech_ms: Option<u64>,
}

impl VoiceActivityDetector {
    pub fn new(cfg: VadConfig) -> Self {
        Self {
            cfg,
            window: VecDeque::new(),
            speaking: false,
            last_speech_ms: None,
        }
    }

    pub fn config(&self) -> &VadConfig {
        &self.cfg
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    pub fn last_speech_ms(&self) -> Option<u64> {
        self.last_speech_ms
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.speaking = false;
        self.last_speech_ms = None;
    }

    pub fn tick(&mut self, session: &CallSession, frame: &SpectrumFrame, now_ms: u64) -> VadOutcome {
        if session.muted || !matches!(session.state, CallState::Listening | CallState::Speaking) {
            return VadOutcome::default();
        }

        let features = analyze_frame(frame);
        let event = VoiceActivityEvent {
            timestamp_ms: now_ms,
            average_energy: features.average_energy,
            voice_band_energy: features.voice_band_energy,
            spectral_flatness: features.spectral_flatness,
            classification: classify(&features, &self.cfg),
        };

        self.window.push_back(event);
        // Events exactly one window old have expired.
        let window_ms = self.cfg.detection_window_ms;
        while self
            .window
            .front()
            .is_some_and(|e| now_ms.saturating_sub(e.timestamp_ms) >= window_ms)
        {
            self.window.pop_front();
        }

        let detections = self.window.iter().filter(|e| e.is_voice()).count();
        let sustained = detections >= self.cfg.min_detections;

        let mut signal = None;
        if self.speaking {
            let last = self.last_speech_ms.unwrap_or(now_ms);
            if event.is_voice() {
                self.last_speech_ms = Some(now_ms);
            } else if now_ms.saturating_sub(last) >= self.cfg.silence_duration_ms {
                self.speaking = false;
                self.window.clear();
                signal = Some(VadSignal::SpeechEnd);
            }
        } else if sustained {
            self.speaking = true;
            self.last_speech_ms = Some(now_ms);
            signal = Some(VadSignal::SpeechStart);
        }

        VadOutcome {
            event: Some(event),
            signal,
        }
    }
}
