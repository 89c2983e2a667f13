use std::io::Cursor;

use hound::{SampleFormat, WavSpec, WavWriter};

use crate::recorder::AudioCaptureError;

pub const WAV_MIME: &str = "audio/wav";

// Samples below this magnitude are treated as background hiss.
const NOISE_GATE_LEVEL: f32 = 0.01;
const NORMALISE_PEAK: f32 = 0.9;
// Never amplify quiet takes by more than this.
const MAX_GAIN: f32 = 8.0;

/// Zeroes low-level samples in place.
pub fn noise_gate(samples: &mut [f32]) {
    for s in samples.iter_mut() {
        if s.abs() < NOISE_GATE_LEVEL {
            *s = 0.0;
        }
    }
}

/// Scales so the loudest sample sits at a fixed peak. Silence is left untouched.
pub fn normalise_peak(samples: &mut [f32]) {
    let peak = samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    if peak <= f32::EPSILON {
        return;
    }
    let gain = (NORMALISE_PEAK / peak).min(MAX_GAIN);
    for s in samples.iter_mut() {
        *s = (*s * gain).clamp(-1.0, 1.0);
    }
}

pub fn encode_wav_pcm16(samples: &[f32], sample_rate_hz: u32) -> Result<Vec<u8>, AudioCaptureError> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: sample_rate_hz,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = WavWriter::new(&mut cursor, spec)?;
        for &s in samples {
            let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer.write_sample(v)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

pub fn duration_ms(sample_count: usize, sample_rate_hz: u32) -> u64 {
    if sample_rate_hz == 0 {
        return 0;
    }
    sample_count as u64 * 1000 / sample_rate_hz as u64
}
