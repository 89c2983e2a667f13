use std::collections::VecDeque;
use std::sync::Arc;

use rustfft::{FftPlanner, num_complex::Complex};
use tutorcall_core::SpectrumFrame;

pub const FFT_SIZE: usize = 256;
const SMOOTHING: f32 = 0.8;
const MIN_DB: f32 = -100.0;
const MAX_DB: f32 = -30.0;

/// Rolling magnitude spectrum of the most recent input samples, reported as
/// byte-scaled bins with the same scaling as a Web Audio analyser node.
pub struct SpectrumAnalyser {
    sample_rate_hz: u32,
    fft: Arc<dyn rustfft::Fft<f32>>,
    window: Vec<f32>,
    recent: VecDeque<f32>,
    smoothed: Vec<f32>,
}

impl SpectrumAnalyser {
    pub fn new(sample_rate_hz: u32) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);

        let n = FFT_SIZE as f32;
        let window = (0..FFT_SIZE)
            .map(|i| {
                let x = 2.0 * std::f32::consts::PI * i as f32 / n;
                0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos()
            })
            .collect();

        Self {
            sample_rate_hz,
            fft,
            window,
            recent: VecDeque::from(vec![0.0; FFT_SIZE]),
            smoothed: vec![0.0; FFT_SIZE / 2],
        }
    }

    pub fn push_samples(&mut self, samples: &[f32]) {
        let skip = samples.len().saturating_sub(FFT_SIZE);
        for &s in &samples[skip..] {
            if self.recent.len() == FFT_SIZE {
                self.recent.pop_front();
            }
            self.recent.push_back(s);
        }
    }

    pub fn frame(&mut self) -> SpectrumFrame {
        let mut buf: Vec<Complex<f32>> = self
            .recent
            .iter()
            .zip(&self.window)
            .map(|(&s, &w)| Complex::new(s * w, 0.0))
            .collect();
        self.fft.process(&mut buf);

        let scale = 1.0 / FFT_SIZE as f32;
        let range = MAX_DB - MIN_DB;
        let bins = self
            .smoothed
            .iter_mut()
            .zip(&buf)
            .map(|(prev, c)| {
                let mag = c.norm() * scale;
                *prev = SMOOTHING * *prev + (1.0 - SMOOTHING) * mag;
                let db = if *prev > 0.0 { 20.0 * prev.log10() } else { f32::NEG_INFINITY };
                (255.0 / range * (db - MIN_DB)).clamp(0.0, 255.0) as u8
            })
            .collect();

        SpectrumFrame {
            bins,
            sample_rate_hz: self.sample_rate_hz,
            fft_size: FFT_SIZE,
        }
    }
}
