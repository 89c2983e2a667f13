use anyhow::Context;
use rubato::Resampler;

/// Rate the backend expects for uploaded utterances.
pub const UTTERANCE_RATE_HZ: u32 = 16_000;

/// Resamples mono f32 PCM in `[-1, 1]` to `to_hz` in a single pass.
pub fn resample_mono(samples: &[f32], from_hz: u32, to_hz: u32) -> anyhow::Result<Vec<f32>> {
    if from_hz == to_hz || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    anyhow::ensure!(from_hz > 0 && to_hz > 0, "sample rate must be non-zero");

    let params = rubato::SincInterpolationParameters {
        sinc_len: 128,
        f_cutoff: 0.95,
        interpolation: rubato::SincInterpolationType::Linear,
        oversampling_factor: 128,
        window: rubato::WindowFunction::BlackmanHarris2,
    };

    let mut resampler = rubato::SincFixedIn::<f32>::new(
        to_hz as f64 / from_hz as f64,
        1.0,
        params,
        samples.len(),
        1,
    )
    .context("create resampler")?;

    let out = resampler
        .process(&[samples], None)
        .context("resample")?;
    Ok(out.into_iter().next().unwrap_or_default())
}
