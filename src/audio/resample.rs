//! Audio resampling using rubato
//!
//! The attribute model only sees 16 kHz audio; inputs at any other rate are
//! converted here before feature extraction.

use anyhow::{Context, Result};
use rubato::{
    FastFixedIn, PolynomialDegree, Resampler as RubatoResampler, SincFixedIn,
    SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use super::AudioBuffer;

const CHUNK_SIZE: usize = 1024;

/// Resampling quality preset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResampleQuality {
    /// Cubic polynomial interpolation
    Fast,
    /// Balanced speed and quality
    #[default]
    Normal,
    /// High quality, slower
    High,
}

/// Audio resampler
pub struct Resampler {
    quality: ResampleQuality,
}

impl Resampler {
    pub fn new(quality: ResampleQuality) -> Self {
        Self { quality }
    }

    /// Resample audio to a target sample rate.
    ///
    /// The output is delay-compensated and trimmed to
    /// `round(len * target / source)` samples.
    pub fn resample(&self, audio: &AudioBuffer, target_rate: u32) -> Result<AudioBuffer> {
        if audio.sample_rate == target_rate {
            return Ok(audio.clone());
        }
        if audio.is_empty() {
            return Ok(AudioBuffer::new(Vec::new(), target_rate));
        }

        let ratio = target_rate as f64 / audio.sample_rate as f64;
        tracing::debug!(
            "Resampling {} Hz -> {} Hz ({:?})",
            audio.sample_rate,
            target_rate,
            self.quality
        );

        let output = if matches!(self.quality, ResampleQuality::Fast) {
            let mut resampler = FastFixedIn::<f32>::new(
                ratio,
                1.0,
                PolynomialDegree::Cubic,
                CHUNK_SIZE,
                1, // mono
            )
            .context("Failed to create fast resampler")?;
            Self::process_chunks(&mut resampler, &audio.samples, ratio)?
        } else {
            let high = matches!(self.quality, ResampleQuality::High);
            let params = SincInterpolationParameters {
                sinc_len: if high { 256 } else { 128 },
                f_cutoff: 0.95,
                interpolation: SincInterpolationType::Linear,
                oversampling_factor: if high { 256 } else { 128 },
                window: WindowFunction::BlackmanHarris2,
            };
            let mut resampler = SincFixedIn::<f32>::new(
                ratio, 1.0, params, CHUNK_SIZE, 1, // mono
            )
            .context("Failed to create sinc resampler")?;
            Self::process_chunks(&mut resampler, &audio.samples, ratio)?
        };

        Ok(AudioBuffer::new(output, target_rate))
    }

    /// Feed fixed-size chunks through the resampler, zero-padding the tail,
    /// then drop the filter delay and trim to the expected length.
    fn process_chunks<R: RubatoResampler<f32>>(
        resampler: &mut R,
        samples: &[f32],
        ratio: f64,
    ) -> Result<Vec<f32>> {
        let expected = (samples.len() as f64 * ratio).round() as usize;
        let delay = resampler.output_delay();

        let mut output = Vec::with_capacity(expected + delay + CHUNK_SIZE);
        let mut pos = 0;

        while output.len() < expected + delay {
            let mut chunk = vec![0.0f32; CHUNK_SIZE];
            if pos < samples.len() {
                let end = (pos + CHUNK_SIZE).min(samples.len());
                chunk[..end - pos].copy_from_slice(&samples[pos..end]);
            }
            pos += CHUNK_SIZE;

            let mut result = resampler
                .process(&[chunk], None)
                .context("Resampling failed")?;
            output.append(&mut result[0]);
        }

        Ok(output.into_iter().skip(delay).take(expected).collect())
    }
}

impl Default for Resampler {
    fn default() -> Self {
        Self::new(ResampleQuality::Normal)
    }
}

/// Convenience function to resample audio
pub fn resample(audio: &AudioBuffer, target_rate: u32) -> Result<AudioBuffer> {
    Resampler::default().resample(audio, target_rate)
}

/// Resample to the model's native 16 kHz
pub fn resample_to_16k(audio: &AudioBuffer) -> Result<AudioBuffer> {
    resample(audio, super::SAMPLE_RATE)
}
