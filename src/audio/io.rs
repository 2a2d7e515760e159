//! Audio I/O utilities for loading and saving WAV files.

use anyhow::{Context, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::path::Path;

use crate::Error;

/// Audio buffer holding a mono waveform.
///
/// Samples are 32-bit floats in the range \[-1.0, 1.0\]; 16-bit PCM is scaled
/// by 1/32768.
///
/// # Example
///
/// ```rust,ignore
/// let audio = AudioBuffer::load("sample/source.wav")?;
/// println!("Duration: {:.2}s", audio.duration());
/// ```
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    /// Mono audio samples in \[-1.0, 1.0\] range
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl AudioBuffer {
    /// Create a new audio buffer
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Duration in seconds
    pub fn duration(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate as f32
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Save to a 16-bit WAV file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        save_wav(path, &self.samples, self.sample_rate)
    }

    /// Load from WAV file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        load_wav(path)
    }
}

fn unsupported(path: &Path, reason: impl ToString) -> anyhow::Error {
    Error::UnsupportedAudio {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
    .into()
}

/// Load a WAV file into a mono AudioBuffer.
///
/// Multichannel input is averaged to mono. Fails with
/// [`Error::AudioNotFound`] for a missing path and [`Error::UnsupportedAudio`]
/// for anything hound cannot decode.
pub fn load_wav<P: AsRef<Path>>(path: P) -> Result<AudioBuffer> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(Error::AudioNotFound(path.to_path_buf()).into());
    }

    let reader = WavReader::open(path).map_err(|e| unsupported(path, e))?;

    let spec = reader.spec();
    let sample_rate = spec.sample_rate;
    let channels = spec.channels as usize;
    if channels == 0 || sample_rate == 0 {
        return Err(unsupported(path, "header declares zero channels or sample rate"));
    }

    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => {
            let samples = reader
                .into_samples::<f32>()
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| unsupported(path, e))?;
            if let Some(index) = samples.iter().position(|s| !s.is_finite()) {
                return Err(unsupported(path, format!("non-finite sample at index {index}")));
            }
            samples
        }
        SampleFormat::Int => {
            let bits = spec.bits_per_sample;
            if bits == 0 || bits > 32 {
                return Err(unsupported(path, format!("{bits}-bit integer PCM")));
            }
            let max_val = (1u64 << (bits - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| unsupported(path, e))?
        }
    };

    // Convert to mono by averaging channels
    let mono_samples = if channels > 1 {
        samples
            .chunks(channels)
            .map(|chunk| chunk.iter().sum::<f32>() / channels as f32)
            .collect()
    } else {
        samples
    };

    tracing::debug!(
        "Loaded {} ({} Hz, {} ch, {} frames)",
        path.display(),
        sample_rate,
        channels,
        mono_samples.len()
    );

    Ok(AudioBuffer::new(mono_samples, sample_rate))
}

/// Save mono samples to a 16-bit WAV file
pub fn save_wav<P: AsRef<Path>>(path: P, samples: &[f32], sample_rate: u32) -> Result<()> {
    let path = path.as_ref();
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path, spec)
        .with_context(|| format!("Failed to create WAV file: {}", path.display()))?;

    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        let scaled = (clamped * 32767.0) as i16;
        writer.write_sample(scaled)?;
    }

    writer.finalize()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_audio_buffer_duration() {
        let buffer = AudioBuffer::new(vec![0.0; 16000], 16000);
        assert!((buffer.duration() - 1.0).abs() < 1e-6);

        let buffer2 = AudioBuffer::new(vec![0.0; 48000], 24000);
        assert!((buffer2.duration() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_audio_buffer_len_and_empty() {
        let buffer = AudioBuffer::new(vec![0.0; 100], 16000);
        assert_eq!(buffer.len(), 100);
        assert!(!buffer.is_empty());
        assert!(AudioBuffer::new(vec![], 16000).is_empty());
    }

    #[test]
    fn test_save_and_load_wav() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.wav");

        let original = AudioBuffer::new(vec![0.1, 0.2, -0.3, 0.4, -0.5], 16000);
        original.save(&path).unwrap();

        let loaded = AudioBuffer::load(&path).unwrap();
        assert_eq!(loaded.sample_rate, 16000);
        assert_eq!(loaded.samples.len(), 5);
        for (a, b) in original.samples.iter().zip(loaded.samples.iter()) {
            assert!((a - b).abs() < 1e-4, "sample mismatch: {a} vs {b}");
        }
    }

    #[test]
    fn test_load_stereo_downmix() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let spec = WavSpec {
            channels: 2,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        for _ in 0..10 {
            writer.write_sample(16384i16).unwrap();
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();

        let loaded = load_wav(&path).unwrap();
        assert_eq!(loaded.len(), 10);
        assert!(loaded.samples.iter().all(|&s| (s - 0.25).abs() < 1e-4));
    }

    #[test]
    fn test_load_float_wav() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("float.wav");
        let spec = WavSpec {
            channels: 1,
            sample_rate: 22050,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        writer.write_sample(0.75f32).unwrap();
        writer.write_sample(-0.5f32).unwrap();
        writer.finalize().unwrap();

        let loaded = load_wav(&path).unwrap();
        assert_eq!(loaded.sample_rate, 22050);
        assert_eq!(loaded.samples, vec![0.75, -0.5]);
    }

    #[test]
    fn test_load_float_wav_rejects_non_finite() {
        let dir = tempdir().unwrap();
        for (name, bad) in [("nan.wav", f32::NAN), ("inf.wav", f32::INFINITY)] {
            let path = dir.path().join(name);
            let spec = WavSpec {
                channels: 1,
                sample_rate: 16000,
                bits_per_sample: 32,
                sample_format: SampleFormat::Float,
            };
            let mut writer = WavWriter::create(&path, spec).unwrap();
            writer.write_sample(0.25f32).unwrap();
            writer.write_sample(bad).unwrap();
            writer.write_sample(-0.25f32).unwrap();
            writer.finalize().unwrap();

            let err = load_wav(&path).unwrap_err();
            match err.downcast_ref::<Error>() {
                Some(Error::UnsupportedAudio { reason, .. }) => {
                    assert!(reason.contains("index 1"), "{name}: {reason}")
                }
                other => panic!("{name}: expected UnsupportedAudio, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_load_nonexistent_file() {
        let err = load_wav("/nonexistent/path/to/file.wav").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::AudioNotFound(_))
        ));
    }

    #[test]
    fn test_load_non_audio_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.wav");
        std::fs::write(&path, b"definitely not a riff header").unwrap();

        let err = load_wav(&path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::UnsupportedAudio { .. })
        ));
    }
}
