//! Log-mel spectrogram computation
//!
//! Implementation based on librosa's mel filterbank and a non-centred STFT
//! with manual reflect padding, matching the front-end the attribute model
//! was trained with.

use anyhow::Result;
use candle_core::{Device, Tensor};
use num_complex::Complex;
use rustfft::{num_complex::Complex as FftComplex, FftPlanner};
use std::f32::consts::PI;

use crate::Error;

/// Configuration for mel spectrogram computation
#[derive(Debug, Clone, PartialEq)]
pub struct MelConfig {
    /// Sample rate of input audio
    pub sample_rate: u32,
    /// FFT window size
    pub n_fft: usize,
    /// Hop length between frames
    pub hop_length: usize,
    /// Window length (defaults to n_fft)
    pub win_length: Option<usize>,
    /// Number of mel bands
    pub n_mels: usize,
    /// Minimum frequency for mel filterbank
    pub fmin: f32,
    /// Maximum frequency for mel filterbank (defaults to sample_rate / 2)
    pub fmax: Option<f32>,
}

impl Default for MelConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            n_fft: 1024,
            hop_length: 256,
            win_length: Some(1024),
            n_mels: 80,
            fmin: 0.0,
            fmax: Some(8000.0),
        }
    }
}

/// Mel-spectrogram extractor
pub struct MelSpectrogram {
    config: MelConfig,
    /// Precomputed mel filterbank, `[n_mels][n_fft / 2 + 1]`
    mel_basis: Vec<Vec<f32>>,
    /// Precomputed Hann window
    window: Vec<f32>,
}

impl MelSpectrogram {
    /// Create a new mel spectrogram extractor.
    ///
    /// Fails with [`Error::InvalidConfig`] unless `0 < hop_length <= n_fft`,
    /// `0 < win_length <= n_fft` and `0 <= fmin < fmax <= sample_rate / 2`.
    pub fn new(config: MelConfig) -> Result<Self> {
        let win_length = config.win_length.unwrap_or(config.n_fft);
        let nyquist = config.sample_rate as f32 / 2.0;
        let fmax = config.fmax.unwrap_or(nyquist);
        Self::validate(&config, win_length, fmax)?;

        let mel_basis = Self::create_mel_filterbank(
            config.sample_rate,
            config.n_fft,
            config.n_mels,
            config.fmin,
            fmax,
        );

        let window = Self::hann_window(win_length);

        Ok(Self {
            config,
            mel_basis,
            window,
        })
    }

    fn validate(config: &MelConfig, win_length: usize, fmax: f32) -> Result<()> {
        let invalid = |msg: String| -> Result<()> { Err(Error::InvalidConfig(msg).into()) };
        let n_fft = config.n_fft;
        if config.sample_rate == 0 || n_fft == 0 || config.n_mels == 0 {
            return invalid(format!(
                "mel sample_rate ({}), n_fft ({n_fft}) and n_mels ({}) must be positive",
                config.sample_rate, config.n_mels
            ));
        }
        if config.hop_length == 0 || config.hop_length > n_fft {
            return invalid(format!(
                "hop_length {} must be in 1..={n_fft}",
                config.hop_length
            ));
        }
        if win_length == 0 || win_length > n_fft {
            return invalid(format!("win_length {win_length} must be in 1..={n_fft}"));
        }
        let nyquist = config.sample_rate as f32 / 2.0;
        if !(config.fmin >= 0.0 && config.fmin < fmax && fmax <= nyquist) {
            return invalid(format!(
                "mel range {}..{fmax} Hz must be increasing and within 0..={nyquist} Hz",
                config.fmin
            ));
        }
        Ok(())
    }

    pub fn config(&self) -> &MelConfig {
        &self.config
    }

    /// Reflect padding applied to each side of the signal before framing.
    fn pad_length(&self) -> usize {
        (self.config.n_fft - self.config.hop_length) / 2
    }

    /// Smallest signal length that produces at least one frame.
    ///
    /// Reflect padding needs more samples than the pad width, and the padded
    /// signal must cover one FFT window.
    pub fn min_samples(&self) -> usize {
        let pad = self.pad_length();
        (pad + 1).max(self.config.n_fft.saturating_sub(2 * pad))
    }

    /// Number of frames produced for `num_samples` input samples.
    pub fn num_frames(&self, num_samples: usize) -> usize {
        if num_samples < self.min_samples() {
            return 0;
        }
        (num_samples + 2 * self.pad_length() - self.config.n_fft) / self.config.hop_length + 1
    }

    fn check_length(&self, samples: &[f32]) -> Result<()> {
        let min_samples = self.min_samples();
        if samples.len() < min_samples {
            return Err(Error::AudioTooShort {
                samples: samples.len(),
                sample_rate: self.config.sample_rate,
                min_samples: min_samples - 1,
            }
            .into());
        }
        Ok(())
    }

    /// Mel-filtered magnitude spectrogram, `[frames][n_mels]`.
    ///
    /// Magnitude is `sqrt(re² + im² + 1e-6)`.
    pub fn compute(&self, samples: &[f32]) -> Result<Vec<Vec<f32>>> {
        self.check_length(samples)?;
        let stft = self.stft(samples);

        let mag_spec: Vec<Vec<f32>> = stft
            .iter()
            .map(|frame| {
                frame
                    .iter()
                    .map(|c| (c.re * c.re + c.im * c.im + 1e-6).sqrt())
                    .collect()
            })
            .collect();

        Ok(self.apply_mel_filterbank(&mag_spec))
    }

    /// Log-compressed mel spectrogram, `ln(max(mel, 1e-5))`, `[frames][n_mels]`.
    pub fn compute_log(&self, samples: &[f32]) -> Result<Vec<Vec<f32>>> {
        let mel = self.compute(samples)?;
        Ok(mel
            .into_iter()
            .map(|frame| frame.into_iter().map(|v| v.max(1e-5).ln()).collect())
            .collect())
    }

    /// Log-mel spectrogram as a tensor of shape `[n_mels, n_frames]`.
    pub fn compute_tensor(&self, samples: &[f32], device: &Device) -> Result<Tensor> {
        let log_mel = self.compute_log(samples)?;
        let n_frames = log_mel.len();
        let n_mels = self.config.n_mels;

        let flat: Vec<f32> = log_mel.into_iter().flatten().collect();
        let tensor = Tensor::from_vec(flat, (n_frames, n_mels), device)?
            .transpose(0, 1)?
            .contiguous()?; // [n_mels, n_frames]

        Ok(tensor)
    }

    /// Short-time Fourier transform. Caller guarantees the length check.
    fn stft(&self, samples: &[f32]) -> Vec<Vec<Complex<f32>>> {
        let n_fft = self.config.n_fft;
        let hop_length = self.config.hop_length;
        let win_length = self.window.len();
        // torch.stft centres a shorter window inside the FFT frame
        let win_offset = (n_fft - win_length.min(n_fft)) / 2;

        let pad_length = self.pad_length();
        let mut padded = Vec::with_capacity(pad_length + samples.len() + pad_length);

        // Left reflect padding: mirror from position 1 outward
        for i in (1..=pad_length).rev() {
            padded.push(samples[i]);
        }
        padded.extend_from_slice(samples);
        // Right reflect padding: mirror from position len-2 inward
        for i in 0..pad_length {
            padded.push(samples[samples.len() - 2 - i]);
        }

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(n_fft);

        let n_frames = (padded.len() - n_fft) / hop_length + 1;
        let mut result = Vec::with_capacity(n_frames);

        for i in 0..n_frames {
            let start = i * hop_length;

            let mut buffer: Vec<FftComplex<f32>> = (0..n_fft)
                .map(|j| {
                    let sample = if j >= win_offset && j - win_offset < win_length {
                        padded[start + j] * self.window[j - win_offset]
                    } else {
                        0.0
                    };
                    FftComplex::new(sample, 0.0)
                })
                .collect();

            fft.process(&mut buffer);

            // Positive frequencies only (n_fft/2 + 1)
            let frame: Vec<Complex<f32>> = buffer
                .iter()
                .take(n_fft / 2 + 1)
                .map(|c| Complex::new(c.re, c.im))
                .collect();

            result.push(frame);
        }

        result
    }

    fn apply_mel_filterbank(&self, spec: &[Vec<f32>]) -> Vec<Vec<f32>> {
        spec.iter()
            .map(|frame| {
                self.mel_basis
                    .iter()
                    .map(|filter| filter.iter().zip(frame.iter()).map(|(f, p)| f * p).sum())
                    .collect()
            })
            .collect()
    }

    /// Convert frequency in Hz to mel scale (Slaney).
    ///
    /// This is the librosa default (`htk=False`): linear below 1000 Hz,
    /// logarithmic above.
    fn hz_to_mel(f: f32) -> f32 {
        const F_SP: f32 = 200.0 / 3.0;
        const MIN_LOG_HZ: f32 = 1000.0;
        const MIN_LOG_MEL: f32 = MIN_LOG_HZ / F_SP;
        const LOGSTEP: f32 = 0.068_751_74; // ln(6.4) / 27

        if f < MIN_LOG_HZ {
            f / F_SP
        } else {
            MIN_LOG_MEL + (f / MIN_LOG_HZ).ln() / LOGSTEP
        }
    }

    fn mel_to_hz(m: f32) -> f32 {
        const F_SP: f32 = 200.0 / 3.0;
        const MIN_LOG_HZ: f32 = 1000.0;
        const MIN_LOG_MEL: f32 = MIN_LOG_HZ / F_SP;
        const LOGSTEP: f32 = 0.068_751_74;

        if m < MIN_LOG_MEL {
            m * F_SP
        } else {
            MIN_LOG_HZ * ((m - MIN_LOG_MEL) * LOGSTEP).exp()
        }
    }

    /// Create mel filterbank matrix (matches `librosa.filters.mel` defaults,
    /// Slaney scale with Slaney area normalisation).
    fn create_mel_filterbank(
        sample_rate: u32,
        n_fft: usize,
        n_mels: usize,
        fmin: f32,
        fmax: f32,
    ) -> Vec<Vec<f32>> {
        let n_freqs = n_fft / 2 + 1;

        let mel_min = Self::hz_to_mel(fmin);
        let mel_max = Self::hz_to_mel(fmax);
        let hz_points: Vec<f32> = (0..=n_mels + 1)
            .map(|i| mel_min + (mel_max - mel_min) * i as f32 / (n_mels + 1) as f32)
            .map(Self::mel_to_hz)
            .collect();

        let fft_freqs: Vec<f32> = (0..n_freqs)
            .map(|i| i as f32 * sample_rate as f32 / n_fft as f32)
            .collect();

        let mut filterbank = vec![vec![0.0f32; n_freqs]; n_mels];

        for (i, filter) in filterbank.iter_mut().enumerate() {
            let f_lower = hz_points[i];
            let f_center = hz_points[i + 1];
            let f_upper = hz_points[i + 2];

            for (j, &freq) in fft_freqs.iter().enumerate() {
                let lower = (freq - f_lower) / (f_center - f_lower);
                let upper = (f_upper - freq) / (f_upper - f_center);
                filter[j] = lower.min(upper).max(0.0);
            }

            let band_width = f_upper - f_lower;
            if band_width > 0.0 {
                let enorm = 2.0 / band_width;
                for val in filter.iter_mut() {
                    *val *= enorm;
                }
            }
        }

        filterbank
    }

    /// Periodic Hann window (`torch.hann_window` default)
    fn hann_window(length: usize) -> Vec<f32> {
        (0..length)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / length as f32).cos()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| (2.0 * PI * freq * i as f32 / 16000.0).sin())
            .collect()
    }

    #[test]
    fn test_mel_config_default() {
        let config = MelConfig::default();
        assert_eq!(config.sample_rate, 16000);
        assert_eq!(config.n_fft, 1024);
        assert_eq!(config.hop_length, 256);
        assert_eq!(config.n_mels, 80);
        assert_eq!(config.fmax, Some(8000.0));
    }

    #[test]
    fn test_hann_window() {
        let window = MelSpectrogram::hann_window(4);
        assert_eq!(window.len(), 4);
        assert!((window[0] - 0.0).abs() < 1e-6);
        assert!((window[2] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_mel_filterbank_shape() {
        let mel = MelSpectrogram::new(MelConfig::default()).unwrap();
        assert_eq!(mel.mel_basis.len(), 80);
        assert_eq!(mel.mel_basis[0].len(), 513);
        for filter in &mel.mel_basis {
            assert!(filter.iter().all(|&v| v >= 0.0));
            assert!(filter.iter().any(|&v| v > 0.0));
        }
    }

    #[test]
    fn test_filterbank_matches_librosa_slaney() {
        // librosa.filters.mel(sr=16000, n_fft=1024, n_mels=80, fmin=0, fmax=8000)
        let mel = MelSpectrogram::new(MelConfig::default()).unwrap();
        let expected = [
            (0, 1, 0.011_267_280f32),
            (0, 2, 0.022_534_561),
            (0, 3, 0.019_904_991),
            (0, 4, 0.008_637_710),
            (1, 5, 0.024_223_846),
            (10, 26, 0.024_415_131),
            (40, 110, 0.014_444_176),
            (79, 478, 0.000_701_915_18),
        ];
        for (band, bin, value) in expected {
            let actual = mel.mel_basis[band][bin];
            assert!(
                ((actual - value) / value).abs() < 1e-3,
                "band {band} bin {bin}: {actual} vs {value}"
            );
        }

        let support: Vec<usize> = (0..513).filter(|&j| mel.mel_basis[0][j] > 0.0).collect();
        assert_eq!(support, vec![1, 2, 3, 4]);

        // Slaney normalisation gives every triangle roughly unit area in Hz
        let bin_hz = 16000.0 / 1024.0;
        for (band, area) in [(0, 0.974_13f32), (1, 1.000_529), (10, 1.003_517), (40, 0.999_346), (79, 0.999_603)] {
            let actual: f32 = mel.mel_basis[band].iter().sum::<f32>() * bin_hz;
            assert!((actual - area).abs() < 1e-3, "band {band} area {actual} vs {area}");
        }
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let cases = [
            MelConfig { hop_length: 2048, ..Default::default() },
            MelConfig { hop_length: 0, ..Default::default() },
            MelConfig { win_length: Some(2048), ..Default::default() },
            MelConfig { n_mels: 0, ..Default::default() },
            MelConfig { fmax: Some(9000.0), ..Default::default() },
            MelConfig { fmin: 8000.0, ..Default::default() },
        ];
        for config in cases {
            let err = MelSpectrogram::new(config.clone()).err().unwrap();
            assert!(
                matches!(err.downcast_ref::<Error>(), Some(Error::InvalidConfig(_))),
                "{config:?}: {err:#}"
            );
        }
        // hop_length == n_fft is the largest hop accepted
        let mel = MelSpectrogram::new(MelConfig { hop_length: 1024, ..Default::default() }).unwrap();
        assert_eq!(mel.pad_length(), 0);
    }

    #[test]
    fn test_mel_scale_roundtrip() {
        for hz in [0.0f32, 440.0, 1000.0, 4000.0, 8000.0] {
            let back = MelSpectrogram::mel_to_hz(MelSpectrogram::hz_to_mel(hz));
            assert!((back - hz).abs() < 0.5, "{hz} -> {back}");
        }
    }

    #[test]
    fn test_frame_count() {
        let mel = MelSpectrogram::new(MelConfig::default()).unwrap();
        assert_eq!(mel.min_samples(), 385);
        assert_eq!(mel.num_frames(384), 0);
        // (16000 + 768 - 1024) / 256 + 1
        assert_eq!(mel.num_frames(16000), 62);
        let frames = mel.compute(&vec![0.0; 16000]).unwrap();
        assert_eq!(frames.len(), 62);
        assert_eq!(frames[0].len(), 80);
    }

    #[test]
    fn test_too_short_is_an_error() {
        let mel = MelSpectrogram::new(MelConfig::default()).unwrap();
        let err = mel.compute(&[0.0; 100]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::AudioTooShort { samples: 100, .. })
        ));
        assert!(mel.compute(&[]).is_err());
    }

    #[test]
    fn test_silence_hits_log_floor() {
        let mel = MelSpectrogram::new(MelConfig::default()).unwrap();
        let log_mel = mel.compute_log(&vec![0.0; 4000]).unwrap();
        for frame in &log_mel {
            for &v in frame {
                assert!(v >= (1e-5f32).ln() - 1e-4);
                assert!(v < 0.0);
            }
        }
    }

    #[test]
    fn test_sine_energy_lands_in_low_bands() {
        let mel = MelSpectrogram::new(MelConfig::default()).unwrap();
        let frames = mel.compute(&sine(300.0, 16000)).unwrap();
        let mid = &frames[frames.len() / 2];
        let (peak_band, _) = mid
            .iter()
            .enumerate()
            .fold((0, f32::MIN), |acc, (i, &v)| if v > acc.1 { (i, v) } else { acc });
        assert!(peak_band < 20, "300 Hz peaked in band {peak_band}");
    }

    #[test]
    fn test_compute_tensor_shape() {
        let mel = MelSpectrogram::new(MelConfig::default()).unwrap();
        let tensor = mel
            .compute_tensor(&sine(440.0, 8000), &Device::Cpu)
            .unwrap();
        assert_eq!(tensor.dims(), &[80, mel.num_frames(8000)]);
    }

    #[test]
    fn test_deterministic() {
        let mel = MelSpectrogram::new(MelConfig::default()).unwrap();
        let samples = sine(220.0, 6000);
        assert_eq!(
            mel.compute_log(&samples).unwrap(),
            mel.compute_log(&samples).unwrap()
        );
    }
}
