//! Audio front-end for the attribute model
//!
//! This module provides:
//! - WAV file I/O with mono downmix
//! - Resampling to the model rate
//! - Log-mel spectrogram computation

mod io;
mod mel;
pub mod resample;

pub use io::{load_wav, save_wav, AudioBuffer};
pub use mel::{MelConfig, MelSpectrogram};
pub use resample::{resample, resample_to_16k, ResampleQuality, Resampler};

/// Sample rate the model was trained on
pub const SAMPLE_RATE: u32 = 16000;

/// Number of mel bands fed to the ECAPA-TDNN
pub const N_MELS: usize = 80;
