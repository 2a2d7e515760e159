//! # VOVE
//!
//! Pure Rust inference for VOVE, an explainable voice-attribute model that
//! maps an utterance to 44 interpretable scores ("bright", "masculine",
//! "raspy", ...).
//!
//! ## Features
//!
//! - **CPU inference** with optional MKL/Accelerate for faster BLAS operations
//! - **CUDA** support for NVIDIA GPU acceleration
//! - **Metal** support for Apple Silicon
//! - **Native checkpoints**: reads the released PyTorch `.pth` file directly,
//!   or a converted `.safetensors`
//! - **Auto-detection** of the network dimensions from checkpoint tensor shapes
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use vove::{auto_device, Vove};
//!
//! let model = Vove::from_checkpoint("ckpt/vove.pth", None, auto_device()?)?;
//! let scores = model.predict_file("sample/source.wav")?;
//!
//! for (attribute, score) in scores.ranked().into_iter().take(5) {
//!     println!("{attribute:>16} {score:.4}");
//! }
//! ```
//!
//! ## Architecture
//!
//! 1. **Front-end**: WAV decode, mono downmix, resample to 16 kHz, 80-band
//!    log-mel spectrogram (n_fft 1024, hop 256, 0-8000 Hz).
//!
//! 2. **ECAPA-TDNN**: SE-Res2Net blocks, multi-layer feature aggregation and
//!    attentive statistics pooling produce a 192-dim unit-norm embedding.
//!
//! 3. **Attribute head**: Linear + BatchNorm to 44 logits, then sigmoid.
//!
//! ## Errors
//!
//! Every fallible call returns [`anyhow::Result`]. Failures a caller may want
//! to branch on carry a [`vove::Error`](Error) that can be recovered with
//! `err.downcast_ref::<vove::Error>()`.

pub mod attributes;
pub mod audio;
pub mod checkpoint;
pub mod error;
pub mod models;
pub mod profiling;

use anyhow::Result;
use candle_core::{Device, Tensor};
use std::path::Path;
use std::time::Instant;

pub use attributes::{AttributeScore, AttributeVector, ATTRIBUTES, NUM_ATTRIBUTES};
pub use audio::AudioBuffer;
pub use error::Error;
pub use models::{VoveConfig, VoveModel};

/// Loaded attribute predictor.
///
/// Holds immutable weights; reuse one instance for several predictions.
pub struct Vove {
    model: VoveModel,
}

impl Vove {
    /// Load a checkpoint onto `device`.
    ///
    /// When `config` is `None`, network dimensions are detected from the
    /// checkpoint tensor shapes.
    ///
    /// # Errors
    ///
    /// [`Error::CheckpointNotFound`], [`Error::CorruptCheckpoint`],
    /// [`Error::ArchitectureMismatch`] or [`Error::InvalidConfig`].
    pub fn from_checkpoint<P: AsRef<Path>>(
        path: P,
        config: Option<VoveConfig>,
        device: Device,
    ) -> Result<Self> {
        let path = path.as_ref();
        let start = Instant::now();
        tracing::info!(
            "Loading VOVE from {} on {}",
            path.display(),
            device_info(&device)
        );

        let weights = checkpoint::load_checkpoint(path, &device)?;
        let config = match config {
            Some(config) => config,
            None => {
                let detected = VoveConfig::detect_from_weights(&weights)?;
                tracing::debug!("Detected architecture from weights: {}", detected.label());
                detected
            }
        };
        let model = VoveModel::from_weights(&weights, config, &device)?;

        tracing::info!("Model ready in {:.2?}", start.elapsed());
        Ok(Self { model })
    }

    /// Predict attribute scores for a waveform at any sample rate.
    pub fn predict(&self, audio: &AudioBuffer) -> Result<AttributeVector> {
        let _span = tracing::info_span!("predict").entered();
        let start = Instant::now();

        let scores = self.model.predict(audio)?;
        let scores: Vec<f32> = scores.to_device(&Device::Cpu)?.to_vec1()?;
        let vector = AttributeVector::from_slice(&scores)?;

        tracing::debug!(
            "Predicted {:.2}s of audio in {:.2?}",
            audio.duration(),
            start.elapsed()
        );
        Ok(vector)
    }

    /// Load a WAV file and predict its attribute scores.
    pub fn predict_file<P: AsRef<Path>>(&self, path: P) -> Result<AttributeVector> {
        let audio = audio::load_wav(path)?;
        self.predict(&audio)
    }

    /// Batched scores `[B, 44]` from log-mel features `[B, n_mels, T]`.
    pub fn predict_mel(&self, mel: &Tensor) -> Result<Tensor> {
        self.model.predict_mel(mel)
    }

    pub fn config(&self) -> &VoveConfig {
        self.model.config()
    }

    pub fn device(&self) -> &Device {
        self.model.device()
    }

    /// Whether the checkpoint carried the training-time speaker classifier.
    pub fn has_speaker_head(&self) -> bool {
        self.model.has_speaker_head()
    }

    /// The underlying network, for embeddings and speaker logits.
    pub fn model(&self) -> &VoveModel {
        &self.model
    }
}

/// One-shot prediction: load `checkpoint_path`, read `audio_path`, and
/// return the 44 attribute scores.
///
/// `device` accepts the same strings as [`parse_device`].
pub fn predict<P: AsRef<Path>, Q: AsRef<Path>>(
    checkpoint_path: P,
    audio_path: Q,
    device: &str,
) -> Result<AttributeVector> {
    let device = parse_device(device)?;
    let model = Vove::from_checkpoint(checkpoint_path, None, device)?;
    model.predict_file(audio_path)
}

/// Select the best available compute device.
///
/// Priority: CUDA → Metal → CPU. Requires the corresponding feature
/// flag (`cuda` or `metal`) to be enabled at compile time.
pub fn auto_device() -> Result<Device> {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::cuda_if_available(0) {
            if device.is_cuda() {
                tracing::info!("Using CUDA device");
                return Ok(device);
            }
        }
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            tracing::info!("Using Metal device");
            return Ok(device);
        }
    }

    tracing::info!("Using CPU device");
    Ok(Device::Cpu)
}

/// Parse a device string into a [`Device`].
///
/// Supported formats:
/// - `"auto"`: best available via [`auto_device`]
/// - `"cpu"`: force CPU
/// - `"cuda"` or `"cuda:0"`: CUDA device 0
/// - `"cuda:N"`: CUDA device N
/// - `"metal"`: Apple Silicon GPU
///
/// # Errors
///
/// [`Error::InvalidDevice`] if the string is unrecognized,
/// [`Error::DeviceUnavailable`] if the backend wasn't compiled in or
/// hardware initialization fails.
pub fn parse_device(device_str: &str) -> Result<Device> {
    let normalized = device_str.trim().to_lowercase();
    match normalized.as_str() {
        "auto" => auto_device(),
        "cpu" => Ok(Device::Cpu),
        s if s == "cuda" || s.starts_with("cuda:") => {
            let ordinal: usize = match s.strip_prefix("cuda:") {
                Some(idx) => idx
                    .parse()
                    .map_err(|_| Error::InvalidDevice(device_str.to_string()))?,
                None => 0,
            };
            cuda_device(device_str, ordinal)
        }
        "metal" => metal_device(device_str),
        _ => Err(Error::InvalidDevice(device_str.to_string()).into()),
    }
}

#[cfg(feature = "cuda")]
fn cuda_device(device_str: &str, ordinal: usize) -> Result<Device> {
    Device::new_cuda(ordinal).map_err(|e| {
        Error::DeviceUnavailable {
            device: device_str.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

#[cfg(not(feature = "cuda"))]
fn cuda_device(device_str: &str, _ordinal: usize) -> Result<Device> {
    Err(Error::DeviceUnavailable {
        device: device_str.to_string(),
        reason: "CUDA support not compiled in. Rebuild with: cargo build --features cuda".into(),
    }
    .into())
}

#[cfg(feature = "metal")]
fn metal_device(device_str: &str) -> Result<Device> {
    Device::new_metal(0).map_err(|e| {
        Error::DeviceUnavailable {
            device: device_str.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

#[cfg(not(feature = "metal"))]
fn metal_device(device_str: &str) -> Result<Device> {
    Err(Error::DeviceUnavailable {
        device: device_str.to_string(),
        reason: "Metal support not compiled in. Rebuild with: cargo build --features metal".into(),
    }
    .into())
}

/// Human-readable label for a [`Device`].
pub fn device_info(device: &Device) -> String {
    match device {
        Device::Cpu => "CPU".to_string(),
        Device::Cuda(_) => "CUDA".to_string(),
        Device::Metal(_) => "Metal".to_string(),
    }
}
