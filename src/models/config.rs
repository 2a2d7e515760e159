//! Model configuration
//!
//! Mirrors the `model` section of the training config
//! (`configs/vove_ecapa.json`). When no file is supplied, dimensions are
//! recovered from checkpoint tensor shapes.

use anyhow::{Context, Result};
use candle_core::Tensor;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::attributes::NUM_ATTRIBUTES;
use crate::audio::{MelConfig, N_MELS, SAMPLE_RATE};
use crate::Error;

/// ECAPA-TDNN attribute regressor configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoveConfig {
    /// Input mel bands
    #[serde(default = "default_in_channels")]
    pub in_channels: usize,
    /// Size of the pooled embedding
    #[serde(default = "default_out_channels")]
    pub out_channels: usize,
    /// Attribute head width (always 44 for released checkpoints)
    #[serde(default = "default_num_classes")]
    pub num_classes: usize,
    /// Width of the SE-Res2Net trunk
    #[serde(default = "default_channels")]
    pub channels: usize,
    /// Kernel size of the first convolution
    #[serde(default = "default_prekernels")]
    pub prekernels: usize,
    /// Res2Net scale (number of channel groups)
    #[serde(default = "default_scale")]
    pub scale: usize,
    /// Kernel size inside Res2Net groups
    #[serde(default = "default_kernels")]
    pub kernels: usize,
    /// One SE-Res2Net block per dilation
    #[serde(default = "default_dilations")]
    pub dilations: Vec<usize>,
    /// Squeeze-excitation and attention bottleneck
    #[serde(default = "default_bottleneck")]
    pub bottleneck: usize,
    /// Channels after multi-layer feature aggregation
    #[serde(default = "default_hiddens")]
    pub hiddens: usize,
    /// Mel front-end
    #[serde(default)]
    pub audio: AudioConfig,
}

/// Feature extraction parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_n_fft")]
    pub n_fft: usize,
    #[serde(default = "default_hop_length")]
    pub hop_length: usize,
    #[serde(default = "default_n_fft")]
    pub win_length: usize,
    #[serde(default = "default_in_channels")]
    pub n_mels: usize,
    #[serde(default)]
    pub fmin: f32,
    #[serde(default = "default_fmax")]
    pub fmax: f32,
}

fn default_in_channels() -> usize {
    N_MELS
}
fn default_out_channels() -> usize {
    192
}
fn default_num_classes() -> usize {
    NUM_ATTRIBUTES
}
fn default_channels() -> usize {
    512
}
fn default_prekernels() -> usize {
    5
}
fn default_scale() -> usize {
    8
}
fn default_kernels() -> usize {
    3
}
fn default_dilations() -> Vec<usize> {
    vec![2, 3, 4]
}
fn default_bottleneck() -> usize {
    128
}
fn default_hiddens() -> usize {
    1536
}
fn default_sample_rate() -> u32 {
    SAMPLE_RATE
}
fn default_n_fft() -> usize {
    1024
}
fn default_hop_length() -> usize {
    256
}
fn default_fmax() -> f32 {
    8000.0
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            n_fft: default_n_fft(),
            hop_length: default_hop_length(),
            win_length: default_n_fft(),
            n_mels: default_in_channels(),
            fmin: 0.0,
            fmax: default_fmax(),
        }
    }
}

impl Default for VoveConfig {
    fn default() -> Self {
        Self {
            in_channels: default_in_channels(),
            out_channels: default_out_channels(),
            num_classes: default_num_classes(),
            channels: default_channels(),
            prekernels: default_prekernels(),
            scale: default_scale(),
            kernels: default_kernels(),
            dilations: default_dilations(),
            bottleneck: default_bottleneck(),
            hiddens: default_hiddens(),
            audio: AudioConfig::default(),
        }
    }
}

/// Shape of a required checkpoint tensor, or an architecture-mismatch error.
fn dims_of<'a>(weights: &'a HashMap<String, Tensor>, key: &str) -> Result<&'a [usize]> {
    weights
        .get(key)
        .map(|t| t.dims())
        .ok_or_else(|| Error::ArchitectureMismatch(format!("missing tensor {key}")).into())
}

fn dim_at(dims: &[usize], idx: usize, key: &str) -> Result<usize> {
    dims.get(idx).copied().ok_or_else(|| {
        Error::ArchitectureMismatch(format!("tensor {key} has unexpected shape {dims:?}")).into()
    })
}

impl VoveConfig {
    /// Load from a JSON file.
    ///
    /// Accepts either the bare model object or the training layout where it
    /// sits under a `"model"` key next to `"train"` and `"data"` sections.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        Self::from_json_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let mut v: serde_json::Value = serde_json::from_str(content)?;
        let section = if v.get("model").is_some_and(|m| m.is_object()) {
            v["model"].take()
        } else {
            v
        };
        let config: Self = serde_json::from_value(section)?;
        config.validate()?;
        Ok(config)
    }

    /// Recover the architecture from checkpoint tensor shapes.
    ///
    /// Dilations are not stored in the weights; the block count is detected
    /// and the default dilation schedule (2, 3, 4, ...) is assumed.
    pub fn detect_from_weights(weights: &HashMap<String, Tensor>) -> Result<Self> {
        const PRE: &str = "ecapa_tdnn.preblock.0.weight";
        const RES2: &str = "ecapa_tdnn.blocks.0.res2block.convs.0.0.weight";
        const SE: &str = "ecapa_tdnn.blocks.0.excitation.0.weight";
        const MFA: &str = "ecapa_tdnn.conv1x1.0.weight";
        const PROJ: &str = "ecapa_tdnn.pool.2.weight";
        const FC: &str = "ecapa_tdnn.fc.weight";

        let pre = dims_of(weights, PRE)?;
        let channels = dim_at(pre, 0, PRE)?;
        let in_channels = dim_at(pre, 1, PRE)?;
        let prekernels = dim_at(pre, 2, PRE)?;

        let res2 = dims_of(weights, RES2)?;
        let width = dim_at(res2, 0, RES2)?;
        let kernels = dim_at(res2, 2, RES2)?;
        if width == 0 || channels % width != 0 {
            return Err(Error::ArchitectureMismatch(format!(
                "res2net group width {width} does not divide {channels} channels"
            ))
            .into());
        }

        let num_blocks = (0..)
            .take_while(|i| {
                weights.contains_key(&format!("ecapa_tdnn.blocks.{i}.preblock.0.weight"))
            })
            .count();

        let bottleneck = dim_at(dims_of(weights, SE)?, 0, SE)?;
        let hiddens = dim_at(dims_of(weights, MFA)?, 0, MFA)?;
        let out_channels = dim_at(dims_of(weights, PROJ)?, 0, PROJ)?;
        let num_classes = dim_at(dims_of(weights, FC)?, 0, FC)?;

        let config = Self {
            in_channels,
            out_channels,
            num_classes,
            channels,
            prekernels,
            scale: channels / width,
            kernels,
            dilations: (2..2 + num_blocks).collect(),
            bottleneck,
            hiddens,
            audio: AudioConfig {
                n_mels: in_channels,
                ..AudioConfig::default()
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the network cannot be built from.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| -> Result<()> { Err(Error::InvalidConfig(msg).into()) };

        if self.scale == 0 || self.channels % self.scale != 0 {
            return invalid(format!(
                "channels ({}) must be divisible by scale ({})",
                self.channels, self.scale
            ));
        }
        if self.dilations.is_empty() {
            return invalid("at least one dilation is required".into());
        }
        if self.num_classes != NUM_ATTRIBUTES {
            return invalid(format!(
                "num_classes must be {NUM_ATTRIBUTES}, got {}",
                self.num_classes
            ));
        }
        if self.in_channels != self.audio.n_mels {
            return invalid(format!(
                "in_channels ({}) must equal n_mels ({})",
                self.in_channels, self.audio.n_mels
            ));
        }
        if self.prekernels % 2 == 0 || self.kernels % 2 == 0 {
            return invalid("kernel sizes must be odd to preserve frame count".into());
        }
        let a = &self.audio;
        if a.hop_length == 0 || a.hop_length > a.n_fft || a.win_length > a.n_fft {
            return invalid(format!(
                "need 0 < hop_length <= n_fft and win_length <= n_fft (hop {}, win {}, n_fft {})",
                a.hop_length, a.win_length, a.n_fft
            ));
        }
        if a.fmax <= a.fmin || a.fmax > a.sample_rate as f32 / 2.0 {
            return invalid(format!(
                "mel range {}..{} Hz is invalid at {} Hz",
                a.fmin, a.fmax, a.sample_rate
            ));
        }
        Ok(())
    }

    pub fn mel_config(&self) -> MelConfig {
        MelConfig {
            sample_rate: self.audio.sample_rate,
            n_fft: self.audio.n_fft,
            hop_length: self.audio.hop_length,
            win_length: Some(self.audio.win_length),
            n_mels: self.audio.n_mels,
            fmin: self.audio.fmin,
            fmax: Some(self.audio.fmax),
        }
    }

    /// Short human-readable summary for logs.
    pub fn label(&self) -> String {
        format!(
            "ECAPA-TDNN C={} H={} blocks={} emb={}",
            self.channels,
            self.hiddens,
            self.dilations.len(),
            self.out_channels
        )
    }
}
