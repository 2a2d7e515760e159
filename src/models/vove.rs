//! VOVE attribute model: log-mel front-end + ECAPA-TDNN regressor
//!
//! Weight layout:
//! - `ecapa_tdnn.*`: backbone and 44-way attribute head
//! - `fc.*`, `bn.*`: speaker-classification head used during training
//!   (optional, absent from stripped checkpoints)

use anyhow::Result;
use candle_core::{DType, Device, ModuleT, Tensor};
use candle_nn::{batch_norm, linear, BatchNorm, BatchNormConfig, Linear, Module, VarBuilder};
use std::collections::HashMap;

use crate::audio::{resample, AudioBuffer, MelSpectrogram};
use crate::checkpoint::filter_weights;
use crate::models::config::VoveConfig;
use crate::models::ecapa::EcapaTdnn;
use crate::Error;

/// Auxiliary speaker classifier on top of the attribute logits.
struct SpeakerHead {
    fc: Linear,
    bn: BatchNorm,
    num_speakers: usize,
}

impl SpeakerHead {
    fn new(num_classes: usize, num_speakers: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            fc: linear(num_classes, num_speakers, vb.pp("fc"))?,
            bn: batch_norm(num_speakers, BatchNormConfig::default(), vb.pp("bn"))?,
            num_speakers,
        })
    }

    fn forward(&self, logits: &Tensor) -> Result<Tensor> {
        let x = self.fc.forward(&logits.relu()?)?;
        Ok(self.bn.forward_t(&x, false)?)
    }
}

/// Complete attribute predictor.
///
/// All computation runs in F32 on every device so that CPU and GPU scores
/// stay comparable.
pub struct VoveModel {
    ecapa: EcapaTdnn,
    speaker_head: Option<SpeakerHead>,
    mel: MelSpectrogram,
    config: VoveConfig,
    device: Device,
}

impl VoveModel {
    /// Build from checkpoint tensors (keys without the `module.` prefix).
    ///
    /// Missing tensors and shape disagreements with `config` are reported as
    /// [`Error::ArchitectureMismatch`].
    pub fn from_weights(
        weights: &HashMap<String, Tensor>,
        config: VoveConfig,
        device: &Device,
    ) -> Result<Self> {
        config.validate()?;

        let ecapa_weights = filter_weights(weights, "ecapa_tdnn.");
        if ecapa_weights.is_empty() {
            return Err(
                Error::ArchitectureMismatch("no ecapa_tdnn.* tensors in checkpoint".into()).into(),
            );
        }
        let vb = VarBuilder::from_tensors(ecapa_weights, DType::F32, device);
        let ecapa = EcapaTdnn::new(&config, vb)
            .map_err(|e| Error::ArchitectureMismatch(format!("{e:#}")))?;

        let speaker_head = match weights.get("fc.weight").map(|t| t.dims().to_vec()) {
            Some(dims) if dims.len() == 2 => {
                let num_speakers = dims[0];
                let head_weights: HashMap<String, Tensor> = weights
                    .iter()
                    .filter(|(k, _)| k.starts_with("fc.") || k.starts_with("bn."))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                let vb = VarBuilder::from_tensors(head_weights, DType::F32, device);
                let head = SpeakerHead::new(config.num_classes, num_speakers, vb)
                    .map_err(|e| Error::ArchitectureMismatch(format!("speaker head: {e:#}")))?;
                tracing::debug!("Speaker head present ({num_speakers} speakers)");
                Some(head)
            }
            _ => None,
        };

        tracing::info!("Built {}", config.label());

        Ok(Self {
            ecapa,
            speaker_head,
            mel: MelSpectrogram::new(config.mel_config())?,
            config,
            device: device.clone(),
        })
    }

    pub fn config(&self) -> &VoveConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn has_speaker_head(&self) -> bool {
        self.speaker_head.is_some()
    }

    /// Number of training speakers, when the speaker head is loaded.
    pub fn num_speakers(&self) -> Option<usize> {
        self.speaker_head.as_ref().map(|h| h.num_speakers)
    }

    /// Log-mel features `[1, n_mels, T]` for a waveform at any sample rate.
    pub fn mel(&self, audio: &AudioBuffer) -> Result<Tensor> {
        let _span = tracing::info_span!("mel").entered();
        let target_rate = self.config.audio.sample_rate;
        let audio = if audio.sample_rate != target_rate {
            resample(audio, target_rate)?
        } else {
            audio.clone()
        };
        let mel = self.mel.compute_tensor(&audio.samples, &self.device)?;
        tracing::debug!("Mel features: {:?}", mel.dims());
        Ok(mel.unsqueeze(0)?)
    }

    /// Attribute logits `[B, 44]` from mel `[B, n_mels, T]`.
    pub fn forward(&self, mel: &Tensor) -> Result<Tensor> {
        let _span = tracing::info_span!("forward").entered();
        self.ecapa.forward(mel)
    }

    /// Unit-norm utterance embedding `[B, out_channels]`.
    pub fn embed(&self, mel: &Tensor) -> Result<Tensor> {
        self.ecapa.embed(mel)
    }

    /// Attribute scores in `[0, 1]`, `[B, 44]`.
    pub fn predict_mel(&self, mel: &Tensor) -> Result<Tensor> {
        Ok(candle_nn::ops::sigmoid(&self.forward(mel)?)?)
    }

    /// Attribute scores for one waveform, `[44]`.
    pub fn predict(&self, audio: &AudioBuffer) -> Result<Tensor> {
        let mel = self.mel(audio)?;
        Ok(self.predict_mel(&mel)?.squeeze(0)?)
    }

    /// Speaker logits `[B, num_speakers]`, or `None` without a speaker head.
    pub fn speaker_logits(&self, mel: &Tensor) -> Result<Option<Tensor>> {
        let Some(head) = &self.speaker_head else {
            return Ok(None);
        };
        let logits = self.forward(mel)?;
        Ok(Some(head.forward(&logits)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::VarMap;

    fn small_config() -> VoveConfig {
        VoveConfig {
            channels: 16,
            scale: 4,
            bottleneck: 8,
            hiddens: 24,
            out_channels: 12,
            dilations: vec![2, 3],
            ..Default::default()
        }
    }

    /// Random weights under the checkpoint key layout.
    fn random_weights(config: &VoveConfig, speakers: Option<usize>) -> HashMap<String, Tensor> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        EcapaTdnn::new(config, vb.pp("ecapa_tdnn")).unwrap();
        if let Some(n) = speakers {
            SpeakerHead::new(config.num_classes, n, vb.clone()).unwrap();
        }
        let data = varmap.data().lock().unwrap();
        data.iter()
            .map(|(k, v)| (k.clone(), v.as_tensor().clone()))
            .collect()
    }

    fn sine(freq: f32, sample_rate: u32, len: usize) -> AudioBuffer {
        let samples = (0..len)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin())
            .collect();
        AudioBuffer::new(samples, sample_rate)
    }

    #[test]
    fn test_predict_scores_in_unit_range() {
        let config = small_config();
        let weights = random_weights(&config, None);
        let model = VoveModel::from_weights(&weights, config, &Device::Cpu).unwrap();
        assert!(!model.has_speaker_head());

        let scores: Vec<f32> = model.predict(&sine(220.0, 16000, 8000)).unwrap().to_vec1().unwrap();
        assert_eq!(scores.len(), 44);
        assert!(scores.iter().all(|s| (0.0..=1.0).contains(s)));
    }

    #[test]
    fn test_speaker_head_detected() {
        let config = small_config();
        let weights = random_weights(&config, Some(7));
        let model = VoveModel::from_weights(&weights, config, &Device::Cpu).unwrap();
        assert_eq!(model.num_speakers(), Some(7));

        let mel = model.mel(&sine(440.0, 16000, 4000)).unwrap();
        let logits = model.speaker_logits(&mel).unwrap().unwrap();
        assert_eq!(logits.dims(), &[1, 7]);
    }

    #[test]
    fn test_mel_resamples_input() {
        let config = small_config();
        let weights = random_weights(&config, None);
        let model = VoveModel::from_weights(&weights, config, &Device::Cpu).unwrap();

        let native = model.mel(&sine(300.0, 16000, 16000)).unwrap();
        let resampled = model.mel(&sine(300.0, 48000, 48000)).unwrap();
        assert_eq!(native.dims(), resampled.dims());
        assert_eq!(native.dims(), &[1, 80, 62]);
    }

    #[test]
    fn test_config_mismatch_is_architecture_error() {
        let weights = random_weights(&small_config(), None);
        let wider = VoveConfig {
            channels: 32,
            ..small_config()
        };
        let err = VoveModel::from_weights(&weights, wider, &Device::Cpu)
            .err()
            .unwrap();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::ArchitectureMismatch(_))
        ));
    }

    #[test]
    fn test_empty_weights_rejected() {
        let err = VoveModel::from_weights(&HashMap::new(), small_config(), &Device::Cpu)
            .err()
            .unwrap();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::ArchitectureMismatch(_))
        ));
    }
}
