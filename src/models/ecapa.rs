//! ECAPA-TDNN attribute regressor
//!
//! Architecture of the VOVE backbone:
//!
//! - **ConvUnit**: Conv1d (zero-padded "same") → ReLU → BatchNorm1d
//! - **Res2Block**: Scale-way channel split with cascaded ConvUnits
//! - **SERes2Block**: 1×1 unit → Res2Block → 1×1 unit → squeeze-excitation → residual
//! - **AttentiveStatisticsPooling**: Attention-weighted mean/std over time
//! - **Head**: BN → Linear → BN → L2 normalise → Linear(→44) → BN
//!
//! Weight prefix: `ecapa_tdnn.*`. Indices in weight keys follow the layer
//! positions inside the training code's `nn.Sequential` containers.

use anyhow::Result;
use candle_core::{ModuleT, Tensor, D};
use candle_nn::{
    batch_norm, conv1d, linear, BatchNorm, BatchNormConfig, Conv1d, Conv1dConfig, Linear, Module,
    VarBuilder,
};

use crate::models::config::VoveConfig;

fn bn_config() -> BatchNormConfig {
    BatchNormConfig {
        eps: 1e-5,
        remove_mean: true,
        affine: true,
        momentum: 0.1,
    }
}

/// BatchNorm with running statistics; inference never updates them.
fn bn_eval(bn: &BatchNorm, x: &Tensor) -> Result<Tensor> {
    Ok(bn.forward_t(x, false)?)
}

/// Conv1d → ReLU → BatchNorm1d.
///
/// Weight keys: `0.weight/bias` (conv), `2.weight/bias/running_mean/running_var` (bn)
struct ConvUnit {
    conv: Conv1d,
    bn: BatchNorm,
}

impl ConvUnit {
    fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        dilation: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let config = Conv1dConfig {
            padding: (kernel_size - 1) * dilation / 2,
            stride: 1,
            dilation,
            groups: 1,
            ..Default::default()
        };
        Ok(Self {
            conv: conv1d(in_channels, out_channels, kernel_size, config, vb.pp("0"))?,
            bn: batch_norm(out_channels, bn_config(), vb.pp("2"))?,
        })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let x = self.conv.forward(x)?.relu()?;
        bn_eval(&self.bn, &x)
    }
}

/// Multi-scale residual block.
///
/// Splits input channels into `scale` groups. The first group passes through
/// unchanged; group `i` is convolved after adding the previous group's output.
///
/// Weight keys: `convs.{i}.*`
struct Res2Block {
    convs: Vec<ConvUnit>,
    width: usize,
}

impl Res2Block {
    fn new(
        channels: usize,
        scale: usize,
        kernel_size: usize,
        dilation: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let width = channels / scale;
        let convs = (0..scale - 1)
            .map(|i| {
                ConvUnit::new(
                    width,
                    width,
                    kernel_size,
                    dilation,
                    vb.pp(format!("convs.{i}")),
                )
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { convs, width })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let mut outputs = Vec::with_capacity(self.convs.len() + 1);
        outputs.push(x.narrow(1, 0, self.width)?);

        let mut base: Option<Tensor> = None;
        for (i, conv) in self.convs.iter().enumerate() {
            let chunk = x.narrow(1, (i + 1) * self.width, self.width)?;
            let input = match &base {
                Some(prev) => (chunk + prev)?,
                None => chunk,
            };
            let out = conv.forward(&input)?;
            outputs.push(out.clone());
            base = Some(out);
        }

        Ok(Tensor::cat(&outputs, 1)?)
    }
}

/// SE-Res2Net block: preblock → Res2Block → postblock → SE scale → residual add.
///
/// Weight keys: `preblock.*`, `res2block.*`, `postblock.*`, `excitation.{0,2}.*`
struct SERes2Block {
    preblock: ConvUnit,
    res2block: Res2Block,
    postblock: ConvUnit,
    excite_down: Linear,
    excite_up: Linear,
}

impl SERes2Block {
    fn new(
        channels: usize,
        scale: usize,
        kernel_size: usize,
        dilation: usize,
        bottleneck: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        Ok(Self {
            preblock: ConvUnit::new(channels, channels, 1, 1, vb.pp("preblock"))?,
            res2block: Res2Block::new(
                channels,
                scale,
                kernel_size,
                dilation,
                vb.pp("res2block"),
            )?,
            postblock: ConvUnit::new(channels, channels, 1, 1, vb.pp("postblock"))?,
            excite_down: linear(channels, bottleneck, vb.pp("excitation.0"))?,
            excite_up: linear(bottleneck, channels, vb.pp("excitation.2"))?,
        })
    }

    fn forward(&self, inputs: &Tensor) -> Result<Tensor> {
        let x = self.preblock.forward(inputs)?;
        let x = self.res2block.forward(&x)?;
        let x = self.postblock.forward(&x)?;

        // Squeeze: [B, C, T] → [B, C]
        let s = x.mean(D::Minus1)?;
        let s = self.excite_down.forward(&s)?.relu()?;
        let s = candle_nn::ops::sigmoid(&self.excite_up.forward(&s)?)?;
        let x = x.broadcast_mul(&s.unsqueeze(D::Minus1)?)?;

        Ok((x + inputs)?)
    }
}

/// Attentive statistics pooling.
///
/// Weight keys: `attention.0.*`, `attention.2.*`
struct AttentiveStatisticsPooling {
    attn_down: Conv1d,
    attn_up: Conv1d,
}

impl AttentiveStatisticsPooling {
    fn new(channels: usize, bottleneck: usize, vb: VarBuilder) -> Result<Self> {
        let config = Conv1dConfig::default();
        Ok(Self {
            attn_down: conv1d(channels, bottleneck, 1, config, vb.pp("attention.0"))?,
            attn_up: conv1d(bottleneck, channels, 1, config, vb.pp("attention.2"))?,
        })
    }

    /// `[B, C, T]` → `[B, 2C]` (weighted mean, weighted std)
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let w = self.attn_down.forward(x)?.tanh()?;
        let w = self.attn_up.forward(&w)?;
        let w = candle_nn::ops::softmax_last_dim(&w)?;

        let mean = (&w * x)?.sum(D::Minus1)?;
        let var = (&w * x.sqr()?)?.sum(D::Minus1)? - mean.sqr()?;
        // Cancellation can push the variance slightly below zero
        let std = (var?.maximum(0f32)? + 1e-7)?.sqrt()?;

        Ok(Tensor::cat(&[&mean, &std], D::Minus1)?)
    }
}

/// Full ECAPA-TDNN with the attribute head.
///
/// Architecture:
/// ```text
/// preblock:  ConvUnit(in_channels → C, k=prekernels)
/// blocks:    SE-Res2Net(C, dilation=d) for d in dilations
/// conv1x1:   Conv1d(len(dilations)·C → H, k=1) + ReLU
/// pool:      ASP(H) → BN(2H) → Linear(2H → out) → BN(out)
/// head:      L2 normalise → Linear(out → 44) → BN(44)
/// ```
pub struct EcapaTdnn {
    preblock: ConvUnit,
    blocks: Vec<SERes2Block>,
    mfa: Conv1d,
    asp: AttentiveStatisticsPooling,
    pool_bn: BatchNorm,
    projection: Linear,
    embed_bn: BatchNorm,
    fc: Linear,
    bn: BatchNorm,
}

impl EcapaTdnn {
    /// The `vb` should already be scoped to `ecapa_tdnn`.
    pub fn new(config: &VoveConfig, vb: VarBuilder) -> Result<Self> {
        let preblock = ConvUnit::new(
            config.in_channels,
            config.channels,
            config.prekernels,
            1,
            vb.pp("preblock"),
        )?;

        let blocks = config
            .dilations
            .iter()
            .enumerate()
            .map(|(i, &dilation)| {
                SERes2Block::new(
                    config.channels,
                    config.scale,
                    config.kernels,
                    dilation,
                    config.bottleneck,
                    vb.pp(format!("blocks.{i}")),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        let mfa = conv1d(
            config.dilations.len() * config.channels,
            config.hiddens,
            1,
            Conv1dConfig::default(),
            vb.pp("conv1x1.0"),
        )?;

        let pool = vb.pp("pool");
        let asp = AttentiveStatisticsPooling::new(config.hiddens, config.bottleneck, pool.pp("0"))?;
        let pool_bn = batch_norm(config.hiddens * 2, bn_config(), pool.pp("1"))?;
        let projection = linear(config.hiddens * 2, config.out_channels, pool.pp("2"))?;
        let embed_bn = batch_norm(config.out_channels, bn_config(), pool.pp("3"))?;

        let fc = linear(config.out_channels, config.num_classes, vb.pp("fc"))?;
        let bn = batch_norm(config.num_classes, bn_config(), vb.pp("bn"))?;

        Ok(Self {
            preblock,
            blocks,
            mfa,
            asp,
            pool_bn,
            projection,
            embed_bn,
            fc,
            bn,
        })
    }

    /// Unit-norm utterance embedding `[B, out_channels]` from mel `[B, n_mels, T]`.
    pub fn embed(&self, mel: &Tensor) -> Result<Tensor> {
        let mut x = self.preblock.forward(mel)?;

        let mut block_outputs = Vec::with_capacity(self.blocks.len());
        for block in &self.blocks {
            x = block.forward(&x)?;
            block_outputs.push(x.clone());
        }

        // Multi-layer feature aggregation
        let mfa = self.mfa.forward(&Tensor::cat(&block_outputs, 1)?)?.relu()?;

        let pooled = self.asp.forward(&mfa)?;
        let pooled = bn_eval(&self.pool_bn, &pooled)?;
        let embedding = self.projection.forward(&pooled)?;
        let embedding = bn_eval(&self.embed_bn, &embedding)?;

        l2_normalize(&embedding)
    }

    /// Attribute logits `[B, num_classes]` (before sigmoid).
    pub fn forward(&self, mel: &Tensor) -> Result<Tensor> {
        let embedding = self.embed(mel)?;
        let logits = self.fc.forward(&embedding)?;
        bn_eval(&self.bn, &logits)
    }
}

/// Row-wise L2 normalisation with a 1e-12 floor on the norm.
pub(crate) fn l2_normalize(x: &Tensor) -> Result<Tensor> {
    let norm = x.sqr()?.sum_keepdim(D::Minus1)?.sqrt()?.maximum(1e-12f32)?;
    Ok(x.broadcast_div(&norm)?)
}
