//! Checkpoint loading
//!
//! Released VOVE weights ship as PyTorch training checkpoints (`.pth`), a
//! pickled dict with the state dict under `model` next to optimizer state.
//! Converted `.safetensors` files are read directly.

use anyhow::Result;
use candle_core::{Device, Tensor};
use std::collections::HashMap;
use std::path::Path;

use crate::Error;

/// Prefix left on every key by data-parallel training wrappers.
const DATA_PARALLEL_PREFIX: &str = "module.";

fn corrupt(path: &Path, reason: impl ToString) -> anyhow::Error {
    Error::CorruptCheckpoint {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
    .into()
}

fn is_safetensors(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("safetensors"))
}

/// Load every tensor of a checkpoint onto `device`.
///
/// `.safetensors` files go through candle's safetensors reader; anything else is read as
/// a PyTorch pickle, first from its `model` entry and then from the root dict.
pub fn load_checkpoint<P: AsRef<Path>>(path: P, device: &Device) -> Result<HashMap<String, Tensor>> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(Error::CheckpointNotFound(path.to_path_buf()).into());
    }

    let _span = tracing::info_span!("load_checkpoint").entered();

    let tensors: Vec<(String, Tensor)> = if is_safetensors(path) {
        candle_core::safetensors::load(path, &Device::Cpu)
            .map_err(|e| corrupt(path, e))?
            .into_iter()
            .collect()
    } else {
        read_pickle(path)?
    };

    if tensors.is_empty() {
        return Err(corrupt(path, "no tensors found"));
    }

    let weights = tensors
        .into_iter()
        .map(|(name, tensor)| {
            let name = strip_prefix(&name).to_string();
            Ok((name, tensor.to_device(device)?))
        })
        .collect::<Result<HashMap<_, _>>>()?;

    tracing::info!("Loaded {} tensors from {}", weights.len(), path.display());
    Ok(weights)
}

fn read_pickle(path: &Path) -> Result<Vec<(String, Tensor)>> {
    match candle_core::pickle::read_all_with_key(path, Some("model")) {
        Ok(tensors) if !tensors.is_empty() => Ok(tensors),
        Ok(_) | Err(_) => {
            tracing::debug!("No 'model' entry in {}, reading root dict", path.display());
            candle_core::pickle::read_all_with_key(path, None).map_err(|e| corrupt(path, e))
        }
    }
}

/// Drop the data-parallel `module.` prefix, if any.
pub fn strip_prefix(name: &str) -> &str {
    name.strip_prefix(DATA_PARALLEL_PREFIX).unwrap_or(name)
}

/// Filter weights by prefix, removing the prefix from keys.
pub(crate) fn filter_weights(
    weights: &HashMap<String, Tensor>,
    prefix: &str,
) -> HashMap<String, Tensor> {
    weights
        .iter()
        .filter_map(|(k, v)| {
            k.strip_prefix(prefix)
                .map(|stripped| (stripped.to_string(), v.clone()))
        })
        .collect()
}
