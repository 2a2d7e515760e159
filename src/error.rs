//! Typed failures surfaced by the public inference API.
//!
//! Internals propagate `anyhow::Error` with context. Conditions a caller may
//! want to branch on are raised as [`Error`] and can be recovered with
//! `err.downcast_ref::<vove::Error>()`.

use std::path::PathBuf;

/// Failures of a single `checkpoint + audio → attribute vector` run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("checkpoint not found: {}", .0.display())]
    CheckpointNotFound(PathBuf),

    #[error("failed to read checkpoint {}: {reason}", path.display())]
    CorruptCheckpoint { path: PathBuf, reason: String },

    #[error("checkpoint does not match the model architecture: {0}")]
    ArchitectureMismatch(String),

    #[error("invalid model configuration: {0}")]
    InvalidConfig(String),

    #[error("audio file not found: {}", .0.display())]
    AudioNotFound(PathBuf),

    #[error("unsupported or corrupt audio file {}: {reason}", path.display())]
    UnsupportedAudio { path: PathBuf, reason: String },

    #[error("audio too short: {samples} samples at {sample_rate} Hz, need more than {min_samples}")]
    AudioTooShort {
        samples: usize,
        sample_rate: u32,
        min_samples: usize,
    },

    #[error("invalid device '{0}'. Supported: auto, cpu, cuda, cuda:N, metal")]
    InvalidDevice(String),

    #[error("device '{device}' is unavailable: {reason}")]
    DeviceUnavailable { device: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_path() {
        let err = Error::CheckpointNotFound(PathBuf::from("ckpt/vove.pth"));
        assert_eq!(err.to_string(), "checkpoint not found: ckpt/vove.pth");

        let err = Error::UnsupportedAudio {
            path: PathBuf::from("notes.txt"),
            reason: "not a RIFF file".into(),
        };
        assert!(err.to_string().contains("notes.txt"));
        assert!(err.to_string().contains("not a RIFF file"));
    }

    #[test]
    fn test_downcast_through_anyhow() {
        let err: anyhow::Error = Error::InvalidDevice("tpu".into()).into();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::InvalidDevice(d)) if d == "tpu"
        ));
    }
}
