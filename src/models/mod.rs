//! Neural network models for VOVE
//!
//! This module contains:
//! - `config`: Model configuration (JSON or detected from weights)
//! - `ecapa`: ECAPA-TDNN backbone with the attribute head
//! - `vove`: Front-end + backbone + optional speaker head

pub mod config;
pub mod ecapa;
pub mod vove;

pub use config::{AudioConfig, VoveConfig};
pub use ecapa::EcapaTdnn;
pub use vove::VoveModel;
