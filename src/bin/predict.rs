//! Predict the 44 voice-attribute scores of one audio file.
//!
//! Usage:
//!     cargo run --release --bin predict -- --ckpt_dir ckpt/vove.pth --sample_dir sample/source.wav
//!     cargo run --release --bin predict -- --ckpt_dir ckpt/vove.pth --sample_dir a.wav --ranked --top 10
//!     cargo run --release --features cuda --bin predict -- --ckpt_dir ckpt/vove.pth --sample_dir a.wav --device cuda

use anyhow::Result;
use clap::{Parser, ValueEnum};
use serde::Serialize;

use vove::{device_info, parse_device, AttributeScore, Vove, VoveConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// One `attribute score` line per attribute
    Text,
    /// JSON document with the checkpoint, input and scores
    Json,
}

/// Predict voice attributes from a WAV file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// VOVE checkpoint (.pth or .safetensors)
    #[arg(long = "ckpt_dir", default_value = "ckpt/vove.pth")]
    ckpt_dir: String,

    /// Input audio file
    #[arg(long = "sample_dir", default_value = "sample/source.wav")]
    sample_dir: String,

    /// Device for inference (auto, cpu, cuda, cuda:N, metal)
    #[arg(long, default_value = "cpu")]
    device: String,

    /// Model config JSON (defaults to detection from checkpoint shapes)
    #[arg(long)]
    config: Option<String>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Sort attributes by descending score
    #[arg(long)]
    ranked: bool,

    /// Only print the N highest-scoring attributes (implies --ranked)
    #[arg(long)]
    top: Option<usize>,
}

#[derive(Serialize)]
struct Report<'a> {
    checkpoint: &'a str,
    input: &'a str,
    device: String,
    duration_secs: f32,
    scores: Vec<AttributeScore>,
}

fn main() -> Result<()> {
    let _profiling_guard = vove::profiling::init("warn");

    let args = Args::parse();

    let device = parse_device(&args.device)?;
    let config = args.config.as_deref().map(VoveConfig::from_file).transpose()?;

    let model = Vove::from_checkpoint(&args.ckpt_dir, config, device)?;
    let audio = vove::audio::load_wav(&args.sample_dir)?;
    let scores = model.predict(&audio)?;

    let selected: Vec<(&str, f32)> = match (args.top, args.ranked) {
        (Some(n), _) => scores.top(n),
        (None, true) => scores.ranked(),
        (None, false) => scores.iter().collect(),
    };

    match args.format {
        OutputFormat::Text => {
            let width = selected.iter().map(|(name, _)| name.len()).max().unwrap_or(0);
            for (name, score) in &selected {
                println!("{name:<width$}  {score:.6}");
            }
        }
        OutputFormat::Json => {
            let report = Report {
                checkpoint: &args.ckpt_dir,
                input: &args.sample_dir,
                device: device_info(model.device()),
                duration_secs: audio.duration(),
                scores: selected
                    .iter()
                    .map(|&(attribute, score)| AttributeScore {
                        attribute: attribute.to_string(),
                        score,
                    })
                    .collect(),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    eprintln!("Prediction completed");
    Ok(())
}
