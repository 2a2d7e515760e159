//! Compare the attribute profiles of several audio files.
//!
//! Prints one column of scores per input and, for every pair, the cosine
//! similarity and Euclidean distance of their attribute vectors.
//!
//! Usage:
//!     cargo run --release --bin compare -- --ckpt_dir ckpt/vove.pth a.wav b.wav c.wav
//!     cargo run --release --bin compare -- --ckpt_dir ckpt/vove.pth --sort-by 0 a.wav b.wav

use anyhow::Result;
use clap::Parser;
use std::path::Path;

use vove::{parse_device, AttributeVector, Vove, VoveConfig};

/// Compare voice attributes across WAV files
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input audio files
    #[arg(required = true, num_args = 1..)]
    inputs: Vec<String>,

    /// VOVE checkpoint (.pth or .safetensors)
    #[arg(long = "ckpt_dir", default_value = "ckpt/vove.pth")]
    ckpt_dir: String,

    /// Device for inference (auto, cpu, cuda, cuda:N, metal)
    #[arg(long, default_value = "cpu")]
    device: String,

    /// Model config JSON (defaults to detection from checkpoint shapes)
    #[arg(long)]
    config: Option<String>,

    /// Order rows by the scores of the input at this index
    #[arg(long)]
    sort_by: Option<usize>,
}

/// Short column header from a file path.
fn column_label(path: &str, width: usize) -> String {
    let stem = Path::new(path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(path);
    stem.chars().take(width).collect()
}

fn main() -> Result<()> {
    let _profiling_guard = vove::profiling::init("warn");

    let args = Args::parse();
    if let Some(idx) = args.sort_by {
        if idx >= args.inputs.len() {
            anyhow::bail!(
                "--sort-by {idx} is out of range for {} inputs",
                args.inputs.len()
            );
        }
    }

    let device = parse_device(&args.device)?;
    let config = args.config.as_deref().map(VoveConfig::from_file).transpose()?;
    let model = Vove::from_checkpoint(&args.ckpt_dir, config, device)?;

    let vectors = args
        .inputs
        .iter()
        .map(|path| model.predict_file(path))
        .collect::<Result<Vec<AttributeVector>>>()?;

    let rows: Vec<(&str, usize)> = match args.sort_by {
        Some(idx) => vectors[idx]
            .ranked()
            .into_iter()
            .filter_map(|(name, _)| vove::attributes::attribute_index(name).map(|i| (name, i)))
            .collect(),
        None => vove::ATTRIBUTES.iter().copied().zip(0..).collect(),
    };

    let col = 12;
    print!("{:<16}", "attribute");
    for input in &args.inputs {
        print!(" {:>col$}", column_label(input, col));
    }
    println!();

    for (name, i) in rows {
        print!("{name:<16}");
        for v in &vectors {
            print!(" {:>col$.4}", v[i]);
        }
        println!();
    }

    if vectors.len() > 1 {
        println!();
        println!("{:<40} {:>8} {:>8}", "pair", "cosine", "dist");
        for a in 0..vectors.len() {
            for b in a + 1..vectors.len() {
                let pair = format!(
                    "{} / {}",
                    column_label(&args.inputs[a], 18),
                    column_label(&args.inputs[b], 18)
                );
                println!(
                    "{pair:<40} {:>8.4} {:>8.4}",
                    vectors[a].cosine_similarity(&vectors[b]),
                    vectors[a].euclidean_distance(&vectors[b])
                );
            }
        }
    }

    Ok(())
}
