//! Command-line interface for inspecting rotary position embeddings.
//!
//! # Usage
//!
//! ```bash
//! # Sin/cos values for 4 positions of a 4-dim rotary head
//! mistral-rope --head-dim 4 table --seq-len 4
//!
//! # Two rows, the second left-padded by two tokens
//! mistral-rope --head-dim 4 table --seq-len 4 --batch 2 --padding 0,2
//!
//! # Rotate a vector at every position
//! mistral-rope --head-dim 4 rotate --values 1,2,3,4 --seq-len 3
//!
//! # Rotate only at decode position 2, in bf16
//! mistral-rope --head-dim 4 --dtype bf16 rotate --values 1,2,3,4 --seq-len 3 --position 2
//!
//! # Rotary settings from a model config
//! mistral-rope --config params.json table --seq-len 8
//! ```

mod args;

use anyhow::{Context, Result, bail};
use candle_core::{DType, Device, Tensor};
use clap::Parser;
use mistral_rope::nn::rope::batch::make_rotary_values;
use mistral_rope::nn::rope::position::rotary_values_at_position;
use mistral_rope::nn::rope::{RotaryValues, apply_rotary_emb};

use args::{Cli, Command};

fn parse_device(name: &str) -> Result<Device> {
    let device = match name {
        "cpu" => Device::Cpu,
        "cuda" | "cuda:0" => {
            #[cfg(feature = "cuda")]
            {
                Device::new_cuda(0)?
            }
            #[cfg(not(feature = "cuda"))]
            {
                bail!("CUDA support not compiled. Rebuild with --features cuda")
            }
        }
        "metal" => {
            #[cfg(feature = "metal")]
            {
                Device::new_metal(0)?
            }
            #[cfg(not(feature = "metal"))]
            {
                bail!("Metal support not compiled. Rebuild with --features metal")
            }
        }
        other => bail!("Unknown device: {}. Use cpu, cuda, or metal", other),
    };
    Ok(device)
}

fn parse_dtype(name: &str) -> Result<DType> {
    let dtype = match name {
        "f32" | "float32" => DType::F32,
        "f16" | "float16" | "half" => DType::F16,
        "bf16" | "bfloat16" => DType::BF16,
        other => bail!("Unknown dtype: {}. Use f32, f16, or bf16", other),
    };
    Ok(dtype)
}

fn rotary_values_json(values: &RotaryValues) -> Result<serde_json::Value> {
    Ok(serde_json::json!({
        "shape": values.sin().dims(),
        "sin": values.sin().to_vec3::<f32>()?,
        "cos": values.cos().to_vec3::<f32>()?,
    }))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing subscriber if --tracing flag is passed
    if cli.tracing {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
            )
            .init();
    }

    let device = parse_device(&cli.device)?;
    let dtype = parse_dtype(&cli.dtype)?;
    let config = cli
        .to_rope_config()
        .context("Failed to resolve rope config")?;
    tracing::debug!(?device, ?dtype, head_dim = config.head_dim, "Resolved settings");

    let output = match &cli.command {
        Command::Table {
            seq_len,
            batch,
            padding,
        } => {
            let values =
                make_rotary_values(padding.as_deref(), *batch, *seq_len, &config, &device)
                    .context("Failed to build rotary values")?;
            rotary_values_json(&values)?
        }
        Command::Rotate {
            values,
            seq_len,
            position,
        } => {
            if values.len() != config.head_dim {
                bail!(
                    "Expected {} vector components for head dim {}, got {}",
                    config.head_dim,
                    config.head_dim,
                    values.len()
                );
            }
            let rotary_values = make_rotary_values(None, 1, *seq_len, &config, &device)
                .context("Failed to build rotary values")?;
            let (rotary_values, steps) = match position {
                Some(position) => (
                    rotary_values_at_position(&rotary_values, *position)
                        .context("Failed to select decode position")?,
                    1,
                ),
                None => (rotary_values, *seq_len),
            };

            let m = Tensor::from_slice(values.as_slice(), (1, 1, config.head_dim), &device)?
                .to_dtype(dtype)?
                .repeat((1, steps, 1))?;
            let rotated = apply_rotary_emb(&m, &rotary_values)?;
            let rotated = rotated.to_dtype(DType::F32)?.squeeze(0)?.to_vec2::<f32>()?;

            serde_json::json!({
                "dtype": format!("{dtype:?}"),
                "position": position,
                "rotated": rotated,
            })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);

    #[cfg(feature = "timing")]
    mistral_rope::nn::timing::print_timings();

    Ok(())
}
