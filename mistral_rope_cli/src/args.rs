use clap::{Parser, Subcommand};
use mistral_rope::config::rope_config::RopeConfig;
use std::path::PathBuf;

/// Mistral RoPE Command Line Interface
///
/// Inspect rotary position embedding tables and rotate vectors with them.
#[derive(Parser, Debug)]
#[command(name = "mistral-rope")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// JSON file with `head_dim` / `rope_theta` (overridden by --head-dim / --theta)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Rotary feature dimension (must be even)
    #[arg(long, global = true)]
    pub head_dim: Option<usize>,

    /// Frequency base
    #[arg(long, global = true)]
    pub theta: Option<f64>,

    /// Device to use (cpu, cuda, metal)
    #[arg(long, global = true, default_value = "cpu")]
    pub device: String,

    /// Data type of rotated vectors (f32, f16, bf16)
    #[arg(long, global = true, default_value = "f32")]
    pub dtype: String,

    /// Enable tracing output (debug logs). Use RUST_LOG env var to filter levels.
    #[arg(long, global = true)]
    pub tracing: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print the sin/cos rotary values for a batch as JSON
    Table {
        /// Number of positions
        #[arg(short, long)]
        seq_len: usize,
        /// Number of batch rows
        #[arg(short, long, default_value = "1")]
        batch: usize,
        /// Left padding per row, comma separated (e.g. 0,2)
        #[arg(short, long, value_delimiter = ',')]
        padding: Option<Vec<usize>>,
    },
    /// Rotate one vector, repeated at every position, and print the result as JSON
    Rotate {
        /// Vector components, comma separated; length must equal the head dim
        #[arg(short, long, value_delimiter = ',', allow_hyphen_values = true, required = true)]
        values: Vec<f32>,
        /// Number of positions
        #[arg(short, long)]
        seq_len: usize,
        /// Only rotate at this decode position
        #[arg(short, long)]
        position: Option<usize>,
    },
}

impl Cli {
    /// Resolve the rotary config: file first, then command-line overrides.
    pub fn to_rope_config(&self) -> mistral_rope::error::Result<RopeConfig> {
        let mut config = match &self.config {
            Some(path) => RopeConfig::from_json_file(path)?,
            None => RopeConfig::default(),
        };
        if let Some(head_dim) = self.head_dim {
            config.head_dim = head_dim;
        }
        if let Some(theta) = self.theta {
            config.rope_theta = theta;
        }
        config.validate()?;
        Ok(config)
    }
}
