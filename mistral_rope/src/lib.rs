//! # Mistral RoPE
//!
//! Rotary position embeddings for Mistral-style attention, built on candle.
//!
//! This crate provides:
//! - Sine/cosine frequency tables (`nn::rope::table::FrequencyTable`)
//! - Rotation of query/key batches (`nn::rope::apply_rotary_emb`)
//! - Per-row left-padding alignment (`nn::rope::batch::make_rotary_values`)
//! - Single-position lookup for incremental decoding
//!   (`nn::rope::position::rotary_values_at_position`)
//!
//! ## Example
//!
//! ```no_run
//! use candle_core::{DType, Device, Tensor};
//! use mistral_rope::config::rope_config::RopeConfig;
//! use mistral_rope::nn::rope::{apply_rotary_emb, batch::make_rotary_values};
//!
//! # fn main() -> mistral_rope::error::Result<()> {
//! let device = Device::Cpu;
//! let config = RopeConfig::default();
//! // Two rows, the second one left-padded by three tokens.
//! let values = make_rotary_values(Some(&[0, 3]), 2, 16, &config, &device)?;
//! let q = Tensor::zeros((2, 32, 16, 128), DType::BF16, &device)?;
//! let q = apply_rotary_emb(&q, &values)?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod nn;
