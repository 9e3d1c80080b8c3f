//! Precomputed rotary embedding reused across forward passes.

use candle_core::{D, Device, Tensor};

use crate::config::rope_config::RopeConfig;
use crate::error::Result;
use crate::nn::rope::position::{Positions, rotary_values_at_position};
use crate::nn::rope::table::FrequencyTable;
use crate::nn::rope::{RotaryValues, apply_rotary_pos_emb};

/// Rotary embedding with a table precomputed up to `max_seq_len`.
///
/// Building the table is the only trigonometric work; every forward call
/// narrows it, which is bit-identical to building a table of that length.
#[derive(Debug, Clone)]
pub struct RotaryEmbedding {
    config: RopeConfig,
    table: FrequencyTable,
}

impl RotaryEmbedding {
    /// Create a new rotary embedding.
    ///
    /// Args:
    ///   config: Rotary configuration (head_dim, theta)
    ///   max_seq_len: Maximum sequence length to precompute
    ///   device: Device for table storage
    pub fn new(config: &RopeConfig, max_seq_len: usize, device: &Device) -> Result<Self> {
        let table = FrequencyTable::new(max_seq_len, config, device)?;
        tracing::debug!(
            max_seq_len,
            head_dim = config.head_dim,
            "Precomputed rotary embedding"
        );
        Ok(Self {
            config: config.clone(),
            table,
        })
    }

    pub fn config(&self) -> &RopeConfig {
        &self.config
    }

    pub fn max_seq_len(&self) -> usize {
        self.table.seq_len()
    }

    /// Rotary values for a (possibly left-padded) batch of `seq_len` tokens.
    pub fn rotary_values(
        &self,
        padding_len: Option<&[usize]>,
        batch_size: usize,
        seq_len: usize,
    ) -> Result<RotaryValues> {
        self.table
            .narrow(seq_len)?
            .to_rotary_values(padding_len, batch_size)
    }

    /// Rotary values for the decode step(s) at `position`.
    pub fn at_position(
        &self,
        rotary_values: &RotaryValues,
        position: impl Into<Positions>,
    ) -> Result<RotaryValues> {
        rotary_values_at_position(rotary_values, position)
    }

    /// Rotate a query/key pair of shape (batch, heads, seq_len, head_dim).
    pub fn forward(
        &self,
        q: &Tensor,
        k: &Tensor,
        padding_len: Option<&[usize]>,
    ) -> Result<(Tensor, Tensor)> {
        let (batch_size, seq_len) = (q.dim(0)?, q.dim(D::Minus2)?);
        let values = self.rotary_values(padding_len, batch_size, seq_len)?;
        apply_rotary_pos_emb(q, k, &values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::nn::rope::batch::make_rotary_values;
    use candle_core::DType;

    #[test]
    fn test_cached_matches_fresh() -> Result<()> {
        let device = Device::Cpu;
        let config = RopeConfig::with_head_dim(16);
        let rope = RotaryEmbedding::new(&config, 64, &device)?;
        assert_eq!(rope.max_seq_len(), 64);

        let cached = rope.rotary_values(Some(&[1, 0]), 2, 7)?;
        let fresh = make_rotary_values(Some(&[1, 0]), 2, 7, &config, &device)?;
        assert_eq!(cached.sin().to_vec3::<f32>()?, fresh.sin().to_vec3::<f32>()?);
        assert_eq!(cached.cos().to_vec3::<f32>()?, fresh.cos().to_vec3::<f32>()?);
        Ok(())
    }

    #[test]
    fn test_rejects_long_sequences() -> Result<()> {
        let device = Device::Cpu;
        let rope = RotaryEmbedding::new(&RopeConfig::with_head_dim(8), 4, &device)?;
        assert!(matches!(
            rope.rotary_values(None, 1, 5),
            Err(Error::SequenceTooLong { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_forward() -> Result<()> {
        let device = Device::Cpu;
        let rope = RotaryEmbedding::new(&RopeConfig::with_head_dim(8), 16, &device)?;
        let q = Tensor::randn(0f32, 1.0, (2, 4, 5, 8), &device)?.to_dtype(DType::F16)?;
        let k = Tensor::randn(0f32, 1.0, (2, 2, 5, 8), &device)?.to_dtype(DType::F16)?;
        let (q_embed, k_embed) = rope.forward(&q, &k, Some(&[0, 2]))?;
        assert_eq!(q_embed.dims(), &[2, 4, 5, 8]);
        assert_eq!(k_embed.dims(), &[2, 2, 5, 8]);
        assert_eq!(q_embed.dtype(), DType::F16);

        let values = rope.rotary_values(None, 2, 5)?;
        let step = rope.at_position(&values, 3usize)?;
        assert_eq!(step.dims()?, (2, 1, 8));
        Ok(())
    }
}
