//! Per-position sine/cosine tables.

use candle_core::{D, DType, Device, Tensor};

use crate::config::rope_config::RopeConfig;
use crate::error::{Error, Result};
use crate::nn::rope::RotaryValues;
use crate::timed;

/// Compute the inverse frequencies `1 / theta^(2j / head_dim)` for each band.
///
/// Returns a tensor of shape (head_dim/2,) in F32.
pub fn compute_inv_freq(head_dim: usize, rope_theta: f64, device: &Device) -> Result<Tensor> {
    let half_dim = head_dim / 2;
    let inv_freq: Vec<f32> = (0..half_dim)
        .map(|j| 1.0 / (rope_theta.powf(j as f64 * 2.0 / head_dim as f64) as f32))
        .collect();
    Ok(Tensor::from_vec(inv_freq, half_dim, device)?)
}

/// Sine and cosine tables for positions `0..seq_len`.
///
/// Both tensors have shape (seq_len, head_dim) and dtype F32. The feature axis
/// is the half-dim table tiled twice side by side, so feature `f` and
/// `f + head_dim/2` always hold the same angle.
#[derive(Debug, Clone)]
pub struct FrequencyTable {
    sin: Tensor,
    cos: Tensor,
}

impl FrequencyTable {
    /// Build the tables for `seq_len` positions.
    ///
    /// `seq_len == 0` yields empty (0, head_dim) tables.
    pub fn new(seq_len: usize, config: &RopeConfig, device: &Device) -> Result<Self> {
        config.validate()?;
        timed!(TABLE_TIME_US, TABLE_CALLS, {
            let head_dim = config.head_dim;
            tracing::debug!(
                seq_len,
                head_dim,
                rope_theta = config.rope_theta,
                "Building rotary frequency table"
            );

            if seq_len == 0 {
                let empty = Tensor::zeros((0, head_dim), DType::F32, device)?;
                return Ok(Self {
                    sin: empty.clone(),
                    cos: empty,
                });
            }

            let inv_freq = compute_inv_freq(head_dim, config.rope_theta, device)?;
            let positions = Tensor::arange(0u32, seq_len as u32, device)?.to_dtype(DType::F32)?;

            // [seq_len, half_dim]
            let angles = positions
                .unsqueeze(1)?
                .broadcast_mul(&inv_freq.unsqueeze(0)?)?;
            let sin_half = angles.sin()?;
            let cos_half = angles.cos()?;

            // [sin0, sin1, ..] -> [sin0, sin1, .., sin0, sin1, ..]
            let sin = Tensor::cat(&[&sin_half, &sin_half], D::Minus1)?;
            let cos = Tensor::cat(&[&cos_half, &cos_half], D::Minus1)?;
            Ok(Self { sin, cos })
        })
    }

    pub(crate) fn from_parts(sin: Tensor, cos: Tensor) -> Result<Self> {
        if sin.dims() != cos.dims() || sin.rank() != 2 {
            return Err(Error::shape(
                "frequency-table",
                format!("sin {:?} vs cos {:?}", sin.dims(), cos.dims()),
            ));
        }
        Ok(Self { sin, cos })
    }

    pub fn sin(&self) -> &Tensor {
        &self.sin
    }

    pub fn cos(&self) -> &Tensor {
        &self.cos
    }

    pub fn seq_len(&self) -> usize {
        self.sin.dims()[0]
    }

    pub fn head_dim(&self) -> usize {
        self.sin.dims()[1]
    }

    /// Keep only the first `seq_len` positions.
    ///
    /// Angles do not depend on the table length, so this equals a freshly
    /// built table of that length.
    pub fn narrow(&self, seq_len: usize) -> Result<Self> {
        if seq_len > self.seq_len() {
            return Err(Error::SequenceTooLong {
                seq_len,
                max_seq_len: self.seq_len(),
            });
        }
        Self::from_parts(self.sin.narrow(0, 0, seq_len)?, self.cos.narrow(0, 0, seq_len)?)
    }

    /// Replicate the tables over a batch, optionally shifted for left padding.
    ///
    /// See [`crate::nn::rope::batch::make_rotary_values`].
    pub fn to_rotary_values(
        &self,
        padding_len: Option<&[usize]>,
        batch_size: usize,
    ) -> Result<RotaryValues> {
        crate::nn::rope::batch::broadcast_table(self, padding_len, batch_size)
    }
}
