//! Rotary Position Embeddings (RoPE).
//!
//! Positions are encoded by rotating each feature pair `(x[i], x[i + d/2])`
//! by an angle `pos * theta^(-2i/d)`. The pieces are:
//! - `table`: per-position sine/cosine tables
//! - `batch`: tables replicated per batch row, shifted for left padding
//! - `position`: narrowing a batched table to the current decode step(s)
//! - `embedding`: a precomputed table reused across forward calls
//!
//! Rotation itself is `x * cos + rotate_half(x) * sin`, see [`apply_rotary_emb`].

use candle_core::{D, DType, Tensor};

use crate::error::{Error, Result};
use crate::timed;

pub mod batch;
pub mod embedding;
pub mod position;
pub mod table;

/// Sine and cosine values for a batch, each of shape (batch, seq_len, head_dim).
///
/// Produced by [`batch::make_rotary_values`] or [`position::rotary_values_at_position`]
/// and consumed by [`apply_rotary_emb`]. Immutable once built.
#[derive(Debug, Clone)]
pub struct RotaryValues {
    sin_val: Tensor,
    cos_val: Tensor,
}

impl RotaryValues {
    /// Bundle a sine/cosine pair. Both must be rank 3 with identical shapes.
    pub fn new(sin_val: Tensor, cos_val: Tensor) -> Result<Self> {
        if sin_val.dims() != cos_val.dims() {
            return Err(Error::shape(
                "rotary-values",
                format!("sin {:?} vs cos {:?}", sin_val.dims(), cos_val.dims()),
            ));
        }
        if sin_val.rank() != 3 {
            return Err(Error::shape(
                "rotary-values",
                format!("expected (batch, seq_len, head_dim), got {:?}", sin_val.dims()),
            ));
        }
        Ok(Self { sin_val, cos_val })
    }

    pub fn sin(&self) -> &Tensor {
        &self.sin_val
    }

    pub fn cos(&self) -> &Tensor {
        &self.cos_val
    }

    /// (batch, seq_len, head_dim)
    pub fn dims(&self) -> Result<(usize, usize, usize)> {
        Ok(self.cos_val.dims3()?)
    }

    pub fn into_parts(self) -> (Tensor, Tensor) {
        (self.sin_val, self.cos_val)
    }
}

/// Rotate half of the hidden dimensions.
///
/// Splits the last axis into contiguous halves `(x1, x2)` and returns
/// `cat(-x2, x1)`. Used in the RoPE formula: (x * cos) + (rotate_half(x) * sin)
pub fn rotate_half(x: &Tensor) -> Result<Tensor> {
    let last_dim = x.dim(D::Minus1)?;
    if last_dim % 2 != 0 {
        return Err(Error::OddFeatureDim {
            op: "rotate-half",
            dim: last_dim,
        });
    }
    let half = last_dim / 2;
    let x1 = x.narrow(D::Minus1, 0, half)?;
    let x2 = x.narrow(D::Minus1, half, half)?;
    Ok(Tensor::cat(&[&x2.neg()?, &x1], D::Minus1)?)
}

fn check_f32(op: &'static str, t: &Tensor) -> Result<()> {
    if t.dtype() != DType::F32 {
        return Err(Error::DTypeMismatch {
            op,
            expected: DType::F32,
            got: t.dtype(),
        });
    }
    Ok(())
}

/// Validate `m` against the rotary values and return the table shape broadcast
/// to `m`'s rank: (batch, 1, .., 1, seq_len, head_dim).
fn broadcast_table_shape(op: &'static str, m: &Tensor, values: &RotaryValues) -> Result<Vec<usize>> {
    check_f32(op, values.sin())?;
    check_f32(op, values.cos())?;
    if !m.dtype().is_float() {
        return Err(Error::DTypeMismatch {
            op,
            expected: DType::F32,
            got: m.dtype(),
        });
    }

    let (batch, seq_len, head_dim) = values.dims()?;
    let dims = m.dims();
    let rank = dims.len();
    if rank < 3 {
        return Err(Error::shape(
            op,
            format!("expected (batch, .., seq_len, head_dim), got {dims:?}"),
        ));
    }
    if dims[0] != batch || dims[rank - 2] != seq_len || dims[rank - 1] != head_dim {
        return Err(Error::shape(
            op,
            format!("input {dims:?} vs rotary values ({batch}, {seq_len}, {head_dim})"),
        ));
    }

    let mut shape = Vec::with_capacity(rank);
    shape.push(batch);
    shape.resize(rank - 2, 1);
    shape.extend([seq_len, head_dim]);
    Ok(shape)
}

/// Apply rotary position embedding to a batch of vectors.
///
/// `m` has shape (batch, .., seq_len, head_dim); any middle axes (e.g. heads)
/// are broadcast over. Products are taken in F32 (F64 inputs stay in F64) and
/// each term is cast back to `m`'s dtype before the sum, so low-precision
/// inputs never degrade the trigonometric values.
///
/// Args:
///   m: Vectors to rotate, shape (batch, .., seq_len, head_dim)
///   rotary_values: F32 sin/cos of shape (batch, seq_len, head_dim)
///
/// Returns:
///   Rotated tensor with the shape and dtype of `m`
pub fn apply_rotary_emb(m: &Tensor, rotary_values: &RotaryValues) -> Result<Tensor> {
    timed!(ROPE_TIME_US, ROPE_CALLS, {
        let shape = broadcast_table_shape("rope", m, rotary_values)?;
        let original_dtype = m.dtype();
        let compute_dtype = if original_dtype == DType::F64 {
            DType::F64
        } else {
            DType::F32
        };

        let cos = rotary_values
            .cos()
            .reshape(shape.as_slice())?
            .to_dtype(compute_dtype)?;
        let sin = rotary_values
            .sin()
            .reshape(shape.as_slice())?
            .to_dtype(compute_dtype)?;

        let m_c = m.to_dtype(compute_dtype)?;
        let rotated = rotate_half(&m_c)?;

        let a = m_c.broadcast_mul(&cos)?.to_dtype(original_dtype)?;
        let b = rotated.broadcast_mul(&sin)?.to_dtype(original_dtype)?;
        Ok((a + b)?)
    })
}

/// Apply rotary position embedding to a query/key pair.
///
/// Args:
///   q: Query tensor of shape (batch, heads, seq_len, head_dim)
///   k: Key tensor of shape (batch, kv_heads, seq_len, head_dim)
///   rotary_values: sin/cos of shape (batch, seq_len, head_dim)
///
/// Returns:
///   (q_embed, k_embed) with position information encoded
pub fn apply_rotary_pos_emb(
    q: &Tensor,
    k: &Tensor,
    rotary_values: &RotaryValues,
) -> Result<(Tensor, Tensor)> {
    let q_embed = apply_rotary_emb(q, rotary_values)?;
    let k_embed = apply_rotary_emb(k, rotary_values)?;
    Ok((q_embed, k_embed))
}

/// Apply rotary position embedding with candle-nn's fused kernel.
///
/// Same contract as [`apply_rotary_emb`] for rank-4 (batch, heads, seq_len,
/// head_dim) inputs. The kernel takes half-dim tables in the input's dtype,
/// so for F16/BF16 inputs the sin/cos are rounded before the multiply.
pub fn apply_rotary_emb_fused(m: &Tensor, rotary_values: &RotaryValues) -> Result<Tensor> {
    timed!(ROPE_TIME_US, ROPE_CALLS, {
        broadcast_table_shape("rope-fused", m, rotary_values)?;
        if m.rank() != 4 {
            return Err(Error::shape(
                "rope-fused",
                format!("expected (batch, heads, seq_len, head_dim), got {:?}", m.dims()),
            ));
        }
        let (_batch, _seq_len, head_dim) = rotary_values.dims()?;
        let half = head_dim / 2;

        // Both halves of the table are identical, keep the first.
        let cos = rotary_values
            .cos()
            .narrow(D::Minus1, 0, half)?
            .to_dtype(m.dtype())?
            .contiguous()?;
        let sin = rotary_values
            .sin()
            .narrow(D::Minus1, 0, half)?
            .to_dtype(m.dtype())?
            .contiguous()?;

        let m = m.contiguous()?;
        Ok(candle_nn::rotary_emb::rope(&m, &cos, &sin)?)
    })
}
