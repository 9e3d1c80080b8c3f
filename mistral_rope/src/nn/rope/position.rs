//! Rotary values for the current decode step(s).
//!
//! During incremental decoding only the newly generated token needs rotating,
//! so the batched table built for the whole sequence is narrowed to the
//! requested position(s) instead of being recomputed.

use candle_core::Tensor;

use crate::error::{Error, Result};
use crate::nn::rope::RotaryValues;
use crate::timed;

/// Which positions to select from a batched rotary table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Positions {
    /// Same position for every row.
    Shared(usize),
    /// One position per row, for rows advancing at different offsets.
    PerRow(Vec<usize>),
    /// `k` positions per row; every row must list the same number.
    PerRowMany(Vec<Vec<usize>>),
}

impl From<usize> for Positions {
    fn from(position: usize) -> Self {
        Positions::Shared(position)
    }
}

impl From<Vec<usize>> for Positions {
    fn from(positions: Vec<usize>) -> Self {
        Positions::PerRow(positions)
    }
}

impl From<&[usize]> for Positions {
    fn from(positions: &[usize]) -> Self {
        Positions::PerRow(positions.to_vec())
    }
}

impl From<Vec<Vec<usize>>> for Positions {
    fn from(positions: Vec<Vec<usize>>) -> Self {
        Positions::PerRowMany(positions)
    }
}

impl Positions {
    /// Number of positions selected per row.
    pub fn per_row(&self) -> usize {
        match self {
            Positions::Shared(_) | Positions::PerRow(_) => 1,
            Positions::PerRowMany(rows) => rows.first().map_or(0, Vec::len),
        }
    }

    /// Flatten to (batch * per_row) source indices, validating every entry.
    fn to_indices(&self, batch: usize, seq_len: usize) -> Result<Vec<u32>> {
        let check = |position: usize| -> Result<u32> {
            if position >= seq_len {
                return Err(Error::PositionOutOfRange { position, seq_len });
            }
            Ok(position as u32)
        };

        match self {
            Positions::Shared(position) => Ok(vec![check(*position)?; batch]),
            Positions::PerRow(positions) => {
                if positions.len() != batch {
                    return Err(Error::shape(
                        "position",
                        format!("{} positions for batch size {batch}", positions.len()),
                    ));
                }
                positions.iter().map(|&p| check(p)).collect()
            }
            Positions::PerRowMany(rows) => {
                if rows.len() != batch {
                    return Err(Error::shape(
                        "position",
                        format!("{} position rows for batch size {batch}", rows.len()),
                    ));
                }
                let k = self.per_row();
                if k == 0 || rows.iter().any(|row| row.len() != k) {
                    return Err(Error::shape(
                        "position",
                        "every row must select the same, non-zero number of positions",
                    ));
                }
                rows.iter().flatten().map(|&p| check(p)).collect()
            }
        }
    }
}

/// Gather `per_row` sequence positions for every row of a (batch, seq_len, dim) tensor.
///
/// `indices` is row-major (batch, per_row). Returns (batch, per_row, dim).
pub(crate) fn gather_positions(t: &Tensor, indices: &[u32], per_row: usize) -> Result<Tensor> {
    let (batch, _seq_len, dim) = t.dims3()?;
    let index = Tensor::from_slice(indices, (batch, per_row), t.device())?
        .unsqueeze(2)?
        .broadcast_as((batch, per_row, dim))?
        .contiguous()?;
    Ok(t.gather(&index, 1)?)
}

/// Narrow batched rotary values to the selected position(s).
///
/// Args:
///   rotary_values: sin/cos of shape (batch, seq_len, head_dim)
///   position: A shared position, one per row, or `k` per row
///
/// Returns:
///   RotaryValues of shape (batch, k, head_dim), `k = 1` unless `PerRowMany`,
///   ready to rotate a (batch, .., k, head_dim) step
pub fn rotary_values_at_position(
    rotary_values: &RotaryValues,
    position: impl Into<Positions>,
) -> Result<RotaryValues> {
    let position = position.into();
    timed!(POSITION_TIME_US, POSITION_CALLS, {
        let (batch, seq_len, _head_dim) = rotary_values.dims()?;
        let indices = position.to_indices(batch, seq_len)?;
        tracing::trace!(?position, seq_len, "Selecting rotary values at position");

        if let Positions::Shared(p) = position {
            let sin = rotary_values.sin().narrow(1, p, 1)?;
            let cos = rotary_values.cos().narrow(1, p, 1)?;
            return RotaryValues::new(sin, cos);
        }

        let per_row = position.per_row();
        let sin = gather_positions(rotary_values.sin(), &indices, per_row)?;
        let cos = gather_positions(rotary_values.cos(), &indices, per_row)?;
        RotaryValues::new(sin, cos)
    })
}
