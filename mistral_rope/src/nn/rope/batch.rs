//! Batched rotary values with left-padding alignment.
//!
//! In a left-padded batch the first real token of row `b` sits at index
//! `padding_len[b]`. Each row's table is rolled along the sequence axis so
//! that this index sees angle 0:
//!
//! ```text
//! shifted[b, l] = table[(l - padding_len[b]) mod seq_len]
//! ```
//!
//! Real tokens therefore get angles `0, 1, 2, ..` and never a wrapped one;
//! only the (masked) padding slots see the tail of the table.

use candle_core::{Device, Tensor};

use crate::config::rope_config::RopeConfig;
use crate::error::{Error, Result};
use crate::nn::rope::RotaryValues;
use crate::nn::rope::position::gather_positions;
use crate::nn::rope::table::FrequencyTable;
use crate::timed;

/// Build rotary values for a batch.
///
/// Args:
///   padding_len: Optional left-padding per batch row, each `< seq_len`
///   batch_size: Number of rows
///   seq_len: Padded sequence length
///   config: Rotary configuration (head_dim, theta)
///   device: Device for the tables
///
/// Returns:
///   RotaryValues of shape (batch_size, seq_len, head_dim), F32
pub fn make_rotary_values(
    padding_len: Option<&[usize]>,
    batch_size: usize,
    seq_len: usize,
    config: &RopeConfig,
    device: &Device,
) -> Result<RotaryValues> {
    let table = FrequencyTable::new(seq_len, config, device)?;
    broadcast_table(&table, padding_len, batch_size)
}

/// Replicate a frequency table over the batch axis and apply per-row padding shifts.
pub(crate) fn broadcast_table(
    table: &FrequencyTable,
    padding_len: Option<&[usize]>,
    batch_size: usize,
) -> Result<RotaryValues> {
    let (seq_len, head_dim) = (table.seq_len(), table.head_dim());
    let shape = (batch_size, seq_len, head_dim);

    let sin = table.sin().unsqueeze(0)?.broadcast_as(shape)?.contiguous()?;
    let cos = table.cos().unsqueeze(0)?.broadcast_as(shape)?.contiguous()?;

    let Some(padding_len) = padding_len else {
        return RotaryValues::new(sin, cos);
    };

    timed!(PADDING_TIME_US, PADDING_CALLS, {
        let indices = shift_indices(padding_len, batch_size, seq_len)?;
        tracing::trace!(?padding_len, seq_len, "Shifting rotary values for left padding");
        let sin = gather_positions(&sin, &indices, seq_len)?;
        let cos = gather_positions(&cos, &indices, seq_len)?;
        RotaryValues::new(sin, cos)
    })
}

/// Source index for each (row, position) after the left-padding roll.
fn shift_indices(padding_len: &[usize], batch_size: usize, seq_len: usize) -> Result<Vec<u32>> {
    if padding_len.len() != batch_size {
        return Err(Error::shape(
            "padding",
            format!(
                "padding_len has {} entries for batch size {batch_size}",
                padding_len.len()
            ),
        ));
    }

    let mut indices = Vec::with_capacity(batch_size * seq_len);
    for (row, &padding) in padding_len.iter().enumerate() {
        if padding >= seq_len {
            return Err(Error::PaddingOutOfRange {
                row,
                padding,
                seq_len,
            });
        }
        indices.extend((0..seq_len).map(|l| ((l + seq_len - padding) % seq_len) as u32));
    }
    Ok(indices)
}

/// Derive left-padding amounts from the real lengths of a left-padded batch.
///
/// Args:
///   lengths: Number of real tokens per row
///   max_len: Padded sequence length
///
/// Returns:
///   `max_len - lengths[b]` for each row
pub fn padding_from_lengths(lengths: &[usize], max_len: usize) -> Result<Vec<usize>> {
    lengths
        .iter()
        .enumerate()
        .map(|(row, &len)| {
            if len == 0 || len > max_len {
                Err(Error::shape(
                    "padding",
                    format!("row {row} has length {len}, expected 1..={max_len}"),
                ))
            } else {
                Ok(max_len - len)
            }
        })
        .collect()
}
