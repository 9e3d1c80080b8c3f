//! Error types for rotary embedding operations.
//!
//! Every operation validates its preconditions and returns one of these
//! variants instead of panicking, so callers get a diagnostic they can act on.

use candle_core::DType;

/// Crate result type
pub type Result<T> = std::result::Result<T, Error>;

/// Rotary embedding errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Error from candle tensor operations
    #[error(transparent)]
    Candle(#[from] candle_core::Error),

    /// A tensor had the wrong dtype for the operation
    #[error("{op}: dtype mismatch, expected {expected:?}, got {got:?}")]
    DTypeMismatch {
        /// Operation that rejected the tensor
        op: &'static str,
        /// Expected dtype
        expected: DType,
        /// Actual dtype
        got: DType,
    },

    /// The rotated dimension cannot be split into two halves
    #[error("{op}: feature dimension must be even, got {dim}")]
    OddFeatureDim {
        /// Operation that rejected the dimension
        op: &'static str,
        /// The offending dimension
        dim: usize,
    },

    /// Tensor shapes or index arrays do not line up
    #[error("{op}: shape mismatch, {reason}")]
    ShapeMismatch {
        /// Operation that rejected the shapes
        op: &'static str,
        /// What did not match
        reason: String,
    },

    /// A decode position outside the table
    #[error("position {position} out of range for sequence length {seq_len}")]
    PositionOutOfRange {
        /// Requested position
        position: usize,
        /// Number of positions in the table
        seq_len: usize,
    },

    /// A left-padding amount that would leave no real token in the row
    #[error("padding {padding} for batch row {row} must be smaller than sequence length {seq_len}")]
    PaddingOutOfRange {
        /// Batch row
        row: usize,
        /// Requested padding
        padding: usize,
        /// Sequence length of the table
        seq_len: usize,
    },

    /// A cached embedding was asked for more positions than it holds
    #[error("sequence length {seq_len} exceeds cached maximum {max_seq_len}")]
    SequenceTooLong {
        /// Requested sequence length
        seq_len: usize,
        /// Positions held by the cache
        max_seq_len: usize,
    },

    /// Invalid rotary configuration
    #[error("invalid rope config: {reason}")]
    InvalidConfig {
        /// Why the config was rejected
        reason: String,
    },

    /// I/O error while reading a config file
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON config
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn shape(op: &'static str, reason: impl Into<String>) -> Self {
        Error::ShapeMismatch {
            op,
            reason: reason.into(),
        }
    }
}
