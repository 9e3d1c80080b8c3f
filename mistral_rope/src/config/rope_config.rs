//! Rotary embedding configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Rotary feature dimension used by Mistral attention heads.
pub const DEFAULT_HEAD_DIM: usize = 128;

/// Frequency base used by Mistral.
pub const DEFAULT_ROPE_THETA: f64 = 10000.0;

/// Configuration for rotary position embeddings.
///
/// Threaded explicitly through every table and rotation call so several
/// rotary setups (e.g. different head dimensions) can coexist.
///
/// # JSON Compatibility
///
/// Model configs spell these fields differently; `rotary_dim` is accepted for
/// `head_dim` and `theta` for `rope_theta`. Missing fields take the Mistral
/// defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RopeConfig {
    /// Number of rotated features per head. Must be even.
    #[serde(default = "default_head_dim", alias = "rotary_dim")]
    pub head_dim: usize,

    /// Base of the geometric frequency progression.
    #[serde(default = "default_rope_theta", alias = "theta")]
    pub rope_theta: f64,
}

fn default_head_dim() -> usize {
    DEFAULT_HEAD_DIM
}

fn default_rope_theta() -> f64 {
    DEFAULT_ROPE_THETA
}

impl Default for RopeConfig {
    fn default() -> Self {
        Self {
            head_dim: DEFAULT_HEAD_DIM,
            rope_theta: DEFAULT_ROPE_THETA,
        }
    }
}

impl RopeConfig {
    /// Create a config with the default theta.
    pub fn with_head_dim(head_dim: usize) -> Self {
        Self {
            head_dim,
            ..Self::default()
        }
    }

    /// Half of the rotary dimension, i.e. the number of frequency bands.
    pub fn half_dim(&self) -> usize {
        self.head_dim / 2
    }

    /// Check the invariants every table and rotation relies on.
    pub fn validate(&self) -> Result<()> {
        if self.head_dim == 0 {
            return Err(Error::InvalidConfig {
                reason: "head_dim must be positive".to_string(),
            });
        }
        if self.head_dim % 2 != 0 {
            return Err(Error::OddFeatureDim {
                op: "rope-config",
                dim: self.head_dim,
            });
        }
        if !self.rope_theta.is_finite() || self.rope_theta <= 0.0 {
            return Err(Error::InvalidConfig {
                reason: format!("rope_theta must be positive and finite, got {}", self.rope_theta),
            });
        }
        Ok(())
    }

    /// Load and validate a config from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        tracing::debug!(
            path = %path.as_ref().display(),
            head_dim = config.head_dim,
            rope_theta = config.rope_theta,
            "Loaded rope config"
        );
        Ok(config)
    }
}
