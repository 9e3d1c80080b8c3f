//! Numeric building blocks.
//!
//! - Rotary position embeddings (tables, rotation, padding, decode lookup)
//! - Optional timing instrumentation (`--features timing`)

pub mod rope;
pub mod timing;
