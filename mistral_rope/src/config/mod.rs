//! Configuration types for rotary position embeddings.

pub mod rope_config;
