//! Neural network layer primitives
//!
//! Building blocks the TRM is assembled from:
//! - Multi-head self-attention (bidirectional, fused QKV)
//! - Positional encodings (RoPE, learned)
//! - Activations (SwiGLU)
//! - RMS normalization
//! - Embeddings with automatic dtype casting

pub mod activations;
pub mod attention;
pub mod embeddings;
pub mod normalization;
pub mod positional;

pub use activations::{CastedLinear, SwiGLU};
pub use attention::Attention;
pub use embeddings::{CastedEmbedding, PuzzleEmbedding};
pub use positional::{LearnedPositionalEmbedding, RotaryEmbedding};
