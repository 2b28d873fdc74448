//! RMS normalization.
//!
//! The reasoning blocks use post-norm without a learnable scale, so this is a
//! plain function rather than a layer struct.

use candle_core::{DType, Result, Tensor};

/// Root-mean-square normalization over the last dimension.
///
/// The computation runs in f32 regardless of the input dtype and the result is
/// cast back, which keeps the variance estimate stable under f16/bf16.
pub fn rms_norm(hidden_states: &Tensor, variance_epsilon: f64) -> Result<Tensor> {
    let input_dtype = hidden_states.dtype();

    let hidden_states = if input_dtype != DType::F32 {
        hidden_states.to_dtype(DType::F32)?
    } else {
        hidden_states.clone()
    };

    // variance = mean of squares along the hidden dimension
    let variance = hidden_states.sqr()?.mean_keepdim(candle_core::D::Minus1)?;

    // x * rsqrt(variance + eps)
    let normalized = hidden_states.broadcast_div(&(variance + variance_epsilon)?.sqrt()?)?;

    if input_dtype != DType::F32 {
        normalized.to_dtype(input_dtype)
    } else {
        Ok(normalized)
    }
}
