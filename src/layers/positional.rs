//! Positional encodings.
//!
//! Two schemes are supported, selected by `pos_encodings` in the model config:
//! rotary embeddings applied inside attention, or a learned additive table
//! folded into the input embedding.

use candle_core::{Device, Result, Tensor};
use candle_nn::{Init, VarBuilder};

/// Rotates half the hidden dims: `[x1, x2] -> [-x2, x1]`.
fn rotate_half(x: &Tensor) -> Result<Tensor> {
    let last_dim = x.dims().len() - 1;
    let half = x.dim(last_dim)? / 2;

    let x1 = x.narrow(last_dim, 0, half)?;
    let x2 = x.narrow(last_dim, half, half)?;

    Tensor::cat(&[&x2.neg()?, &x1], last_dim)
}

/// Apply rotary positional embeddings to query and key tensors.
///
/// # Arguments
/// * `q` - Query tensor `[batch, seq_len, num_heads, head_dim]`
/// * `k` - Key tensor `[batch, seq_len, num_heads, head_dim]`
/// * `cos` - Cosine table `[seq_len, head_dim]`
/// * `sin` - Sine table `[seq_len, head_dim]`
pub fn apply_rotary_pos_emb(
    q: &Tensor,
    k: &Tensor,
    cos: &Tensor,
    sin: &Tensor,
) -> Result<(Tensor, Tensor)> {
    let orig_dtype = q.dtype();

    let q = if q.dtype() != cos.dtype() {
        q.to_dtype(cos.dtype())?
    } else {
        q.clone()
    };

    let k = if k.dtype() != cos.dtype() {
        k.to_dtype(cos.dtype())?
    } else {
        k.clone()
    };

    // [seq_len, head_dim] -> [1, seq_len, 1, head_dim] for broadcasting
    let cos = cos.unsqueeze(0)?.unsqueeze(2)?;
    let sin = sin.unsqueeze(0)?.unsqueeze(2)?;

    // q_embed = (q * cos) + (rotate_half(q) * sin), same for k
    let q_embed = q
        .broadcast_mul(&cos)?
        .add(&rotate_half(&q)?.broadcast_mul(&sin)?)?;
    let k_embed = k
        .broadcast_mul(&cos)?
        .add(&rotate_half(&k)?.broadcast_mul(&sin)?)?;

    let q_embed = if q_embed.dtype() != orig_dtype {
        q_embed.to_dtype(orig_dtype)?
    } else {
        q_embed
    };
    let k_embed = if k_embed.dtype() != orig_dtype {
        k_embed.to_dtype(orig_dtype)?
    } else {
        k_embed
    };

    Ok((q_embed, k_embed))
}

/// Rotary positional embedding with precomputed cos/sin tables.
pub struct RotaryEmbedding {
    cos_cached: Tensor,
    sin_cached: Tensor,
}

impl RotaryEmbedding {
    /// Precompute tables for all positions up to `max_position_embeddings`.
    /// `dim` is the per-head dimension and must be even.
    pub fn new(
        dim: usize,
        max_position_embeddings: usize,
        base: f32,
        device: &Device,
    ) -> Result<Self> {
        // inv_freq[j] = 1 / base^(2j/dim)
        let inv_freq: Vec<f32> = (0..dim)
            .step_by(2)
            .map(|i| 1.0 / base.powf(i as f32 / dim as f32))
            .collect();
        let inv_freq = Tensor::new(inv_freq.as_slice(), device)?;

        let t: Vec<f32> = (0..max_position_embeddings).map(|i| i as f32).collect();
        let t = Tensor::new(t.as_slice(), device)?;

        // Outer product: [max_position_embeddings, dim/2]
        let freqs = t.unsqueeze(1)?.broadcast_mul(&inv_freq.unsqueeze(0)?)?;

        // Duplicate to the full head dim: [max_position_embeddings, dim]
        let emb = Tensor::cat(&[&freqs, &freqs], 1)?;

        Ok(Self {
            cos_cached: emb.cos()?,
            sin_cached: emb.sin()?,
        })
    }

    /// Cos/sin tables truncated to `seq_len` positions.
    pub fn forward_with_len(&self, seq_len: usize) -> Result<(Tensor, Tensor)> {
        let cos = self.cos_cached.narrow(0, 0, seq_len)?;
        let sin = self.sin_cached.narrow(0, 0, seq_len)?;
        Ok((cos, sin))
    }
}

/// Learned additive positional table.
///
/// The table is added to the token embedding and the sum is rescaled by
/// 1/sqrt(2) so the combined embedding keeps unit variance.
pub struct LearnedPositionalEmbedding {
    weight: Tensor,
}

impl LearnedPositionalEmbedding {
    pub fn new(seq_len: usize, hidden_size: usize, vb: VarBuilder) -> Result<Self> {
        let init_std = 1.0 / (hidden_size as f64).sqrt();
        let weight = vb.get_with_hints(
            (seq_len, hidden_size),
            "weight",
            Init::Randn {
                mean: 0.0,
                stdev: init_std,
            },
        )?;
        Ok(Self { weight })
    }

    /// `embedding` has shape `[batch, seq_len, hidden_size]` and must match the
    /// table's sequence length.
    pub fn forward(&self, embedding: &Tensor) -> Result<Tensor> {
        let table = self.weight.to_dtype(embedding.dtype())?;
        let summed = embedding.broadcast_add(&table)?;
        summed * std::f64::consts::FRAC_1_SQRT_2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotate_half() -> Result<()> {
        let device = Device::Cpu;

        // [1, 2, 3, 4] -> [-3, -4, 1, 2]
        let x = Tensor::new(&[1.0f32, 2.0, 3.0, 4.0], &device)?.reshape((1, 4))?;
        let rotated = rotate_half(&x)?;

        let expected = Tensor::new(&[-3.0f32, -4.0, 1.0, 2.0], &device)?.reshape((1, 4))?;
        let diff = rotated.sub(&expected)?.abs()?.sum_all()?.to_scalar::<f32>()?;
        assert!(diff < 1e-6, "rotate_half failed");

        Ok(())
    }

    #[test]
    fn test_rotary_tables_shape() -> Result<()> {
        let device = Device::Cpu;

        let rope = RotaryEmbedding::new(64, 512, 10000.0, &device)?;
        let (cos, sin) = rope.forward_with_len(128)?;

        assert_eq!(cos.dims(), &[128, 64]);
        assert_eq!(sin.dims(), &[128, 64]);

        Ok(())
    }

    #[test]
    fn test_apply_rotary_preserves_shape() -> Result<()> {
        let device = Device::Cpu;

        let q = Tensor::randn(0f32, 1.0, (2, 16, 8, 64), &device)?;
        let k = Tensor::randn(0f32, 1.0, (2, 16, 8, 64), &device)?;

        let rope = RotaryEmbedding::new(64, 512, 10000.0, &device)?;
        let (cos, sin) = rope.forward_with_len(16)?;

        let (q_embed, k_embed) = apply_rotary_pos_emb(&q, &k, &cos, &sin)?;

        assert_eq!(q_embed.dims(), q.dims());
        assert_eq!(k_embed.dims(), k.dims());

        Ok(())
    }

    #[test]
    fn test_rotation_preserves_norm() -> Result<()> {
        let device = Device::Cpu;

        let q = Tensor::randn(0f32, 1.0, (1, 8, 2, 32), &device)?;
        let k = Tensor::randn(0f32, 1.0, (1, 8, 2, 32), &device)?;

        let rope = RotaryEmbedding::new(32, 64, 10000.0, &device)?;
        let (cos, sin) = rope.forward_with_len(8)?;
        let (q_embed, _) = apply_rotary_pos_emb(&q, &k, &cos, &sin)?;

        // Rotation is norm-preserving per position.
        let before = q.sqr()?.sum_all()?.to_scalar::<f32>()?;
        let after = q_embed.sqr()?.sum_all()?.to_scalar::<f32>()?;
        assert!(
            (before - after).abs() / before < 1e-4,
            "norm changed: {} vs {}",
            before,
            after
        );

        Ok(())
    }

    #[test]
    fn test_learned_positional_scaling() -> Result<()> {
        let device = Device::Cpu;
        let varmap = candle_nn::VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, candle_core::DType::F32, &device);

        let pos = LearnedPositionalEmbedding::new(16, 32, vb)?;

        // With a zero embedding the output is exactly the scaled table.
        let zeros = Tensor::zeros((1, 16, 32), candle_core::DType::F32, &device)?;
        let out = pos.forward(&zeros)?;
        assert_eq!(out.dims(), &[1, 16, 32]);

        let table_norm = pos.weight.sqr()?.sum_all()?.to_scalar::<f32>()?;
        let out_norm = out.sqr()?.sum_all()?.to_scalar::<f32>()?;
        assert!(
            (out_norm - table_norm * 0.5).abs() / table_norm < 1e-4,
            "expected 1/sqrt(2) scaling"
        );

        Ok(())
    }
}
