//! Multi-head self-attention.
//!
//! The reasoning module attends over the whole padded grid sequence, so
//! attention is bidirectional (no causal mask) and every query head has its
//! own key/value head.

use super::activations::CastedLinear;
use super::positional::apply_rotary_pos_emb;
use candle_core::{Result, Tensor};
use candle_nn::VarBuilder;

pub struct Attention {
    head_dim: usize,
    output_size: usize,
    num_heads: usize,

    qkv_proj: CastedLinear,
    o_proj: CastedLinear,
}

impl Attention {
    pub fn new(
        hidden_size: usize,
        head_dim: usize,
        num_heads: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let output_size = head_dim * num_heads;

        // Fused projection for Q, K and V
        let qkv_proj = CastedLinear::new(hidden_size, 3 * output_size, false, vb.pp("qkv_proj"))?;
        let o_proj = CastedLinear::new(output_size, hidden_size, false, vb.pp("o_proj"))?;

        Ok(Self {
            head_dim,
            output_size,
            num_heads,
            qkv_proj,
            o_proj,
        })
    }

    /// `hidden_states` is `[batch, seq_len, hidden_size]`; `cos_sin` holds the
    /// rotary tables for exactly `seq_len` positions when RoPE is enabled.
    pub fn forward(
        &self,
        hidden_states: &Tensor,
        cos_sin: Option<(&Tensor, &Tensor)>,
    ) -> Result<Tensor> {
        let (batch_size, seq_len, _) = hidden_states.dims3()?;

        // [batch, seq_len, 3 * num_heads, head_dim]
        let qkv = self.qkv_proj.forward(hidden_states)?.reshape((
            batch_size,
            seq_len,
            3 * self.num_heads,
            self.head_dim,
        ))?;

        let query = qkv.narrow(2, 0, self.num_heads)?;
        let key = qkv.narrow(2, self.num_heads, self.num_heads)?;
        let value = qkv.narrow(2, 2 * self.num_heads, self.num_heads)?;

        let (query, key) = if let Some((cos, sin)) = cos_sin {
            apply_rotary_pos_emb(&query, &key, cos, sin)?
        } else {
            (query, key)
        };

        // [batch, seq_len, num_heads, head_dim] -> [batch, num_heads, seq_len, head_dim]
        let query = query.transpose(1, 2)?.contiguous()?;
        let key = key.transpose(1, 2)?.contiguous()?;
        let value = value.transpose(1, 2)?.contiguous()?;

        let attn_output = scaled_dot_product_attention(&query, &key, &value)?;

        // Back to [batch, seq_len, num_heads * head_dim]
        let attn_output = attn_output
            .transpose(1, 2)?
            .reshape((batch_size, seq_len, self.output_size))?;

        self.o_proj.forward(&attn_output)
    }
}

/// softmax(Q @ K^T / sqrt(d_k)) @ V over the full sequence.
fn scaled_dot_product_attention(query: &Tensor, key: &Tensor, value: &Tensor) -> Result<Tensor> {
    let head_dim = query.dim(3)?;
    let scale = 1.0 / (head_dim as f64).sqrt();

    let scores = (query.matmul(&key.transpose(2, 3)?)? * scale)?;
    let attn_weights = candle_nn::ops::softmax_last_dim(&scores)?;

    attn_weights.matmul(value)
}
