//! Tiny Recursive Model.
//!
//! A small transformer stack applied recursively: the low-level state `z_l`
//! is refined for several cycles against the input, then folded into the
//! high-level state `z_h`. One shared [`ReasoningModule`] performs both
//! updates. The outer ACT wrapper in [`act`] repeats the whole forward pass
//! until the halting head fires.

use crate::config::TRMConfig;
use crate::layers::activations::CastedLinear;
use crate::layers::normalization::rms_norm;
use crate::layers::{
    Attention, CastedEmbedding, LearnedPositionalEmbedding, PuzzleEmbedding, RotaryEmbedding,
    SwiGLU,
};
use candle_core::{DType, Device, Result, Tensor};
use candle_nn::{Init, VarBuilder};

pub mod act;
pub mod loader;

pub use act::ActModel;

/// Recurrent state refined across recursive cycles.
#[derive(Debug, Clone)]
pub struct InnerCarry {
    /// High-level state: [batch, total_seq_len, hidden_size]
    pub z_h: Tensor,
    /// Low-level state: [batch, total_seq_len, hidden_size]
    pub z_l: Tensor,
}

impl InnerCarry {
    pub fn new(z_h: Tensor, z_l: Tensor) -> Self {
        Self { z_h, z_l }
    }

    /// Zeroed carry. The first ACT step resets every sequence to the learned
    /// initial states, so the zeros are never read.
    pub fn empty(
        batch_size: usize,
        seq_len: usize,
        hidden_size: usize,
        dtype: DType,
        device: &Device,
    ) -> Result<Self> {
        let z_h = Tensor::zeros((batch_size, seq_len, hidden_size), dtype, device)?;
        let z_l = Tensor::zeros((batch_size, seq_len, hidden_size), dtype, device)?;
        Ok(Self { z_h, z_l })
    }
}

/// Post-norm transformer block: self-attention (skipped in MLP-only mode)
/// and a SwiGLU feed-forward, each followed by RMS norm over the residual.
pub struct TransformerBlock {
    self_attn: Option<Attention>,
    mlp: SwiGLU,
    norm_eps: f64,
}

impl TransformerBlock {
    pub fn new(config: &TRMConfig, vb: VarBuilder) -> Result<Self> {
        let self_attn = if !config.mlp_t {
            Some(Attention::new(
                config.hidden_size,
                config.head_dim(),
                config.num_heads,
                vb.pp("self_attn"),
            )?)
        } else {
            None
        };

        let mlp = SwiGLU::new(config.hidden_size, config.expansion, vb.pp("mlp"))?;

        Ok(Self {
            self_attn,
            mlp,
            norm_eps: config.rms_norm_eps,
        })
    }

    pub fn forward(
        &self,
        hidden_states: &Tensor,
        cos_sin: Option<(&Tensor, &Tensor)>,
    ) -> Result<Tensor> {
        let mut hidden_states = hidden_states.clone();

        if let Some(ref attn) = self.self_attn {
            let attn_out = attn.forward(&hidden_states, cos_sin)?;
            hidden_states = rms_norm(&(hidden_states + attn_out)?, self.norm_eps)?;
        }

        let mlp_out = self.mlp.forward(&hidden_states)?;
        rms_norm(&(hidden_states + mlp_out)?, self.norm_eps)
    }
}

/// Stack of transformer blocks with input injection.
///
/// The same module instance serves as both the L-level and H-level update;
/// only the injection differs.
pub struct ReasoningModule {
    layers: Vec<TransformerBlock>,
}

impl ReasoningModule {
    pub fn new(num_layers: usize, config: &TRMConfig, vb: VarBuilder) -> Result<Self> {
        let mut layers = Vec::with_capacity(num_layers);
        for i in 0..num_layers {
            layers.push(TransformerBlock::new(config, vb.pp(format!("layer_{}", i)))?);
        }

        Ok(Self { layers })
    }

    pub fn forward(
        &self,
        hidden_states: &Tensor,
        input_injection: &Tensor,
        cos_sin: Option<(&Tensor, &Tensor)>,
    ) -> Result<Tensor> {
        let mut hidden_states = (hidden_states + input_injection)?;

        for layer in &self.layers {
            hidden_states = layer.forward(&hidden_states, cos_sin)?;
        }

        Ok(hidden_states)
    }
}

/// The inner recursive model: embeddings, shared reasoning module, output
/// head and the ACT halting head.
pub struct TinyRecursiveModel {
    config: TRMConfig,

    embed_tokens: CastedEmbedding,
    puzzle_emb: Option<PuzzleEmbedding>,
    embed_pos: Option<LearnedPositionalEmbedding>,
    rotary_emb: Option<RotaryEmbedding>,
    embed_scale: f64,

    l_level: ReasoningModule,

    lm_head: CastedLinear,
    q_head: CastedLinear,

    h_init: Tensor,
    l_init: Tensor,

    device: Device,
    dtype: DType,
}

impl TinyRecursiveModel {
    pub fn new(config: &TRMConfig, vb: VarBuilder) -> crate::Result<Self> {
        config.validate()?;

        let device = vb.device().clone();
        let dtype = vb.dtype();
        let total_seq_len = config.total_seq_len();

        let embed_init_std = 1.0 / (config.hidden_size as f64).sqrt();
        let embed_scale = (config.hidden_size as f64).sqrt();

        let embed_tokens = CastedEmbedding::new(
            config.vocab_size,
            config.hidden_size,
            embed_init_std,
            vb.pp("embed_tokens"),
            dtype,
        )?;

        // Zero-initialized per-puzzle prefix, only when enabled
        let puzzle_emb = if config.puzzle_emb_ndim > 0 {
            Some(PuzzleEmbedding::new(
                config.num_puzzle_identifiers,
                config.puzzle_emb_ndim,
                config.hidden_size,
                vb.pp("puzzle_emb"),
                dtype,
            )?)
        } else {
            None
        };

        let embed_pos = if config.pos_encodings == "learned" {
            Some(LearnedPositionalEmbedding::new(
                total_seq_len,
                config.hidden_size,
                vb.pp("embed_pos"),
            )?)
        } else {
            None
        };

        let rotary_emb = if config.pos_encodings == "rope" {
            Some(RotaryEmbedding::new(
                config.head_dim(),
                total_seq_len,
                config.rope_theta,
                &device,
            )?)
        } else {
            None
        };

        let l_level = ReasoningModule::new(config.l_layers, config, vb.pp("l_level"))?;

        let lm_head = CastedLinear::new(
            config.hidden_size,
            config.vocab_size,
            false,
            vb.pp("lm_head"),
        )?;

        // Halting head starts strongly biased against halting so a fresh
        // model runs its full step budget.
        let q_head = CastedLinear::with_const_bias(config.hidden_size, 2, -5.0, vb.pp("q_head"))?;

        let h_init = vb.get_with_hints(
            config.hidden_size,
            "h_init",
            Init::Randn {
                mean: 0.0,
                stdev: 1.0,
            },
        )?;
        let l_init = vb.get_with_hints(
            config.hidden_size,
            "l_init",
            Init::Randn {
                mean: 0.0,
                stdev: 1.0,
            },
        )?;

        Ok(Self {
            config: config.clone(),
            embed_tokens,
            puzzle_emb,
            embed_pos,
            rotary_emb,
            embed_scale,
            l_level,
            lm_head,
            q_head,
            h_init,
            l_init,
            device,
            dtype,
        })
    }

    pub fn config(&self) -> &TRMConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Zeroed carry sized for the full sequence (puzzle prefix + grid).
    pub fn empty_carry(&self, batch_size: usize) -> Result<InnerCarry> {
        InnerCarry::empty(
            batch_size,
            self.config.total_seq_len(),
            self.config.hidden_size,
            self.dtype,
            &self.device,
        )
    }

    /// Reset sequences flagged in `reset_flag` (u8, `[batch]`) back to the
    /// learned initial states, leaving the rest of the carry untouched.
    pub fn reset_carry(&self, reset_flag: &Tensor, carry: &InnerCarry) -> Result<InnerCarry> {
        let (batch_size, seq_len, hidden_size) = carry.z_h.dims3()?;
        let shape = (batch_size, seq_len, hidden_size);

        let cond = reset_flag
            .reshape((batch_size, 1, 1))?
            .broadcast_as(shape)?;

        let h_init = self
            .h_init
            .to_dtype(carry.z_h.dtype())?
            .reshape((1, 1, hidden_size))?
            .broadcast_as(shape)?;
        let l_init = self
            .l_init
            .to_dtype(carry.z_l.dtype())?
            .reshape((1, 1, hidden_size))?
            .broadcast_as(shape)?;

        let z_h = cond.where_cond(&h_init, &carry.z_h)?;
        let z_l = cond.where_cond(&l_init, &carry.z_l)?;

        Ok(InnerCarry::new(z_h, z_l))
    }

    /// Token embedding with the puzzle prefix and positional information
    /// folded in. Returns `[batch, total_seq_len, hidden_size]`.
    fn input_embeddings(&self, input: &Tensor, puzzle_identifiers: &Tensor) -> Result<Tensor> {
        let mut embedding = self.embed_tokens.forward(input)?;

        if let Some(ref puzzle_emb) = self.puzzle_emb {
            let prefix = puzzle_emb.forward(puzzle_identifiers)?;
            embedding = Tensor::cat(&[&prefix, &embedding], 1)?;
        }

        if let Some(ref embed_pos) = self.embed_pos {
            embedding = embed_pos.forward(&embedding)?;
        }

        embedding.affine(self.embed_scale, 0.0)
    }

    /// One full recursive pass.
    ///
    /// `input` is `[batch, seq_len]` token IDs, `puzzle_identifiers` is
    /// `[batch]`. Returns the updated carry, logits over the grid positions
    /// (`[batch, seq_len, vocab_size]`, puzzle prefix removed) and the
    /// halt/continue logits (`[batch]` each, f32).
    pub fn forward(
        &self,
        carry: &InnerCarry,
        input: &Tensor,
        puzzle_identifiers: &Tensor,
    ) -> Result<(InnerCarry, Tensor, (Tensor, Tensor))> {
        let total_seq_len = self.config.total_seq_len();

        let cos_sin = if let Some(ref rope) = self.rotary_emb {
            Some(rope.forward_with_len(total_seq_len)?)
        } else {
            None
        };
        let cos_sin = cos_sin.as_ref().map(|(c, s)| (c, s));

        let input_embeddings = self.input_embeddings(input, puzzle_identifiers)?;

        let mut z_h = carry.z_h.clone();
        let mut z_l = carry.z_l.clone();

        // Each H-cycle refines z_l against (z_h + input) for l_cycles, then
        // folds z_l into z_h with the same shared module.
        for _h_step in 0..self.config.h_cycles {
            let injection = (&z_h + &input_embeddings)?;
            for _l_step in 0..self.config.l_cycles {
                z_l = self.l_level.forward(&z_l, &injection, cos_sin)?;
            }

            z_h = self.l_level.forward(&z_h, &z_l, cos_sin)?;
        }

        // Logits over grid positions only; the puzzle prefix is dropped.
        let puzzle_emb_len = self.config.puzzle_emb_len();
        let grid_states = z_h.narrow(1, puzzle_emb_len, self.config.seq_len)?;
        let logits = self.lm_head.forward(&grid_states)?;

        // Halting signal reads the first position of z_h.
        let q_input = z_h.narrow(1, 0, 1)?.squeeze(1)?;
        let q_logits = self.q_head.forward(&q_input)?.to_dtype(DType::F32)?;
        let q_halt = q_logits.narrow(1, 0, 1)?.squeeze(1)?;
        let q_continue = q_logits.narrow(1, 1, 1)?.squeeze(1)?;

        let new_carry = InnerCarry::new(z_h, z_l);

        Ok((new_carry, logits, (q_halt, q_continue)))
    }
}
