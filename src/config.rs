//! Configuration for the Tiny Recursive Model.
//!
//! Mirrors TinyRecursiveReasoningModel_ACTV1Config with the ARC-AGI
//! serving defaults baked in.

use std::path::Path;

/// Tiny Recursive Model hyperparameters.
///
/// Defaults are the ARC-AGI configuration: a 30x30 grid flattens to 900
/// tokens over a vocabulary of 11 (10 colors plus padding).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct TRMConfig {
    /// Embedding/hidden dimension
    pub hidden_size: usize,

    /// Number of high-level reasoning cycles
    pub h_cycles: usize,

    /// Number of low-level update cycles per H-cycle
    pub l_cycles: usize,

    /// Number of transformer blocks in the shared reasoning module
    pub l_layers: usize,

    /// Number of attention heads
    pub num_heads: usize,

    /// FFN expansion factor (hidden_size * expansion)
    pub expansion: f32,

    /// Positional encoding type: "rope", "learned", or "none"
    pub pos_encodings: String,

    /// Use MLP-only blocks (no attention)
    pub mlp_t: bool,

    /// Maximum steps before the ACT wrapper halts unconditionally
    pub halt_max_steps: usize,

    /// Halt on `q_halt > 0` instead of `q_halt > q_continue`
    pub no_act_continue: bool,

    /// Vocabulary size (10 grid colors + padding)
    pub vocab_size: usize,

    /// Sequence length a grid is flattened and padded to
    pub seq_len: usize,

    /// Dimension of the per-puzzle embedding (0 disables it)
    pub puzzle_emb_ndim: usize,

    /// Size of the puzzle embedding table
    pub num_puzzle_identifiers: usize,

    /// RoPE frequency base
    pub rope_theta: f32,

    /// RMS normalization epsilon
    pub rms_norm_eps: f64,
}

impl Default for TRMConfig {
    fn default() -> Self {
        Self {
            hidden_size: 512,
            h_cycles: 3,
            l_cycles: 6,
            l_layers: 2,
            num_heads: 8,
            expansion: 4.0,
            pos_encodings: "rope".to_string(),
            mlp_t: false,
            halt_max_steps: 16,
            no_act_continue: true,
            vocab_size: 11,
            seq_len: 900, // 30x30 grid max
            puzzle_emb_ndim: 512,
            num_puzzle_identifiers: 1000,
            rope_theta: 10000.0,
            rms_norm_eps: 1e-5,
        }
    }
}

impl TRMConfig {
    /// Validate configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.hidden_size == 0 {
            return Err(crate::TRMError::Config(
                "hidden_size must be > 0".to_string(),
            ));
        }

        if self.num_heads == 0 || self.hidden_size % self.num_heads != 0 {
            return Err(crate::TRMError::Config(
                "hidden_size must be divisible by num_heads".to_string(),
            ));
        }

        if self.h_cycles == 0 || self.l_cycles == 0 || self.l_layers == 0 {
            return Err(crate::TRMError::Config(
                "h_cycles, l_cycles and l_layers must be > 0".to_string(),
            ));
        }

        if self.vocab_size == 0 || self.seq_len == 0 {
            return Err(crate::TRMError::Config(
                "vocab_size and seq_len must be > 0".to_string(),
            ));
        }

        if self.halt_max_steps == 0 {
            return Err(crate::TRMError::Config(
                "halt_max_steps must be > 0".to_string(),
            ));
        }

        if !["rope", "learned", "none"].contains(&self.pos_encodings.as_str()) {
            return Err(crate::TRMError::Config(format!(
                "Invalid pos_encodings: {}. Must be 'rope', 'learned', or 'none'",
                self.pos_encodings
            )));
        }

        Ok(())
    }

    /// Load a configuration from a JSON file.
    ///
    /// Missing fields fall back to the ARC-AGI defaults, so a partial
    /// override file is enough to change one or two knobs.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Get head dimension
    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_heads
    }

    /// Number of sequence positions the puzzle embedding occupies
    pub fn puzzle_emb_len(&self) -> usize {
        self.puzzle_emb_ndim.div_ceil(self.hidden_size)
    }

    /// Full model sequence length: puzzle embedding prefix + grid tokens
    pub fn total_seq_len(&self) -> usize {
        self.puzzle_emb_len() + self.seq_len
    }
}
