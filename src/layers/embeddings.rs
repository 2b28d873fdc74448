//! Token and puzzle embeddings.

use candle_core::{DType, Module, Result, Tensor};
use candle_nn::{Init, VarBuilder};

/// Embedding table with scaled-normal init and automatic dtype casting.
pub struct CastedEmbedding {
    embedding: candle_nn::Embedding,
    target_dtype: DType,
}

impl CastedEmbedding {
    pub fn new(
        vocab_size: usize,
        hidden_size: usize,
        init_std: f64,
        vb: VarBuilder,
        target_dtype: DType,
    ) -> Result<Self> {
        let weight = vb.get_with_hints(
            (vocab_size, hidden_size),
            "weight",
            Init::Randn {
                mean: 0.0,
                stdev: init_std,
            },
        )?;
        Ok(Self {
            embedding: candle_nn::Embedding::new(weight, hidden_size),
            target_dtype,
        })
    }

    pub fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let output = self.embedding.forward(input)?;
        if output.dtype() != self.target_dtype {
            output.to_dtype(self.target_dtype)
        } else {
            Ok(output)
        }
    }
}

/// Per-puzzle embedding prepended to the token sequence.
///
/// Each puzzle identifier owns a zero-initialized vector of `emb_ndim`
/// values. The vector is zero-padded up to a whole number of hidden-size
/// positions and reshaped to `[batch, emb_len, hidden_size]` so it can be
/// concatenated in front of the token embedding.
pub struct PuzzleEmbedding {
    weight: Tensor,
    emb_ndim: usize,
    emb_len: usize,
    hidden_size: usize,
    target_dtype: DType,
}

impl PuzzleEmbedding {
    pub fn new(
        num_identifiers: usize,
        emb_ndim: usize,
        hidden_size: usize,
        vb: VarBuilder,
        target_dtype: DType,
    ) -> Result<Self> {
        let weight =
            vb.get_with_hints((num_identifiers, emb_ndim), "weight", Init::Const(0.0))?;
        Ok(Self {
            weight,
            emb_ndim,
            emb_len: emb_ndim.div_ceil(hidden_size),
            hidden_size,
            target_dtype,
        })
    }

    /// Number of sequence positions the puzzle embedding occupies.
    pub fn emb_len(&self) -> usize {
        self.emb_len
    }

    /// `puzzle_identifiers` has shape `[batch]` (u32 indices).
    /// Returns `[batch, emb_len, hidden_size]`.
    pub fn forward(&self, puzzle_identifiers: &Tensor) -> Result<Tensor> {
        let batch = puzzle_identifiers.dim(0)?;
        let selected = self.weight.index_select(puzzle_identifiers, 0)?;

        let pad_count = self.emb_len * self.hidden_size - self.emb_ndim;
        let padded = if pad_count > 0 {
            let pad = Tensor::zeros(
                (batch, pad_count),
                selected.dtype(),
                selected.device(),
            )?;
            Tensor::cat(&[&selected, &pad], 1)?
        } else {
            selected
        };

        padded
            .reshape((batch, self.emb_len, self.hidden_size))?
            .to_dtype(self.target_dtype)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use candle_nn::VarMap;

    fn test_vb(device: &Device) -> (VarMap, VarBuilder<'static>) {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        (varmap, vb)
    }

    #[test]
    fn test_casted_embedding_shape() -> Result<()> {
        let device = Device::Cpu;
        let (_varmap, vb) = test_vb(&device);

        let emb = CastedEmbedding::new(11, 64, 0.125, vb, DType::F32)?;
        let input = Tensor::new(&[0u32, 3, 10], &device)?.reshape((1, 3))?;
        let output = emb.forward(&input)?;

        assert_eq!(output.dims(), &[1, 3, 64]);
        Ok(())
    }

    #[test]
    fn test_puzzle_embedding_starts_at_zero() -> Result<()> {
        let device = Device::Cpu;
        let (_varmap, vb) = test_vb(&device);

        let emb = PuzzleEmbedding::new(100, 64, 64, vb, DType::F32)?;
        let ids = Tensor::new(&[0u32, 42], &device)?;
        let output = emb.forward(&ids)?;

        assert_eq!(output.dims(), &[2, 1, 64]);
        let sum = output.abs()?.sum_all()?.to_scalar::<f32>()?;
        assert_eq!(sum, 0.0);
        Ok(())
    }

    #[test]
    fn test_puzzle_embedding_pads_partial_position() -> Result<()> {
        let device = Device::Cpu;
        let (_varmap, vb) = test_vb(&device);

        // 100-dim puzzle vectors over a 64-wide model need two positions
        // with 28 zero-padded values.
        let emb = PuzzleEmbedding::new(10, 100, 64, vb, DType::F32)?;
        assert_eq!(emb.emb_len(), 2);

        let ids = Tensor::new(&[1u32], &device)?;
        let output = emb.forward(&ids)?;
        assert_eq!(output.dims(), &[1, 2, 64]);
        Ok(())
    }
}
