//! Checkpoint loading.
//!
//! Weights come from a single safetensors file whose tensor names match the
//! model's parameter paths. When no checkpoint is available the model can be
//! built with random weights instead, which keeps the full pipeline usable
//! for smoke tests and demos.

use super::act::ActModel;
use crate::config::TRMConfig;
use crate::{Result, TRMError};
use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use std::path::Path;

/// A built model together with how it came to be.
pub struct LoadedModel {
    pub model: ActModel,
    /// Total number of weight values
    pub param_count: usize,
    /// False when the model runs on random weights
    pub checkpoint_loaded: bool,
}

/// Build the model from a safetensors checkpoint.
pub fn load_checkpoint<P: AsRef<Path>>(
    config: &TRMConfig,
    checkpoint_path: P,
    device: &Device,
) -> Result<LoadedModel> {
    let path = checkpoint_path.as_ref();

    let tensors = candle_core::safetensors::load(path, device)
        .map_err(|e| TRMError::Checkpoint(format!("{}: {}", path.display(), e)))?;
    let param_count: usize = tensors.values().map(|t| t.elem_count()).sum();

    log::info!(
        "Loading checkpoint {} ({} tensors, {} parameters)",
        path.display(),
        tensors.len(),
        param_count
    );

    let vb = VarBuilder::from_tensors(tensors, DType::F32, device);
    let model = ActModel::new(config, vb)
        .map_err(|e| TRMError::Checkpoint(format!("{}: {}", path.display(), e)))?;

    Ok(LoadedModel {
        model,
        param_count,
        checkpoint_loaded: true,
    })
}

/// Build the model with random weights.
pub fn random_model(config: &TRMConfig, device: &Device) -> Result<LoadedModel> {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
    let model = ActModel::new(config, vb)?;

    let param_count: usize = varmap.all_vars().iter().map(|v| v.elem_count()).sum();

    log::warn!(
        "No checkpoint loaded, using random weights ({} parameters)",
        param_count
    );

    Ok(LoadedModel {
        model,
        param_count,
        checkpoint_loaded: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Tensor;

    fn small_config() -> TRMConfig {
        TRMConfig {
            hidden_size: 32,
            h_cycles: 1,
            l_cycles: 1,
            l_layers: 1,
            num_heads: 4,
            expansion: 2.0,
            vocab_size: 11,
            seq_len: 16,
            puzzle_emb_ndim: 32,
            num_puzzle_identifiers: 8,
            halt_max_steps: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_random_model_reports_params() -> Result<()> {
        let config = small_config();
        let loaded = random_model(&config, &Device::Cpu)?;

        assert!(!loaded.checkpoint_loaded);
        assert!(loaded.param_count > 0);
        Ok(())
    }

    #[test]
    fn test_checkpoint_round_trip() -> Result<()> {
        let config = small_config();
        let device = Device::Cpu;

        // Build with random weights, save, and load back.
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let _model = ActModel::new(&config, vb)?;

        let dir = tempfile::tempdir()?;
        let path = dir.path().join("model.safetensors");
        varmap.save(&path)?;

        let loaded = load_checkpoint(&config, &path, &device)?;
        assert!(loaded.checkpoint_loaded);

        let expected: usize = varmap.all_vars().iter().map(|v| v.elem_count()).sum();
        assert_eq!(loaded.param_count, expected);

        // The loaded model must run.
        let carry = loaded.model.initial_carry(1)?;
        let batch = crate::models::act::Batch {
            inputs: Tensor::zeros((1, 16), DType::U32, &device)?,
            puzzle_identifiers: Tensor::zeros(1, DType::U32, &device)?,
        };
        let (_, output) = loaded.model.step(&carry, &batch)?;
        assert_eq!(output.logits.dims(), &[1, 16, 11]);

        Ok(())
    }

    #[test]
    fn test_missing_checkpoint_is_an_error() {
        let config = small_config();
        let err = load_checkpoint(&config, "/nonexistent/model.safetensors", &Device::Cpu);
        assert!(matches!(err, Err(TRMError::Checkpoint(_))));
    }

    #[test]
    fn test_mismatched_checkpoint_is_an_error() -> Result<()> {
        let config = small_config();
        let device = Device::Cpu;

        // A file with unrelated tensors cannot satisfy the model.
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let _ = vb.get_with_hints((4, 4), "something_else.weight", candle_nn::Init::Const(0.0))?;

        let dir = tempfile::tempdir()?;
        let path = dir.path().join("wrong.safetensors");
        varmap.save(&path)?;

        let err = load_checkpoint(&config, &path, &device);
        assert!(matches!(err, Err(TRMError::Checkpoint(_))));
        Ok(())
    }
}
