//! Inference engine for ARC-AGI tasks.
//!
//! Bridges the grid world and the model: flattens a test grid to the padded
//! token sequence, drives the ACT halting loop, and decodes the argmax of the
//! final logits back into a grid of the input's dimensions.

use crate::config::TRMConfig;
use crate::data::arc::{ArcTask, Grid};
use crate::models::act::{ActModel, Batch};
use crate::models::loader::{self, LoadedModel};
use crate::{Result, TRMError};
use candle_core::{D, Device, Tensor};
use serde::Serialize;
use std::path::Path;
use std::str::FromStr;

/// Which device to run inference on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevicePreference {
    /// CUDA if available, then Metal, then CPU
    Auto,
    Cpu,
    Cuda,
    Metal,
}

impl DevicePreference {
    /// Resolve to a concrete device, with a label for reporting.
    pub fn resolve(self) -> Result<(Device, &'static str)> {
        match self {
            Self::Auto => {
                if candle_core::utils::cuda_is_available() {
                    Ok((Device::new_cuda(0)?, "cuda"))
                } else if candle_core::utils::metal_is_available() {
                    Ok((Device::new_metal(0)?, "metal"))
                } else {
                    Ok((Device::Cpu, "cpu"))
                }
            }
            Self::Cpu => Ok((Device::Cpu, "cpu")),
            Self::Cuda => Ok((Device::new_cuda(0)?, "cuda")),
            Self::Metal => Ok((Device::new_metal(0)?, "metal")),
        }
    }
}

impl FromStr for DevicePreference {
    type Err = TRMError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" => Ok(Self::Cuda),
            "metal" => Ok(Self::Metal),
            other => Err(TRMError::Config(format!(
                "Unknown device '{}'. Must be 'auto', 'cpu', 'cuda', or 'metal'",
                other
            ))),
        }
    }
}

/// Knobs for a solve call.
#[derive(Debug, Clone)]
pub struct SolveOptions {
    /// Upper bound on reasoning steps per test input
    pub max_steps: usize,
    /// Record the prediction after every step
    pub show_iterations: bool,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            max_steps: 16,
            show_iterations: false,
        }
    }
}

/// Intermediate prediction captured after one reasoning step.
#[derive(Debug, Clone, Serialize)]
pub struct Iteration {
    /// 1-based step number
    pub step: usize,
    pub prediction: Grid,
}

/// Final prediction for one test input.
#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    pub prediction: Grid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iterations: Option<Vec<Iteration>>,
}

/// A loaded model ready to solve tasks.
pub struct InferenceEngine {
    model: ActModel,
    device_label: &'static str,
    param_count: usize,
    checkpoint_loaded: bool,
}

impl InferenceEngine {
    /// Build the engine, loading the checkpoint when one is given and its
    /// file exists. A missing file falls back to random weights with a
    /// warning; an unreadable or mismatched file is an error.
    pub fn new(
        config: &TRMConfig,
        checkpoint_path: Option<&Path>,
        device: DevicePreference,
    ) -> Result<Self> {
        let (device, device_label) = device.resolve()?;
        log::info!("Using device: {}", device_label);

        let LoadedModel {
            model,
            param_count,
            checkpoint_loaded,
        } = match checkpoint_path {
            Some(path) if path.exists() => loader::load_checkpoint(config, path, &device)?,
            Some(path) => {
                log::warn!("Checkpoint {} not found", path.display());
                loader::random_model(config, &device)?
            }
            None => loader::random_model(config, &device)?,
        };

        Ok(Self {
            model,
            device_label,
            param_count,
            checkpoint_loaded,
        })
    }

    pub fn config(&self) -> &TRMConfig {
        self.model.config()
    }

    pub fn device_label(&self) -> &str {
        self.device_label
    }

    pub fn param_count(&self) -> usize {
        self.param_count
    }

    pub fn checkpoint_loaded(&self) -> bool {
        self.checkpoint_loaded
    }

    /// Solve every test input of a task, one at a time.
    pub fn solve(&self, task: &ArcTask, options: &SolveOptions) -> Result<Vec<Prediction>> {
        if options.max_steps == 0 {
            return Err(TRMError::Task("max_steps must be at least 1".to_string()));
        }

        let mut predictions = Vec::with_capacity(task.test.len());
        for (test_idx, test_input) in task.test.iter().enumerate() {
            predictions.push(self.solve_input(&test_input.input, test_idx, options)?);
        }
        Ok(predictions)
    }

    /// Run the halting loop on a single grid. `test_idx` doubles as the
    /// puzzle identifier.
    fn solve_input(
        &self,
        grid: &Grid,
        test_idx: usize,
        options: &SolveOptions,
    ) -> Result<Prediction> {
        let height = grid.len();
        let width = grid.first().map(|row| row.len()).unwrap_or(0);
        if height == 0 || width == 0 {
            return Err(TRMError::Task("cannot solve an empty grid".to_string()));
        }

        let inputs = self.encode_grid(grid)?;
        let puzzle_identifiers = Tensor::new(&[test_idx as u32], self.model.device())?;
        let batch = Batch {
            inputs,
            puzzle_identifiers,
        };

        let mut carry = self.model.initial_carry(1)?;
        let mut iterations = Vec::new();
        let mut last_logits = None;

        for step in 0..options.max_steps {
            let (next_carry, output) = self.model.step(&carry, &batch)?;
            carry = next_carry;

            if options.show_iterations {
                iterations.push(Iteration {
                    step: step + 1,
                    prediction: decode_logits(&output.logits, height, width)?,
                });
            }

            let halted = output.halted[0];
            last_logits = Some(output.logits);
            if halted {
                break;
            }
        }

        // max_steps >= 1 guarantees at least one pass.
        let logits = last_logits
            .ok_or_else(|| TRMError::Model("no reasoning step produced output".to_string()))?;
        let prediction = decode_logits(&logits, height, width)?;

        Ok(Prediction {
            prediction,
            iterations: options.show_iterations.then_some(iterations),
        })
    }

    /// Flatten a grid row-major and zero-pad to the model's sequence length.
    /// Returns `[1, seq_len]` token IDs.
    fn encode_grid(&self, grid: &Grid) -> Result<Tensor> {
        let seq_len = self.config().seq_len;
        let cells = grid.iter().map(|row| row.len()).sum::<usize>();
        if cells > seq_len {
            return Err(TRMError::Task(format!(
                "grid has {} cells but the model accepts at most {}",
                cells, seq_len
            )));
        }

        let mut tokens = Vec::with_capacity(seq_len);
        for row in grid {
            tokens.extend(row.iter().map(|&cell| cell as u32));
        }
        tokens.resize(seq_len, 0);

        Ok(Tensor::from_vec(tokens, (1, seq_len), self.model.device())?)
    }
}

/// Argmax-decode the first `height * width` positions of `[1, seq_len, vocab]`
/// logits into a grid.
fn decode_logits(logits: &Tensor, height: usize, width: usize) -> Result<Grid> {
    let preds = logits.squeeze(0)?.argmax(D::Minus1)?.to_vec1::<u32>()?;

    let mut grid = Vec::with_capacity(height);
    for row_idx in 0..height {
        let start = row_idx * width;
        let row = preds[start..start + width]
            .iter()
            .map(|&v| v as u8)
            .collect();
        grid.push(row);
    }
    Ok(grid)
}
