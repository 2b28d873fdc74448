//! Adaptive Computation Time wrapper.
//!
//! Wraps the inner recursive model in a halting loop: each step runs one full
//! recursive pass, then a learned Q-head decides per sequence whether to stop
//! or keep refining. Sequences always stop once they hit `halt_max_steps`.
//!
//! Step bookkeeping (step counts, halted flags) lives on the host; only the
//! recurrent states stay on the device.

use super::{InnerCarry, TinyRecursiveModel};
use crate::config::TRMConfig;
use candle_core::{Result, Tensor};
use candle_nn::VarBuilder;

/// One batch of flattened grids.
pub struct Batch {
    /// Token IDs, `[batch, seq_len]` (u32)
    pub inputs: Tensor,
    /// Puzzle identifier per sequence, `[batch]` (u32)
    pub puzzle_identifiers: Tensor,
}

/// Outer carry threaded through the halting loop.
#[derive(Debug, Clone)]
pub struct Carry {
    pub inner: InnerCarry,
    /// Steps taken since the last reset, per sequence
    pub steps: Vec<u32>,
    /// Whether each sequence has halted
    pub halted: Vec<bool>,
}

impl Carry {
    pub fn all_halted(&self) -> bool {
        self.halted.iter().all(|&h| h)
    }
}

/// Output of a single ACT step.
pub struct StepOutput {
    /// Grid logits, `[batch, seq_len, vocab_size]`
    pub logits: Tensor,
    pub q_halt: Vec<f32>,
    pub q_continue: Vec<f32>,
    pub halted: Vec<bool>,
}

/// The inner model plus the halting loop around it.
pub struct ActModel {
    inner: TinyRecursiveModel,
}

impl ActModel {
    pub fn new(config: &TRMConfig, vb: VarBuilder) -> crate::Result<Self> {
        Ok(Self {
            inner: TinyRecursiveModel::new(config, vb)?,
        })
    }

    pub fn config(&self) -> &TRMConfig {
        self.inner.config()
    }

    pub fn device(&self) -> &candle_core::Device {
        self.inner.device()
    }

    /// Carry for a fresh batch. Every sequence starts halted, which makes
    /// the first [`step`](Self::step) reset it to the learned initial states.
    pub fn initial_carry(&self, batch_size: usize) -> Result<Carry> {
        Ok(Carry {
            inner: self.inner.empty_carry(batch_size)?,
            steps: vec![0; batch_size],
            halted: vec![true; batch_size],
        })
    }

    /// One halting-loop step: reset halted sequences, run the recursive
    /// pass, advance step counts and re-evaluate halting.
    pub fn step(&self, carry: &Carry, batch: &Batch) -> Result<(Carry, StepOutput)> {
        let batch_size = carry.halted.len();

        let reset_flag: Vec<u8> = carry.halted.iter().map(|&h| u8::from(h)).collect();
        let reset_flag = Tensor::from_vec(reset_flag, batch_size, self.inner.device())?;
        let inner_carry = self.inner.reset_carry(&reset_flag, &carry.inner)?;

        let (new_inner, logits, (q_halt, q_continue)) =
            self.inner
                .forward(&inner_carry, &batch.inputs, &batch.puzzle_identifiers)?;

        let q_halt = q_halt.to_vec1::<f32>()?;
        let q_continue = q_continue.to_vec1::<f32>()?;

        // Halted sequences restart their count at this step.
        let steps: Vec<u32> = carry
            .halted
            .iter()
            .zip(&carry.steps)
            .map(|(&was_halted, &s)| if was_halted { 1 } else { s + 1 })
            .collect();

        let halted: Vec<bool> = steps
            .iter()
            .zip(q_halt.iter().zip(&q_continue))
            .map(|(&s, (&qh, &qc))| self.halt_decision(s, qh, qc))
            .collect();

        let new_carry = Carry {
            inner: new_inner,
            steps,
            halted: halted.clone(),
        };

        Ok((
            new_carry,
            StepOutput {
                logits,
                q_halt,
                q_continue,
                halted,
            },
        ))
    }

    fn halt_decision(&self, steps: u32, q_halt: f32, q_continue: f32) -> bool {
        let config = self.inner.config();
        if steps >= config.halt_max_steps as u32 {
            return true;
        }
        if config.no_act_continue {
            q_halt > 0.0
        } else {
            q_halt > q_continue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn small_config(halt_max_steps: usize) -> TRMConfig {
        TRMConfig {
            hidden_size: 32,
            h_cycles: 1,
            l_cycles: 2,
            l_layers: 1,
            num_heads: 4,
            expansion: 2.0,
            vocab_size: 11,
            seq_len: 16,
            puzzle_emb_ndim: 32,
            num_puzzle_identifiers: 8,
            halt_max_steps,
            ..Default::default()
        }
    }

    fn build_model(halt_max_steps: usize) -> crate::Result<ActModel> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        ActModel::new(&small_config(halt_max_steps), vb)
    }

    fn test_batch(model: &ActModel, batch_size: usize) -> Result<Batch> {
        let device = model.device();
        let inputs = Tensor::zeros((batch_size, 16), DType::U32, device)?;
        let puzzle_identifiers = Tensor::zeros(batch_size, DType::U32, device)?;
        Ok(Batch {
            inputs,
            puzzle_identifiers,
        })
    }

    #[test]
    fn test_initial_carry_starts_halted() -> crate::Result<()> {
        let model = build_model(4)?;
        let carry = model.initial_carry(3)?;

        assert_eq!(carry.steps, vec![0, 0, 0]);
        assert_eq!(carry.halted, vec![true, true, true]);
        assert!(carry.all_halted());
        Ok(())
    }

    #[test]
    fn test_first_step_restarts_count() -> crate::Result<()> {
        let model = build_model(4)?;
        let batch = test_batch(&model, 2)?;

        let carry = model.initial_carry(2)?;
        let (carry, output) = model.step(&carry, &batch)?;

        assert_eq!(carry.steps, vec![1, 1]);
        assert_eq!(output.logits.dims(), &[2, 16, 11]);
        assert_eq!(output.q_halt.len(), 2);
        assert_eq!(output.q_continue.len(), 2);
        Ok(())
    }

    #[test]
    fn test_loop_halts_within_budget() -> crate::Result<()> {
        let max_steps = 3;
        let model = build_model(max_steps)?;
        let batch = test_batch(&model, 1)?;

        let mut carry = model.initial_carry(1)?;
        let mut taken = 0;
        for _ in 0..max_steps {
            let (next, _) = model.step(&carry, &batch)?;
            carry = next;
            taken += 1;
            if carry.all_halted() {
                break;
            }
        }

        assert!(carry.all_halted(), "must halt after {} steps", max_steps);
        assert!(taken <= max_steps);
        Ok(())
    }

    #[test]
    fn test_step_cap_forces_halt() -> crate::Result<()> {
        let model = build_model(4)?;

        // At the cap the decision is unconditional.
        assert!(model.halt_decision(4, -10.0, 10.0));
        assert!(model.halt_decision(5, -10.0, 10.0));
        Ok(())
    }

    #[test]
    fn test_halt_signal_rules() -> crate::Result<()> {
        let model = build_model(8)?;

        // Default mode halts on a positive halt logit alone.
        assert!(model.config().no_act_continue);
        assert!(model.halt_decision(1, 0.5, 2.0));
        assert!(!model.halt_decision(1, -0.5, -2.0));
        Ok(())
    }

    #[test]
    fn test_halted_sequence_resets_next_step() -> crate::Result<()> {
        let max_steps = 1;
        let model = build_model(max_steps)?;
        let batch = test_batch(&model, 1)?;

        // halt_max_steps = 1 halts every sequence on each step, so the
        // following step must restart the count rather than advance it.
        let carry = model.initial_carry(1)?;
        let (carry, _) = model.step(&carry, &batch)?;
        assert_eq!(carry.steps, vec![1]);
        assert!(carry.all_halted());

        let (carry, _) = model.step(&carry, &batch)?;
        assert_eq!(carry.steps, vec![1], "halted sequence restarts at 1");
        Ok(())
    }
}
