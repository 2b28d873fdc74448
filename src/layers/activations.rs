//! Linear projections and the SwiGLU feed-forward block.

use candle_core::{Result, Tensor};
use candle_nn::{Init, VarBuilder};

/// Smallest multiple of `b` that is >= `a`
fn find_multiple(a: usize, b: usize) -> usize {
    a.div_ceil(b) * b
}

/// Linear layer with automatic dtype casting
///
/// Casts weights and bias to the input dtype before computation, so f32
/// parameters can serve reduced-precision activations unchanged.
pub struct CastedLinear {
    weight: Tensor,
    bias: Option<Tensor>,
}

impl CastedLinear {
    /// Create a new CastedLinear layer
    ///
    /// # Arguments
    /// * `in_features` - Input dimension
    /// * `out_features` - Output dimension
    /// * `bias` - Whether to include a zero-initialized bias
    /// * `vb` - VarBuilder for parameter initialization
    pub fn new(
        in_features: usize,
        out_features: usize,
        bias: bool,
        vb: VarBuilder,
    ) -> Result<Self> {
        let init_ws = candle_nn::init::DEFAULT_KAIMING_NORMAL;
        let weight = vb.get_with_hints((out_features, in_features), "weight", init_ws)?;

        let bias = if bias {
            Some(vb.get_with_hints(out_features, "bias", Init::Const(0.0))?)
        } else {
            None
        };

        Ok(Self { weight, bias })
    }

    /// Create a CastedLinear whose bias starts at a fixed value.
    ///
    /// The ACT halting head uses this: a strongly negative initial bias
    /// keeps a fresh model reasoning for the full step budget instead of
    /// halting on noise.
    pub fn with_const_bias(
        in_features: usize,
        out_features: usize,
        bias_value: f64,
        vb: VarBuilder,
    ) -> Result<Self> {
        let init_ws = candle_nn::init::DEFAULT_KAIMING_NORMAL;
        let weight = vb.get_with_hints((out_features, in_features), "weight", init_ws)?;
        let bias = vb.get_with_hints(out_features, "bias", Init::Const(bias_value))?;

        Ok(Self {
            weight,
            bias: Some(bias),
        })
    }

    /// Forward pass with automatic dtype casting
    pub fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let input_dtype = input.dtype();

        let weight = if self.weight.dtype() != input_dtype {
            self.weight.to_dtype(input_dtype)?
        } else {
            self.weight.clone()
        };

        // input @ weight^T, broadcasting over leading dims
        let output = input.broadcast_matmul(&weight.t()?)?;

        if let Some(ref b) = self.bias {
            let bias = if b.dtype() != input_dtype {
                b.to_dtype(input_dtype)?
            } else {
                b.clone()
            };
            output.broadcast_add(&bias)
        } else {
            Ok(output)
        }
    }
}

/// SwiGLU activation: Swish-Gated Linear Unit
///
/// Formula: down_proj(silu(gate) * up)
pub struct SwiGLU {
    gate_up_proj: CastedLinear,
    down_proj: CastedLinear,
}

impl SwiGLU {
    /// Create a new SwiGLU layer
    ///
    /// # Arguments
    /// * `hidden_size` - Input/output dimension
    /// * `expansion` - Expansion factor for the intermediate dimension
    /// * `vb` - VarBuilder for parameter initialization
    pub fn new(hidden_size: usize, expansion: f32, vb: VarBuilder) -> Result<Self> {
        // Intermediate size rounded up to a multiple of 256
        let inter = find_multiple(
            (expansion * hidden_size as f32 * 2.0 / 3.0).round() as usize,
            256,
        );

        let gate_up_proj = CastedLinear::new(hidden_size, inter * 2, false, vb.pp("gate_up_proj"))?;
        let down_proj = CastedLinear::new(inter, hidden_size, false, vb.pp("down_proj"))?;

        Ok(Self {
            gate_up_proj,
            down_proj,
        })
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let gate_up = self.gate_up_proj.forward(x)?;

        // Split into gate and up halves
        let last_dim = gate_up.dims().len() - 1;
        let inter_size = gate_up.dim(last_dim)? / 2;

        let gate = gate_up.narrow(last_dim, 0, inter_size)?;
        let up = gate_up.narrow(last_dim, inter_size, inter_size)?;

        let gated = candle_nn::ops::silu(&gate)?.mul(&up)?;

        self.down_proj.forward(&gated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::{VarBuilder, VarMap};

    #[test]
    fn test_find_multiple() {
        assert_eq!(find_multiple(100, 256), 256);
        assert_eq!(find_multiple(300, 256), 512);
        assert_eq!(find_multiple(256, 256), 256);
        assert_eq!(find_multiple(1, 256), 256);
    }

    #[test]
    fn test_casted_linear_shape() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let linear = CastedLinear::new(64, 128, true, vb)?;

        let x = Tensor::randn(0f32, 1.0, (2, 16, 64), &device)?;
        let out = linear.forward(&x)?;

        assert_eq!(out.dims(), &[2, 16, 128]);

        Ok(())
    }

    #[test]
    fn test_const_bias_dominates_fresh_output() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let linear = CastedLinear::with_const_bias(32, 2, -5.0, vb)?;

        // With small inputs the Kaiming weights contribute little
        // compared to the -5 bias, so both outputs stay negative.
        let x = (Tensor::randn(0f32, 1.0, (1, 32), &device)? * 0.1)?;
        let out = linear.forward(&x)?.flatten_all()?.to_vec1::<f32>()?;

        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|&v| v < 0.0), "bias -5 should dominate: {:?}", out);

        Ok(())
    }

    #[test]
    fn test_swiglu_shape() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let swiglu = SwiGLU::new(256, 4.0, vb)?;

        let x = Tensor::randn(0f32, 1.0, (2, 16, 256), &device)?;
        let out = swiglu.forward(&x)?;

        assert_eq!(out.dims(), x.dims());

        Ok(())
    }
}
