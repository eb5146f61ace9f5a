//! Context encoders (parallel axial attention, encoder flavour).
//!
//! One encoder per backbone stage maps its features to a fixed `depth`.

use candle_core::{Module, Result, Tensor};
use candle_nn::VarBuilder;

use super::layers::{AttentionAxis, ConvBn, SelfAttention};

/// Receptive sizes of the three axial branches.
const RECEPTIVE_SIZES: [usize; 3] = [3, 5, 7];

/// `1×1 → 1×k → k×1 → (H-attn + W-attn) → 3×3 dilated by k`.
#[derive(Debug, Clone)]
struct AxialKernel {
    conv0: ConvBn,
    conv1: ConvBn,
    conv2: ConvBn,
    conv3: ConvBn,
    h_attn: SelfAttention,
    w_attn: SelfAttention,
}

impl AxialKernel {
    fn new(in_channels: usize, out_channels: usize, receptive: usize, vb: &VarBuilder) -> Result<Self> {
        Ok(Self {
            conv0: ConvBn::new(in_channels, out_channels, 1, vb.pp("conv0"))?,
            conv1: ConvBn::build(out_channels, out_channels, (1, receptive), 1, true, false, vb.pp("conv1"))?,
            conv2: ConvBn::build(out_channels, out_channels, (receptive, 1), 1, true, false, vb.pp("conv2"))?,
            conv3: ConvBn::build(out_channels, out_channels, (3, 3), receptive, true, false, vb.pp("conv3"))?,
            h_attn: SelfAttention::new(out_channels, AttentionAxis::Height, vb.pp("Hattn"))?,
            w_attn: SelfAttention::new(out_channels, AttentionAxis::Width, vb.pp("Wattn"))?,
        })
    }
}

impl Module for AxialKernel {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let x = self.conv0.forward(x)?;
        let x = self.conv1.forward(&x)?;
        let x = self.conv2.forward(&x)?;
        let attended = (self.h_attn.forward(&x)? + self.w_attn.forward(&x)?)?;
        self.conv3.forward(&attended)
    }
}

/// Refines one backbone stage into a `depth`-channel feature map.
///
/// The output keeps the input's spatial size.
#[derive(Debug, Clone)]
pub struct ContextEncoder {
    branch0: ConvBn,
    branches: Vec<AxialKernel>,
    conv_cat: ConvBn,
    conv_res: ConvBn,
}

impl ContextEncoder {
    /// Creates an encoder for a stage with `in_channels` channels.
    ///
    /// # Errors
    ///
    /// Returns an error if the weights cannot be loaded.
    pub fn new(in_channels: usize, depth: usize, vb: VarBuilder) -> Result<Self> {
        let branches = RECEPTIVE_SIZES
            .iter()
            .enumerate()
            .map(|(i, &k)| AxialKernel::new(in_channels, depth, k, &vb.pp(format!("branch{}", i + 1))))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            branch0: ConvBn::new(in_channels, depth, 1, vb.pp("branch0"))?,
            branches,
            conv_cat: ConvBn::new(4 * depth, depth, 3, vb.pp("conv_cat"))?,
            conv_res: ConvBn::new(in_channels, depth, 1, vb.pp("conv_res"))?,
        })
    }
}

impl Module for ContextEncoder {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let mut outputs = Vec::with_capacity(1 + self.branches.len());
        outputs.push(self.branch0.forward(x)?);
        for branch in &self.branches {
            outputs.push(branch.forward(x)?);
        }

        let fused = self.conv_cat.forward(&Tensor::cat(&outputs, 1)?)?;
        (fused + self.conv_res.forward(x)?)?.relu()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_context_encoder_output_shape() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let encoder = ContextEncoder::new(12, 16, vb).unwrap();

        let x = Tensor::randn(0f32, 1.0, (1, 12, 10, 8), &Device::Cpu).unwrap();
        let y = encoder.forward(&x).unwrap();
        assert_eq!(y.dims4().unwrap(), (1, 16, 10, 8));

        let values = y.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!(values.iter().all(|v| *v >= 0.0 && v.is_finite()));
    }

    #[test]
    fn test_context_encoder_parameter_names() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let _encoder = ContextEncoder::new(8, 8, vb.pp("context1")).unwrap();

        let data = varmap.data().lock().unwrap();
        assert!(data.contains_key("context1.branch1.conv0.conv.weight"));
        assert!(data.contains_key("context1.branch3.Hattn.query_conv.conv.weight"));
        assert!(data.contains_key("context1.branch2.Wattn.gamma"));
        assert!(data.contains_key("context1.conv_cat.bn.running_var"));
    }
}
