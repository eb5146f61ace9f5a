//! Pyramid anchor: fuses the three coarsest context features.

use candle_core::{Module, Result, Tensor};
use candle_nn::VarBuilder;

use super::layers::{AttentionAxis, ConvBn, SelfAttention};
use super::utils::resize_bilinear;

/// Decoder producing the coarsest feature map `f3` and saliency logit `d3`.
#[derive(Debug, Clone)]
pub struct Decoder {
    conv1: ConvBn,
    conv2: ConvBn,
    conv3: ConvBn,
    conv4: ConvBn,
    conv5: ConvBn,
    h_attn: SelfAttention,
    w_attn: SelfAttention,
}

impl Decoder {
    /// Creates a decoder over three `depth`-channel inputs.
    ///
    /// # Errors
    ///
    /// Returns an error if the weights cannot be loaded.
    pub fn new(depth: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            conv1: ConvBn::new(depth * 3, depth, 3, vb.pp("conv1"))?,
            conv2: ConvBn::new(depth, depth, 3, vb.pp("conv2"))?,
            conv3: ConvBn::new(depth, depth, 3, vb.pp("conv3"))?,
            conv4: ConvBn::new(depth, depth, 3, vb.pp("conv4"))?,
            conv5: ConvBn::build(depth, 1, (3, 3), 1, false, false, vb.pp("conv5"))?,
            h_attn: SelfAttention::new(depth, AttentionAxis::Height, vb.pp("Hattn"))?,
            w_attn: SelfAttention::new(depth, AttentionAxis::Width, vb.pp("Wattn"))?,
        })
    }

    /// Decodes `[x3, x4, x5]` (finest first) into `(f3, d3)` at `x3`'s size.
    ///
    /// # Errors
    ///
    /// Returns an error on shape mismatch.
    pub fn forward(&self, x3: &Tensor, x4: &Tensor, x5: &Tensor) -> Result<(Tensor, Tensor)> {
        let (_, _, h, w) = x3.dims4()?;
        let x4 = resize_bilinear(x4, h, w, true)?;
        let x5 = resize_bilinear(x5, h, w, true)?;

        let fx = self.conv1.forward(&Tensor::cat(&[&x5, &x4, x3], 1)?)?;
        let fx = (self.h_attn.forward(&fx)? + self.w_attn.forward(&fx)?)?;
        let fx = self.conv2.forward(&fx)?;
        let fx = self.conv3.forward(&fx)?;
        let fx = self.conv4.forward(&fx)?;
        let out = self.conv5.forward(&fx)?;

        Ok((fx, out))
    }
}
