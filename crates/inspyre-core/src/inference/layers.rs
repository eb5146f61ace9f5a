//! Building blocks shared by the context encoders, decoder and SICA stages.

use candle_core::{Module, ModuleT, Result, Tensor};
use candle_nn::{batch_norm, init, BatchNorm, Init, VarBuilder};

/// Batch norm epsilon used by every block.
const BN_EPS: f64 = 1e-5;

/// Padding that keeps the spatial size for an odd (dilated) kernel.
#[must_use]
pub const fn same_padding(kernel: usize, dilation: usize) -> usize {
    let full = kernel + (kernel - 1) * (dilation - 1);
    if full % 2 == 1 {
        full / 2
    } else {
        full / 2 - 1
    }
}

/// Convolution without bias, followed by optional batch norm and ReLU.
///
/// Supports rectangular kernels (`1×k`, `k×1`); padding is applied
/// explicitly per axis so the output keeps the input's spatial size.
#[derive(Debug, Clone)]
pub struct ConvBn {
    weight: Tensor,
    bn: Option<BatchNorm>,
    relu: bool,
    pad: (usize, usize),
    dilation: usize,
}

impl ConvBn {
    /// Creates a square `kernel × kernel` block with batch norm and no ReLU.
    ///
    /// # Errors
    ///
    /// Returns an error if the weights cannot be loaded.
    pub fn new(in_channels: usize, out_channels: usize, kernel: usize, vb: VarBuilder) -> Result<Self> {
        Self::build(in_channels, out_channels, (kernel, kernel), 1, true, false, vb)
    }

    /// Creates a block with full control over kernel shape, dilation and tail.
    ///
    /// Weights live under `conv.weight`; batch norm parameters under `bn.*`.
    ///
    /// # Errors
    ///
    /// Returns an error if the weights cannot be loaded.
    pub fn build(
        in_channels: usize,
        out_channels: usize,
        kernel: (usize, usize),
        dilation: usize,
        bn: bool,
        relu: bool,
        vb: VarBuilder,
    ) -> Result<Self> {
        let (kh, kw) = kernel;
        let weight = vb.get_with_hints(
            (out_channels, in_channels, kh, kw),
            "conv.weight",
            init::DEFAULT_KAIMING_NORMAL,
        )?;
        let bn = if bn {
            Some(batch_norm(out_channels, BN_EPS, vb.pp("bn"))?)
        } else {
            None
        };

        Ok(Self {
            weight,
            bn,
            relu,
            pad: (same_padding(kh, dilation), same_padding(kw, dilation)),
            dilation,
        })
    }

    /// Marks the block as ending in a ReLU.
    #[must_use]
    pub const fn with_relu(mut self) -> Self {
        self.relu = true;
        self
    }
}

impl Module for ConvBn {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let (ph, pw) = self.pad;
        let x = if ph == pw {
            x.conv2d(&self.weight, ph, 1, self.dilation, 1)?
        } else {
            x.pad_with_zeros(2, ph, ph)?
                .pad_with_zeros(3, pw, pw)?
                .conv2d(&self.weight, 0, 1, self.dilation, 1)?
        };

        let x = match &self.bn {
            Some(bn) => bn.forward_t(&x, false)?,
            None => x,
        };

        if self.relu {
            x.relu()
        } else {
            Ok(x)
        }
    }
}

/// Axis along which [`SelfAttention`] attends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttentionAxis {
    /// Attend across rows.
    Height,
    /// Attend across columns.
    Width,
}

/// Axial non-local attention with a learned residual gate.
#[derive(Debug, Clone)]
pub struct SelfAttention {
    query: ConvBn,
    key: ConvBn,
    value: ConvBn,
    gamma: Tensor,
    axis: AttentionAxis,
}

impl SelfAttention {
    /// Creates an attention block over `channels` input channels.
    ///
    /// Query and key project to `channels / 8`.
    ///
    /// # Errors
    ///
    /// Returns an error if the weights cannot be loaded.
    pub fn new(channels: usize, axis: AttentionAxis, vb: VarBuilder) -> Result<Self> {
        let reduced = channels / 8;
        Ok(Self {
            query: ConvBn::new(channels, reduced, 1, vb.pp("query_conv"))?,
            key: ConvBn::new(channels, reduced, 1, vb.pp("key_conv"))?,
            value: ConvBn::new(channels, channels, 1, vb.pp("value_conv"))?,
            gamma: vb.get_with_hints(1, "gamma", Init::Const(0.0))?,
            axis,
        })
    }
}

impl Module for SelfAttention {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let (b, c, h, w) = x.dims4()?;
        let axis = match self.axis {
            AttentionAxis::Height => h,
            AttentionAxis::Width => w,
        };

        // Raw reshapes: rows are whatever falls out of (C, H, W) memory order.
        let query = self.query.forward(x)?;
        let rows = query.elem_count() / (b * axis);
        let query = query.reshape((b, rows, axis))?.transpose(1, 2)?.contiguous()?;
        let key = self.key.forward(x)?.reshape((b, rows, axis))?;

        let attention = candle_nn::ops::softmax_last_dim(&query.matmul(&key)?)?;

        let value = self.value.forward(x)?.reshape((b, c * h * w / axis, axis))?;
        let out = value.matmul(&attention.transpose(1, 2)?.contiguous()?)?;
        let out = out.reshape((b, c, h, w))?;

        out.broadcast_mul(&self.gamma)? + x
    }
}
