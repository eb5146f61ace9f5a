//! Saliency pyramid produced by a single pass.

use candle_core::Tensor;

/// Saliency estimates and Laplacian residuals of one pass.
///
/// Levels run coarse to fine. Each saliency level after the first is the
/// expanded previous level plus the residual at the same index.
#[derive(Debug, Clone)]
pub struct SaliencyPyramid {
    /// Saliency logits `[d3, d2, d1, d0]`.
    pub saliency: [Tensor; 4],
    /// Laplacian residuals `[p2, p1, p0]`.
    pub laplacian: [Tensor; 3],
}

impl SaliencyPyramid {
    /// Coarsest saliency estimate (decoder output).
    #[must_use]
    pub const fn coarsest(&self) -> &Tensor {
        &self.saliency[0]
    }

    /// Finest saliency estimate, at the pass input's resolution.
    #[must_use]
    pub const fn finest(&self) -> &Tensor {
        &self.saliency[3]
    }
}
