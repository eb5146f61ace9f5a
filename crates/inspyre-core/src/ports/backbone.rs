//! Backbone port: the pretrained multi-scale feature extractor.

use candle_core::{Result, Tensor};

/// Five feature maps at strides 4, 4, 8, 16 and 32, finest first.
///
/// Stage `i` carries `in_channels[i]` channels of the model configuration.
#[derive(Debug, Clone)]
pub struct BackboneFeatures(pub [Tensor; 5]);

/// Port for the image feature extractor.
///
/// Implementations own their weights; the network only relies on the
/// five-scale output contract.
pub trait Backbone: Send + Sync {
    /// Extracts features from a `(B, 3, H, W)` image tensor.
    ///
    /// # Errors
    ///
    /// Returns an error if the forward pass fails.
    fn features(&self, x: &Tensor) -> Result<BackboneFeatures>;
}

impl<B: Backbone + ?Sized> Backbone for Box<B> {
    fn features(&self, x: &Tensor) -> Result<BackboneFeatures> {
        (**self).features(x)
    }
}
