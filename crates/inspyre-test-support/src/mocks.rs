//! Mock implementations of the backbone port.

use std::sync::{Arc, Mutex, PoisonError};

use candle_core::{Module, Result, Tensor};
use candle_nn::{conv2d, Conv2d, Conv2dConfig, VarBuilder};
use inspyre_core::ports::{Backbone, BackboneFeatures};

/// Output strides of the five backbone stages, finest first.
const STRIDES: [usize; 5] = [4, 4, 8, 16, 32];

/// Deterministic stand-in for a pretrained backbone.
///
/// Each stage average-pools the image to its stride and projects the
/// three colour channels with a 1×1 convolution, so features depend on
/// the image content and have the contract's shapes.
pub struct PoolingBackbone {
    projections: Vec<Conv2d>,
}

impl PoolingBackbone {
    /// Creates a backbone emitting `channels[i]` channels at stage `i`.
    ///
    /// Projection weights live under `stage0..stage4`.
    ///
    /// # Errors
    ///
    /// Returns an error if the projection weights cannot be created.
    pub fn new(channels: [usize; 5], vb: VarBuilder) -> Result<Self> {
        let projections = channels
            .iter()
            .enumerate()
            .map(|(i, &c)| conv2d(3, c, 1, Conv2dConfig::default(), vb.pp(format!("stage{i}"))))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { projections })
    }
}

impl Backbone for PoolingBackbone {
    fn features(&self, x: &Tensor) -> Result<BackboneFeatures> {
        let stage = |i: usize| -> Result<Tensor> {
            let pooled = x.avg_pool2d(STRIDES[i])?;
            self.projections[i].forward(&pooled)
        };
        Ok(BackboneFeatures([
            stage(0)?,
            stage(1)?,
            stage(2)?,
            stage(3)?,
            stage(4)?,
        ]))
    }
}

/// Shared record of backbone invocations.
#[derive(Debug, Clone, Default)]
pub struct BackboneCalls {
    sizes: Arc<Mutex<Vec<(usize, usize)>>>,
}

impl BackboneCalls {
    /// Returns the number of forward passes.
    #[must_use]
    pub fn count(&self) -> usize {
        self.input_sizes().len()
    }

    /// Returns the `(height, width)` of every input, in call order.
    #[must_use]
    pub fn input_sizes(&self) -> Vec<(usize, usize)> {
        self.sizes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, size: (usize, usize)) {
        if let Ok(mut sizes) = self.sizes.lock() {
            sizes.push(size);
        }
    }
}

/// Backbone wrapper that records every call for assertions.
pub struct CountingBackbone<B> {
    inner: B,
    calls: BackboneCalls,
}

impl<B: Backbone> CountingBackbone<B> {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            calls: BackboneCalls::default(),
        }
    }

    /// Returns a handle that stays valid after the wrapper is moved
    /// into a model.
    #[must_use]
    pub fn calls(&self) -> BackboneCalls {
        self.calls.clone()
    }
}

impl<B: Backbone> Backbone for CountingBackbone<B> {
    fn features(&self, x: &Tensor) -> Result<BackboneFeatures> {
        let (_, _, h, w) = x.dims4()?;
        self.calls.record((h, w));
        self.inner.features(x)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_pooling_backbone_strides() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let backbone = PoolingBackbone::new([4, 5, 6, 7, 8], vb).unwrap();

        let x = Tensor::rand(0f32, 1.0, (1, 3, 64, 96), &Device::Cpu).unwrap();
        let BackboneFeatures(features) = backbone.features(&x).unwrap();
        let dims: Vec<_> = features.iter().map(|f| f.dims4().unwrap()).collect();
        assert_eq!(
            dims,
            vec![
                (1, 4, 16, 24),
                (1, 5, 16, 24),
                (1, 6, 8, 12),
                (1, 7, 4, 6),
                (1, 8, 2, 3)
            ]
        );
    }

    #[test]
    fn test_counting_backbone_records_sizes() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let backbone = CountingBackbone::new(PoolingBackbone::new([1; 5], vb).unwrap());
        let calls = backbone.calls();

        let x = Tensor::zeros((1, 3, 64, 32), DType::F32, &Device::Cpu).unwrap();
        backbone.features(&x).unwrap();
        backbone.features(&x).unwrap();

        assert_eq!(calls.count(), 2);
        assert_eq!(calls.input_sizes(), vec![(64, 32), (64, 32)]);
    }
}
