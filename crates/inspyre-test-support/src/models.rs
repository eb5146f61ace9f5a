//! Small random-weight models.

use anyhow::Result;
use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use inspyre_core::config::{InferenceConfig, ModelConfig, PreprocessConfig, PyramidConfig};
use inspyre_core::InSPyReNet;

use crate::mocks::{BackboneCalls, CountingBackbone, PoolingBackbone};

/// Model under test: random weights over a recording pooling backbone.
pub type TestModel = InSPyReNet<CountingBackbone<PoolingBackbone>>;

/// A configuration small enough to run on CPU in tests.
///
/// Depth 16, base size 64×64, high-resolution pass from 96 px, shorter
/// side capped at 256.
#[must_use]
pub fn tiny_config() -> InferenceConfig {
    InferenceConfig {
        model: ModelConfig {
            depth: 16,
            in_channels: [8, 8, 16, 16, 32],
            base_size: [64, 64],
        },
        preprocess: PreprocessConfig {
            threshold: 96,
            long_side_cap: 256,
            size_multiple: 32,
        },
        pyramid: PyramidConfig::default(),
    }
}

/// Builds a [`tiny_config`] model with freshly initialised weights.
///
/// # Errors
///
/// Returns an error if the model cannot be built.
pub fn random_model() -> Result<(TestModel, BackboneCalls)> {
    random_model_with(&tiny_config())
}

/// Builds a model for `config` with freshly initialised weights.
///
/// # Errors
///
/// Returns an error if the model cannot be built.
pub fn random_model_with(config: &InferenceConfig) -> Result<(TestModel, BackboneCalls)> {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);

    let backbone = PoolingBackbone::new(config.model.in_channels, vb.pp("backbone"))?;
    let backbone = CountingBackbone::new(backbone);
    let calls = backbone.calls();

    let model = InSPyReNet::new(backbone, config, vb)?;
    Ok((model, calls))
}
