//! InSPyReNet: inverse saliency pyramid reconstruction network.
//!
//! A single pass predicts a coarse saliency map at stride 8 and three
//! Laplacian residuals that rebuild it up to the input resolution. Large
//! images run a second pass at high resolution whose residuals are
//! merged into the low-resolution result only inside transition bands.

use std::path::Path;

use anyhow::{Context, Result};
use candle_core::{Device, Module, Tensor};
use candle_nn::{ops::sigmoid, VarBuilder};
use image::DynamicImage;
use tracing::debug;

use super::context::ContextEncoder;
use super::decoder::Decoder;
use super::loader::load_safetensors;
use super::preprocess::{PreparedInput, Preprocessor};
use super::pyramid::ImagePyramid;
use super::sica::Sica;
use super::transition::Transition;
use super::utils::{min_max_normalize, resize_bilinear, resize_like};
use crate::config::InferenceConfig;
use crate::domain::{InferencePath, Prediction, SaliencyPyramid};
use crate::ports::{Backbone, BackboneFeatures};

/// Saliency network over a pluggable backbone.
pub struct InSPyReNet<B> {
    backbone: B,
    context: [ContextEncoder; 5],
    decoder: Decoder,
    /// Refinement stages indexed by pyramid level, finest first.
    attention: [Sica; 3],
    /// Blending masks indexed by pyramid level, finest first.
    transition: [Transition; 3],
    pyramid: ImagePyramid,
    preprocessor: Preprocessor,
    epsilon: f64,
}

impl<B: Backbone> InSPyReNet<B> {
    /// Builds the network from `vb` using the given configuration.
    ///
    /// The backbone owns its own weights; every other parameter is read
    /// from `vb` under the checkpoint names (`context1..5`, `decoder`,
    /// `attention0..2`).
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or a parameter
    /// is missing or has the wrong shape.
    pub fn new(backbone: B, config: &InferenceConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let model = &config.model;
        let depth = model.depth;
        let device = vb.device().clone();

        let context_encoder = |i: usize| {
            ContextEncoder::new(model.in_channels[i], depth, vb.pp(format!("context{}", i + 1)))
                .with_context(|| format!("Failed to build context{}", i + 1))
        };
        let context = [
            context_encoder(0)?,
            context_encoder(1)?,
            context_encoder(2)?,
            context_encoder(3)?,
            context_encoder(4)?,
        ];

        let decoder = Decoder::new(depth, vb.pp("decoder")).context("Failed to build decoder")?;

        let attention = [
            Sica::new(depth, depth, model.stage_size(0), true, vb.pp("attention0"))
                .context("Failed to build attention0")?,
            Sica::new(depth * 2, depth, model.stage_size(1), true, vb.pp("attention1"))
                .context("Failed to build attention1")?,
            Sica::new(depth * 2, depth, model.stage_size(2), false, vb.pp("attention2"))
                .context("Failed to build attention2")?,
        ];

        let pyramid_config = &config.pyramid;
        let [k0, k1, k2] = pyramid_config.transition_kernels;
        let transition = [Transition::new(k0), Transition::new(k1), Transition::new(k2)];
        let pyramid = ImagePyramid::new(pyramid_config.kernel_size, pyramid_config.sigma, 1, &device)
            .context("Failed to build image pyramid")?;

        let preprocessor = Preprocessor::new(model.clone(), config.preprocess.clone(), device);

        Ok(Self {
            backbone,
            context,
            decoder,
            attention,
            transition,
            pyramid,
            preprocessor,
            epsilon: pyramid_config.epsilon,
        })
    }

    /// Builds the SwinB variant: channels `[128, 128, 256, 512, 1024]`,
    /// depth 64, base size 384×384, threshold 512.
    ///
    /// # Errors
    ///
    /// Returns an error if a parameter is missing or has the wrong shape.
    pub fn swin_b(backbone: B, vb: VarBuilder) -> Result<Self> {
        Self::new(backbone, &InferenceConfig::swin_b(), vb)
    }

    /// Builds the network from a safetensors checkpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint cannot be read or does not
    /// match the configuration.
    pub fn from_safetensors(
        backbone: B,
        config: &InferenceConfig,
        path: impl AsRef<Path>,
        device: &Device,
    ) -> Result<Self> {
        let path = path.as_ref();
        let vb = load_safetensors(path, device)?;
        Self::new(backbone, config, vb)
            .with_context(|| format!("Checkpoint does not match model: {}", path.display()))
    }

    /// Preprocessor matching this network's configuration and device.
    #[must_use]
    pub const fn preprocessor(&self) -> &Preprocessor {
        &self.preprocessor
    }

    /// Runs a single pass on a `(B, 3, H, W)` image tensor.
    ///
    /// Returns saliency logits at strides 8, 4, 2 and 1 together with the
    /// residuals that rebuild each level from the previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the backbone fails or its features do not
    /// match the configured channels.
    pub fn forward_pyramid(&self, x: &Tensor) -> Result<SaliencyPyramid> {
        let (_, _, h, w) = x.dims4()?;

        let BackboneFeatures(features) = self.backbone.features(x).context("Backbone forward failed")?;
        let [x1, x2, x3, x4, x5] = features;
        let x1 = self.context[0].forward(&x1)?;
        let x2 = self.context[1].forward(&x2)?;
        let x3 = self.context[2].forward(&x3)?;
        let x4 = self.context[3].forward(&x4)?;
        let x5 = self.context[4].forward(&x5)?;

        let (f3, d3) = self.decoder.forward(&x3, &x4, &x5)?;

        let f3 = resize_bilinear(&f3, h / 4, w / 4, false)?;
        let (f2, p2) = self.attention[2].forward(&Tensor::cat(&[&x2, &f3], 1)?, &d3, None)?;
        let d2 = self.pyramid.reconstruct(&d3, &p2)?;

        let x1 = resize_bilinear(&x1, h / 2, w / 2, false)?;
        let f2 = resize_bilinear(&f2, h / 2, w / 2, false)?;
        let (f1, p1) = self.attention[1].forward(&Tensor::cat(&[&x1, &f2], 1)?, &d2, Some(&p2))?;
        let d1 = self.pyramid.reconstruct(&d2, &p1)?;

        let f1 = resize_bilinear(&f1, h, w, false)?;
        let (_, p0) = self.attention[0].forward(&f1, &d1, Some(&p1))?;
        let d0 = self.pyramid.reconstruct(&d1, &p0)?;

        Ok(SaliencyPyramid {
            saliency: [d3, d2, d1, d0],
            laplacian: [p2, p1, p0],
        })
    }

    /// Rebuilds the high-resolution pyramid on top of the low-resolution
    /// prediction, keeping residual detail only inside transition bands.
    ///
    /// # Errors
    ///
    /// Returns an error on shape mismatch.
    pub fn blend(&self, low_res: &SaliencyPyramid, high_res: &SaliencyPyramid) -> Result<Tensor> {
        let mut d = resize_like(low_res.finest(), high_res.coarsest())?;

        // Residuals run coarse to fine: p2, p1, p0.
        for (i, laplacian) in high_res.laplacian.iter().enumerate() {
            let transition = &self.transition[2 - i];
            let mask = resize_like(&transition.forward(&d)?, laplacian)?;
            d = self.pyramid.reconstruct(&d, &(mask * laplacian)?)?;
        }

        Ok(d)
    }

    /// Predicts a normalised saliency map for prepared inputs.
    ///
    /// # Errors
    ///
    /// Returns an error if either pass fails.
    pub fn predict(&self, input: &PreparedInput) -> Result<Prediction> {
        let low_res = self
            .forward_pyramid(&input.low_res)
            .context("Low-resolution pass failed")?;

        let (raw, path) = match &input.high_res {
            None => (low_res.finest().clone(), InferencePath::SinglePass),
            Some(high_res) => {
                let high_res = self
                    .forward_pyramid(&high_res.image)
                    .context("High-resolution pass failed")?;
                (self.blend(&low_res, &high_res)?, InferencePath::Blended)
            }
        };

        let (_, _, h, w) = raw.dims4()?;
        let (src_h, src_w) = input.source_size;
        debug!("Predicted {w}x{h} saliency for {src_w}x{src_h} image via {path:?}");

        let map = min_max_normalize(&sigmoid(&raw)?, self.epsilon)?;
        Ok(Prediction { map, path })
    }

    /// Predicts a saliency map for a decoded image.
    ///
    /// # Errors
    ///
    /// Returns an error if preprocessing or inference fails.
    pub fn predict_image(&self, image: &DynamicImage) -> Result<Prediction> {
        let input = self.preprocessor.prepare(image)?;
        self.predict(&input)
    }

    /// Predicts a saliency map for an interleaved BGR byte buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer does not match the dimensions or
    /// inference fails.
    pub fn predict_bgr(&self, data: &[u8], width: u32, height: u32) -> Result<Prediction> {
        let input = self.preprocessor.prepare_bgr(data, width, height)?;
        self.predict(&input)
    }
}
