//! Input preparation: resize plan and image-to-tensor conversion.
//!
//! Every image gets a fixed-size low-resolution tensor. Images at least
//! `threshold` pixels on both sides also get a high-resolution tensor
//! whose sides are rounded to a multiple of `size_multiple`, after the
//! shorter side is capped at `long_side_cap`.

// Pixel sizes stay far below the f64 mantissa
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

use anyhow::{ensure, Context, Result};
use candle_core::{DType, Device, Tensor};
use image::{DynamicImage, RgbImage};
use tracing::debug;

use super::utils::resize_bilinear;
use crate::config::{ModelConfig, PreprocessConfig};

/// Target sizes `(height, width)` computed for one source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizePlan {
    /// Size of the global low-resolution pass.
    pub low_res: (usize, usize),
    /// Size of the detail pass, absent for small images.
    pub high_res: Option<(usize, usize)>,
}

impl ResizePlan {
    /// Plans the resize of a `height × width` source image.
    #[must_use]
    pub fn new(height: u32, width: u32, model: &ModelConfig, config: &PreprocessConfig) -> Self {
        let cap = f64::from(config.long_side_cap);
        let (mut h, mut w) = (f64::from(height), f64::from(width));
        if h >= w && w > cap {
            h /= w / cap;
            w = cap;
        } else if w > h && h > cap {
            w /= h / cap;
            h = cap;
        }

        let multiple = f64::from(config.size_multiple);
        let round = |side: f64| ((side / multiple).round_ties_even() * multiple) as usize;

        let threshold = f64::from(config.threshold);
        let high_res = if h < threshold || w < threshold {
            None
        } else {
            Some((round(h), round(w)))
        };

        Self {
            low_res: (model.base_size[0], model.base_size[1]),
            high_res,
        }
    }
}

/// High-resolution input of the detail pass.
#[derive(Debug, Clone)]
pub struct HighResInput {
    /// `(1, 3, H, W)` RGB tensor in `[0, 1]`.
    pub image: Tensor,
}

/// Tensors handed to the network for one image.
#[derive(Debug, Clone)]
pub struct PreparedInput {
    /// `(1, 3, base_h, base_w)` RGB tensor in `[0, 1]`.
    pub low_res: Tensor,
    /// Detail-pass input; `None` selects the single-pass branch.
    pub high_res: Option<HighResInput>,
    /// Source image size `(height, width)`.
    pub source_size: (u32, u32),
}

/// Converts images into network inputs.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    model: ModelConfig,
    config: PreprocessConfig,
    device: Device,
}

impl Preprocessor {
    /// Creates a preprocessor placing tensors on `device`.
    #[must_use]
    pub const fn new(model: ModelConfig, config: PreprocessConfig, device: Device) -> Self {
        Self {
            model,
            config,
            device,
        }
    }

    /// Plans the resize of a `height × width` image.
    #[must_use]
    pub fn plan(&self, height: u32, width: u32) -> ResizePlan {
        ResizePlan::new(height, width, &self.model, &self.config)
    }

    /// Prepares a decoded image.
    ///
    /// # Errors
    ///
    /// Returns an error if tensor creation or resizing fails.
    pub fn prepare(&self, image: &DynamicImage) -> Result<PreparedInput> {
        self.prepare_rgb(&image.to_rgb8())
    }

    /// Prepares an interleaved BGR `height × width × 3` byte buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer length does not match the dimensions.
    pub fn prepare_bgr(&self, data: &[u8], width: u32, height: u32) -> Result<PreparedInput> {
        self.prepare_rgb(&bgr_to_rgb_image(data, width, height)?)
    }

    /// Prepares an RGB image.
    ///
    /// # Errors
    ///
    /// Returns an error if tensor creation or resizing fails.
    pub fn prepare_rgb(&self, rgb: &RgbImage) -> Result<PreparedInput> {
        let (width, height) = rgb.dimensions();
        let plan = self.plan(height, width);
        debug!(
            "Resize plan for {width}x{height}: low-res {:?}, high-res {:?}",
            plan.low_res, plan.high_res
        );

        let full = rgb_to_tensor(rgb, &self.device)?;

        let (lh, lw) = plan.low_res;
        let low_res = resize_u8(&full, lh, lw).context("Failed to resize low-res input")?;

        let high_res = plan
            .high_res
            .map(|(hh, hw)| resize_u8(&full, hh, hw))
            .transpose()
            .context("Failed to resize high-res input")?
            .map(|image| HighResInput { image });

        Ok(PreparedInput {
            low_res,
            high_res,
            source_size: (height, width),
        })
    }
}

/// Bilinear resize of a `[0, 1]` image tensor that rounds every output
/// pixel back to one of the 256 levels of an 8-bit image.
fn resize_u8(x: &Tensor, height: usize, width: usize) -> candle_core::Result<Tensor> {
    let resized = resize_bilinear(x, height, width, false)?;
    (resized * 255.0)?.round()?.clamp(0f32, 255f32)? / 255.0
}

/// Reorders an interleaved BGR buffer into an RGB image.
///
/// # Errors
///
/// Returns an error if `data` is not `width * height * 3` bytes long.
pub fn bgr_to_rgb_image(data: &[u8], width: u32, height: u32) -> Result<RgbImage> {
    let expected = width as usize * height as usize * 3;
    ensure!(
        data.len() == expected,
        "BGR buffer has {} bytes, expected {expected} for {width}x{height}",
        data.len()
    );

    let rgb: Vec<u8> = data
        .chunks_exact(3)
        .flat_map(|px| [px[2], px[1], px[0]])
        .collect();
    RgbImage::from_raw(width, height, rgb).context("Failed to build RGB image")
}

/// Converts an RGB image into a `(1, 3, H, W)` tensor scaled to `[0, 1]`.
///
/// # Errors
///
/// Returns an error if tensor creation fails.
pub fn rgb_to_tensor(rgb: &RgbImage, device: &Device) -> Result<Tensor> {
    let (width, height) = rgb.dimensions();
    let data: Vec<f32> = rgb.as_raw().iter().map(|&v| f32::from(v) / 255.0).collect();

    // Reshape to (1, 3, H, W) - NCHW format
    let tensor = Tensor::from_vec(data, (1, height as usize, width as usize, 3), device)?;
    tensor
        .permute((0, 3, 1, 2))?
        .contiguous()?
        .to_dtype(DType::F32)
        .context("Failed to convert image to tensor")
}
