//! Prediction results.

use anyhow::{Context, Result};
use candle_core::Tensor;
use image::{imageops::FilterType, GrayImage, Luma};
use serde::{Deserialize, Serialize};

/// Which branch of the prediction pipeline produced a map.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferencePath {
    /// Low-resolution pass only; the image was below the size threshold.
    SinglePass,
    /// Low- and high-resolution passes fused by pyramid blending.
    Blended,
}

/// Normalised prediction of a single image.
#[derive(Debug, Clone)]
pub struct Prediction {
    /// `(1, 1, H, W)` map with values in `[0, 1]`.
    pub map: Tensor,
    /// Branch that produced the map.
    pub path: InferencePath,
}

impl Prediction {
    /// Copies the map to host memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the map is not a single-sample, single-channel tensor.
    pub fn to_saliency_map(&self) -> Result<SaliencyMap> {
        let (_, _, height, width) = self.map.dims4().context("Prediction is not 4D")?;
        let data = self
            .map
            .squeeze(0)
            .and_then(|t| t.squeeze(0))
            .and_then(|t| t.flatten_all())
            .and_then(|t| t.to_vec1::<f32>())
            .context("Failed to copy prediction to host")?;

        #[allow(clippy::cast_possible_truncation)]
        Ok(SaliencyMap {
            width: width as u32,
            height: height as u32,
            data,
        })
    }
}

/// Host-side saliency map in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct SaliencyMap {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Row-major values in `[0, 1]`.
    pub data: Vec<f32>,
}

impl SaliencyMap {
    /// Value at `(x, y)`.
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.data.get((y * self.width + x) as usize).copied()
    }

    /// Converts the map to an 8-bit grayscale image.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn to_gray_image(&self) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| {
            let v = self.get(x, y).unwrap_or(0.0);
            Luma([(v * 255.0).round().clamp(0.0, 255.0) as u8])
        })
    }

    /// Resamples the map to `width × height`, e.g. the source image size.
    #[must_use]
    pub fn resize_to(&self, width: u32, height: u32) -> GrayImage {
        image::imageops::resize(&self.to_gray_image(), width, height, FilterType::Triangle)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_prediction_to_saliency_map() {
        let map = Tensor::new(&[0f32, 0.5, 1.0, 0.25, 0.75, 0.0], &Device::Cpu)
            .unwrap()
            .reshape((1, 1, 2, 3))
            .unwrap();
        let prediction = Prediction {
            map,
            path: InferencePath::SinglePass,
        };
        let saliency = prediction.to_saliency_map().unwrap();
        assert_eq!((saliency.width, saliency.height), (3, 2));
        assert_eq!(saliency.get(2, 0), Some(1.0));
        assert_eq!(saliency.get(1, 1), Some(0.75));
        assert_eq!(saliency.get(3, 0), None);
    }

    #[test]
    fn test_gray_image_scaling() {
        let saliency = SaliencyMap {
            width: 2,
            height: 1,
            data: vec![0.0, 1.0],
        };
        let image = saliency.to_gray_image();
        assert_eq!(image.get_pixel(0, 0)[0], 0);
        assert_eq!(image.get_pixel(1, 0)[0], 255);

        let resized = saliency.resize_to(8, 4);
        assert_eq!(resized.dimensions(), (8, 4));
    }

    #[test]
    fn test_inference_path_serializes_snake_case() {
        let value = toml::Value::try_from(InferencePath::SinglePass).unwrap();
        assert_eq!(value.as_str(), Some("single_pass"));
    }
}
