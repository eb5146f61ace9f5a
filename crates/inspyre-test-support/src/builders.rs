//! Synthetic image builders for testing.

use image::{DynamicImage, Rgb, RgbImage};

/// Builder for creating synthetic test images.
///
/// Images are RGB; [`SyntheticImageBuilder::bgr_bytes`] exports them in
/// the interleaved BGR layout accepted by `InSPyReNet::predict_bgr`.
pub struct SyntheticImageBuilder;

impl SyntheticImageBuilder {
    /// Creates an image filled with a single colour.
    #[must_use]
    pub fn uniform(width: u32, height: u32, color: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(color)))
    }

    /// Creates a bright disk of the given radius on a dark background.
    ///
    /// The simplest salient object: a single blob in the image centre.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn centered_disk(width: u32, height: u32, radius: u32) -> DynamicImage {
        let (cx, cy) = ((width / 2) as i64, (height / 2) as i64);
        let r2 = i64::from(radius) * i64::from(radius);
        let img = RgbImage::from_fn(width, height, |x, y| {
            let (dx, dy) = (i64::from(x) - cx, i64::from(y) - cy);
            if dx * dx + dy * dy <= r2 {
                Rgb([230, 60, 40])
            } else {
                Rgb([20, 30, 40])
            }
        });
        DynamicImage::ImageRgb8(img)
    }

    /// Creates a smooth horizontal gradient.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn gradient(width: u32, height: u32) -> DynamicImage {
        let img = RgbImage::from_fn(width, height, |x, _| {
            let val = ((u32::from(u8::MAX) * x) / width.max(1)) as u8;
            Rgb([val, val, val])
        });
        DynamicImage::ImageRgb8(img)
    }

    /// Creates a high-contrast checkerboard with the given cell size.
    #[must_use]
    pub fn checkerboard(width: u32, height: u32, cell_size: u32) -> DynamicImage {
        let cell = cell_size.max(1);
        let img = RgbImage::from_fn(width, height, |x, y| {
            if (x / cell + y / cell) % 2 == 0 {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        });
        DynamicImage::ImageRgb8(img)
    }

    /// Exports an image as interleaved BGR bytes.
    #[must_use]
    pub fn bgr_bytes(image: &DynamicImage) -> Vec<u8> {
        image
            .to_rgb8()
            .pixels()
            .flat_map(|p| [p[2], p[1], p[0]])
            .collect()
    }
}
