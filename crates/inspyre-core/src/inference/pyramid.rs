//! Laplacian image pyramid over single-channel saliency maps.

use candle_core::{Device, Result, Tensor};

use super::utils::{pad_reflect, resize_like};

/// Normalised 1D Gaussian taps, as produced by `cv2.getGaussianKernel`.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn gaussian_taps(ksize: usize, sigma: f64) -> Vec<f64> {
    let center = (ksize as f64 - 1.0) / 2.0;
    let denom = 2.0 * sigma * sigma;
    let taps: Vec<f64> = (0..ksize)
        .map(|i| {
            let d = i as f64 - center;
            (-(d * d) / denom).exp()
        })
        .collect();
    let sum: f64 = taps.iter().sum();
    taps.into_iter().map(|t| t / sum).collect()
}

/// Gaussian expand/reduce pyramid.
#[derive(Debug, Clone)]
pub struct ImagePyramid {
    kernel: Tensor,
    ksize: usize,
    channels: usize,
}

impl ImagePyramid {
    /// Creates a pyramid with a `ksize × ksize` Gaussian of the given sigma.
    ///
    /// # Errors
    ///
    /// Returns an error if the kernel tensor cannot be created on `device`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(ksize: usize, sigma: f64, channels: usize, device: &Device) -> Result<Self> {
        let taps = gaussian_taps(ksize, sigma);
        let mut outer = Vec::with_capacity(channels * ksize * ksize);
        for _ in 0..channels {
            for a in &taps {
                outer.extend(taps.iter().map(|b| (a * b) as f32));
            }
        }
        let kernel = Tensor::from_vec(outer, (channels, 1, ksize, ksize), device)?;

        Ok(Self {
            kernel,
            ksize,
            channels,
        })
    }

    /// Upsamples `x` by two: zero insertion followed by a Gaussian blur.
    ///
    /// # Errors
    ///
    /// Returns an error if `2 * h` or `2 * w` of `x` is not larger than
    /// `ksize / 2` (reflect padding of the upsampled grid). With the
    /// default 7×7 kernel this rejects 1×1 inputs; 2×2 is the minimum.
    pub fn expand(&self, x: &Tensor) -> Result<Tensor> {
        let (b, c, h, w) = x.dims4()?;
        let zeros = x.zeros_like()?;

        // Place every sample at even coordinates of a 2h × 2w grid.
        let x = Tensor::stack(&[x, &zeros], 4)?.reshape((b, c, h, 2 * w))?;
        let zeros = x.zeros_like()?;
        let x = Tensor::stack(&[&x, &zeros], 3)?.reshape((b, c, 2 * h, 2 * w))?;

        let x = pad_reflect(&x, self.ksize / 2)?;
        let kernel = (&self.kernel * 4.0)?;
        x.conv2d(&kernel, 0, 1, 1, self.channels)
    }

    /// Blurs and downsamples `x` by two.
    ///
    /// # Errors
    ///
    /// Returns an error if a spatial side of `x` is not larger than
    /// `ksize / 2`.
    pub fn reduce(&self, x: &Tensor) -> Result<Tensor> {
        let (_, _, h, w) = x.dims4()?;
        let x = pad_reflect(x, self.ksize / 2)?.conv2d(&self.kernel, 0, 1, 1, self.channels)?;

        let device = x.device();
        #[allow(clippy::cast_possible_truncation)]
        let every_other = |len: usize| Tensor::arange_step(0u32, len as u32, 2, device);
        x.index_select(&every_other(h)?, 2)?
            .index_select(&every_other(w)?, 3)
    }

    /// Splits `x` into its reduced level and the Laplacian residual.
    ///
    /// # Errors
    ///
    /// Returns an error if a spatial side of `x` is not larger than
    /// `ksize / 2`, or the reduced level is too small to expand.
    pub fn deconstruct(&self, x: &Tensor) -> Result<(Tensor, Tensor)> {
        let reduced = self.reduce(x)?;
        let mut expanded = self.expand(&reduced)?;
        if expanded.dims() != x.dims() {
            let (_, _, h, w) = x.dims4()?;
            expanded = expanded.upsample_nearest2d(h, w)?;
        }
        let laplacian = (x - expanded)?;
        Ok((reduced, laplacian))
    }

    /// Rebuilds the finer level from `x` and the residual `laplacian`.
    ///
    /// The output always has `laplacian`'s spatial size.
    ///
    /// # Errors
    ///
    /// Returns an error if `x` is too small to expand (see
    /// [`ImagePyramid::expand`]: at least 2×2 for the default 7×7 kernel)
    /// or the channel counts differ.
    pub fn reconstruct(&self, x: &Tensor, laplacian: &Tensor) -> Result<Tensor> {
        let expanded = resize_like(&self.expand(x)?, laplacian)?;
        expanded + laplacian
    }
}
