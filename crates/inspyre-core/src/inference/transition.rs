//! Transition masks for dual-resolution blending.
//!
//! A transition marks the uncertain band around object boundaries of a
//! saliency estimate: the morphological gradient of its probabilities,
//! thresholded at one half. High-resolution detail is only kept inside
//! that band.

// Structuring element geometry on small integer kernels
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]

use candle_core::{DType, Result, Tensor};
use candle_nn::ops::sigmoid;

/// Elliptic structuring element, as produced by
/// `cv2.getStructuringElement(cv2.MORPH_ELLIPSE, (k, k))`.
#[must_use]
pub fn ellipse_element(ksize: usize) -> Vec<Vec<bool>> {
    let r = (ksize / 2) as i64;
    let c = r;
    let inv_r2 = if r == 0 { 0.0 } else { 1.0 / (r * r) as f64 };

    (0..ksize as i64)
        .map(|i| {
            let dy = i - r;
            let (j1, j2) = if dy.abs() <= r {
                let dx = (c as f64 * (((r * r - dy * dy) as f64) * inv_r2).sqrt()).round() as i64;
                ((c - dx).max(0), (c + dx + 1).min(ksize as i64))
            } else {
                (0, 0)
            };
            (0..ksize as i64).map(|j| j >= j1 && j < j2).collect()
        })
        .collect()
}

/// Morphological boundary detector with an elliptic element.
#[derive(Debug, Clone)]
pub struct Transition {
    offsets: Vec<(usize, usize)>,
    ksize: usize,
}

impl Transition {
    /// Creates a transition with a `ksize × ksize` elliptic element.
    #[must_use]
    pub fn new(ksize: usize) -> Self {
        let offsets = ellipse_element(ksize)
            .into_iter()
            .enumerate()
            .flat_map(|(u, row)| {
                row.into_iter()
                    .enumerate()
                    .filter_map(move |(v, on)| on.then_some((u, v)))
            })
            .collect();
        Self { offsets, ksize }
    }

    /// Grey dilation of a map with values in `[0, 1]`.
    ///
    /// Zero padding never wins the maximum because the element always
    /// covers the centre sample, so out-of-image samples are ignored.
    fn dilate(&self, x: &Tensor) -> Result<Tensor> {
        let (_, _, h, w) = x.dims4()?;
        let pad = self.ksize / 2;
        let padded = x.pad_with_zeros(2, pad, pad)?.pad_with_zeros(3, pad, pad)?;

        let mut out: Option<Tensor> = None;
        for &(u, v) in &self.offsets {
            let shifted = padded.narrow(2, u, h)?.narrow(3, v, w)?;
            out = Some(match out {
                Some(acc) => acc.maximum(&shifted)?,
                None => shifted,
            });
        }
        match out {
            Some(out) => Ok(out),
            None => Ok(x.clone()),
        }
    }

    /// Grey erosion of a map with values in `[0, 1]`, as the dual of dilation.
    fn erode(&self, x: &Tensor) -> Result<Tensor> {
        let inverted = x.affine(-1.0, 1.0)?;
        self.dilate(&inverted)?.affine(-1.0, 1.0)
    }

    /// Returns a `{0, 1}` mask of the boundary band of the logit map `x`.
    ///
    /// # Errors
    ///
    /// Returns an error if `x` is not a 4D tensor.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let x = sigmoid(x)?;
        let gradient = (self.dilate(&x)? - self.erode(&x)?)?;
        gradient.gt(0.5)?.to_dtype(DType::F32)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn render(element: &[Vec<bool>]) -> Vec<String> {
        element
            .iter()
            .map(|row| row.iter().map(|&on| if on { '1' } else { '0' }).collect())
            .collect()
    }

    #[test]
    fn test_ellipse_element_small_kernels() {
        assert_eq!(render(&ellipse_element(3)), vec!["010", "111", "010"]);
        assert_eq!(
            render(&ellipse_element(5)),
            vec!["00100", "11111", "11111", "11111", "00100"]
        );
    }

    #[test]
    fn test_ellipse_element_is_symmetric() {
        for k in [5, 9, 17] {
            let element = ellipse_element(k);
            for i in 0..k {
                for j in 0..k {
                    assert_eq!(element[i][j], element[k - 1 - i][j]);
                    assert_eq!(element[i][j], element[i][k - 1 - j]);
                }
            }
            assert!(element[k / 2].iter().all(|&on| on));
        }
    }

    #[test]
    fn test_uniform_map_has_no_transition() {
        let x = Tensor::full(3.0f32, (1, 1, 10, 10), &Device::Cpu).unwrap();
        let mask = Transition::new(5).forward(&x).unwrap();
        let total = mask.sum_all().unwrap().to_scalar::<f32>().unwrap();
        assert!(total.abs() < f32::EPSILON);
    }

    #[test]
    fn test_step_edge_marks_boundary_band() {
        // Left half strongly background, right half strongly foreground.
        let row: Vec<f32> = (0..12).map(|j| if j < 6 { -10.0 } else { 10.0 }).collect();
        let data: Vec<f32> = row.iter().copied().cycle().take(12 * 12).collect();
        let x = Tensor::from_vec(data, (1, 1, 12, 12), &Device::Cpu).unwrap();

        let mask = Transition::new(5).forward(&x).unwrap();
        let rows = mask.squeeze(0).unwrap().squeeze(0).unwrap().to_vec2::<f32>().unwrap();

        // Radius 2 on each side of the edge between columns 5 and 6.
        for row in &rows {
            for (j, &value) in row.iter().enumerate() {
                let expected = if (4..8).contains(&j) { 1.0 } else { 0.0 };
                assert!((value - expected).abs() < f32::EPSILON, "column {j}: {row:?}");
            }
        }
    }
}
