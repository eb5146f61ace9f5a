//! Shared tensor utilities.
//!
//! Resizing follows `torch.nn.functional.interpolate` sampling so that
//! weights trained against it produce the same activations.

// Index arithmetic on small spatial sizes
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]

use candle_core::{Result, Tensor, D};

/// Source taps for one output coordinate of a linear resize.
fn linear_taps(input: usize, output: usize, align_corners: bool) -> (Vec<u32>, Vec<u32>, Vec<f32>) {
    let mut lo = Vec::with_capacity(output);
    let mut hi = Vec::with_capacity(output);
    let mut frac = Vec::with_capacity(output);

    let last = input.saturating_sub(1);
    let scale = if align_corners {
        if output > 1 {
            last as f64 / (output - 1) as f64
        } else {
            0.0
        }
    } else {
        input as f64 / output as f64
    };

    for dst in 0..output {
        let src = if align_corners {
            dst as f64 * scale
        } else {
            ((dst as f64 + 0.5) * scale - 0.5).max(0.0)
        };
        let i0 = (src.floor() as usize).min(last);
        let i1 = (i0 + 1).min(last);
        lo.push(i0 as u32);
        hi.push(i1 as u32);
        frac.push((src - i0 as f64) as f32);
    }

    (lo, hi, frac)
}

/// Linear interpolation along a single dimension.
fn resize_linear_dim(x: &Tensor, dim: usize, output: usize, align_corners: bool) -> Result<Tensor> {
    let input = x.dim(dim)?;
    if input == output {
        return Ok(x.clone());
    }

    let (lo, hi, frac) = linear_taps(input, output, align_corners);
    let device = x.device();
    let lo = Tensor::from_vec(lo, output, device)?;
    let hi = Tensor::from_vec(hi, output, device)?;

    let mut weight_shape = vec![1; x.rank()];
    weight_shape[dim] = output;
    let weight = Tensor::from_vec(frac, weight_shape, device)?.to_dtype(x.dtype())?;

    let a = x.index_select(&lo, dim)?;
    let b = x.index_select(&hi, dim)?;
    a.clone() + (b - a)?.broadcast_mul(&weight)?
}

/// Bilinear resize of a `(B, C, H, W)` tensor.
///
/// `align_corners = false` matches `cv2.INTER_LINEAR` and the default
/// half-pixel sampling of `F.interpolate`; no antialiasing is applied
/// when downscaling.
///
/// # Errors
///
/// Returns an error if `x` is not a 4D tensor.
pub fn resize_bilinear(x: &Tensor, height: usize, width: usize, align_corners: bool) -> Result<Tensor> {
    let (_, _, _, _) = x.dims4()?;
    let x = resize_linear_dim(x, 2, height, align_corners)?;
    resize_linear_dim(&x, 3, width, align_corners)
}

/// Bilinear resize of `x` to the spatial size of `target`, without corner alignment.
///
/// # Errors
///
/// Returns an error if either tensor is not 4D.
pub fn resize_like(x: &Tensor, target: &Tensor) -> Result<Tensor> {
    let (_, _, height, width) = target.dims4()?;
    resize_bilinear(x, height, width, false)
}

/// Reflection indices for a padded axis (edge sample not repeated).
fn reflect_indices(len: usize, pad: usize) -> Vec<u32> {
    let len = len as i64;
    let pad = pad as i64;
    (-pad..len + pad)
        .map(|i| {
            let r = if i < 0 {
                -i
            } else if i >= len {
                2 * (len - 1) - i
            } else {
                i
            };
            r as u32
        })
        .collect()
}

/// Reflect-pads both spatial dimensions of a `(B, C, H, W)` tensor.
///
/// # Errors
///
/// Returns an error if `pad` is not smaller than both spatial dimensions,
/// or if `x` is not 4D.
pub fn pad_reflect(x: &Tensor, pad: usize) -> Result<Tensor> {
    let (_, _, h, w) = x.dims4()?;
    if pad == 0 {
        return Ok(x.clone());
    }
    if pad >= h || pad >= w {
        candle_core::bail!("reflect padding {pad} needs spatial dims larger than the pad, got {h}x{w}");
    }

    let rows = reflect_indices(h, pad);
    let rows_len = rows.len();
    let rows = Tensor::from_vec(rows, rows_len, x.device())?;
    let cols = reflect_indices(w, pad);
    let cols_len = cols.len();
    let cols = Tensor::from_vec(cols, cols_len, x.device())?;

    x.index_select(&rows, 2)?.index_select(&cols, 3)
}

/// Min-max normalises each sample of `x` to `[0, 1]`.
///
/// Computes `(x - min) / (max - min + epsilon)` over all non-batch
/// dimensions.
///
/// # Errors
///
/// Returns an error if `x` has no batch dimension.
pub fn min_max_normalize(x: &Tensor, epsilon: f64) -> Result<Tensor> {
    let flat = x.flatten_from(1)?;
    let min = flat.min_keepdim(D::Minus1)?;
    let max = flat.max_keepdim(D::Minus1)?;
    let range = (max - &min)?.affine(1.0, epsilon)?;
    let normalized = flat.broadcast_sub(&min)?.broadcast_div(&range)?;
    normalized.reshape(x.shape())
}
