//! Scale-invariant context attention (SICA).
//!
//! Each stage splits the image into foreground, background and uncertain
//! regions using the previous saliency estimate (and optionally the
//! previous Laplacian residual), pools object-context vectors from those
//! regions and lets every pixel attend to them. The stage predicts the
//! Laplacian residual at its own resolution.

use candle_core::{Module, Result, Tensor};
use candle_nn::{ops::sigmoid, Init, VarBuilder};

use super::layers::ConvBn;
use super::utils::resize_bilinear;

/// Resizes a logit map to `h × w` and splits its probabilities around a
/// learned threshold into `(above, below, signed offset)`.
fn split_regions(logits: &Tensor, threshold: &Tensor, h: usize, w: usize) -> Result<(Tensor, Tensor, Tensor)> {
    let probs = sigmoid(&resize_bilinear(logits, h, w, false)?)?;
    let p = probs.broadcast_sub(threshold)?;
    let fg = p.clamp(0f32, 1f32)?;
    let bg = p.neg()?.clamp(0f32, 1f32)?;
    Ok((fg, bg, p))
}

/// One SICA refinement stage.
#[derive(Debug, Clone)]
pub struct Sica {
    conv_query: [ConvBn; 2],
    conv_key: [ConvBn; 2],
    conv_value: [ConvBn; 2],
    conv_out1: ConvBn,
    conv_out2: ConvBn,
    conv_out3: ConvBn,
    conv_out4: ConvBn,
    threshold: Tensor,
    lthreshold: Option<Tensor>,
    depth: usize,
    stage_size: (usize, usize),
}

impl Sica {
    /// Creates a stage.
    ///
    /// * `in_channels` - channels of the incoming feature map
    /// * `stage_size` - fixed `(h, w)` grid the context is pooled on
    /// * `residual_input` - whether the stage is conditioned on the previous residual
    ///
    /// # Errors
    ///
    /// Returns an error if the weights cannot be loaded.
    pub fn new(
        in_channels: usize,
        depth: usize,
        stage_size: (usize, usize),
        residual_input: bool,
        vb: VarBuilder,
    ) -> Result<Self> {
        let pair = |kernel: usize, vb: VarBuilder| -> Result<[ConvBn; 2]> {
            Ok([
                ConvBn::new(in_channels, depth, kernel, vb.pp("0"))?.with_relu(),
                ConvBn::new(depth, depth, kernel, vb.pp("1"))?.with_relu(),
            ])
        };

        let lthreshold = if residual_input {
            Some(vb.get_with_hints(1, "lthreshold", Init::Const(0.5))?)
        } else {
            None
        };

        Ok(Self {
            conv_query: pair(3, vb.pp("conv_query"))?,
            conv_key: pair(1, vb.pp("conv_key"))?,
            conv_value: pair(1, vb.pp("conv_value"))?,
            conv_out1: ConvBn::new(depth, depth, 3, vb.pp("conv_out1"))?.with_relu(),
            conv_out2: ConvBn::new(in_channels + depth, depth, 3, vb.pp("conv_out2"))?.with_relu(),
            conv_out3: ConvBn::new(depth, depth, 3, vb.pp("conv_out3"))?.with_relu(),
            conv_out4: ConvBn::new(depth, 1, 1, vb.pp("conv_out4"))?,
            threshold: vb.get_with_hints(1, "threshold", Init::Const(0.5))?,
            lthreshold,
            depth,
            stage_size,
        })
    }

    /// Whether this stage consumes the previous Laplacian residual.
    #[must_use]
    pub const fn takes_residual(&self) -> bool {
        self.lthreshold.is_some()
    }

    /// Number of context regions pooled by this stage.
    const fn contexts(&self) -> usize {
        if self.takes_residual() {
            5
        } else {
            3
        }
    }

    /// Region probabilities `[fg, bg, cg]`, followed by `[fp, bp]` when the
    /// stage consumes a residual, at `h × w`.
    fn regions(&self, smap: &Tensor, lmap: Option<&Tensor>, h: usize, w: usize) -> Result<Tensor> {
        let (fg, bg, p) = split_regions(smap, &self.threshold, h, w)?;
        let cg = p.abs()?.neg()?.broadcast_add(&self.threshold)?;
        let mut regions = vec![fg, bg, cg];
        if let (Some(lthreshold), Some(lmap)) = (&self.lthreshold, lmap) {
            let (fp, bp, _) = split_regions(lmap, lthreshold, h, w)?;
            regions.push(fp);
            regions.push(bp);
        }
        if regions.len() != self.contexts() {
            candle_core::bail!(
                "stage expects {} context regions, got {}",
                self.contexts(),
                regions.len()
            );
        }
        Tensor::cat(&regions, 1)
    }

    /// Pools one `C`-dim context vector per region on the stage grid.
    ///
    /// Returns `(B, C, ctx, 1)`.
    fn pool_context(&self, x: &Tensor, prob: &Tensor) -> Result<Tensor> {
        let (b, c, _, _) = x.dims4()?;
        let ctx = prob.dim(1)?;
        let (sh, sw) = self.stage_size;
        let f = resize_bilinear(x, sh, sw, false)?.reshape((b, sh * sw, c))?;
        let prob = resize_bilinear(prob, sh, sw, false)?.reshape((b, ctx, sh * sw))?;
        prob.matmul(&f)?.transpose(1, 2)?.contiguous()?.unsqueeze(3)
    }

    /// Refines `x` given the previous saliency `smap` and optional residual `lmap`.
    ///
    /// Returns the refined feature map and the residual logit, both at
    /// `x`'s spatial size. A residual passed to a stage built without
    /// residual conditioning is ignored.
    ///
    /// # Errors
    ///
    /// Returns an error on shape mismatch.
    pub fn forward(&self, x: &Tensor, smap: &Tensor, lmap: Option<&Tensor>) -> Result<(Tensor, Tensor)> {
        let (b, _, h, w) = x.dims4()?;

        let prob = self.regions(smap, lmap, h, w)?;
        let ctx = prob.dim(1)?;
        let context = self.pool_context(x, &prob)?;

        let query = self.conv_query[1].forward(&self.conv_query[0].forward(x)?)?;
        let query = query.reshape((b, self.depth, h * w))?.transpose(1, 2)?.contiguous()?;
        let key = self.conv_key[1].forward(&self.conv_key[0].forward(&context)?)?;
        let key = key.reshape((b, self.depth, ctx))?;
        let value = self.conv_value[1].forward(&self.conv_value[0].forward(&context)?)?;
        let value = value.reshape((b, self.depth, ctx))?.transpose(1, 2)?.contiguous()?;

        let refined = scaled_attention(&query, &key, &value)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((b, self.depth, h, w))?;
        let refined = self.conv_out1.forward(&refined)?;

        let x = self.conv_out2.forward(&Tensor::cat(&[x, &refined], 1)?)?;
        let x = self.conv_out3.forward(&x)?;
        let out = self.conv_out4.forward(&x)?;

        Ok((x, out))
    }
}

/// `softmax(query · key / sqrt(depth)) · value`.
///
/// Shapes: query `(B, N, depth)`, key `(B, depth, ctx)`, value `(B, ctx, depth)`.
fn scaled_attention(query: &Tensor, key: &Tensor, value: &Tensor) -> Result<Tensor> {
    let depth = query.dim(2)?;
    #[allow(clippy::cast_precision_loss)]
    let scale = (depth as f64).powf(-0.5);
    let sim = candle_nn::ops::softmax_last_dim(&(query.matmul(key)? * scale)?)?;
    sim.matmul(value)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn stage(residual_input: bool) -> Sica {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        Sica::new(32, 16, (8, 8), residual_input, vb).unwrap()
    }

    #[test]
    fn test_coarsest_stage_without_residual() {
        let sica = stage(false);
        assert!(!sica.takes_residual());

        let x = Tensor::randn(0f32, 1.0, (1, 32, 12, 10), &Device::Cpu).unwrap();
        let smap = Tensor::randn(0f32, 1.0, (1, 1, 6, 5), &Device::Cpu).unwrap();
        let (f, p) = sica.forward(&x, &smap, None).unwrap();
        assert_eq!(f.dims4().unwrap(), (1, 16, 12, 10));
        assert_eq!(p.dims4().unwrap(), (1, 1, 12, 10));
    }

    #[test]
    fn test_residual_conditioned_stage() {
        let sica = stage(true);
        assert!(sica.takes_residual());

        let x = Tensor::randn(0f32, 1.0, (1, 32, 16, 16), &Device::Cpu).unwrap();
        let smap = Tensor::randn(0f32, 1.0, (1, 1, 8, 8), &Device::Cpu).unwrap();
        let lmap = Tensor::randn(0f32, 1.0, (1, 1, 8, 8), &Device::Cpu).unwrap();
        let (f, p) = sica.forward(&x, &smap, Some(&lmap)).unwrap();
        assert_eq!(f.dims4().unwrap(), (1, 16, 16, 16));
        assert_eq!(p.dims4().unwrap(), (1, 1, 16, 16));
    }

    #[test]
    fn test_residual_conditioned_stage_requires_residual() {
        let sica = stage(true);
        let x = Tensor::randn(0f32, 1.0, (1, 32, 8, 8), &Device::Cpu).unwrap();
        let smap = Tensor::randn(0f32, 1.0, (1, 1, 4, 4), &Device::Cpu).unwrap();
        assert!(sica.forward(&x, &smap, None).is_err());
    }

    fn row(values: &[f32]) -> Tensor {
        Tensor::from_vec(values.to_vec(), (1, 1, 1, values.len()), &Device::Cpu).unwrap()
    }

    fn assert_close(actual: &[f32], expected: &[f32]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-5, "{actual:?} != {expected:?}");
        }
    }

    /// Region `i` of a `(1, ctx, 1, w)` probability tensor.
    fn region(prob: &Tensor, i: usize) -> Vec<f32> {
        prob.get(0).unwrap().get(i).unwrap().flatten_all().unwrap().to_vec1::<f32>().unwrap()
    }

    #[test]
    fn test_regions_split_around_threshold() {
        let ln3 = 3f32.ln();
        // Probabilities 0.5, 0.75, 0.25, ~1.0 against the initial threshold 0.5.
        let smap = row(&[0.0, ln3, -ln3, 20.0]);

        let prob = stage(false).regions(&smap, None, 1, 4).unwrap();
        assert_eq!(prob.dims4().unwrap(), (1, 3, 1, 4));
        assert_close(&region(&prob, 0), &[0.0, 0.25, 0.0, 0.5]);
        assert_close(&region(&prob, 1), &[0.0, 0.0, 0.25, 0.0]);
        assert_close(&region(&prob, 2), &[0.5, 0.25, 0.25, 0.0]);
    }

    #[test]
    fn test_regions_add_residual_split() {
        let ln3 = 3f32.ln();
        let smap = row(&[0.0, ln3, -ln3, 20.0]);
        let lmap = row(&[ln3, -ln3, 0.0, -20.0]);

        let prob = stage(true).regions(&smap, Some(&lmap), 1, 4).unwrap();
        assert_eq!(prob.dims4().unwrap(), (1, 5, 1, 4));
        assert_close(&region(&prob, 0), &[0.0, 0.25, 0.0, 0.5]);
        assert_close(&region(&prob, 3), &[0.25, 0.0, 0.0, 0.0]);
        assert_close(&region(&prob, 4), &[0.0, 0.25, 0.0, 0.5]);
    }

    #[test]
    fn test_pooled_context_has_one_vector_per_region() {
        let x = Tensor::ones((1, 32, 8, 8), DType::F32, &Device::Cpu).unwrap();
        // Logit 0 sits exactly on the threshold: only the uncertain region is set.
        let smap = Tensor::zeros((1, 1, 4, 4), DType::F32, &Device::Cpu).unwrap();

        let sica = stage(false);
        let prob = sica.regions(&smap, None, 8, 8).unwrap();
        let context = sica.pool_context(&x, &prob).unwrap();
        assert_eq!(context.dims4().unwrap(), (1, 32, 3, 1));

        let per_region = context.get(0).unwrap().get(0).unwrap().flatten_all().unwrap();
        // 64 grid cells × 0.5 for the uncertain region.
        assert_close(&per_region.to_vec1::<f32>().unwrap(), &[0.0, 0.0, 32.0]);

        let sica = stage(true);
        let prob = sica.regions(&smap, Some(&smap), 8, 8).unwrap();
        let context = sica.pool_context(&x, &prob).unwrap();
        assert_eq!(context.dims4().unwrap(), (1, 32, 5, 1));
    }

    #[test]
    fn test_scaled_attention_divides_by_sqrt_depth() {
        let depth = 16;
        let mut q = vec![0f32; depth];
        q[0] = 2.0;
        let query = Tensor::from_vec(q, (1, 1, depth), &Device::Cpu).unwrap();

        // Key column 0 matches the query with dot product 4, column 1 is orthogonal.
        let mut k = vec![0f32; depth * 2];
        k[0] = 2.0;
        let key = Tensor::from_vec(k, (1, depth, 2), &Device::Cpu).unwrap();

        let mut v = vec![0f32; 2 * depth];
        v[0] = 1.0;
        v[depth + 1] = 1.0;
        let value = Tensor::from_vec(v, (1, 2, depth), &Device::Cpu).unwrap();

        let out = scaled_attention(&query, &key, &value)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();

        // softmax([4, 0] / 4) = [e / (1 + e), 1 / (1 + e)]
        let e = std::f32::consts::E;
        assert!((out[0] - e / (1.0 + e)).abs() < 1e-5, "{out:?}");
        assert!((out[1] - 1.0 / (1.0 + e)).abs() < 1e-5, "{out:?}");
        assert!(out[2..].iter().all(|v| v.abs() < 1e-6));
    }
}
