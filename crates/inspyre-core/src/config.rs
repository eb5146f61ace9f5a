//! Configuration for the saliency network and its preprocessing.
//!
//! Supports TOML configuration from:
//! - XDG config: `~/.config/inspyre/config.toml` (lowest priority)
//! - Project-local: `.inspyre.toml` (searched up directory tree)
//! - Programmatic overrides on the resolved [`InferenceConfig`] (highest)

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{debug, info, warn};

/// Hardcoded defaults, matching the released SwinB checkpoint.
mod defaults {
    pub const DEPTH: usize = 64;
    pub const IN_CHANNELS: [usize; 5] = [128, 128, 256, 512, 1024];
    pub const BASE_SIZE: [usize; 2] = [384, 384];
    pub const THRESHOLD: u32 = 512;
    pub const LONG_SIDE_CAP: u32 = 1280;
    pub const SIZE_MULTIPLE: u32 = 32;
    pub const KERNEL_SIZE: usize = 7;
    pub const SIGMA: f64 = 1.0;
    pub const TRANSITION_KERNELS: [usize; 3] = [17, 9, 5];
    pub const EPSILON: f64 = 1e-8;
}

/// Network shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelConfig {
    /// Channel depth of every refined feature map.
    pub depth: usize,
    /// Channels of the five backbone stages, finest first.
    pub in_channels: [usize; 5],
    /// Low-resolution input size `[h, w]`; also sets the SICA pooling grids.
    pub base_size: [usize; 2],
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            depth: defaults::DEPTH,
            in_channels: defaults::IN_CHANNELS,
            base_size: defaults::BASE_SIZE,
        }
    }
}

impl ModelConfig {
    /// Pooling grid of a SICA stage: `base_size / 2^stage`.
    #[must_use]
    pub const fn stage_size(&self, stage: u32) -> (usize, usize) {
        let div = 1 << stage;
        (self.base_size[0] / div, self.base_size[1] / div)
    }
}

/// Input resizing rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreprocessConfig {
    /// Both sides must reach this size for the high-resolution pass.
    pub threshold: u32,
    /// Cap applied to the shorter side before rounding.
    pub long_side_cap: u32,
    /// High-resolution sides are rounded to a multiple of this.
    pub size_multiple: u32,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            threshold: defaults::THRESHOLD,
            long_side_cap: defaults::LONG_SIDE_CAP,
            size_multiple: defaults::SIZE_MULTIPLE,
        }
    }
}

/// Pyramid, blending and normalisation constants.
#[derive(Debug, Clone, PartialEq)]
pub struct PyramidConfig {
    /// Gaussian kernel size of the image pyramid.
    pub kernel_size: usize,
    /// Gaussian sigma of the image pyramid.
    pub sigma: f64,
    /// Structuring element sizes of transitions 0, 1, 2 (finest first).
    pub transition_kernels: [usize; 3],
    /// Added to the min-max range of the final map.
    pub epsilon: f64,
}

impl Default for PyramidConfig {
    fn default() -> Self {
        Self {
            kernel_size: defaults::KERNEL_SIZE,
            sigma: defaults::SIGMA,
            transition_kernels: defaults::TRANSITION_KERNELS,
            epsilon: defaults::EPSILON,
        }
    }
}

/// Fully resolved configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InferenceConfig {
    /// Network shape.
    pub model: ModelConfig,
    /// Input resizing rules.
    pub preprocess: PreprocessConfig,
    /// Pyramid and blending constants.
    pub pyramid: PyramidConfig,
}

impl InferenceConfig {
    /// Configuration of the SwinB variant: channels `[128, 128, 256, 512, 1024]`,
    /// depth 64, base size 384×384, threshold 512.
    #[must_use]
    pub fn swin_b() -> Self {
        Self::default()
    }

    /// Load configuration from XDG and project-local files.
    ///
    /// Priority (lowest to highest):
    /// 1. Hardcoded defaults
    /// 2. XDG config: `~/.config/inspyre/config.toml`
    /// 3. Project-local: `.inspyre.toml` (searched up from cwd)
    ///
    /// Missing or unreadable files are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the merged configuration is invalid.
    pub fn load() -> Result<Self> {
        let mut layer = ConfigLayer::default();

        if let Some(xdg_path) = xdg_config_path() {
            if xdg_path.exists() {
                info!("Loading XDG config: {}", xdg_path.display());
                if let Some(xdg_layer) = load_file(&xdg_path) {
                    layer = xdg_layer;
                }
            } else {
                debug!("XDG config not found: {}", xdg_path.display());
            }
        }

        if let Some(project_path) = find_project_config() {
            info!("Loading project config: {}", project_path.display());
            if let Some(project_layer) = load_file(&project_path) {
                layer.merge(project_layer);
            }
        }

        let config = layer.apply(Self::default());
        config.validate()?;
        Ok(config)
    }

    /// Parses a TOML document on top of the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is malformed or the result is invalid.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let layer: ConfigLayer = toml::from_str(content).context("Failed to parse config")?;
        let config = layer.apply(Self::default());
        config.validate()?;
        Ok(config)
    }

    /// Reads a TOML file on top of the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or is invalid.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Validate configuration values are within acceptable ranges.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        let model = &self.model;
        if model.depth == 0 || model.depth % 8 != 0 {
            bail!("model.depth must be a positive multiple of 8, got {}", model.depth);
        }
        if model.in_channels.contains(&0) {
            bail!("model.in_channels must all be positive, got {:?}", model.in_channels);
        }
        if model.base_size.iter().any(|&s| s == 0 || s % 4 != 0) {
            bail!(
                "model.base_size must be positive multiples of 4, got {:?}",
                model.base_size
            );
        }

        let preprocess = &self.preprocess;
        if preprocess.size_multiple == 0 {
            bail!("preprocess.size_multiple must be positive");
        }
        if preprocess.threshold < preprocess.size_multiple {
            bail!(
                "preprocess.threshold ({}) must be at least preprocess.size_multiple ({})",
                preprocess.threshold,
                preprocess.size_multiple
            );
        }
        if preprocess.long_side_cap < preprocess.threshold {
            bail!(
                "preprocess.long_side_cap ({}) must not be below preprocess.threshold ({})",
                preprocess.long_side_cap,
                preprocess.threshold
            );
        }

        let pyramid = &self.pyramid;
        if pyramid.kernel_size % 2 == 0 {
            bail!("pyramid.kernel_size must be odd, got {}", pyramid.kernel_size);
        }
        if let Some(k) = pyramid.transition_kernels.iter().find(|&&k| k % 2 == 0) {
            bail!("pyramid.transition_kernels must be odd, got {k}");
        }
        if pyramid.sigma <= 0.0 {
            bail!("pyramid.sigma must be positive, got {}", pyramid.sigma);
        }
        if pyramid.epsilon <= 0.0 {
            bail!("pyramid.epsilon must be positive, got {}", pyramid.epsilon);
        }

        Ok(())
    }
}

/// One configuration file; unset keys fall through to lower layers.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct ConfigLayer {
    /// `[model]` section.
    pub model: ModelLayer,
    /// `[preprocess]` section.
    pub preprocess: PreprocessLayer,
    /// `[pyramid]` section.
    pub pyramid: PyramidLayer,
}

/// `[model]` section of a configuration file.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct ModelLayer {
    /// Channel depth.
    pub depth: Option<usize>,
    /// Backbone stage channels.
    pub in_channels: Option<[usize; 5]>,
    /// Low-resolution input size.
    pub base_size: Option<[usize; 2]>,
}

/// `[preprocess]` section of a configuration file.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct PreprocessLayer {
    /// High-resolution threshold.
    pub threshold: Option<u32>,
    /// Shorter-side cap.
    pub long_side_cap: Option<u32>,
    /// Rounding multiple.
    pub size_multiple: Option<u32>,
}

/// `[pyramid]` section of a configuration file.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct PyramidLayer {
    /// Gaussian kernel size.
    pub kernel_size: Option<usize>,
    /// Gaussian sigma.
    pub sigma: Option<f64>,
    /// Transition element sizes.
    pub transition_kernels: Option<[usize; 3]>,
    /// Normalisation epsilon.
    pub epsilon: Option<f64>,
}

impl ConfigLayer {
    /// Merge another layer into this one.
    /// Values from `other` override values in `self` when present.
    pub fn merge(&mut self, other: Self) {
        self.model.depth = other.model.depth.or(self.model.depth);
        self.model.in_channels = other.model.in_channels.or(self.model.in_channels);
        self.model.base_size = other.model.base_size.or(self.model.base_size);

        self.preprocess.threshold = other.preprocess.threshold.or(self.preprocess.threshold);
        self.preprocess.long_side_cap = other
            .preprocess
            .long_side_cap
            .or(self.preprocess.long_side_cap);
        self.preprocess.size_multiple = other
            .preprocess
            .size_multiple
            .or(self.preprocess.size_multiple);

        self.pyramid.kernel_size = other.pyramid.kernel_size.or(self.pyramid.kernel_size);
        self.pyramid.sigma = other.pyramid.sigma.or(self.pyramid.sigma);
        self.pyramid.transition_kernels = other
            .pyramid
            .transition_kernels
            .or(self.pyramid.transition_kernels);
        self.pyramid.epsilon = other.pyramid.epsilon.or(self.pyramid.epsilon);
    }

    /// Applies the set keys of this layer on top of `base`.
    #[must_use]
    pub fn apply(self, mut base: InferenceConfig) -> InferenceConfig {
        let model = &mut base.model;
        model.depth = self.model.depth.unwrap_or(model.depth);
        model.in_channels = self.model.in_channels.unwrap_or(model.in_channels);
        model.base_size = self.model.base_size.unwrap_or(model.base_size);

        let preprocess = &mut base.preprocess;
        preprocess.threshold = self.preprocess.threshold.unwrap_or(preprocess.threshold);
        preprocess.long_side_cap = self
            .preprocess
            .long_side_cap
            .unwrap_or(preprocess.long_side_cap);
        preprocess.size_multiple = self
            .preprocess
            .size_multiple
            .unwrap_or(preprocess.size_multiple);

        let pyramid = &mut base.pyramid;
        pyramid.kernel_size = self.pyramid.kernel_size.unwrap_or(pyramid.kernel_size);
        pyramid.sigma = self.pyramid.sigma.unwrap_or(pyramid.sigma);
        pyramid.transition_kernels = self
            .pyramid
            .transition_kernels
            .unwrap_or(pyramid.transition_kernels);
        pyramid.epsilon = self.pyramid.epsilon.unwrap_or(pyramid.epsilon);

        base
    }
}

/// Get the XDG config file path.
fn xdg_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("inspyre").join("config.toml"))
}

/// Find project-local config by searching up from current directory.
fn find_project_config() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    find_config_in_parents(&cwd)
}

/// Search for `.inspyre.toml` in the given directory and its parents.
fn find_config_in_parents(start: &Path) -> Option<PathBuf> {
    let mut current = Some(start);

    while let Some(dir) = current {
        let config_path = dir.join(".inspyre.toml");
        if config_path.exists() {
            return Some(config_path);
        }
        current = dir.parent();
    }

    None
}

/// Load and parse a TOML config layer.
fn load_file(path: &Path) -> Option<ConfigLayer> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to read config file {}: {}", path.display(), e);
            return None;
        }
    };

    match toml::from_str(&content) {
        Ok(layer) => Some(layer),
        Err(e) => {
            warn!("Failed to parse config file {}: {}", path.display(), e);
            None
        }
    }
}
