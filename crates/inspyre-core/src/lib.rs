//! Inspyre Core - saliency detection with InSPyReNet
//!
//! This crate contains the InSPyReNet network (context encoders, decoder,
//! SICA stages, Laplacian image pyramid), dual-resolution prediction with
//! transition blending, and the layered configuration that drives it.
//! The pretrained backbone is supplied through the [`Backbone`] port.

pub mod config;
pub mod domain;
pub mod inference;
pub mod ports;

pub use config::InferenceConfig;
pub use domain::{InferencePath, Prediction, SaliencyMap, SaliencyPyramid};
pub use inference::{get_device, load_safetensors, InSPyReNet, PreparedInput, Preprocessor};
pub use ports::{Backbone, BackboneFeatures};
