//! Saliency inference engine using Candle.
//!
//! Provides the InSPyReNet network and its building blocks:
//! - context encoders and the pyramid anchor decoder
//! - SICA refinement stages
//! - Laplacian image pyramid and transition masks
//! - input preprocessing, checkpoint loading and device selection

mod context;
mod decoder;
mod device;
mod inspyrenet;
mod layers;
mod loader;
mod preprocess;
mod pyramid;
mod sica;
mod transition;
pub mod utils;

pub use context::ContextEncoder;
pub use decoder::Decoder;
pub use device::get_device;
pub use inspyrenet::InSPyReNet;
pub use layers::{AttentionAxis, ConvBn, SelfAttention};
pub use loader::load_safetensors;
pub use preprocess::{
    bgr_to_rgb_image, rgb_to_tensor, HighResInput, PreparedInput, Preprocessor, ResizePlan,
};
pub use pyramid::{gaussian_taps, ImagePyramid};
pub use sica::Sica;
pub use transition::{ellipse_element, Transition};
