//! Core domain types for saliency inference.

mod pyramid;
mod saliency;

pub use pyramid::SaliencyPyramid;
pub use saliency::{InferencePath, Prediction, SaliencyMap};
