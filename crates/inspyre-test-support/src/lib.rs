//! Test support utilities for inspyre.
//!
//! Provides synthetic image builders, mock backbones, and small
//! random-weight models for testing the saliency pipeline without a
//! pretrained checkpoint.
//!
//! # Example
//!
//! ```
//! use inspyre_test_support::{random_model, SyntheticImageBuilder};
//!
//! let (model, calls) = random_model().unwrap();
//! let image = SyntheticImageBuilder::centered_disk(80, 60, 20);
//! let prediction = model.predict_image(&image).unwrap();
//!
//! assert_eq!(calls.count(), 1);
//! assert_eq!(prediction.map.dims4().unwrap(), (1, 1, 64, 64));
//! ```

mod builders;
mod mocks;
mod models;

pub use builders::SyntheticImageBuilder;
pub use mocks::{BackboneCalls, CountingBackbone, PoolingBackbone};
pub use models::{random_model, random_model_with, tiny_config, TestModel};
