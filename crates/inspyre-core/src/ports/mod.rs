//! Port definitions for hexagonal architecture.
//!
//! These traits define the boundaries between the inference core and
//! external collaborators.

mod backbone;

pub use backbone::{Backbone, BackboneFeatures};
