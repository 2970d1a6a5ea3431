//! # lrp_models
//!
//! Explainable feed-forward classifiers for lrp-rs.
//!
//! This crate provides:
//! - [`DenseLayer`] and [`Sequential`]: the layer chain the explainer walks
//! - [`SequentialConfig`]: seeded, reproducible model construction
//! - [`ModelFingerprint`]: content hash used to invalidate fitted patterns
//! - [`checkpoint`]: weight and metadata persistence
//!
//! Only fully connected layers are modelled. Images are flattened to
//! `(N, C * H * W)` before the first layer, so convolutional or pooling
//! classifiers cannot be explained with these types.
//!
//! ```rust
//! use burn::prelude::*;
//! use lrp_core::backend::NdArray;
//! use lrp_models::SequentialConfig;
//!
//! let device = Default::default();
//! let model = SequentialConfig::new(16, 3)
//!     .with_hidden_sizes(vec![8])
//!     .init::<NdArray>(&device)
//!     .unwrap();
//! let images = Tensor::<NdArray, 4>::zeros([2, 1, 4, 4], &device);
//! assert_eq!(model.forward(images).dims(), [2, 3]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod checkpoint;
mod error;
mod fingerprint;
mod sequential;

pub use checkpoint::{load_model, save_model, CheckpointMetadata};
pub use error::{ModelError, Result};
pub use fingerprint::ModelFingerprint;
pub use sequential::{Activation, DenseLayer, Sequential, SequentialConfig};
