//! # lrp_core
//!
//! Shared building blocks for lrp-rs.
//!
//! This crate provides:
//! - [`Seed`] for reproducible weight initialisation and batch order
//! - [`ImageBatch`] for labelled `(N, C, H, W)` image data
//! - Host/device bridges between burn tensors and `ndarray`
//! - [`CoreError`] and the crate [`Result`] alias

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod batch;
mod error;
mod seed;
pub mod tensor;

pub use batch::ImageBatch;
pub use error::{CoreError, Result};
pub use seed::Seed;

/// Backend type aliases for convenience
pub mod backend {
    #[cfg(feature = "backend-ndarray")]
    pub use burn_ndarray::NdArray;
}
