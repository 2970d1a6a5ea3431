//! # lrp_data
//!
//! The data-loader side of lrp-rs.
//!
//! This crate provides:
//! - [`ImageDataset`] for in-memory `(N, C, H, W)` images with labels
//! - [`DataLoader`] for restartable, seeded batch iteration
//! - [`load_mnist`] for reading the MNIST IDX files
//!
//! ## Example
//!
//! ```rust,ignore
//! use lrp_data::{load_mnist, DataLoader, MnistSplit};
//! use lrp_core::Seed;
//!
//! let train = load_mnist("data/mnist", MnistSplit::Train)?;
//! let loader = DataLoader::builder(train)
//!     .batch_size(128)
//!     .seed(Seed::new(42))
//!     .build()?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod dataset;
mod error;
mod idx;
mod loader;

pub use dataset::ImageDataset;
pub use error::{DataError, Result};
pub use idx::{load_mnist, read_idx_images, read_idx_labels, MnistSplit};
pub use loader::{DataLoader, DataLoaderBuilder, DataLoaderIter};
