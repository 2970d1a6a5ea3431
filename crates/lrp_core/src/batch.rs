//! Labelled image batches.

use burn::prelude::*;

use crate::error::{CoreError, Result};

/// One batch of images in `(N, C, H, W)` layout with optional class labels.
///
/// This is what dataloaders yield and what the pattern fitter and the
/// explainers consume.
#[derive(Debug, Clone)]
pub struct ImageBatch<B: Backend> {
    /// Images, `(N, C, H, W)`.
    pub x: Tensor<B, 4>,
    /// Class label per image, if known.
    pub labels: Option<Vec<usize>>,
}

impl<B: Backend> ImageBatch<B> {
    /// Unlabelled batch.
    pub fn new(x: Tensor<B, 4>) -> Self {
        Self { x, labels: None }
    }

    /// Batch with one label per image.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ShapeMismatch`] if the label count differs from the batch size.
    pub fn with_labels(x: Tensor<B, 4>, labels: Vec<usize>) -> Result<Self> {
        let batch = x.dims()[0];
        if labels.len() != batch {
            return Err(CoreError::ShapeMismatch(format!(
                "x batch size {} != label count {}",
                batch,
                labels.len()
            )));
        }
        Ok(Self {
            x,
            labels: Some(labels),
        })
    }
}
