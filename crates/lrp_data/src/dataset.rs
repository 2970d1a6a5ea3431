//! In-memory image datasets.

use ndarray::{Array4, ArrayView3, Axis};

use crate::error::{DataError, Result};

/// A set of images in `(N, C, H, W)` layout with optional class labels.
///
/// # Example
///
/// ```rust
/// use lrp_data::ImageDataset;
/// use ndarray::Array4;
///
/// let x = Array4::<f32>::zeros((10, 1, 28, 28));
/// let dataset = ImageDataset::from_arrays(x, Some(vec![0; 10])).unwrap();
/// assert_eq!(dataset.len(), 10);
/// ```
#[derive(Debug, Clone)]
pub struct ImageDataset {
    x: Array4<f32>,
    labels: Option<Vec<usize>>,
}

impl ImageDataset {
    /// Create a dataset from an image array and optional labels.
    ///
    /// # Errors
    ///
    /// Returns an error if the label count does not match the number of images.
    pub fn from_arrays(x: Array4<f32>, labels: Option<Vec<usize>>) -> Result<Self> {
        let n_samples = x.shape()[0];
        if let Some(ref labels) = labels {
            if labels.len() != n_samples {
                return Err(DataError::InvalidShape(format!(
                    "x has {} samples but {} labels were given",
                    n_samples,
                    labels.len()
                )));
            }
        }
        Ok(Self { x, labels })
    }

    /// Number of images.
    #[must_use]
    pub fn len(&self) -> usize {
        self.x.shape()[0]
    }

    /// True if there are no images.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Per-image dimensions `(C, H, W)`.
    #[must_use]
    pub fn image_dims(&self) -> (usize, usize, usize) {
        let s = self.x.shape();
        (s[1], s[2], s[3])
    }

    /// Flattened feature count per image.
    #[must_use]
    pub fn features(&self) -> usize {
        let (c, h, w) = self.image_dims();
        c * h * w
    }

    /// The raw image array.
    #[must_use]
    pub fn x(&self) -> &Array4<f32> {
        &self.x
    }

    /// Labels, if the dataset has them.
    #[must_use]
    pub fn labels(&self) -> Option<&[usize]> {
        self.labels.as_deref()
    }

    /// One image and its label.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::IndexOutOfBounds`] for an invalid index.
    pub fn get(&self, index: usize) -> Result<(ArrayView3<'_, f32>, Option<usize>)> {
        if index >= self.len() {
            return Err(DataError::IndexOutOfBounds {
                index,
                length: self.len(),
            });
        }
        let image = self.x.index_axis(Axis(0), index);
        let label = self.labels.as_ref().map(|labels| labels[index]);
        Ok((image, label))
    }

    /// New dataset holding the given samples in the given order.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::IndexOutOfBounds`] if any index is invalid.
    pub fn subset(&self, indices: &[usize]) -> Result<Self> {
        if let Some(&index) = indices.iter().find(|&&i| i >= self.len()) {
            return Err(DataError::IndexOutOfBounds {
                index,
                length: self.len(),
            });
        }
        let x = self.x.select(Axis(0), indices);
        let labels = self
            .labels
            .as_ref()
            .map(|labels| indices.iter().map(|&i| labels[i]).collect());
        Ok(Self { x, labels })
    }

    /// The first `n` samples (or all of them if there are fewer).
    #[must_use]
    pub fn head(&self, n: usize) -> Self {
        let n = n.min(self.len());
        Self {
            x: self.x.slice(ndarray::s![..n, .., .., ..]).to_owned(),
            labels: self.labels.as_ref().map(|labels| labels[..n].to_vec()),
        }
    }
}
