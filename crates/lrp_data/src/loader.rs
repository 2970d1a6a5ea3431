//! Restartable, seeded batch iteration over image datasets.

use burn::prelude::*;
use ndarray::Axis;
use rand::seq::SliceRandom;

use crate::dataset::ImageDataset;
use crate::error::{DataError, Result};
use lrp_core::{tensor::vec_to_tensor, ImageBatch, Seed};

/// A dataloader that produces [`ImageBatch`]es from an [`ImageDataset`].
///
/// Every call to [`DataLoader::iter`] restarts from the first batch, and with
/// a seed the visiting order is a pure function of `(seed, epoch)`, so two
/// passes over the same loader see the same batches in the same order.
///
/// # Example
///
/// ```rust,ignore
/// use lrp_data::{DataLoader, ImageDataset};
/// use lrp_core::Seed;
///
/// let loader = DataLoader::builder(dataset)
///     .batch_size(128)
///     .shuffle(true)
///     .seed(Seed::new(42))
///     .build()?;
///
/// for batch in loader.iter::<NdArray>(&device) {
///     let batch = batch?;
/// }
/// ```
pub struct DataLoader {
    dataset: ImageDataset,
    batch_size: usize,
    shuffle: bool,
    drop_last: bool,
    seed: Seed,
}

impl DataLoader {
    /// Create a new dataloader builder.
    #[must_use]
    pub fn builder(dataset: ImageDataset) -> DataLoaderBuilder {
        DataLoaderBuilder::new(dataset)
    }

    /// Get the dataset.
    #[must_use]
    pub fn dataset(&self) -> &ImageDataset {
        &self.dataset
    }

    /// Get the batch size.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Get the number of batches per pass.
    #[must_use]
    pub fn n_batches(&self) -> usize {
        let n = self.dataset.len();
        if self.drop_last {
            n / self.batch_size
        } else {
            n.div_ceil(self.batch_size)
        }
    }

    /// Get the total number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.dataset.len()
    }

    /// Check if the loader is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    /// Iterate over the first epoch's batches.
    #[must_use]
    pub fn iter<B: Backend>(&self, device: &B::Device) -> DataLoaderIter<'_, B> {
        self.iter_epoch(0, device)
    }

    /// Iterate over the batches of a given epoch.
    #[must_use]
    pub fn iter_epoch<B: Backend>(&self, epoch: usize, device: &B::Device) -> DataLoaderIter<'_, B> {
        DataLoaderIter::new(self, self.order(epoch), device.clone())
    }

    /// Sample visiting order for an epoch.
    fn order(&self, epoch: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..self.dataset.len()).collect();
        if self.shuffle {
            let mut rng = self.seed.derive_indexed("epoch", epoch).to_rng();
            indices.shuffle(&mut rng);
        }
        indices
    }
}

/// Builder for [`DataLoader`].
pub struct DataLoaderBuilder {
    dataset: ImageDataset,
    batch_size: usize,
    shuffle: bool,
    drop_last: bool,
    seed: Seed,
    limit: Option<usize>,
}

impl DataLoaderBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new(dataset: ImageDataset) -> Self {
        Self {
            dataset,
            batch_size: 128,
            shuffle: false,
            drop_last: false,
            seed: Seed::default(),
            limit: None,
        }
    }

    /// Set the batch size.
    #[must_use]
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Enable or disable shuffling.
    #[must_use]
    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    /// Enable or disable dropping the last incomplete batch.
    #[must_use]
    pub fn drop_last(mut self, drop_last: bool) -> Self {
        self.drop_last = drop_last;
        self
    }

    /// Set the random seed for shuffling.
    #[must_use]
    pub fn seed(mut self, seed: Seed) -> Self {
        self.seed = seed;
        self
    }

    /// Only use the first `limit` samples of the dataset.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Build the dataloader.
    ///
    /// # Errors
    ///
    /// Returns an error for a zero batch size or an empty dataset.
    pub fn build(self) -> Result<DataLoader> {
        if self.batch_size == 0 {
            return Err(DataError::InvalidBatchSize(
                "Batch size must be greater than 0".to_string(),
            ));
        }

        let dataset = match self.limit {
            Some(limit) => self.dataset.head(limit),
            None => self.dataset,
        };

        if dataset.is_empty() {
            return Err(DataError::EmptyDataset);
        }

        Ok(DataLoader {
            dataset,
            batch_size: self.batch_size,
            shuffle: self.shuffle,
            drop_last: self.drop_last,
            seed: self.seed,
        })
    }
}

/// Iterator over batches from a [`DataLoader`].
pub struct DataLoaderIter<'a, B: Backend> {
    loader: &'a DataLoader,
    device: B::Device,
    indices: Vec<usize>,
    current_batch: usize,
    n_batches: usize,
}

impl<'a, B: Backend> DataLoaderIter<'a, B> {
    fn new(loader: &'a DataLoader, indices: Vec<usize>, device: B::Device) -> Self {
        Self {
            loader,
            device,
            indices,
            current_batch: 0,
            n_batches: loader.n_batches(),
        }
    }

    fn create_batch(&self, indices: &[usize]) -> Result<ImageBatch<B>> {
        let dataset = &self.loader.dataset;
        let (channels, height, width) = dataset.image_dims();

        let images = dataset.x().select(Axis(0), indices);
        let values: Vec<f32> = images.iter().copied().collect();
        let x = vec_to_tensor::<B, 4>(
            values,
            [indices.len(), channels, height, width],
            &self.device,
        )?;

        match dataset.labels() {
            Some(labels) => {
                let batch_labels = indices.iter().map(|&i| labels[i]).collect();
                Ok(ImageBatch::with_labels(x, batch_labels)?)
            }
            None => Ok(ImageBatch::new(x)),
        }
    }
}

impl<B: Backend> Iterator for DataLoaderIter<'_, B> {
    type Item = Result<ImageBatch<B>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_batch >= self.n_batches {
            return None;
        }

        let start = self.current_batch * self.loader.batch_size;
        let end = std::cmp::min(start + self.loader.batch_size, self.indices.len());
        self.current_batch += 1;

        Some(self.create_batch(&self.indices[start..end]))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.n_batches - self.current_batch;
        (remaining, Some(remaining))
    }
}

impl<B: Backend> ExactSizeIterator for DataLoaderIter<'_, B> {}
