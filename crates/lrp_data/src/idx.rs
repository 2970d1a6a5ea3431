//! Reader for the IDX format used by the MNIST distribution.
//!
//! Only unsigned-byte payloads are supported: rank 3 for image files
//! (magic `0x00000803`) and rank 1 for label files (magic `0x00000801`).

use std::path::{Path, PathBuf};

use ndarray::Array4;

use crate::dataset::ImageDataset;
use crate::error::{DataError, Result};

const IMAGES_MAGIC: u32 = 0x0000_0803;
const LABELS_MAGIC: u32 = 0x0000_0801;

/// Which half of MNIST to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MnistSplit {
    /// The 60k training images.
    Train,
    /// The 10k test images.
    Test,
}

impl MnistSplit {
    fn file_names(self) -> (&'static str, &'static str) {
        match self {
            MnistSplit::Train => ("train-images-idx3-ubyte", "train-labels-idx1-ubyte"),
            MnistSplit::Test => ("t10k-images-idx3-ubyte", "t10k-labels-idx1-ubyte"),
        }
    }
}

/// Load one MNIST split from a directory holding the uncompressed IDX files.
///
/// Pixels are scaled to `[0, 1]` and laid out as `(N, 1, 28, 28)`.
///
/// # Errors
///
/// Returns an error if a file is missing, malformed, or the image and label
/// counts disagree.
pub fn load_mnist(dir: impl AsRef<Path>, split: MnistSplit) -> Result<ImageDataset> {
    let dir = dir.as_ref();
    let (images_file, labels_file) = split.file_names();
    let images = read_idx_images(dir.join(images_file))?;
    let labels = read_idx_labels(dir.join(labels_file))?;
    tracing::debug!(
        split = ?split,
        n_images = images.shape()[0],
        "loaded MNIST split"
    );
    ImageDataset::from_arrays(images, Some(labels))
}

/// Read an IDX image file into `(N, 1, H, W)` with values scaled to `[0, 1]`.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not a rank-3 ubyte IDX file.
pub fn read_idx_images(path: impl AsRef<Path>) -> Result<Array4<f32>> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;
    let mut reader = IdxReader::new(path, &bytes);

    reader.expect_magic(IMAGES_MAGIC)?;
    let n = reader.read_u32()? as usize;
    let height = reader.read_u32()? as usize;
    let width = reader.read_u32()? as usize;
    let len = n
        .checked_mul(height)
        .and_then(|len| len.checked_mul(width))
        .ok_or_else(|| reader.error(format!("{n}x{height}x{width} images overflow")))?;
    let pixels = reader.payload(len)?;

    let values: Vec<f32> = pixels.iter().map(|&p| f32::from(p) / 255.0).collect();
    Array4::from_shape_vec((n, 1, height, width), values).map_err(|e| reader.error(e.to_string()))
}

/// Read an IDX label file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not a rank-1 ubyte IDX file.
pub fn read_idx_labels(path: impl AsRef<Path>) -> Result<Vec<usize>> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;
    let mut reader = IdxReader::new(path, &bytes);

    reader.expect_magic(LABELS_MAGIC)?;
    let n = reader.read_u32()? as usize;
    Ok(reader.payload(n)?.iter().map(|&l| usize::from(l)).collect())
}

struct IdxReader<'a> {
    path: PathBuf,
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> IdxReader<'a> {
    fn new(path: &Path, bytes: &'a [u8]) -> Self {
        Self {
            path: path.to_path_buf(),
            bytes,
            offset: 0,
        }
    }

    fn error(&self, reason: impl Into<String>) -> DataError {
        DataError::IdxFormat {
            path: self.path.display().to_string(),
            reason: reason.into(),
        }
    }

    fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.bytes;
        let end = self.offset + 4;
        let chunk = bytes
            .get(self.offset..end)
            .ok_or_else(|| self.error("truncated header"))?;
        self.offset = end;
        Ok(u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
    }

    fn expect_magic(&mut self, expected: u32) -> Result<()> {
        let magic = self.read_u32()?;
        if magic != expected {
            return Err(self.error(format!(
                "magic {magic:#010x}, expected {expected:#010x}"
            )));
        }
        Ok(())
    }

    fn payload(&self, len: usize) -> Result<&'a [u8]> {
        let bytes = self.bytes;
        let remaining = bytes.len() - self.offset;
        if remaining != len {
            return Err(self.error(format!("payload has {remaining} bytes, header says {len}")));
        }
        Ok(&bytes[self.offset..])
    }
}
