//! Saving and loading models.
//!
//! Weights go through Burn's record system as named MessagePack
//! (`<path>.mpk`). A JSON sidecar (`<path>.json`) stores the
//! [`SequentialConfig`] needed to rebuild the module skeleton together with
//! the fingerprint of the saved weights.
//!
//! ```rust,ignore
//! use lrp_models::checkpoint::{save_model, load_model};
//!
//! save_model(&model, &config, "mnist_mlp")?;
//! let (model, meta) = load_model::<NdArray>("mnist_mlp", &device)?;
//! ```

use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};
use crate::fingerprint::ModelFingerprint;
use crate::sequential::{Sequential, SequentialConfig};

/// Sidecar metadata stored next to a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Configuration used to build the model skeleton.
    pub config: SequentialConfig,
    /// Fingerprint of the saved weights.
    pub fingerprint: ModelFingerprint,
}

impl CheckpointMetadata {
    /// Save metadata to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load metadata from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Path of the metadata sidecar for a checkpoint base path.
pub fn metadata_path(base: impl AsRef<Path>) -> PathBuf {
    base.as_ref().with_extension("json")
}

/// Save weights and metadata under `base` (extension is replaced).
pub fn save_model<B: Backend>(
    model: &Sequential<B>,
    config: &SequentialConfig,
    base: impl AsRef<Path>,
) -> Result<CheckpointMetadata> {
    let base = base.as_ref();
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    model
        .clone()
        .save_file(base.to_path_buf(), &recorder)
        .map_err(|e| ModelError::Checkpoint(e.to_string()))?;

    let metadata = CheckpointMetadata {
        config: config.clone(),
        fingerprint: ModelFingerprint::of(model)?,
    };
    metadata.save(metadata_path(base))?;

    tracing::info!(path = %base.display(), fingerprint = %metadata.fingerprint.short(), "saved model");
    Ok(metadata)
}

/// Load a model saved with [`save_model`].
///
/// # Errors
///
/// Returns [`ModelError::Checkpoint`] if the weights cannot be read or no
/// longer match the fingerprint recorded in the sidecar.
pub fn load_model<B: Backend>(
    base: impl AsRef<Path>,
    device: &B::Device,
) -> Result<(Sequential<B>, CheckpointMetadata)> {
    let base = base.as_ref();
    let metadata = CheckpointMetadata::load(metadata_path(base))?;

    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    let model = metadata
        .config
        .init::<B>(device)?
        .load_file(base.to_path_buf(), &recorder, device)
        .map_err(|e| ModelError::Checkpoint(e.to_string()))?;

    let fingerprint = ModelFingerprint::of(&model)?;
    if fingerprint != metadata.fingerprint {
        return Err(ModelError::Checkpoint(format!(
            "weights at {} hash to {}, metadata records {}",
            base.display(),
            fingerprint.short(),
            metadata.fingerprint.short()
        )));
    }

    tracing::info!(path = %base.display(), fingerprint = %fingerprint.short(), "loaded model");
    Ok((model, metadata))
}
