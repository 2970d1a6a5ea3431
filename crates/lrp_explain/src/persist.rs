//! Pattern persistence.
//!
//! Pattern sets are written as a versioned JSON record. Array values are
//! stored as `f32` bit patterns so a store/load round trip is exact.

use std::path::{Path, PathBuf};

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{ExplainError, Result};
use crate::patterns::{Pattern, PatternSet, PatternVariant};
use lrp_models::ModelFingerprint;

/// Current record format version.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct PatternSetRecord {
    version: u32,
    variant: PatternVariant,
    fingerprint: ModelFingerprint,
    patterns: Vec<PatternRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PatternRecord {
    layer: usize,
    shape: [usize; 2],
    dtype: String,
    bits: Vec<u32>,
}

impl From<&Pattern> for PatternRecord {
    fn from(pattern: &Pattern) -> Self {
        let (rows, cols) = pattern.a.dim();
        Self {
            layer: pattern.layer,
            shape: [rows, cols],
            dtype: "f32".to_string(),
            bits: pattern.a.iter().map(|v| v.to_bits()).collect(),
        }
    }
}

impl PatternRecord {
    fn into_pattern(self, variant: PatternVariant) -> Result<Pattern> {
        if self.dtype != "f32" {
            return Err(ExplainError::Persistence(format!(
                "layer {} has unsupported dtype {}",
                self.layer, self.dtype
            )));
        }
        let values: Vec<f32> = self.bits.into_iter().map(f32::from_bits).collect();
        let a = Array2::from_shape_vec((self.shape[0], self.shape[1]), values).map_err(|e| {
            ExplainError::Persistence(format!("layer {} shape {:?}: {e}", self.layer, self.shape))
        })?;
        Ok(Pattern {
            layer: self.layer,
            variant,
            a,
        })
    }
}

/// Encodes and decodes [`PatternSet`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternStore;

impl PatternStore {
    /// Encode a pattern set.
    pub fn store(set: &PatternSet) -> Result<Vec<u8>> {
        let record = PatternSetRecord {
            version: FORMAT_VERSION,
            variant: set.variant,
            fingerprint: set.fingerprint.clone(),
            patterns: set.patterns.iter().map(PatternRecord::from).collect(),
        };
        Ok(serde_json::to_vec(&record)?)
    }

    /// Decode a pattern set.
    ///
    /// # Errors
    ///
    /// Returns [`ExplainError::Persistence`] for malformed records or an
    /// unsupported format version.
    pub fn load(bytes: &[u8]) -> Result<PatternSet> {
        let record: PatternSetRecord = serde_json::from_slice(bytes)?;
        if record.version != FORMAT_VERSION {
            return Err(ExplainError::Persistence(format!(
                "pattern record version {} is not supported (expected {})",
                record.version, FORMAT_VERSION
            )));
        }
        let variant = record.variant;
        let patterns = record
            .patterns
            .into_iter()
            .map(|p| p.into_pattern(variant))
            .collect::<Result<Vec<_>>>()?;
        Ok(PatternSet {
            variant,
            fingerprint: record.fingerprint,
            patterns,
        })
    }

    /// Write a pattern set to `path`.
    pub fn save(set: &PatternSet, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, Self::store(set)?)?;
        tracing::info!(path = %path.display(), variant = %set.variant, "saved patterns");
        Ok(())
    }

    /// Read a pattern set and check it was fitted for `fingerprint`.
    ///
    /// # Errors
    ///
    /// Returns [`ExplainError::PatternInvalidated`] if the stored fingerprint
    /// differs, so stale patterns are never reused after retraining.
    pub fn load_for_model(
        path: impl AsRef<Path>,
        fingerprint: &ModelFingerprint,
    ) -> Result<PatternSet> {
        let set = Self::load(&std::fs::read(path.as_ref())?)?;
        if &set.fingerprint != fingerprint {
            return Err(ExplainError::PatternInvalidated {
                expected: fingerprint.to_string(),
                found: set.fingerprint.to_string(),
            });
        }
        Ok(set)
    }

    /// Cache file for a model and variant inside `dir`.
    pub fn cache_path(
        dir: impl AsRef<Path>,
        fingerprint: &ModelFingerprint,
        variant: PatternVariant,
    ) -> PathBuf {
        dir.as_ref()
            .join(format!("patterns-{}-{}.json", fingerprint.short(), variant))
    }
}
