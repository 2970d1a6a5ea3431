//! Content fingerprints identifying a model's exact parameters.
//!
//! Fitted patterns are only valid for the weights they were fitted against,
//! so persisted pattern sets carry the fingerprint of their model and are
//! rejected when it no longer matches.

use std::fmt;

use burn::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::sequential::Sequential;
use lrp_core::tensor::tensor_to_vec;

const DOMAIN: &[u8] = b"lrp-rs:model:v1";

/// Hex-encoded SHA-256 digest over a model's architecture and parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelFingerprint(String);

impl ModelFingerprint {
    /// Fingerprint a model.
    ///
    /// Covers layer dimensions, activations, weights and biases. Any change
    /// to a single parameter yields a different fingerprint.
    pub fn of<B: Backend>(model: &Sequential<B>) -> Result<Self> {
        let mut hasher = Sha256::new();
        hasher.update(DOMAIN);
        hasher.update((model.len() as u64).to_le_bytes());

        for layer in model.layers() {
            hasher.update((layer.in_features() as u64).to_le_bytes());
            hasher.update((layer.out_features() as u64).to_le_bytes());
            hasher.update([layer.activation().tag()]);

            for value in tensor_to_vec(layer.weight())? {
                hasher.update(value.to_le_bytes());
            }
            match layer.bias() {
                Some(bias) => {
                    hasher.update([1u8]);
                    for value in tensor_to_vec(bias)? {
                        hasher.update(value.to_le_bytes());
                    }
                }
                None => hasher.update([0u8]),
            }
        }

        let digest = hasher.finalize();
        Ok(Self(digest.iter().map(|b| format!("{b:02x}")).collect()))
    }

    /// Wrap an existing hex digest.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// Hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for file names and log lines.
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for ModelFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequential::{Activation, DenseLayer, SequentialConfig};
    use lrp_core::backend::NdArray;
    use lrp_core::tensor::vec_to_tensor;
    use lrp_core::Seed;

    type TestBackend = NdArray;

    #[test]
    fn test_fingerprint_is_stable() {
        let device = Default::default();
        let config = SequentialConfig::new(8, 3).with_hidden_sizes(vec![4]);
        let a = config.init::<TestBackend>(&device).unwrap();
        let b = config.init::<TestBackend>(&device).unwrap();

        let fa = ModelFingerprint::of(&a).unwrap();
        assert_eq!(fa, ModelFingerprint::of(&b).unwrap());
        assert_eq!(fa.as_str().len(), 64);
        assert_eq!(fa.short().len(), 12);
    }

    #[test]
    fn test_fingerprint_tracks_weights() {
        let device = Default::default();
        let config = SequentialConfig::new(8, 3).with_hidden_sizes(vec![4]);
        let a = config.init::<TestBackend>(&device).unwrap();
        let b = config.with_seed(Seed::new(7)).init::<TestBackend>(&device).unwrap();
        assert_ne!(ModelFingerprint::of(&a).unwrap(), ModelFingerprint::of(&b).unwrap());
    }

    #[test]
    fn test_fingerprint_tracks_single_parameter() {
        let device = Default::default();
        let build = |w01: f32| {
            let w = vec_to_tensor::<TestBackend, 2>(vec![1.0, w01, 0.5, 2.0], [2, 2], &device).unwrap();
            let layer = DenseLayer::from_tensors(w, None, Activation::Identity).unwrap();
            Sequential::new(vec![layer]).unwrap()
        };
        let a = ModelFingerprint::of(&build(0.0)).unwrap();
        let b = ModelFingerprint::of(&build(1e-6)).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_short_prefix() {
        assert_eq!(ModelFingerprint::from_hex("0123456789abcdef").short(), "0123456789ab");
        assert_eq!(ModelFingerprint::from_hex("abc").short(), "abc");
        // byte 12 falls inside a multi-byte character
        assert_eq!(ModelFingerprint::from_hex("aéééééééé").short(), "aéééééééé");
    }

    #[test]
    fn test_fingerprint_serde_is_plain_string() {
        let fp = ModelFingerprint::from_hex("abc123");
        assert_eq!(serde_json::to_string(&fp).unwrap(), "\"abc123\"");
        assert_eq!(fp.to_string(), "abc123");
    }
}
