//! Error types for lrp_models.

use thiserror::Error;

/// Result type alias using [`ModelError`].
pub type Result<T> = std::result::Result<T, ModelError>;

/// Errors raised while building, fingerprinting or checkpointing models.
#[derive(Error, Debug)]
pub enum ModelError {
    /// Model configuration is unusable.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Layer or input shapes do not chain.
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Saving or loading a checkpoint failed.
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Checkpoint metadata could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Core error.
    #[error("Core error: {0}")]
    CoreError(#[from] lrp_core::CoreError),
}
