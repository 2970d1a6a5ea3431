//! Error types for lrp_explain.

use thiserror::Error;

/// Result type alias using [`ExplainError`].
pub type Result<T> = std::result::Result<T, ExplainError>;

/// Errors raised by the attribution engine.
///
/// All of them indicate misuse or misconfiguration; none is retried.
#[derive(Error, Debug)]
pub enum ExplainError {
    /// Rule identifier not present in the registry.
    #[error("Unknown rule '{rule}' (available: {available})")]
    UnknownRule {
        /// Requested identifier.
        rule: String,
        /// Comma separated list of registered identifiers.
        available: String,
    },

    /// A pattern-based rule was invoked without a pattern set.
    #[error("Rule '{0}' requires fitted patterns but none were given")]
    MissingPattern(String),

    /// Attribution without a matching fresh forward pass, or a second
    /// forward into a context that still holds activations.
    #[error("Stale activation cache: {0}")]
    StaleActivation(String),

    /// The pattern fitter saw no batches.
    #[error("Empty dataset: {0}")]
    EmptyDataset(String),

    /// Input or pattern shape incompatible with the model.
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Rule parameters violate their constraints.
    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    /// Target neuron out of range.
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// Persisted patterns were fitted against a different model.
    #[error("Patterns fitted for model {found} cannot be used with model {expected}")]
    PatternInvalidated {
        /// Fingerprint of the current model.
        expected: String,
        /// Fingerprint stored with the patterns.
        found: String,
    },

    /// Pattern record could not be encoded or decoded.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Model error.
    #[error("Model error: {0}")]
    Model(#[from] lrp_models::ModelError),

    /// Core error.
    #[error("Core error: {0}")]
    Core(#[from] lrp_core::CoreError),
}

impl From<serde_json::Error> for ExplainError {
    fn from(e: serde_json::Error) -> Self {
        ExplainError::Persistence(e.to_string())
    }
}
