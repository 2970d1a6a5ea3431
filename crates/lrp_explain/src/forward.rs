//! Capturing forward pass.
//!
//! [`ExplainableForward`] wraps a [`Sequential`] model and records, for
//! every layer, the input it received and its affine output. The record
//! lives in an explicit [`AttributionContext`] owned by the caller: one
//! forward fills it, one attribution consumes it.

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{ExplainError, Result};
use lrp_core::tensor::{argmax_per_row, flatten_batch};
use lrp_models::Sequential;

/// How a forward call treats the context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForwardMode {
    /// Ordinary inference; nothing is cached.
    #[default]
    Plain,
    /// Cache per-layer activations for one later attribution.
    Explain,
}

/// Activations of one layer captured during an explaining forward pass.
#[derive(Debug, Clone)]
pub struct LayerCache<B: Backend> {
    /// Input to the layer, `[batch, in_features]`.
    pub input: Tensor<B, 2>,
    /// Affine output before the nonlinearity, `[batch, out_features]`.
    pub pre_activation: Tensor<B, 2>,
}

/// Everything one explaining forward pass leaves behind.
#[derive(Debug, Clone)]
pub struct ForwardRecord<B: Backend> {
    /// Dims of the original (unflattened) input.
    pub input_dims: Vec<usize>,
    /// Per-layer caches, input layer first.
    pub caches: Vec<LayerCache<B>>,
    /// Model output, `[batch, n_classes]`.
    pub output: Tensor<B, 2>,
}

impl<B: Backend> ForwardRecord<B> {
    /// Number of samples.
    pub fn batch_size(&self) -> usize {
        self.input_dims.first().copied().unwrap_or(0)
    }

    /// Predicted class per sample.
    pub fn predictions(&self) -> Result<Vec<usize>> {
        Ok(argmax_per_row(self.output.clone())?)
    }
}

/// Per-call activation cache threaded through a forward/attribute pair.
///
/// Contexts are cheap and independent; concurrent attributions each use
/// their own.
#[derive(Debug)]
pub struct AttributionContext<B: Backend> {
    record: Option<ForwardRecord<B>>,
}

impl<B: Backend> Default for AttributionContext<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> AttributionContext<B> {
    /// Create an empty context.
    pub fn new() -> Self {
        Self { record: None }
    }

    /// Check if the context holds no activations.
    pub fn is_empty(&self) -> bool {
        self.record.is_none()
    }

    /// The pending record, if any.
    pub fn record(&self) -> Option<&ForwardRecord<B>> {
        self.record.as_ref()
    }

    /// Drop any cached activations.
    pub fn clear(&mut self) {
        self.record = None;
    }

    /// Remove the pending record.
    ///
    /// # Errors
    ///
    /// Returns [`ExplainError::StaleActivation`] if no forward pass filled
    /// the context.
    pub fn take(&mut self) -> Result<ForwardRecord<B>> {
        self.record.take().ok_or_else(|| {
            ExplainError::StaleActivation(
                "no cached activations; run an explaining forward pass first".to_string(),
            )
        })
    }

    pub(crate) fn fill(&mut self, record: ForwardRecord<B>) -> Result<()> {
        if self.record.is_some() {
            return Err(ExplainError::StaleActivation(
                "context still holds activations from an earlier forward pass".to_string(),
            ));
        }
        self.record = Some(record);
        Ok(())
    }
}

/// Forward pass that records per-layer activations.
#[derive(Debug)]
pub struct ExplainableForward<'a, B: Backend> {
    model: &'a Sequential<B>,
}

impl<'a, B: Backend> ExplainableForward<'a, B> {
    /// Wrap a model.
    pub fn new(model: &'a Sequential<B>) -> Self {
        Self { model }
    }

    /// The wrapped model.
    pub fn model(&self) -> &'a Sequential<B> {
        self.model
    }

    /// Run the model and leave its activations in `ctx`.
    ///
    /// # Errors
    ///
    /// - [`ExplainError::StaleActivation`] if `ctx` is already filled
    /// - [`ExplainError::ShapeMismatch`] if the flattened input does not
    ///   match the model's input features
    pub fn forward<const D: usize>(
        &self,
        ctx: &mut AttributionContext<B>,
        x: Tensor<B, D>,
    ) -> Result<Tensor<B, 2>> {
        if !ctx.is_empty() {
            return Err(ExplainError::StaleActivation(
                "context still holds activations from an earlier forward pass".to_string(),
            ));
        }

        let input_dims = x.dims().to_vec();
        let flat = flatten_batch(x);
        let [batch, features] = flat.dims();
        if features != self.model.in_features() {
            return Err(ExplainError::ShapeMismatch(format!(
                "input {:?} flattens to {} features, model expects {}",
                input_dims,
                features,
                self.model.in_features()
            )));
        }

        let mut caches = Vec::with_capacity(self.model.len());
        let mut hidden = flat;
        for layer in self.model.layers() {
            let pre_activation = layer.pre_activation(hidden.clone());
            caches.push(LayerCache {
                input: hidden,
                pre_activation: pre_activation.clone(),
            });
            hidden = layer.activation().apply(pre_activation);
        }

        tracing::trace!(batch, layers = caches.len(), "cached forward activations");
        ctx.fill(ForwardRecord {
            input_dims,
            caches,
            output: hidden.clone(),
        })?;
        Ok(hidden)
    }
}
