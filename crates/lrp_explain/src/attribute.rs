//! Backward relevance sweep.

use burn::prelude::*;
use burn::tensor::TensorData;
use serde::{Deserialize, Serialize};

use crate::error::{ExplainError, Result};
use crate::forward::AttributionContext;
use crate::patterns::PatternSet;
use crate::rules::Rule;
use crate::strategy::LinearStep;
use lrp_core::tensor::{argmax_per_row, array2_to_tensor, flatten_batch, tensor_to_vec};
use lrp_models::Sequential;

/// Stabiliser of the display normalisation.
const DISPLAY_EPSILON: f32 = 1e-6;

/// Which output neuron to explain for each sample.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetSelector {
    /// The argmax of each sample's output.
    #[default]
    Predicted,
    /// The same class for every sample.
    Class(usize),
    /// One class per sample.
    PerSample(Vec<usize>),
}

impl TargetSelector {
    fn resolve<B: Backend>(&self, output: Tensor<B, 2>) -> Result<Vec<usize>> {
        let [batch, n_classes] = output.dims();
        let targets = match self {
            TargetSelector::Predicted => argmax_per_row(output)?,
            TargetSelector::Class(class) => vec![*class; batch],
            TargetSelector::PerSample(targets) => {
                if targets.len() != batch {
                    return Err(ExplainError::InvalidTarget(format!(
                        "{} targets given for a batch of {}",
                        targets.len(),
                        batch
                    )));
                }
                targets.clone()
            }
        };
        if let Some(bad) = targets.iter().find(|&&t| t >= n_classes) {
            return Err(ExplainError::InvalidTarget(format!(
                "class {bad} is out of range for {n_classes} outputs"
            )));
        }
        Ok(targets)
    }
}

/// Attribution values for a batch, shaped like the input.
#[derive(Debug, Clone)]
pub struct AttributionBatch<B: Backend, const D: usize> {
    /// One value per input element.
    pub values: Tensor<B, D>,
    /// The explained input.
    pub input: Tensor<B, D>,
    /// Rule that produced the values.
    pub rule: Rule,
    /// Explained output neuron per sample.
    pub targets: Vec<usize>,
    /// Predicted class per sample.
    pub predictions: Vec<usize>,
}

impl<B: Backend, const D: usize> AttributionBatch<B, D> {
    /// Shape of the attribution (equal to the input shape).
    pub fn shape(&self) -> [usize; D] {
        self.values.dims()
    }

    /// Multiply element-wise with the input (input × gradient).
    #[must_use]
    pub fn times_input(self) -> Self {
        Self {
            values: self.values * self.input.clone(),
            ..self
        }
    }

    /// Sum of the attribution of every sample.
    pub fn sum_per_sample(&self) -> Result<Vec<f32>> {
        let sums = flatten_batch(self.values.clone()).sum_dim(1);
        Ok(tensor_to_vec(sums)?)
    }

    /// Per-sample `a / (max|a| + 1e-6)` mapped from `[-1, 1]` to `[0, 1]`.
    pub fn normalized_for_display(&self) -> Tensor<B, D> {
        let dims = self.values.dims();
        let flat = flatten_batch(self.values.clone());
        let scale = flat.clone().abs().max_dim(1) + DISPLAY_EPSILON;
        let normalized = (flat / scale + 1.0) / 2.0;
        normalized.reshape(dims)
    }
}

/// Propagates relevance from a selected output back to the input.
#[derive(Debug)]
pub struct Attributor<'a, B: Backend> {
    model: &'a Sequential<B>,
}

impl<'a, B: Backend> Attributor<'a, B> {
    /// Create an attributor for `model`.
    pub fn new(model: &'a Sequential<B>) -> Self {
        Self { model }
    }

    /// Consume the activations in `ctx` and attribute the selected outputs.
    ///
    /// The context is emptied whether or not attribution succeeds.
    ///
    /// # Errors
    ///
    /// - [`ExplainError::StaleActivation`] if `ctx` holds no forward pass
    /// - [`ExplainError::MissingPattern`] if `rule` needs patterns and none are given
    /// - [`ExplainError::ShapeMismatch`] if the cached input rank differs
    ///   from `D` or the patterns do not fit the model
    /// - [`ExplainError::InvalidTarget`] if a target is out of range
    pub fn attribute<const D: usize>(
        &self,
        ctx: &mut AttributionContext<B>,
        rule: &Rule,
        patterns: Option<&PatternSet>,
        target: &TargetSelector,
    ) -> Result<AttributionBatch<B, D>> {
        let record = ctx.take()?;
        rule.validate()?;

        let patterns = match (rule.requires_pattern(), patterns) {
            (true, None) => return Err(ExplainError::MissingPattern(rule.to_string())),
            (true, Some(set)) => {
                set.check_shapes(self.model)?;
                Some(set)
            }
            (false, _) => None,
        };

        let dims: [usize; D] = record.input_dims.clone().try_into().map_err(|_| {
            ExplainError::ShapeMismatch(format!(
                "forward input had rank {}, attribution requested rank {}",
                record.input_dims.len(),
                D
            ))
        })?;
        if record.caches.len() != self.model.len() {
            return Err(ExplainError::ShapeMismatch(format!(
                "forward pass cached {} layers, model has {}",
                record.caches.len(),
                self.model.len()
            )));
        }

        let predictions = argmax_per_row(record.output.clone())?;
        let targets = target.resolve(record.output.clone())?;
        let device = record.output.device();
        let mut relevance = one_hot::<B>(&targets, self.model.out_features(), &device);

        let strategy = rule.strategy::<B>();
        for (index, (layer, cache)) in self
            .model
            .layers()
            .iter()
            .zip(record.caches.iter())
            .enumerate()
            .rev()
        {
            relevance = strategy.through_activation(
                relevance,
                cache.pre_activation.clone(),
                layer.activation(),
            );
            let pattern = patterns
                .and_then(|set| set.get(index))
                .map(|p| array2_to_tensor::<B>(&p.a, &device));
            relevance = strategy.through_linear(LinearStep {
                input: cache.input.clone(),
                pre_activation: cache.pre_activation.clone(),
                weight: layer.weight(),
                relevance,
                pattern,
            });
        }

        let input = record
            .caches
            .first()
            .map(|cache| cache.input.clone())
            .ok_or_else(|| ExplainError::ShapeMismatch("model has no layers".to_string()))?;

        tracing::debug!(rule = %rule, batch = targets.len(), "attributed batch");
        Ok(AttributionBatch {
            values: relevance.reshape(dims),
            input: input.reshape(dims),
            rule: *rule,
            targets,
            predictions,
        })
    }
}

/// `[batch, classes]` seed with 1.0 at each sample's target.
fn one_hot<B: Backend>(targets: &[usize], classes: usize, device: &B::Device) -> Tensor<B, 2> {
    let mut values = vec![0.0f32; targets.len() * classes];
    for (row, &target) in targets.iter().enumerate() {
        values[row * classes + target] = 1.0;
    }
    Tensor::from_data(TensorData::new(values, [targets.len(), classes]), device)
}
