//! Model-facing facade tying rules, forward pass and attribution together.

use burn::prelude::*;

use crate::attribute::{AttributionBatch, Attributor, TargetSelector};
use crate::error::{ExplainError, Result};
use crate::forward::{AttributionContext, ExplainableForward, ForwardMode};
use crate::patterns::{PatternFitter, PatternFitterConfig, PatternSet};
use crate::rules::RuleRegistry;
use lrp_models::{ModelFingerprint, Sequential};

/// A model together with the rules that can explain it.
///
/// ```rust,ignore
/// let explainer = Explainer::new(model)?;
/// let mut ctx = AttributionContext::new();
/// let batch = explainer.explain(&mut ctx, images, "alpha2beta1", None, &TargetSelector::Predicted)?;
/// ```
///
/// Model parameters are lazily initialised cells, so an `Explainer` is
/// `Send` but not `Sync`. To explain on several threads, give each thread
/// its own clone together with its own [`AttributionContext`].
#[derive(Debug, Clone)]
pub struct Explainer<B: Backend> {
    model: Sequential<B>,
    fingerprint: ModelFingerprint,
    registry: RuleRegistry,
}

impl<B: Backend> Explainer<B> {
    /// Wrap a model with the default rule registry.
    pub fn new(model: Sequential<B>) -> Result<Self> {
        let fingerprint = ModelFingerprint::of(&model)?;
        Ok(Self {
            model,
            fingerprint,
            registry: RuleRegistry::default(),
        })
    }

    /// Replace the rule registry.
    #[must_use]
    pub fn with_registry(mut self, registry: RuleRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// The wrapped model.
    pub fn model(&self) -> &Sequential<B> {
        &self.model
    }

    /// Fingerprint of the wrapped model.
    pub fn fingerprint(&self) -> &ModelFingerprint {
        &self.fingerprint
    }

    /// Registered rules.
    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    /// Mutable access to the registered rules.
    pub fn registry_mut(&mut self) -> &mut RuleRegistry {
        &mut self.registry
    }

    /// Run the model; in [`ForwardMode::Explain`] activations are cached in `ctx`.
    pub fn forward<const D: usize>(
        &self,
        ctx: &mut AttributionContext<B>,
        x: Tensor<B, D>,
        mode: ForwardMode,
    ) -> Result<Tensor<B, 2>> {
        match mode {
            ForwardMode::Plain => Ok(self.model.forward(x)),
            ForwardMode::Explain => ExplainableForward::new(&self.model).forward(ctx, x),
        }
    }

    /// Explain `x` with the rule registered as `rule_id`.
    ///
    /// The rule is resolved and pattern availability checked before any
    /// forward work, so a failure there leaves `ctx` untouched.
    ///
    /// # Errors
    ///
    /// - [`ExplainError::UnknownRule`] for an unregistered identifier
    /// - [`ExplainError::MissingPattern`] if the rule needs patterns and none are given
    /// - [`ExplainError::PatternInvalidated`] if the patterns belong to another model
    /// - any error of [`ExplainableForward::forward`] or [`Attributor::attribute`]
    pub fn explain<const D: usize>(
        &self,
        ctx: &mut AttributionContext<B>,
        x: Tensor<B, D>,
        rule_id: &str,
        patterns: Option<&PatternSet>,
        target: &TargetSelector,
    ) -> Result<AttributionBatch<B, D>> {
        let rule = self.registry.resolve(rule_id)?;
        if rule.requires_pattern() {
            let set = patterns.ok_or_else(|| ExplainError::MissingPattern(rule_id.to_string()))?;
            if set.fingerprint != self.fingerprint {
                return Err(ExplainError::PatternInvalidated {
                    expected: self.fingerprint.to_string(),
                    found: set.fingerprint.to_string(),
                });
            }
        }

        tracing::info!(rule = rule_id, "explaining batch");
        self.forward(ctx, x, ForwardMode::Explain)?;
        Attributor::new(&self.model).attribute(ctx, &rule, patterns, target)
    }

    /// Fitter for this model.
    pub fn pattern_fitter(&self, config: PatternFitterConfig) -> Result<PatternFitter<'_, B>> {
        PatternFitter::new(&self.model, config)
    }
}
