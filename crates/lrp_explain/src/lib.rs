//! # lrp_explain
//!
//! Relevance attribution for feed-forward classifiers: LRP, PatternNet and
//! PatternAttribution.
//!
//! This crate provides:
//! - [`RuleRegistry`] and [`Rule`]: rule identifiers resolved to strategies
//! - [`ExplainableForward`] and [`AttributionContext`]: capturing forward pass
//! - [`PatternFitter`]: one-pass, mergeable PatternNet statistics
//! - [`Attributor`]: the backward relevance sweep
//! - [`Explainer`]: model facade combining all of the above
//! - [`PatternStore`]: pattern persistence keyed by model fingerprint

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod attribute;
mod error;
mod explainer;
mod forward;
mod patterns;
mod persist;
mod rules;
pub mod strategy;

pub use attribute::{AttributionBatch, Attributor, TargetSelector};
pub use error::{ExplainError, Result};
pub use explainer::Explainer;
pub use forward::{AttributionContext, ExplainableForward, ForwardMode, ForwardRecord, LayerCache};
pub use patterns::{
    LayerStatistics, Pattern, PatternFitter, PatternFitterConfig, PatternSet, PatternStatistics,
    PatternVariant,
};
pub use persist::{PatternStore, FORMAT_VERSION};
pub use rules::{Rule, RuleRegistry, DEFAULT_EPSILON};
pub use strategy::AttributionStrategy;
