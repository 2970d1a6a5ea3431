//! # lrp
//!
//! Pixel-level attribution maps for feed-forward image classifiers in Rust.
//!
//! lrp-rs explains a classifier's predictions by propagating relevance from
//! a selected output neuron back to the input pixels:
//!
//! - **Rules**: gradient, LRP-epsilon, LRP-alpha-beta, PatternNet, PatternAttribution
//! - **Patterns**: one-pass, shardable PatternNet statistics over a training set
//! - **Models**: seeded dense networks, fingerprints and checkpoints
//! - **Data**: MNIST IDX loading and restartable, seeded batch iteration
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use lrp::prelude::*;
//!
//! let train = load_mnist("data/mnist", MnistSplit::Train)?;
//! let loader = DataLoader::builder(train).batch_size(256).build()?;
//!
//! let model = SequentialConfig::mnist().init::<NdArray>(&device)?;
//! let explainer = Explainer::new(model)?;
//!
//! let fitter = explainer.pattern_fitter(PatternFitterConfig::new(PatternVariant::Positive))?;
//! let mut stats = fitter.statistics();
//! for batch in loader.iter::<NdArray>(&device) {
//!     fitter.observe(&mut stats, batch?.x)?;
//! }
//! let patterns = fitter.finalize(&stats)?;
//!
//! let mut ctx = AttributionContext::new();
//! let maps = explainer.explain(&mut ctx, images, "patternattribution", Some(&patterns), &TargetSelector::Predicted)?;
//! ```
//!
//! ## Feature Flags
//!
//! - `backend-ndarray` (default): CPU backend using ndarray

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

// Re-export all crates
pub use lrp_core as core;
pub use lrp_data as data;
pub use lrp_explain as explain;
pub use lrp_models as models;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use lrp::prelude::*;
/// ```
pub mod prelude {
    // Core types
    pub use lrp_core::{ImageBatch, Seed};

    // Data
    pub use lrp_data::{load_mnist, DataLoader, ImageDataset, MnistSplit};

    // Models
    pub use lrp_models::{
        Activation, DenseLayer, ModelFingerprint, Sequential, SequentialConfig,
    };

    // Explainability
    pub use lrp_explain::{
        AttributionBatch, AttributionContext, Attributor, ExplainError, ExplainableForward,
        Explainer, ForwardMode, Pattern, PatternFitter, PatternFitterConfig, PatternSet,
        PatternStatistics, PatternStore, PatternVariant, Rule, RuleRegistry, TargetSelector,
    };

    // Backend
    #[cfg(feature = "backend-ndarray")]
    pub use lrp_core::backend::NdArray;
}
