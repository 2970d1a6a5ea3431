//! PatternNet pattern estimation.
//!
//! For a dense layer with weight `W [in, out]`, input `x` and affine output
//! `y_j = Σ_i x_i W_ij + b_j`, the pattern of output `j` is
//!
//! ```text
//! a_j = cov(x, y_j) / (w_jᵀ cov(x, y_j))
//! ```
//!
//! The `positive` variant restricts every expectation to samples with
//! `y_j > 0`. Statistics are accumulated in one streaming pass as raw
//! masked sums (`Σm`, `Σ m x`, `Σ m y`, `Σ m x y`), so partial statistics
//! from disjoint shards merge by plain addition.

use std::fmt;

use burn::prelude::*;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{ExplainError, Result};
use crate::forward::{AttributionContext, ExplainableForward};
use lrp_core::tensor::tensor_to_array2;
use lrp_models::{ModelFingerprint, Sequential};

/// Denominators below this magnitude yield a zero pattern column.
const DENOMINATOR_FLOOR: f64 = 1e-12;

/// Which samples contribute to a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternVariant {
    /// Every sample.
    #[default]
    All,
    /// Only samples where the output's pre-activation is positive.
    Positive,
}

impl PatternVariant {
    /// Lowercase identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternVariant::All => "all",
            PatternVariant::Positive => "positive",
        }
    }
}

impl fmt::Display for PatternVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Running sums for one layer.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerStatistics {
    /// `Σ m` per output, `[out]`.
    pub count: Array1<f64>,
    /// `Σ m x` per input/output pair, `[in, out]`.
    pub sum_x: Array2<f64>,
    /// `Σ m y` per output, `[out]`.
    pub sum_y: Array1<f64>,
    /// `Σ m x y` per input/output pair, `[in, out]`.
    pub sum_xy: Array2<f64>,
}

impl LayerStatistics {
    /// Zeroed sums for a layer.
    pub fn zeros(in_features: usize, out_features: usize) -> Self {
        Self {
            count: Array1::zeros(out_features),
            sum_x: Array2::zeros((in_features, out_features)),
            sum_y: Array1::zeros(out_features),
            sum_xy: Array2::zeros((in_features, out_features)),
        }
    }

    /// `(in_features, out_features)`.
    pub fn dims(&self) -> (usize, usize) {
        self.sum_x.dim()
    }

    /// Add one batch: `x [batch, in]`, `y [batch, out]`.
    pub fn update(&mut self, x: &Array2<f64>, y: &Array2<f64>, variant: PatternVariant) {
        let mask = match variant {
            PatternVariant::All => Array2::ones(y.raw_dim()),
            PatternVariant::Positive => y.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 }),
        };
        let masked_y = &mask * y;

        self.count += &mask.sum_axis(Axis(0));
        self.sum_x += &x.t().dot(&mask);
        self.sum_y += &masked_y.sum_axis(Axis(0));
        self.sum_xy += &x.t().dot(&masked_y);
    }

    fn merge(&mut self, other: &LayerStatistics) {
        self.count += &other.count;
        self.sum_x += &other.sum_x;
        self.sum_y += &other.sum_y;
        self.sum_xy += &other.sum_xy;
    }

    /// Covariance-ratio pattern given the layer weight `[in, out]`.
    pub fn pattern(&self, weight: &Array2<f64>) -> Array2<f32> {
        let (in_features, out_features) = self.dims();
        let mut pattern = Array2::<f32>::zeros((in_features, out_features));

        for j in 0..out_features {
            let n = self.count[j];
            if n <= 0.0 {
                continue;
            }
            let mean_y = self.sum_y[j] / n;
            let cov: Array1<f64> = self
                .sum_xy
                .column(j)
                .iter()
                .zip(self.sum_x.column(j))
                .map(|(&sxy, &sx)| sxy / n - (sx / n) * mean_y)
                .collect();
            let denominator = weight.column(j).dot(&cov);
            if denominator.abs() < DENOMINATOR_FLOOR || !denominator.is_finite() {
                continue;
            }
            for (target, value) in pattern.column_mut(j).iter_mut().zip(cov.iter()) {
                *target = (value / denominator) as f32;
            }
        }

        pattern
    }
}

/// Mergeable statistics for every layer of a model.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternStatistics {
    variant: PatternVariant,
    layers: Vec<LayerStatistics>,
    batches: usize,
    samples: usize,
}

impl PatternStatistics {
    /// Zeroed statistics shaped for `model`.
    pub fn for_model<B: Backend>(model: &Sequential<B>, variant: PatternVariant) -> Self {
        Self {
            variant,
            layers: model
                .layers()
                .iter()
                .map(|layer| LayerStatistics::zeros(layer.in_features(), layer.out_features()))
                .collect(),
            batches: 0,
            samples: 0,
        }
    }

    /// Variant being accumulated.
    pub fn variant(&self) -> PatternVariant {
        self.variant
    }

    /// Per-layer sums.
    pub fn layers(&self) -> &[LayerStatistics] {
        &self.layers
    }

    /// Batches seen.
    pub fn batches(&self) -> usize {
        self.batches
    }

    /// Samples seen.
    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Add another shard's sums field by field.
    ///
    /// # Errors
    ///
    /// Returns [`ExplainError::ShapeMismatch`] if the shards disagree on
    /// variant or layer shapes.
    pub fn merge(&mut self, other: &PatternStatistics) -> Result<()> {
        if self.variant != other.variant {
            return Err(ExplainError::ShapeMismatch(format!(
                "cannot merge {} statistics into {}",
                other.variant, self.variant
            )));
        }
        let shapes_match = self.layers.len() == other.layers.len()
            && self
                .layers
                .iter()
                .zip(&other.layers)
                .all(|(a, b)| a.dims() == b.dims());
        if !shapes_match {
            return Err(ExplainError::ShapeMismatch(
                "statistics were collected for different models".to_string(),
            ));
        }

        for (mine, theirs) in self.layers.iter_mut().zip(&other.layers) {
            mine.merge(theirs);
        }
        self.batches += other.batches;
        self.samples += other.samples;
        Ok(())
    }
}

/// Fitted pattern of one layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    /// Layer index, input layer first.
    pub layer: usize,
    /// Variant the pattern was fitted with.
    pub variant: PatternVariant,
    /// Direction vectors as columns, `[in_features, out_features]`.
    pub a: Array2<f32>,
}

impl Pattern {
    /// Length of every direction vector, the layer's input feature count.
    pub fn input_dim(&self) -> usize {
        self.a.nrows()
    }

    /// Number of direction vectors, the layer's output feature count.
    pub fn output_dim(&self) -> usize {
        self.a.ncols()
    }

    /// Direction vector for output neuron `j`.
    pub fn direction(&self, j: usize) -> ArrayView1<'_, f32> {
        self.a.column(j)
    }
}

/// Patterns for every layer of one model, fitted with one variant.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternSet {
    /// Variant shared by all patterns.
    pub variant: PatternVariant,
    /// Fingerprint of the model the patterns were fitted against.
    pub fingerprint: ModelFingerprint,
    /// Patterns, input layer first.
    pub patterns: Vec<Pattern>,
}

impl PatternSet {
    /// Pattern for a layer.
    pub fn get(&self, layer: usize) -> Option<&Pattern> {
        self.patterns.iter().find(|p| p.layer == layer)
    }

    /// Number of patterns.
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Check if there are no patterns.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Check that every layer of `model` has a pattern of matching shape.
    pub fn check_shapes<B: Backend>(&self, model: &Sequential<B>) -> Result<()> {
        for (index, layer) in model.layers().iter().enumerate() {
            let pattern = self.get(index).ok_or_else(|| {
                ExplainError::ShapeMismatch(format!("no pattern for layer {index}"))
            })?;
            let expected = (layer.in_features(), layer.out_features());
            if pattern.a.dim() != expected {
                return Err(ExplainError::ShapeMismatch(format!(
                    "pattern for layer {} is {:?}, layer weight is {:?}",
                    index,
                    pattern.a.dim(),
                    expected
                )));
            }
        }
        Ok(())
    }
}

/// Configuration for [`PatternFitter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternFitterConfig {
    /// Variant to fit.
    pub variant: PatternVariant,
    /// Update layer statistics in parallel.
    pub parallel: bool,
}

impl Default for PatternFitterConfig {
    fn default() -> Self {
        Self {
            variant: PatternVariant::All,
            parallel: true,
        }
    }
}

impl PatternFitterConfig {
    /// Create a new config.
    pub fn new(variant: PatternVariant) -> Self {
        Self {
            variant,
            ..Default::default()
        }
    }

    /// Set the variant.
    #[must_use]
    pub fn with_variant(mut self, variant: PatternVariant) -> Self {
        self.variant = variant;
        self
    }

    /// Enable or disable parallel per-layer updates.
    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }
}

/// Streams training batches through a model and fits patterns.
///
/// ```rust,ignore
/// let fitter = PatternFitter::new(&model, PatternFitterConfig::new(PatternVariant::Positive))?;
/// let patterns = fitter.fit(train_batches)?;
/// ```
///
/// The fitter borrows a model that is not `Sync`. Shard fitting across
/// threads by building one fitter per thread on a model clone, then
/// [`PatternStatistics::merge`] the shards.
#[derive(Debug)]
pub struct PatternFitter<'a, B: Backend> {
    model: &'a Sequential<B>,
    config: PatternFitterConfig,
    weights: Vec<Array2<f64>>,
    fingerprint: ModelFingerprint,
}

impl<'a, B: Backend> PatternFitter<'a, B> {
    /// Create a fitter for `model`.
    pub fn new(model: &'a Sequential<B>, config: PatternFitterConfig) -> Result<Self> {
        let weights = model
            .layers()
            .iter()
            .map(|layer| Ok(tensor_to_array2(layer.weight())?.mapv(f64::from)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            model,
            config,
            weights,
            fingerprint: ModelFingerprint::of(model)?,
        })
    }

    /// The fitter's configuration.
    pub fn config(&self) -> &PatternFitterConfig {
        &self.config
    }

    /// Fingerprint of the fitted model.
    pub fn fingerprint(&self) -> &ModelFingerprint {
        &self.fingerprint
    }

    /// Empty statistics for this fitter's model and variant.
    pub fn statistics(&self) -> PatternStatistics {
        PatternStatistics::for_model(self.model, self.config.variant)
    }

    /// Add one batch to `stats`.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch does not fit the model.
    pub fn observe<const D: usize>(
        &self,
        stats: &mut PatternStatistics,
        x: Tensor<B, D>,
    ) -> Result<()> {
        let mut ctx = AttributionContext::new();
        ExplainableForward::new(self.model).forward(&mut ctx, x)?;
        let record = ctx.take()?;
        let batch = record.batch_size();

        let host = record
            .caches
            .into_iter()
            .map(|cache| {
                Ok((
                    tensor_to_array2(cache.input)?.mapv(f64::from),
                    tensor_to_array2(cache.pre_activation)?.mapv(f64::from),
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        let variant = stats.variant;
        if self.config.parallel {
            stats
                .layers
                .par_iter_mut()
                .zip(host.par_iter())
                .for_each(|(layer, (x, y))| layer.update(x, y, variant));
        } else {
            stats
                .layers
                .iter_mut()
                .zip(host.iter())
                .for_each(|(layer, (x, y))| layer.update(x, y, variant));
        }

        stats.batches += 1;
        stats.samples += batch;
        tracing::debug!(batch = stats.batches, samples = stats.samples, "accumulated pattern statistics");
        Ok(())
    }

    /// Accumulate statistics over a sequence of batches.
    pub fn accumulate<const D: usize, I>(&self, batches: I) -> Result<PatternStatistics>
    where
        I: IntoIterator<Item = Tensor<B, D>>,
    {
        let mut stats = self.statistics();
        for x in batches {
            self.observe(&mut stats, x)?;
        }
        Ok(stats)
    }

    /// Turn statistics into a [`PatternSet`].
    ///
    /// # Errors
    ///
    /// - [`ExplainError::EmptyDataset`] if no batch was observed
    /// - [`ExplainError::ShapeMismatch`] if the statistics belong to another model
    pub fn finalize(&self, stats: &PatternStatistics) -> Result<PatternSet> {
        if stats.batches == 0 {
            return Err(ExplainError::EmptyDataset(
                "pattern fitting needs at least one training batch".to_string(),
            ));
        }
        if stats.variant != self.config.variant || stats.layers.len() != self.weights.len() {
            return Err(ExplainError::ShapeMismatch(
                "statistics do not belong to this fitter".to_string(),
            ));
        }

        let patterns = stats
            .layers
            .iter()
            .zip(&self.weights)
            .enumerate()
            .map(|(layer, (layer_stats, weight))| {
                if layer_stats.dims() != weight.dim() {
                    return Err(ExplainError::ShapeMismatch(format!(
                        "statistics for layer {} are {:?}, weight is {:?}",
                        layer,
                        layer_stats.dims(),
                        weight.dim()
                    )));
                }
                Ok(Pattern {
                    layer,
                    variant: stats.variant,
                    a: layer_stats.pattern(weight),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(PatternSet {
            variant: stats.variant,
            fingerprint: self.fingerprint.clone(),
            patterns,
        })
    }

    /// Fit patterns in one pass over `batches`.
    pub fn fit<const D: usize, I>(&self, batches: I) -> Result<PatternSet>
    where
        I: IntoIterator<Item = Tensor<B, D>>,
    {
        tracing::info!(variant = %self.config.variant, layers = self.model.len(), "fitting patterns");
        let stats = self.accumulate(batches)?;
        let set = self.finalize(&stats)?;
        tracing::info!(
            variant = %self.config.variant,
            batches = stats.batches,
            samples = stats.samples,
            "fitted patterns"
        );
        Ok(set)
    }
}
