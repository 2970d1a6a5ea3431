//! Per-layer relevance redistribution formulas.
//!
//! Every dense layer is handled in two steps during the backward sweep:
//! first the relevance at the layer's output crosses the nonlinearity
//! ([`AttributionStrategy::through_activation`]), then it is redistributed
//! over the layer's inputs ([`AttributionStrategy::through_linear`]).
//!
//! Shapes: `input [batch, in]`, `pre_activation [batch, out]`,
//! `weight [in, out]`, `relevance [batch, out]`, `pattern [in, out]`.

use burn::prelude::*;

use lrp_models::Activation;

/// Smallest magnitude allowed for alpha-beta denominators.
const ALPHA_BETA_GUARD: f32 = 1e-12;

/// Tensors available when redistributing relevance over one layer.
#[derive(Debug, Clone)]
pub struct LinearStep<B: Backend> {
    /// Input activation cached by the forward pass.
    pub input: Tensor<B, 2>,
    /// Affine output `input.matmul(weight) + bias`.
    pub pre_activation: Tensor<B, 2>,
    /// Layer weight.
    pub weight: Tensor<B, 2>,
    /// Relevance (or signal) arriving at the layer's output.
    pub relevance: Tensor<B, 2>,
    /// Fitted pattern for the layer, if the rule uses one.
    pub pattern: Option<Tensor<B, 2>>,
}

/// Relevance redistribution for one rule.
pub trait AttributionStrategy<B: Backend> {
    /// Rule family name.
    fn name(&self) -> &'static str;

    /// Whether [`LinearStep::pattern`] must be set.
    fn requires_pattern(&self) -> bool {
        false
    }

    /// Carry relevance across the layer's nonlinearity.
    ///
    /// LRP rules pass relevance through unchanged.
    fn through_activation(
        &self,
        relevance: Tensor<B, 2>,
        _pre_activation: Tensor<B, 2>,
        _activation: Activation,
    ) -> Tensor<B, 2> {
        relevance
    }

    /// Redistribute relevance from the layer's outputs to its inputs.
    fn through_linear(&self, step: LinearStep<B>) -> Tensor<B, 2>;
}

/// ReLU derivative applied to the backward signal; identity layers pass it through.
fn relu_gate<B: Backend>(
    signal: Tensor<B, 2>,
    pre_activation: Tensor<B, 2>,
    activation: Activation,
) -> Tensor<B, 2> {
    match activation {
        Activation::Identity => signal,
        Activation::Relu => signal * pre_activation.greater_elem(0.0).float(),
    }
}

/// Pattern of a step, or a zero matrix shaped like the weight.
fn pattern_of<B: Backend>(step: &LinearStep<B>) -> Tensor<B, 2> {
    match &step.pattern {
        Some(pattern) => pattern.clone(),
        None => step.weight.zeros_like(),
    }
}

/// Chain rule: `R_in = R · Wᵀ`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GradientStrategy;

impl<B: Backend> AttributionStrategy<B> for GradientStrategy {
    fn name(&self) -> &'static str {
        "gradient"
    }

    fn through_activation(
        &self,
        relevance: Tensor<B, 2>,
        pre_activation: Tensor<B, 2>,
        activation: Activation,
    ) -> Tensor<B, 2> {
        relu_gate(relevance, pre_activation, activation)
    }

    fn through_linear(&self, step: LinearStep<B>) -> Tensor<B, 2> {
        step.relevance.matmul(step.weight.transpose())
    }
}

/// LRP-epsilon.
///
/// `R_i = x_i Σ_j w_ij R_j / (z_j + ε·sign(z_j))` with `z_j = Σ_i x_i w_ij`.
/// The bias is not a contributor, so relevance is conserved up to the
/// stabiliser. `sign(0) = +1`; non-finite denominators are replaced by the
/// signed stabiliser alone.
#[derive(Debug, Clone, Copy)]
pub struct EpsilonStrategy {
    /// Stabiliser.
    pub epsilon: f32,
}

impl<B: Backend> AttributionStrategy<B> for EpsilonStrategy {
    fn name(&self) -> &'static str {
        "epsilon"
    }

    fn through_linear(&self, step: LinearStep<B>) -> Tensor<B, 2> {
        let z = step.input.clone().matmul(step.weight.clone());
        let sign = z.clone().greater_equal_elem(0.0).float() * 2.0 - 1.0;
        let guard = sign * self.epsilon;

        let stabilized = z + guard.clone();
        let finite = stabilized.clone().abs().lower_equal_elem(f32::MAX);
        let stabilized = stabilized.mask_where(finite.bool_not(), guard);

        let ratio = step.relevance / stabilized;
        step.input * ratio.matmul(step.weight.transpose())
    }
}

/// LRP-alpha-beta.
///
/// Contributions `x_i w_ij` are split by sign; positive parts receive
/// `alpha` and negative parts `beta` of each output's relevance. The bias
/// is not treated as a contributor.
///
/// An output whose contributions all share one sign sends its whole
/// relevance through that side (weight `alpha - beta = 1`), so every output
/// with a nonzero contribution conserves its relevance.
#[derive(Debug, Clone, Copy)]
pub struct AlphaBetaStrategy {
    /// Positive weight.
    pub alpha: f32,
    /// Negative weight.
    pub beta: f32,
}

impl<B: Backend> AttributionStrategy<B> for AlphaBetaStrategy {
    fn name(&self) -> &'static str {
        "alpha_beta"
    }

    fn through_linear(&self, step: LinearStep<B>) -> Tensor<B, 2> {
        let x_pos = step.input.clone().clamp_min(0.0);
        let x_neg = step.input.clamp_max(0.0);
        let w_pos = step.weight.clone().clamp_min(0.0);
        let w_neg = step.weight.clamp_max(0.0);

        let z_pos = x_pos.clone().matmul(w_pos.clone()) + x_neg.clone().matmul(w_neg.clone());
        let z_neg = x_pos.clone().matmul(w_neg.clone()) + x_neg.clone().matmul(w_pos.clone());

        // Per-output weights: (alpha, -beta) when both sides exist, 1 on the only side otherwise.
        let has_pos = z_pos.clone().greater_elem(ALPHA_BETA_GUARD).float();
        let has_neg = z_neg.clone().lower_elem(-ALPHA_BETA_GUARD).float();
        let both = has_pos.clone() * has_neg.clone();
        let pos_weight = has_pos * (both.clone() * (self.alpha - 1.0) + 1.0);
        let neg_weight = has_neg * (both * -(1.0 + self.beta) + 1.0);

        let s_pos = step.relevance.clone() * pos_weight / z_pos.clamp_min(ALPHA_BETA_GUARD);
        let s_neg = step.relevance * neg_weight / z_neg.clamp_max(-ALPHA_BETA_GUARD);

        let positive = x_pos.clone() * s_pos.clone().matmul(w_pos.clone().transpose())
            + x_neg.clone() * s_pos.matmul(w_neg.clone().transpose());
        let negative = x_pos * s_neg.clone().matmul(w_neg.transpose())
            + x_neg * s_neg.matmul(w_pos.transpose());

        positive + negative
    }
}

/// PatternAttribution: `R_in = R · (W ⊙ A)ᵀ`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternAttributionStrategy;

impl<B: Backend> AttributionStrategy<B> for PatternAttributionStrategy {
    fn name(&self) -> &'static str {
        "pattern_attribution"
    }

    fn requires_pattern(&self) -> bool {
        true
    }

    fn through_activation(
        &self,
        relevance: Tensor<B, 2>,
        pre_activation: Tensor<B, 2>,
        activation: Activation,
    ) -> Tensor<B, 2> {
        relu_gate(relevance, pre_activation, activation)
    }

    fn through_linear(&self, step: LinearStep<B>) -> Tensor<B, 2> {
        let pattern = pattern_of(&step);
        step.relevance.matmul((step.weight * pattern).transpose())
    }
}

/// PatternNet: reconstructs the signal with `R_in = R · Aᵀ`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternNetStrategy;

impl<B: Backend> AttributionStrategy<B> for PatternNetStrategy {
    fn name(&self) -> &'static str {
        "pattern_net"
    }

    fn requires_pattern(&self) -> bool {
        true
    }

    fn through_activation(
        &self,
        relevance: Tensor<B, 2>,
        pre_activation: Tensor<B, 2>,
        activation: Activation,
    ) -> Tensor<B, 2> {
        relu_gate(relevance, pre_activation, activation)
    }

    fn through_linear(&self, step: LinearStep<B>) -> Tensor<B, 2> {
        let pattern = pattern_of(&step);
        step.relevance.matmul(pattern.transpose())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lrp_core::backend::NdArray;
    use lrp_core::tensor::{tensor_to_vec, vec_to_tensor};

    type TestBackend = NdArray;

    fn step(
        input: Vec<f32>,
        weight: Vec<f32>,
        relevance: Vec<f32>,
        pattern: Option<Vec<f32>>,
    ) -> LinearStep<TestBackend> {
        let device = Default::default();
        let input = vec_to_tensor::<TestBackend, 2>(input, [1, 3], &device).unwrap();
        let weight = vec_to_tensor::<TestBackend, 2>(weight, [3, 2], &device).unwrap();
        let relevance = vec_to_tensor::<TestBackend, 2>(relevance, [1, 2], &device).unwrap();
        let pattern = pattern.map(|p| vec_to_tensor::<TestBackend, 2>(p, [3, 2], &device).unwrap());
        LinearStep {
            pre_activation: input.clone().matmul(weight.clone()),
            input,
            weight,
            relevance,
            pattern,
        }
    }

    fn assert_close(actual: &[f32], expected: &[f32], tol: f32) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() <= tol, "{actual:?} vs {expected:?}");
        }
    }

    const INPUT: [f32; 3] = [1.0, -2.0, 3.0];
    // Columns: output 0 = [1, 1, 1], output 1 = [2, -1, 0.5]
    const WEIGHT: [f32; 6] = [1.0, 2.0, 1.0, -1.0, 1.0, 0.5];

    #[test]
    fn test_gradient_is_weight_column() {
        let s = step(INPUT.to_vec(), WEIGHT.to_vec(), vec![0.0, 1.0], None);
        let out = GradientStrategy.through_linear(s);
        assert_close(&tensor_to_vec(out).unwrap(), &[2.0, -1.0, 0.5], 1e-6);
    }

    #[test]
    fn test_epsilon_conserves_relevance() {
        // z_1 = 2 + 2 + 1.5 = 5.5
        let s = step(INPUT.to_vec(), WEIGHT.to_vec(), vec![0.0, 1.0], None);
        let out = tensor_to_vec(EpsilonStrategy { epsilon: 1e-6 }.through_linear(s)).unwrap();
        assert_close(&out, &[2.0 / 5.5, 2.0 / 5.5, 1.5 / 5.5], 1e-5);
        assert!((out.iter().sum::<f32>() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_epsilon_zero_denominator_stays_finite() {
        // z = 1 - 1 = 0
        let device = Default::default();
        let input = vec_to_tensor::<TestBackend, 2>(vec![1.0, -1.0], [1, 2], &device).unwrap();
        let weight = vec_to_tensor::<TestBackend, 2>(vec![1.0, 1.0], [2, 1], &device).unwrap();
        let relevance = vec_to_tensor::<TestBackend, 2>(vec![1.0], [1, 1], &device).unwrap();
        let s = LinearStep {
            pre_activation: input.clone().matmul(weight.clone()),
            input,
            weight,
            relevance,
            pattern: None,
        };
        let out = tensor_to_vec(EpsilonStrategy { epsilon: 0.5 }.through_linear(s)).unwrap();
        // stabiliser +0.5 since sign(0) = +1
        assert_close(&out, &[2.0, -2.0], 1e-6);
    }

    #[test]
    fn test_epsilon_overflow_falls_back_to_guard() {
        let device = Default::default();
        let input = vec_to_tensor::<TestBackend, 2>(vec![f32::MAX, f32::MAX], [1, 2], &device).unwrap();
        let weight = vec_to_tensor::<TestBackend, 2>(vec![1.0, 1.0], [2, 1], &device).unwrap();
        let relevance = vec_to_tensor::<TestBackend, 2>(vec![1.0], [1, 1], &device).unwrap();
        let s = LinearStep {
            pre_activation: input.clone().matmul(weight.clone()),
            input,
            weight,
            relevance,
            pattern: None,
        };
        let out = tensor_to_vec(EpsilonStrategy { epsilon: 1.0 }.through_linear(s)).unwrap();
        assert!(out.iter().all(|v| !v.is_nan()));
    }

    fn single_output_step(input: Vec<f32>, weight: Vec<f32>, bias: f32) -> LinearStep<TestBackend> {
        let device = Default::default();
        let n = input.len();
        let input = vec_to_tensor::<TestBackend, 2>(input, [1, n], &device).unwrap();
        let weight = vec_to_tensor::<TestBackend, 2>(weight, [n, 1], &device).unwrap();
        let relevance = vec_to_tensor::<TestBackend, 2>(vec![1.0], [1, 1], &device).unwrap();
        LinearStep {
            pre_activation: input.clone().matmul(weight.clone()) + bias,
            input,
            weight,
            relevance,
            pattern: None,
        }
    }

    #[test]
    fn test_epsilon_ignores_bias() {
        // z = 1 + 1 = 2, bias 2 would halve the relevance if it were a contributor
        let s = single_output_step(vec![1.0, 1.0], vec![1.0, 1.0], 2.0);
        let out = tensor_to_vec(EpsilonStrategy { epsilon: 1e-6 }.through_linear(s)).unwrap();
        assert_close(&out, &[0.5, 0.5], 1e-5);
    }

    #[test]
    fn test_alpha_beta_conserves_relevance() {
        // output 1 contributions: 2, 2, 1.5 -> all positive
        // output 0 contributions: 1, -2, 3 -> mixed
        for (alpha, beta) in [(1.0, 0.0), (2.0, 1.0)] {
            let s = step(INPUT.to_vec(), WEIGHT.to_vec(), vec![1.0, 0.0], None);
            let out = tensor_to_vec(AlphaBetaStrategy { alpha, beta }.through_linear(s)).unwrap();
            assert!((out.iter().sum::<f32>() - 1.0).abs() < 1e-5, "alpha={alpha}: {out:?}");
        }

        let s = step(INPUT.to_vec(), WEIGHT.to_vec(), vec![1.0, 0.0], None);
        let out = tensor_to_vec(AlphaBetaStrategy { alpha: 1.0, beta: 0.0 }.through_linear(s)).unwrap();
        // positive contributions 1 and 3 share the relevance, the negative input gets none
        assert_close(&out, &[0.25, 0.0, 0.75], 1e-6);

        let s = step(INPUT.to_vec(), WEIGHT.to_vec(), vec![1.0, 0.0], None);
        let out = tensor_to_vec(AlphaBetaStrategy { alpha: 2.0, beta: 1.0 }.through_linear(s)).unwrap();
        // 2 * [0.25, 0, 0.75] - 1 * [0, 1, 0]
        assert_close(&out, &[0.5, -1.0, 1.5], 1e-6);
    }

    #[test]
    fn test_alpha_beta_one_sided_contributions() {
        let positive_only = [vec![1.0, 2.0], vec![1.0, 1.0]];
        let negative_only = [vec![1.0, 3.0], vec![-1.0, -1.0]];

        for (alpha, beta) in [(1.0, 0.0), (2.0, 1.0), (3.0, 2.0)] {
            let rule = AlphaBetaStrategy { alpha, beta };

            let [x, w] = positive_only.clone();
            let out = tensor_to_vec(rule.through_linear(single_output_step(x, w, 0.5))).unwrap();
            assert_close(&out, &[1.0 / 3.0, 2.0 / 3.0], 1e-6);

            let [x, w] = negative_only.clone();
            let out = tensor_to_vec(rule.through_linear(single_output_step(x, w, 0.5))).unwrap();
            assert_close(&out, &[0.25, 0.75], 1e-6);
        }
    }

    #[test]
    fn test_pattern_rules_use_pattern() {
        let pattern = vec![0.5, 1.0, 0.0, 1.0, 2.0, 0.0];
        let s = step(INPUT.to_vec(), WEIGHT.to_vec(), vec![1.0, 0.0], Some(pattern.clone()));
        let attribution = tensor_to_vec(PatternAttributionStrategy.through_linear(s)).unwrap();
        assert_close(&attribution, &[0.5, 0.0, 2.0], 1e-6);

        let s = step(INPUT.to_vec(), WEIGHT.to_vec(), vec![1.0, 0.0], Some(pattern));
        let net = tensor_to_vec(PatternNetStrategy.through_linear(s)).unwrap();
        assert_close(&net, &[0.5, 0.0, 2.0], 1e-6);

        let s = step(INPUT.to_vec(), WEIGHT.to_vec(), vec![0.0, 1.0], Some(vec![1.0; 6]));
        let net = tensor_to_vec(PatternNetStrategy.through_linear(s)).unwrap();
        assert_close(&net, &[1.0, 1.0, 1.0], 1e-6);
    }

    #[test]
    fn test_activation_gating() {
        let device = Default::default();
        let relevance = vec_to_tensor::<TestBackend, 2>(vec![1.0, 1.0], [1, 2], &device).unwrap();
        let z = vec_to_tensor::<TestBackend, 2>(vec![-1.0, 2.0], [1, 2], &device).unwrap();

        let gated = AttributionStrategy::<TestBackend>::through_activation(
            &GradientStrategy,
            relevance.clone(),
            z.clone(),
            Activation::Relu,
        );
        assert_eq!(tensor_to_vec(gated).unwrap(), vec![0.0, 1.0]);

        let passed = AttributionStrategy::<TestBackend>::through_activation(
            &EpsilonStrategy { epsilon: 1e-6 },
            relevance.clone(),
            z.clone(),
            Activation::Relu,
        );
        assert_eq!(tensor_to_vec(passed).unwrap(), vec![1.0, 1.0]);

        let identity = AttributionStrategy::<TestBackend>::through_activation(
            &PatternNetStrategy,
            relevance,
            z,
            Activation::Identity,
        );
        assert_eq!(tensor_to_vec(identity).unwrap(), vec![1.0, 1.0]);
    }
}
