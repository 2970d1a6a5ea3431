//! Feed-forward classifiers built from dense layers.
//!
//! Every layer is an affine map followed by an optional nonlinearity. Weights
//! are stored `[in_features, out_features]` so a batch `x` of shape
//! `[batch, in_features]` maps to `x.matmul(w) + b`.

use burn::module::{Ignored, Param};
use burn::prelude::*;
use burn::tensor::activation::relu;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};
use lrp_core::tensor::{argmax_per_row, flatten_batch, vec_to_tensor};
use lrp_core::Seed;

/// Nonlinearity applied after a layer's affine map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    /// No nonlinearity.
    #[default]
    Identity,
    /// `max(0, z)`.
    Relu,
}

impl Activation {
    /// Apply the nonlinearity.
    pub fn apply<B: Backend>(self, z: Tensor<B, 2>) -> Tensor<B, 2> {
        match self {
            Activation::Identity => z,
            Activation::Relu => relu(z),
        }
    }

    /// Stable tag used when hashing model identity.
    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            Activation::Identity => 0,
            Activation::Relu => 1,
        }
    }
}

/// Dense layer: affine map plus activation.
#[derive(Module, Debug)]
pub struct DenseLayer<B: Backend> {
    /// Weight matrix, `[in_features, out_features]`.
    weight: Param<Tensor<B, 2>>,
    /// Optional bias, `[out_features]`.
    bias: Option<Param<Tensor<B, 1>>>,
    /// Nonlinearity after the affine map.
    activation: Ignored<Activation>,
}

impl<B: Backend> DenseLayer<B> {
    /// Randomly initialised layer.
    ///
    /// Weights and bias are drawn from `U(-1/sqrt(in), 1/sqrt(in))` using a
    /// generator derived from `seed`.
    pub fn init(
        in_features: usize,
        out_features: usize,
        activation: Activation,
        with_bias: bool,
        seed: Seed,
        device: &B::Device,
    ) -> Result<Self> {
        if in_features == 0 || out_features == 0 {
            return Err(ModelError::InvalidConfig(format!(
                "layer {in_features} -> {out_features} has an empty side"
            )));
        }

        let bound = 1.0 / (in_features as f32).sqrt();
        let mut rng = seed.to_rng();
        let weights: Vec<f32> = (0..in_features * out_features)
            .map(|_| rng.gen_range(-bound..bound))
            .collect();
        let weight = vec_to_tensor::<B, 2>(weights, [in_features, out_features], device)?;

        let bias = if with_bias {
            let values: Vec<f32> = (0..out_features).map(|_| rng.gen_range(-bound..bound)).collect();
            Some(vec_to_tensor::<B, 1>(values, [out_features], device)?)
        } else {
            None
        };

        Self::from_tensors(weight, bias, activation)
    }

    /// Layer from explicit parameters.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::ShapeMismatch`] if the bias length differs from
    /// the weight's output dimension.
    pub fn from_tensors(
        weight: Tensor<B, 2>,
        bias: Option<Tensor<B, 1>>,
        activation: Activation,
    ) -> Result<Self> {
        let [_, out_features] = weight.dims();
        if let Some(ref b) = bias {
            let [len] = b.dims();
            if len != out_features {
                return Err(ModelError::ShapeMismatch(format!(
                    "bias has {len} entries, weight has {out_features} outputs"
                )));
            }
        }
        Ok(Self {
            weight: Param::from_tensor(weight),
            bias: bias.map(Param::from_tensor),
            activation: Ignored(activation),
        })
    }

    /// Input feature count.
    pub fn in_features(&self) -> usize {
        self.weight.dims()[0]
    }

    /// Output feature count.
    pub fn out_features(&self) -> usize {
        self.weight.dims()[1]
    }

    /// Weight matrix, `[in_features, out_features]`.
    pub fn weight(&self) -> Tensor<B, 2> {
        self.weight.val()
    }

    /// Bias vector, if any.
    pub fn bias(&self) -> Option<Tensor<B, 1>> {
        self.bias.as_ref().map(|b| b.val())
    }

    /// The layer's nonlinearity.
    pub fn activation(&self) -> Activation {
        self.activation.0
    }

    /// Affine part only: `x.matmul(w) + b`.
    pub fn pre_activation(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let z = x.matmul(self.weight.val());
        match &self.bias {
            Some(bias) => z + bias.val().unsqueeze::<2>(),
            None => z,
        }
    }

    /// Full layer.
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        self.activation.0.apply(self.pre_activation(x))
    }
}

/// A chain of dense layers mapping flattened inputs to class scores.
///
/// ```text
/// Input (N, ...) -> flatten -> (N, F)
///       |
///       +---> [Dense + activation] x L
///       |
///       +---> Output (N, n_classes)
/// ```
#[derive(Module, Debug)]
pub struct Sequential<B: Backend> {
    layers: Vec<DenseLayer<B>>,
}

impl<B: Backend> Sequential<B> {
    /// Chain the given layers.
    ///
    /// # Errors
    ///
    /// Returns an error if there are no layers or consecutive layers do not
    /// agree on their shared dimension.
    pub fn new(layers: Vec<DenseLayer<B>>) -> Result<Self> {
        if layers.is_empty() {
            return Err(ModelError::InvalidConfig("a model needs at least one layer".to_string()));
        }
        for (index, pair) in layers.windows(2).enumerate() {
            if pair[0].out_features() != pair[1].in_features() {
                return Err(ModelError::ShapeMismatch(format!(
                    "layer {} outputs {} features but layer {} expects {}",
                    index,
                    pair[0].out_features(),
                    index + 1,
                    pair[1].in_features()
                )));
            }
        }
        Ok(Self { layers })
    }

    /// The layers, input first.
    pub fn layers(&self) -> &[DenseLayer<B>] {
        &self.layers
    }

    /// Number of layers.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Always false for a constructed model.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Flattened input feature count.
    pub fn in_features(&self) -> usize {
        self.layers.first().map_or(0, DenseLayer::in_features)
    }

    /// Number of output scores.
    pub fn out_features(&self) -> usize {
        self.layers.last().map_or(0, DenseLayer::out_features)
    }

    /// Ordinary forward pass; the input is flattened per sample.
    pub fn forward<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, 2> {
        self.layers
            .iter()
            .fold(flatten_batch(x), |out, layer| layer.forward(out))
    }

    /// Predicted class per sample.
    ///
    /// # Errors
    ///
    /// Returns an error if the output scores cannot be read back.
    pub fn predict<const D: usize>(&self, x: Tensor<B, D>) -> Result<Vec<usize>> {
        Ok(argmax_per_row(self.forward(x))?)
    }
}

/// Configuration for a [`Sequential`] classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequentialConfig {
    /// Flattened input features.
    pub in_features: usize,
    /// Hidden layer widths.
    pub hidden_sizes: Vec<usize>,
    /// Number of output classes.
    pub n_classes: usize,
    /// Activation after every hidden layer; the output layer is linear.
    pub hidden_activation: Activation,
    /// Whether layers carry a bias.
    pub bias: bool,
    /// Seed for weight initialisation.
    pub seed: Seed,
}

impl Default for SequentialConfig {
    fn default() -> Self {
        Self {
            in_features: 28 * 28,
            hidden_sizes: vec![512, 256],
            n_classes: 10,
            hidden_activation: Activation::Relu,
            bias: true,
            seed: Seed::default(),
        }
    }
}

impl SequentialConfig {
    /// Create a new config.
    pub fn new(in_features: usize, n_classes: usize) -> Self {
        Self {
            in_features,
            n_classes,
            ..Default::default()
        }
    }

    /// MNIST-sized classifier: 784 inputs, 10 classes.
    pub fn mnist() -> Self {
        Self::default()
    }

    /// Set hidden layer sizes.
    #[must_use]
    pub fn with_hidden_sizes(mut self, sizes: Vec<usize>) -> Self {
        self.hidden_sizes = sizes;
        self
    }

    /// Set the hidden activation.
    #[must_use]
    pub fn with_hidden_activation(mut self, activation: Activation) -> Self {
        self.hidden_activation = activation;
        self
    }

    /// Enable or disable biases.
    #[must_use]
    pub fn with_bias(mut self, bias: bool) -> Self {
        self.bias = bias;
        self
    }

    /// Set the initialisation seed.
    #[must_use]
    pub fn with_seed(mut self, seed: Seed) -> Self {
        self.seed = seed;
        self
    }

    /// Initialize the model.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidConfig`] if any width is zero.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Sequential<B>> {
        let mut widths = Vec::with_capacity(self.hidden_sizes.len() + 2);
        widths.push(self.in_features);
        widths.extend(&self.hidden_sizes);
        widths.push(self.n_classes);

        let n_layers = widths.len() - 1;
        let layers = widths
            .windows(2)
            .enumerate()
            .map(|(index, pair)| {
                let activation = if index + 1 == n_layers {
                    Activation::Identity
                } else {
                    self.hidden_activation
                };
                DenseLayer::init(
                    pair[0],
                    pair[1],
                    activation,
                    self.bias,
                    self.seed.derive_indexed("layer", index),
                    device,
                )
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(widths = ?widths, seed = self.seed.value(), "initialised sequential model");
        Sequential::new(layers)
    }
}
