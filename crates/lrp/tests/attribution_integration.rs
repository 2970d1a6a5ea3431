//! Integration tests for the attribution pipeline.
//!
//! These tests drive data loading, pattern fitting, persistence and the
//! backward sweep together on small synthetic image sets.

use burn::prelude::*;
use burn_ndarray::NdArray;
use ndarray::Array4;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use lrp_core::tensor::{tensor_to_vec, vec_to_tensor};
use lrp_core::Seed;
use lrp_data::{DataLoader, ImageDataset};
use lrp_explain::{
    AttributionContext, ExplainError, Explainer, PatternFitter, PatternFitterConfig, PatternSet, PatternStore,
    PatternVariant, Rule, TargetSelector,
};
use lrp_models::checkpoint::{load_model, save_model};
use lrp_models::{Activation, DenseLayer, ModelFingerprint, Sequential, SequentialConfig};

type TestBackend = NdArray;

/// Images with pixels uniform in `[0, 1)`.
fn create_synthetic_images(n_samples: usize, side: usize, seed: u64) -> ImageDataset {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let data: Vec<f32> = (0..n_samples * side * side).map(|_| rng.gen::<f32>()).collect();
    let x = Array4::from_shape_vec((n_samples, 1, side, side), data).unwrap();
    let labels = (0..n_samples).map(|i| i % 10).collect();
    ImageDataset::from_arrays(x, Some(labels)).unwrap()
}

fn relu_config(side: usize, seed: u64) -> SequentialConfig {
    SequentialConfig::new(side * side, 10)
        .with_hidden_sizes(vec![32])
        .with_hidden_activation(Activation::Relu)
        .with_bias(false)
        .with_seed(Seed::new(seed))
}

fn first_batch(dataset: &ImageDataset, n: usize) -> Tensor<TestBackend, 4> {
    let loader = DataLoader::builder(dataset.head(n)).batch_size(n).build().unwrap();
    loader
        .iter::<TestBackend>(&Default::default())
        .next()
        .unwrap()
        .unwrap()
        .x
}

fn fit(explainer: &Explainer<TestBackend>, loader: &DataLoader, variant: PatternVariant) -> PatternSet {
    let fitter = explainer.pattern_fitter(PatternFitterConfig::new(variant)).unwrap();
    let mut stats = fitter.statistics();
    for batch in loader.iter::<TestBackend>(&Default::default()) {
        fitter.observe(&mut stats, batch.unwrap().x).unwrap();
    }
    fitter.finalize(&stats).unwrap()
}

#[test]
fn test_epsilon_two_layer_linear_scenario() {
    // input dimension 4, batch size 2, epsilon = 1e-6
    let device = Default::default();
    let w1 = vec_to_tensor::<TestBackend, 2>(
        vec![0.4, -0.3, 0.2, 0.7, 0.5, -0.1, -0.6, 0.3, 0.9, 0.8, 0.1, -0.2],
        [4, 3],
        &device,
    )
    .unwrap();
    let w2 = vec_to_tensor::<TestBackend, 2>(vec![0.6, -0.4, 0.3, 0.8, -0.5, 0.7], [3, 2], &device)
        .unwrap();
    let model = Sequential::new(vec![
        DenseLayer::from_tensors(w1, None, Activation::Identity).unwrap(),
        DenseLayer::from_tensors(w2, None, Activation::Identity).unwrap(),
    ])
    .unwrap();
    let explainer = Explainer::new(model).unwrap();

    let x = vec_to_tensor::<TestBackend, 2>(
        vec![1.0, 0.5, -0.5, 2.0, 0.2, 1.5, 1.0, -1.0],
        [2, 4],
        &device,
    )
    .unwrap();
    let mut ctx = AttributionContext::new();
    let batch = explainer
        .explain(&mut ctx, x, "epsilon", None, &TargetSelector::Predicted)
        .unwrap();

    assert_eq!(batch.shape(), [2, 4]);
    for sum in batch.sum_per_sample().unwrap() {
        assert!((sum - 1.0).abs() < 1e-5, "sum {sum}");
    }
}

#[test]
fn test_conservation_on_relu_network() {
    let dataset = create_synthetic_images(4, 8, 1);
    let model = relu_config(8, 2).init::<TestBackend>(&Default::default()).unwrap();
    let mut explainer = Explainer::new(model).unwrap();
    explainer
        .registry_mut()
        .register("epsilon_fine", Rule::epsilon(1e-9).unwrap())
        .unwrap();
    let x = first_batch(&dataset, 4);

    for rule_id in ["epsilon_fine", "alpha1beta0", "alpha2beta1"] {
        let mut ctx = AttributionContext::new();
        let batch = explainer
            .explain(&mut ctx, x.clone(), rule_id, None, &TargetSelector::Predicted)
            .unwrap();
        assert_eq!(batch.shape(), [4, 1, 8, 8]);
        for sum in batch.sum_per_sample().unwrap() {
            assert!((sum - 1.0).abs() < 1e-5, "{rule_id}: sum {sum}");
        }
    }
}

#[test]
fn test_conservation_on_biased_relu_network() {
    let dataset = create_synthetic_images(4, 4, 11);
    let model = SequentialConfig::new(16, 4)
        .with_hidden_sizes(vec![32])
        .with_hidden_activation(Activation::Relu)
        .with_seed(Seed::new(12))
        .init::<TestBackend>(&Default::default())
        .unwrap();
    assert!(model.layers().iter().all(|layer| layer.bias().is_some()));

    let mut explainer = Explainer::new(model).unwrap();
    explainer
        .registry_mut()
        .register("epsilon_fine", Rule::epsilon(1e-9).unwrap())
        .unwrap();
    let x = first_batch(&dataset, 4);

    for rule_id in ["epsilon_fine", "alpha1beta0", "alpha2beta1"] {
        let mut ctx = AttributionContext::new();
        let batch = explainer
            .explain(&mut ctx, x.clone(), rule_id, None, &TargetSelector::Predicted)
            .unwrap();
        for sum in batch.sum_per_sample().unwrap() {
            assert!((sum - 1.0).abs() < 1e-4, "{rule_id}: sum {sum}");
        }
    }
}

#[test]
fn test_concurrent_attributions_with_own_contexts() {
    let dataset = create_synthetic_images(8, 6, 13);
    let explainer = Explainer::new(relu_config(6, 14).init::<TestBackend>(&Default::default()).unwrap()).unwrap();
    let inputs: Vec<_> = (0..4).map(|i| first_batch(&dataset.subset(&[2 * i, 2 * i + 1]).unwrap(), 2)).collect();

    let serial: Vec<Vec<f32>> = inputs
        .iter()
        .map(|x| {
            let mut ctx = AttributionContext::new();
            let batch = explainer
                .explain(&mut ctx, x.clone(), "epsilon", None, &TargetSelector::Predicted)
                .unwrap();
            tensor_to_vec(batch.values).unwrap()
        })
        .collect();

    let concurrent: Vec<Vec<f32>> = std::thread::scope(|scope| {
        let handles: Vec<_> = inputs
            .iter()
            .map(|x| {
                let explainer = explainer.clone();
                let x = x.clone();
                scope.spawn(move || {
                    let mut ctx = AttributionContext::new();
                    let batch = explainer
                        .explain(&mut ctx, x, "epsilon", None, &TargetSelector::Predicted)
                        .unwrap();
                    assert!(ctx.is_empty());
                    tensor_to_vec(batch.values).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(concurrent, serial);
}

#[test]
fn test_statistics_sharded_across_threads() {
    let dataset = create_synthetic_images(32, 6, 15);
    let model = relu_config(6, 16).init::<TestBackend>(&Default::default()).unwrap();
    let config = PatternFitterConfig::new(PatternVariant::Positive);

    let loader = DataLoader::builder(dataset).batch_size(8).build().unwrap();
    let batches: Vec<_> = loader
        .iter::<TestBackend>(&Default::default())
        .map(|b| b.unwrap().x)
        .collect();

    let shards: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = batches
            .chunks(2)
            .map(|chunk| {
                let model = model.clone();
                let chunk = chunk.to_vec();
                scope.spawn(move || {
                    let fitter = PatternFitter::new(&model, config).unwrap();
                    fitter.accumulate(chunk).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let fitter = PatternFitter::new(&model, config).unwrap();
    let mut shards = shards.into_iter();
    let mut merged = shards.next().unwrap();
    for shard in shards {
        merged.merge(&shard).unwrap();
    }
    let whole = fitter.accumulate(batches).unwrap();
    assert_eq!(merged.samples(), whole.samples());

    let a = fitter.finalize(&merged).unwrap();
    let b = fitter.finalize(&whole).unwrap();
    for (pa, pb) in a.patterns.iter().zip(&b.patterns) {
        for (x, y) in pa.a.iter().zip(pb.a.iter()) {
            assert!((x - y).abs() <= 1e-5 * (1.0 + y.abs()), "{x} vs {y}");
        }
    }
}

#[test]
fn test_pattern_pipeline() {
    let dataset = create_synthetic_images(48, 8, 3);
    let model = relu_config(8, 4).init::<TestBackend>(&Default::default()).unwrap();
    let explainer = Explainer::new(model).unwrap();

    let loader = DataLoader::builder(dataset.clone())
        .batch_size(16)
        .shuffle(true)
        .seed(Seed::new(5))
        .build()
        .unwrap();

    let all = fit(&explainer, &loader, PatternVariant::All);
    let positive = fit(&explainer, &loader, PatternVariant::Positive);
    // the loader restarts in the same order, so refitting is reproducible
    assert_eq!(fit(&explainer, &loader, PatternVariant::Positive), positive);
    assert_ne!(all.patterns[0].a, positive.patterns[0].a);

    for (pattern, layer) in all.patterns.iter().zip(explainer.model().layers()) {
        assert_eq!(pattern.input_dim(), layer.in_features());
    }

    let x = first_batch(&dataset, 4);
    let mut ctx = AttributionContext::new();
    let attribution = explainer
        .explain(&mut ctx, x.clone(), "patternattribution", Some(&positive), &TargetSelector::Predicted)
        .unwrap();
    let net = explainer
        .explain(&mut ctx, x, "patternnet", Some(&positive), &TargetSelector::Predicted)
        .unwrap();

    assert_eq!(attribution.shape(), [4, 1, 8, 8]);
    assert_eq!(net.shape(), [4, 1, 8, 8]);
    assert_eq!(attribution.targets, net.targets);
    assert_ne!(
        tensor_to_vec(attribution.values).unwrap(),
        tensor_to_vec(net.values).unwrap()
    );
}

#[test]
fn test_sharded_statistics_match_single_pass() {
    let dataset = create_synthetic_images(40, 6, 6);
    let model = relu_config(6, 7).init::<TestBackend>(&Default::default()).unwrap();
    let explainer = Explainer::new(model).unwrap();
    let fitter = explainer
        .pattern_fitter(PatternFitterConfig::new(PatternVariant::Positive))
        .unwrap();

    let loader = DataLoader::builder(dataset).batch_size(8).build().unwrap();
    let batches: Vec<_> = loader
        .iter::<TestBackend>(&Default::default())
        .map(|b| b.unwrap().x)
        .collect();

    let whole = fitter.accumulate(batches.clone()).unwrap();
    let mut shards = batches
        .chunks(2)
        .map(|chunk| fitter.accumulate(chunk.to_vec()).unwrap())
        .collect::<Vec<_>>()
        .into_iter()
        .rev();
    let mut merged = shards.next().unwrap();
    for shard in shards {
        merged.merge(&shard).unwrap();
    }
    assert_eq!(merged.samples(), whole.samples());

    let a = fitter.finalize(&merged).unwrap();
    let b = fitter.finalize(&whole).unwrap();
    for (pa, pb) in a.patterns.iter().zip(&b.patterns) {
        for (x, y) in pa.a.iter().zip(pb.a.iter()) {
            assert!((x - y).abs() <= 1e-5 * (1.0 + y.abs()), "{x} vs {y}");
        }
    }
}

#[test]
fn test_cached_patterns_invalidated_by_new_model() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = create_synthetic_images(16, 6, 8);
    let loader = DataLoader::builder(dataset).batch_size(8).build().unwrap();

    let old = Explainer::new(relu_config(6, 1).init::<TestBackend>(&Default::default()).unwrap()).unwrap();
    let new = Explainer::new(relu_config(6, 2).init::<TestBackend>(&Default::default()).unwrap()).unwrap();

    let patterns = fit(&old, &loader, PatternVariant::All);
    let path = PatternStore::cache_path(dir.path(), old.fingerprint(), PatternVariant::All);
    PatternStore::save(&patterns, &path).unwrap();

    assert_eq!(PatternStore::load_for_model(&path, old.fingerprint()).unwrap(), patterns);
    assert!(matches!(
        PatternStore::load_for_model(&path, new.fingerprint()),
        Err(ExplainError::PatternInvalidated { .. })
    ));
}

#[test]
fn test_checkpoint_round_trip_keeps_patterns_valid() {
    let dir = tempfile::tempdir().unwrap();
    let device = Default::default();
    let config = relu_config(6, 9);
    let model = config.init::<TestBackend>(&device).unwrap();
    let fingerprint = ModelFingerprint::of(&model).unwrap();

    let base = dir.path().join("mlp");
    save_model(&model, &config, &base).unwrap();
    let (loaded, meta) = load_model::<TestBackend>(&base, &device).unwrap();

    assert_eq!(meta.fingerprint, fingerprint);
    assert_eq!(ModelFingerprint::of(&loaded).unwrap(), fingerprint);
}

#[test]
fn test_unknown_rule_is_raised_before_forward() {
    let dataset = create_synthetic_images(2, 6, 10);
    let explainer = Explainer::new(relu_config(6, 3).init::<TestBackend>(&Default::default()).unwrap()).unwrap();

    let mut ctx = AttributionContext::new();
    let err = explainer
        .explain(&mut ctx, first_batch(&dataset, 2), "guided_backprop", None, &TargetSelector::Predicted)
        .unwrap_err();
    assert!(matches!(err, ExplainError::UnknownRule { .. }));
    assert!(ctx.is_empty());
}
