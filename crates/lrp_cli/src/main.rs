//! lrp CLI: fit PatternNet patterns and render attribution maps for MNIST classifiers.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use burn::prelude::*;
use burn_ndarray::NdArray;
use lrp_core::tensor::tensor_to_vec;
use lrp_core::{ImageBatch, Seed};
use lrp_data::{load_mnist, DataLoader, ImageDataset, MnistSplit};
use lrp_explain::{
    AttributionContext, ExplainError, Explainer, PatternFitterConfig, PatternSet, PatternStore,
    PatternVariant, Rule, RuleRegistry, TargetSelector,
};
use lrp_models::checkpoint::load_model;
use lrp_models::{ModelFingerprint, Sequential, SequentialConfig};

/// Backend used by the CLI.
type CliBackend = NdArray;

#[derive(Parser)]
#[command(name = "lrp")]
#[command(author, version)]
#[command(about = "Relevance attribution maps (LRP, PatternNet, PatternAttribution) for MNIST classifiers")]
#[command(long_about = "lrp: explain the predictions of a feed-forward MNIST classifier.

EXAMPLES:
  # List the available rules
  lrp rules

  # Fit both pattern variants from the training split
  lrp fit-patterns --data ./mnist --checkpoint ./runs/mlp

  # Explain 16 test images with the full rule panel
  lrp explain --data ./mnist --checkpoint ./runs/mlp --output report.json

  # Show the fingerprint that keys the pattern cache
  lrp fingerprint --checkpoint ./runs/mlp")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command that needs a model.
#[derive(clap::Args, Debug, Clone)]
struct ModelArgs {
    /// Checkpoint base path (weights `.mpk` plus `.json` metadata)
    #[arg(long, value_name = "PATH")]
    checkpoint: Option<PathBuf>,

    /// Seed for the untrained fallback model and batch order
    #[arg(long, default_value = "42", value_name = "SEED")]
    seed: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered attribution rules
    Rules,
    /// Fit PatternNet patterns on the MNIST training split
    FitPatterns {
        #[command(flatten)]
        model: ModelArgs,

        /// Directory holding the uncompressed MNIST IDX files
        #[arg(long, value_name = "DIR")]
        data: PathBuf,

        /// Pattern variant to fit
        #[arg(long, value_enum, default_value = "both")]
        variant: VariantArg,

        /// Batch size for the fitting pass
        #[arg(long, default_value = "256", value_name = "SIZE")]
        batch_size: usize,

        /// Only use the first N training images
        #[arg(long, value_name = "N")]
        limit: Option<usize>,

        /// Pattern cache directory
        #[arg(long, default_value = "./patterns", value_name = "DIR")]
        cache_dir: PathBuf,
    },
    /// Explain test images with the full rule panel and write a JSON report
    Explain {
        #[command(flatten)]
        model: ModelArgs,

        /// Directory holding the uncompressed MNIST IDX files
        #[arg(long, value_name = "DIR")]
        data: PathBuf,

        /// Number of test images to explain
        #[arg(long, default_value = "16", value_name = "N")]
        n_samples: usize,

        /// Batch size used if patterns must be refitted
        #[arg(long, default_value = "256", value_name = "SIZE")]
        batch_size: usize,

        /// Pattern cache directory
        #[arg(long, default_value = "./patterns", value_name = "DIR")]
        cache_dir: PathBuf,

        /// Output report path
        #[arg(long, default_value = "attributions.json", value_name = "PATH")]
        output: PathBuf,
    },
    /// Print the fingerprint of a model
    Fingerprint {
        #[command(flatten)]
        model: ModelArgs,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum VariantArg {
    All,
    Positive,
    Both,
}

impl VariantArg {
    fn variants(self) -> Vec<PatternVariant> {
        match self {
            VariantArg::All => vec![PatternVariant::All],
            VariantArg::Positive => vec![PatternVariant::Positive],
            VariantArg::Both => vec![PatternVariant::All, PatternVariant::Positive],
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::filter::LevelFilter::from_level(log_level))
        .init();

    match cli.command {
        Commands::Rules => handle_rules(),
        Commands::FitPatterns {
            model,
            data,
            variant,
            batch_size,
            limit,
            cache_dir,
        } => handle_fit_patterns(model, data, variant, batch_size, limit, cache_dir),
        Commands::Explain {
            model,
            data,
            n_samples,
            batch_size,
            cache_dir,
            output,
        } => handle_explain(model, data, n_samples, batch_size, cache_dir, output),
        Commands::Fingerprint { model } => handle_fingerprint(model),
    }
}

fn handle_rules() -> Result<()> {
    let registry = RuleRegistry::default();
    println!("Available rules:\n");
    for id in registry.list() {
        let rule = registry.resolve(id)?;
        let needs = if rule.requires_pattern() {
            "requires patterns"
        } else {
            ""
        };
        println!("  {:<20} {:<32} {}", id, rule.to_string(), needs);
    }
    Ok(())
}

fn handle_fingerprint(args: ModelArgs) -> Result<()> {
    let device = Default::default();
    let model = load_or_init_model(&args, &device)?;
    let fingerprint = ModelFingerprint::of(&model)?;
    println!("{fingerprint}");
    Ok(())
}

fn handle_fit_patterns(
    args: ModelArgs,
    data: PathBuf,
    variant: VariantArg,
    batch_size: usize,
    limit: Option<usize>,
    cache_dir: PathBuf,
) -> Result<()> {
    let device = Default::default();
    let explainer = Explainer::new(load_or_init_model(&args, &device)?)?;
    let train = load_mnist(&data, MnistSplit::Train)
        .with_context(|| format!("Failed to load MNIST training split from {}", data.display()))?;
    let train = match limit {
        Some(n) => train.head(n),
        None => train,
    };

    println!("=== lrp pattern fitting ===\n");
    println!("  Model:       {}", explainer.fingerprint().short());
    println!("  Train size:  {}", train.len());
    println!("  Batch size:  {}", batch_size);
    println!("  Cache:       {}\n", cache_dir.display());

    for variant in variant.variants() {
        let patterns = fit_patterns(&explainer, &train, variant, batch_size, Seed::new(args.seed), &device)?;
        let path = PatternStore::cache_path(&cache_dir, explainer.fingerprint(), variant);
        PatternStore::save(&patterns, &path)
            .with_context(|| format!("Failed to write patterns to {}", path.display()))?;
        println!("  {:<9} -> {}", variant.as_str(), path.display());
    }
    Ok(())
}

fn handle_explain(
    args: ModelArgs,
    data: PathBuf,
    n_samples: usize,
    batch_size: usize,
    cache_dir: PathBuf,
    output: PathBuf,
) -> Result<()> {
    if n_samples == 0 {
        bail!("--n-samples must be at least 1");
    }
    let device = Default::default();
    let explainer = Explainer::new(load_or_init_model(&args, &device)?)?;
    let seed = Seed::new(args.seed);

    let test = load_mnist(&data, MnistSplit::Test)
        .with_context(|| format!("Failed to load MNIST test split from {}", data.display()))?
        .head(n_samples);
    let batch = first_batch(&test, &device)?;

    let mut train: Option<ImageDataset> = None;
    let mut pattern_sets = Vec::new();
    for variant in [PatternVariant::All, PatternVariant::Positive] {
        let path = PatternStore::cache_path(&cache_dir, explainer.fingerprint(), variant);
        let patterns = match PatternStore::load_for_model(&path, explainer.fingerprint()) {
            Ok(patterns) => {
                tracing::info!(path = %path.display(), "using cached patterns");
                patterns
            }
            Err(err) => {
                match &err {
                    ExplainError::PatternInvalidated { .. } => {
                        tracing::warn!(path = %path.display(), "cached patterns belong to another model; refitting")
                    }
                    other => tracing::info!(path = %path.display(), error = %other, "no usable cached patterns; fitting"),
                }
                if train.is_none() {
                    train = Some(load_mnist(&data, MnistSplit::Train).with_context(|| {
                        format!("Failed to load MNIST training split from {}", data.display())
                    })?);
                }
                let dataset = train.as_ref().context("training split not loaded")?;
                let patterns = fit_patterns(&explainer, dataset, variant, batch_size, seed, &device)?;
                PatternStore::save(&patterns, &path)?;
                patterns
            }
        };
        pattern_sets.push(patterns);
    }

    let [_, channels, height, width] = batch.x.dims();
    let features = channels * height * width;
    let mut maps = Vec::new();
    let mut predictions = Vec::new();

    for entry in PANEL {
        let patterns = entry
            .variant
            .and_then(|v| pattern_sets.iter().find(|set| set.variant == v));
        let mut ctx = AttributionContext::new();
        let attribution = explainer
            .explain(&mut ctx, batch.x.clone(), entry.rule_id, patterns, &TargetSelector::Predicted)
            .with_context(|| format!("Attribution with {} failed", entry.label))?;
        let attribution = if entry.times_input {
            attribution.times_input()
        } else {
            attribution
        };

        predictions = attribution.predictions.clone();
        let values = tensor_to_vec(attribution.normalized_for_display())?;
        maps.push(MapEntry {
            method: entry.label.to_string(),
            rule: attribution.rule,
            variant: entry.variant,
            values: values.chunks(features).map(<[f32]>::to_vec).collect(),
        });
        println!("  {:<28} done", entry.label);
    }

    let report = ExplainReport {
        fingerprint: explainer.fingerprint().to_string(),
        image_dims: [channels, height, width],
        labels: batch.labels.clone(),
        predictions,
        maps,
    };
    write_report(&report, &output)?;
    println!("\nWrote {} attribution maps to {}", report.maps.len(), output.display());
    Ok(())
}

/// One column of the explain report.
struct PanelEntry {
    label: &'static str,
    rule_id: &'static str,
    variant: Option<PatternVariant>,
    times_input: bool,
}

const PANEL: [PanelEntry; 8] = [
    PanelEntry {
        label: "input*gradient",
        rule_id: "gradient",
        variant: None,
        times_input: true,
    },
    PanelEntry {
        label: "epsilon",
        rule_id: "epsilon",
        variant: None,
        times_input: false,
    },
    PanelEntry {
        label: "alpha1beta0",
        rule_id: "alpha1beta0",
        variant: None,
        times_input: false,
    },
    PanelEntry {
        label: "alpha2beta1",
        rule_id: "alpha2beta1",
        variant: None,
        times_input: false,
    },
    PanelEntry {
        label: "patternattribution(all)",
        rule_id: "patternattribution",
        variant: Some(PatternVariant::All),
        times_input: false,
    },
    PanelEntry {
        label: "patternattribution(positive)",
        rule_id: "patternattribution",
        variant: Some(PatternVariant::Positive),
        times_input: false,
    },
    PanelEntry {
        label: "patternnet(all)",
        rule_id: "patternnet",
        variant: Some(PatternVariant::All),
        times_input: false,
    },
    PanelEntry {
        label: "patternnet(positive)",
        rule_id: "patternnet",
        variant: Some(PatternVariant::Positive),
        times_input: false,
    },
];

#[derive(Serialize)]
struct MapEntry {
    method: String,
    rule: Rule,
    variant: Option<PatternVariant>,
    values: Vec<Vec<f32>>,
}

#[derive(Serialize)]
struct ExplainReport {
    fingerprint: String,
    image_dims: [usize; 3],
    labels: Option<Vec<usize>>,
    predictions: Vec<usize>,
    maps: Vec<MapEntry>,
}

fn write_report(report: &ExplainReport, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string(report)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

fn load_or_init_model(
    args: &ModelArgs,
    device: &<CliBackend as Backend>::Device,
) -> Result<Sequential<CliBackend>> {
    match &args.checkpoint {
        Some(path) => {
            let (model, _) = load_model::<CliBackend>(path, device)
                .with_context(|| format!("Failed to load checkpoint {}", path.display()))?;
            Ok(model)
        }
        None => {
            tracing::warn!(
                seed = args.seed,
                "no checkpoint given; explaining an untrained model"
            );
            Ok(SequentialConfig::mnist()
                .with_seed(Seed::new(args.seed))
                .init::<CliBackend>(device)?)
        }
    }
}

fn fit_patterns(
    explainer: &Explainer<CliBackend>,
    dataset: &ImageDataset,
    variant: PatternVariant,
    batch_size: usize,
    seed: Seed,
    device: &<CliBackend as Backend>::Device,
) -> Result<PatternSet> {
    let loader = DataLoader::builder(dataset.clone())
        .batch_size(batch_size)
        .shuffle(true)
        .seed(seed)
        .build()?;

    let fitter = explainer.pattern_fitter(PatternFitterConfig::new(variant))?;
    let mut stats = fitter.statistics();
    for batch in loader.iter::<CliBackend>(device) {
        fitter.observe(&mut stats, batch?.x)?;
    }
    Ok(fitter.finalize(&stats)?)
}

fn first_batch(
    dataset: &ImageDataset,
    device: &<CliBackend as Backend>::Device,
) -> Result<ImageBatch<CliBackend>> {
    let loader = DataLoader::builder(dataset.clone())
        .batch_size(dataset.len().max(1))
        .build()?;
    match loader.iter::<CliBackend>(device).next() {
        Some(batch) => Ok(batch?),
        None => bail!("no test images to explain"),
    }
}
