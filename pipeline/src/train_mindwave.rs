//! CLI entry point for the Mindwave chill/fear training pipeline.
//!
//! Subcommands:
//!   knn       -- Hold-out split, k-NN fit, evaluation and persistence
//!   cnn       -- SMOTE balancing, k-fold cross-validated CNN training
//!   evaluate  -- Score saved scaler + model artifacts on labeled sessions

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use mindwave_core::{ClassifierKind, PipelineConfig};
use mindwave_pipeline::config::load_or_default;
use mindwave_pipeline::training::pipeline::{evaluate_artifacts, run_distance, run_iterative};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "train-mindwave", about = "Mindwave chill/fear classifier pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// Flags shared by every subcommand.
#[derive(Args)]
struct CommonArgs {
    /// YAML pipeline configuration; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Session CSV files (replaces the configured inputs).
    #[arg(long, num_args = 1..)]
    input: Vec<PathBuf>,

    /// Output directory for scaler, model and report artifacts.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Random seed.
    #[arg(long)]
    seed: Option<u64>,
}

impl CommonArgs {
    fn resolve(&self) -> anyhow::Result<PipelineConfig> {
        let mut config = load_or_default(self.config.as_deref())
            .with_context(|| "failed to load pipeline configuration")?;
        if !self.input.is_empty() {
            config.inputs = self.input.clone();
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Command {
    /// Train and evaluate the k-nearest-neighbour classifier.
    Knn {
        #[command(flatten)]
        common: CommonArgs,

        /// Number of neighbours.
        #[arg(long)]
        k: Option<usize>,

        /// Fraction of rows held out for testing.
        #[arg(long)]
        test_ratio: Option<f64>,
    },

    /// Train the convolutional network with k-fold cross-validation.
    Cnn {
        #[command(flatten)]
        common: CommonArgs,

        /// Epochs per fold.
        #[arg(long)]
        epochs: Option<usize>,

        /// Mini-batch size.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Learning rate.
        #[arg(long)]
        lr: Option<f64>,

        /// Number of cross-validation folds.
        #[arg(long)]
        folds: Option<usize>,

        /// Re-initialise weights at the start of every fold.
        #[arg(long)]
        reset_weights_per_fold: bool,
    },

    /// Evaluate saved artifacts against labeled session files.
    Evaluate {
        #[command(flatten)]
        common: CommonArgs,

        /// Classifier family of the model artifact (knn or cnn).
        #[arg(long)]
        kind: ClassifierKind,

        /// Model artifact; defaults to the configured file for `kind`.
        #[arg(long)]
        model: Option<PathBuf>,

        /// Scaler parameters; defaults to the configured scaler path.
        #[arg(long)]
        scaler: Option<PathBuf>,
    },
}

fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Knn {
            common,
            k,
            test_ratio,
        } => {
            let mut config = common.resolve()?;
            if let Some(k) = k {
                config.knn.k = k;
            }
            if let Some(ratio) = test_ratio {
                config.knn.test_ratio = ratio;
            }
            let result = run_distance(&config)?;
            println!("\nConfusion matrix (rows=true, cols=predicted):");
            println!("{:?}", result.confusion.counts);
            println!("\n{}", result.report);
            println!("Model saved to {}", result.model_path.display());
        }

        Command::Cnn {
            common,
            epochs,
            batch_size,
            lr,
            folds,
            reset_weights_per_fold,
        } => {
            let mut config = common.resolve()?;
            if let Some(epochs) = epochs {
                config.cnn.epochs = epochs;
            }
            if let Some(batch_size) = batch_size {
                config.cnn.batch_size = batch_size;
            }
            if let Some(lr) = lr {
                config.cnn.learning_rate = lr;
            }
            if let Some(folds) = folds {
                config.cnn.folds = folds;
            }
            config.cnn.reset_weights_per_fold |= reset_weights_per_fold;

            let result = run_iterative(&config)?;
            for fold in &result.folds {
                println!("\nFold {} report:\n{}", fold.fold, fold.report);
            }
            println!("\n{}", result.mean_confusion);
            println!("Model saved to {}", result.model_path.display());
        }

        Command::Evaluate {
            common,
            kind,
            model,
            scaler,
        } => {
            let config = common.resolve()?;
            let model = model.unwrap_or_else(|| match kind {
                ClassifierKind::Knn => config.output_dir.join(&config.knn.model_file),
                ClassifierKind::Cnn => config.output_dir.join(&config.cnn.model_file),
            });
            let scaler = scaler.unwrap_or_else(|| config.scaler_path());
            let result = evaluate_artifacts(kind, &scaler, &model, &config.inputs)
                .with_context(|| format!("failed to evaluate {}", model.display()))?;
            println!("\nConfusion matrix (rows=true, cols=predicted):");
            println!("{:?}", result.confusion.counts);
            println!("\n{}", result.report);
        }
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli.command) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
