//! End-to-end runs: load → normalize → (balance) → train → evaluate → persist.

use crate::training::balance::balance;
use crate::training::data::{k_fold, load_sessions, train_test_split, LoadReport};
use crate::training::metrics::{
    mean_confusion, ClassificationReport, ConfusionMatrix, MeanConfusionMatrix,
};
use crate::training::trainer::Trainer;
use mindwave_classifier::persist::ensure_parent_dir;
use mindwave_classifier::{save_scaler, Normalizer, StateClassifier};
use mindwave_core::{ClassifierKind, EpochMetrics, MindwaveError, PipelineConfig, Result, Samples};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Outcome of a hold-out run of the distance strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldoutReport {
    pub seed: u64,
    pub k: usize,
    pub load: LoadReport,
    pub train_size: usize,
    pub test_size: usize,
    pub confusion: ConfusionMatrix,
    pub report: ClassificationReport,
    pub model_path: PathBuf,
    pub scaler_path: PathBuf,
}

/// Train/evaluate results for one cross-validation fold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoldResult {
    /// 1-based fold number.
    pub fold: usize,
    pub train_size: usize,
    pub validation_size: usize,
    pub history: Vec<EpochMetrics>,
    pub confusion: ConfusionMatrix,
    pub report: ClassificationReport,
}

/// Outcome of a cross-validated run of the iterative strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossValidationReport {
    pub seed: u64,
    pub load: LoadReport,
    /// Class counts `[chill, fear]` after balancing.
    pub balanced_counts: [usize; 2],
    pub reset_weights_per_fold: bool,
    pub folds: Vec<FoldResult>,
    pub mean_confusion: MeanConfusionMatrix,
    pub model_path: PathBuf,
    pub scaler_path: PathBuf,
}

impl CrossValidationReport {
    /// Validation accuracy per epoch, one sequence per fold.
    pub fn val_accuracy_curves(&self) -> Vec<Vec<f64>> {
        self.folds
            .iter()
            .map(|f| f.history.iter().filter_map(|m| m.val_accuracy).collect())
            .collect()
    }
}

/// Scores of previously saved artifacts on a labeled session set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub kind: ClassifierKind,
    pub load: LoadReport,
    pub confusion: ConfusionMatrix,
    pub report: ClassificationReport,
}

/// Load, standardize, and persist scaler parameters.
fn prepare(config: &PipelineConfig) -> Result<(Samples, LoadReport, PathBuf)> {
    config.validate()?;
    let (dataset, load) = load_sessions(&config.inputs)?;
    let samples = dataset.into_samples();
    let [chill, fear] = samples.class_counts();
    tracing::info!(rows = samples.len(), chill, fear, "Dataset assembled");

    let (scaled, normalizer) = Normalizer::fit_transform(&samples.features)?;
    let scaler_path = config.scaler_path();
    save_scaler(normalizer.params(), &scaler_path)?;

    let samples = Samples::new(scaled, samples.labels)?;
    Ok((samples, load, scaler_path))
}

/// Distance strategy: seeded hold-out split, k-NN fit, evaluation, persistence.
pub fn run_distance(config: &PipelineConfig) -> Result<HoldoutReport> {
    let (samples, load, scaler_path) = prepare(config)?;
    let (train, test) = train_test_split(&samples, config.knn.test_ratio, config.seed)?;
    tracing::info!(train = train.len(), test = test.len(), "Hold-out split");

    let mut trainer = Trainer::distance(config.knn.k);
    trainer.train(&train, None)?;
    let predicted = trainer.predict(&test.features)?;
    let confusion = ConfusionMatrix::from_predictions(&test.labels, &predicted)?;
    let report = ClassificationReport::from_confusion(&confusion);

    let model_path = config.output_dir.join(&config.knn.model_file);
    trainer.save(&model_path)?;

    let result = HoldoutReport {
        seed: config.seed,
        k: config.knn.k,
        load,
        train_size: train.len(),
        test_size: test.len(),
        confusion,
        report,
        model_path,
        scaler_path,
    };
    save_report(&result, &config.output_dir.join(&config.knn.report_file))?;
    Ok(result)
}

/// Iterative strategy: balance, k-fold cross-validation, persistence.
///
/// The model artifact is written only after every fold has finished.
pub fn run_iterative(config: &PipelineConfig) -> Result<CrossValidationReport> {
    let (samples, load, scaler_path) = prepare(config)?;
    let balanced = balance(&samples, config.cnn.smote_neighbors, config.seed)?;

    let mut trainer = Trainer::iterative(&config.cnn, config.seed)?;
    let folds = cross_validate(
        &mut trainer,
        &balanced,
        config.cnn.folds,
        config.cnn.reset_weights_per_fold,
        config.seed,
    )?;
    let confusions: Vec<ConfusionMatrix> = folds.iter().map(|f| f.confusion).collect();
    let mean = mean_confusion(&confusions)?;

    let model_path = config.output_dir.join(&config.cnn.model_file);
    trainer.save(&model_path)?;

    let result = CrossValidationReport {
        seed: config.seed,
        load,
        balanced_counts: balanced.class_counts(),
        reset_weights_per_fold: config.cnn.reset_weights_per_fold,
        folds,
        mean_confusion: mean,
        model_path,
        scaler_path,
    };
    save_report(&result, &config.output_dir.join(&config.cnn.report_file))?;
    Ok(result)
}

/// Train and evaluate once per seeded fold.
///
/// Unless `reset_weights_per_fold` is set, each fold starts from the weights
/// the previous fold ended with.
pub fn cross_validate(
    trainer: &mut Trainer,
    samples: &Samples,
    folds: usize,
    reset_weights_per_fold: bool,
    seed: u64,
) -> Result<Vec<FoldResult>> {
    cross_validate_observed(
        trainer,
        samples,
        folds,
        reset_weights_per_fold,
        seed,
        |_, _, _| Ok(()),
    )
}

/// Point in a fold at which [`cross_validate_observed`] hands out the trainer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoldPhase {
    /// After any weight reset, before training on the fold.
    Start,
    /// After training, before scoring the validation part.
    End,
}

/// [`cross_validate`] with a callback at the start and end of every fold.
///
/// `observe` receives the phase, the 0-based fold index and the trainer.
pub fn cross_validate_observed<F>(
    trainer: &mut Trainer,
    samples: &Samples,
    folds: usize,
    reset_weights_per_fold: bool,
    seed: u64,
    mut observe: F,
) -> Result<Vec<FoldResult>>
where
    F: FnMut(FoldPhase, usize, &Trainer) -> Result<()>,
{
    let splits = k_fold(samples.len(), folds, seed)?;
    let mut results = Vec::with_capacity(splits.len());

    for (i, split) in splits.iter().enumerate() {
        if reset_weights_per_fold && i > 0 {
            trainer.reset()?;
        }
        observe(FoldPhase::Start, i, &*trainer)?;

        let train = samples.select(&split.train);
        let validation = samples.select(&split.validation);
        println!(
            "Fold {}/{}: train={} val={}",
            i + 1,
            splits.len(),
            train.len(),
            validation.len()
        );

        let history = trainer.train(&train, Some(&validation))?;
        observe(FoldPhase::End, i, &*trainer)?;

        let predicted = trainer.predict(&validation.features)?;
        let confusion = ConfusionMatrix::from_predictions(&validation.labels, &predicted)?;
        let report = ClassificationReport::from_confusion(&confusion);
        tracing::info!(
            fold = i + 1,
            accuracy = report.accuracy,
            "Fold evaluated"
        );

        results.push(FoldResult {
            fold: i + 1,
            train_size: train.len(),
            validation_size: validation.len(),
            history,
            confusion,
            report,
        });
    }
    Ok(results)
}

/// Reload scaler and model artifacts and score labeled session files.
pub fn evaluate_artifacts(
    kind: ClassifierKind,
    scaler_path: &Path,
    model_path: &Path,
    inputs: &[PathBuf],
) -> Result<EvaluationReport> {
    let classifier = StateClassifier::load(kind, scaler_path, model_path)?;
    let (dataset, load) = load_sessions(inputs)?;
    let samples = dataset.into_samples();

    let predicted = classifier.predict(&samples.features)?;
    let confusion = ConfusionMatrix::from_predictions(&samples.labels, &predicted)?;
    Ok(EvaluationReport {
        kind,
        load,
        confusion,
        report: ClassificationReport::from_confusion(&confusion),
    })
}

/// Write any report as pretty JSON.
pub fn save_report<T: Serialize>(report: &T, path: &Path) -> Result<()> {
    ensure_parent_dir(path)?;
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json).map_err(|e| MindwaveError::io(path, e))?;
    tracing::info!(path = %path.display(), "Report saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mindwave_core::{CnnConfig, FEATURE_COUNT};

    fn blobs(n: usize) -> Samples {
        let mut s = Samples::default();
        for i in 0..n {
            let label = u8::from(i % 3 == 0);
            let centre = if label == 1 { 2.0 } else { -2.0 };
            let mut row = [0.0; FEATURE_COUNT];
            for (c, v) in row.iter_mut().enumerate() {
                *v = centre + ((i * 13 + c * 7) % 11) as f64 * 0.05;
            }
            s.push(row, label);
        }
        s
    }

    #[test]
    fn test_cross_validate_distance_strategy() {
        let samples = blobs(30);
        let mut trainer = Trainer::distance(3);
        let folds = cross_validate(&mut trainer, &samples, 5, true, 42).unwrap();
        assert_eq!(folds.len(), 5);
        let total: usize = folds.iter().map(|f| f.validation_size).sum();
        assert_eq!(total, 30);
        for f in &folds {
            assert_eq!(f.confusion.total(), f.validation_size);
            assert!(f.history.is_empty());
            assert!((f.report.accuracy - 1.0).abs() < 1e-12);
        }
    }

    /// Fear probabilities on `rows` at every fold boundary, keyed by
    /// `(phase, fold)`.
    fn boundary_probabilities(
        reset_weights_per_fold: bool,
    ) -> (Vec<f64>, Vec<((FoldPhase, usize), Vec<f64>)>) {
        let samples = blobs(18);
        let rows = samples.features[..4].to_vec();
        let config = CnnConfig {
            epochs: 1,
            batch_size: 8,
            learning_rate: 1e-3,
            ..CnnConfig::default()
        };
        let mut trainer = Trainer::iterative(&config, 3).unwrap();
        let initial = trainer.predict_proba(&rows).unwrap();

        let mut seen = Vec::new();
        cross_validate_observed(
            &mut trainer,
            &samples,
            3,
            reset_weights_per_fold,
            3,
            |phase, fold, t| {
                seen.push(((phase, fold), t.predict_proba(&rows)?));
                Ok(())
            },
        )
        .unwrap();
        (initial, seen)
    }

    fn at(seen: &[((FoldPhase, usize), Vec<f64>)], phase: FoldPhase, fold: usize) -> &[f64] {
        &seen
            .iter()
            .find(|(key, _)| *key == (phase, fold))
            .unwrap()
            .1
    }

    #[test]
    fn test_shared_model_continues_across_folds() {
        let (initial, seen) = boundary_probabilities(false);
        assert_eq!(seen.len(), 6);
        assert_eq!(at(&seen, FoldPhase::Start, 0), initial.as_slice());
        for fold in 1..3 {
            assert_eq!(
                at(&seen, FoldPhase::Start, fold),
                at(&seen, FoldPhase::End, fold - 1)
            );
        }
    }

    #[test]
    fn test_reset_per_fold_starts_from_fresh_weights() {
        let (initial, seen) = boundary_probabilities(true);
        assert_eq!(seen.len(), 6);
        // The first fold is never reset.
        assert_eq!(at(&seen, FoldPhase::Start, 0), initial.as_slice());
        for fold in 1..3 {
            assert_ne!(
                at(&seen, FoldPhase::Start, fold),
                at(&seen, FoldPhase::End, fold - 1)
            );
        }
    }

    #[test]
    fn test_val_accuracy_curves() {
        let fold = |acc: Vec<f64>| FoldResult {
            fold: 1,
            train_size: 0,
            validation_size: 0,
            history: acc
                .into_iter()
                .enumerate()
                .map(|(i, a)| EpochMetrics {
                    epoch: i + 1,
                    train_loss: 0.0,
                    train_accuracy: 0.0,
                    val_loss: Some(0.0),
                    val_accuracy: Some(a),
                })
                .collect(),
            confusion: ConfusionMatrix::new(),
            report: ClassificationReport::from_confusion(&ConfusionMatrix::new()),
        };
        let report = CrossValidationReport {
            seed: 0,
            load: LoadReport::default(),
            balanced_counts: [0, 0],
            reset_weights_per_fold: false,
            folds: vec![fold(vec![0.5, 0.6]), fold(vec![0.7])],
            mean_confusion: mean_confusion(&[ConfusionMatrix::new()]).unwrap(),
            model_path: PathBuf::new(),
            scaler_path: PathBuf::new(),
        };
        assert_eq!(report.val_accuracy_curves(), vec![vec![0.5, 0.6], vec![0.7]]);
    }
}
