//! Core types, configuration and errors for the Mindwave state classifier
//!
//! This crate holds the pieces shared by the inference-side classifiers and
//! the offline training pipeline: the twelve-column session schema, the
//! binary `chill`/`fear` label, labeled feature matrices, persisted scaler
//! parameters, per-epoch training metrics and the pipeline configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Session schema
// ---------------------------------------------------------------------------

/// Number of numeric features in a session record.
pub const FEATURE_COUNT: usize = 12;

/// Feature column names, in the order used by every matrix and scaler.
pub const FEATURE_COLUMNS: [&str; FEATURE_COUNT] = [
    "Delta",
    "Theta",
    "LowAlpha",
    "HighAlpha",
    "LowBeta",
    "HighBeta",
    "LowGamma",
    "HighGamma",
    "Attention",
    "Meditation",
    "EEGValue",
    "BlinkStrength",
];

/// Name of the categorical label column.
pub const LABEL_COLUMN: &str = "State";

/// One row of the feature matrix.
pub type FeatureRow = [f64; FEATURE_COUNT];

/// Probability above which a prediction is mapped to [`State::Fear`].
pub const DECISION_THRESHOLD: f64 = 0.5;

/// Emotional state recorded for a session sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    /// Relaxed baseline. Binary label `0`.
    Chill,
    /// Fear response. Binary label `1`.
    Fear,
}

impl State {
    /// All states ordered by their binary label.
    pub const ALL: [State; 2] = [State::Chill, State::Fear];

    /// Binary target used for training.
    #[must_use]
    pub fn label(self) -> u8 {
        match self {
            State::Chill => 0,
            State::Fear => 1,
        }
    }

    /// Inverse of [`State::label`]. Any non-zero value maps to `Fear`.
    #[must_use]
    pub fn from_label(label: u8) -> Self {
        if label == 0 {
            State::Chill
        } else {
            State::Fear
        }
    }

    /// Name as it appears in the CSV `State` column.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            State::Chill => "chill",
            State::Fear => "fear",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for State {
    type Err = MindwaveError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "chill" => Ok(State::Chill),
            "fear" => Ok(State::Fear),
            other => Err(MindwaveError::UnknownLabel(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Records and matrices
// ---------------------------------------------------------------------------

/// A single sampled instant from a recording session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub features: FeatureRow,
    pub state: State,
}

/// Records from one or more session files, in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub records: Vec<SessionRecord>,
}

impl Dataset {
    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Append all records of `other`, keeping their order.
    pub fn extend(&mut self, other: Dataset) {
        self.records.extend(other.records);
    }

    /// Project onto the feature matrix and binary label vector.
    pub fn into_samples(self) -> Samples {
        let mut samples = Samples::with_capacity(self.records.len());
        for record in self.records {
            samples.push(record.features, record.state.label());
        }
        samples
    }
}

/// Feature matrix (N x 12) with its parallel binary label vector (N).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Samples {
    pub features: Vec<FeatureRow>,
    pub labels: Vec<u8>,
}

impl Samples {
    /// Build from parallel vectors.
    ///
    /// # Errors
    ///
    /// Returns [`MindwaveError::LengthMismatch`] when the lengths differ.
    pub fn new(features: Vec<FeatureRow>, labels: Vec<u8>) -> Result<Self> {
        if features.len() != labels.len() {
            return Err(MindwaveError::LengthMismatch {
                what: "feature rows vs labels",
                left: features.len(),
                right: labels.len(),
            });
        }
        Ok(Self { features, labels })
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            features: Vec::with_capacity(capacity),
            labels: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, row: FeatureRow, label: u8) {
        self.features.push(row);
        self.labels.push(label);
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Counts per class, indexed by binary label: `[chill, fear]`.
    pub fn class_counts(&self) -> [usize; 2] {
        let fear = self.labels.iter().filter(|&&l| l != 0).count();
        [self.labels.len() - fear, fear]
    }

    /// Gather the given rows, in the given order.
    pub fn select(&self, indices: &[usize]) -> Samples {
        let mut out = Samples::with_capacity(indices.len());
        for &i in indices {
            out.push(self.features[i], self.labels[i]);
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Scaler parameters
// ---------------------------------------------------------------------------

/// Fitted per-feature standardization parameters.
///
/// Serialized as `{"means": [...], "stds": [...]}`, aligned with
/// [`FEATURE_COLUMNS`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalerParams {
    pub means: Vec<f64>,
    pub stds: Vec<f64>,
}

impl ScalerParams {
    /// Check shape and that every standard deviation is usable as a divisor.
    ///
    /// # Errors
    ///
    /// [`MindwaveError::Config`] on a length mismatch,
    /// [`MindwaveError::DegenerateFeature`] on a zero or non-finite std.
    pub fn validate(&self) -> Result<()> {
        if self.means.len() != FEATURE_COUNT || self.stds.len() != FEATURE_COUNT {
            return Err(MindwaveError::Config(format!(
                "scaler parameters must have {FEATURE_COUNT} means and stds, got {} and {}",
                self.means.len(),
                self.stds.len()
            )));
        }
        for (column, &std) in FEATURE_COLUMNS.iter().zip(self.stds.iter()) {
            if std == 0.0 || !std.is_finite() {
                return Err(MindwaveError::DegenerateFeature {
                    column: (*column).to_string(),
                });
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Training metrics
// ---------------------------------------------------------------------------

/// Metrics logged after each training epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// 1-based epoch number within the current fold.
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    /// Present only when a validation set was supplied.
    #[serde(default)]
    pub val_loss: Option<f64>,
    #[serde(default)]
    pub val_accuracy: Option<f64>,
}

impl fmt::Display for EpochMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "epoch {:3} | loss={:.4} acc={:.4}",
            self.epoch, self.train_loss, self.train_accuracy
        )?;
        if let (Some(loss), Some(acc)) = (self.val_loss, self.val_accuracy) {
            write!(f, " | val_loss={loss:.4} val_acc={acc:.4}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Which classifier family an artifact belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierKind {
    /// k-nearest-neighbour vote over stored training rows.
    Knn,
    /// 1-D convolutional network.
    Cnn,
}

impl fmt::Display for ClassifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassifierKind::Knn => f.write_str("knn"),
            ClassifierKind::Cnn => f.write_str("cnn"),
        }
    }
}

impl FromStr for ClassifierKind {
    type Err = MindwaveError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "knn" => Ok(ClassifierKind::Knn),
            "cnn" => Ok(ClassifierKind::Cnn),
            other => Err(MindwaveError::Config(format!(
                "unknown classifier kind '{other}' (expected knn or cnn)"
            ))),
        }
    }
}

/// Top-level pipeline configuration, loadable from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Seed threaded into the splitter, the balancer and the batch shuffler.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Session CSV files, concatenated in this order.
    #[serde(default = "default_inputs")]
    pub inputs: Vec<PathBuf>,
    /// Directory receiving the scaler, model and report artifacts.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// File name of the scaler parameters inside `output_dir`.
    #[serde(default = "default_scaler_file")]
    pub scaler_file: String,
    #[serde(default)]
    pub knn: KnnConfig,
    #[serde(default)]
    pub cnn: CnnConfig,
}

fn default_seed() -> u64 {
    42
}

fn default_inputs() -> Vec<PathBuf> {
    vec![
        PathBuf::from("datasets/mindwave_session1_flagged.csv"),
        PathBuf::from("datasets/mindwave_session_chill_flagged.csv"),
        PathBuf::from("datasets/mindwave_session_flagged2.csv"),
    ]
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("artifacts")
}

fn default_scaler_file() -> String {
    "scaler_params.json".to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            inputs: default_inputs(),
            output_dir: default_output_dir(),
            scaler_file: default_scaler_file(),
            knn: KnnConfig::default(),
            cnn: CnnConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Full path of the scaler parameters file.
    pub fn scaler_path(&self) -> PathBuf {
        self.output_dir.join(&self.scaler_file)
    }

    /// Reject values the pipeline cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`MindwaveError::Config`] describing the first bad value.
    pub fn validate(&self) -> Result<()> {
        if self.inputs.is_empty() {
            return Err(MindwaveError::Config("no input files configured".into()));
        }
        if self.knn.k == 0 {
            return Err(MindwaveError::Config("knn.k must be at least 1".into()));
        }
        if !(self.knn.test_ratio > 0.0 && self.knn.test_ratio < 1.0) {
            return Err(MindwaveError::Config(format!(
                "knn.test_ratio must be in (0, 1), got {}",
                self.knn.test_ratio
            )));
        }
        if self.cnn.folds < 2 {
            return Err(MindwaveError::Config("cnn.folds must be at least 2".into()));
        }
        if self.cnn.epochs == 0 || self.cnn.batch_size == 0 {
            return Err(MindwaveError::Config(
                "cnn.epochs and cnn.batch_size must be positive".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.cnn.dropout) {
            return Err(MindwaveError::Config(format!(
                "cnn.dropout must be in [0, 1), got {}",
                self.cnn.dropout
            )));
        }
        if self.cnn.learning_rate <= 0.0 {
            return Err(MindwaveError::Config("cnn.learning_rate must be positive".into()));
        }
        if self.cnn.smote_neighbors == 0 {
            return Err(MindwaveError::Config(
                "cnn.smote_neighbors must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Distance-strategy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnnConfig {
    #[serde(default = "default_k")]
    pub k: usize,
    /// Fraction of rows held out for evaluation.
    #[serde(default = "default_test_ratio")]
    pub test_ratio: f64,
    #[serde(default = "default_knn_model_file")]
    pub model_file: String,
    #[serde(default = "default_knn_report_file")]
    pub report_file: String,
}

fn default_k() -> usize {
    3
}

fn default_test_ratio() -> f64 {
    0.2
}

fn default_knn_model_file() -> String {
    "knn_model.safetensors".to_string()
}

fn default_knn_report_file() -> String {
    "knn_report.json".to_string()
}

impl Default for KnnConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            test_ratio: default_test_ratio(),
            model_file: default_knn_model_file(),
            report_file: default_knn_report_file(),
        }
    }
}

/// Iterative-strategy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CnnConfig {
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_dropout")]
    pub dropout: f32,
    #[serde(default = "default_folds")]
    pub folds: usize,
    /// Reinitialize weights and optimizer state before every fold instead of
    /// continuing from the previous fold's weights.
    #[serde(default)]
    pub reset_weights_per_fold: bool,
    /// Neighbours considered when synthesizing minority samples.
    #[serde(default = "default_smote_neighbors")]
    pub smote_neighbors: usize,
    #[serde(default = "default_cnn_model_file")]
    pub model_file: String,
    #[serde(default = "default_cnn_report_file")]
    pub report_file: String,
}

fn default_epochs() -> usize {
    50
}

fn default_batch_size() -> usize {
    64
}

fn default_learning_rate() -> f64 {
    1e-4
}

fn default_dropout() -> f32 {
    0.4
}

fn default_folds() -> usize {
    5
}

fn default_smote_neighbors() -> usize {
    5
}

fn default_cnn_model_file() -> String {
    "eeg_model_crossval.safetensors".to_string()
}

fn default_cnn_report_file() -> String {
    "cnn_report.json".to_string()
}

impl Default for CnnConfig {
    fn default() -> Self {
        Self {
            epochs: default_epochs(),
            batch_size: default_batch_size(),
            learning_rate: default_learning_rate(),
            dropout: default_dropout(),
            folds: default_folds(),
            reset_weights_per_fold: false,
            smote_neighbors: default_smote_neighbors(),
            model_file: default_cnn_model_file(),
            report_file: default_cnn_report_file(),
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors raised anywhere in the Mindwave pipeline.
#[derive(thiserror::Error, Debug)]
pub enum MindwaveError {
    /// An input file lacks a required column.
    #[error("Schema mismatch in {path}: missing column '{column}'")]
    SchemaMismatch { path: String, column: String },

    /// A `State` value outside {chill, fear}. Loaders drop such rows.
    #[error("Unknown label: '{0}'")]
    UnknownLabel(String),

    /// A present feature value is not a number.
    #[error("Invalid value '{value}' for column '{column}' in {path} at line {line}")]
    InvalidValue {
        path: String,
        line: u64,
        column: String,
        value: String,
    },

    /// A feature column has zero variance and cannot be standardized.
    #[error("Degenerate feature: column '{column}' has zero variance")]
    DegenerateFeature { column: String },

    /// Two sequences that must be parallel have different lengths.
    #[error("Length mismatch ({what}): {left} != {right}")]
    LengthMismatch {
        what: &'static str,
        left: usize,
        right: usize,
    },

    /// Not enough rows (or classes) to run a stage.
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// Artifact or input read/write failure.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Serialization / deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// CSV reader failure not covered by the variants above.
    #[error("CSV error in {path}: {message}")]
    Csv { path: String, message: String },

    /// Tensor or model-artifact failure.
    #[error("Model error: {0}")]
    Model(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl MindwaveError {
    /// Wrap an I/O error with the path it happened on.
    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        MindwaveError::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

/// Convenience alias for `std::result::Result<T, MindwaveError>`.
pub type Result<T> = std::result::Result<T, MindwaveError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
