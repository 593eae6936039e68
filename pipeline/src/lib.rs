//! Mindwave training pipeline
//!
//! Offline training and evaluation of chill/fear classifiers on NeuroSky
//! Mindwave session recordings.
//!
//! # Modules
//!
//! - [`config`] — YAML loading of [`mindwave_core::PipelineConfig`]
//! - [`training`] — Loader, splitter, balancer, trainers, metrics and runs

pub mod config;
pub mod training;

/// Re-export commonly used types.
pub mod prelude {
    pub use crate::config::{load_config, load_or_default};
    pub use crate::training::data::{load_sessions, LoadReport};
    pub use crate::training::metrics::{
        mean_confusion, ClassificationReport, ConfusionMatrix, MeanConfusionMatrix,
    };
    pub use crate::training::pipeline::{
        cross_validate, evaluate_artifacts, run_distance, run_iterative, CrossValidationReport,
        EvaluationReport, FoldPhase, HoldoutReport,
    };
    pub use crate::training::trainer::Trainer;
}
