//! YAML configuration loading for the training pipeline.
//!
//! Loads [`PipelineConfig`] from a YAML file on disk, falling back to defaults
//! when no file is specified.

use mindwave_core::{MindwaveError, PipelineConfig, Result};
use std::path::Path;

/// Load a [`PipelineConfig`] from a YAML file at `path`.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the YAML is invalid.
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| MindwaveError::io(path, e))?;
    let config: PipelineConfig = serde_yaml::from_str(&contents)
        .map_err(|e| MindwaveError::Config(format!("Failed to parse config YAML: {e}")))?;
    Ok(config)
}

/// Load from `path` when given, otherwise use defaults.
pub fn load_or_default(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(p) => load_config(p),
        None => Ok(PipelineConfig::default()),
    }
}
