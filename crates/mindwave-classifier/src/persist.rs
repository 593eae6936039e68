//! Artifact persistence: scaler parameters as JSON, raw tensors as safetensors.

use mindwave_core::{MindwaveError, Result, ScalerParams};
use std::collections::HashMap;
use std::path::Path;

/// Create the parent directory of `path` if it does not exist yet.
pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| MindwaveError::io(parent, e))?;
        }
    }
    Ok(())
}

/// Write scaler parameters as `{"means": [...], "stds": [...]}`.
pub fn save_scaler(params: &ScalerParams, path: &Path) -> Result<()> {
    ensure_parent_dir(path)?;
    let json = serde_json::to_string_pretty(params)?;
    std::fs::write(path, json).map_err(|e| MindwaveError::io(path, e))?;
    tracing::info!(path = %path.display(), "Scaler parameters saved");
    Ok(())
}

/// Read and validate scaler parameters written by [`save_scaler`].
pub fn load_scaler(path: &Path) -> Result<ScalerParams> {
    let contents = std::fs::read_to_string(path).map_err(|e| MindwaveError::io(path, e))?;
    let params: ScalerParams = serde_json::from_str(&contents)?;
    params.validate()?;
    Ok(params)
}

/// One named tensor to be written with [`save_tensors`].
pub(crate) struct RawTensor<'a> {
    pub name: &'a str,
    pub dtype: safetensors::Dtype,
    pub shape: Vec<usize>,
    pub bytes: Vec<u8>,
}

/// Serialize raw little-endian tensors plus string metadata to `path`.
pub(crate) fn save_tensors(
    path: &Path,
    tensors: Vec<RawTensor<'_>>,
    metadata: HashMap<String, String>,
) -> Result<()> {
    ensure_parent_dir(path)?;
    let mut views = HashMap::new();
    for t in &tensors {
        let view = safetensors::tensor::TensorView::new(t.dtype, t.shape.clone(), &t.bytes)
            .map_err(|e| MindwaveError::Model(format!("TensorView '{}' failed: {e}", t.name)))?;
        views.insert(t.name.to_string(), view);
    }
    let serialized = safetensors::tensor::serialize(&views, &Some(metadata))
        .map_err(|e| MindwaveError::Model(format!("safetensors serialize failed: {e}")))?;
    std::fs::write(path, serialized).map_err(|e| MindwaveError::io(path, e))
}

/// Decoded contents of a safetensors file: tensors by name plus metadata.
pub(crate) struct LoadedTensors {
    pub tensors: HashMap<String, (safetensors::Dtype, Vec<usize>, Vec<u8>)>,
    pub metadata: HashMap<String, String>,
}

pub(crate) fn load_tensors(path: &Path) -> Result<LoadedTensors> {
    let data = std::fs::read(path).map_err(|e| MindwaveError::io(path, e))?;
    let (_, header) = safetensors::SafeTensors::read_metadata(&data).map_err(|e| {
        MindwaveError::Model(format!("Failed to parse safetensor {}: {e}", path.display()))
    })?;
    let metadata = header.metadata().clone().unwrap_or_default();

    let parsed = safetensors::SafeTensors::deserialize(&data).map_err(|e| {
        MindwaveError::Model(format!("Failed to parse safetensor {}: {e}", path.display()))
    })?;
    let mut tensors = HashMap::new();
    for (name, view) in parsed.tensors() {
        tensors.insert(
            name,
            (view.dtype(), view.shape().to_vec(), view.data().to_vec()),
        );
    }
    Ok(LoadedTensors { tensors, metadata })
}
