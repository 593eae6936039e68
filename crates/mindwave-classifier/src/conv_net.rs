//! 1-D convolutional network scoring a standardized session row as fear.
//!
//! The twelve features are treated as a single-channel sequence of length 12.
//!
//! # Architecture
//!
//! ```text
//! Input [B, 1, 12]
//!   → Conv1d(128, k=3) → ReLU                    [B, 128, 10]
//!   → Conv1d(256, k=3) → ReLU → MaxPool(2)       [B, 256, 4]
//!   → Conv1d(256, k=3) → ReLU → MaxPool(2)       [B, 256, 1]
//!   → Flatten → Linear(128) → ReLU → Dropout
//!   → Linear(64) → ReLU → Dropout
//!   → Linear(1)                                  [B]  (logit)
//! ```
//!
//! [`ConvNet::forward_logits`] returns logits so training can use the
//! numerically stable BCE-with-logits loss; probabilities go through a
//! sigmoid in [`Classifier::predict_proba`].

use candle_core::{DType, Device, Tensor};
use candle_nn::{Conv1d, Conv1dConfig, Dropout, Linear, Module, VarBuilder, VarMap};
use mindwave_core::{ClassifierKind, FeatureRow, MindwaveError, Result, FEATURE_COUNT};
use std::path::Path;

use crate::Classifier;

const KERNEL: usize = 3;
const POOL: usize = 2;
const CONV1_CHANNELS: usize = 128;
const CONV2_CHANNELS: usize = 256;
const CONV3_CHANNELS: usize = 256;
const HIDDEN_1: usize = 128;
const HIDDEN_2: usize = 64;

/// Default dropout rate between the dense layers.
pub const DEFAULT_DROPOUT: f32 = 0.4;

/// Rows scored per forward pass in [`Classifier::predict_proba`].
const PREDICT_CHUNK: usize = 512;

/// Sequence length left after the conv/pool stack.
const fn conv_output_len() -> usize {
    let after_conv2 = FEATURE_COUNT - 2 * (KERNEL - 1);
    let after_pool1 = after_conv2 / POOL;
    let after_conv3 = after_pool1 - (KERNEL - 1);
    after_conv3 / POOL
}

/// Input width of the first dense layer.
pub const FLATTEN_DIM: usize = CONV3_CHANNELS * conv_output_len();

/// Convolutional chill/fear classifier.
pub struct ConvNet {
    conv1: Conv1d,
    conv2: Conv1d,
    conv3: Conv1d,
    fc1: Linear,
    fc2: Linear,
    out: Linear,
    dropout: Dropout,
    device: Device,
}

impl ConvNet {
    /// Build a network whose variables live in `varmap`, ready for an optimizer.
    pub fn new_trainable(varmap: &VarMap, dropout: f32, device: &Device) -> Result<Self> {
        let vb = VarBuilder::from_varmap(varmap, DType::F32, device);
        Self::build(vb, dropout, device)
            .map_err(|e| MindwaveError::Model(format!("Failed to create trainable network: {e}")))
    }

    /// Network with fresh random weights that are not tracked anywhere.
    pub fn new_random(device: &Device) -> Result<Self> {
        let varmap = VarMap::new();
        Self::new_trainable(&varmap, DEFAULT_DROPOUT, device)
    }

    /// Load weights written by `VarMap::save` from a safetensors file.
    pub fn load(path: &Path, device: &Device) -> Result<Self> {
        // SAFETY: memory-mapping safetensors is the standard candle pattern.
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[path.to_path_buf()], DType::F32, device)
                .map_err(|e| {
                    MindwaveError::Model(format!(
                        "Failed to load network weights from {}: {e}",
                        path.display()
                    ))
                })?
        };
        Self::build(vb, DEFAULT_DROPOUT, device)
            .map_err(|e| MindwaveError::Model(format!("Incompatible network weights: {e}")))
    }

    fn build(vb: VarBuilder, dropout: f32, device: &Device) -> candle_core::Result<Self> {
        let cfg = Conv1dConfig::default();
        Ok(Self {
            conv1: candle_nn::conv1d(1, CONV1_CHANNELS, KERNEL, cfg, vb.pp("conv1"))?,
            conv2: candle_nn::conv1d(CONV1_CHANNELS, CONV2_CHANNELS, KERNEL, cfg, vb.pp("conv2"))?,
            conv3: candle_nn::conv1d(CONV2_CHANNELS, CONV3_CHANNELS, KERNEL, cfg, vb.pp("conv3"))?,
            fc1: candle_nn::linear(FLATTEN_DIM, HIDDEN_1, vb.pp("fc1"))?,
            fc2: candle_nn::linear(HIDDEN_1, HIDDEN_2, vb.pp("fc2"))?,
            out: candle_nn::linear(HIDDEN_2, 1, vb.pp("out"))?,
            dropout: Dropout::new(dropout),
            device: device.clone(),
        })
    }

    /// Forward pass from `[B, 12]` features to `[B]` logits.
    ///
    /// Dropout is active only when `train` is true.
    pub fn forward_logits(&self, xs: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let batch = xs.dim(0)?;
        let xs = xs.reshape((batch, 1, FEATURE_COUNT))?;

        let xs = self.conv1.forward(&xs)?.relu()?;
        let xs = self.conv2.forward(&xs)?.relu()?;
        let xs = max_pool1d(&xs)?;
        let xs = self.conv3.forward(&xs)?.relu()?;
        let xs = max_pool1d(&xs)?;
        let xs = xs.flatten_from(1)?;

        let xs = self.fc1.forward(&xs)?.relu()?;
        let xs = self.dropout.forward(&xs, train)?;
        let xs = self.fc2.forward(&xs)?.relu()?;
        let xs = self.dropout.forward(&xs, train)?;
        self.out.forward(&xs)?.squeeze(1)
    }

    pub fn device(&self) -> &Device {
        &self.device
    }
}

impl Classifier for ConvNet {
    fn kind(&self) -> ClassifierKind {
        ClassifierKind::Cnn
    }

    fn predict_proba(&self, rows: &[FeatureRow]) -> Result<Vec<f64>> {
        let mut probs = Vec::with_capacity(rows.len());
        for chunk in rows.chunks(PREDICT_CHUNK) {
            let xs = rows_to_tensor(chunk, &self.device)?;
            let p = self
                .forward_logits(&xs, false)
                .and_then(|logits| candle_nn::ops::sigmoid(&logits))
                .and_then(|p| p.to_vec1::<f32>())
                .map_err(|e| MindwaveError::Model(format!("Network forward failed: {e}")))?;
            probs.extend(p.into_iter().map(f64::from));
        }
        Ok(probs)
    }
}

/// Stack rows into a `[N, 12]` f32 tensor.
pub fn rows_to_tensor(rows: &[FeatureRow], device: &Device) -> Result<Tensor> {
    let flat: Vec<f32> = rows.iter().flat_map(|r| r.iter().map(|&v| v as f32)).collect();
    Tensor::from_vec(flat, (rows.len(), FEATURE_COUNT), device)
        .map_err(|e| MindwaveError::Model(format!("Failed to build feature tensor: {e}")))
}

/// Stride-2 max pooling over the last axis of a `[B, C, L]` tensor.
fn max_pool1d(xs: &Tensor) -> candle_core::Result<Tensor> {
    xs.unsqueeze(2)?
        .max_pool2d_with_stride((1, POOL), (1, POOL))?
        .squeeze(2)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_dim() {
        assert_eq!(conv_output_len(), 1);
        assert_eq!(FLATTEN_DIM, 256);
    }

    #[test]
    fn test_forward_shape() {
        let device = Device::Cpu;
        let net = ConvNet::new_random(&device).unwrap();
        let xs = Tensor::zeros((7, FEATURE_COUNT), DType::F32, &device).unwrap();
        let logits = net.forward_logits(&xs, false).unwrap();
        assert_eq!(logits.dims(), &[7]);
    }

    #[test]
    fn test_predict_proba_in_unit_interval() {
        let device = Device::Cpu;
        let net = ConvNet::new_random(&device).unwrap();
        let rows: Vec<FeatureRow> = (0..5)
            .map(|i| {
                let mut r = [0.0; FEATURE_COUNT];
                for (c, v) in r.iter_mut().enumerate() {
                    *v = (i as f64 - 2.0) * 0.3 + c as f64 * 0.05;
                }
                r
            })
            .collect();
        let probs = net.predict_proba(&rows).unwrap();
        assert_eq!(probs.len(), 5);
        assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn test_inference_is_deterministic() {
        let device = Device::Cpu;
        let net = ConvNet::new_random(&device).unwrap();
        let rows = vec![[0.5; FEATURE_COUNT]; 3];
        assert_eq!(net.predict_proba(&rows).unwrap(), net.predict_proba(&rows).unwrap());
    }

    #[test]
    fn test_save_and_load_weights() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("net.safetensors");
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let net = ConvNet::new_trainable(&varmap, DEFAULT_DROPOUT, &device).unwrap();
        varmap.save(&path).unwrap();

        let loaded = ConvNet::load(&path, &device).unwrap();
        let rows = vec![[0.25; FEATURE_COUNT], [-1.0; FEATURE_COUNT]];
        let a = net.predict_proba(&rows).unwrap();
        let b = loaded.predict_proba(&rows).unwrap();
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 1e-6);
        }
    }

    #[test]
    fn test_load_missing_file() {
        assert!(ConvNet::load(Path::new("/nonexistent/net.safetensors"), &Device::Cpu).is_err());
    }
}
