//! Model trainers: a closed set of strategies behind one interface.
//!
//! [`Trainer::Distance`] stores rows for a k-nearest-neighbour vote.
//! [`Trainer::Iterative`] runs mini-batch Adam on the [`ConvNet`].

use crate::training::data::BatchIterator;
use candle_core::{Device, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarMap};
use mindwave_classifier::conv_net::rows_to_tensor;
use mindwave_classifier::{Classifier, ConvNet, KnnModel};
use mindwave_core::{
    ClassifierKind, CnnConfig, EpochMetrics, FeatureRow, MindwaveError, Result, Samples,
};
use std::path::Path;

/// A trainable model of one of the supported strategies.
pub enum Trainer {
    Distance(KnnModel),
    Iterative(Box<IterativeTrainer>),
}

impl Trainer {
    /// k-nearest-neighbour strategy.
    pub fn distance(k: usize) -> Self {
        Trainer::Distance(KnnModel::new(k))
    }

    /// Convolutional-network strategy.
    pub fn iterative(config: &CnnConfig, seed: u64) -> Result<Self> {
        Ok(Trainer::Iterative(Box::new(IterativeTrainer::new(
            config.clone(),
            seed,
        )?)))
    }

    pub fn kind(&self) -> ClassifierKind {
        match self {
            Trainer::Distance(_) => ClassifierKind::Knn,
            Trainer::Iterative(_) => ClassifierKind::Cnn,
        }
    }

    /// Fit on `train`. The iterative strategy continues from its current
    /// weights and reports one entry per epoch; the distance strategy
    /// reports nothing.
    pub fn train(
        &mut self,
        train: &Samples,
        validation: Option<&Samples>,
    ) -> Result<Vec<EpochMetrics>> {
        match self {
            Trainer::Distance(knn) => {
                knn.fit(train)?;
                tracing::info!(rows = train.len(), k = knn.k(), "KNN fitted");
                Ok(Vec::new())
            }
            Trainer::Iterative(it) => it.train(train, validation),
        }
    }

    /// Return to an untrained state (fresh weights and optimizer state).
    pub fn reset(&mut self) -> Result<()> {
        match self {
            Trainer::Distance(knn) => {
                knn.clear();
                Ok(())
            }
            Trainer::Iterative(it) => it.reset(),
        }
    }

    /// The trained model, for inference.
    pub fn classifier(&self) -> &dyn Classifier {
        match self {
            Trainer::Distance(knn) => knn,
            Trainer::Iterative(it) => &it.net,
        }
    }

    pub fn predict_proba(&self, rows: &[FeatureRow]) -> Result<Vec<f64>> {
        self.classifier().predict_proba(rows)
    }

    pub fn predict(&self, rows: &[FeatureRow]) -> Result<Vec<u8>> {
        self.classifier().predict(rows)
    }

    /// Persist the model artifact.
    pub fn save(&self, path: &Path) -> Result<()> {
        match self {
            Trainer::Distance(knn) => knn.save(path),
            Trainer::Iterative(it) => it.save(path),
        }
    }
}

/// Mini-batch Adam training of the [`ConvNet`] with binary cross-entropy.
pub struct IterativeTrainer {
    config: CnnConfig,
    seed: u64,
    device: Device,
    varmap: VarMap,
    net: ConvNet,
    optimizer: AdamW,
    /// Completed `train` calls; varies the shuffle order between folds.
    rounds: u64,
}

impl IterativeTrainer {
    pub fn new(config: CnnConfig, seed: u64) -> Result<Self> {
        let device = Device::Cpu;
        let (varmap, net, optimizer) = build_model(&config, &device)?;
        Ok(Self {
            config,
            seed,
            device,
            varmap,
            net,
            optimizer,
            rounds: 0,
        })
    }

    pub fn reset(&mut self) -> Result<()> {
        let (varmap, net, optimizer) = build_model(&self.config, &self.device)?;
        self.varmap = varmap;
        self.net = net;
        self.optimizer = optimizer;
        tracing::debug!("Network weights and optimizer state reinitialized");
        Ok(())
    }

    pub fn net(&self) -> &ConvNet {
        &self.net
    }

    pub fn train(
        &mut self,
        train: &Samples,
        validation: Option<&Samples>,
    ) -> Result<Vec<EpochMetrics>> {
        if train.is_empty() {
            return Err(MindwaveError::InsufficientData(
                "no training rows".to_string(),
            ));
        }
        let inputs = rows_to_tensor(&train.features, &self.device)?;
        let labels = labels_to_tensor(&train.labels, &self.device)?;
        let val = match validation {
            Some(v) if !v.is_empty() => Some((
                rows_to_tensor(&v.features, &self.device)?,
                labels_to_tensor(&v.labels, &self.device)?,
            )),
            _ => None,
        };

        let mut batches = BatchIterator::new(inputs, labels, self.config.batch_size);
        let shuffle_seed = self.seed.wrapping_add(self.rounds << 32);
        let n = train.len() as f64;
        let mut history = Vec::with_capacity(self.config.epochs);

        for epoch in 0..self.config.epochs {
            batches.reshuffle(shuffle_seed, epoch);
            let mut loss_sum = 0.0;
            let mut correct = 0usize;

            while let Some((xs, ys)) = batches.next_batch()? {
                let logits = self
                    .net
                    .forward_logits(&xs, true)
                    .map_err(|e| MindwaveError::Model(format!("Forward pass failed: {e}")))?;
                let loss = bce_with_logits(&logits, &ys)
                    .map_err(|e| MindwaveError::Model(format!("Loss computation failed: {e}")))?;
                self.optimizer
                    .backward_step(&loss)
                    .map_err(|e| MindwaveError::Model(format!("Backward step failed: {e}")))?;

                let batch_len = ys.dim(0).unwrap_or(0);
                let loss_val = loss
                    .to_scalar::<f32>()
                    .map_err(|e| MindwaveError::Model(format!("Loss scalar failed: {e}")))?;
                loss_sum += f64::from(loss_val) * batch_len as f64;
                correct += count_correct(&logits, &ys)?;
            }

            let (val_loss, val_accuracy) = match &val {
                Some((vx, vy)) => {
                    let (l, a) = self.evaluate(vx, vy)?;
                    (Some(l), Some(a))
                }
                None => (None, None),
            };

            let metrics = EpochMetrics {
                epoch: epoch + 1,
                train_loss: loss_sum / n,
                train_accuracy: correct as f64 / n,
                val_loss,
                val_accuracy,
            };
            println!("  {metrics}");
            history.push(metrics);
        }

        self.rounds += 1;
        Ok(history)
    }

    /// Loss and accuracy on a held-out set, dropout disabled.
    fn evaluate(&self, inputs: &Tensor, labels: &Tensor) -> Result<(f64, f64)> {
        let logits = self
            .net
            .forward_logits(inputs, false)
            .map_err(|e| MindwaveError::Model(format!("Val forward failed: {e}")))?;
        let loss = bce_with_logits(&logits, labels)
            .and_then(|l| l.to_scalar::<f32>())
            .map_err(|e| MindwaveError::Model(format!("Val loss failed: {e}")))?;
        let n = labels.dim(0).unwrap_or(0).max(1);
        let correct = count_correct(&logits, labels)?;
        Ok((f64::from(loss), correct as f64 / n as f64))
    }

    /// Write the network variables as safetensors.
    pub fn save(&self, path: &Path) -> Result<()> {
        mindwave_classifier::persist::ensure_parent_dir(path)?;
        self.varmap
            .save(path)
            .map_err(|e| MindwaveError::Model(format!("Failed to save network: {e}")))?;
        tracing::info!(path = %path.display(), "Network weights saved");
        Ok(())
    }
}

fn build_model(config: &CnnConfig, device: &Device) -> Result<(VarMap, ConvNet, AdamW)> {
    let varmap = VarMap::new();
    let net = ConvNet::new_trainable(&varmap, config.dropout, device)?;
    // Adam is AdamW without weight decay.
    let optimizer = AdamW::new(
        varmap.all_vars(),
        ParamsAdamW {
            lr: config.learning_rate,
            weight_decay: 0.0,
            ..Default::default()
        },
    )
    .map_err(|e| MindwaveError::Model(format!("Failed to create optimizer: {e}")))?;
    Ok((varmap, net, optimizer))
}

fn labels_to_tensor(labels: &[u8], device: &Device) -> Result<Tensor> {
    let values: Vec<f32> = labels.iter().map(|&l| f32::from(l)).collect();
    Tensor::from_vec(values, labels.len(), device)
        .map_err(|e| MindwaveError::Model(format!("Failed to build label tensor: {e}")))
}

/// Mean binary cross-entropy on logits:
/// `max(x, 0) - x * y + ln(1 + exp(-|x|))`.
fn bce_with_logits(logits: &Tensor, targets: &Tensor) -> candle_core::Result<Tensor> {
    let softplus = logits.abs()?.neg()?.exp()?.affine(1.0, 1.0)?.log()?;
    let loss = ((logits.relu()? - (logits * targets)?)? + softplus)?;
    loss.mean_all()
}

fn count_correct(logits: &Tensor, labels: &Tensor) -> Result<usize> {
    let logits: Vec<f32> = logits
        .to_vec1()
        .map_err(|e| MindwaveError::Model(format!("logits to vec: {e}")))?;
    let labels: Vec<f32> = labels
        .to_vec1()
        .map_err(|e| MindwaveError::Model(format!("labels to vec: {e}")))?;
    Ok(logits
        .iter()
        .zip(labels.iter())
        .filter(|&(&x, &y)| (x > 0.0) == (y > 0.5))
        .count())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mindwave_core::FEATURE_COUNT;

    fn separable(n: usize) -> Samples {
        let mut s = Samples::default();
        for i in 0..n {
            let label = (i % 2) as u8;
            let centre = if label == 0 { -1.0 } else { 1.0 };
            let jitter = (i as f64 * 0.37).sin() * 0.2;
            s.push([centre + jitter; FEATURE_COUNT], label);
        }
        s
    }

    fn small_config(epochs: usize) -> CnnConfig {
        CnnConfig {
            epochs,
            batch_size: 8,
            learning_rate: 1e-3,
            ..CnnConfig::default()
        }
    }

    #[test]
    fn test_bce_matches_reference() {
        let device = Device::Cpu;
        let logits = Tensor::new(&[0.0f32, 2.0, -3.0], &device).unwrap();
        let targets = Tensor::new(&[1.0f32, 0.0, 0.0], &device).unwrap();
        let loss: f32 = bce_with_logits(&logits, &targets)
            .unwrap()
            .to_scalar()
            .unwrap();
        let sigmoid = |x: f64| 1.0 / (1.0 + (-x).exp());
        let expected = (-(sigmoid(0.0)).ln()
            - (1.0 - sigmoid(2.0)).ln()
            - (1.0 - sigmoid(-3.0)).ln())
            / 3.0;
        assert!((f64::from(loss) - expected).abs() < 1e-5);
    }

    #[test]
    fn test_bce_is_finite_for_saturated_logits() {
        let device = Device::Cpu;
        let logits = Tensor::new(&[120.0f32, -120.0], &device).unwrap();
        let targets = Tensor::new(&[1.0f32, 0.0], &device).unwrap();
        let loss: f32 = bce_with_logits(&logits, &targets)
            .unwrap()
            .to_scalar()
            .unwrap();
        assert!(loss.is_finite());
        assert!(loss < 1e-6);
    }

    #[test]
    fn test_distance_trainer_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("knn.safetensors");
        let data = separable(20);
        let mut trainer = Trainer::distance(3);
        assert_eq!(trainer.kind(), ClassifierKind::Knn);
        let history = trainer.train(&data, None).unwrap();
        assert!(history.is_empty());
        let preds = trainer.predict(&data.features).unwrap();
        assert_eq!(preds, data.labels);
        trainer.save(&path).unwrap();

        let reloaded = mindwave_classifier::load_classifier(ClassifierKind::Knn, &path).unwrap();
        assert_eq!(reloaded.predict(&data.features).unwrap(), data.labels);

        trainer.reset().unwrap();
        assert!(trainer.predict(&data.features).is_err());
    }

    #[test]
    fn test_iterative_trainer_history() {
        let train = separable(24);
        let val = separable(8);
        let mut trainer = Trainer::iterative(&small_config(3), 42).unwrap();
        let history = trainer.train(&train, Some(&val)).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[2].epoch, 3);
        for m in &history {
            assert!(m.train_loss.is_finite());
            assert!((0.0..=1.0).contains(&m.train_accuracy));
            assert!(m.val_accuracy.is_some());
        }
        let probs = trainer.predict_proba(&val.features).unwrap();
        assert_eq!(probs.len(), 8);
    }

    #[test]
    fn test_iterative_trainer_learns_separable_data() {
        let train = separable(64);
        let mut trainer = Trainer::iterative(&small_config(30), 7).unwrap();
        let history = trainer.train(&train, None).unwrap();
        let first = history.first().unwrap().train_loss;
        let last = history.last().unwrap().train_loss;
        assert!(last < first, "loss did not decrease: {first} -> {last}");
        let preds = trainer.predict(&train.features).unwrap();
        let correct = preds.iter().zip(train.labels.iter()).filter(|(a, b)| a == b).count();
        assert!(correct >= 56, "only {correct}/64 correct");
    }

    #[test]
    fn test_iterative_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models/cnn.safetensors");
        let data = separable(16);
        let mut trainer = Trainer::iterative(&small_config(1), 1).unwrap();
        trainer.train(&data, None).unwrap();
        trainer.save(&path).unwrap();

        let reloaded = mindwave_classifier::load_classifier(ClassifierKind::Cnn, &path).unwrap();
        let a = trainer.predict_proba(&data.features).unwrap();
        let b = reloaded.predict_proba(&data.features).unwrap();
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 1e-5);
        }
    }

    #[test]
    fn test_reset_changes_weights() {
        let data = separable(8);
        let mut trainer = Trainer::iterative(&small_config(1), 1).unwrap();
        let before = trainer.predict_proba(&data.features).unwrap();
        trainer.reset().unwrap();
        let after = trainer.predict_proba(&data.features).unwrap();
        assert_ne!(before, after);
    }
}
