//! Inference-side components for the Mindwave state classifier
//!
//! Everything a consumer needs to score new session rows after training:
//! the feature [`Normalizer`], the two classifier families ([`KnnModel`] and
//! [`ConvNet`]) behind the [`Classifier`] trait, and artifact loading. This
//! crate does not depend on the loader, balancer or trainer.

pub mod conv_net;
pub mod knn;
pub mod normalizer;
pub mod persist;

pub use conv_net::ConvNet;
pub use knn::KnnModel;
pub use normalizer::Normalizer;
pub use persist::{load_scaler, save_scaler};

use candle_core::Device;
use mindwave_core::{ClassifierKind, FeatureRow, Result, State, DECISION_THRESHOLD};
use std::path::Path;

/// A trained model mapping standardized rows to fear-class probabilities.
pub trait Classifier {
    /// Which family this model belongs to.
    fn kind(&self) -> ClassifierKind;

    /// Probability of the fear class for each row.
    fn predict_proba(&self, rows: &[FeatureRow]) -> Result<Vec<f64>>;

    /// Binary labels: `1` (fear) when the probability exceeds 0.5.
    fn predict(&self, rows: &[FeatureRow]) -> Result<Vec<u8>> {
        Ok(self
            .predict_proba(rows)?
            .into_iter()
            .map(|p| u8::from(p > DECISION_THRESHOLD))
            .collect())
    }
}

/// Reload a persisted model of the given kind.
pub fn load_classifier(kind: ClassifierKind, path: &Path) -> Result<Box<dyn Classifier>> {
    let model: Box<dyn Classifier> = match kind {
        ClassifierKind::Knn => Box::new(KnnModel::load(path)?),
        ClassifierKind::Cnn => Box::new(ConvNet::load(path, &Device::Cpu)?),
    };
    tracing::info!(%kind, path = %path.display(), "Classifier loaded");
    Ok(model)
}

/// Scaler plus model, loaded together for scoring raw (unscaled) rows.
pub struct StateClassifier {
    normalizer: Normalizer,
    model: Box<dyn Classifier>,
}

impl StateClassifier {
    pub fn new(normalizer: Normalizer, model: Box<dyn Classifier>) -> Self {
        Self { normalizer, model }
    }

    /// Load scaler parameters and a model artifact from disk.
    pub fn load(kind: ClassifierKind, scaler_path: &Path, model_path: &Path) -> Result<Self> {
        let normalizer = Normalizer::from_params(load_scaler(scaler_path)?)?;
        let model = load_classifier(kind, model_path)?;
        Ok(Self { normalizer, model })
    }

    pub fn kind(&self) -> ClassifierKind {
        self.model.kind()
    }

    /// Fear probabilities for raw rows, scaled with the stored parameters.
    pub fn predict_proba(&self, raw_rows: &[FeatureRow]) -> Result<Vec<f64>> {
        let scaled = self.normalizer.transform(raw_rows);
        self.model.predict_proba(&scaled)
    }

    /// Binary labels for raw rows.
    pub fn predict(&self, raw_rows: &[FeatureRow]) -> Result<Vec<u8>> {
        let scaled = self.normalizer.transform(raw_rows);
        self.model.predict(&scaled)
    }

    /// States for raw rows.
    pub fn classify(&self, raw_rows: &[FeatureRow]) -> Result<Vec<State>> {
        Ok(self
            .predict(raw_rows)?
            .into_iter()
            .map(State::from_label)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mindwave_core::{Samples, ScalerParams, FEATURE_COUNT};

    #[test]
    fn test_state_classifier_scales_before_predicting() {
        let dir = tempfile::tempdir().unwrap();
        let scaler_path = dir.path().join("scaler_params.json");
        let model_path = dir.path().join("knn_model.safetensors");

        // Raw feature 0 is around 1000; scaled it is around 0 / 1.
        let params = ScalerParams {
            means: vec![1000.0; FEATURE_COUNT],
            stds: vec![10.0; FEATURE_COUNT],
        };
        save_scaler(&params, &scaler_path).unwrap();

        let mut train = Samples::default();
        train.push([0.0; FEATURE_COUNT], 0);
        train.push([0.1; FEATURE_COUNT], 0);
        train.push([5.0; FEATURE_COUNT], 1);
        train.push([5.1; FEATURE_COUNT], 1);
        let mut knn = KnnModel::new(1);
        knn.fit(&train).unwrap();
        knn.save(&model_path).unwrap();

        let clf = StateClassifier::load(ClassifierKind::Knn, &scaler_path, &model_path).unwrap();
        assert_eq!(clf.kind(), ClassifierKind::Knn);
        let states = clf
            .classify(&[[1000.5; FEATURE_COUNT], [1050.0; FEATURE_COUNT]])
            .unwrap();
        assert_eq!(states, vec![State::Chill, State::Fear]);
    }

    #[test]
    fn test_default_predict_thresholds_at_half() {
        struct Fixed(Vec<f64>);
        impl Classifier for Fixed {
            fn kind(&self) -> ClassifierKind {
                ClassifierKind::Cnn
            }
            fn predict_proba(&self, _rows: &[FeatureRow]) -> Result<Vec<f64>> {
                Ok(self.0.clone())
            }
        }
        let preds = Fixed(vec![0.2, 0.5, 0.51, 0.99]).predict(&[]).unwrap();
        assert_eq!(preds, vec![0, 0, 1, 1]);
    }
}
