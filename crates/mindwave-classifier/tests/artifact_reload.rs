//! Reloading persisted artifacts through the public API only.

use candle_core::Device;
use candle_nn::VarMap;
use mindwave_classifier::{
    load_classifier, save_scaler, Classifier, ConvNet, KnnModel, Normalizer, StateClassifier,
};
use mindwave_core::{ClassifierKind, FeatureRow, MindwaveError, Samples, State, FEATURE_COUNT};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Raw (unscaled) rows on very different magnitudes per column, chill low and
/// fear high.
fn raw_rows() -> (Vec<FeatureRow>, Vec<u8>) {
    let mut rows = Vec::new();
    let mut labels = Vec::new();
    for i in 0..20 {
        let fear = i % 2 == 1;
        let mut row = [0.0; FEATURE_COUNT];
        for (c, v) in row.iter_mut().enumerate() {
            let scale = 10f64.powi((c % 5) as i32);
            let base = if fear { 3.0 } else { 1.0 };
            *v = scale * (base + 0.01 * i as f64);
        }
        rows.push(row);
        labels.push(u8::from(fear));
    }
    (rows, labels)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn test_knn_artifacts_classify_raw_rows() {
    let dir = TempDir::new().unwrap();
    let scaler_path = dir.path().join("out/scaler_params.json");
    let model_path = dir.path().join("out/knn_model.safetensors");

    let (rows, labels) = raw_rows();
    let (scaled, normalizer) = Normalizer::fit_transform(&rows).unwrap();
    save_scaler(normalizer.params(), &scaler_path).unwrap();

    let mut knn = KnnModel::new(3);
    knn.fit(&Samples::new(scaled, labels.clone()).unwrap()).unwrap();
    knn.save(&model_path).unwrap();

    let classifier = StateClassifier::load(ClassifierKind::Knn, &scaler_path, &model_path).unwrap();
    assert_eq!(classifier.kind(), ClassifierKind::Knn);
    assert_eq!(classifier.predict(&rows).unwrap(), labels);

    let states = classifier.classify(&rows[..2]).unwrap();
    assert_eq!(states, vec![State::Chill, State::Fear]);
}

#[test]
fn test_cnn_weights_reload_as_classifier() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("eeg_model_crossval.safetensors");

    let device = Device::Cpu;
    let varmap = VarMap::new();
    let net = ConvNet::new_trainable(&varmap, 0.4, &device).unwrap();
    varmap.save(&path).unwrap();

    let (rows, _) = raw_rows();
    let (scaled, _) = Normalizer::fit_transform(&rows).unwrap();
    let expected = net.predict_proba(&scaled).unwrap();

    let reloaded = load_classifier(ClassifierKind::Cnn, &path).unwrap();
    assert_eq!(reloaded.kind(), ClassifierKind::Cnn);
    let probs = reloaded.predict_proba(&scaled).unwrap();
    assert_eq!(probs.len(), rows.len());
    for (a, b) in probs.iter().zip(expected.iter()) {
        assert!((0.0..=1.0).contains(a));
        assert!((a - b).abs() < 1e-5);
    }
}

#[test]
fn test_loading_wrong_kind_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("weights.safetensors");
    let varmap = VarMap::new();
    ConvNet::new_trainable(&varmap, 0.4, &Device::Cpu).unwrap();
    varmap.save(&path).unwrap();

    assert!(load_classifier(ClassifierKind::Knn, &path).is_err());
}

#[test]
fn test_missing_scaler_is_io_error() {
    let dir = TempDir::new().unwrap();
    let result = StateClassifier::load(
        ClassifierKind::Knn,
        &dir.path().join("absent.json"),
        &dir.path().join("absent.safetensors"),
    );
    assert!(matches!(result, Err(MindwaveError::Io { .. })));
}
