//! k-nearest-neighbour classifier over standardized feature rows.
//!
//! Fitting only stores the training rows. A query is labeled by majority vote
//! among its `k` nearest rows under Euclidean distance; neighbours at equal
//! distance are ordered by label, so the vote does not depend on the order in
//! which training rows were supplied.

use crate::persist::{load_tensors, save_tensors, RawTensor};
use crate::Classifier;
use mindwave_core::{ClassifierKind, FeatureRow, MindwaveError, Result, Samples, FEATURE_COUNT};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;

const FEATURES_TENSOR: &str = "features";
const LABELS_TENSOR: &str = "labels";

/// Stored-sample nearest-neighbour model.
#[derive(Debug, Clone, PartialEq)]
pub struct KnnModel {
    k: usize,
    rows: Vec<FeatureRow>,
    labels: Vec<u8>,
}

impl KnnModel {
    /// Create an unfitted model that votes among `k` neighbours.
    pub fn new(k: usize) -> Self {
        Self {
            k: k.max(1),
            rows: Vec::new(),
            labels: Vec::new(),
        }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// Number of stored training rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Store the training rows, replacing anything stored before.
    pub fn fit(&mut self, samples: &Samples) -> Result<()> {
        if samples.is_empty() {
            return Err(MindwaveError::InsufficientData(
                "knn needs at least one training row".to_string(),
            ));
        }
        self.rows = samples.features.clone();
        self.labels = samples.labels.clone();
        Ok(())
    }

    /// Forget the stored rows.
    pub fn clear(&mut self) {
        self.rows.clear();
        self.labels.clear();
    }

    /// The `min(k, n)` nearest `(squared distance, label)` pairs, nearest first.
    fn neighbours(&self, query: &FeatureRow) -> Vec<(f64, u8)> {
        let mut scored: Vec<(f64, u8)> = self
            .rows
            .iter()
            .zip(self.labels.iter())
            .map(|(row, &label)| (squared_distance(row, query), label))
            .collect();

        let take = self.k.min(scored.len());
        if take < scored.len() {
            scored.select_nth_unstable_by(take - 1, compare_neighbour);
            scored.truncate(take);
        }
        scored.sort_by(compare_neighbour);
        scored
    }

    /// Fraction of the nearest neighbours labeled fear.
    fn fear_fraction(&self, query: &FeatureRow) -> f64 {
        let neighbours = self.neighbours(query);
        if neighbours.is_empty() {
            return 0.0;
        }
        let fear = neighbours.iter().filter(|(_, l)| *l != 0).count();
        fear as f64 / neighbours.len() as f64
    }

    /// Persist as safetensors: `features` (F64, N x 12), `labels` (U8, N),
    /// metadata `kind=knn` and `k`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let n = self.rows.len();
        let feature_bytes: Vec<u8> = self
            .rows
            .iter()
            .flat_map(|r| r.iter().flat_map(|v| v.to_le_bytes()))
            .collect();

        let mut metadata = HashMap::new();
        metadata.insert("kind".to_string(), ClassifierKind::Knn.to_string());
        metadata.insert("k".to_string(), self.k.to_string());

        save_tensors(
            path,
            vec![
                RawTensor {
                    name: FEATURES_TENSOR,
                    dtype: safetensors::Dtype::F64,
                    shape: vec![n, FEATURE_COUNT],
                    bytes: feature_bytes,
                },
                RawTensor {
                    name: LABELS_TENSOR,
                    dtype: safetensors::Dtype::U8,
                    shape: vec![n],
                    bytes: self.labels.clone(),
                },
            ],
            metadata,
        )?;
        tracing::info!(path = %path.display(), rows = n, k = self.k, "KNN model saved");
        Ok(())
    }

    /// Load a model written by [`KnnModel::save`].
    pub fn load(path: &Path) -> Result<Self> {
        let mut loaded = load_tensors(path)?;
        let bad = |msg: String| MindwaveError::Model(format!("{}: {msg}", path.display()));

        match loaded.metadata.get("kind").map(String::as_str) {
            Some("knn") => {}
            other => return Err(bad(format!("expected kind 'knn', found {other:?}"))),
        }
        let k: usize = loaded
            .metadata
            .get("k")
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| bad("missing or invalid 'k' metadata".to_string()))?;

        let (dtype, shape, bytes) = loaded
            .tensors
            .remove(FEATURES_TENSOR)
            .ok_or_else(|| bad("missing features tensor".to_string()))?;
        if dtype != safetensors::Dtype::F64 || shape.len() != 2 || shape[1] != FEATURE_COUNT {
            return Err(bad(format!("features tensor has {dtype:?} {shape:?}")));
        }
        let n = shape[0];
        let values: Vec<f64> = bytes
            .chunks_exact(8)
            .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
            .collect();
        let rows: Vec<FeatureRow> = values
            .chunks_exact(FEATURE_COUNT)
            .map(|chunk| {
                let mut row = [0.0; FEATURE_COUNT];
                row.copy_from_slice(chunk);
                row
            })
            .collect();

        let (dtype, shape, labels) = loaded
            .tensors
            .remove(LABELS_TENSOR)
            .ok_or_else(|| bad("missing labels tensor".to_string()))?;
        if dtype != safetensors::Dtype::U8 || shape != [n] || rows.len() != n {
            return Err(bad(format!("labels tensor has {dtype:?} {shape:?}, expected [{n}]")));
        }

        Ok(Self {
            k: k.max(1),
            rows,
            labels,
        })
    }
}

impl Classifier for KnnModel {
    fn kind(&self) -> ClassifierKind {
        ClassifierKind::Knn
    }

    fn predict_proba(&self, rows: &[FeatureRow]) -> Result<Vec<f64>> {
        if self.rows.is_empty() {
            return Err(MindwaveError::Model("knn model has not been fitted".to_string()));
        }
        Ok(rows.iter().map(|q| self.fear_fraction(q)).collect())
    }
}

fn squared_distance(a: &FeatureRow, b: &FeatureRow) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn compare_neighbour(a: &(f64, u8), b: &(f64, u8)) -> Ordering {
    a.0.total_cmp(&b.0).then(a.1.cmp(&b.1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(x: f64, y: f64) -> FeatureRow {
        let mut r = [0.0; FEATURE_COUNT];
        r[0] = x;
        r[1] = y;
        r
    }

    fn two_clusters() -> Samples {
        let mut s = Samples::default();
        for i in 0..5 {
            s.push(row(i as f64 * 0.1, 0.0), 0);
            s.push(row(10.0 + i as f64 * 0.1, 10.0), 1);
        }
        s
    }

    #[test]
    fn test_majority_vote() {
        let mut knn = KnnModel::new(3);
        knn.fit(&two_clusters()).unwrap();
        let preds = knn.predict(&[row(0.2, 0.1), row(9.9, 9.8)]).unwrap();
        assert_eq!(preds, vec![0, 1]);
    }

    #[test]
    fn test_probability_is_vote_fraction() {
        let mut s = Samples::default();
        s.push(row(0.0, 0.0), 1);
        s.push(row(1.0, 0.0), 1);
        s.push(row(2.0, 0.0), 0);
        s.push(row(50.0, 0.0), 0);
        let mut knn = KnnModel::new(3);
        knn.fit(&s).unwrap();
        let p = knn.predict_proba(&[row(0.0, 0.0)]).unwrap();
        assert!((p[0] - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_order_invariance_with_tied_distances() {
        // Two candidates at the same distance for the third slot with
        // different labels; ordering must not depend on insertion order.
        let mut a = Samples::default();
        a.push(row(0.0, 0.0), 1);
        a.push(row(0.5, 0.0), 0);
        a.push(row(1.0, 0.0), 1);
        a.push(row(-1.0, 0.0), 0);
        let mut b = Samples::default();
        for i in [3, 2, 1, 0] {
            b.push(a.features[i], a.labels[i]);
        }

        let query = [row(0.0, 0.0), row(0.25, 0.0), row(-0.3, 0.4)];
        let mut ka = KnnModel::new(3);
        ka.fit(&a).unwrap();
        let mut kb = KnnModel::new(3);
        kb.fit(&b).unwrap();
        assert_eq!(ka.predict(&query).unwrap(), kb.predict(&query).unwrap());
        assert_eq!(
            ka.predict_proba(&query).unwrap(),
            kb.predict_proba(&query).unwrap()
        );
    }

    #[test]
    fn test_k_larger_than_training_set() {
        let mut s = Samples::default();
        s.push(row(0.0, 0.0), 1);
        let mut knn = KnnModel::new(3);
        knn.fit(&s).unwrap();
        assert_eq!(knn.predict(&[row(5.0, 5.0)]).unwrap(), vec![1]);
    }

    #[test]
    fn test_unfitted_model_errors() {
        let knn = KnnModel::new(3);
        assert!(knn.predict(&[row(0.0, 0.0)]).is_err());
        assert!(KnnModel::new(3).fit(&Samples::default()).is_err());
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("knn_model.safetensors");
        let mut knn = KnnModel::new(3);
        knn.fit(&two_clusters()).unwrap();
        knn.save(&path).unwrap();

        let loaded = KnnModel::load(&path).unwrap();
        assert_eq!(loaded, knn);
        let q = [row(0.3, 0.0), row(10.1, 10.0)];
        assert_eq!(loaded.predict(&q).unwrap(), knn.predict(&q).unwrap());
    }

    #[test]
    fn test_load_rejects_foreign_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("other.safetensors");
        std::fs::write(&path, b"not a safetensors file").unwrap();
        assert!(KnnModel::load(&path).is_err());
    }
}
