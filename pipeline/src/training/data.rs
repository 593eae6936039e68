//! Session CSV loading, seeded splitting, and batch iteration.

use candle_core::Tensor;
use mindwave_core::{
    Dataset, FeatureRow, MindwaveError, Result, Samples, SessionRecord, State, FEATURE_COLUMNS,
    FEATURE_COUNT, LABEL_COLUMN,
};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Row accounting for a single input file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLoadStats {
    pub path: PathBuf,
    pub rows_read: usize,
    pub kept: usize,
    pub dropped_unknown_label: usize,
    pub dropped_missing: usize,
}

/// Row accounting for a whole load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReport {
    pub files: Vec<FileLoadStats>,
}

impl LoadReport {
    pub fn rows_read(&self) -> usize {
        self.files.iter().map(|f| f.rows_read).sum()
    }

    pub fn kept(&self) -> usize {
        self.files.iter().map(|f| f.kept).sum()
    }

    pub fn dropped(&self) -> usize {
        self.files
            .iter()
            .map(|f| f.dropped_unknown_label + f.dropped_missing)
            .sum()
    }
}

/// Load and concatenate session files, preserving file and row order.
///
/// Rows with a `State` outside {chill, fear} or an empty/NaN feature are
/// dropped and counted.
///
/// # Errors
///
/// `SchemaMismatch` if a file lacks a required column, `InvalidValue` for a
/// non-numeric feature, `Io`/`Csv` on read failures, and `InsufficientData`
/// when nothing usable remains.
pub fn load_sessions(paths: &[PathBuf]) -> Result<(Dataset, LoadReport)> {
    if paths.is_empty() {
        return Err(MindwaveError::InsufficientData(
            "no session files given".to_string(),
        ));
    }

    let mut dataset = Dataset::default();
    let mut report = LoadReport::default();
    for path in paths {
        let (part, stats) = load_session(path)?;
        tracing::info!(
            path = %path.display(),
            rows = stats.rows_read,
            kept = stats.kept,
            unknown_label = stats.dropped_unknown_label,
            missing = stats.dropped_missing,
            "Session file loaded"
        );
        if stats.kept == 0 {
            tracing::warn!(path = %path.display(), "Session file contributed no usable rows");
        }
        dataset.extend(part);
        report.files.push(stats);
    }

    if dataset.is_empty() {
        return Err(MindwaveError::InsufficientData(format!(
            "no usable rows in {} file(s)",
            paths.len()
        )));
    }
    Ok((dataset, report))
}

/// Load a single session file.
pub fn load_session(path: &Path) -> Result<(Dataset, FileLoadStats)> {
    let file = std::fs::File::open(path).map_err(|e| MindwaveError::io(path, e))?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(file);

    let file_label = path.display().to_string();
    let csv_err = |e: csv::Error| MindwaveError::Csv {
        path: file_label.clone(),
        message: e.to_string(),
    };

    let headers = reader.headers().map_err(csv_err)?.clone();
    let column = |name: &str| -> Result<usize> {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| MindwaveError::SchemaMismatch {
                path: file_label.clone(),
                column: name.to_string(),
            })
    };
    let mut feature_idx = [0usize; FEATURE_COUNT];
    for (slot, name) in feature_idx.iter_mut().zip(FEATURE_COLUMNS.iter()) {
        *slot = column(name)?;
    }
    let label_idx = column(LABEL_COLUMN)?;
    let last_idx = feature_idx.iter().copied().fold(label_idx, usize::max);

    let mut dataset = Dataset::default();
    let mut stats = FileLoadStats {
        path: path.to_path_buf(),
        ..FileLoadStats::default()
    };

    for result in reader.records() {
        let record = result.map_err(csv_err)?;
        stats.rows_read += 1;
        let line = record.position().map_or(0, |p| p.line());

        if record.len() <= last_idx {
            tracing::debug!(path = %file_label, line, fields = record.len(), "Dropping short row");
            stats.dropped_missing += 1;
            continue;
        }

        let state = match record.get(label_idx).unwrap_or("").parse::<State>() {
            Ok(state) => state,
            Err(e) => {
                tracing::debug!(path = %file_label, line, error = %e, "Dropping row");
                stats.dropped_unknown_label += 1;
                continue;
            }
        };

        let mut features: FeatureRow = [0.0; FEATURE_COUNT];
        let mut missing = false;
        for (i, &idx) in feature_idx.iter().enumerate() {
            let raw = record.get(idx).unwrap_or("");
            if raw.is_empty() {
                missing = true;
                break;
            }
            let value: f64 = raw.parse().map_err(|_| MindwaveError::InvalidValue {
                path: file_label.clone(),
                line,
                column: FEATURE_COLUMNS[i].to_string(),
                value: raw.to_string(),
            })?;
            if !value.is_finite() {
                missing = true;
                break;
            }
            features[i] = value;
        }
        if missing {
            tracing::debug!(path = %file_label, line, "Dropping row with missing feature");
            stats.dropped_missing += 1;
            continue;
        }

        dataset.records.push(SessionRecord { features, state });
        stats.kept += 1;
    }

    Ok((dataset, stats))
}

/// Seeded shuffled hold-out split. The test part gets `ceil(test_ratio * N)` rows.
pub fn train_test_split(samples: &Samples, test_ratio: f64, seed: u64) -> Result<(Samples, Samples)> {
    let n = samples.len();
    let n_test = (test_ratio * n as f64).ceil() as usize;
    if n_test == 0 || n_test >= n {
        return Err(MindwaveError::InsufficientData(format!(
            "cannot hold out {n_test} of {n} rows"
        )));
    }

    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let (test_idx, train_idx) = indices.split_at(n_test);
    Ok((samples.select(train_idx), samples.select(test_idx)))
}

/// Train/validation indices for one cross-validation fold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
}

/// Seeded shuffled k-fold partition of `0..n`.
///
/// Each index appears in exactly one validation set; the first `n % k` folds
/// hold one extra index. Indices inside a fold are ascending.
pub fn k_fold(n: usize, k: usize, seed: u64) -> Result<Vec<Fold>> {
    if k < 2 || n < k {
        return Err(MindwaveError::InsufficientData(format!(
            "cannot split {n} rows into {k} folds"
        )));
    }

    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let base = n / k;
    let extra = n % k;
    let mut folds = Vec::with_capacity(k);
    let mut start = 0;
    for i in 0..k {
        let size = base + usize::from(i < extra);
        let end = start + size;
        let mut validation = indices[start..end].to_vec();
        let mut train: Vec<usize> = indices[..start]
            .iter()
            .chain(indices[end..].iter())
            .copied()
            .collect();
        validation.sort_unstable();
        train.sort_unstable();
        folds.push(Fold { train, validation });
        start = end;
    }
    Ok(folds)
}

/// Mini-batch iterator over pre-loaded tensors. Reshuffles indices each epoch.
pub struct BatchIterator {
    inputs: Tensor,
    labels: Tensor,
    indices: Vec<usize>,
    batch_size: usize,
    pos: usize,
}

impl BatchIterator {
    pub fn new(inputs: Tensor, labels: Tensor, batch_size: usize) -> Self {
        let n = inputs.dim(0).unwrap_or(0);
        Self {
            inputs,
            labels,
            indices: (0..n).collect(),
            batch_size: batch_size.max(1),
            pos: 0,
        }
    }

    /// Reshuffle for a new epoch using a seeded RNG derived from base seed + epoch.
    pub fn reshuffle(&mut self, seed: u64, epoch: usize) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(epoch as u64));
        self.indices.sort_unstable();
        self.indices.shuffle(&mut rng);
        self.pos = 0;
    }

    /// Returns the next mini-batch, or None if the epoch is exhausted.
    pub fn next_batch(&mut self) -> Result<Option<(Tensor, Tensor)>> {
        let n = self.indices.len();
        if self.pos >= n {
            return Ok(None);
        }

        let end = (self.pos + self.batch_size).min(n);
        let batch_idx: Vec<u32> = self.indices[self.pos..end]
            .iter()
            .map(|&i| i as u32)
            .collect();
        self.pos = end;

        let gather = || -> candle_core::Result<(Tensor, Tensor)> {
            let idx = Tensor::new(batch_idx.as_slice(), self.inputs.device())?;
            Ok((
                self.inputs.index_select(&idx, 0)?,
                self.labels.index_select(&idx, 0)?,
            ))
        };
        gather()
            .map(Some)
            .map_err(|e| MindwaveError::Model(format!("Failed to gather batch: {e}")))
    }
}
