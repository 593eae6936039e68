//! Per-feature standardization (zero mean, unit population variance).
//!
//! The fitted [`ScalerParams`] are the only state shared between training and
//! inference: they are fit once on the training matrix, persisted, and
//! applied unchanged to every later input.

use mindwave_core::{FeatureRow, MindwaveError, Result, ScalerParams, FEATURE_COLUMNS, FEATURE_COUNT};

/// A fitted standard scaler.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalizer {
    params: ScalerParams,
}

impl Normalizer {
    /// Fit means and population standard deviations over `rows`.
    ///
    /// # Errors
    ///
    /// [`MindwaveError::InsufficientData`] for an empty matrix and
    /// [`MindwaveError::DegenerateFeature`] for a constant column.
    pub fn fit(rows: &[FeatureRow]) -> Result<Self> {
        if rows.is_empty() {
            return Err(MindwaveError::InsufficientData(
                "cannot fit a scaler on an empty matrix".to_string(),
            ));
        }
        let n = rows.len() as f64;

        let mut means = vec![0.0; FEATURE_COUNT];
        for row in rows {
            for (m, &x) in means.iter_mut().zip(row.iter()) {
                *m += x;
            }
        }
        for m in &mut means {
            *m /= n;
        }

        let mut stds = vec![0.0; FEATURE_COUNT];
        for row in rows {
            for ((s, &x), &m) in stds.iter_mut().zip(row.iter()).zip(means.iter()) {
                *s += (x - m) * (x - m);
            }
        }
        for s in &mut stds {
            *s = (*s / n).sqrt();
        }

        // A constant column can leave a tiny non-zero std from rounding in
        // the mean, so check constancy directly.
        for (col, name) in FEATURE_COLUMNS.iter().enumerate() {
            let first = rows[0][col];
            let constant = rows.iter().all(|r| r[col] == first);
            if constant || stds[col] == 0.0 {
                return Err(MindwaveError::DegenerateFeature {
                    column: (*name).to_string(),
                });
            }
        }

        Ok(Self {
            params: ScalerParams { means, stds },
        })
    }

    /// Fit on `rows` and return the standardized matrix with the scaler.
    pub fn fit_transform(rows: &[FeatureRow]) -> Result<(Vec<FeatureRow>, Self)> {
        let normalizer = Self::fit(rows)?;
        let scaled = normalizer.transform(rows);
        Ok((scaled, normalizer))
    }

    /// Wrap previously fitted parameters without recomputation.
    pub fn from_params(params: ScalerParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &ScalerParams {
        &self.params
    }

    pub fn into_params(self) -> ScalerParams {
        self.params
    }

    /// Standardize a single row.
    pub fn transform_row(&self, row: &FeatureRow) -> FeatureRow {
        let mut out = [0.0; FEATURE_COUNT];
        for (i, o) in out.iter_mut().enumerate() {
            *o = (row[i] - self.params.means[i]) / self.params.stds[i];
        }
        out
    }

    /// Standardize every row. Not idempotent: applying twice double-scales.
    pub fn transform(&self, rows: &[FeatureRow]) -> Vec<FeatureRow> {
        rows.iter().map(|r| self.transform_row(r)).collect()
    }
}

/// Apply stored parameters to `rows`.
///
/// # Errors
///
/// Fails if `params` does not validate (wrong length or a zero std).
pub fn transform(rows: &[FeatureRow], params: &ScalerParams) -> Result<Vec<FeatureRow>> {
    let normalizer = Normalizer::from_params(params.clone())?;
    Ok(normalizer.transform(rows))
}
