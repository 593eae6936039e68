//! SMOTE-style class balancing.
//!
//! New minority rows are interpolated between a randomly chosen minority row
//! and one of its nearest minority neighbours until both classes have the
//! same count. Must run after normalization and before any split, and never
//! on a validation fold.

use mindwave_core::{FeatureRow, MindwaveError, Result, Samples, FEATURE_COUNT};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Default neighbourhood size for interpolation.
pub const DEFAULT_NEIGHBORS: usize = 5;

/// Oversample the minority class to parity.
///
/// Original rows keep their positions; synthesized rows are appended. The
/// result has `2 * max(a, b)` rows for class counts `(a, b)`.
///
/// # Errors
///
/// [`MindwaveError::InsufficientData`] if either class is empty.
pub fn balance(samples: &Samples, k_neighbors: usize, seed: u64) -> Result<Samples> {
    let [chill, fear] = samples.class_counts();
    if chill == 0 || fear == 0 {
        return Err(MindwaveError::InsufficientData(format!(
            "cannot balance classes with counts chill={chill} fear={fear}"
        )));
    }
    if chill == fear {
        return Ok(samples.clone());
    }

    let (minority_label, deficit) = if chill < fear {
        (0u8, fear - chill)
    } else {
        (1u8, chill - fear)
    };
    let minority: Vec<FeatureRow> = samples
        .features
        .iter()
        .zip(samples.labels.iter())
        .filter(|(_, l)| u8::from(**l != 0) == minority_label)
        .map(|(r, _)| *r)
        .collect();

    if minority.len() == 1 {
        tracing::warn!(
            label = minority_label,
            copies = deficit,
            "Single minority row; duplicating instead of interpolating"
        );
    }

    let neighbours = nearest_neighbours(&minority, k_neighbors);
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let mut out = samples.clone();
    out.features.reserve(deficit);
    out.labels.reserve(deficit);
    for _ in 0..deficit {
        let i = rng.gen_range(0..minority.len());
        let base = &minority[i];
        let synthetic = match neighbours[i].as_slice() {
            [] => *base,
            candidates => {
                let other = &minority[candidates[rng.gen_range(0..candidates.len())]];
                let gap: f64 = rng.gen();
                let mut row = [0.0; FEATURE_COUNT];
                for (c, v) in row.iter_mut().enumerate() {
                    *v = base[c] + gap * (other[c] - base[c]);
                }
                row
            }
        };
        out.push(synthetic, minority_label);
    }

    tracing::info!(
        before_chill = chill,
        before_fear = fear,
        synthesized = deficit,
        total = out.len(),
        "Classes balanced"
    );
    Ok(out)
}

/// For every row, the indices of its `k` nearest other rows (Euclidean).
fn nearest_neighbours(rows: &[FeatureRow], k: usize) -> Vec<Vec<usize>> {
    let k = k.min(rows.len().saturating_sub(1));
    rows.iter()
        .enumerate()
        .map(|(i, a)| {
            let mut scored: Vec<(f64, usize)> = rows
                .iter()
                .enumerate()
                .filter(|&(j, _)| j != i)
                .map(|(j, b)| {
                    let d: f64 = a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum();
                    (d, j)
                })
                .collect();
            scored.sort_by(|x, y| x.0.total_cmp(&y.0).then(x.1.cmp(&y.1)));
            scored.into_iter().take(k).map(|(_, j)| j).collect()
        })
        .collect()
}
