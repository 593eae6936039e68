//! Evaluation metrics: confusion matrices and per-class classification reports.
//!
//! Class 0 = chill, class 1 = fear. Rows are true labels, columns predictions.

use mindwave_core::{MindwaveError, Result, State};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 2x2 count matrix, `counts[true][predicted]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub counts: [[usize; 2]; 2],
}

impl ConfusionMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from parallel ground-truth and predicted label slices.
    ///
    /// # Errors
    ///
    /// [`MindwaveError::LengthMismatch`] when the lengths differ.
    pub fn from_predictions(truth: &[u8], predicted: &[u8]) -> Result<Self> {
        if truth.len() != predicted.len() {
            return Err(MindwaveError::LengthMismatch {
                what: "labels vs predictions",
                left: truth.len(),
                right: predicted.len(),
            });
        }
        let mut cm = Self::new();
        for (&t, &p) in truth.iter().zip(predicted.iter()) {
            cm.record(t, p);
        }
        Ok(cm)
    }

    /// Record one prediction.
    pub fn record(&mut self, truth: u8, predicted: u8) {
        let t = usize::from(truth != 0);
        let p = usize::from(predicted != 0);
        self.counts[t][p] += 1;
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    pub fn correct(&self) -> usize {
        self.counts[0][0] + self.counts[1][1]
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.correct(), self.total())
    }

    /// Rows whose true label is `class`.
    pub fn support(&self, class: usize) -> usize {
        self.counts[class][0] + self.counts[class][1]
    }

    /// Rows predicted as `class`.
    pub fn predicted(&self, class: usize) -> usize {
        self.counts[0][class] + self.counts[1][class]
    }
}

/// Element-wise mean of several confusion matrices.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeanConfusionMatrix {
    pub values: [[f64; 2]; 2],
    pub folds: usize,
}

/// Average per-fold confusion matrices element by element.
pub fn mean_confusion(matrices: &[ConfusionMatrix]) -> Result<MeanConfusionMatrix> {
    if matrices.is_empty() {
        return Err(MindwaveError::InsufficientData(
            "no confusion matrices to average".to_string(),
        ));
    }
    let n = matrices.len() as f64;
    let mut values = [[0.0; 2]; 2];
    for cm in matrices {
        for (t, row) in values.iter_mut().enumerate() {
            for (p, v) in row.iter_mut().enumerate() {
                *v += cm.counts[t][p] as f64;
            }
        }
    }
    for v in values.iter_mut().flatten() {
        *v /= n;
    }
    Ok(MeanConfusionMatrix {
        values,
        folds: matrices.len(),
    })
}

impl fmt::Display for MeanConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:>12} {:>8} {:>8}", "true\\pred", "chill", "fear")?;
        for (t, state) in State::ALL.iter().enumerate() {
            writeln!(
                f,
                "{:>12} {:>8.2} {:>8.2}",
                state.as_str(),
                self.values[t][0],
                self.values[t][1]
            )?;
        }
        Ok(())
    }
}

/// Precision, recall and F1 for one class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Per-class metrics plus accuracy and macro/weighted averages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    /// Indexed by binary label: `[chill, fear]`.
    pub classes: [ClassMetrics; 2],
    pub accuracy: f64,
    pub macro_avg: ClassMetrics,
    pub weighted_avg: ClassMetrics,
}

impl ClassificationReport {
    /// Derive the report from a confusion matrix. Undefined ratios are 0.0.
    pub fn from_confusion(cm: &ConfusionMatrix) -> Self {
        let mut classes = [ClassMetrics::default(); 2];
        for (c, m) in classes.iter_mut().enumerate() {
            let tp = cm.counts[c][c];
            let precision = ratio(tp, cm.predicted(c));
            let recall = ratio(tp, cm.support(c));
            let f1 = if precision + recall > 0.0 {
                2.0 * precision * recall / (precision + recall)
            } else {
                0.0
            };
            *m = ClassMetrics {
                precision,
                recall,
                f1,
                support: cm.support(c),
            };
        }

        let total = cm.total();
        let macro_avg = ClassMetrics {
            precision: (classes[0].precision + classes[1].precision) / 2.0,
            recall: (classes[0].recall + classes[1].recall) / 2.0,
            f1: (classes[0].f1 + classes[1].f1) / 2.0,
            support: total,
        };
        let weight = |pick: fn(&ClassMetrics) -> f64| -> f64 {
            if total == 0 {
                return 0.0;
            }
            classes
                .iter()
                .map(|m| pick(m) * m.support as f64)
                .sum::<f64>()
                / total as f64
        };
        let weighted_avg = ClassMetrics {
            precision: weight(|m| m.precision),
            recall: weight(|m| m.recall),
            f1: weight(|m| m.f1),
            support: total,
        };

        Self {
            classes,
            accuracy: cm.accuracy(),
            macro_avg,
            weighted_avg,
        }
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:>12} {:>10} {:>10} {:>10} {:>10}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        writeln!(f)?;
        for (state, m) in State::ALL.iter().zip(self.classes.iter()) {
            writeln!(
                f,
                "{:>12} {:>10.2} {:>10.2} {:>10.2} {:>10}",
                state.as_str(),
                m.precision,
                m.recall,
                m.f1,
                m.support
            )?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:>12} {:>10} {:>10} {:>10.2} {:>10}",
            "accuracy", "", "", self.accuracy, self.macro_avg.support
        )?;
        for (name, m) in [("macro avg", &self.macro_avg), ("weighted avg", &self.weighted_avg)] {
            writeln!(
                f,
                "{:>12} {:>10.2} {:>10.2} {:>10.2} {:>10}",
                name, m.precision, m.recall, m.f1, m.support
            )?;
        }
        Ok(())
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den > 0 {
        num as f64 / den as f64
    } else {
        0.0
    }
}
