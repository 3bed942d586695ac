//! Evaluation metrics for the classifier and the distilled model.

use serde::{Deserialize, Serialize};

/// Linear-interpolated quantile, q in [0, 1]. Empty input gives NaN.
pub fn quantile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

/// Area under the ROC curve via the rank-sum statistic (ties averaged).
/// Returns None when either class is absent.
pub fn roc_auc(labels: &[u8], scores: &[f64]) -> Option<f64> {
    let positives = labels.iter().filter(|l| **l == 1).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|a, b| scores[*a].total_cmp(&scores[*b]));

    let mut rank_sum_pos = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        // Ranks are 1-based; the tie group i..=j shares their mean.
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            if labels[idx] == 1 {
                rank_sum_pos += avg_rank;
            }
        }
        i = j + 1;
    }

    let p = positives as f64;
    let n = negatives as f64;
    Some((rank_sum_pos - p * (p + 1.0) / 2.0) / (p * n))
}

/// Held-out evaluation of a probabilistic binary classifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub true_positives: usize,
    pub false_positives: usize,
    pub true_negatives: usize,
    pub false_negatives: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub accuracy: f64,
    pub roc_auc: f64,
}

impl ClassificationReport {
    pub fn evaluate(labels: &[u8], probabilities: &[f64], threshold: f64) -> Self {
        let mut r = Self::default();
        for (label, p) in labels.iter().zip(probabilities) {
            match (*label == 1, *p >= threshold) {
                (true, true) => r.true_positives += 1,
                (false, true) => r.false_positives += 1,
                (false, false) => r.true_negatives += 1,
                (true, false) => r.false_negatives += 1,
            }
        }
        let tp = r.true_positives as f64;
        r.precision = ratio(tp, tp + r.false_positives as f64);
        r.recall = ratio(tp, tp + r.false_negatives as f64);
        r.f1 = ratio(2.0 * r.precision * r.recall, r.precision + r.recall);
        r.accuracy = ratio(tp + r.true_negatives as f64, labels.len() as f64);
        r.roc_auc = roc_auc(labels, probabilities).unwrap_or(f64::NAN);
        r
    }

    pub fn support(&self) -> usize {
        self.true_positives + self.false_positives + self.true_negatives + self.false_negatives
    }
}

/// How closely the distilled model tracks the classifier it mimics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgreementReport {
    /// Mean |approx - reference| probability gap.
    pub mean_abs_diff: f64,
    pub max_abs_diff: f64,
    /// Fraction of rows where both sides agree at the 0.5 cutoff.
    pub decision_agreement: f64,
}

impl AgreementReport {
    pub fn compare(reference: &[f64], approx: &[f64]) -> Self {
        let n = reference.len().min(approx.len());
        if n == 0 {
            return Self::default();
        }
        let mut sum = 0.0;
        let mut max = 0.0f64;
        let mut agree = 0usize;
        for (r, a) in reference.iter().zip(approx) {
            let d = (r - a).abs();
            sum += d;
            max = max.max(d);
            if (*r >= 0.5) == (*a >= 0.5) {
                agree += 1;
            }
        }
        Self {
            mean_abs_diff: sum / n as f64,
            max_abs_diff: max,
            decision_agreement: agree as f64 / n as f64,
        }
    }
}

fn ratio(num: f64, den: f64) -> f64 {
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}
