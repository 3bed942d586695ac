//! Gradient-boosted decision trees for binary classification.
//!
//! Second-order boosting on the logistic loss with histogram split
//! finding. Positive rows are up-weighted by `scale_pos_weight` to
//! compensate for class imbalance.

use crate::{
    config::BoostingConfig,
    error::{PipelineError, PipelineResult},
};
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "node", rename_all = "snake_case")]
enum TreeNode {
    Leaf { value: f64 },
    /// Rows with `x[feature] < threshold` go left.
    Split { feature: usize, threshold: f64, left: usize, right: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegressionTree {
    nodes: Vec<TreeNode>,
}

impl RegressionTree {
    pub fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                TreeNode::Leaf { value } => return *value,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => idx = if row[*feature] < *threshold { *left } else { *right },
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

/// Per-feature cut points; bin b holds values in [cuts[b-1], cuts[b]).
struct BinnedMatrix {
    cuts: Vec<Vec<f64>>,
    /// Column-major bin indices: bins[feature][row].
    bins: Vec<Vec<u16>>,
}

impl BinnedMatrix {
    fn build(x: &Array2<f64>, max_bins: usize) -> Self {
        let mut cuts = Vec::with_capacity(x.ncols());
        let mut bins = Vec::with_capacity(x.ncols());
        for column in x.columns() {
            let mut values: Vec<f64> = column.to_vec();
            values.sort_by(f64::total_cmp);
            values.dedup();
            let feature_cuts: Vec<f64> = if values.len() <= max_bins {
                values.windows(2).map(|w| (w[0] + w[1]) / 2.0).collect()
            } else {
                let mut c: Vec<f64> = (1..max_bins)
                    .map(|k| values[k * values.len() / max_bins])
                    .collect();
                c.dedup();
                c
            };
            bins.push(
                column
                    .iter()
                    .map(|v| feature_cuts.partition_point(|c| c <= v) as u16)
                    .collect(),
            );
            cuts.push(feature_cuts);
        }
        Self { cuts, bins }
    }
}

struct GrowContext<'a> {
    binned: &'a BinnedMatrix,
    grad: &'a [f64],
    hess: &'a [f64],
    config: &'a BoostingConfig,
    gain: &'a mut [f64],
}

impl GrowContext<'_> {
    fn leaf_value(&self, g: f64, h: f64) -> f64 {
        -g / (h + self.config.lambda) * self.config.learning_rate
    }

    fn grow(&mut self, nodes: &mut Vec<TreeNode>, rows: Vec<usize>, depth: usize) -> usize {
        let g: f64 = rows.iter().map(|&r| self.grad[r]).sum();
        let h: f64 = rows.iter().map(|&r| self.hess[r]).sum();
        let id = nodes.len();
        nodes.push(TreeNode::Leaf {
            value: self.leaf_value(g, h),
        });
        if depth >= self.config.max_depth || rows.len() < 2 {
            return id;
        }

        let lambda = self.config.lambda;
        let parent = g * g / (h + lambda);
        let mut best: Option<(f64, usize, usize)> = None; // (gain, feature, cut)
        for (feature, cuts) in self.binned.cuts.iter().enumerate() {
            if cuts.is_empty() {
                continue;
            }
            let mut hist_g = vec![0.0; cuts.len() + 1];
            let mut hist_h = vec![0.0; cuts.len() + 1];
            let column = &self.binned.bins[feature];
            for &r in &rows {
                let b = column[r] as usize;
                hist_g[b] += self.grad[r];
                hist_h[b] += self.hess[r];
            }
            let (mut gl, mut hl) = (0.0, 0.0);
            for cut in 0..cuts.len() {
                gl += hist_g[cut];
                hl += hist_h[cut];
                let (gr, hr) = (g - gl, h - hl);
                if hl < self.config.min_child_weight || hr < self.config.min_child_weight {
                    continue;
                }
                let gain = 0.5 * (gl * gl / (hl + lambda) + gr * gr / (hr + lambda) - parent);
                if gain > 1e-12 && best.map_or(true, |(b, _, _)| gain > b) {
                    best = Some((gain, feature, cut));
                }
            }
        }

        let Some((gain, feature, cut)) = best else {
            return id;
        };
        self.gain[feature] += gain;
        let column = &self.binned.bins[feature];
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
            rows.into_iter().partition(|&r| (column[r] as usize) <= cut);
        let left = self.grow(nodes, left_rows, depth + 1);
        let right = self.grow(nodes, right_rows, depth + 1);
        nodes[id] = TreeNode::Split {
            feature,
            threshold: self.binned.cuts[feature][cut],
            left,
            right,
        };
        id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BoostedClassifier {
    trees: Vec<RegressionTree>,
    n_features: usize,
    scale_pos_weight: f64,
    /// Total split gain per feature, accumulated during fitting.
    feature_gain: Vec<f64>,
}

impl BoostedClassifier {
    pub fn fit(
        x: &Array2<f64>,
        labels: &[u8],
        config: &BoostingConfig,
        scale_pos_weight: f64,
    ) -> PipelineResult<Self> {
        let n = x.nrows();
        if n == 0 || n != labels.len() {
            return Err(PipelineError::DataQuality(format!(
                "classifier got {n} rows for {} labels",
                labels.len()
            )));
        }
        if !(scale_pos_weight.is_finite() && scale_pos_weight > 0.0) {
            return Err(PipelineError::DataQuality(format!(
                "scale_pos_weight {scale_pos_weight} is not a positive number"
            )));
        }

        let binned = BinnedMatrix::build(x, config.max_bins.min(u16::MAX as usize));
        let weights: Vec<f64> = labels
            .iter()
            .map(|l| if *l == 1 { scale_pos_weight } else { 1.0 })
            .collect();
        let mut margins = vec![0.0; n];
        let mut grad = vec![0.0; n];
        let mut hess = vec![0.0; n];
        let mut feature_gain = vec![0.0; x.ncols()];
        let mut trees = Vec::with_capacity(config.n_rounds);

        for round in 0..config.n_rounds {
            for i in 0..n {
                let p = sigmoid(margins[i]);
                grad[i] = (p - f64::from(labels[i])) * weights[i];
                hess[i] = (p * (1.0 - p)).max(1e-16) * weights[i];
            }
            let mut nodes = Vec::new();
            let mut ctx = GrowContext {
                binned: &binned,
                grad: &grad,
                hess: &hess,
                config,
                gain: &mut feature_gain,
            };
            ctx.grow(&mut nodes, (0..n).collect(), 0);
            let tree = RegressionTree { nodes };
            for (i, row) in x.rows().into_iter().enumerate() {
                margins[i] += tree.predict_row(row);
            }
            if round % 50 == 0 {
                log::debug!("classifier: round {round}, tree nodes={}", tree.node_count());
            }
            trees.push(tree);
        }

        Ok(Self {
            trees,
            n_features: x.ncols(),
            scale_pos_weight,
            feature_gain,
        })
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn predict_margin_row(&self, row: ArrayView1<f64>) -> f64 {
        self.trees.iter().map(|t| t.predict_row(row)).sum()
    }

    pub fn predict_proba_row(&self, row: ArrayView1<f64>) -> f64 {
        sigmoid(self.predict_margin_row(row))
    }

    pub fn predict_proba(&self, x: &Array2<f64>) -> Vec<f64> {
        x.rows().into_iter().map(|r| self.predict_proba_row(r)).collect()
    }

    /// Split gain per feature, normalised to sum to 1 (all zeros if no splits).
    pub fn feature_importance(&self) -> Vec<f64> {
        let total: f64 = self.feature_gain.iter().sum();
        if total <= 0.0 {
            return vec![0.0; self.feature_gain.len()];
        }
        self.feature_gain.iter().map(|g| g / total).collect()
    }
}

pub fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}
