//! Isolation forest: the unsupervised anomaly tier.
//!
//! Scores follow the usual convention: `score_samples` is the negated
//! anomaly score (higher = more normal), and `decision_function` shifts
//! it by the contamination quantile so that outliers are negative.

use super::metrics::quantile;
use crate::{
    config::AnomalyConfig,
    error::{PipelineError, PipelineResult},
    rng::StreamRng,
};
use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "node", rename_all = "snake_case")]
enum IsoNode {
    Leaf { size: usize },
    Split { feature: usize, threshold: f64, left: usize, right: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IsolationTree {
    nodes: Vec<IsoNode>,
}

impl IsolationTree {
    fn grow(x: &Array2<f64>, sample: Vec<usize>, height_limit: usize, rng: &mut StreamRng) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.build(x, sample, 0, height_limit, rng);
        tree
    }

    /// Build the subtree for `rows`, returning its node index.
    fn build(
        &mut self,
        x: &Array2<f64>,
        rows: Vec<usize>,
        depth: usize,
        height_limit: usize,
        rng: &mut StreamRng,
    ) -> usize {
        let id = self.nodes.len();
        self.nodes.push(IsoNode::Leaf { size: rows.len() });
        if depth >= height_limit || rows.len() <= 1 {
            return id;
        }

        // Random feature; retry others if the first is constant on this node.
        let n_features = x.ncols();
        let start = rng.next_u64_below(n_features as u64) as usize;
        let mut chosen = None;
        for offset in 0..n_features {
            let feature = (start + offset) % n_features;
            let (lo, hi) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &r| {
                let v = x[[r, feature]];
                (lo.min(v), hi.max(v))
            });
            if hi > lo {
                chosen = Some((feature, lo, hi));
                break;
            }
        }
        let Some((feature, lo, hi)) = chosen else {
            return id;
        };

        let threshold = rng.uniform(lo, hi);
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
            rows.into_iter().partition(|&r| x[[r, feature]] < threshold);
        let left = self.build(x, left_rows, depth + 1, height_limit, rng);
        let right = self.build(x, right_rows, depth + 1, height_limit, rng);
        self.nodes[id] = IsoNode::Split {
            feature,
            threshold,
            left,
            right,
        };
        id
    }

    fn path_length(&self, row: ArrayView1<f64>) -> f64 {
        let mut idx = 0;
        let mut depth = 0.0;
        loop {
            match &self.nodes[idx] {
                IsoNode::Leaf { size } => return depth + average_path_length(*size),
                IsoNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] < *threshold { *left } else { *right };
                    depth += 1.0;
                }
            }
        }
    }
}

/// Expected path length of an unsuccessful BST search over n points.
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    sample_size: usize,
    n_features: usize,
    contamination: f64,
    /// Raw score at the contamination quantile of the training data.
    offset: f64,
}

impl IsolationForest {
    pub fn fit(x: &Array2<f64>, config: &AnomalyConfig, rng: &mut StreamRng) -> PipelineResult<Self> {
        let n = x.nrows();
        if n < 2 || x.ncols() == 0 {
            return Err(PipelineError::DataQuality(format!(
                "anomaly forest needs at least 2 rows and 1 feature, got {n}x{}",
                x.ncols()
            )));
        }
        let sample_size = config.max_samples.min(n);
        let height_limit = (sample_size as f64).log2().ceil() as usize;

        let mut all_rows: Vec<usize> = (0..n).collect();
        let trees = (0..config.n_trees)
            .map(|_| {
                // Partial Fisher-Yates: the first sample_size entries are the draw.
                for i in 0..sample_size {
                    let j = i + rng.next_u64_below((n - i) as u64) as usize;
                    all_rows.swap(i, j);
                }
                IsolationTree::grow(x, all_rows[..sample_size].to_vec(), height_limit, rng)
            })
            .collect();

        let mut forest = Self {
            trees,
            sample_size,
            n_features: x.ncols(),
            contamination: config.contamination,
            offset: 0.0,
        };
        let train_scores = forest.score_samples(x);
        forest.offset = quantile(&train_scores.to_vec(), config.contamination);
        log::debug!(
            "anomaly forest: {} trees, sample_size={}, offset={:.4}",
            forest.trees.len(),
            sample_size,
            forest.offset
        );
        Ok(forest)
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Negated anomaly score of one row, in [-1, 0).
    pub fn score_row(&self, row: ArrayView1<f64>) -> f64 {
        let mean_path =
            self.trees.iter().map(|t| t.path_length(row)).sum::<f64>() / self.trees.len() as f64;
        -(2f64.powf(-mean_path / average_path_length(self.sample_size)))
    }

    pub fn score_samples(&self, x: &Array2<f64>) -> Array1<f64> {
        x.rows().into_iter().map(|r| self.score_row(r)).collect()
    }

    /// Shifted score: negative for outliers.
    pub fn decision_row(&self, row: ArrayView1<f64>) -> f64 {
        self.score_row(row) - self.offset
    }

    pub fn decision_function(&self, x: &Array2<f64>) -> Array1<f64> {
        self.score_samples(x).mapv(|s| s - self.offset)
    }

    pub fn predict_outliers(&self, x: &Array2<f64>) -> Vec<bool> {
        self.decision_function(x).iter().map(|d| *d < 0.0).collect()
    }
}
