//! Stratified train/test partitioning.

use crate::{
    error::{PipelineError, PipelineResult},
    rng::StreamRng,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainTestSplit {
    /// Row indices, ascending.
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Split each label class separately so both partitions keep the class ratio.
pub fn stratified_split(labels: &[u8], test_fraction: f64, rng: &mut StreamRng) -> PipelineResult<TrainTestSplit> {
    let mut by_class: [Vec<usize>; 2] = [Vec::new(), Vec::new()];
    for (i, label) in labels.iter().enumerate() {
        match label {
            0 | 1 => by_class[usize::from(*label)].push(i),
            other => {
                return Err(PipelineError::DataQuality(format!(
                    "label {other} at row {i} is not binary"
                )))
            }
        }
    }
    for (class, rows) in by_class.iter().enumerate() {
        if rows.len() < 2 {
            return Err(PipelineError::DataQuality(format!(
                "label class {class} has {} rows; a stratified split needs at least 2",
                rows.len()
            )));
        }
    }

    let mut train = Vec::new();
    let mut test = Vec::new();
    for rows in by_class.iter_mut() {
        rng.shuffle(rows);
        let n_test = ((rows.len() as f64 * test_fraction).round() as usize).clamp(1, rows.len() - 1);
        test.extend_from_slice(&rows[..n_test]);
        train.extend_from_slice(&rows[n_test..]);
    }
    train.sort_unstable();
    test.sort_unstable();

    if train.is_empty() || test.is_empty() {
        return Err(PipelineError::DataQuality("empty train or test partition".into()));
    }
    Ok(TrainTestSplit { train, test })
}
