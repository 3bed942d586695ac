//! Feature assembly: the enumerated model input vector.
//!
//! RULE: Training and the client scorer both build vectors through
//! `assemble_vector`. The column order below is the exported contract;
//! append only.

use super::encoding::Encoding;
use crate::{
    dataset::{Dataset, DatasetRow},
    error::{PipelineError, PipelineResult},
    features::GAP_SENTINEL_MINUTES,
};
use ndarray::Array2;

pub const BASE_FEATURE_COUNT: usize = 14;

pub const BASE_FEATURES: [&str; BASE_FEATURE_COUNT] = [
    "hour",
    "day_of_week",
    "day_of_month",
    "is_late_night",
    "is_end_of_month",
    "is_weekend",
    "spending_velocity",
    "gap_normalized",
    "category_switch_count",
    "mood_proxy_score",
    "spend_ratio",
    "category_encoded",
    "archetype_encoded",
    "hour_bucket",
];

/// Column appended by the anomaly enrichment stage.
pub const ANOMALY_FEATURE: &str = "anomaly_score";

/// Full model input order: base features, then the anomaly score.
pub fn feature_names() -> Vec<String> {
    BASE_FEATURES
        .iter()
        .chain(std::iter::once(&ANOMALY_FEATURE))
        .map(|s| s.to_string())
        .collect()
}

/// The raw inputs one feature vector is built from.
#[derive(Debug, Clone, Copy)]
pub struct FeatureSource<'a> {
    pub hour: u32,
    pub day_of_week: u32,
    pub day_of_month: u32,
    pub is_late_night: bool,
    pub is_end_of_month: bool,
    pub is_weekend: bool,
    pub spending_velocity: u32,
    pub transaction_gap_minutes: f64,
    pub category_switch_count: u32,
    pub mood_proxy_score: f64,
    pub amount: f64,
    pub avg_user_spend: f64,
    pub category: &'a str,
    pub archetype: &'a str,
}

impl<'a> From<&'a DatasetRow> for FeatureSource<'a> {
    fn from(row: &'a DatasetRow) -> Self {
        Self {
            hour: row.hour,
            day_of_week: row.day_of_week,
            day_of_month: row.day_of_month,
            is_late_night: row.is_late_night == 1,
            is_end_of_month: row.is_end_of_month == 1,
            is_weekend: row.is_weekend == 1,
            spending_velocity: row.spending_velocity,
            transaction_gap_minutes: row.transaction_gap_minutes,
            category_switch_count: row.category_switch_count,
            mood_proxy_score: row.mood_proxy_score,
            amount: row.amount,
            avg_user_spend: row.avg_user_spend,
            category: &row.category,
            archetype: &row.archetype,
        }
    }
}

/// 0: night/early morning, 1: morning, 2: afternoon, 3: evening.
pub fn hour_bucket(hour: u32) -> u32 {
    match hour {
        0..=6 => 0,
        7..=12 => 1,
        13..=18 => 2,
        _ => 3,
    }
}

pub fn gap_normalized(gap_minutes: f64) -> f64 {
    gap_minutes.min(GAP_SENTINEL_MINUTES) / GAP_SENTINEL_MINUTES
}

pub fn assemble_vector(
    src: &FeatureSource<'_>,
    categories: &Encoding,
    archetypes: &Encoding,
) -> PipelineResult<[f64; BASE_FEATURE_COUNT]> {
    let flag = |b: bool| if b { 1.0 } else { 0.0 };
    Ok([
        f64::from(src.hour),
        f64::from(src.day_of_week),
        f64::from(src.day_of_month),
        flag(src.is_late_night),
        flag(src.is_end_of_month),
        flag(src.is_weekend),
        f64::from(src.spending_velocity),
        gap_normalized(src.transaction_gap_minutes),
        f64::from(src.category_switch_count),
        src.mood_proxy_score,
        src.amount / src.avg_user_spend,
        f64::from(categories.encode(src.category)?),
        f64::from(archetypes.encode(src.archetype)?),
        f64::from(hour_bucket(src.hour)),
    ])
}

pub fn assemble_matrix(
    dataset: &Dataset,
    categories: &Encoding,
    archetypes: &Encoding,
) -> PipelineResult<Array2<f64>> {
    let mut data = Vec::with_capacity(dataset.len() * BASE_FEATURE_COUNT);
    for row in &dataset.rows {
        data.extend_from_slice(&assemble_vector(&FeatureSource::from(row), categories, archetypes)?);
    }
    Array2::from_shape_vec((dataset.len(), BASE_FEATURE_COUNT), data)
        .map_err(|e| PipelineError::DataQuality(format!("feature matrix shape: {e}")))
}

pub fn labels(dataset: &Dataset) -> Vec<u8> {
    dataset.rows.iter().map(|r| r.impulse_label).collect()
}

/// Reject NaN/Inf anywhere in the matrix.
pub fn ensure_finite(x: &Array2<f64>, stage: &str) -> PipelineResult<()> {
    if let Some(((row, col), v)) = x.indexed_iter().find(|(_, v)| !v.is_finite()) {
        return Err(PipelineError::DataQuality(format!(
            "{stage}: non-finite value {v} at row {row}, column {col}"
        )));
    }
    Ok(())
}
