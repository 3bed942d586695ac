//! Reference client-side scorer.
//!
//! Reproduces a prediction from exported artifacts alone: the enumerated
//! base vector, the anomaly column, normalisation, then the quantised
//! model. Behavioural aggregates (velocity, gap, switches, mood) are
//! supplied by the caller, as an on-device extractor would compute them.

use crate::{
    dataset::DatasetRow,
    error::{PipelineError, PipelineResult},
    export::{load_artifacts, ExportedArtifacts},
    features::{is_end_of_month, is_late_night, is_weekend},
    training::{
        assembly::{assemble_vector, FeatureSource},
        encoding::Encoding,
        isolation_forest::IsolationForest,
        quantize::QuantizedModel,
        scaler::StandardScaler,
        TrainedArtifacts,
    },
    types::{Timestamp, TIMESTAMP_FORMAT},
};
use chrono::{Datelike, Timelike};
use ndarray::ArrayView1;
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub struct ScoringRequest {
    pub timestamp: Timestamp,
    pub category: String,
    pub amount: f64,
    pub avg_user_spend: f64,
    pub archetype: String,
    pub spending_velocity: u32,
    pub transaction_gap_minutes: f64,
    pub category_switch_count: u32,
    pub mood_proxy_score: f64,
}

impl ScoringRequest {
    /// Rebuild the request a client would have sent for a dataset row.
    pub fn from_row(row: &DatasetRow) -> PipelineResult<Self> {
        let timestamp = Timestamp::parse_from_str(&row.timestamp, TIMESTAMP_FORMAT).map_err(|e| {
            PipelineError::DataQuality(format!("timestamp '{}': {e}", row.timestamp))
        })?;
        Ok(Self {
            timestamp,
            category: row.category.clone(),
            amount: row.amount,
            avg_user_spend: row.avg_user_spend,
            archetype: row.archetype.clone(),
            spending_velocity: row.spending_velocity,
            transaction_gap_minutes: row.transaction_gap_minutes,
            category_switch_count: row.category_switch_count,
            mood_proxy_score: row.mood_proxy_score,
        })
    }
}

pub struct ClientScorer {
    categories: Encoding,
    archetypes: Encoding,
    forest: IsolationForest,
    scaler: StandardScaler,
    model: QuantizedModel,
}

impl ClientScorer {
    pub fn from_artifacts(artifacts: &TrainedArtifacts) -> Self {
        Self {
            categories: artifacts.categories.clone(),
            archetypes: artifacts.archetypes.clone(),
            forest: artifacts.forest.clone(),
            scaler: artifacts.scaler.clone(),
            model: artifacts.quantized.clone(),
        }
    }

    pub fn from_exported(exported: ExportedArtifacts) -> Self {
        Self {
            categories: exported.categories,
            archetypes: exported.archetypes,
            forest: exported.forest,
            scaler: exported.scaler,
            model: exported.model,
        }
    }

    pub fn load(dir: &Path) -> PipelineResult<Self> {
        Ok(Self::from_exported(load_artifacts(dir)?))
    }

    /// Normalised feature vector, anomaly score last.
    pub fn feature_vector(&self, request: &ScoringRequest) -> PipelineResult<Vec<f64>> {
        if !request.avg_user_spend.is_finite() || request.avg_user_spend <= 0.0 || !request.amount.is_finite() {
            return Err(PipelineError::DataQuality(format!(
                "amount {} / average spend {} cannot form a spend ratio",
                request.amount, request.avg_user_spend
            )));
        }
        if !request.transaction_gap_minutes.is_finite() || request.transaction_gap_minutes < 0.0 {
            return Err(PipelineError::DataQuality(format!(
                "transaction gap {} must be a finite, non-negative number of minutes",
                request.transaction_gap_minutes
            )));
        }
        let hour = request.timestamp.hour();
        let day = request.timestamp.day();
        let source = FeatureSource {
            hour,
            day_of_week: request.timestamp.weekday().num_days_from_monday(),
            day_of_month: day,
            is_late_night: is_late_night(hour),
            is_end_of_month: is_end_of_month(day),
            is_weekend: is_weekend(&request.timestamp),
            spending_velocity: request.spending_velocity,
            transaction_gap_minutes: request.transaction_gap_minutes,
            category_switch_count: request.category_switch_count,
            mood_proxy_score: request.mood_proxy_score,
            amount: request.amount,
            avg_user_spend: request.avg_user_spend,
            category: &request.category,
            archetype: &request.archetype,
        };
        let base = assemble_vector(&source, &self.categories, &self.archetypes)?;
        let anomaly = self.forest.decision_row(ArrayView1::from(&base[..]));

        let mut vector = base.to_vec();
        vector.push(anomaly);
        if let Some((j, v)) = vector.iter().enumerate().find(|(_, v)| !v.is_finite()) {
            return Err(PipelineError::DataQuality(format!(
                "scoring: non-finite value {v} in feature {j}"
            )));
        }
        self.scaler.transform_row(&mut vector);
        Ok(vector)
    }

    /// Impulse probability in [0, 1].
    pub fn score(&self, request: &ScoringRequest) -> PipelineResult<f64> {
        let vector = self.feature_vector(request)?;
        let input: Vec<f32> = vector.iter().map(|v| *v as f32).collect();
        let p = self.model.predict(&input)?;
        Ok(f64::from(p).clamp(0.0, 1.0))
    }
}
