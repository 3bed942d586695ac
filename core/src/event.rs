//! Pipeline event log: one record per completed stage.
//!
//! RULE: Variants are appended, never removed or reordered.
//! Payloads are stored verbatim in the run store's event_log table.

use crate::types::RunId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    DatasetGenerated {
        seed: u64,
        rows: usize,
        users: usize,
        positives: usize,
    },
    AnomalyScored {
        rows: usize,
        outliers: usize,
        anomaly_rate: f64,
    },
    SplitCompleted {
        train_rows: usize,
        test_rows: usize,
        scale_pos_weight: f64,
    },
    ClassifierTrained {
        trees: usize,
        precision: f64,
        recall: f64,
        f1: f64,
        roc_auc: f64,
    },
    ModelDistilled {
        epochs: usize,
        validation_loss: f64,
        mean_abs_diff: f64,
        decision_agreement: f64,
    },
    ModelQuantized {
        layers: usize,
        bytes: usize,
    },
    ArtifactsExported {
        directory: String,
        files: usize,
    },
}

impl PipelineEvent {
    /// Stable name for the event_type column.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::DatasetGenerated { .. } => "dataset_generated",
            Self::AnomalyScored { .. } => "anomaly_scored",
            Self::SplitCompleted { .. } => "split_completed",
            Self::ClassifierTrained { .. } => "classifier_trained",
            Self::ModelDistilled { .. } => "model_distilled",
            Self::ModelQuantized { .. } => "model_quantized",
            Self::ArtifactsExported { .. } => "artifacts_exported",
        }
    }

    /// The pipeline stage that emits this event.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::DatasetGenerated { .. } => "generate",
            Self::AnomalyScored { .. } => "anomaly",
            Self::SplitCompleted { .. } => "split",
            Self::ClassifierTrained { .. } => "classifier",
            Self::ModelDistilled { .. } => "distill",
            Self::ModelQuantized { .. } => "quantize",
            Self::ArtifactsExported { .. } => "export",
        }
    }
}

/// A persisted event row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: Option<i64>,
    pub run_id: RunId,
    pub stage: String,
    pub event_type: String,
    pub payload: String,
}

impl EventLogEntry {
    pub fn from_event(run_id: &str, event: &PipelineEvent) -> serde_json::Result<Self> {
        Ok(Self {
            id: None,
            run_id: run_id.to_string(),
            stage: event.stage().to_string(),
            event_type: event.type_name().to_string(),
            payload: serde_json::to_string(event)?,
        })
    }
}
