use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Generation invariant violated for user {user_id}: {detail}")]
    GenerationInvariant { user_id: String, detail: String },

    #[error("Data quality error: {0}")]
    DataQuality(String),

    #[error("Encoding error: no {kind} encoding for '{value}'")]
    Encoding { kind: &'static str, value: String },

    #[error("Model format error: {0}")]
    ModelFormat(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Dataset file error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
