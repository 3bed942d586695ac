//! The training pipeline and the models it produces.

pub mod assembly;
pub mod boosting;
pub mod distill;
pub mod encoding;
pub mod isolation_forest;
pub mod metrics;
pub mod pipeline;
pub mod quantize;
pub mod scaler;
pub mod split;

pub use pipeline::{TrainedArtifacts, TrainingPipeline, TrainingReport};
