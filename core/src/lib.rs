//! impulse-core: synthetic impulse-spending dataset generation and the
//! tiered model training pipeline.

pub mod archetype;
pub mod config;
pub mod dataset;
pub mod error;
pub mod event;
pub mod export;
pub mod features;
pub mod generator;
pub mod labels;
pub mod rng;
pub mod scorer;
pub mod store;
pub mod training;
pub mod types;
