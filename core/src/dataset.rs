//! Dataset assembly: generator, extractor and labeller wired per user,
//! plus the flat CSV file the trainer reads.
//!
//! RULE: A DatasetRow is only built once every derived field and the
//! label are known. There is no partially filled row type.

use crate::{
    archetype::ArchetypeRegistry,
    config::PipelineConfig,
    error::{PipelineError, PipelineResult},
    features::FeatureExtractor,
    generator::EventGenerator,
    labels::{LabelAssigner, LabelInput},
    rng::RngBank,
    types::TIMESTAMP_FORMAT,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRow {
    pub user_id: String,
    pub archetype: String,
    pub timestamp: String,
    pub hour: u32,
    pub day_of_week: u32,
    pub day_of_month: u32,
    pub category: String,
    pub amount: f64,
    pub avg_user_spend: f64,
    pub is_late_night: u8,
    pub is_end_of_month: u8,
    pub is_weekend: u8,
    pub spending_velocity: u32,
    pub transaction_gap_minutes: f64,
    pub category_switch_count: u32,
    pub mood_proxy_score: f64,
    pub impulse_label: u8,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub rows: Vec<DatasetRow>,
}

impl Dataset {
    /// Generate the full labelled dataset for `seed`.
    /// Users are produced in index order, each from its own RNG stream.
    pub fn generate(config: &PipelineConfig, seed: u64) -> PipelineResult<Self> {
        let registry = ArchetypeRegistry::new(config.generator.archetypes.clone())?;
        let generator = EventGenerator::new(&config.generator, &registry)?;
        let labeller = LabelAssigner::new(&config.labels);
        let bank = RngBank::new(seed);

        let mut rows =
            Vec::with_capacity(config.generator.num_users * config.generator.transactions_per_user);
        for index in 0..config.generator.num_users {
            rows.extend(generate_user_rows(index, &generator, &labeller, &bank)?);
        }

        let dataset = Self { rows };
        let (negatives, positives) = dataset.label_counts();
        log::info!(
            "dataset: generated {} rows for {} users (label 0={negatives}, 1={positives})",
            dataset.len(),
            config.generator.num_users
        );
        Ok(dataset)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Distinct users present in the rows.
    pub fn user_count(&self) -> usize {
        self.rows
            .iter()
            .map(|r| r.user_id.as_str())
            .collect::<std::collections::BTreeSet<_>>()
            .len()
    }

    /// (negatives, positives)
    pub fn label_counts(&self) -> (usize, usize) {
        let positives = self.rows.iter().filter(|r| r.impulse_label == 1).count();
        (self.rows.len() - positives, positives)
    }

    /// Rows per archetype, keyed by name.
    pub fn archetype_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for row in &self.rows {
            *counts.entry(row.archetype.clone()).or_insert(0) += 1;
        }
        counts
    }

    pub fn write_csv(&self, path: &Path) -> PipelineResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_path(path)?;
        for row in &self.rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        log::info!("dataset: wrote {} rows to {}", self.len(), path.display());
        Ok(())
    }

    /// Serialised CSV bytes, header included.
    pub fn to_csv_bytes(&self) -> PipelineResult<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        for row in &self.rows {
            writer.serialize(row)?;
        }
        writer
            .into_inner()
            .map_err(|e| PipelineError::Io(e.into_error()))
    }

    pub fn read_csv(path: &Path) -> PipelineResult<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let rows = reader
            .deserialize()
            .collect::<Result<Vec<DatasetRow>, _>>()?;
        log::debug!("dataset: read {} rows from {}", rows.len(), path.display());
        Ok(Self { rows })
    }
}

/// Generate, extract and label one user's rows from that user's own stream.
pub fn generate_user_rows(
    index: usize,
    generator: &EventGenerator<'_>,
    labeller: &LabelAssigner<'_>,
    bank: &RngBank,
) -> PipelineResult<Vec<DatasetRow>> {
    let mut rng = bank.for_user(index);
    let (user, txns) = generator.generate_user(index, &mut rng)?;
    let mut extractor = FeatureExtractor::new(user.user_id.clone());

    let mut rows = Vec::with_capacity(txns.len());
    for txn in &txns {
        let features = extractor.observe(txn, &mut rng)?;
        let label = labeller.assign(
            &LabelInput {
                archetype: &user.archetype,
                features: &features,
                impulse_prone: txn.impulse_prone,
                amount: txn.amount,
                avg_user_spend: user.avg_spend,
            },
            &mut rng,
        );
        rows.push(DatasetRow {
            user_id: user.user_id.clone(),
            archetype: user.archetype.name.clone(),
            timestamp: txn.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            hour: features.hour,
            day_of_week: features.day_of_week,
            day_of_month: features.day_of_month,
            category: txn.category.clone(),
            amount: txn.amount,
            avg_user_spend: user.avg_spend,
            is_late_night: u8::from(features.is_late_night),
            is_end_of_month: u8::from(features.is_end_of_month),
            is_weekend: u8::from(features.is_weekend),
            spending_velocity: features.spending_velocity,
            transaction_gap_minutes: features.transaction_gap_minutes,
            category_switch_count: features.category_switch_count,
            mood_proxy_score: features.mood_proxy_score,
            impulse_label: label,
        });
    }
    log::debug!(
        "user {}: archetype={} avg_spend={:.2} rows={}",
        user.user_id,
        user.archetype.name,
        user.avg_spend,
        rows.len()
    );
    Ok(rows)
}
