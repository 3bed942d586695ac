//! Event generator: turns an archetype into a raw transaction stream.
//!
//! RULE: Each user's sequence is fully generated, then sorted by
//! timestamp, before anything downstream sees it. The feature
//! extractor relies on that ordering and will refuse anything else.

use crate::{
    archetype::{Archetype, ArchetypeRegistry},
    config::GeneratorConfig,
    error::{PipelineError, PipelineResult},
    rng::StreamRng,
    types::{user_id, Timestamp, UserId},
};
use chrono::{Datelike, Duration, NaiveDate};

/// Days between consecutive synthetic month anchors.
pub const DAYS_PER_MONTH_BLOCK: i64 = 30;

#[derive(Debug, Clone)]
pub struct SyntheticUser {
    pub index: usize,
    pub user_id: UserId,
    pub archetype: Archetype,
    /// Baseline spend, rounded to cents. Fixed for the user's lifetime.
    pub avg_spend: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawTransaction {
    pub timestamp: Timestamp,
    pub category: String,
    pub impulse_prone: bool,
    pub amount: f64,
}

pub struct EventGenerator<'a> {
    config: &'a GeneratorConfig,
    registry: &'a ArchetypeRegistry,
}

impl<'a> EventGenerator<'a> {
    pub fn new(config: &'a GeneratorConfig, registry: &'a ArchetypeRegistry) -> PipelineResult<Self> {
        config.validate()?;
        Ok(Self { config, registry })
    }

    /// Draw a user's archetype and baseline spend.
    pub fn spawn_user(&self, index: usize, rng: &mut StreamRng) -> SyntheticUser {
        let archetype = self.registry.pick(rng).clone();
        let avg_spend = round_to(rng.uniform(self.config.avg_spend_min, self.config.avg_spend_max), 2);
        SyntheticUser {
            index,
            user_id: user_id(index),
            archetype,
            avg_spend,
        }
    }

    /// Produce the user's full transaction sequence, sorted by timestamp.
    pub fn generate_transactions(
        &self,
        user: &SyntheticUser,
        rng: &mut StreamRng,
    ) -> PipelineResult<Vec<RawTransaction>> {
        let n = self.config.transactions_per_user;
        let mut txns = Vec::with_capacity(n);

        for _ in 0..n {
            let month_offset = rng.next_u64_below(u64::from(self.config.month_span)) as i64;
            let anchor = self.config.base_date + Duration::days(DAYS_PER_MONTH_BLOCK * month_offset);
            let timestamp = self.generate_timestamp(&user.archetype, anchor, rng)?;

            let category = rng.choose(&self.config.categories).ok_or_else(|| {
                PipelineError::Configuration("category vocabulary is empty".into())
            })?;
            let (lo, hi) = if category.impulse_prone {
                self.config.impulse_amount_multiplier
            } else {
                self.config.regular_amount_multiplier
            };
            let amount = round_to(rng.uniform(user.avg_spend * lo, user.avg_spend * hi), 2);

            txns.push(RawTransaction {
                timestamp,
                category: category.name.clone(),
                impulse_prone: category.impulse_prone,
                amount,
            });
        }

        // Stable: equal timestamps keep generation order.
        txns.sort_by_key(|t| t.timestamp);
        Ok(txns)
    }

    /// Place one transaction inside the month anchored at `anchor`.
    pub fn generate_timestamp(
        &self,
        archetype: &Archetype,
        anchor: NaiveDate,
        rng: &mut StreamRng,
    ) -> PipelineResult<Timestamp> {
        let cfg = self.config;
        let is_late_night = rng.chance(archetype.late_night_prob);
        let is_eom = rng.chance(archetype.eom_prob);

        let (d_lo, d_hi) = if is_eom {
            cfg.end_of_month_days
        } else {
            cfg.regular_days
        };
        let day = rng.int_inclusive(d_lo, d_hi);

        let hour = if is_late_night {
            *rng.choose(&cfg.late_night_hours).ok_or_else(|| {
                PipelineError::Configuration("late_night_hours is empty".into())
            })?
        } else {
            rng.int_inclusive(cfg.daytime_hours.0, cfg.daytime_hours.1)
        };
        let minute = rng.int_inclusive(0, 59);

        let date = NaiveDate::from_ymd_opt(anchor.year(), anchor.month(), day)
            .or_else(|| NaiveDate::from_ymd_opt(anchor.year(), anchor.month(), cfg.fallback_day))
            .ok_or_else(|| {
                PipelineError::Configuration(format!(
                    "fallback day {} does not exist in {}",
                    cfg.fallback_day, anchor
                ))
            })?;
        date.and_hms_opt(hour, minute, 0).ok_or_else(|| {
            PipelineError::Configuration(format!("invalid time of day {hour:02}:{minute:02}"))
        })
    }

    /// Spawn a user and generate their sorted sequence in one call.
    pub fn generate_user(
        &self,
        index: usize,
        rng: &mut StreamRng,
    ) -> PipelineResult<(SyntheticUser, Vec<RawTransaction>)> {
        let user = self.spawn_user(index, rng);
        let txns = self.generate_transactions(&user, rng)?;
        Ok((user, txns))
    }
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
