//! Streaming feature extractor: rolling behavioural aggregates per user.
//!
//! RULE: The extractor is strictly causal. It only looks at transactions
//! of the same user that it has already observed, in time order.
//! Out-of-order input is a GenerationInvariant error; the extractor
//! never re-sorts.

use crate::{
    error::{PipelineError, PipelineResult},
    generator::{round_to, RawTransaction},
    rng::StreamRng,
    types::{Timestamp, UserId},
};
use chrono::{Datelike, Duration, Timelike};
use std::collections::{BTreeSet, VecDeque};

pub const VELOCITY_WINDOW_MINUTES: i64 = 120;
pub const SWITCH_WINDOW_MINUTES: i64 = 60;
/// Prior transactions considered for the category-switch count.
pub const SWITCH_LOOKBACK: usize = 10;
/// Gap assigned to a user's first transaction.
pub const GAP_SENTINEL_MINUTES: f64 = 999.0;

pub const MOOD_LATE_NIGHT_WEIGHT: f64 = 0.4;
pub const MOOD_WEEKEND_WEIGHT: f64 = 0.3;
pub const MOOD_IMPULSE_WEIGHT: f64 = 0.3;
pub const MOOD_NOISE_MAX: f64 = 0.2;

#[derive(Debug, Clone, PartialEq)]
pub struct DerivedFeatures {
    pub hour: u32,
    /// Monday = 0.
    pub day_of_week: u32,
    pub day_of_month: u32,
    pub is_late_night: bool,
    pub is_end_of_month: bool,
    pub is_weekend: bool,
    pub spending_velocity: u32,
    pub transaction_gap_minutes: f64,
    pub category_switch_count: u32,
    pub mood_proxy_score: f64,
}

pub fn is_late_night(hour: u32) -> bool {
    hour >= 23 || hour <= 3
}

pub fn is_end_of_month(day: u32) -> bool {
    day >= 26
}

pub fn is_weekend(ts: &Timestamp) -> bool {
    ts.weekday().num_days_from_monday() >= 5
}

/// Per-user rolling state. One extractor per user; never shared.
pub struct FeatureExtractor {
    user_id: UserId,
    last_seen: Option<Timestamp>,
    /// Prior timestamps inside the velocity window.
    velocity_window: VecDeque<Timestamp>,
    /// Most recent prior (timestamp, category) pairs, newest at the back.
    recent_categories: VecDeque<(Timestamp, String)>,
}

impl FeatureExtractor {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            last_seen: None,
            velocity_window: VecDeque::new(),
            recent_categories: VecDeque::with_capacity(SWITCH_LOOKBACK + 1),
        }
    }

    /// Compute the derived features of the next transaction in time order.
    pub fn observe(&mut self, txn: &RawTransaction, rng: &mut StreamRng) -> PipelineResult<DerivedFeatures> {
        let ts = txn.timestamp;
        if let Some(prev) = self.last_seen {
            if ts < prev {
                return Err(PipelineError::GenerationInvariant {
                    user_id: self.user_id.clone(),
                    detail: format!("transaction at {ts} arrived after {prev}"),
                });
            }
        }

        // Velocity: prior transactions in [ts - 2h, ts).
        let velocity_start = ts - Duration::minutes(VELOCITY_WINDOW_MINUTES);
        while self.velocity_window.front().is_some_and(|t| *t < velocity_start) {
            self.velocity_window.pop_front();
        }
        let spending_velocity = self.velocity_window.iter().filter(|t| **t < ts).count() as u32;

        let transaction_gap_minutes = match self.last_seen {
            Some(prev) => round_to((ts - prev).num_seconds() as f64 / 60.0, 2),
            None => GAP_SENTINEL_MINUTES,
        };

        // Category switches: current plus recent same-user categories within 1h.
        let switch_start = ts - Duration::minutes(SWITCH_WINDOW_MINUTES);
        let mut distinct: BTreeSet<&str> = self
            .recent_categories
            .iter()
            .filter(|(t, _)| *t >= switch_start)
            .map(|(_, c)| c.as_str())
            .collect();
        distinct.insert(txn.category.as_str());
        let category_switch_count = distinct.len() as u32;

        let hour = ts.hour();
        let day_of_month = ts.day();
        let late_night = is_late_night(hour);
        let weekend = is_weekend(&ts);
        let mood_proxy_score = round_to(
            MOOD_LATE_NIGHT_WEIGHT * f64::from(u8::from(late_night))
                + MOOD_WEEKEND_WEIGHT * f64::from(u8::from(weekend))
                + MOOD_IMPULSE_WEIGHT * f64::from(u8::from(txn.impulse_prone))
                + rng.uniform(0.0, MOOD_NOISE_MAX),
            3,
        );

        self.last_seen = Some(ts);
        self.velocity_window.push_back(ts);
        self.recent_categories.push_back((ts, txn.category.clone()));
        if self.recent_categories.len() > SWITCH_LOOKBACK {
            self.recent_categories.pop_front();
        }

        Ok(DerivedFeatures {
            hour,
            day_of_week: ts.weekday().num_days_from_monday(),
            day_of_month,
            is_late_night: late_night,
            is_end_of_month: is_end_of_month(day_of_month),
            is_weekend: weekend,
            spending_velocity,
            transaction_gap_minutes,
            category_switch_count,
            mood_proxy_score,
        })
    }
}

/// Run a fresh extractor over one user's sorted sequence.
pub fn extract_user(
    user_id: &str,
    txns: &[RawTransaction],
    rng: &mut StreamRng,
) -> PipelineResult<Vec<DerivedFeatures>> {
    let mut extractor = FeatureExtractor::new(user_id.to_string());
    txns.iter().map(|t| extractor.observe(t, rng)).collect()
}
