//! Label assigner: the generation-time ground truth.
//!
//! The heuristic score is never exposed as a model feature; only the
//! binarised label leaves this module.

use crate::{
    archetype::{Archetype, LabelBonus},
    config::LabelConfig,
    features::DerivedFeatures,
    rng::StreamRng,
};

/// Everything the heuristic looks at for one transaction.
#[derive(Debug, Clone, Copy)]
pub struct LabelInput<'a> {
    pub archetype: &'a Archetype,
    pub features: &'a DerivedFeatures,
    pub impulse_prone: bool,
    pub amount: f64,
    pub avg_user_spend: f64,
}

pub struct LabelAssigner<'a> {
    config: &'a LabelConfig,
}

impl<'a> LabelAssigner<'a> {
    pub fn new(config: &'a LabelConfig) -> Self {
        Self { config }
    }

    /// Weighted sum of satisfied conditions, without noise.
    pub fn deterministic_score(&self, input: &LabelInput<'_>) -> f64 {
        let c = self.config;
        let f = input.features;
        let mut score = 0.0;

        if f.is_late_night {
            score += c.late_night_points;
        }
        if f.is_end_of_month {
            score += c.end_of_month_points;
        }
        if input.impulse_prone {
            score += c.impulse_category_points;
        }
        if f.spending_velocity >= c.velocity_threshold {
            score += c.velocity_points;
        }
        if f.category_switch_count >= c.switch_threshold {
            score += c.switch_points;
        }
        if input.amount > input.avg_user_spend * c.amount_ratio_threshold {
            score += c.amount_points;
        }
        if f.transaction_gap_minutes < c.gap_threshold_minutes {
            score += c.gap_points;
        }
        score + archetype_bonus(input.archetype, f)
    }

    pub fn binarize(&self, score: f64) -> u8 {
        u8::from(score >= self.config.cutoff)
    }

    /// Score, add Gaussian noise, binarise.
    pub fn assign(&self, input: &LabelInput<'_>, rng: &mut StreamRng) -> u8 {
        let noisy = self.deterministic_score(input) + rng.normal(0.0, self.config.noise_std);
        self.binarize(noisy)
    }
}

fn archetype_bonus(archetype: &Archetype, f: &DerivedFeatures) -> f64 {
    match archetype.bonus {
        LabelBonus::None => 0.0,
        LabelBonus::LateNight { points } if f.is_late_night => points,
        LabelBonus::EndOfMonth { points } if f.is_end_of_month => points,
        LabelBonus::HighVelocity { min_velocity, points } if f.spending_velocity >= min_velocity => points,
        _ => 0.0,
    }
}
