use crate::{
    archetype::Archetype,
    error::{PipelineError, PipelineResult},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryConfig {
    pub name: String,
    pub impulse_prone: bool,
}

impl CategoryConfig {
    fn new(name: &str, impulse_prone: bool) -> Self {
        Self {
            name: name.into(),
            impulse_prone,
        }
    }
}

// ── Event generation ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub num_users: usize,
    pub transactions_per_user: usize,
    /// First day of the synthetic calendar.
    pub base_date: NaiveDate,
    /// Transactions land in one of this many 30-day blocks after base_date.
    pub month_span: u32,
    pub avg_spend_min: f64,
    pub avg_spend_max: f64,
    pub late_night_hours: Vec<u32>,
    pub daytime_hours: (u32, u32),
    pub end_of_month_days: (u32, u32),
    pub regular_days: (u32, u32),
    /// Used when the drawn day does not exist in the target month.
    pub fallback_day: u32,
    pub impulse_amount_multiplier: (f64, f64),
    pub regular_amount_multiplier: (f64, f64),
    pub categories: Vec<CategoryConfig>,
    pub archetypes: Vec<Archetype>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            num_users: 500,
            transactions_per_user: 25,
            base_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap_or_default(),
            month_span: 6,
            avg_spend_min: 200.0,
            avg_spend_max: 2000.0,
            late_night_hours: vec![23, 0, 1, 2, 3],
            daytime_hours: (8, 22),
            end_of_month_days: (26, 30),
            regular_days: (1, 25),
            fallback_day: 28,
            impulse_amount_multiplier: (0.5, 4.0),
            regular_amount_multiplier: (0.1, 1.5),
            categories: vec![
                CategoryConfig::new("Food & Dining", false),
                CategoryConfig::new("Fashion", true),
                CategoryConfig::new("Gaming", true),
                CategoryConfig::new("Entertainment", true),
                CategoryConfig::new("Electronics", true),
                CategoryConfig::new("Grocery", false),
                CategoryConfig::new("Travel", false),
                CategoryConfig::new("Health", false),
                CategoryConfig::new("Alcohol", true),
                CategoryConfig::new("Subscriptions", false),
            ],
            archetypes: Archetype::canonical(),
        }
    }
}

impl GeneratorConfig {
    pub fn category(&self, name: &str) -> Option<&CategoryConfig> {
        self.categories.iter().find(|c| c.name == name)
    }

    pub fn validate(&self) -> PipelineResult<()> {
        let fail = |msg: String| Err(PipelineError::Configuration(msg));
        if self.num_users == 0 {
            return fail("num_users must be > 0".into());
        }
        if self.transactions_per_user == 0 {
            return fail("transactions_per_user must be > 0".into());
        }
        if self.month_span == 0 {
            return fail("month_span must be > 0".into());
        }
        if self.categories.is_empty() {
            return fail("category vocabulary is empty".into());
        }
        let mut seen = HashSet::new();
        for c in &self.categories {
            if !seen.insert(c.name.as_str()) {
                return fail(format!("duplicate category '{}'", c.name));
            }
        }
        if !(self.avg_spend_min > 0.0 && self.avg_spend_min <= self.avg_spend_max) {
            return fail(format!(
                "avg spend range [{}, {}] is invalid",
                self.avg_spend_min, self.avg_spend_max
            ));
        }
        for (label, (lo, hi)) in [
            ("impulse_amount_multiplier", self.impulse_amount_multiplier),
            ("regular_amount_multiplier", self.regular_amount_multiplier),
        ] {
            if !(lo >= 0.0 && lo <= hi) {
                return fail(format!("{label} range [{lo}, {hi}] is invalid"));
            }
        }
        if self.late_night_hours.is_empty() || self.late_night_hours.iter().any(|h| *h > 23) {
            return fail("late_night_hours must be a non-empty set of hours 0..=23".into());
        }
        let (h_lo, h_hi) = self.daytime_hours;
        if h_lo > h_hi || h_hi > 23 {
            return fail(format!("daytime hours {h_lo}..={h_hi} are invalid"));
        }
        for (label, (lo, hi)) in [
            ("end_of_month_days", self.end_of_month_days),
            ("regular_days", self.regular_days),
        ] {
            if lo == 0 || lo > hi || hi > 31 {
                return fail(format!("{label} {lo}..={hi} is invalid"));
            }
        }
        if self.fallback_day == 0 || self.fallback_day > 28 {
            return fail(format!(
                "fallback_day {} must exist in every month",
                self.fallback_day
            ));
        }
        Ok(())
    }
}

// ── Label heuristic ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelConfig {
    pub late_night_points: f64,
    pub end_of_month_points: f64,
    pub impulse_category_points: f64,
    pub velocity_threshold: u32,
    pub velocity_points: f64,
    pub switch_threshold: u32,
    pub switch_points: f64,
    /// Amount must exceed this multiple of the user's average spend.
    pub amount_ratio_threshold: f64,
    pub amount_points: f64,
    pub gap_threshold_minutes: f64,
    pub gap_points: f64,
    pub noise_std: f64,
    pub cutoff: f64,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            late_night_points: 2.0,
            end_of_month_points: 1.5,
            impulse_category_points: 2.0,
            velocity_threshold: 4,
            velocity_points: 1.5,
            switch_threshold: 3,
            switch_points: 1.0,
            amount_ratio_threshold: 2.5,
            amount_points: 2.0,
            gap_threshold_minutes: 15.0,
            gap_points: 1.0,
            noise_std: 0.5,
            cutoff: 5.0,
        }
    }
}

// ── Training ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    pub n_trees: usize,
    pub max_samples: usize,
    /// Expected fraction of outliers in the training data.
    pub contamination: f64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_samples: 256,
            contamination: 0.15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostingConfig {
    pub n_rounds: usize,
    pub max_depth: usize,
    pub learning_rate: f64,
    /// L2 regularisation on leaf weights.
    pub lambda: f64,
    pub min_child_weight: f64,
    pub max_bins: usize,
}

impl Default for BoostingConfig {
    fn default() -> Self {
        Self {
            n_rounds: 200,
            max_depth: 6,
            learning_rate: 0.1,
            lambda: 1.0,
            min_child_weight: 1.0,
            max_bins: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DistillConfig {
    pub hidden_layers: Vec<usize>,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub validation_fraction: f64,
}

impl Default for DistillConfig {
    fn default() -> Self {
        Self {
            hidden_layers: vec![64, 32, 16],
            epochs: 30,
            batch_size: 64,
            learning_rate: 0.001,
            validation_fraction: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub test_fraction: f64,
    pub anomaly: AnomalyConfig,
    pub boosting: BoostingConfig,
    pub distill: DistillConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            test_fraction: 0.2,
            anomaly: AnomalyConfig::default(),
            boosting: BoostingConfig::default(),
            distill: DistillConfig::default(),
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> PipelineResult<()> {
        let fail = |msg: String| Err(PipelineError::Configuration(msg));
        if !(self.test_fraction > 0.0 && self.test_fraction < 1.0) {
            return fail(format!("test_fraction {} must be in (0, 1)", self.test_fraction));
        }
        let a = &self.anomaly;
        if a.n_trees == 0 || a.max_samples < 2 {
            return fail("anomaly forest needs n_trees > 0 and max_samples >= 2".into());
        }
        if !(a.contamination > 0.0 && a.contamination <= 0.5) {
            return fail(format!("contamination {} must be in (0, 0.5]", a.contamination));
        }
        let b = &self.boosting;
        if b.n_rounds == 0 || b.max_depth == 0 || b.max_bins < 2 || b.learning_rate <= 0.0 {
            return fail("boosting needs n_rounds, max_depth > 0, max_bins >= 2, learning_rate > 0".into());
        }
        let d = &self.distill;
        if d.epochs == 0 || d.batch_size == 0 || d.learning_rate <= 0.0 {
            return fail("distillation needs epochs, batch_size and learning_rate > 0".into());
        }
        if d.hidden_layers.iter().any(|w| *w == 0) {
            return fail("distillation hidden layers must be non-empty".into());
        }
        if !(0.0..0.5).contains(&d.validation_fraction) {
            return fail(format!(
                "validation_fraction {} must be in [0, 0.5)",
                d.validation_fraction
            ));
        }
        Ok(())
    }
}

// ── Top level ────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub generator: GeneratorConfig,
    pub labels: LabelConfig,
    pub training: TrainingConfig,
}

impl PipelineConfig {
    /// Load from a JSON file. Missing sections fall back to the defaults.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: PipelineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PipelineResult<()> {
        self.generator.validate()?;
        self.training.validate()
    }

    /// Config with reduced sizes for use in tests.
    pub fn default_test() -> Self {
        let mut config = Self::default();
        config.generator.num_users = 60;
        config.training.anomaly = AnomalyConfig {
            n_trees: 40,
            max_samples: 128,
            contamination: 0.15,
        };
        config.training.boosting = BoostingConfig {
            n_rounds: 25,
            max_depth: 4,
            learning_rate: 0.2,
            lambda: 1.0,
            min_child_weight: 1.0,
            max_bins: 32,
        };
        config.training.distill = DistillConfig {
            hidden_layers: vec![16, 8],
            epochs: 8,
            batch_size: 32,
            learning_rate: 0.005,
            validation_fraction: 0.1,
        };
        config
    }
}
