//! Archetype registry: the latent behavioral profiles behind every
//! synthetic user.
//!
//! RULE: The registry is built once at startup and never mutated.
//! Archetype weights are relative; the selector normalises by their total.

use crate::{
    error::{PipelineError, PipelineResult},
    rng::StreamRng,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Canonical archetype encoding shared with the client-side scorer.
/// NEVER renumber: exported models depend on these codes.
pub const CANONICAL_ENCODING: [(&str, u32); 4] = [
    ("controlled", 0),
    ("night_owl", 1),
    ("eom_spender", 2),
    ("freq_binger", 3),
];

/// Extra label points an archetype earns when its signature behaviour shows up.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LabelBonus {
    #[default]
    None,
    LateNight { points: f64 },
    EndOfMonth { points: f64 },
    HighVelocity { min_velocity: u32, points: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Archetype {
    pub name: String,
    /// Relative selection weight.
    pub weight: f64,
    pub late_night_prob: f64,
    pub eom_prob: f64,
    pub velocity_mean: f64,
    #[serde(default)]
    pub bonus: LabelBonus,
}

impl Archetype {
    fn new(name: &str, weight: f64, late_night_prob: f64, eom_prob: f64, velocity_mean: f64, bonus: LabelBonus) -> Self {
        Self {
            name: name.into(),
            weight,
            late_night_prob,
            eom_prob,
            velocity_mean,
            bonus,
        }
    }

    /// The four canonical archetypes in declaration order.
    pub fn canonical() -> Vec<Archetype> {
        vec![
            Archetype::new("night_owl", 0.25, 0.60, 0.20, 4.0, LabelBonus::LateNight { points: 1.0 }),
            Archetype::new("eom_spender", 0.20, 0.15, 0.70, 3.0, LabelBonus::EndOfMonth { points: 1.0 }),
            Archetype::new(
                "freq_binger",
                0.20,
                0.30,
                0.30,
                7.0,
                LabelBonus::HighVelocity { min_velocity: 5, points: 1.5 },
            ),
            Archetype::new("controlled", 0.35, 0.05, 0.10, 1.0, LabelBonus::None),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct ArchetypeRegistry {
    archetypes: Vec<Archetype>,
    total_weight: f64,
}

impl ArchetypeRegistry {
    pub fn new(archetypes: Vec<Archetype>) -> PipelineResult<Self> {
        if archetypes.is_empty() {
            return Err(PipelineError::Configuration("archetype registry is empty".into()));
        }
        let mut seen = HashSet::new();
        for a in &archetypes {
            if !seen.insert(a.name.as_str()) {
                return Err(PipelineError::Configuration(format!(
                    "duplicate archetype '{}'",
                    a.name
                )));
            }
            if !a.weight.is_finite() || a.weight < 0.0 {
                return Err(PipelineError::Configuration(format!(
                    "archetype '{}' has invalid weight {}",
                    a.name, a.weight
                )));
            }
            for (field, p) in [("late_night_prob", a.late_night_prob), ("eom_prob", a.eom_prob)] {
                if !(0.0..=1.0).contains(&p) {
                    return Err(PipelineError::Configuration(format!(
                        "archetype '{}' has {field} {p} outside [0, 1]",
                        a.name
                    )));
                }
            }
        }
        let total_weight: f64 = archetypes.iter().map(|a| a.weight).sum();
        if total_weight <= 0.0 {
            return Err(PipelineError::Configuration(format!(
                "archetype weights must sum to a positive total, got {total_weight}"
            )));
        }
        Ok(Self {
            archetypes,
            total_weight,
        })
    }

    pub fn canonical() -> PipelineResult<Self> {
        Self::new(Archetype::canonical())
    }

    pub fn get(&self, name: &str) -> Option<&Archetype> {
        self.archetypes.iter().find(|a| a.name == name)
    }

    pub fn archetypes(&self) -> &[Archetype] {
        &self.archetypes
    }

    /// Normalised selection probability of an archetype.
    pub fn probability(&self, name: &str) -> Option<f64> {
        self.get(name).map(|a| a.weight / self.total_weight)
    }

    /// Weighted draw: cumulative walk over the registry in declaration order.
    pub fn pick(&self, rng: &mut StreamRng) -> &Archetype {
        let roll = rng.next_f64() * self.total_weight;
        let mut cumulative = 0.0;
        for archetype in &self.archetypes {
            cumulative += archetype.weight;
            if roll < cumulative {
                return archetype;
            }
        }
        // Float rounding can leave roll == total; the last weighted entry absorbs it.
        self.archetypes
            .iter()
            .rev()
            .find(|a| a.weight > 0.0)
            .unwrap_or(&self.archetypes[0])
    }
}
