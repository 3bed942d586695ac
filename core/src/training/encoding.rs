//! Categorical encodings shared between training and the client scorer.
//!
//! RULE: An encoding is frozen once training starts. Values outside it
//! are an EncodingError, never a silent default.

use crate::{
    archetype::CANONICAL_ENCODING,
    dataset::Dataset,
    error::{PipelineError, PipelineResult},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodingKind {
    Category,
    Archetype,
}

impl EncodingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Category => "category",
            Self::Archetype => "archetype",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoding {
    kind: EncodingKind,
    codes: BTreeMap<String, u32>,
}

impl Encoding {
    /// Build from explicit codes. Codes must be unique.
    pub fn from_codes(kind: EncodingKind, codes: BTreeMap<String, u32>) -> PipelineResult<Self> {
        let mut seen = std::collections::HashSet::new();
        for (name, code) in &codes {
            if !seen.insert(*code) {
                return Err(PipelineError::DataQuality(format!(
                    "{} code {code} assigned twice (at '{name}')",
                    kind.as_str()
                )));
            }
        }
        Ok(Self { kind, codes })
    }

    /// Category codes in first-appearance order over the dataset.
    pub fn categories_from(dataset: &Dataset) -> Self {
        let mut codes = BTreeMap::new();
        for row in &dataset.rows {
            let next = codes.len() as u32;
            codes.entry(row.category.clone()).or_insert(next);
        }
        Self {
            kind: EncodingKind::Category,
            codes,
        }
    }

    /// The fixed archetype encoding.
    pub fn canonical_archetypes() -> Self {
        Self {
            kind: EncodingKind::Archetype,
            codes: CANONICAL_ENCODING
                .iter()
                .map(|(name, code)| (name.to_string(), *code))
                .collect(),
        }
    }

    pub fn kind(&self) -> EncodingKind {
        self.kind
    }

    pub fn codes(&self) -> &BTreeMap<String, u32> {
        &self.codes
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn encode(&self, value: &str) -> PipelineResult<u32> {
        self.codes
            .get(value)
            .copied()
            .ok_or_else(|| PipelineError::Encoding {
                kind: self.kind.as_str(),
                value: value.to_string(),
            })
    }

    pub fn decode(&self, code: u32) -> Option<&str> {
        self.codes
            .iter()
            .find(|(_, c)| **c == code)
            .map(|(name, _)| name.as_str())
    }
}
