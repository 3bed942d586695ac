//! Artifact export and loading.
//!
//! RULE: Artifacts are written into a sibling staging directory and
//! renamed into place only after every file is on disk. A failed export
//! leaves any previously published directory untouched.

use crate::{
    error::{PipelineError, PipelineResult},
    training::{
        assembly::feature_names,
        encoding::{Encoding, EncodingKind},
        isolation_forest::IsolationForest,
        pipeline::FeatureWeight,
        quantize::QuantizedModel,
        scaler::StandardScaler,
        TrainedArtifacts, TrainingReport,
    },
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

pub const MODEL_FILE: &str = "impulse_model.bin";
pub const NORMALIZATION_FILE: &str = "normalization.json";
pub const CATEGORY_MAP_FILE: &str = "category_map.json";
pub const ARCHETYPE_MAP_FILE: &str = "archetype_map.json";
pub const IMPORTANCE_FILE: &str = "feature_importance.json";
pub const FOREST_FILE: &str = "anomaly_forest.json";
pub const MANIFEST_FILE: &str = "manifest.json";

pub const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationEntry {
    pub feature: String,
    pub mean: f64,
    pub scale: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportManifest {
    pub manifest_version: u32,
    pub crate_version: String,
    pub seed: u64,
    pub features: Vec<String>,
    pub files: Vec<String>,
    pub report: TrainingReport,
}

/// Everything a client needs, read back from an export directory.
#[derive(Debug, Clone)]
pub struct ExportedArtifacts {
    pub manifest: ExportManifest,
    pub categories: Encoding,
    pub archetypes: Encoding,
    pub forest: IsolationForest,
    pub scaler: StandardScaler,
    pub model: QuantizedModel,
    pub importance: Vec<FeatureWeight>,
}

pub fn normalization_entries(names: &[String], scaler: &StandardScaler) -> Vec<NormalizationEntry> {
    names
        .iter()
        .zip(scaler.mean.iter().zip(&scaler.scale))
        .map(|(feature, (mean, scale))| NormalizationEntry {
            feature: feature.clone(),
            mean: *mean,
            scale: *scale,
        })
        .collect()
}

/// Write every artifact file for `artifacts` into `out_dir`.
pub fn export_artifacts(
    artifacts: &TrainedArtifacts,
    out_dir: &Path,
    seed: u64,
) -> PipelineResult<ExportManifest> {
    let staging = sibling_dir(out_dir, "staging")?;
    let retired = sibling_dir(out_dir, "retired")?;
    for leftover in [&staging, &retired] {
        if leftover.exists() {
            fs::remove_dir_all(leftover)?;
        }
    }
    fs::create_dir_all(&staging)?;

    let manifest = match write_files(artifacts, &staging, seed) {
        Ok(m) => m,
        Err(e) => {
            if let Err(cleanup) = fs::remove_dir_all(&staging) {
                log::warn!("export: could not remove {}: {cleanup}", staging.display());
            }
            return Err(e);
        }
    };

    // The previous export stays on disk until the new one is in place.
    let had_previous = out_dir.exists();
    if had_previous {
        fs::rename(out_dir, &retired)?;
    }
    if let Err(e) = fs::rename(&staging, out_dir) {
        if had_previous {
            if let Err(restore) = fs::rename(&retired, out_dir) {
                log::warn!(
                    "export: could not restore {} from {}: {restore}",
                    out_dir.display(),
                    retired.display()
                );
            }
        }
        return Err(e.into());
    }
    if had_previous {
        fs::remove_dir_all(&retired)?;
    }

    log::info!(
        "export: {} files published to {}",
        manifest.files.len(),
        out_dir.display()
    );
    Ok(manifest)
}

/// Hidden sibling of `out_dir`, e.g. `.model.staging`.
fn sibling_dir(out_dir: &Path, suffix: &str) -> PipelineResult<PathBuf> {
    let name = out_dir.file_name().ok_or_else(|| {
        PipelineError::Configuration(format!(
            "export directory {} has no final component",
            out_dir.display()
        ))
    })?;
    let mut sibling = std::ffi::OsString::from(".");
    sibling.push(name);
    sibling.push(".");
    sibling.push(suffix);
    Ok(out_dir.with_file_name(sibling))
}

fn write_files(artifacts: &TrainedArtifacts, dir: &Path, seed: u64) -> PipelineResult<ExportManifest> {
    fs::write(dir.join(MODEL_FILE), artifacts.quantized.to_bytes())?;
    write_json(
        &dir.join(NORMALIZATION_FILE),
        &normalization_entries(&artifacts.feature_names, &artifacts.scaler),
    )?;
    write_json(&dir.join(CATEGORY_MAP_FILE), artifacts.categories.codes())?;
    write_json(&dir.join(ARCHETYPE_MAP_FILE), artifacts.archetypes.codes())?;
    write_json(&dir.join(IMPORTANCE_FILE), &artifacts.importance)?;
    write_json(&dir.join(FOREST_FILE), &artifacts.forest)?;

    let manifest = ExportManifest {
        manifest_version: MANIFEST_VERSION,
        crate_version: env!("CARGO_PKG_VERSION").to_string(),
        seed,
        features: artifacts.feature_names.clone(),
        files: [
            MODEL_FILE,
            NORMALIZATION_FILE,
            CATEGORY_MAP_FILE,
            ARCHETYPE_MAP_FILE,
            IMPORTANCE_FILE,
            FOREST_FILE,
            MANIFEST_FILE,
        ]
        .iter()
        .map(|f| f.to_string())
        .collect(),
        report: artifacts.report.clone(),
    };
    write_json(&dir.join(MANIFEST_FILE), &manifest)?;
    Ok(manifest)
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> PipelineResult<()> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json)?;
    log::debug!("export: wrote {}", path.display());
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> PipelineResult<T> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

// ── Loading ───────────────────────────────────────────────────

/// Read an export directory back and check it is self-consistent.
pub fn load_artifacts(dir: &Path) -> PipelineResult<ExportedArtifacts> {
    let manifest: ExportManifest = read_json(&dir.join(MANIFEST_FILE))?;
    if manifest.manifest_version != MANIFEST_VERSION {
        return Err(PipelineError::ModelFormat(format!(
            "unsupported manifest version {}",
            manifest.manifest_version
        )));
    }

    let normalization: Vec<NormalizationEntry> = read_json(&dir.join(NORMALIZATION_FILE))?;
    let expected = feature_names();
    let actual: Vec<String> = normalization.iter().map(|e| e.feature.clone()).collect();
    if actual != expected {
        return Err(PipelineError::ModelFormat(format!(
            "normalization feature order {actual:?} does not match {expected:?}"
        )));
    }
    let scaler = StandardScaler {
        mean: normalization.iter().map(|e| e.mean).collect(),
        scale: normalization.iter().map(|e| e.scale).collect(),
    };

    let categories = Encoding::from_codes(
        EncodingKind::Category,
        read_json::<BTreeMap<String, u32>>(&dir.join(CATEGORY_MAP_FILE))?,
    )?;
    let archetypes = Encoding::from_codes(
        EncodingKind::Archetype,
        read_json::<BTreeMap<String, u32>>(&dir.join(ARCHETYPE_MAP_FILE))?,
    )?;

    let forest: IsolationForest = read_json(&dir.join(FOREST_FILE))?;
    if forest.n_features() + 1 != expected.len() {
        return Err(PipelineError::ModelFormat(format!(
            "anomaly forest expects {} features, vector has {} base features",
            forest.n_features(),
            expected.len() - 1
        )));
    }

    let model = QuantizedModel::from_bytes(&fs::read(dir.join(MODEL_FILE))?)?;
    if model.input_dim() != expected.len() {
        return Err(PipelineError::ModelFormat(format!(
            "model input dimension {} does not match {} features",
            model.input_dim(),
            expected.len()
        )));
    }

    Ok(ExportedArtifacts {
        manifest,
        categories,
        archetypes,
        forest,
        scaler,
        model,
        importance: read_json(&dir.join(IMPORTANCE_FILE))?,
    })
}
