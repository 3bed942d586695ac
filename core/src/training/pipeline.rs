//! The training pipeline.
//!
//! STAGE ORDER (fixed, each consumes the previous stage's output):
//!   1. Feature assembly
//!   2. Anomaly scoring (isolation forest, full matrix)
//!   3. Enrichment (anomaly score appended as a column)
//!   4. Stratified split
//!   5. Normalisation (fit on train only)
//!   6. Boosted classifier
//!   7. Distillation (target = classifier probabilities)
//!   8. Quantisation
//!
//! RULES:
//!   - Any precondition failure aborts the run with an error;
//!     nothing is returned for export.
//!   - Each stochastic stage draws from its own StageSlot stream.

use super::{
    assembly::{assemble_matrix, ensure_finite, feature_names, labels},
    boosting::BoostedClassifier,
    distill::{DistillSummary, MlpRegressor},
    encoding::Encoding,
    isolation_forest::IsolationForest,
    metrics::{AgreementReport, ClassificationReport},
    quantize::QuantizedModel,
    scaler::StandardScaler,
    split::{stratified_split, TrainTestSplit},
};
use crate::{
    config::TrainingConfig,
    dataset::Dataset,
    error::{PipelineError, PipelineResult},
    event::PipelineEvent,
    rng::{RngBank, StageSlot},
};
use ndarray::{concatenate, Array2, Axis};
use serde::{Deserialize, Serialize};

/// Decision cutoff applied to every probability output.
pub const DECISION_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureWeight {
    pub feature: String,
    pub weight: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub rows: usize,
    pub train_rows: usize,
    pub test_rows: usize,
    pub outliers: usize,
    pub anomaly_rate: f64,
    pub scale_pos_weight: f64,
    /// Classifier vs ground truth on the test partition.
    pub classifier: ClassificationReport,
    pub distillation: DistillSummary,
    /// Distilled model vs classifier on the test partition.
    pub distilled_agreement: AgreementReport,
    /// Quantised model vs classifier on the test partition.
    pub quantized_agreement: AgreementReport,
    /// Distilled model vs ground truth on the test partition.
    pub distilled_vs_labels: ClassificationReport,
}

/// Everything one training run produces. Immutable once built.
#[derive(Debug, Clone)]
pub struct TrainedArtifacts {
    pub feature_names: Vec<String>,
    pub categories: Encoding,
    pub archetypes: Encoding,
    pub forest: IsolationForest,
    pub scaler: StandardScaler,
    pub classifier: BoostedClassifier,
    pub distilled: MlpRegressor,
    pub quantized: QuantizedModel,
    /// Descending by weight.
    pub importance: Vec<FeatureWeight>,
    pub report: TrainingReport,
    pub events: Vec<PipelineEvent>,
}

pub struct TrainingPipeline<'a> {
    config: &'a TrainingConfig,
    bank: RngBank,
}

impl<'a> TrainingPipeline<'a> {
    pub fn new(config: &'a TrainingConfig, seed: u64) -> PipelineResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            bank: RngBank::new(seed),
        })
    }

    pub fn run(&self, dataset: &Dataset) -> PipelineResult<TrainedArtifacts> {
        let mut events = Vec::new();
        let y = labels(dataset);
        ensure_two_classes(&y, "dataset")?;

        // 1. Feature assembly
        let categories = Encoding::categories_from(dataset);
        let archetypes = Encoding::canonical_archetypes();
        let x = assemble_matrix(dataset, &categories, &archetypes)?;
        ensure_finite(&x, "feature assembly")?;
        log::info!(
            "train: assembled {}x{} features ({} categories)",
            x.nrows(),
            x.ncols(),
            categories.len()
        );

        // 2. Anomaly scoring
        let mut forest_rng = self.bank.for_stage(StageSlot::AnomalyForest);
        let forest = IsolationForest::fit(&x, &self.config.anomaly, &mut forest_rng)?;
        let anomaly = forest.decision_function(&x);
        let outliers = anomaly.iter().filter(|d| **d < 0.0).count();
        let anomaly_rate = outliers as f64 / x.nrows() as f64;
        log::info!("train: anomaly rate {:.1}% ({outliers} outliers)", anomaly_rate * 100.0);
        events.push(PipelineEvent::AnomalyScored {
            rows: x.nrows(),
            outliers,
            anomaly_rate,
        });

        // 3. Enrichment
        let enriched = concatenate(Axis(1), &[x.view(), anomaly.view().insert_axis(Axis(1))])
            .map_err(|e| PipelineError::DataQuality(format!("enrichment: {e}")))?;
        ensure_finite(&enriched, "enrichment")?;

        // 4. Split
        let mut split_rng = self.bank.for_stage(StageSlot::Split);
        let split = stratified_split(&y, self.config.test_fraction, &mut split_rng)?;
        let y_train: Vec<u8> = split.train.iter().map(|&i| y[i]).collect();
        let y_test: Vec<u8> = split.test.iter().map(|&i| y[i]).collect();
        ensure_two_classes(&y_train, "train partition")?;
        ensure_two_classes(&y_test, "test partition")?;

        // 5. Normalisation
        let scaler = fit_train_scaler(&enriched, &split)?;
        let x_train = scaler.transform(&enriched.select(Axis(0), &split.train));
        let x_test = scaler.transform(&enriched.select(Axis(0), &split.test));
        ensure_finite(&x_train, "normalisation")?;
        ensure_finite(&x_test, "normalisation")?;

        let positives = y_train.iter().filter(|l| **l == 1).count();
        let scale_pos_weight = (y_train.len() - positives) as f64 / positives as f64;
        events.push(PipelineEvent::SplitCompleted {
            train_rows: split.train.len(),
            test_rows: split.test.len(),
            scale_pos_weight,
        });

        // 6. Classifier
        let classifier =
            BoostedClassifier::fit(&x_train, &y_train, &self.config.boosting, scale_pos_weight)?;
        let test_probs = classifier.predict_proba(&x_test);
        let classifier_report = ClassificationReport::evaluate(&y_test, &test_probs, DECISION_THRESHOLD);
        log::info!(
            "train: classifier precision={:.3} recall={:.3} f1={:.3} roc_auc={:.4}",
            classifier_report.precision,
            classifier_report.recall,
            classifier_report.f1,
            classifier_report.roc_auc
        );
        events.push(PipelineEvent::ClassifierTrained {
            trees: classifier.n_trees(),
            precision: classifier_report.precision,
            recall: classifier_report.recall,
            f1: classifier_report.f1,
            roc_auc: classifier_report.roc_auc,
        });

        // 7. Distillation
        let train_probs = classifier.predict_proba(&x_train);
        let mut distill_rng = self.bank.for_stage(StageSlot::Distillation);
        let (distilled, distillation) =
            MlpRegressor::fit(&x_train, &train_probs, &self.config.distill, &mut distill_rng)?;
        let student_probs = distilled.predict(&x_test);
        let distilled_agreement = AgreementReport::compare(&test_probs, &student_probs);
        let distilled_vs_labels = ClassificationReport::evaluate(&y_test, &student_probs, DECISION_THRESHOLD);
        log::info!(
            "train: distilled model mean_abs_diff={:.4} agreement={:.3}",
            distilled_agreement.mean_abs_diff,
            distilled_agreement.decision_agreement
        );
        events.push(PipelineEvent::ModelDistilled {
            epochs: distillation.epochs,
            validation_loss: distillation.final_validation_loss,
            mean_abs_diff: distilled_agreement.mean_abs_diff,
            decision_agreement: distilled_agreement.decision_agreement,
        });

        // 8. Quantisation
        let quantized = QuantizedModel::from_mlp(&distilled);
        let quantized_probs = quantized_predictions(&quantized, &x_test)?;
        let quantized_agreement = AgreementReport::compare(&test_probs, &quantized_probs);
        events.push(PipelineEvent::ModelQuantized {
            layers: quantized.layers.len(),
            bytes: quantized.to_bytes().len(),
        });

        let names = feature_names();
        let importance = rank_importance(&names, &classifier.feature_importance());

        Ok(TrainedArtifacts {
            feature_names: names,
            categories,
            archetypes,
            forest,
            scaler,
            classifier,
            distilled,
            quantized,
            importance,
            report: TrainingReport {
                rows: x.nrows(),
                train_rows: split.train.len(),
                test_rows: split.test.len(),
                outliers,
                anomaly_rate,
                scale_pos_weight,
                classifier: classifier_report,
                distillation,
                distilled_agreement,
                quantized_agreement,
                distilled_vs_labels,
            },
            events,
        })
    }
}

/// Fit normalisation statistics on the train rows of `x` only.
pub fn fit_train_scaler(x: &Array2<f64>, split: &TrainTestSplit) -> PipelineResult<StandardScaler> {
    StandardScaler::fit(&x.select(Axis(0), &split.train))
}

fn ensure_two_classes(y: &[u8], what: &str) -> PipelineResult<()> {
    if y.is_empty() {
        return Err(PipelineError::DataQuality(format!("{what} is empty")));
    }
    let positives = y.iter().filter(|l| **l == 1).count();
    if positives == 0 || positives == y.len() {
        return Err(PipelineError::DataQuality(format!(
            "{what} has a single label class ({positives} positives of {})",
            y.len()
        )));
    }
    Ok(())
}

fn quantized_predictions(model: &QuantizedModel, x: &Array2<f64>) -> PipelineResult<Vec<f64>> {
    x.rows()
        .into_iter()
        .map(|row| {
            let features: Vec<f32> = row.iter().map(|v| *v as f32).collect();
            model.predict(&features).map(f64::from)
        })
        .collect()
}

fn rank_importance(names: &[String], weights: &[f64]) -> Vec<FeatureWeight> {
    let mut ranked: Vec<FeatureWeight> = names
        .iter()
        .zip(weights)
        .map(|(feature, weight)| FeatureWeight {
            feature: feature.clone(),
            weight: *weight,
        })
        .collect();
    ranked.sort_by(|a, b| b.weight.total_cmp(&a.weight).then_with(|| a.feature.cmp(&b.feature)));
    ranked
}
