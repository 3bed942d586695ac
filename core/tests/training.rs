//! Training pipeline tests: stage contracts and failure policy.

use impulse_core::{
    config::{AnomalyConfig, BoostingConfig, PipelineConfig},
    dataset::Dataset,
    error::PipelineError,
    rng::StreamRng,
    training::{
        assembly::{assemble_matrix, feature_names, labels, ANOMALY_FEATURE, BASE_FEATURE_COUNT},
        boosting::BoostedClassifier,
        encoding::{Encoding, EncodingKind},
        isolation_forest::IsolationForest,
        metrics::{roc_auc, ClassificationReport},
        pipeline::fit_train_scaler,
        quantize::QuantizedModel,
        split::stratified_split,
        TrainingPipeline,
    },
};
use ndarray::Array2;

fn test_dataset(seed: u64) -> (PipelineConfig, Dataset) {
    let config = PipelineConfig::default_test();
    let dataset = Dataset::generate(&config, seed).unwrap();
    (config, dataset)
}

#[test]
fn scaler_is_fitted_on_train_rows_only() {
    let (_, dataset) = test_dataset(8);
    let categories = Encoding::categories_from(&dataset);
    let archetypes = Encoding::canonical_archetypes();
    let mut x = assemble_matrix(&dataset, &categories, &archetypes).unwrap();
    let split = stratified_split(&labels(&dataset), 0.2, &mut StreamRng::new(8, 1)).unwrap();

    let before = fit_train_scaler(&x, &split).unwrap();
    for &i in &split.test {
        for j in 0..x.ncols() {
            x[[i, j]] = x[[i, j]] * 1000.0 + 17.0;
        }
    }
    let after = fit_train_scaler(&x, &split).unwrap();
    assert_eq!(before, after, "test-partition values leaked into normalisation");
}

#[test]
fn stratified_split_keeps_class_ratio() {
    let labels: Vec<u8> = (0..1000).map(|i| u8::from(i % 4 == 0)).collect();
    let split = stratified_split(&labels, 0.2, &mut StreamRng::new(3, 1)).unwrap();

    assert_eq!(split.train.len() + split.test.len(), 1000);
    assert_eq!(split.test.len(), 200);
    let test_pos = split.test.iter().filter(|&&i| labels[i] == 1).count();
    assert_eq!(test_pos, 50, "test positives");
    assert!(split.train.windows(2).all(|w| w[0] < w[1]));
    assert!(split.test.iter().all(|i| split.train.binary_search(i).is_err()));
}

#[test]
fn stratified_split_rejects_missing_class() {
    let labels = vec![0u8; 50];
    let err = stratified_split(&labels, 0.2, &mut StreamRng::new(1, 1)).unwrap_err();
    assert!(matches!(err, PipelineError::DataQuality(_)));
}

#[test]
fn category_encoding_round_trips() {
    let (_, dataset) = test_dataset(4);
    let categories = Encoding::categories_from(&dataset);
    assert_eq!(categories.kind(), EncodingKind::Category);
    assert_eq!(categories.len(), 10);

    // First-appearance order: the first row's category is code 0.
    assert_eq!(categories.encode(&dataset.rows[0].category).unwrap(), 0);
    for (name, code) in categories.codes() {
        assert_eq!(categories.decode(*code), Some(name.as_str()));
        assert_eq!(categories.encode(name).unwrap(), *code);
    }

    let rebuilt = Encoding::from_codes(EncodingKind::Category, categories.codes().clone()).unwrap();
    assert_eq!(rebuilt, categories);
}

#[test]
fn unknown_values_are_encoding_errors() {
    let archetypes = Encoding::canonical_archetypes();
    assert_eq!(archetypes.encode("controlled").unwrap(), 0);
    assert_eq!(archetypes.encode("freq_binger").unwrap(), 3);
    match archetypes.encode("day_trader") {
        Err(PipelineError::Encoding { kind, value }) => {
            assert_eq!(kind, "archetype");
            assert_eq!(value, "day_trader");
        }
        other => panic!("expected EncodingError, got {other:?}"),
    }
}

#[test]
fn single_class_dataset_is_a_data_quality_error() {
    let (config, mut dataset) = test_dataset(5);
    for row in &mut dataset.rows {
        row.impulse_label = 0;
    }
    let err = TrainingPipeline::new(&config.training, 5)
        .unwrap()
        .run(&dataset)
        .unwrap_err();
    assert!(matches!(err, PipelineError::DataQuality(_)), "got {err}");
}

#[test]
fn non_finite_features_are_a_data_quality_error() {
    let (config, mut dataset) = test_dataset(6);
    dataset.rows[3].avg_user_spend = 0.0;
    let err = TrainingPipeline::new(&config.training, 6)
        .unwrap()
        .run(&dataset)
        .unwrap_err();
    assert!(matches!(err, PipelineError::DataQuality(_)), "got {err}");
}

#[test]
fn empty_dataset_is_a_data_quality_error() {
    let config = PipelineConfig::default_test();
    let err = TrainingPipeline::new(&config.training, 1)
        .unwrap()
        .run(&Dataset::default())
        .unwrap_err();
    assert!(matches!(err, PipelineError::DataQuality(_)), "got {err}");
}

#[test]
fn invalid_training_config_is_rejected() {
    let mut config = PipelineConfig::default_test();
    config.training.test_fraction = 1.5;
    assert!(matches!(
        TrainingPipeline::new(&config.training, 1),
        Err(PipelineError::Configuration(_))
    ));
}

#[test]
fn full_pipeline_produces_consistent_report() {
    let (config, dataset) = test_dataset(2025);
    let artifacts = TrainingPipeline::new(&config.training, 2025)
        .unwrap()
        .run(&dataset)
        .unwrap();
    let r = &artifacts.report;

    assert_eq!(r.rows, dataset.len());
    assert_eq!(r.train_rows + r.test_rows, dataset.len());
    let test_share = r.test_rows as f64 / dataset.len() as f64;
    assert!((test_share - 0.2).abs() < 0.01, "test share {test_share}");

    assert!(
        (0.05..=0.25).contains(&r.anomaly_rate),
        "anomaly rate {} far from contamination 0.15",
        r.anomaly_rate
    );
    assert!(r.scale_pos_weight > 0.0);
    assert_eq!(r.classifier.support(), r.test_rows);
    assert!(r.classifier.roc_auc > 0.75, "classifier roc_auc {}", r.classifier.roc_auc);
    assert!(r.distillation.final_train_loss.is_finite());
    assert!(
        (r.quantized_agreement.mean_abs_diff - r.distilled_agreement.mean_abs_diff).abs() < 0.05,
        "quantisation moved predictions: {:?} vs {:?}",
        r.quantized_agreement,
        r.distilled_agreement
    );

    let names = feature_names();
    assert_eq!(names.len(), BASE_FEATURE_COUNT + 1);
    assert_eq!(names.last().map(String::as_str), Some(ANOMALY_FEATURE));
    assert_eq!(artifacts.feature_names, names);
    assert_eq!(artifacts.scaler.n_features(), names.len());

    let total: f64 = artifacts.importance.iter().map(|f| f.weight).sum();
    assert!((total - 1.0).abs() < 1e-9, "importance sums to {total}");
    assert!(artifacts
        .importance
        .windows(2)
        .all(|w| w[0].weight >= w[1].weight));

    let stages: Vec<&str> = artifacts.events.iter().map(|e| e.type_name()).collect();
    assert_eq!(
        stages,
        ["anomaly_scored", "split_completed", "classifier_trained", "model_distilled", "model_quantized"]
    );
}

#[test]
fn quantized_model_bytes_round_trip() {
    let (config, dataset) = test_dataset(31);
    let artifacts = TrainingPipeline::new(&config.training, 31)
        .unwrap()
        .run(&dataset)
        .unwrap();

    let bytes = artifacts.quantized.to_bytes();
    assert_eq!(&bytes[..4], b"IMPQ");
    let decoded = QuantizedModel::from_bytes(&bytes).unwrap();
    assert_eq!(decoded, artifacts.quantized);
    assert_eq!(decoded.input_dim(), BASE_FEATURE_COUNT + 1);

    let mut bad_magic = bytes.clone();
    bad_magic[0] = b'X';
    assert!(matches!(
        QuantizedModel::from_bytes(&bad_magic),
        Err(PipelineError::ModelFormat(_))
    ));
    assert!(matches!(
        QuantizedModel::from_bytes(&bytes[..bytes.len() - 1]),
        Err(PipelineError::ModelFormat(_))
    ));
    assert!(decoded.predict(&[0.0; 3]).is_err(), "wrong input width accepted");
}

#[test]
fn isolation_forest_flags_a_planted_outlier() {
    let mut rng = StreamRng::new(17, 0);
    let mut x = Array2::<f64>::zeros((400, 3));
    for mut row in x.rows_mut() {
        for v in row.iter_mut() {
            *v = rng.normal(0.0, 1.0);
        }
    }
    for j in 0..3 {
        x[[0, j]] = 25.0;
    }
    let config = AnomalyConfig {
        n_trees: 60,
        max_samples: 128,
        contamination: 0.1,
    };
    let forest = IsolationForest::fit(&x, &config, &mut rng).unwrap();
    let decisions = forest.decision_function(&x);

    assert!(decisions[0] < 0.0, "planted outlier decision {}", decisions[0]);
    assert!(
        decisions.iter().skip(1).all(|d| *d > decisions[0]),
        "an inlier scored as more anomalous than the planted outlier"
    );
    let rate = forest.predict_outliers(&x).iter().filter(|o| **o).count() as f64 / 400.0;
    assert!((rate - 0.1).abs() < 0.03, "outlier rate {rate}");
}

#[test]
fn boosted_classifier_learns_a_threshold_rule() {
    let mut rng = StreamRng::new(23, 0);
    let n = 600;
    let mut x = Array2::<f64>::zeros((n, 2));
    let mut y = Vec::with_capacity(n);
    for i in 0..n {
        x[[i, 0]] = rng.next_f64();
        x[[i, 1]] = rng.next_f64();
        y.push(u8::from(x[[i, 0]] > 0.7));
    }
    let config = BoostingConfig {
        n_rounds: 30,
        max_depth: 3,
        learning_rate: 0.3,
        ..BoostingConfig::default()
    };
    let model = BoostedClassifier::fit(&x, &y, &config, 1.0).unwrap();
    let report = ClassificationReport::evaluate(&y, &model.predict_proba(&x), 0.5);

    assert!(report.accuracy > 0.97, "accuracy {}", report.accuracy);
    let importance = model.feature_importance();
    assert!(importance[0] > importance[1], "importance {importance:?}");
}

#[test]
fn roc_auc_handles_ordering_and_ties() {
    assert_eq!(roc_auc(&[0, 0, 1, 1], &[0.1, 0.2, 0.8, 0.9]), Some(1.0));
    assert_eq!(roc_auc(&[1, 1, 0, 0], &[0.1, 0.2, 0.8, 0.9]), Some(0.0));
    assert_eq!(roc_auc(&[0, 1, 0, 1], &[0.5; 4]), Some(0.5));
    assert_eq!(roc_auc(&[1, 1], &[0.3, 0.4]), None);
}
