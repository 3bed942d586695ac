//! Dataset file tests: column layout and write/read round trip.

use impulse_core::{
    config::PipelineConfig,
    dataset::Dataset,
    error::PipelineError,
    training::TrainingPipeline,
};
use std::fs;

const COLUMNS: [&str; 17] = [
    "user_id",
    "archetype",
    "timestamp",
    "hour",
    "day_of_week",
    "day_of_month",
    "category",
    "amount",
    "avg_user_spend",
    "is_late_night",
    "is_end_of_month",
    "is_weekend",
    "spending_velocity",
    "transaction_gap_minutes",
    "category_switch_count",
    "mood_proxy_score",
    "impulse_label",
];

fn small_dataset(seed: u64) -> Dataset {
    let mut config = PipelineConfig::default_test();
    config.generator.num_users = 12;
    Dataset::generate(&config, seed).unwrap()
}

#[test]
fn written_file_reads_back_identically() {
    let dataset = small_dataset(41);
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("nested").join("impulse_dataset.csv");

    dataset.write_csv(&path).unwrap();
    let read = Dataset::read_csv(&path).unwrap();

    assert_eq!(read.len(), dataset.len());
    assert_eq!(read, dataset, "dataset changed across the CSV file");
    assert_eq!(read.user_count(), 12);
    assert_eq!(fs::read(&path).unwrap(), dataset.to_csv_bytes().unwrap());
}

#[test]
fn header_lists_columns_in_file_order() {
    let dataset = small_dataset(42);
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("data.csv");
    dataset.write_csv(&path).unwrap();

    let content = fs::read_to_string(&path).unwrap();
    let header = content.lines().next().unwrap();
    assert_eq!(header, COLUMNS.join(","));

    let first = content.lines().nth(1).unwrap();
    assert!(first.starts_with("U0000,"), "first data row is {first}");
    assert_eq!(content.lines().count(), dataset.len() + 1);
}

#[test]
fn training_from_a_read_file_matches_training_in_memory() {
    let config = PipelineConfig::default_test();
    let dataset = Dataset::generate(&config, 43).unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("data.csv");
    dataset.write_csv(&path).unwrap();
    let read = Dataset::read_csv(&path).unwrap();

    let pipeline = TrainingPipeline::new(&config.training, 43).unwrap();
    let a = pipeline.run(&dataset).unwrap();
    let b = pipeline.run(&read).unwrap();
    assert_eq!(a.report, b.report, "file round trip changed training");
}

#[test]
fn malformed_file_is_a_csv_error() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("broken.csv");
    fs::write(&path, "user_id,archetype\nU0000,night_owl\n").unwrap();
    let err = Dataset::read_csv(&path).unwrap_err();
    assert!(matches!(err, PipelineError::Csv(_)), "got {err}");

    let missing = Dataset::read_csv(&tmp.path().join("absent.csv")).unwrap_err();
    assert!(matches!(missing, PipelineError::Csv(_)), "got {missing}");
}
