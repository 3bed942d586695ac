//! impulse-runner: generate the impulse-spending dataset and train the
//! tiered scoring model.
//!
//! Usage:
//!   impulse-runner --seed 42 --users 500 --txns 25 --out ./artifacts
//!   impulse-runner --seed 42 --dataset data.csv --db run.db --skip-train
//!   impulse-runner --seed 42 --dataset data.csv --from-csv --out ./artifacts
//!   impulse-runner --config pipeline.json

use anyhow::Result;
use impulse_core::{
    config::PipelineConfig,
    dataset::Dataset,
    event::{EventLogEntry, PipelineEvent},
    export::export_artifacts,
    store::RunStore,
    training::{TrainedArtifacts, TrainingPipeline},
};
use std::env;
use std::path::Path;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let skip_train = args.iter().any(|a| a == "--skip-train");
    let from_csv = args.iter().any(|a| a == "--from-csv");
    let db = arg_value(&args, "--db").unwrap_or(":memory:");
    let dataset_path = arg_value(&args, "--dataset").unwrap_or("impulse_dataset.csv");
    let out_dir = arg_value(&args, "--out").unwrap_or("artifacts");

    let mut config = match arg_value(&args, "--config") {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    config.generator.num_users = parse_arg(&args, "--users", config.generator.num_users);
    config.generator.transactions_per_user =
        parse_arg(&args, "--txns", config.generator.transactions_per_user);
    config.validate()?;

    println!("Impulse pipeline: impulse-runner");
    println!("  seed:      {seed}");
    println!("  users:     {}", config.generator.num_users);
    println!("  txns/user: {}", config.generator.transactions_per_user);
    println!(
        "  dataset:   {dataset_path} ({})",
        if from_csv { "read" } else { "written" }
    );
    println!("  db:        {db}");
    println!("  out:       {}", if skip_train { "(skipped)" } else { out_dir });
    println!();

    let store = RunStore::open(db)?;
    store.migrate()?;
    let run_id = format!("run-{}", uuid::Uuid::new_v4());
    store.insert_run(&run_id, seed, env!("CARGO_PKG_VERSION"))?;

    // ── Dataset ────────────────────────────────────────────────
    let dataset = if from_csv {
        Dataset::read_csv(Path::new(dataset_path))?
    } else {
        let generated = Dataset::generate(&config, seed)?;
        generated.write_csv(Path::new(dataset_path))?;
        record(
            &store,
            &run_id,
            &PipelineEvent::DatasetGenerated {
                seed,
                rows: generated.len(),
                users: generated.user_count(),
                positives: generated.label_counts().1,
            },
        )?;
        generated
    };
    store.insert_dataset(&run_id, &dataset)?;
    print_dataset_summary(&dataset);

    if skip_train {
        println!("\nTraining skipped. Run id: {run_id}");
        return Ok(());
    }

    // ── Training ───────────────────────────────────────────────
    let pipeline = TrainingPipeline::new(&config.training, seed)?;
    let artifacts = pipeline.run(&dataset)?;
    for event in &artifacts.events {
        record(&store, &run_id, event)?;
    }
    store.save_training_report(&run_id, &artifacts.report)?;

    // ── Export ─────────────────────────────────────────────────
    let manifest = export_artifacts(&artifacts, Path::new(out_dir), seed)?;
    record(
        &store,
        &run_id,
        &PipelineEvent::ArtifactsExported {
            directory: out_dir.to_string(),
            files: manifest.files.len(),
        },
    )?;

    print_training_summary(&artifacts);
    println!("\nRun id: {run_id}");
    Ok(())
}

fn record(store: &RunStore, run_id: &str, event: &PipelineEvent) -> Result<()> {
    store.append_event(&EventLogEntry::from_event(run_id, event)?)?;
    Ok(())
}

fn print_dataset_summary(dataset: &Dataset) {
    let (negatives, positives) = dataset.label_counts();
    let total = dataset.len().max(1) as f64;
    println!("=== Dataset ===");
    println!("  rows:      {}", dataset.len());
    println!("  impulse:   {positives} ({:.1}%)", positives as f64 / total * 100.0);
    println!("  regular:   {negatives} ({:.1}%)", negatives as f64 / total * 100.0);
    for (name, count) in dataset.archetype_counts() {
        println!("  {name:<12} {count}");
    }
}

fn print_training_summary(artifacts: &TrainedArtifacts) {
    let r = &artifacts.report;
    println!("\n=== Training ===");
    println!("  train/test:        {}/{}", r.train_rows, r.test_rows);
    println!("  anomaly rate:      {:.1}%", r.anomaly_rate * 100.0);
    println!("  scale_pos_weight:  {:.3}", r.scale_pos_weight);
    println!("  precision:         {:.3}", r.classifier.precision);
    println!("  recall:            {:.3}", r.classifier.recall);
    println!("  f1:                {:.3}", r.classifier.f1);
    println!("  accuracy:          {:.3}", r.classifier.accuracy);
    println!("  roc_auc:           {:.4}", r.classifier.roc_auc);
    println!("  distilled MAD:     {:.4}", r.distilled_agreement.mean_abs_diff);
    println!("  distilled agree:   {:.1}%", r.distilled_agreement.decision_agreement * 100.0);
    println!("  quantized agree:   {:.1}%", r.quantized_agreement.decision_agreement * 100.0);
    println!("\n  Top features:");
    for fw in artifacts.importance.iter().take(8) {
        println!("    {:<24} {:.4}", fw.feature, fw.weight);
    }
}

fn arg_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
