//! Feature extractor tests: causal windows, sentinels and ordering.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use impulse_core::{
    config::PipelineConfig,
    dataset::{Dataset, DatasetRow},
    error::PipelineError,
    features::{extract_user, FeatureExtractor, GAP_SENTINEL_MINUTES},
    generator::RawTransaction,
    rng::StreamRng,
    types::TIMESTAMP_FORMAT,
};

fn ts(row: &DatasetRow) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(&row.timestamp, TIMESTAMP_FORMAT).unwrap()
}

fn user_blocks(dataset: &Dataset) -> Vec<&[DatasetRow]> {
    let mut blocks = Vec::new();
    let mut start = 0;
    for i in 1..=dataset.rows.len() {
        if i == dataset.rows.len() || dataset.rows[i].user_id != dataset.rows[start].user_id {
            blocks.push(&dataset.rows[start..i]);
            start = i;
        }
    }
    blocks
}

fn txn(at: NaiveDateTime, category: &str, impulse_prone: bool) -> RawTransaction {
    RawTransaction {
        timestamp: at,
        category: category.into(),
        impulse_prone,
        amount: 100.0,
    }
}

fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 3, day)
        .unwrap()
        .and_hms_opt(hour, minute, 0)
        .unwrap()
}

#[test]
fn velocity_matches_brute_force_count() {
    let mut config = PipelineConfig::default_test();
    // Dense users so the 2h window actually fills.
    config.generator.month_span = 1;
    config.generator.transactions_per_user = 60;
    let dataset = Dataset::generate(&config, 314).unwrap();

    let mut nonzero = 0;
    for block in user_blocks(&dataset) {
        for (i, row) in block.iter().enumerate() {
            let t = ts(row);
            let expected = block[..i]
                .iter()
                .filter(|p| {
                    let pt = ts(p);
                    pt >= t - Duration::hours(2) && pt < t
                })
                .count() as u32;
            assert_eq!(
                row.spending_velocity, expected,
                "{} at {}: velocity {} vs brute force {expected}",
                row.user_id, row.timestamp, row.spending_velocity
            );
            if expected > 0 {
                nonzero += 1;
            }
        }
    }
    assert!(nonzero > 0, "no row had a non-zero velocity; test is vacuous");
}

#[test]
fn category_switches_match_brute_force_window() {
    let mut config = PipelineConfig::default_test();
    config.generator.month_span = 1;
    config.generator.transactions_per_user = 60;
    let dataset = Dataset::generate(&config, 2718).unwrap();

    for block in user_blocks(&dataset) {
        for (i, row) in block.iter().enumerate() {
            let t = ts(row);
            let mut distinct: std::collections::BTreeSet<&str> = block[i.saturating_sub(10)..i]
                .iter()
                .filter(|p| ts(p) >= t - Duration::hours(1))
                .map(|p| p.category.as_str())
                .collect();
            distinct.insert(row.category.as_str());
            assert_eq!(
                row.category_switch_count,
                distinct.len() as u32,
                "{} at {}",
                row.user_id,
                row.timestamp
            );
        }
    }
}

#[test]
fn first_gap_is_the_sentinel_and_later_gaps_are_elapsed_minutes() {
    let dataset = Dataset::generate(&PipelineConfig::default_test(), 9).unwrap();
    for block in user_blocks(&dataset) {
        assert_eq!(
            block[0].transaction_gap_minutes, GAP_SENTINEL_MINUTES,
            "{} first gap",
            block[0].user_id
        );
        for pair in block.windows(2) {
            let minutes = (ts(&pair[1]) - ts(&pair[0])).num_minutes() as f64;
            assert!(
                (pair[1].transaction_gap_minutes - minutes).abs() < 1e-9,
                "gap {} vs {minutes}",
                pair[1].transaction_gap_minutes
            );
        }
    }
}

#[test]
fn equal_timestamps_are_not_counted_in_velocity() {
    let mut rng = StreamRng::new(1, 1);
    let txns = vec![
        txn(at(3, 10, 0), "Grocery", false),
        txn(at(3, 10, 0), "Gaming", true),
        txn(at(3, 11, 0), "Fashion", true),
    ];
    let features = extract_user("U0000", &txns, &mut rng).unwrap();
    assert_eq!(features[0].spending_velocity, 0);
    assert_eq!(features[1].spending_velocity, 0, "same-minute transaction counted");
    assert_eq!(features[1].transaction_gap_minutes, 0.0);
    assert_eq!(features[2].spending_velocity, 2);
    assert_eq!(features[2].category_switch_count, 3);
}

#[test]
fn out_of_order_input_is_a_generation_invariant_error() {
    let mut rng = StreamRng::new(1, 2);
    let mut extractor = FeatureExtractor::new("U0042".into());
    extractor.observe(&txn(at(5, 12, 30), "Travel", false), &mut rng).unwrap();

    let err = extractor
        .observe(&txn(at(5, 12, 29), "Travel", false), &mut rng)
        .unwrap_err();
    match err {
        PipelineError::GenerationInvariant { user_id, .. } => assert_eq!(user_id, "U0042"),
        other => panic!("expected GenerationInvariant, got {other}"),
    }
}

#[test]
fn calendar_flags_follow_the_timestamp() {
    let mut rng = StreamRng::new(3, 3);
    // 2025-03-29 is a Saturday.
    let features = extract_user(
        "U0001",
        &[txn(at(29, 23, 15), "Alcohol", true), txn(at(31, 9, 0), "Health", false)],
        &mut rng,
    )
    .unwrap();

    let late = &features[0];
    assert!(late.is_late_night && late.is_end_of_month && late.is_weekend);
    assert_eq!(late.day_of_week, 5);
    assert!(
        (0.99..=1.2).contains(&late.mood_proxy_score),
        "mood {} should be 1.0 plus noise below 0.2",
        late.mood_proxy_score
    );

    let morning = &features[1];
    assert!(!morning.is_late_night && !morning.is_weekend);
    assert!(morning.is_end_of_month);
    assert!((0.0..=0.2).contains(&morning.mood_proxy_score));
}
