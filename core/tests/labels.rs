//! Label assigner tests.

use impulse_core::{
    archetype::ArchetypeRegistry,
    config::{LabelConfig, PipelineConfig},
    dataset::Dataset,
    features::DerivedFeatures,
    labels::{LabelAssigner, LabelInput},
    rng::StreamRng,
};

fn quiet_features() -> DerivedFeatures {
    DerivedFeatures {
        hour: 14,
        day_of_week: 2,
        day_of_month: 10,
        is_late_night: false,
        is_end_of_month: false,
        is_weekend: false,
        spending_velocity: 0,
        transaction_gap_minutes: 999.0,
        category_switch_count: 1,
        mood_proxy_score: 0.1,
    }
}

#[test]
fn labels_are_binary() {
    let dataset = Dataset::generate(&PipelineConfig::default_test(), 21).unwrap();
    assert!(dataset.rows.iter().all(|r| r.impulse_label <= 1));
    let (negatives, positives) = dataset.label_counts();
    assert!(negatives > 0 && positives > 0, "{negatives} / {positives}");
}

#[test]
fn late_night_month_end_alcohol_binge_is_impulsive_without_noise() {
    let registry = ArchetypeRegistry::canonical().unwrap();
    let config = LabelConfig {
        noise_std: 0.0,
        ..LabelConfig::default()
    };
    let assigner = LabelAssigner::new(&config);
    let features = DerivedFeatures {
        hour: 2,
        day_of_week: 4,
        day_of_month: 28,
        is_late_night: true,
        is_end_of_month: true,
        transaction_gap_minutes: 5.0,
        ..quiet_features()
    };
    let input = LabelInput {
        archetype: registry.get("night_owl").unwrap(),
        features: &features,
        impulse_prone: true,
        amount: 3.0 * 500.0,
        avg_user_spend: 500.0,
    };

    let score = assigner.deterministic_score(&input);
    // late 2.0 + month end 1.5 + impulse 2.0 + amount 2.0 + gap 1.0 + night_owl 1.0
    assert!((score - 9.5).abs() < 1e-9, "score {score}");
    assert!(score >= 5.0);
    assert_eq!(assigner.assign(&input, &mut StreamRng::new(0, 0)), 1);
}

#[test]
fn quiet_daytime_purchase_scores_zero() {
    let registry = ArchetypeRegistry::canonical().unwrap();
    let config = LabelConfig::default();
    let assigner = LabelAssigner::new(&config);
    let features = quiet_features();
    let input = LabelInput {
        archetype: registry.get("controlled").unwrap(),
        features: &features,
        impulse_prone: false,
        amount: 100.0,
        avg_user_spend: 500.0,
    };
    assert_eq!(assigner.deterministic_score(&input), 0.0);
    assert_eq!(assigner.binarize(0.0), 0);
    assert_eq!(assigner.binarize(5.0), 1, "cutoff is inclusive");
}

#[test]
fn archetype_bonus_only_applies_to_signature_behaviour() {
    let registry = ArchetypeRegistry::canonical().unwrap();
    let config = LabelConfig::default();
    let assigner = LabelAssigner::new(&config);

    let fast = DerivedFeatures {
        spending_velocity: 5,
        ..quiet_features()
    };
    let score_for = |name: &str, f: &DerivedFeatures| {
        assigner.deterministic_score(&LabelInput {
            archetype: registry.get(name).unwrap(),
            features: f,
            impulse_prone: false,
            amount: 100.0,
            avg_user_spend: 500.0,
        })
    };

    // velocity >= 4 earns 1.5 for everyone; freq_binger adds 1.5 more at >= 5.
    assert_eq!(score_for("controlled", &fast), 1.5);
    assert_eq!(score_for("freq_binger", &fast), 3.0);
    assert_eq!(score_for("night_owl", &fast), 1.5);

    let month_end = DerivedFeatures {
        is_end_of_month: true,
        day_of_month: 27,
        ..quiet_features()
    };
    assert_eq!(score_for("eom_spender", &month_end), 2.5);
    assert_eq!(score_for("controlled", &month_end), 1.5);
}

#[test]
fn amount_threshold_is_strict() {
    let registry = ArchetypeRegistry::canonical().unwrap();
    let config = LabelConfig::default();
    let assigner = LabelAssigner::new(&config);
    let features = quiet_features();
    let at_threshold = LabelInput {
        archetype: registry.get("controlled").unwrap(),
        features: &features,
        impulse_prone: false,
        amount: 1250.0,
        avg_user_spend: 500.0,
    };
    assert_eq!(assigner.deterministic_score(&at_threshold), 0.0);
    let above = LabelInput {
        amount: 1250.01,
        ..at_threshold
    };
    assert_eq!(assigner.deterministic_score(&above), 2.0);
}
