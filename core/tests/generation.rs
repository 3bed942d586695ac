//! Archetype registry and event generator tests.

use impulse_core::{
    archetype::{Archetype, ArchetypeRegistry, LabelBonus},
    config::{GeneratorConfig, PipelineConfig},
    dataset::Dataset,
    error::PipelineError,
    generator::EventGenerator,
    rng::{RngBank, StreamRng},
};
use std::collections::HashMap;

#[test]
fn archetype_draws_converge_to_weights() {
    let registry = ArchetypeRegistry::canonical().unwrap();
    let mut rng = StreamRng::new(2024, 7);
    const DRAWS: usize = 100_000;

    let mut counts: HashMap<String, usize> = HashMap::new();
    for _ in 0..DRAWS {
        *counts.entry(registry.pick(&mut rng).name.clone()).or_insert(0) += 1;
    }

    for archetype in registry.archetypes() {
        let observed = counts.get(&archetype.name).copied().unwrap_or(0) as f64 / DRAWS as f64;
        assert!(
            (observed - archetype.weight).abs() < 0.01,
            "{} drawn {observed:.4} of the time, weight is {}",
            archetype.name,
            archetype.weight
        );
    }
}

#[test]
fn relative_weights_are_normalised() {
    let mut archetypes = Archetype::canonical();
    for a in &mut archetypes {
        a.weight *= 4.0;
    }
    let registry = ArchetypeRegistry::new(archetypes).unwrap();
    let p = registry.probability("controlled").unwrap();
    assert!((p - 0.35).abs() < 1e-12, "controlled probability {p}");
}

#[test]
fn malformed_registry_is_a_configuration_error() {
    let empty = ArchetypeRegistry::new(vec![]);
    assert!(matches!(empty, Err(PipelineError::Configuration(_))), "empty registry accepted");

    let mut negative = Archetype::canonical();
    negative[0].weight = -0.1;
    assert!(matches!(
        ArchetypeRegistry::new(negative),
        Err(PipelineError::Configuration(_))
    ));

    let mut nan = Archetype::canonical();
    nan[1].weight = f64::NAN;
    assert!(matches!(ArchetypeRegistry::new(nan), Err(PipelineError::Configuration(_))));

    let mut zero = Archetype::canonical();
    for a in &mut zero {
        a.weight = 0.0;
    }
    assert!(matches!(ArchetypeRegistry::new(zero), Err(PipelineError::Configuration(_))));

    let mut dup = Archetype::canonical();
    dup[1].name = dup[0].name.clone();
    assert!(matches!(ArchetypeRegistry::new(dup), Err(PipelineError::Configuration(_))));
}

#[test]
fn canonical_bonuses_match_archetypes() {
    let registry = ArchetypeRegistry::canonical().unwrap();
    assert_eq!(
        registry.get("freq_binger").unwrap().bonus,
        LabelBonus::HighVelocity { min_velocity: 5, points: 1.5 }
    );
    assert_eq!(registry.get("controlled").unwrap().bonus, LabelBonus::None);
}

#[test]
fn malformed_generator_config_fails_fast() {
    let registry = ArchetypeRegistry::canonical().unwrap();
    let cases: [(&str, fn(&mut GeneratorConfig)); 6] = [
        ("zero users", |c| c.num_users = 0),
        ("zero transactions", |c| c.transactions_per_user = 0),
        ("empty vocabulary", |c| c.categories.clear()),
        ("inverted spend", |c| {
            c.avg_spend_min = 3000.0;
            c.avg_spend_max = 100.0;
        }),
        ("inverted hours", |c| c.daytime_hours = (22, 8)),
        ("inverted multiplier", |c| c.impulse_amount_multiplier = (4.0, 0.5)),
    ];

    for (label, mutate) in cases {
        let mut config = GeneratorConfig::default();
        mutate(&mut config);
        let result = EventGenerator::new(&config, &registry);
        assert!(
            matches!(result, Err(PipelineError::Configuration(_))),
            "{label}: expected ConfigurationError"
        );
    }
}

#[test]
fn dataset_generation_rejects_bad_archetypes() {
    let mut config = PipelineConfig::default_test();
    config.generator.archetypes.clear();
    let err = Dataset::generate(&config, 1).unwrap_err();
    assert!(matches!(err, PipelineError::Configuration(_)), "got {err}");
}

#[test]
fn user_sequences_are_sorted_and_within_ranges() {
    let config = GeneratorConfig::default();
    let registry = ArchetypeRegistry::canonical().unwrap();
    let generator = EventGenerator::new(&config, &registry).unwrap();
    let bank = RngBank::new(77);

    for index in 0..50 {
        let mut rng = bank.for_user(index);
        let (user, txns) = generator.generate_user(index, &mut rng).unwrap();

        assert_eq!(user.user_id, format!("U{index:04}"));
        assert!(
            (200.0..=2000.0).contains(&user.avg_spend),
            "avg spend {} out of range",
            user.avg_spend
        );
        assert_eq!(txns.len(), config.transactions_per_user);

        for pair in txns.windows(2) {
            assert!(
                pair[0].timestamp <= pair[1].timestamp,
                "{}: {} after {}",
                user.user_id,
                pair[0].timestamp,
                pair[1].timestamp
            );
        }

        for t in &txns {
            let category = config.category(&t.category).expect("category from vocabulary");
            assert_eq!(category.impulse_prone, t.impulse_prone);
            let (lo, hi) = if t.impulse_prone { (0.5, 4.0) } else { (0.1, 1.5) };
            assert!(
                t.amount >= (lo * user.avg_spend * 100.0).floor() / 100.0
                    && t.amount <= (hi * user.avg_spend * 100.0).ceil() / 100.0,
                "amount {} outside [{lo}, {hi}] x {}",
                t.amount,
                user.avg_spend
            );
            assert_eq!((t.amount * 100.0).round() / 100.0, t.amount, "amount not in cents");
        }
    }
}

#[test]
fn night_owls_transact_late_more_often_than_controlled_users() {
    let config = PipelineConfig {
        generator: GeneratorConfig {
            num_users: 200,
            ..GeneratorConfig::default()
        },
        ..PipelineConfig::default()
    };
    let dataset = Dataset::generate(&config, 5).unwrap();

    let late_rate = |name: &str| {
        let rows: Vec<_> = dataset.rows.iter().filter(|r| r.archetype == name).collect();
        rows.iter().filter(|r| r.is_late_night == 1).count() as f64 / rows.len() as f64
    };
    let owl = late_rate("night_owl");
    let controlled = late_rate("controlled");
    assert!(
        owl > controlled + 0.3,
        "night_owl late rate {owl:.3} vs controlled {controlled:.3}"
    );
}

#[test]
fn rows_are_grouped_by_user_in_index_order() {
    let config = PipelineConfig::default_test();
    let dataset = Dataset::generate(&config, 11).unwrap();
    assert_eq!(
        dataset.len(),
        config.generator.num_users * config.generator.transactions_per_user
    );

    let mut previous: Option<&str> = None;
    let mut seen = std::collections::HashSet::new();
    for row in &dataset.rows {
        if previous != Some(row.user_id.as_str()) {
            assert!(seen.insert(row.user_id.clone()), "{} appears in two blocks", row.user_id);
            if let Some(p) = previous {
                assert!(row.user_id.as_str() > p, "{} after {p}", row.user_id);
            }
            previous = Some(row.user_id.as_str());
        }
    }
}
