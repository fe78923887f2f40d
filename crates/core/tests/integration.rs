use std::sync::Arc;

use matchbook_core::{
    classify, explain, score, ComparatorRegistry, ConfigError, Configuration, ExactComparator,
    MatchKind, Property, Record,
};

fn name_config(maybe_threshold: f64) -> Result<Configuration, ConfigError> {
    Configuration::builder()
        .property(Property::identity("ID"))
        .property(Property::new("NAME", Arc::new(ExactComparator), 0.3, 0.8))
        .threshold(0.85)
        .maybe_threshold(maybe_threshold)
        .build()
}

fn person(id: &str, name: &str) -> Record {
    Record::builder().value("ID", id).value("NAME", name).build()
}

#[test]
fn single_property_perfect_match_is_possible_below_threshold() {
    let config = name_config(0.7).unwrap();
    let (a, b) = (person("1", "aaaaa"), person("2", "aaaaa"));

    let p = score(&config, &a, &b).unwrap();
    assert!((p - 0.8).abs() < 1e-12);
    assert_eq!(classify(&config, Some(p)), MatchKind::Possible);
}

#[test]
fn unreachable_bands_are_rejected() {
    // maybe_threshold above 0.8 leaves the possible band unreachable too
    let err = name_config(0.82).unwrap_err();
    assert!(matches!(err, ConfigError::UnreachableThreshold { .. }));

    let err = name_config(0.0).unwrap_err();
    assert!(matches!(err, ConfigError::UnreachableThreshold { .. }));
}

#[test]
fn mismatched_names_fall_to_low_probability() {
    let config = name_config(0.7).unwrap();
    let breakdown = explain(&config, &person("1", "aaaaa"), &person("2", "bbbbb"));
    assert_eq!(breakdown.contributions.len(), 1);
    assert!((breakdown.fused.unwrap() - 0.3).abs() < 1e-12);
    assert_eq!(breakdown.kind, MatchKind::Different);
}

#[test]
fn toml_configuration_scores_like_builder_configuration() {
    let input = r#"
threshold = 0.85
maybe_threshold = 0.7

[[properties]]
name = "ID"
identity = true

[[properties]]
name = "NAME"
comparator = "exact"
low = 0.3
high = 0.8
"#;
    let from_toml = Configuration::from_toml(input, &ComparatorRegistry::with_builtins()).unwrap();
    let built = name_config(0.7).unwrap();
    let (a, b) = (person("1", "aaaaa"), person("2", "aaaaa"));
    assert_eq!(score(&from_toml, &a, &b), score(&built, &a, &b));
}

#[test]
fn threshold_reachable_when_the_weak_property_is_absent() {
    let config = Configuration::builder()
        .property(Property::identity("ID"))
        .property(Property::new("NAME", Arc::new(ExactComparator), 0.3, 0.9))
        .property(Property::new("CITY", Arc::new(ExactComparator), 0.1, 0.4))
        .threshold(0.9)
        .build()
        .unwrap();

    let p = score(&config, &person("1", "acme"), &person("2", "acme")).unwrap();
    assert!((p - 0.9).abs() < 1e-12);
    assert_eq!(classify(&config, Some(p)), MatchKind::Same);
}
