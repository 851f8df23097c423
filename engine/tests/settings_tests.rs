use keybeam_lib::settings::{
    MitigationMode, MixingRule, SampleSource, SamplingSchedule, StrategyKind, UnionRanking,
};
use keybeam_lib::{DecodeError, DecodingConfig};

#[test]
fn defaults_match_documented_values() {
    let config = DecodingConfig::default();
    assert_eq!(config.beam_width, 100);
    assert_eq!(config.branch_factor, 20);
    assert_eq!(config.strategy, StrategyKind::Product);
    assert_eq!(config.language_weight, 0.5);
    assert_eq!(config.dedup_window, 10);
    assert_eq!(config.mitigation, MitigationMode::None);
    assert_eq!(config.mixing, MixingRule::Linear);
    assert_eq!(config.union_ranking, UnionRanking::LanguageOnly);
    assert!(config.validate().is_ok());
}

#[test]
fn json_fills_missing_fields_from_defaults() {
    let json = r#"{
        "beam_width": 7,
        "strategy": "union",
        "union_ranking": "weighted",
        "mitigation": {
            "mode": "scheduled-sampling",
            "schedule": { "kind": "inverse-sigmoid", "k": 5.0 }
        }
    }"#;
    let config: DecodingConfig = serde_json::from_str(json).unwrap();
    assert_eq!(config.beam_width, 7);
    assert_eq!(config.branch_factor, 20);
    assert_eq!(config.strategy, StrategyKind::Union);
    assert_eq!(config.union_ranking, UnionRanking::Weighted);
    assert_eq!(
        config.mitigation,
        MitigationMode::ScheduledSampling {
            schedule: SamplingSchedule::InverseSigmoid { k: 5.0 },
            source: SampleSource::Language,
        }
    );
    assert!(config.validate().is_ok());
}

#[test]
fn load_reads_config_file() {
    let path = std::env::temp_dir().join(format!("keybeam-config-{}.json", std::process::id()));
    std::fs::write(
        &path,
        r#"{ "mitigation": { "mode": "noise-injection", "false_negative_rate": 0.1, "false_positive_rate": 0.02 } }"#,
    )
    .unwrap();
    let config = DecodingConfig::load(&path).unwrap();
    std::fs::remove_file(&path).ok();
    assert_eq!(
        config.mitigation,
        MitigationMode::NoiseInjection {
            false_negative_rate: 0.1,
            false_positive_rate: 0.02,
        }
    );

    let missing = DecodingConfig::load(&path).unwrap_err();
    assert!(matches!(missing, DecodeError::Io(_)));
}

#[test]
fn env_overrides_apply_with_prefix() {
    let prefix = "KEYBEAM_SETTINGS_TEST_";
    std::env::set_var(format!("{prefix}BEAM_WIDTH"), "12");
    std::env::set_var(format!("{prefix}STRATEGY"), "acoustic-only");
    std::env::set_var(format!("{prefix}LANGUAGE_WEIGHT"), "0.25");
    std::env::set_var(format!("{prefix}BRANCH_FACTOR"), "not-a-number");

    let mut config = DecodingConfig::default();
    config.apply_env_overrides(prefix);
    assert_eq!(config.beam_width, 12);
    assert_eq!(config.strategy, StrategyKind::AcousticOnly);
    assert_eq!(config.language_weight, 0.25);
    assert_eq!(config.branch_factor, 20);
}

#[test]
fn strategy_names_parse_with_aliases() {
    assert_eq!("joint".parse::<StrategyKind>().unwrap(), StrategyKind::Product);
    assert_eq!(" Union ".parse::<StrategyKind>().unwrap(), StrategyKind::Union);
    assert_eq!(
        "acoustic".parse::<StrategyKind>().unwrap(),
        StrategyKind::AcousticOnly
    );
    assert!(matches!(
        "greedy".parse::<StrategyKind>(),
        Err(DecodeError::Input(_))
    ));
}

#[test]
fn invalid_values_fail_validation() {
    let cases = [
        DecodingConfig {
            language_weight: -0.1,
            ..DecodingConfig::default()
        },
        DecodingConfig {
            mitigation: MitigationMode::NoiseInjection {
                false_negative_rate: 1.5,
                false_positive_rate: 0.0,
            },
            ..DecodingConfig::default()
        },
        DecodingConfig {
            mitigation: MitigationMode::ScheduledSampling {
                schedule: SamplingSchedule::InverseSigmoid { k: f64::INFINITY },
                source: SampleSource::Acoustic,
            },
            ..DecodingConfig::default()
        },
    ];
    for config in cases {
        assert!(matches!(config.validate(), Err(DecodeError::Input(_))));
    }

    let config = DecodingConfig {
        branch_factor: 9,
        ..DecodingConfig::default()
    };
    assert!(config.validate_for(3).is_err());
    assert!(config.validate_for(4).is_ok());
}

#[test]
fn schedules_produce_clamped_probabilities() {
    let sigmoid = SamplingSchedule::InverseSigmoid { k: 1.0 };
    assert!((sigmoid.probability_at(0) - 0.5).abs() < 1e-12);
    assert!(sigmoid.probability_at(10) > sigmoid.probability_at(1));

    let linear = SamplingSchedule::Linear {
        start: 0.0,
        end: 0.8,
        horizon: 4,
    };
    assert_eq!(linear.probability_at(0), 0.0);
    assert!((linear.probability_at(2) - 0.4).abs() < 1e-12);
    assert!((linear.probability_at(100) - 0.8).abs() < 1e-12);

    let constant = SamplingSchedule::Constant { probability: 0.3 };
    assert_eq!(constant.probability_at(7), 0.3);
}
