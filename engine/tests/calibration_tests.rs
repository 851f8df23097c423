use keybeam_lib::calibration::{
    add_acoustic_noise, AcousticNoise, CalibrationConfig, Calibrator, CollectionPath,
    ContextPerturber,
};
use keybeam_lib::models::{
    MatrixAcousticModel, PitchTransitionModel, TransitionParams, UniformLanguageModel,
};
use keybeam_lib::settings::{MitigationMode, SampleSource, SamplingSchedule, StrategyKind};
use keybeam_lib::{BinaryVector, DecodeError, DecodingConfig, PitchFrame};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn make_context(frames: usize, pitches: usize, seed: u64) -> Vec<BinaryVector> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..frames)
        .map(|_| BinaryVector::new((0..pitches).map(|_| rng.random_bool(0.5)).collect()))
        .collect()
}

fn noise_injection(false_negative_rate: f64, false_positive_rate: f64) -> ContextPerturber {
    ContextPerturber::new(MitigationMode::NoiseInjection {
        false_negative_rate,
        false_positive_rate,
    })
}

#[test]
fn zero_rates_leave_context_unchanged() {
    let context = make_context(20, 8, 1);
    let lm = UniformLanguageModel::new(8);
    let mut rng = StdRng::seed_from_u64(2);

    let out = noise_injection(0.0, 0.0)
        .perturb(&context, &[], &lm, &mut rng)
        .unwrap();
    assert_eq!(out, context);

    let out = ContextPerturber::new(MitigationMode::None)
        .perturb(&context, &[], &lm, &mut rng)
        .unwrap();
    assert_eq!(out, context);
}

#[test]
fn unit_rates_flip_every_bit() {
    let context = make_context(20, 8, 3);
    let lm = UniformLanguageModel::new(8);
    let mut rng = StdRng::seed_from_u64(4);

    let out = noise_injection(1.0, 1.0)
        .perturb(&context, &[], &lm, &mut rng)
        .unwrap();
    for (before, after) in context.iter().zip(&out) {
        for (&a, &b) in before.iter().zip(after.iter()) {
            assert_ne!(a, b);
        }
    }
}

#[test]
fn false_negative_rate_only_turns_notes_off() {
    let context = vec![BinaryVector::new(vec![true; 1000]); 4];
    let lm = UniformLanguageModel::new(1000);
    let mut rng = StdRng::seed_from_u64(5);

    let out = noise_injection(0.3, 0.0)
        .perturb(&context, &[], &lm, &mut rng)
        .unwrap();
    let off: usize = out.iter().map(|f| f.iter().filter(|&&on| !on).count()).sum();
    let fraction = off as f64 / 4000.0;
    assert!((fraction - 0.3).abs() < 0.05, "fraction {fraction}");

    let silent = vec![BinaryVector::zeros(1000); 2];
    let out = noise_injection(0.3, 0.0)
        .perturb(&silent, &[], &lm, &mut rng)
        .unwrap();
    assert_eq!(out, silent);
}

#[test]
fn scheduled_sampling_draws_from_the_configured_source() {
    let context = vec![BinaryVector::zeros(3); 5];
    let lm = UniformLanguageModel::new(3);
    let acoustic = vec![PitchFrame::new(vec![1.0, 0.0, 1.0]).unwrap(); 5];
    let mut rng = StdRng::seed_from_u64(6);

    let always = ContextPerturber::new(MitigationMode::ScheduledSampling {
        schedule: SamplingSchedule::Constant { probability: 1.0 },
        source: SampleSource::Acoustic,
    });
    let out = always.perturb(&context, &acoustic, &lm, &mut rng).unwrap();
    for frame in &out {
        assert_eq!(frame, &BinaryVector::new(vec![true, false, true]));
    }

    let never = ContextPerturber::new(MitigationMode::ScheduledSampling {
        schedule: SamplingSchedule::Constant { probability: 0.0 },
        source: SampleSource::Language,
    });
    let out = never.perturb(&context, &acoustic, &lm, &mut rng).unwrap();
    assert_eq!(out, context);

    // Acoustic sampling needs an acoustic frame for every replaced position.
    let err = always.perturb(&context, &acoustic[..2], &lm, &mut rng).unwrap_err();
    assert!(matches!(err, DecodeError::Scoring { timestep: 2, .. }));
}

#[test]
fn acoustic_noise_moves_toward_half_and_clips() {
    let frames = vec![PitchFrame::new(vec![0.0, 0.2, 0.8, 1.0]).unwrap(); 50];
    let mut rng = StdRng::seed_from_u64(8);

    let untouched = add_acoustic_noise(&frames, 0.0, false, &mut rng).unwrap();
    assert_eq!(untouched[0].as_slice(), &[0.001, 0.2, 0.8, 0.999]);

    for gaussian in [false, true] {
        let noisy = add_acoustic_noise(&frames, 0.1, gaussian, &mut rng).unwrap();
        for frame in &noisy {
            assert!(frame.iter().all(|&p| (0.001..=0.999).contains(&p)));
            assert!(frame[1] >= 0.2 && frame[2] <= 0.8);
        }
    }

    assert!(matches!(
        add_acoustic_noise(&frames, -1.0, false, &mut rng),
        Err(DecodeError::Input(_))
    ));
}

#[test]
fn calibrator_collects_disagreeing_pitches() {
    let probs = Array2::from_shape_vec(
        (3, 4),
        vec![
            0.9, 0.8, 0.7, 0.95, //
            0.5, 0.505, 0.495, 0.5, //
            0.1, 0.2, 0.3, 0.05,
        ],
    )
    .unwrap();
    let acoustic = MatrixAcousticModel::new(probs).unwrap();
    let target = vec![
        BinaryVector::from_active(3, &[0]),
        BinaryVector::from_active(3, &[0, 1]),
        BinaryVector::from_active(3, &[0]),
        BinaryVector::from_active(3, &[]),
    ];
    let lm = UniformLanguageModel::new(3);
    let ground_truth = CalibrationConfig {
        path: CollectionPath::GroundTruth,
        ..CalibrationConfig::default()
    };
    let calibrator = Calibrator::new(DecodingConfig::default(), ground_truth, &lm);

    let samples = calibrator.collect(&acoustic, &target).unwrap();
    assert_eq!(samples.len(), 8);
    assert!(samples.iter().all(|s| s.pitch != 1));
    for s in &samples {
        assert_eq!(s.language, 0.5);
        assert_eq!(s.rank, 0);
        assert_eq!(s.target, target[s.timestep][s.pitch]);
    }

    let everything = Calibrator::new(
        DecodingConfig::default(),
        CalibrationConfig {
            min_diff: 0.0,
            ..ground_truth
        },
        &lm,
    );
    assert_eq!(everything.collect(&acoustic, &target).unwrap().len(), 12);

    let err = calibrator.collect(&acoustic, &target[..3]).unwrap_err();
    assert!(matches!(err, DecodeError::Input(_)));
}

#[test]
fn calibration_is_reproducible_for_a_seed() {
    let mut rng = StdRng::seed_from_u64(10);
    let probs = Array2::from_shape_fn((6, 10), |_| rng.random::<f64>());
    let acoustic = MatrixAcousticModel::new(probs).unwrap();
    let target = make_context(10, 6, 11);
    let lm = UniformLanguageModel::new(6);
    let decoding = DecodingConfig {
        seed: 99,
        mitigation: MitigationMode::NoiseInjection {
            false_negative_rate: 0.2,
            false_positive_rate: 0.05,
        },
        ..DecodingConfig::default()
    };
    let config = CalibrationConfig {
        min_diff: 0.01,
        noise: Some(AcousticNoise {
            amount: 0.1,
            gaussian: true,
        }),
        path: CollectionPath::GroundTruth,
        history: 3,
    };

    let first = Calibrator::new(decoding.clone(), config, &lm)
        .collect(&acoustic, &target)
        .unwrap();
    let second = Calibrator::new(decoding, config, &lm)
        .collect(&acoustic, &target)
        .unwrap();
    assert_eq!(first, second);
}

#[test]
fn history_window_pads_before_the_first_frame() {
    let probs =
        Array2::from_shape_vec((2, 4), vec![0.9, 0.8, 0.1, 0.7, 0.2, 0.3, 0.9, 0.1]).unwrap();
    let acoustic = MatrixAcousticModel::new(probs).unwrap();
    let target = vec![
        BinaryVector::from_active(2, &[0]),
        BinaryVector::from_active(2, &[0]),
        BinaryVector::from_active(2, &[1]),
        BinaryVector::from_active(2, &[0]),
    ];
    let lm = UniformLanguageModel::new(2);
    let config = CalibrationConfig {
        min_diff: 0.0,
        path: CollectionPath::GroundTruth,
        history: 3,
        ..CalibrationConfig::default()
    };
    let samples = Calibrator::new(DecodingConfig::default(), config, &lm)
        .collect(&acoustic, &target)
        .unwrap();
    assert_eq!(samples.len(), 8);

    let at = |t: usize, pitch: usize| {
        samples
            .iter()
            .find(|s| s.timestep == t && s.pitch == pitch)
            .unwrap()
            .history
            .clone()
    };
    assert_eq!(at(0, 0), vec![false, false, false]);
    assert_eq!(at(2, 0), vec![false, true, true]);
    assert_eq!(at(3, 0), vec![true, true, false]);
    assert_eq!(at(3, 1), vec![false, false, true]);
}

#[test]
fn beam_collection_observes_every_beam_member() {
    let mut rng = StdRng::seed_from_u64(21);
    let probs = Array2::from_shape_fn((3, 6), |_| rng.random_range(0.05..0.95));
    let acoustic = MatrixAcousticModel::new(probs).unwrap();
    let target = make_context(6, 3, 22);
    let lm = PitchTransitionModel::new(TransitionParams {
        initial: vec![0.3, 0.4, 0.5],
        sustain: vec![0.8, 0.7, 0.9],
        onset: vec![0.1, 0.2, 0.05],
    })
    .unwrap();
    let decoding = DecodingConfig {
        beam_width: 4,
        branch_factor: 3,
        strategy: StrategyKind::Product,
        language_weight: 0.5,
        dedup_window: 2,
        workers: 1,
        ..DecodingConfig::default()
    };
    let config = CalibrationConfig {
        min_diff: 0.0,
        history: 2,
        ..CalibrationConfig::default()
    };
    assert_eq!(config.path, CollectionPath::Beam);

    let samples = Calibrator::new(decoding.clone(), config, &lm)
        .collect(&acoustic, &target)
        .unwrap();

    // Timestep 0 sees only the root; later frames see up to four members, three pitches each.
    let at_zero = samples.iter().filter(|s| s.timestep == 0).count();
    assert_eq!(at_zero, 3);
    for t in 1..6 {
        let members = samples
            .iter()
            .filter(|s| s.timestep == t)
            .map(|s| s.rank)
            .max()
            .unwrap()
            + 1;
        assert!((2..=4).contains(&members), "timestep {t}: {members}");
        assert_eq!(samples.iter().filter(|s| s.timestep == t).count(), members * 3);
    }
    for s in &samples {
        assert_eq!(s.history.len(), 2);
        assert_eq!(s.target, target[s.timestep][s.pitch]);
        // A first-order model predicts from the newest history frame.
        let params = lm.params();
        let expected = match (s.timestep, s.history[1]) {
            (0, _) => params.initial[s.pitch],
            (_, true) => params.sustain[s.pitch],
            (_, false) => params.onset[s.pitch],
        };
        assert_eq!(s.language, expected);
    }

    let again = Calibrator::new(decoding, config, &lm)
        .collect(&acoustic, &target)
        .unwrap();
    assert_eq!(samples, again);
}

#[test]
fn ground_truth_and_beam_paths_agree_at_the_first_frame() {
    let mut rng = StdRng::seed_from_u64(31);
    let probs = Array2::from_shape_fn((4, 3), |_| rng.random_range(0.05..0.95));
    let acoustic = MatrixAcousticModel::new(probs).unwrap();
    let target = make_context(3, 4, 32);
    let lm = UniformLanguageModel::new(4);
    let config = CalibrationConfig {
        min_diff: 0.0,
        ..CalibrationConfig::default()
    };
    let decoding = DecodingConfig {
        beam_width: 3,
        branch_factor: 2,
        workers: 1,
        ..DecodingConfig::default()
    };

    let beam = Calibrator::new(decoding.clone(), config, &lm)
        .collect(&acoustic, &target)
        .unwrap();
    let truth = Calibrator::new(
        decoding,
        CalibrationConfig {
            path: CollectionPath::GroundTruth,
            ..config
        },
        &lm,
    )
    .collect(&acoustic, &target)
    .unwrap();

    let first = |samples: &[keybeam_lib::BlendingSample]| {
        samples
            .iter()
            .filter(|s| s.timestep == 0)
            .cloned()
            .collect::<Vec<_>>()
    };
    assert_eq!(first(&beam), first(&truth));
    assert!(beam.len() >= truth.len());
}
