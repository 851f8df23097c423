//! Blending data: per-pitch (acoustic, language, ground truth) observations.
//!
//! Samples come from one of two paths through the piece. Along the ground-truth path the language
//! model sees the (optionally perturbed) true history. Along the beam path every surviving
//! hypothesis of a weighted beam search contributes its own prediction at each frame, so the
//! model is observed on the decoded histories it meets at inference time. Only pitches where the
//! acoustic and language marginals disagree are kept. The records are training data for a model
//! that learns how much to trust each source.

pub(crate) mod mitigation;

pub use mitigation::{add_acoustic_noise, sample_frame, ContextPerturber};

use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::decoder::session::resolve_frames;
use crate::decoder::{strategy_for, Beam, BeamManager, SequenceScorer};
use crate::error::{DecodeError, ModelError};
use crate::models::{AcousticModel, LanguageModel};
use crate::pianoroll::{BinaryVector, PitchFrame};
use crate::settings::{DecodingConfig, MitigationMode, StrategyKind};

/// Noise pushed into acoustic activations before collection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AcousticNoise {
    pub amount: f64,
    #[serde(default)]
    pub gaussian: bool,
}

/// Which histories the language model is queried on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CollectionPath {
    /// Every member of a beam search run with the decoding configuration.
    #[default]
    Beam,
    /// The ground-truth roll alone, perturbed by the configured mitigation.
    GroundTruth,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Pitches whose acoustic and language marginals differ by at most this are skipped.
    /// Zero or below keeps every pitch.
    pub min_diff: f64,
    pub noise: Option<AcousticNoise>,
    pub path: CollectionPath,
    /// Preceding frames recorded with each sample.
    pub history: usize,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            min_diff: 0.01,
            noise: None,
            path: CollectionPath::Beam,
            history: 10,
        }
    }
}

/// One (acoustic, language, ground truth) observation for a single pitch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlendingSample {
    pub timestep: usize,
    /// Beam position of the history the prediction was made from; 0 on the ground-truth path.
    pub rank: usize,
    pub pitch: usize,
    pub acoustic: f64,
    pub language: f64,
    pub target: bool,
    /// The pitch's state in the preceding frames of that history, oldest first. Positions before
    /// timestep 0 read as off.
    pub history: Vec<bool>,
}

pub struct Calibrator<'a> {
    decoding: DecodingConfig,
    config: CalibrationConfig,
    language: &'a dyn LanguageModel,
}

impl<'a> Calibrator<'a> {
    /// `decoding` supplies the mitigation mode and the RNG seed.
    pub fn new(
        decoding: DecodingConfig,
        config: CalibrationConfig,
        language: &'a dyn LanguageModel,
    ) -> Self {
        Self {
            decoding,
            config,
            language,
        }
    }

    pub fn collect(
        &self,
        acoustic: &dyn AcousticModel,
        target: &[BinaryVector],
    ) -> Result<Vec<BlendingSample>, DecodeError> {
        let start = Instant::now();
        self.decoding.validate()?;
        let pitch_count = acoustic.pitch_count();
        let mut frames = resolve_frames(acoustic)?;
        if target.len() != frames.len() {
            return Err(DecodeError::input(format!(
                "ground truth has {} frames, acoustic input has {}",
                target.len(),
                frames.len()
            )));
        }
        if let Some(t) = target.iter().position(|f| f.len() != pitch_count) {
            return Err(DecodeError::input(format!(
                "ground-truth frame {t} has {} pitches, expected {pitch_count}",
                target[t].len()
            )));
        }

        let mut rng = StdRng::seed_from_u64(self.decoding.seed);
        if let Some(noise) = self.config.noise {
            frames = add_acoustic_noise(&frames, noise.amount, noise.gaussian, &mut rng)?;
        }

        let samples = match self.config.path {
            CollectionPath::GroundTruth => {
                self.along_ground_truth(&frames, target, pitch_count, &mut rng)?
            }
            CollectionPath::Beam => self.along_beam(&frames, target, pitch_count)?,
        };

        log::info!(
            "Collected {} blending samples over {} frames in {:?} (path: {:?})",
            samples.len(),
            frames.len(),
            start.elapsed(),
            self.config.path
        );
        Ok(samples)
    }

    fn along_ground_truth(
        &self,
        frames: &[PitchFrame],
        target: &[BinaryVector],
        pitch_count: usize,
        rng: &mut StdRng,
    ) -> Result<Vec<BlendingSample>, DecodeError> {
        let perturber = ContextPerturber::new(self.decoding.mitigation);
        log::debug!("Ground-truth contexts perturbed with {:?}", perturber.mode());
        let mut context: Vec<BinaryVector> = Vec::with_capacity(target.len());
        let mut samples = Vec::new();
        for (t, (frame, truth)) in frames.iter().zip(target).enumerate() {
            let visible = match self.language.context_window() {
                Some(window) => &context[context.len().saturating_sub(window)..],
                None => &context[..],
            };
            let prior = self.predict(visible, t, pitch_count)?;
            let recent = &context[context.len().saturating_sub(self.config.history)..];
            self.record(t, 0, frame, &prior, truth, recent, &mut samples);

            let next =
                perturber.perturb_frame(t, truth, &context, Some(frame), self.language, rng)?;
            context.push(next);
        }
        Ok(samples)
    }

    fn along_beam(
        &self,
        frames: &[PitchFrame],
        target: &[BinaryVector],
        pitch_count: usize,
    ) -> Result<Vec<BlendingSample>, DecodeError> {
        self.decoding.validate_for(pitch_count)?;
        if self.decoding.mitigation != MitigationMode::None {
            log::debug!("Beam collection ignores context mitigation");
        }

        let strategy = strategy_for(&self.decoding, pitch_count);
        let manager = BeamManager::new(
            strategy.as_ref(),
            self.language,
            SequenceScorer::new(self.decoding.language_weight),
            self.decoding.dedup_window,
            self.decoding.beam_width,
            self.decoding.worker_count(),
        );

        let mut beam = Beam::root(self.decoding.beam_width);
        let mut samples = Vec::new();
        for (t, (frame, truth)) in frames.iter().zip(target).enumerate() {
            for (rank, hypothesis) in beam.hypotheses().iter().enumerate() {
                let context = hypothesis.context_for(self.language);
                let prior = self.predict(&context, t, pitch_count)?;
                let recent = hypothesis.recent(self.config.history);
                self.record(t, rank, frame, &prior, truth, &recent, &mut samples);
            }
            let include_language = t > 0 || strategy.kind() != StrategyKind::AcousticOnly;
            beam = manager.expand(&beam, t, frame, include_language)?;
        }
        Ok(samples)
    }

    fn predict(
        &self,
        context: &[BinaryVector],
        t: usize,
        pitch_count: usize,
    ) -> Result<PitchFrame, DecodeError> {
        let prior = self
            .language
            .predict_next(context)
            .map_err(|e| DecodeError::scoring(t, e))?;
        if prior.len() != pitch_count {
            return Err(DecodeError::scoring(
                t,
                ModelError::InvalidResponse(format!(
                    "language prediction has {} pitches, expected {pitch_count}",
                    prior.len()
                )),
            ));
        }
        Ok(prior)
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        t: usize,
        rank: usize,
        frame: &PitchFrame,
        prior: &PitchFrame,
        truth: &BinaryVector,
        recent: &[BinaryVector],
        samples: &mut Vec<BlendingSample>,
    ) {
        let padding = self.config.history.saturating_sub(recent.len());
        for (pitch, (&a, &l)) in frame.iter().zip(prior.iter()).enumerate() {
            if self.config.min_diff > 0.0 && (a - l).abs() <= self.config.min_diff {
                continue;
            }
            let mut history = vec![false; padding];
            history.extend(recent.iter().map(|f| f[pitch]));
            samples.push(BlendingSample {
                timestep: t,
                rank,
                pitch,
                acoustic: a,
                language: l,
                target: truth[pitch],
                history,
            });
        }
    }
}
