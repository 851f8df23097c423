//! Train/test mismatch mitigation for language-model contexts.
//!
//! A language model trained on clean ground truth sees noisy decoded histories at inference time.
//! These routines perturb ground-truth contexts so calibration data reflects that mismatch.

use rand::Rng;

use crate::error::{DecodeError, ModelError};
use crate::models::LanguageModel;
use crate::pianoroll::{BinaryVector, PitchFrame};
use crate::settings::{MitigationMode, SampleSource};

const NOISE_FLOOR: f64 = 0.001;
const NOISE_CEIL: f64 = 0.999;

#[derive(Debug, Clone, Copy)]
pub struct ContextPerturber {
    mode: MitigationMode,
}

impl ContextPerturber {
    pub fn new(mode: MitigationMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> MitigationMode {
        self.mode
    }

    /// Perturbs a whole context, oldest frame first. Each frame sees the already perturbed frames
    /// before it. `acoustic` holds the acoustic frame for each position, needed only by acoustic
    /// scheduled sampling.
    pub fn perturb<R: Rng + ?Sized>(
        &self,
        context: &[BinaryVector],
        acoustic: &[PitchFrame],
        language: &dyn LanguageModel,
        rng: &mut R,
    ) -> Result<Vec<BinaryVector>, DecodeError> {
        let mut perturbed = Vec::with_capacity(context.len());
        for (position, frame) in context.iter().enumerate() {
            let next = self.perturb_frame(
                position,
                frame,
                &perturbed,
                acoustic.get(position),
                language,
                rng,
            )?;
            perturbed.push(next);
        }
        Ok(perturbed)
    }

    /// Perturbs the context frame at `position` given the perturbed frames that precede it.
    pub fn perturb_frame<R: Rng + ?Sized>(
        &self,
        position: usize,
        frame: &BinaryVector,
        preceding: &[BinaryVector],
        acoustic: Option<&PitchFrame>,
        language: &dyn LanguageModel,
        rng: &mut R,
    ) -> Result<BinaryVector, DecodeError> {
        match self.mode {
            MitigationMode::None => Ok(frame.clone()),
            MitigationMode::NoiseInjection {
                false_negative_rate,
                false_positive_rate,
            } => Ok(flip_bits(
                frame,
                false_negative_rate,
                false_positive_rate,
                rng,
            )),
            MitigationMode::ScheduledSampling { schedule, source } => {
                let p = schedule.probability_at(position);
                if rng.random::<f64>() >= p {
                    return Ok(frame.clone());
                }
                let marginals = match source {
                    SampleSource::Language => language
                        .predict_next(preceding)
                        .map_err(|e| DecodeError::scoring(position, e))?,
                    SampleSource::Acoustic => acoustic.cloned().ok_or_else(|| {
                        DecodeError::scoring(
                            position,
                            ModelError::Unavailable(format!(
                                "no acoustic frame for context position {position}"
                            )),
                        )
                    })?,
                };
                if marginals.len() != frame.len() {
                    return Err(DecodeError::scoring(
                        position,
                        ModelError::InvalidResponse(format!(
                            "sampling source has {} pitches, context frame has {}",
                            marginals.len(),
                            frame.len()
                        )),
                    ));
                }
                Ok(sample_frame(&marginals, rng))
            }
        }
    }
}

fn flip_bits<R: Rng + ?Sized>(
    frame: &BinaryVector,
    false_negative_rate: f64,
    false_positive_rate: f64,
    rng: &mut R,
) -> BinaryVector {
    let bits = frame
        .iter()
        .map(|&on| {
            let rate = if on {
                false_negative_rate
            } else {
                false_positive_rate
            };
            if rng.random::<f64>() < rate {
                !on
            } else {
                on
            }
        })
        .collect();
    BinaryVector::new(bits)
}

/// Draws one binary frame with every pitch an independent Bernoulli trial.
pub fn sample_frame<R: Rng + ?Sized>(marginals: &PitchFrame, rng: &mut R) -> BinaryVector {
    BinaryVector::new(
        marginals
            .iter()
            .map(|&p| rng.random::<f64>() < p)
            .collect(),
    )
}

/// Pushes every activation toward 0.5 by a random magnitude, then clips to [0.001, 0.999].
///
/// Magnitudes are uniform on `[0, amount)`, or `|N(0, amount)|` when `gaussian` is set.
pub fn add_acoustic_noise<R: Rng + ?Sized>(
    frames: &[PitchFrame],
    amount: f64,
    gaussian: bool,
    rng: &mut R,
) -> Result<Vec<PitchFrame>, DecodeError> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(DecodeError::input(format!(
            "noise amount must be a finite value >= 0, got {amount}"
        )));
    }
    frames
        .iter()
        .map(|frame| {
            let noisy = frame
                .iter()
                .map(|&p| {
                    let draw = if gaussian {
                        standard_normal(rng)
                    } else {
                        rng.random::<f64>()
                    };
                    let magnitude = (amount * draw).abs();
                    let moved = if p > 0.5 { p - magnitude } else { p + magnitude };
                    moved.clamp(NOISE_FLOOR, NOISE_CEIL)
                })
                .collect();
            PitchFrame::new(noisy)
        })
        .collect()
}

// Box-Muller; `1 - u` keeps the logarithm's argument in (0, 1].
fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let u1 = 1.0 - rng.random::<f64>();
    let u2 = rng.random::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}
