use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, ModelError};
use crate::models::LanguageModel;
use crate::pianoroll::{BinaryVector, PitchFrame};

/// Assigns every candidate log-likelihood 0 and predicts 0.5 for every pitch.
#[derive(Debug, Clone, Copy)]
pub struct UniformLanguageModel {
    pitch_count: usize,
}

impl UniformLanguageModel {
    pub fn new(pitch_count: usize) -> Self {
        Self { pitch_count }
    }
}

impl LanguageModel for UniformLanguageModel {
    fn score_next(&self, _: &[BinaryVector], _: &BinaryVector) -> Result<f64, ModelError> {
        Ok(0.0)
    }

    fn predict_next(&self, _: &[BinaryVector]) -> Result<PitchFrame, ModelError> {
        PitchFrame::uniform(self.pitch_count, 0.5)
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))
    }

    fn context_window(&self) -> Option<usize> {
        Some(0)
    }
}

/// Per-pitch Markov parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionParams {
    /// P(on) with no preceding frame.
    pub initial: Vec<f64>,
    /// P(on | on in the previous frame).
    pub sustain: Vec<f64>,
    /// P(on | off in the previous frame).
    pub onset: Vec<f64>,
}

/// First-order model where each pitch depends only on its own state one frame back.
#[derive(Debug, Clone)]
pub struct PitchTransitionModel {
    params: TransitionParams,
}

impl PitchTransitionModel {
    pub fn new(params: TransitionParams) -> Result<Self, DecodeError> {
        let n = params.initial.len();
        if params.sustain.len() != n || params.onset.len() != n {
            return Err(DecodeError::input(format!(
                "transition tables disagree on pitch count: {} / {} / {}",
                n,
                params.sustain.len(),
                params.onset.len()
            )));
        }
        let all = params
            .initial
            .iter()
            .chain(&params.sustain)
            .chain(&params.onset);
        for &p in all {
            if !(0.0..=1.0).contains(&p) {
                return Err(DecodeError::input(format!(
                    "transition probability {p} is outside [0, 1]"
                )));
            }
        }
        Ok(Self { params })
    }

    pub fn load(path: &Path) -> Result<Self, DecodeError> {
        let data = std::fs::read_to_string(path)?;
        let params: TransitionParams = serde_json::from_str(&data)?;
        log::debug!(
            "Loaded {}-pitch transition model from {}",
            params.initial.len(),
            path.display()
        );
        Self::new(params)
    }

    /// Estimates the tables from binary frame sequences with add-one smoothing.
    pub fn fit(pitch_count: usize, sequences: &[Vec<BinaryVector>]) -> Result<Self, DecodeError> {
        let mut initial = vec![(1.0, 2.0); pitch_count];
        let mut sustain = vec![(1.0, 2.0); pitch_count];
        let mut onset = vec![(1.0, 2.0); pitch_count];

        for sequence in sequences {
            let mut previous: Option<&BinaryVector> = None;
            for frame in sequence {
                if frame.len() != pitch_count {
                    return Err(DecodeError::input(format!(
                        "training frame has {} pitches, expected {pitch_count}",
                        frame.len()
                    )));
                }
                for (pitch, &on) in frame.iter().enumerate() {
                    let slot = match previous {
                        None => &mut initial[pitch],
                        Some(prev) if prev[pitch] => &mut sustain[pitch],
                        Some(_) => &mut onset[pitch],
                    };
                    slot.0 += f64::from(u8::from(on));
                    slot.1 += 1.0;
                }
                previous = Some(frame);
            }
        }

        let ratio = |counts: Vec<(f64, f64)>| -> Vec<f64> {
            counts.into_iter().map(|(on, n)| on / n).collect()
        };
        Self::new(TransitionParams {
            initial: ratio(initial),
            sustain: ratio(sustain),
            onset: ratio(onset),
        })
    }

    pub fn params(&self) -> &TransitionParams {
        &self.params
    }

    fn prediction(&self, context: &[BinaryVector]) -> Result<Vec<f64>, ModelError> {
        let Some(previous) = context.last() else {
            return Ok(self.params.initial.clone());
        };
        if previous.len() != self.params.initial.len() {
            return Err(ModelError::InvalidResponse(format!(
                "context frame has {} pitches, model has {}",
                previous.len(),
                self.params.initial.len()
            )));
        }
        Ok(previous
            .iter()
            .enumerate()
            .map(|(pitch, &on)| {
                if on {
                    self.params.sustain[pitch]
                } else {
                    self.params.onset[pitch]
                }
            })
            .collect())
    }
}

impl LanguageModel for PitchTransitionModel {
    fn score_next(
        &self,
        context: &[BinaryVector],
        candidate: &BinaryVector,
    ) -> Result<f64, ModelError> {
        let probs = self.prediction(context)?;
        if candidate.len() != probs.len() {
            return Err(ModelError::InvalidResponse(format!(
                "candidate has {} pitches, model has {}",
                candidate.len(),
                probs.len()
            )));
        }
        Ok(probs
            .iter()
            .zip(candidate.iter())
            .map(|(&p, &on)| if on { p.ln() } else { (1.0 - p).ln() })
            .sum())
    }

    fn predict_next(&self, context: &[BinaryVector]) -> Result<PitchFrame, ModelError> {
        let probs = self.prediction(context)?;
        PitchFrame::new(probs).map_err(|e| ModelError::InvalidResponse(e.to_string()))
    }

    fn context_window(&self) -> Option<usize> {
        Some(1)
    }
}
