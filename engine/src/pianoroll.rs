//! Frame-level value types and conversions to and from pitch × time matrices.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use ndarray::{Array2, ArrayView2, Axis};

use crate::error::DecodeError;

/// Independent "note on" probabilities for every pitch at one timestep.
#[derive(Debug, Clone, PartialEq)]
pub struct PitchFrame {
    probs: Arc<[f64]>,
}

impl PitchFrame {
    pub fn new(probs: Vec<f64>) -> Result<Self, DecodeError> {
        if let Some((pitch, p)) = probs
            .iter()
            .enumerate()
            .find(|(_, p)| !(0.0..=1.0).contains(*p))
        {
            return Err(DecodeError::input(format!(
                "probability {p} for pitch {pitch} is outside [0, 1]"
            )));
        }
        Ok(Self {
            probs: probs.into(),
        })
    }

    /// A frame with every pitch at `p`.
    pub fn uniform(pitch_count: usize, p: f64) -> Result<Self, DecodeError> {
        Self::new(vec![p; pitch_count])
    }

    pub fn len(&self) -> usize {
        self.probs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probs.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.probs
    }

    /// Joint Bernoulli log-probability of `bits` under this frame.
    pub fn log_prob(&self, bits: &BinaryVector) -> f64 {
        self.probs
            .iter()
            .zip(bits.iter())
            .map(|(&p, &on)| if on { p.ln() } else { (1.0 - p).ln() })
            .sum()
    }

    pub(crate) fn ensure_len(&self, pitch_count: usize) -> Result<(), DecodeError> {
        if self.len() != pitch_count {
            return Err(DecodeError::input(format!(
                "frame has {} pitches, expected {pitch_count}",
                self.len()
            )));
        }
        Ok(())
    }
}

impl Deref for PitchFrame {
    type Target = [f64];

    fn deref(&self) -> &[f64] {
        &self.probs
    }
}

/// One candidate note-on pattern. Ordered lexicographically with `false < true`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BinaryVector {
    bits: Arc<[bool]>,
}

impl BinaryVector {
    pub fn new(bits: Vec<bool>) -> Self {
        Self { bits: bits.into() }
    }

    pub fn zeros(pitch_count: usize) -> Self {
        Self::new(vec![false; pitch_count])
    }

    /// Vector with exactly the listed pitches on.
    pub fn from_active(pitch_count: usize, active: &[usize]) -> Self {
        let mut bits = vec![false; pitch_count];
        for &pitch in active {
            if pitch < pitch_count {
                bits[pitch] = true;
            }
        }
        Self::new(bits)
    }

    pub fn active_pitches(&self) -> Vec<usize> {
        self.bits
            .iter()
            .enumerate()
            .filter_map(|(i, &on)| on.then_some(i))
            .collect()
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.bits
    }
}

impl Deref for BinaryVector {
    type Target = [bool];

    fn deref(&self) -> &[bool] {
        &self.bits
    }
}

impl fmt::Debug for BinaryVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pattern: String = self.bits.iter().map(|&b| if b { '1' } else { '0' }).collect();
        write!(f, "BinaryVector({pattern})")
    }
}

/// Splits a pitch × time probability matrix into validated frames.
pub fn frames_from_matrix(matrix: ArrayView2<f64>) -> Result<Vec<PitchFrame>, DecodeError> {
    matrix
        .axis_iter(Axis(1))
        .enumerate()
        .map(|(t, column)| {
            PitchFrame::new(column.to_vec())
                .map_err(|e| DecodeError::input(format!("timestep {t}: {e}")))
        })
        .collect()
}

/// Stacks frames as the columns of a pitch × time boolean matrix.
pub fn roll_from_frames(frames: &[BinaryVector], pitch_count: usize) -> Array2<bool> {
    let mut roll = Array2::from_elem((pitch_count, frames.len()), false);
    for (t, frame) in frames.iter().enumerate() {
        for (pitch, &on) in frame.iter().enumerate().take(pitch_count) {
            roll[[pitch, t]] = on;
        }
    }
    roll
}

/// Inverse of [`roll_from_frames`].
pub fn frames_from_roll(roll: ArrayView2<bool>) -> Vec<BinaryVector> {
    roll.axis_iter(Axis(1))
        .map(|column| BinaryVector::new(column.to_vec()))
        .collect()
}

pub(crate) fn matrix_from_frames(frames: &[PitchFrame], pitch_count: usize) -> Array2<f64> {
    let mut matrix = Array2::zeros((pitch_count, frames.len()));
    for (t, frame) in frames.iter().enumerate() {
        for (pitch, &p) in frame.iter().enumerate().take(pitch_count) {
            matrix[[pitch, t]] = p;
        }
    }
    matrix
}
