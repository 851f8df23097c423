use ndarray::{Array2, ArrayView2, Axis};

use crate::error::{DecodeError, ModelError};
use crate::models::AcousticModel;
use crate::pianoroll::PitchFrame;

/// Acoustic output that has already been resolved into a pitch × time matrix.
#[derive(Debug, Clone)]
pub struct MatrixAcousticModel {
    probs: Array2<f64>,
}

impl MatrixAcousticModel {
    pub fn new(probs: Array2<f64>) -> Result<Self, DecodeError> {
        if let Some(((pitch, t), p)) = probs
            .indexed_iter()
            .find(|(_, p)| !(0.0..=1.0).contains(*p))
        {
            return Err(DecodeError::input(format!(
                "acoustic probability {p} at pitch {pitch}, timestep {t} is outside [0, 1]"
            )));
        }
        Ok(Self { probs })
    }

    pub fn view(&self) -> ArrayView2<'_, f64> {
        self.probs.view()
    }
}

impl AcousticModel for MatrixAcousticModel {
    fn pitch_count(&self) -> usize {
        self.probs.nrows()
    }

    fn frame_count(&self) -> usize {
        self.probs.ncols()
    }

    fn marginal_at(&self, t: usize) -> Result<PitchFrame, ModelError> {
        if t >= self.frame_count() {
            return Err(ModelError::InvalidResponse(format!(
                "timestep {t} beyond {} frames",
                self.frame_count()
            )));
        }
        PitchFrame::new(self.probs.index_axis(Axis(1), t).to_vec())
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))
    }
}
