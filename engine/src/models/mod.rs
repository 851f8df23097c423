//! Collaborator seams: where acoustic and language probabilities come from.

mod acoustic;
mod language;

pub use acoustic::MatrixAcousticModel;
pub use language::{PitchTransitionModel, TransitionParams, UniformLanguageModel};

use crate::error::ModelError;
use crate::pianoroll::{BinaryVector, PitchFrame};

/// Per-timestep pitch marginals from the acoustic model. Independent of any decoding history.
pub trait AcousticModel: Send + Sync {
    fn pitch_count(&self) -> usize;

    fn frame_count(&self) -> usize;

    fn marginal_at(&self, t: usize) -> Result<PitchFrame, ModelError>;
}

/// Autoregressive symbolic model over binary frames.
///
/// Implementations must be deterministic: identical `context` yields identical output, and no call
/// may depend on an earlier one.
pub trait LanguageModel: Send + Sync {
    /// Log-likelihood of `candidate` following `context` (which may be empty).
    fn score_next(
        &self,
        context: &[BinaryVector],
        candidate: &BinaryVector,
    ) -> Result<f64, ModelError>;

    /// Per-pitch "on" probabilities for the frame following `context`.
    fn predict_next(&self, context: &[BinaryVector]) -> Result<PitchFrame, ModelError>;

    /// How many trailing context frames the model reads. `None` means the whole history; with
    /// `Some(n)` callers may pass only the last `n` frames.
    fn context_window(&self) -> Option<usize> {
        None
    }
}
