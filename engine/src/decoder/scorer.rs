use crate::decoder::state::Hypothesis;
use crate::error::ModelError;
use crate::models::LanguageModel;
use crate::pianoroll::{BinaryVector, PitchFrame};

/// Combines acoustic and language log-likelihoods for one extension step:
/// `ln P_acoustic(c | frame) + λ · ln P_language(c | history)`.
#[derive(Debug, Clone, Copy)]
pub struct SequenceScorer {
    language_weight: f64,
}

impl SequenceScorer {
    pub fn new(language_weight: f64) -> Self {
        Self { language_weight }
    }

    pub fn language_weight(&self) -> f64 {
        self.language_weight
    }

    pub fn score(
        &self,
        hypothesis: &Hypothesis,
        continuation: &BinaryVector,
        frame: &PitchFrame,
        language: &dyn LanguageModel,
    ) -> Result<f64, ModelError> {
        let context = hypothesis.context_for(language);
        self.score_in_context(&context, continuation, frame, language, true)
    }

    /// Whether scoring with `include_language` consults the language model.
    pub fn reads_language(&self, include_language: bool) -> bool {
        include_language && self.language_weight > 0.0
    }

    /// Scores against an already materialized history. With `include_language` false, or λ = 0,
    /// the language model is not consulted.
    pub fn score_in_context(
        &self,
        context: &[BinaryVector],
        continuation: &BinaryVector,
        frame: &PitchFrame,
        language: &dyn LanguageModel,
        include_language: bool,
    ) -> Result<f64, ModelError> {
        if continuation.len() != frame.len() {
            return Err(ModelError::InvalidResponse(format!(
                "continuation has {} pitches, frame has {}",
                continuation.len(),
                frame.len()
            )));
        }

        let acoustic = frame.log_prob(continuation);
        let language_term = if self.reads_language(include_language) {
            let ll = language.score_next(context, continuation)?;
            if ll.is_nan() || ll > 0.0 || ll.is_infinite() {
                return Err(ModelError::InvalidResponse(format!(
                    "language log-likelihood {ll} is not a finite value <= 0"
                )));
            }
            self.language_weight * ll
        } else {
            0.0
        };

        let increment = acoustic + language_term;
        if !increment.is_finite() {
            return Err(ModelError::InvalidResponse(format!(
                "increment {increment} is not finite (acoustic {acoustic})"
            )));
        }
        Ok(increment)
    }
}
