use std::fmt;

use thiserror::Error;

/// Failures reported by the acoustic or language-model collaborators.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("collaborator timed out: {0}")]
    Timeout(String),
    #[error("collaborator returned an invalid response: {0}")]
    InvalidResponse(String),
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
}

/// Score range of the beam at the point a run failed.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BeamSummary {
    pub size: usize,
    pub best_score: Option<f64>,
    pub worst_score: Option<f64>,
}

impl fmt::Display for BeamSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.best_score, self.worst_score) {
            (Some(best), Some(worst)) => write!(
                f,
                "beam of {} hypotheses, scores {best:.4} .. {worst:.4}",
                self.size
            ),
            _ => write!(f, "beam of {} hypotheses", self.size),
        }
    }
}

/// Unified decoder errors.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Invalid input: {0}")]
    Input(String),

    #[error("Scoring failed at timestep {timestep}: {source}")]
    Scoring {
        timestep: usize,
        #[source]
        source: ModelError,
    },

    #[error("Decoding failed at timestep {timestep}: {reason} ({summary})")]
    Decoding {
        timestep: usize,
        reason: String,
        summary: BeamSummary,
    },

    #[error("Decoding cancelled before timestep {timestep}")]
    Cancelled { timestep: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("ndarray shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

impl DecodeError {
    pub(crate) fn input(message: impl Into<String>) -> Self {
        Self::Input(message.into())
    }

    pub(crate) fn scoring(timestep: usize, source: ModelError) -> Self {
        Self::Scoring { timestep, source }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Input(_) | Self::Shape(_) => {
                "The probability matrix or decoding configuration is malformed."
            }
            Self::Scoring { .. } => "A model collaborator failed while scoring candidates.",
            Self::Decoding { .. } => {
                "No candidate survived a timestep. Increase the branching factor or check the language model."
            }
            Self::Cancelled { .. } => "Decoding was cancelled before it finished.",
            Self::Io(_) => "Could not read or write decoder files. Check paths and permissions.",
            Self::Json(_) => "A JSON file could not be parsed.",
        }
    }
}
