use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use ndarray::Array2;

use crate::decoder::beam::{Beam, BeamManager};
use crate::decoder::scorer::SequenceScorer;
use crate::decoder::strategy::strategy_for;
use crate::error::DecodeError;
use crate::models::{AcousticModel, LanguageModel, MatrixAcousticModel};
use crate::pianoroll::{matrix_from_frames, roll_from_frames, PitchFrame};
use crate::settings::{DecodingConfig, StrategyKind};

/// Cooperative cancellation flag, checked before every timestep.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Result of a completed decode.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcription {
    /// Pitch × time binary piano roll.
    pub roll: Array2<bool>,
    /// Pitch × time language priors along the chosen path, when the strategy produced them.
    pub priors: Option<Array2<f64>>,
    pub log_likelihood: f64,
}

/// Runs one beam search from a probability matrix to a transcription.
///
/// The run validates everything up front, seeds the beam from frame 0, then for each later frame
/// expands, scores and prunes. It either returns a full transcription or an error; a cancelled or
/// failed run never yields partial output.
pub struct Decoder<'a> {
    config: DecodingConfig,
    language: &'a dyn LanguageModel,
    cancel: CancelToken,
}

impl<'a> Decoder<'a> {
    pub fn new(config: DecodingConfig, language: &'a dyn LanguageModel) -> Self {
        Self {
            config,
            language,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &DecodingConfig {
        &self.config
    }

    pub fn decode_matrix(&self, probs: Array2<f64>) -> Result<Transcription, DecodeError> {
        let acoustic = MatrixAcousticModel::new(probs)?;
        self.decode(&acoustic)
    }

    pub fn decode(&self, acoustic: &dyn AcousticModel) -> Result<Transcription, DecodeError> {
        let decode_start = Instant::now();
        self.config.validate()?;
        let pitch_count = acoustic.pitch_count();
        self.config.validate_for(pitch_count)?;
        let frames = resolve_frames(acoustic)?;

        log::debug!(
            "Decoding (strategy={:?}, beam={}, branch={}, lambda={}) pitches={} frames={}",
            self.config.strategy,
            self.config.beam_width,
            self.config.branch_factor,
            self.config.language_weight,
            pitch_count,
            frames.len()
        );

        let strategy = strategy_for(&self.config, pitch_count);
        let manager = BeamManager::new(
            strategy.as_ref(),
            self.language,
            SequenceScorer::new(self.config.language_weight),
            self.config.dedup_window,
            self.config.beam_width,
            self.config.worker_count(),
        );

        let mut beam = Beam::root(self.config.beam_width);
        for (t, frame) in frames.iter().enumerate() {
            if self.cancel.is_cancelled() {
                log::info!("Decoding cancelled before timestep {t}");
                return Err(DecodeError::Cancelled { timestep: t });
            }
            // The acoustic-only seed is scored on acoustic likelihood alone.
            let include_language = t > 0 || strategy.kind() != StrategyKind::AcousticOnly;
            beam = manager.expand(&beam, t, frame, include_language)?;
            log::trace!("Timestep {t}: {}", beam.summary());
        }

        let transcription = finalize(&beam, pitch_count)?;
        log::info!(
            "decode completed in {:?} (frames: {}, log-likelihood: {:.4})",
            decode_start.elapsed(),
            frames.len(),
            transcription.log_likelihood
        );
        Ok(transcription)
    }
}

pub(crate) fn resolve_frames(acoustic: &dyn AcousticModel) -> Result<Vec<PitchFrame>, DecodeError> {
    let frame_count = acoustic.frame_count();
    if frame_count == 0 {
        return Err(DecodeError::input("probability matrix has no timesteps"));
    }
    let pitch_count = acoustic.pitch_count();
    (0..frame_count)
        .map(|t| {
            let frame = acoustic
                .marginal_at(t)
                .map_err(|e| DecodeError::input(format!("timestep {t}: {e}")))?;
            frame
                .ensure_len(pitch_count)
                .map_err(|e| DecodeError::input(format!("timestep {t}: {e}")))?;
            Ok(frame)
        })
        .collect()
}

fn finalize(beam: &Beam, pitch_count: usize) -> Result<Transcription, DecodeError> {
    let best = beam.best().ok_or_else(|| DecodeError::Decoding {
        timestep: beam.timestep().unwrap_or(0),
        reason: "beam is empty at finalization".to_string(),
        summary: beam.summary(),
    })?;
    let history = best.history();
    let priors = best
        .priors()
        .map(|priors| matrix_from_frames(&priors, pitch_count));
    Ok(Transcription {
        roll: roll_from_frames(&history, pitch_count),
        priors,
        log_likelihood: best.score(),
    })
}
