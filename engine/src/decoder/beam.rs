use std::cmp::Ordering;

use crate::decoder::enumerate::ContinuationSet;
use crate::decoder::scorer::SequenceScorer;
use crate::decoder::state::{Deduplicator, Hypothesis};
use crate::decoder::strategy::ContinuationStrategy;
use crate::error::{BeamSummary, DecodeError, ModelError};
use crate::models::LanguageModel;
use crate::pianoroll::PitchFrame;

/// At most `width` hypotheses at one timestep, best first.
#[derive(Debug, Clone)]
pub struct Beam {
    hypotheses: Vec<Hypothesis>,
    width: usize,
    timestep: Option<usize>,
}

impl Beam {
    /// Holds only the empty root hypothesis, before timestep 0.
    pub fn root(width: usize) -> Self {
        Self {
            hypotheses: vec![Hypothesis::root()],
            width,
            timestep: None,
        }
    }

    pub fn len(&self) -> usize {
        self.hypotheses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hypotheses.is_empty()
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Timestep of the newest frame in every member, `None` for the root beam.
    pub fn timestep(&self) -> Option<usize> {
        self.timestep
    }

    pub fn hypotheses(&self) -> &[Hypothesis] {
        &self.hypotheses
    }

    pub fn best(&self) -> Option<&Hypothesis> {
        self.hypotheses.first()
    }

    pub fn summary(&self) -> BeamSummary {
        BeamSummary {
            size: self.hypotheses.len(),
            best_score: self.hypotheses.first().map(Hypothesis::score),
            worst_score: self.hypotheses.last().map(Hypothesis::score),
        }
    }
}

/// Ranking used for pruning: score descending, then newest frame in bit-pattern order.
/// Callers rely on a stable sort to fall back to insertion order.
fn rank(a: &Hypothesis, b: &Hypothesis) -> Ordering {
    b.score()
        .total_cmp(&a.score())
        .then_with(|| a.last_frame().cmp(&b.last_frame()))
}

#[derive(Debug)]
struct Expansion {
    candidates: Vec<Hypothesis>,
    attempted: usize,
    impossible: usize,
    last_failure: Option<ModelError>,
}

pub struct BeamManager<'a> {
    strategy: &'a dyn ContinuationStrategy,
    language: &'a dyn LanguageModel,
    scorer: SequenceScorer,
    dedup: Deduplicator,
    dedup_window: usize,
    width: usize,
    workers: usize,
}

impl<'a> BeamManager<'a> {
    pub fn new(
        strategy: &'a dyn ContinuationStrategy,
        language: &'a dyn LanguageModel,
        scorer: SequenceScorer,
        dedup_window: usize,
        width: usize,
        workers: usize,
    ) -> Self {
        Self {
            strategy,
            language,
            scorer,
            dedup: Deduplicator::new(dedup_window),
            dedup_window,
            width,
            workers: workers.max(1),
        }
    }

    /// Extends every hypothesis of `beam` with its continuations for `frame`, then prunes.
    pub fn expand(
        &self,
        beam: &Beam,
        t: usize,
        frame: &PitchFrame,
        include_language: bool,
    ) -> Result<Beam, DecodeError> {
        let shared = self.strategy.shared(frame)?;
        let expansions = self.expand_all(
            beam.hypotheses(),
            t,
            frame,
            shared.as_ref(),
            include_language,
        );

        let mut attempted = 0;
        let mut failed = 0;
        let mut impossible = 0;
        let mut last_failure = None;
        let mut candidates = Vec::new();
        for expansion in expansions {
            attempted += expansion.attempted;
            impossible += expansion.impossible;
            failed += expansion.attempted - expansion.impossible - expansion.candidates.len();
            if expansion.last_failure.is_some() {
                last_failure = expansion.last_failure;
            }
            candidates.extend(expansion.candidates);
        }

        if candidates.is_empty() {
            let reason = match last_failure {
                Some(err) => format!("all {attempted} candidates failed scoring, last: {err}"),
                None if impossible > 0 => {
                    format!("all {attempted} candidates have zero acoustic probability")
                }
                None => "no continuations were generated".to_string(),
            };
            return Err(DecodeError::Decoding {
                timestep: t,
                reason,
                summary: beam.summary(),
            });
        }
        if failed > 0 {
            log::debug!("Timestep {t}: dropped {failed} of {attempted} candidates");
        }
        if impossible > 0 {
            log::trace!("Timestep {t}: skipped {impossible} candidates the frame rules out");
        }

        self.prune(candidates, t, beam.summary())
    }

    /// Deduplicates and keeps the best `width` of `candidates`, which must be in insertion order.
    pub fn select(&self, candidates: Vec<Hypothesis>, t: usize) -> Result<Beam, DecodeError> {
        self.prune(candidates, t, BeamSummary::default())
    }

    fn prune(
        &self,
        candidates: Vec<Hypothesis>,
        t: usize,
        previous: BeamSummary,
    ) -> Result<Beam, DecodeError> {
        let mut survivors = self.dedup.collapse(candidates);
        survivors.sort_by(rank);
        survivors.truncate(self.width);
        if survivors.is_empty() {
            return Err(DecodeError::Decoding {
                timestep: t,
                reason: "no candidate survived pruning".to_string(),
                summary: previous,
            });
        }
        Ok(Beam {
            hypotheses: survivors,
            width: self.width,
            timestep: Some(t),
        })
    }

    fn expand_all(
        &self,
        hypotheses: &[Hypothesis],
        t: usize,
        frame: &PitchFrame,
        shared: Option<&ContinuationSet>,
        include_language: bool,
    ) -> Vec<Expansion> {
        let workers = self.workers.min(hypotheses.len()).max(1);
        if workers == 1 {
            return hypotheses
                .iter()
                .map(|h| self.expand_one(h, t, frame, shared, include_language))
                .collect();
        }

        let chunk = hypotheses.len().div_ceil(workers);
        std::thread::scope(|scope| {
            let handles: Vec<_> = hypotheses
                .chunks(chunk)
                .map(|part| {
                    scope.spawn(move || {
                        part.iter()
                            .map(|h| self.expand_one(h, t, frame, shared, include_language))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            // Joined in spawn order, so results stay in hypothesis order.
            handles
                .into_iter()
                .flat_map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
                })
                .collect()
        })
    }

    fn expand_one(
        &self,
        hypothesis: &Hypothesis,
        t: usize,
        frame: &PitchFrame,
        shared: Option<&ContinuationSet>,
        include_language: bool,
    ) -> Expansion {
        let reads_context =
            self.strategy.reads_context() || self.scorer.reads_language(include_language);
        let context = if reads_context {
            hypothesis.context_for(self.language)
        } else {
            Vec::new()
        };
        let continuations = match self.strategy.continuations_for(
            &context,
            frame,
            shared,
            self.language,
        ) {
            Ok(continuations) => continuations,
            Err(err) => {
                log::warn!(
                    "Dropping hypothesis expansion: {}",
                    DecodeError::scoring(t, err.clone())
                );
                return Expansion {
                    candidates: Vec::new(),
                    attempted: 1,
                    impossible: 0,
                    last_failure: Some(err),
                };
            }
        };

        let mut expansion = Expansion {
            candidates: Vec::with_capacity(continuations.set.len()),
            attempted: continuations.set.len(),
            impossible: 0,
            last_failure: None,
        };
        for continuation in &continuations.set {
            // Mixed marginals can propose a pattern the acoustic frame rules out entirely.
            if frame.log_prob(&continuation.bits) == f64::NEG_INFINITY {
                expansion.impossible += 1;
                continue;
            }
            match self.scorer.score_in_context(
                &context,
                &continuation.bits,
                frame,
                self.language,
                include_language,
            ) {
                Ok(increment) => expansion.candidates.push(hypothesis.extend(
                    continuation.bits.clone(),
                    increment,
                    continuations.prior.clone(),
                    self.dedup_window,
                )),
                Err(err) => {
                    log::warn!(
                        "Dropping candidate {:?}: {}",
                        continuation.bits,
                        DecodeError::scoring(t, err.clone())
                    );
                    expansion.last_failure = Some(err);
                }
            }
        }
        expansion
    }
}
