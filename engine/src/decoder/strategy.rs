//! Continuation generation: which candidate frames each hypothesis is extended with.

use crate::decoder::enumerate::{ContinuationSet, TopKEnumerator};
use crate::error::{DecodeError, ModelError};
use crate::models::LanguageModel;
use crate::pianoroll::{BinaryVector, PitchFrame};
use crate::settings::{DecodingConfig, MixingRule, StrategyKind, UnionRanking};

/// Candidates for one hypothesis, plus the language prediction they were drawn from, if any.
#[derive(Debug, Clone)]
pub struct Continuations {
    pub set: ContinuationSet,
    pub prior: Option<PitchFrame>,
}

pub trait ContinuationStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Whether `continuations_for` looks at the hypothesis context at all.
    fn reads_context(&self) -> bool {
        true
    }

    /// Work that does not depend on any hypothesis, done once per timestep.
    fn shared(&self, frame: &PitchFrame) -> Result<Option<ContinuationSet>, DecodeError>;

    fn continuations_for(
        &self,
        context: &[BinaryVector],
        frame: &PitchFrame,
        shared: Option<&ContinuationSet>,
        language: &dyn LanguageModel,
    ) -> Result<Continuations, ModelError>;
}

pub fn strategy_for(config: &DecodingConfig, pitch_count: usize) -> Box<dyn ContinuationStrategy> {
    let enumerator = TopKEnumerator::new(pitch_count);
    let k = config.branch_factor;
    match config.strategy {
        StrategyKind::AcousticOnly => Box::new(AcousticOnly { enumerator, k }),
        StrategyKind::Product => Box::new(Product {
            enumerator,
            k,
            language_weight: config.language_weight,
            mixing: config.mixing,
        }),
        StrategyKind::Union => Box::new(Union {
            enumerator,
            k,
            language_weight: config.language_weight,
            ranking: config.union_ranking,
        }),
    }
}

/// Per-pitch combination of acoustic and language marginals with language weight λ.
pub fn mix_marginals(acoustic: &[f64], language: &[f64], weight: f64, rule: MixingRule) -> Vec<f64> {
    acoustic
        .iter()
        .zip(language)
        .map(|(&a, &l)| {
            let linear = (1.0 - weight) * a + weight * l;
            let p = match rule {
                MixingRule::Linear => linear,
                MixingRule::NormalizedProduct => {
                    let on = a.powf(1.0 - weight) * l.powf(weight);
                    let off = (1.0 - a).powf(1.0 - weight) * (1.0 - l).powf(weight);
                    let total = on + off;
                    if total > 0.0 && total.is_finite() {
                        on / total
                    } else {
                        // Acoustic and language models are certain of opposite outcomes.
                        linear
                    }
                }
            };
            p.clamp(0.0, 1.0)
        })
        .collect()
}

fn predict(
    language: &dyn LanguageModel,
    context: &[BinaryVector],
    pitch_count: usize,
) -> Result<PitchFrame, ModelError> {
    let prior = language.predict_next(context)?;
    if prior.len() != pitch_count {
        return Err(ModelError::InvalidResponse(format!(
            "language prediction has {} pitches, expected {pitch_count}",
            prior.len()
        )));
    }
    Ok(prior)
}

fn enumerate(
    enumerator: &TopKEnumerator,
    probs: &[f64],
    k: usize,
) -> Result<ContinuationSet, ModelError> {
    enumerator
        .enumerate(probs, k)
        .map_err(|e| ModelError::InvalidResponse(e.to_string()))
}

struct AcousticOnly {
    enumerator: TopKEnumerator,
    k: usize,
}

impl ContinuationStrategy for AcousticOnly {
    fn kind(&self) -> StrategyKind {
        StrategyKind::AcousticOnly
    }

    fn reads_context(&self) -> bool {
        false
    }

    fn shared(&self, frame: &PitchFrame) -> Result<Option<ContinuationSet>, DecodeError> {
        self.enumerator.enumerate_frame(frame, self.k).map(Some)
    }

    fn continuations_for(
        &self,
        _: &[BinaryVector],
        frame: &PitchFrame,
        shared: Option<&ContinuationSet>,
        _: &dyn LanguageModel,
    ) -> Result<Continuations, ModelError> {
        let set = match shared {
            Some(set) => set.clone(),
            None => enumerate(&self.enumerator, frame, self.k)?,
        };
        Ok(Continuations { set, prior: None })
    }
}

struct Product {
    enumerator: TopKEnumerator,
    k: usize,
    language_weight: f64,
    mixing: MixingRule,
}

impl ContinuationStrategy for Product {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Product
    }

    fn shared(&self, _: &PitchFrame) -> Result<Option<ContinuationSet>, DecodeError> {
        Ok(None)
    }

    fn continuations_for(
        &self,
        context: &[BinaryVector],
        frame: &PitchFrame,
        _: Option<&ContinuationSet>,
        language: &dyn LanguageModel,
    ) -> Result<Continuations, ModelError> {
        let prior = predict(language, context, self.enumerator.pitch_count())?;
        let mixed = mix_marginals(frame, &prior, self.language_weight, self.mixing);
        let set = enumerate(&self.enumerator, &mixed, self.k)?;
        Ok(Continuations {
            set,
            prior: Some(prior),
        })
    }
}

struct Union {
    enumerator: TopKEnumerator,
    k: usize,
    language_weight: f64,
    ranking: UnionRanking,
}

impl ContinuationStrategy for Union {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Union
    }

    fn shared(&self, frame: &PitchFrame) -> Result<Option<ContinuationSet>, DecodeError> {
        self.enumerator.enumerate_frame(frame, self.k).map(Some)
    }

    fn continuations_for(
        &self,
        context: &[BinaryVector],
        frame: &PitchFrame,
        shared: Option<&ContinuationSet>,
        language: &dyn LanguageModel,
    ) -> Result<Continuations, ModelError> {
        let prior = predict(language, context, self.enumerator.pitch_count())?;
        let language_set = match self.ranking {
            UnionRanking::LanguageOnly => enumerate(&self.enumerator, &prior, self.k)?,
            UnionRanking::Weighted => {
                let mixed =
                    mix_marginals(frame, &prior, self.language_weight, MixingRule::Linear);
                enumerate(&self.enumerator, &mixed, self.k)?
            }
        };

        let mut set = match shared {
            Some(set) => set.clone(),
            None => enumerate(&self.enumerator, frame, self.k)?,
        };
        set.union_with(language_set);
        Ok(Continuations {
            set,
            prior: Some(prior),
        })
    }
}
