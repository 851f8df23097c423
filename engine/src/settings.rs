use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

const ENV_PREFIX: &str = "KEYBEAM_";

/// Where each hypothesis gets its candidate continuations from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    /// One shared set from the acoustic frame alone.
    AcousticOnly,
    /// Per hypothesis, from the acoustic frame mixed with the language prediction.
    Product,
    /// Acoustic set plus a language-conditioned set per hypothesis.
    Union,
}

impl std::str::FromStr for StrategyKind {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "acoustic-only" | "acoustic" => Ok(Self::AcousticOnly),
            "product" | "joint" => Ok(Self::Product),
            "union" => Ok(Self::Union),
            other => Err(DecodeError::input(format!("unknown strategy '{other}'"))),
        }
    }
}

/// How the product strategy combines acoustic and language marginals per pitch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MixingRule {
    /// `(1 - λ)·a + λ·l`
    #[default]
    Linear,
    /// `a^(1-λ)·l^λ`, renormalized against the "off" outcome.
    NormalizedProduct,
}

/// Ranking of the language half of a union continuation set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnionRanking {
    #[default]
    LanguageOnly,
    /// Enumerate from the linear λ-mix instead of the pure prediction.
    Weighted,
}

/// Position-dependent replacement probability for scheduled sampling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SamplingSchedule {
    Constant { probability: f64 },
    Linear { start: f64, end: f64, horizon: usize },
    InverseSigmoid { k: f64 },
}

impl SamplingSchedule {
    /// Replacement probability for the context frame at `position`.
    pub fn probability_at(&self, position: usize) -> f64 {
        let p = match *self {
            Self::Constant { probability } => probability,
            Self::Linear {
                start,
                end,
                horizon,
            } => {
                if horizon == 0 {
                    end
                } else {
                    let frac = (position as f64 / horizon as f64).min(1.0);
                    start + (end - start) * frac
                }
            }
            Self::InverseSigmoid { k } => 1.0 - k / (k + (position as f64 / k).exp()),
        };
        p.clamp(0.0, 1.0)
    }

    fn validate(&self) -> Result<(), DecodeError> {
        let ok = match *self {
            Self::Constant { probability } => (0.0..=1.0).contains(&probability),
            Self::Linear { start, end, .. } => {
                (0.0..=1.0).contains(&start) && (0.0..=1.0).contains(&end)
            }
            Self::InverseSigmoid { k } => k.is_finite() && k >= 1.0,
        };
        if ok {
            Ok(())
        } else {
            Err(DecodeError::input(format!(
                "invalid sampling schedule {self:?}"
            )))
        }
    }
}

/// Distribution that scheduled sampling draws replacement frames from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SampleSource {
    #[default]
    Language,
    Acoustic,
}

/// Train/test mismatch mitigation for language-model contexts.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum MitigationMode {
    #[default]
    None,
    NoiseInjection {
        false_negative_rate: f64,
        false_positive_rate: f64,
    },
    ScheduledSampling {
        schedule: SamplingSchedule,
        #[serde(default)]
        source: SampleSource,
    },
}

impl MitigationMode {
    fn validate(&self) -> Result<(), DecodeError> {
        match self {
            Self::None => Ok(()),
            Self::NoiseInjection {
                false_negative_rate,
                false_positive_rate,
            } => {
                for (name, rate) in [
                    ("false_negative_rate", false_negative_rate),
                    ("false_positive_rate", false_positive_rate),
                ] {
                    if !(0.0..=1.0).contains(rate) {
                        return Err(DecodeError::input(format!(
                            "{name} must be in [0, 1], got {rate}"
                        )));
                    }
                }
                Ok(())
            }
            Self::ScheduledSampling { schedule, .. } => schedule.validate(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodingConfig {
    pub beam_width: usize,
    pub branch_factor: usize,
    pub strategy: StrategyKind,
    /// λ, the weight of the language model against the acoustic model.
    pub language_weight: f64,
    /// Frames hashed for hypothesis deduplication. 0 disables it.
    pub dedup_window: usize,
    pub mitigation: MitigationMode,
    pub mixing: MixingRule,
    pub union_ranking: UnionRanking,
    /// Expansion worker threads; 0 picks one per physical core.
    pub workers: usize,
    pub seed: u64,
}

impl Default for DecodingConfig {
    fn default() -> Self {
        Self {
            beam_width: 100,
            branch_factor: 20,
            strategy: StrategyKind::Product,
            language_weight: 0.5,
            dedup_window: 10,
            mitigation: MitigationMode::None,
            mixing: MixingRule::Linear,
            union_ranking: UnionRanking::LanguageOnly,
            workers: 0,
            seed: 0,
        }
    }
}

impl DecodingConfig {
    pub fn load(path: &Path) -> Result<Self, DecodeError> {
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        log::debug!("Loaded decoding config from {}", path.display());
        Ok(config)
    }

    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides(ENV_PREFIX);
        config
    }

    pub fn apply_env_overrides(&mut self, prefix: &str) {
        let parse_env = |suffix: &str| std::env::var(format!("{prefix}{suffix}")).ok();
        let apply = |suffix: &str, target: &mut usize| {
            if let Some(v) = parse_env(suffix).and_then(|s| s.trim().parse().ok()) {
                *target = v;
            }
        };

        apply("BEAM_WIDTH", &mut self.beam_width);
        apply("BRANCH_FACTOR", &mut self.branch_factor);
        apply("DEDUP_WINDOW", &mut self.dedup_window);
        apply("WORKERS", &mut self.workers);

        if let Some(v) = parse_env("LANGUAGE_WEIGHT").and_then(|s| s.trim().parse().ok()) {
            self.language_weight = v;
        }
        if let Some(v) = parse_env("STRATEGY").and_then(|s| s.parse().ok()) {
            self.strategy = v;
        }
        if let Some(v) = parse_env("SEED").and_then(|s| s.trim().parse().ok()) {
            self.seed = v;
        }
    }

    /// Checks the pitch-independent fields.
    pub fn validate(&self) -> Result<(), DecodeError> {
        if self.beam_width == 0 {
            return Err(DecodeError::input("beam width must be at least 1"));
        }
        if self.branch_factor == 0 {
            return Err(DecodeError::input("branching factor must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.language_weight) {
            return Err(DecodeError::input(format!(
                "language weight must be in [0, 1], got {}",
                self.language_weight
            )));
        }
        self.mitigation.validate()
    }

    /// Full validation once the pitch count is known.
    pub fn validate_for(&self, pitch_count: usize) -> Result<(), DecodeError> {
        self.validate()?;
        let space_exceeded = pitch_count < usize::BITS as usize
            && self.branch_factor > (1usize << pitch_count);
        if space_exceeded {
            return Err(DecodeError::input(format!(
                "branching factor {} exceeds the {} binary vectors of {pitch_count} pitches",
                self.branch_factor,
                1usize << pitch_count
            )));
        }
        Ok(())
    }

    pub(crate) fn worker_count(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get_physical().max(1)
        } else {
            self.workers
        }
    }
}
