pub(crate) mod beam;
pub(crate) mod enumerate;
pub(crate) mod scorer;
pub(crate) mod session;
pub(crate) mod state;
pub(crate) mod strategy;

pub use beam::{Beam, BeamManager};
pub use enumerate::{Continuation, ContinuationSet, FlipLattice, TopKEnumerator};
pub use scorer::SequenceScorer;
pub use session::{CancelToken, Decoder, Transcription};
pub use state::{signature_of, Deduplicator, Hypothesis, Signature};
pub use strategy::{mix_marginals, strategy_for, ContinuationStrategy, Continuations};
