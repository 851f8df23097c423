use std::collections::hash_map::{DefaultHasher, Entry};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::models::LanguageModel;
use crate::pianoroll::{BinaryVector, PitchFrame};

struct FrameNode {
    bits: BinaryVector,
    prior: Option<PitchFrame>,
    parent: Option<Arc<FrameNode>>,
}

impl Drop for FrameNode {
    // Unlinks the chain one node at a time; the default drop recurses once per frame.
    fn drop(&mut self) {
        let mut parent = self.parent.take();
        while let Some(node) = parent {
            match Arc::try_unwrap(node) {
                Ok(mut node) => parent = node.parent.take(),
                Err(_) => break,
            }
        }
    }
}

/// Hash of a hypothesis' most recent frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature(u64);

/// A partial transcription. Extending one never touches the parent; both share the prefix.
#[derive(Clone)]
pub struct Hypothesis {
    tail: Option<Arc<FrameNode>>,
    len: usize,
    score: f64,
    signature: Signature,
}

impl fmt::Debug for Hypothesis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hypothesis")
            .field("len", &self.len)
            .field("score", &self.score)
            .field("signature", &self.signature)
            .field("last_frame", &self.last_frame())
            .finish()
    }
}

impl Hypothesis {
    /// The empty hypothesis every decode starts from.
    pub fn root() -> Self {
        Self {
            tail: None,
            len: 0,
            score: 0.0,
            signature: signature_of(&[], 0),
        }
    }

    /// Builds a hypothesis directly from a frame history.
    pub fn from_frames(frames: &[BinaryVector], score: f64, window: usize) -> Self {
        let mut hypothesis = frames.iter().fold(Self::root(), |h, bits| {
            h.extend(bits.clone(), 0.0, None, window)
        });
        hypothesis.score = score;
        hypothesis
    }

    pub fn extend(
        &self,
        bits: BinaryVector,
        increment: f64,
        prior: Option<PitchFrame>,
        window: usize,
    ) -> Self {
        let tail = Arc::new(FrameNode {
            bits,
            prior,
            parent: self.tail.clone(),
        });
        let mut extended = Self {
            tail: Some(tail),
            len: self.len + 1,
            score: self.score + increment,
            signature: Signature(0),
        };
        extended.signature = extended.compute_signature(window);
        extended
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Cumulative log-likelihood.
    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn signature(&self) -> Signature {
        self.signature
    }

    pub fn last_frame(&self) -> Option<&BinaryVector> {
        self.tail.as_deref().map(|node| &node.bits)
    }

    /// Frames from timestep 0 to the current one.
    pub fn history(&self) -> Vec<BinaryVector> {
        self.recent(self.len)
    }

    /// The last `window` frames (all of them when shorter), oldest first.
    pub fn recent(&self, window: usize) -> Vec<BinaryVector> {
        let mut frames: Vec<BinaryVector> = self
            .nodes()
            .take(window)
            .map(|node| node.bits.clone())
            .collect();
        frames.reverse();
        frames
    }

    /// The context a language model reads, cut to the window it declares.
    pub fn context_for(&self, language: &dyn LanguageModel) -> Vec<BinaryVector> {
        match language.context_window() {
            Some(window) => self.recent(window),
            None => self.history(),
        }
    }

    /// Language priors in timestep order, when every step recorded one.
    pub fn priors(&self) -> Option<Vec<PitchFrame>> {
        let mut priors = self
            .nodes()
            .map(|node| node.prior.clone())
            .collect::<Option<Vec<_>>>()?;
        priors.reverse();
        Some(priors)
    }

    fn nodes(&self) -> impl Iterator<Item = &FrameNode> {
        std::iter::successors(self.tail.as_deref(), |node| node.parent.as_deref())
    }

    fn compute_signature(&self, window: usize) -> Signature {
        let recent: Vec<&BinaryVector> = self.nodes().take(window).map(|n| &n.bits).collect();
        let mut hasher = DefaultHasher::new();
        recent.len().hash(&mut hasher);
        for bits in recent {
            bits.hash(&mut hasher);
        }
        Signature(hasher.finish())
    }
}

/// Signature over the last `window` frames of `history` (all of it when shorter).
pub fn signature_of(history: &[BinaryVector], window: usize) -> Signature {
    let start = history.len().saturating_sub(window);
    let mut hasher = DefaultHasher::new();
    (history.len() - start).hash(&mut hasher);
    for bits in history[start..].iter().rev() {
        bits.hash(&mut hasher);
    }
    Signature(hasher.finish())
}

/// Hashed beam search: hypotheses sharing a signature collapse onto the best-scoring one.
#[derive(Debug, Clone, Copy)]
pub struct Deduplicator {
    window: usize,
}

impl Deduplicator {
    pub fn new(window: usize) -> Self {
        Self { window }
    }

    pub fn is_enabled(&self) -> bool {
        self.window > 0
    }

    /// Survivors in their original relative order. Among equal signatures the strictly higher score
    /// wins and an exact tie keeps the earlier one.
    pub fn collapse(&self, candidates: Vec<Hypothesis>) -> Vec<Hypothesis> {
        if !self.is_enabled() {
            return candidates;
        }

        let mut winners: HashMap<Signature, usize> = HashMap::with_capacity(candidates.len());
        for (idx, candidate) in candidates.iter().enumerate() {
            match winners.entry(candidate.signature()) {
                Entry::Vacant(slot) => {
                    slot.insert(idx);
                }
                Entry::Occupied(mut slot) => {
                    if candidate.score() > candidates[*slot.get()].score() {
                        slot.insert(idx);
                    }
                }
            }
        }

        let before = candidates.len();
        let mut keep = vec![false; before];
        for idx in winners.into_values() {
            keep[idx] = true;
        }
        let survivors: Vec<Hypothesis> = candidates
            .into_iter()
            .zip(keep)
            .filter_map(|(h, kept)| kept.then_some(h))
            .collect();
        if survivors.len() < before {
            log::trace!(
                "Hashed beam merged {} of {before} candidates",
                before - survivors.len()
            );
        }
        survivors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(active: &[usize]) -> BinaryVector {
        BinaryVector::from_active(3, active)
    }

    #[test]
    fn extension_shares_prefix_and_accumulates() {
        let root = Hypothesis::root();
        let a = root.extend(frame(&[0]), -0.5, None, 2);
        let b = a.extend(frame(&[1]), -1.0, None, 2);
        let c = a.extend(frame(&[2]), -2.0, None, 2);

        assert_eq!(a.len(), 1);
        assert_eq!(b.history(), vec![frame(&[0]), frame(&[1])]);
        assert_eq!(c.history(), vec![frame(&[0]), frame(&[2])]);
        assert!((b.score() + 1.5).abs() < 1e-12);
        assert_eq!(c.last_frame(), Some(&frame(&[2])));
    }

    #[test]
    fn stored_signature_matches_history_signature() {
        let frames = vec![frame(&[0]), frame(&[1]), frame(&[2]), frame(&[])];
        for window in 0..6 {
            let h = Hypothesis::from_frames(&frames, 0.0, window);
            assert_eq!(h.signature(), signature_of(&frames, window));
        }
    }

    #[test]
    fn recent_keeps_the_newest_frames() {
        let frames = vec![frame(&[0]), frame(&[1]), frame(&[2])];
        let h = Hypothesis::from_frames(&frames, 0.0, 1);
        assert_eq!(h.recent(2), vec![frame(&[1]), frame(&[2])]);
        assert_eq!(h.recent(0), Vec::<BinaryVector>::new());
        assert_eq!(h.recent(10), frames);
    }

    #[test]
    fn priors_require_every_step() {
        let prior = PitchFrame::uniform(3, 0.5).unwrap();
        let with = Hypothesis::root()
            .extend(frame(&[0]), 0.0, Some(prior.clone()), 1)
            .extend(frame(&[1]), 0.0, Some(prior.clone()), 1);
        assert_eq!(with.priors().map(|p| p.len()), Some(2));

        let without = with.extend(frame(&[2]), 0.0, None, 1);
        assert!(without.priors().is_none());
    }
}
