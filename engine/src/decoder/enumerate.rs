//! Lazy k-best enumeration of binary vectors under independent Bernoulli pitches.
//!
//! The most likely vector sets every pitch to its more probable state. Any other vector differs from
//! it by a set of flipped pitches, and because pitches are independent its log-probability is the
//! MAP log-probability minus the sum of the flipped pitches' costs `|ln(p / (1 - p))|`. Flip sets
//! are explored best-first over ranks into the cost-sorted pitch order: a set whose highest rank is
//! `i` has two children, one adding rank `i + 1` and one moving rank `i` to `i + 1`. Each set is
//! reached from exactly one parent and no child is cheaper than its parent.
//!
//! Vectors of equal probability come out in ascending bit-pattern order. Pitches at exactly 0.5
//! cost nothing to flip and stay out of the lattice: every flip set stands for all subsets of them,
//! which are counted out in order as the group is consumed.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::error::DecodeError;
use crate::pianoroll::{BinaryVector, PitchFrame};

#[derive(Debug, Clone, PartialEq)]
pub struct Continuation {
    pub bits: BinaryVector,
    /// Log-probability under the distribution the set was enumerated from.
    pub log_prob: f64,
}

/// Candidate vectors for one timestep, most likely first.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContinuationSet {
    candidates: Vec<Continuation>,
}

impl ContinuationSet {
    pub fn new(candidates: Vec<Continuation>) -> Self {
        Self { candidates }
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Continuation> {
        self.candidates.iter()
    }

    pub fn contains(&self, bits: &BinaryVector) -> bool {
        self.candidates.iter().any(|c| &c.bits == bits)
    }

    /// Appends the members of `other` not already present, keeping order.
    pub fn union_with(&mut self, other: ContinuationSet) {
        for candidate in other.candidates {
            if !self.contains(&candidate.bits) {
                self.candidates.push(candidate);
            }
        }
    }
}

impl<'a> IntoIterator for &'a ContinuationSet {
    type Item = &'a Continuation;
    type IntoIter = std::slice::Iter<'a, Continuation>;

    fn into_iter(self) -> Self::IntoIter {
        self.candidates.iter()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TopKEnumerator {
    pitch_count: usize,
}

impl TopKEnumerator {
    pub fn new(pitch_count: usize) -> Self {
        Self { pitch_count }
    }

    pub fn pitch_count(&self) -> usize {
        self.pitch_count
    }

    /// The `k` most likely vectors, or all of them when fewer exist.
    pub fn enumerate(&self, probs: &[f64], k: usize) -> Result<ContinuationSet, DecodeError> {
        let lattice = self.lattice(probs)?;
        Ok(ContinuationSet::new(lattice.take(k).collect()))
    }

    pub fn enumerate_frame(
        &self,
        frame: &PitchFrame,
        k: usize,
    ) -> Result<ContinuationSet, DecodeError> {
        self.enumerate(frame.as_slice(), k)
    }

    /// Unbounded lazy iterator over vectors in decreasing probability order.
    pub fn lattice(&self, probs: &[f64]) -> Result<FlipLattice, DecodeError> {
        if probs.len() != self.pitch_count {
            return Err(DecodeError::input(format!(
                "probability vector has {} pitches, expected {}",
                probs.len(),
                self.pitch_count
            )));
        }
        if let Some((pitch, p)) = probs
            .iter()
            .enumerate()
            .find(|(_, p)| !(0.0..=1.0).contains(*p))
        {
            return Err(DecodeError::input(format!(
                "probability {p} for pitch {pitch} is outside [0, 1]"
            )));
        }
        Ok(FlipLattice::new(probs))
    }
}

#[derive(Debug)]
struct FlipSet {
    cost: f64,
    seq: u64,
    ranks: Vec<usize>,
}

impl PartialEq for FlipSet {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FlipSet {}

impl PartialOrd for FlipSet {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FlipSet {
    // BinaryHeap pops the greatest element: cheapest first, then oldest.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Iterator state of one enumeration.
#[derive(Debug)]
pub struct FlipLattice {
    map_bits: Vec<bool>,
    map_log_prob: f64,
    /// Pitches at exactly 0.5, in pitch order. Flipping one costs nothing.
    free: Vec<usize>,
    /// Remaining pitches by ascending flip cost.
    order: Vec<usize>,
    costs: Vec<f64>,
    heap: BinaryHeap<FlipSet>,
    /// Current tie group, smallest bit pattern on top.
    pending: BinaryHeap<Reverse<Vec<bool>>>,
    pending_log_prob: f64,
    seq: u64,
}

impl FlipLattice {
    fn new(probs: &[f64]) -> Self {
        let map_bits: Vec<bool> = probs.iter().map(|&p| p > 0.5).collect();
        let map_log_prob: f64 = probs.iter().map(|&p| p.max(1.0 - p).ln()).sum();

        let flip_cost: Vec<f64> = probs
            .iter()
            .map(|&p| (p.ln() - (1.0 - p).ln()).abs())
            .collect();
        let (free, mut order): (Vec<usize>, Vec<usize>) =
            (0..probs.len()).partition(|&i| flip_cost[i] == 0.0);
        order.sort_by(|&a, &b| flip_cost[a].total_cmp(&flip_cost[b]));
        let costs: Vec<f64> = order.iter().map(|&i| flip_cost[i]).collect();

        let mut lattice = Self {
            map_bits,
            map_log_prob,
            free,
            order,
            costs,
            heap: BinaryHeap::new(),
            pending: BinaryHeap::new(),
            pending_log_prob: map_log_prob,
            seq: 0,
        };
        lattice.push(Vec::new());
        lattice
    }

    fn push(&mut self, ranks: Vec<usize>) {
        let cost: f64 = ranks.iter().map(|&r| self.costs[r]).sum();
        self.heap.push(FlipSet {
            cost,
            seq: self.seq,
            ranks,
        });
        self.seq += 1;
    }

    fn push_children(&mut self, set: &FlipSet) {
        let n = self.costs.len();
        match set.ranks.last() {
            None if n > 0 => self.push(vec![0]),
            Some(&i) if i + 1 < n => {
                let mut extended = set.ranks.clone();
                extended.push(i + 1);
                self.push(extended);

                let mut moved = set.ranks.clone();
                if let Some(last) = moved.last_mut() {
                    *last = i + 1;
                }
                self.push(moved);
            }
            _ => {}
        }
    }

    fn bits_for(&self, ranks: &[usize]) -> Vec<bool> {
        let mut bits = self.map_bits.clone();
        for &r in ranks {
            let pitch = self.order[r];
            bits[pitch] = !bits[pitch];
        }
        bits
    }

    /// The next pattern after `bits` that differs only on free pitches, counting in binary with
    /// the lowest free pitch most significant. `None` once every free pitch is on.
    fn next_free_subset(&self, bits: &[bool]) -> Option<Vec<bool>> {
        let carry = self.free.iter().rposition(|&pitch| !bits[pitch])?;
        let mut next = bits.to_vec();
        next[self.free[carry]] = true;
        for &pitch in &self.free[carry + 1..] {
            next[pitch] = false;
        }
        Some(next)
    }

    /// Drains every queued flip set tied with the cheapest one into `pending`. Free pitches are
    /// left off here; `next` walks their subsets lazily.
    fn fill_group(&mut self) {
        let Some(first) = self.heap.pop() else {
            return;
        };
        if first.cost.is_infinite() {
            // Only zero-probability vectors remain.
            self.heap.clear();
            return;
        }

        let tied_cost = first.cost;
        self.push_children(&first);
        let mut group = vec![first];
        while self.heap.peek().is_some_and(|next| next.cost == tied_cost) {
            if let Some(next) = self.heap.pop() {
                self.push_children(&next);
                group.push(next);
            }
        }

        self.pending_log_prob = self.map_log_prob - tied_cost;
        for set in &group {
            let bits = self.bits_for(&set.ranks);
            self.pending.push(Reverse(bits));
        }
    }
}

impl Iterator for FlipLattice {
    type Item = Continuation;

    fn next(&mut self) -> Option<Continuation> {
        if self.pending.is_empty() {
            self.fill_group();
        }
        let Reverse(bits) = self.pending.pop()?;
        if let Some(successor) = self.next_free_subset(&bits) {
            self.pending.push(Reverse(successor));
        }
        Some(Continuation {
            bits: BinaryVector::new(bits),
            log_prob: self.pending_log_prob,
        })
    }
}
