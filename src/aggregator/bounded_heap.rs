//! Bounded max-heap aggregation.
//!
//! The heap holds at most K live candidates with the current worst on top, so
//! a new candidate is admitted only when it beats that worst one. Memory stays
//! O(K) no matter how many agents answer.
//!
//! Under [`DedupPolicy::BestById`] an id that improves replaces its previous
//! entry lazily: the old heap entry is left behind as stale and discarded when
//! it surfaces, or when the heap is compacted.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use parking_lot::Mutex;

use crate::aggregator::{DedupPolicy, clip_batch};
use crate::types::Candidate;

/// Stale entries tolerated before the heap is rebuilt.
const COMPACTION_SLACK: usize = 64;

/// Heap entry ordered so the worst-ranked candidate sits on top.
#[derive(Debug, Clone)]
struct RankedEntry(Candidate);

impl PartialEq for RankedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for RankedEntry {}

impl PartialOrd for RankedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RankedEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.rank_cmp(&other.0)
    }
}

#[derive(Debug, Default)]
struct HeapState {
    heap: BinaryHeap<RankedEntry>,
    /// Best live distance per id; only maintained under `BestById`.
    best: HashMap<String, f32>,
    live: usize,
    pushes: usize,
}

fn is_live(best: &HashMap<String, f32>, dedup: DedupPolicy, entry: &RankedEntry) -> bool {
    match dedup {
        DedupPolicy::KeepAll => true,
        DedupPolicy::BestById => best
            .get(&entry.0.id)
            .is_some_and(|d| d.total_cmp(&entry.0.distance) == Ordering::Equal),
    }
}

impl HeapState {
    fn prune_top(&mut self, dedup: DedupPolicy) {
        while let Some(top) = self.heap.peek() {
            if is_live(&self.best, dedup, top) {
                break;
            }
            self.heap.pop();
        }
    }

    fn offer(&mut self, candidate: Candidate, k: usize, dedup: DedupPolicy) {
        if dedup == DedupPolicy::BestById {
            if let Some(current) = self.best.get(&candidate.id) {
                if candidate.distance.total_cmp(current) == Ordering::Less {
                    self.best.insert(candidate.id.clone(), candidate.distance);
                    self.heap.push(RankedEntry(candidate));
                }
                return;
            }
        }

        if self.live >= k {
            self.prune_top(dedup);
            let beats_worst = self
                .heap
                .peek()
                .is_some_and(|worst| candidate.rank_cmp(&worst.0) == Ordering::Less);
            if !beats_worst {
                return;
            }
            if let Some(evicted) = self.heap.pop() {
                if dedup == DedupPolicy::BestById {
                    self.best.remove(&evicted.0.id);
                }
                self.live -= 1;
            }
        }

        if dedup == DedupPolicy::BestById {
            self.best.insert(candidate.id.clone(), candidate.distance);
        }
        self.heap.push(RankedEntry(candidate));
        self.live += 1;
    }

    fn compact(&mut self, dedup: DedupPolicy) {
        let best = &self.best;
        let kept: Vec<RankedEntry> = std::mem::take(&mut self.heap)
            .into_iter()
            .filter(|entry| is_live(best, dedup, entry))
            .collect();
        self.heap = BinaryHeap::from(kept);
    }
}

/// Keeps the best K candidates seen so far in a bounded heap.
#[derive(Debug)]
pub struct BoundedHeapAggregator {
    k: usize,
    per_agent_k: usize,
    dedup: DedupPolicy,
    state: Mutex<HeapState>,
}

impl BoundedHeapAggregator {
    pub fn new(k: usize, per_agent_k: usize, dedup: DedupPolicy) -> Self {
        Self {
            k,
            per_agent_k,
            dedup,
            state: Mutex::new(HeapState {
                heap: BinaryHeap::with_capacity(k.min(1 << 16) + 1),
                ..Default::default()
            }),
        }
    }

    pub fn push(&self, _agent: &str, candidates: Vec<Candidate>) {
        let batch = clip_batch(candidates, self.per_agent_k);
        let mut state = self.state.lock();
        state.pushes += 1;
        if self.k == 0 {
            return;
        }
        for candidate in batch {
            state.offer(candidate, self.k, self.dedup);
        }
        if state.heap.len() > self.k * 2 + COMPACTION_SLACK {
            state.compact(self.dedup);
        }
    }

    pub fn finish(&self) -> Vec<Candidate> {
        let state = self.state.lock();
        let mut results: Vec<Candidate> = state
            .heap
            .iter()
            .filter(|entry| is_live(&state.best, self.dedup, entry))
            .map(|entry| entry.0.clone())
            .collect();
        results.sort_by(|a, b| a.rank_cmp(b));
        results.truncate(self.k);
        results
    }

    pub fn pushes(&self) -> usize {
        self.state.lock().pushes
    }
}

#[cfg(test)]
mod tests {
    use rand::Rng;

    use super::*;
    use crate::aggregator::finalize;

    fn batch(pairs: &[(&str, f32)]) -> Vec<Candidate> {
        pairs.iter().map(|(id, d)| Candidate::new(*id, *d)).collect()
    }

    #[test]
    fn test_keeps_best_k() {
        let aggregator = BoundedHeapAggregator::new(3, 0, DedupPolicy::KeepAll);
        aggregator.push("agent-0", batch(&[("a", 0.9), ("b", 0.1), ("c", 0.5)]));
        aggregator.push("agent-1", batch(&[("d", 0.3), ("e", 0.05), ("f", 0.7)]));

        let ids: Vec<_> = aggregator.finish().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["e", "b", "d"]);
        assert_eq!(aggregator.pushes(), 2);
    }

    #[test]
    fn test_best_by_id_replaces_worse_copy() {
        let aggregator = BoundedHeapAggregator::new(2, 0, DedupPolicy::BestById);
        aggregator.push("agent-0", batch(&[("x", 0.4), ("y", 0.5)]));
        aggregator.push("agent-1", batch(&[("x", 0.2), ("z", 0.6)]));
        aggregator.push("agent-2", batch(&[("x", 0.3)]));

        let results = aggregator.finish();
        assert_eq!(results, batch(&[("x", 0.2), ("y", 0.5)]));
    }

    #[test]
    fn test_replicated_scenario() {
        let sharded = BoundedHeapAggregator::new(3, 3, DedupPolicy::KeepAll);
        let replicated = BoundedHeapAggregator::new(3, 3, DedupPolicy::BestById);
        for agent in ["a0", "a1", "a2"] {
            sharded.push(agent, batch(&[("1", 0.1), ("2", 0.3)]));
            replicated.push(agent, batch(&[("1", 0.1), ("2", 0.3)]));
        }

        assert_eq!(sharded.finish(), batch(&[("1", 0.1), ("1", 0.1), ("1", 0.1)]));
        assert_eq!(replicated.finish(), batch(&[("1", 0.1), ("2", 0.3)]));
    }

    #[test]
    fn test_finish_is_idempotent() {
        let aggregator = BoundedHeapAggregator::new(2, 0, DedupPolicy::BestById);
        aggregator.push("agent-0", batch(&[("a", 0.4), ("b", 0.2)]));
        aggregator.push("agent-1", batch(&[("a", 0.1), ("c", 0.3)]));

        let first = aggregator.finish();
        assert_eq!(first, batch(&[("a", 0.1), ("b", 0.2)]));
        assert_eq!(aggregator.finish(), first);

        aggregator.push("agent-2", batch(&[("d", 0.0)]));
        assert_eq!(aggregator.finish(), batch(&[("d", 0.0), ("a", 0.1)]));
    }

    #[test]
    fn test_zero_k() {
        let aggregator = BoundedHeapAggregator::new(0, 0, DedupPolicy::KeepAll);
        aggregator.push("agent-0", batch(&[("a", 0.1)]));
        assert!(aggregator.finish().is_empty());
    }

    #[test]
    fn test_matches_sort_reference() {
        let mut rng = rand::rng();
        for dedup in [DedupPolicy::KeepAll, DedupPolicy::BestById] {
            for k in [1usize, 5, 40] {
                let aggregator = BoundedHeapAggregator::new(k, 0, dedup);
                let mut everything = Vec::new();
                for agent in 0..6 {
                    let mut batch: Vec<Candidate> = (0..50)
                        .map(|_| {
                            let id = format!("id-{}", rng.random_range(0..120));
                            Candidate::new(id, rng.random_range(0.0f32..1.0))
                        })
                        .collect();
                    batch.sort_by(|a, b| a.rank_cmp(b));
                    everything.extend(batch.iter().cloned());
                    aggregator.push(&format!("agent-{agent}"), batch);
                }

                let expected = finalize(everything, k, dedup);
                assert_eq!(aggregator.finish(), expected, "k={k} dedup={dedup:?}");
            }
        }
    }
}
