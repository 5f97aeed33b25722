//! Concatenate-then-sort aggregation for small merges.

use parking_lot::Mutex;

use crate::aggregator::{DedupPolicy, clip_batch, finalize};
use crate::types::Candidate;

/// Collects every pushed candidate into one buffer and sorts on `finish`.
///
/// Cheapest when `K * replicas` is small enough that sorting everything is
/// faster than maintaining a heap.
#[derive(Debug)]
pub struct SortedSliceAggregator {
    k: usize,
    per_agent_k: usize,
    dedup: DedupPolicy,
    state: Mutex<SliceState>,
}

#[derive(Debug, Default)]
struct SliceState {
    buffer: Vec<Candidate>,
    pushes: usize,
}

impl SortedSliceAggregator {
    pub fn new(k: usize, per_agent_k: usize, expected_agents: usize, dedup: DedupPolicy) -> Self {
        let capacity = per_agent_k.max(k).saturating_mul(expected_agents.max(1));
        Self {
            k,
            per_agent_k,
            dedup,
            state: Mutex::new(SliceState {
                buffer: Vec::with_capacity(capacity.min(1 << 16)),
                pushes: 0,
            }),
        }
    }

    pub fn push(&self, _agent: &str, candidates: Vec<Candidate>) {
        let batch = clip_batch(candidates, self.per_agent_k);
        let mut state = self.state.lock();
        state.buffer.extend(batch);
        state.pushes += 1;
    }

    pub fn finish(&self) -> Vec<Candidate> {
        let snapshot = self.state.lock().buffer.clone();
        finalize(snapshot, self.k, self.dedup)
    }

    pub fn pushes(&self) -> usize {
        self.state.lock().pushes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(pairs: &[(&str, f32)]) -> Vec<Candidate> {
        pairs.iter().map(|(id, d)| Candidate::new(*id, *d)).collect()
    }

    #[test]
    fn test_merge_keeps_best_k() {
        let aggregator = SortedSliceAggregator::new(3, 10, 2, DedupPolicy::KeepAll);
        aggregator.push("agent-0", batch(&[("a", 0.5), ("b", 0.1)]));
        aggregator.push("agent-1", batch(&[("c", 0.3), ("d", 0.05), ("e", 0.9)]));

        let ids: Vec<_> = aggregator.finish().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["d", "b", "c"]);
    }

    #[test]
    fn test_replicated_scenario() {
        let sharded = SortedSliceAggregator::new(3, 3, 3, DedupPolicy::KeepAll);
        let replicated = SortedSliceAggregator::new(3, 3, 3, DedupPolicy::BestById);
        for agent in ["a0", "a1", "a2"] {
            sharded.push(agent, batch(&[("1", 0.1), ("2", 0.3)]));
            replicated.push(agent, batch(&[("1", 0.1), ("2", 0.3)]));
        }

        let sharded = sharded.finish();
        assert_eq!(sharded.len(), 3);
        assert!(sharded.iter().all(|c| c.id == "1" && c.distance == 0.1));

        let replicated = replicated.finish();
        assert_eq!(replicated, batch(&[("1", 0.1), ("2", 0.3)]));
    }

    #[test]
    fn test_per_agent_truncation() {
        let aggregator = SortedSliceAggregator::new(10, 1, 2, DedupPolicy::KeepAll);
        aggregator.push("agent-0", batch(&[("a", 0.1), ("b", 0.2)]));
        aggregator.push("agent-1", batch(&[("c", 0.3), ("d", 0.4)]));

        let ids: Vec<_> = aggregator.finish().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(aggregator.pushes(), 2);
    }

    #[test]
    fn test_finish_is_idempotent() {
        let aggregator = SortedSliceAggregator::new(2, 0, 2, DedupPolicy::BestById);
        aggregator.push("agent-0", batch(&[("a", 0.4), ("b", 0.2)]));
        aggregator.push("agent-1", batch(&[("a", 0.1), ("c", 0.3)]));

        let first = aggregator.finish();
        assert_eq!(first, batch(&[("a", 0.1), ("b", 0.2)]));
        assert_eq!(aggregator.finish(), first);

        // finish does not consume, later pushes still count
        aggregator.push("agent-2", batch(&[("d", 0.0)]));
        assert_eq!(aggregator.finish(), batch(&[("d", 0.0), ("a", 0.1)]));
    }

    #[test]
    fn test_ties_broken_by_id() {
        let aggregator = SortedSliceAggregator::new(2, 0, 1, DedupPolicy::KeepAll);
        aggregator.push("agent-0", batch(&[("z", 0.2), ("m", 0.2), ("a", 0.2)]));
        let ids: Vec<_> = aggregator.finish().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["a", "m"]);
    }
}
