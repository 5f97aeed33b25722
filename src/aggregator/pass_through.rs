//! Aggregation when only one replica is expected to answer.

use parking_lot::Mutex;

use crate::aggregator::{DedupPolicy, clip_batch, finalize};
use crate::types::Candidate;

/// Keeps the batches as pushed and only sorts when it has to.
///
/// A lone batch that is already ranked is returned as is (truncated to K).
/// More than one batch is tolerated and merged like a sorted slice.
#[derive(Debug)]
pub struct PassThroughAggregator {
    k: usize,
    per_agent_k: usize,
    dedup: DedupPolicy,
    batches: Mutex<Vec<Vec<Candidate>>>,
}

impl PassThroughAggregator {
    pub fn new(k: usize, per_agent_k: usize, dedup: DedupPolicy) -> Self {
        Self {
            k,
            per_agent_k,
            dedup,
            batches: Mutex::new(Vec::with_capacity(1)),
        }
    }

    pub fn push(&self, agent: &str, candidates: Vec<Candidate>) {
        let batch = clip_batch(candidates, self.per_agent_k);
        let mut batches = self.batches.lock();
        if !batches.is_empty() {
            tracing::debug!(agent, "pass-through aggregator received more than one batch");
        }
        batches.push(batch);
    }

    pub fn finish(&self) -> Vec<Candidate> {
        let batches = self.batches.lock();
        if let [only] = batches.as_slice() {
            let ranked = only.is_sorted_by(|a, b| a.rank_cmp(b).is_le());
            if ranked && self.dedup == DedupPolicy::KeepAll {
                return only.iter().take(self.k).cloned().collect();
            }
        }
        let all = batches.iter().flatten().cloned().collect();
        finalize(all, self.k, self.dedup)
    }

    pub fn pushes(&self) -> usize {
        self.batches.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_ranked_batch() {
        let aggregator = PassThroughAggregator::new(2, 10, DedupPolicy::KeepAll);
        aggregator.push(
            "agent-0",
            vec![
                Candidate::new("a", 0.1),
                Candidate::new("b", 0.2),
                Candidate::new("c", 0.3),
            ],
        );

        let results = aggregator.finish();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "a");
        assert_eq!(results[1].id, "b");
        assert_eq!(aggregator.finish(), results);
    }

    #[test]
    fn test_unsorted_and_multiple_batches() {
        let aggregator = PassThroughAggregator::new(3, 0, DedupPolicy::BestById);
        aggregator.push("agent-0", vec![Candidate::new("b", 0.4), Candidate::new("a", 0.2)]);
        aggregator.push("agent-1", vec![Candidate::new("a", 0.1), Candidate::new("c", 0.3)]);

        let ids: Vec<_> = aggregator.finish().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
        assert_eq!(aggregator.pushes(), 2);
    }

    #[test]
    fn test_empty() {
        let aggregator = PassThroughAggregator::new(5, 5, DedupPolicy::KeepAll);
        assert!(aggregator.finish().is_empty());
    }
}
