//! Per-request choice of aggregation strategy.

use crate::aggregator::{
    AggregationAlgorithm, Aggregator, BoundedHeapAggregator, DedupPolicy, PassThroughAggregator,
    SortedSliceAggregator,
};

/// Picks the aggregation strategy for one request.
///
/// An explicit hint is always honored. For [`AggregationAlgorithm::Auto`]:
/// a single replica needs no merge, a small `K * replicas` product is sorted
/// in one go, and everything else goes through the bounded heap.
#[derive(Debug, Clone, Copy)]
pub struct AggregatorSelector {
    small_merge_threshold: usize,
    dedup: DedupPolicy,
}

impl AggregatorSelector {
    pub fn new(small_merge_threshold: usize, dedup: DedupPolicy) -> Self {
        Self {
            small_merge_threshold,
            dedup,
        }
    }

    /// Resolve `Auto` to a concrete algorithm without building anything.
    pub fn resolve(
        &self,
        algorithm: AggregationAlgorithm,
        requested_k: usize,
        replica_count: usize,
    ) -> AggregationAlgorithm {
        match algorithm {
            AggregationAlgorithm::Auto if replica_count <= 1 => AggregationAlgorithm::PassThrough,
            AggregationAlgorithm::Auto
                if requested_k.saturating_mul(replica_count) < self.small_merge_threshold =>
            {
                AggregationAlgorithm::SortSlice
            }
            AggregationAlgorithm::Auto => AggregationAlgorithm::BoundedHeap,
            explicit => explicit,
        }
    }

    pub fn select(
        &self,
        algorithm: AggregationAlgorithm,
        requested_k: usize,
        per_agent_k: usize,
        replica_count: usize,
    ) -> Aggregator {
        let resolved = self.resolve(algorithm, requested_k, replica_count);
        tracing::trace!(%algorithm, %resolved, requested_k, replica_count, "aggregator selected");
        match resolved {
            AggregationAlgorithm::PassThrough => Aggregator::PassThrough(PassThroughAggregator::new(
                requested_k,
                per_agent_k,
                self.dedup,
            )),
            AggregationAlgorithm::SortSlice => Aggregator::SortSlice(SortedSliceAggregator::new(
                requested_k,
                per_agent_k,
                replica_count,
                self.dedup,
            )),
            AggregationAlgorithm::BoundedHeap | AggregationAlgorithm::Auto => {
                Aggregator::BoundedHeap(BoundedHeapAggregator::new(
                    requested_k,
                    per_agent_k,
                    self.dedup,
                ))
            }
        }
    }
}
