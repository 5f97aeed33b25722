//! Merging of per-agent ranked candidate batches into one global top-K.
//!
//! Three interchangeable strategies share the same `push`/`finish` contract:
//! - [`PassThroughAggregator`]: a single replica answered, no merge needed
//! - [`SortedSliceAggregator`]: concatenate everything, sort, truncate
//! - [`BoundedHeapAggregator`]: bounded max-heap of size K, O(K) memory
//!
//! [`AggregatorSelector`] picks one per request. `push` is safe to call from
//! concurrent dispatch units; `finish` is non-destructive and idempotent.

pub mod bounded_heap;
pub mod pass_through;
pub mod selector;
pub mod sorted_slice;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::types::Candidate;

pub use bounded_heap::BoundedHeapAggregator;
pub use pass_through::PassThroughAggregator;
pub use selector::AggregatorSelector;
pub use sorted_slice::SortedSliceAggregator;

/// Aggregation strategy hint carried by requests and configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationAlgorithm {
    /// Let the selector decide from K and the replica count.
    Auto,
    PassThrough,
    SortSlice,
    BoundedHeap,
}

impl FromStr for AggregationAlgorithm {
    type Err = std::convert::Infallible;

    /// Unknown names fall back to the bounded heap.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let algorithm = match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "" | "auto" | "unknown" => AggregationAlgorithm::Auto,
            "pass_through" | "passthrough" => AggregationAlgorithm::PassThrough,
            "sort_slice" | "sortslice" | "sorted_slice" | "slice" => {
                AggregationAlgorithm::SortSlice
            }
            _ => AggregationAlgorithm::BoundedHeap,
        };
        Ok(algorithm)
    }
}

impl fmt::Display for AggregationAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AggregationAlgorithm::Auto => "auto",
            AggregationAlgorithm::PassThrough => "pass_through",
            AggregationAlgorithm::SortSlice => "sort_slice",
            AggregationAlgorithm::BoundedHeap => "bounded_heap",
        };
        f.write_str(name)
    }
}

/// What to do with equal ids pushed by different agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DedupPolicy {
    /// Sharded layout: equal ids are distinct objects, keep every copy.
    KeepAll,
    /// Replicated layout: keep only the lowest-distance copy of each id.
    BestById,
}

/// A concrete aggregation strategy chosen once per request.
#[derive(Debug)]
pub enum Aggregator {
    PassThrough(PassThroughAggregator),
    SortSlice(SortedSliceAggregator),
    BoundedHeap(BoundedHeapAggregator),
}

impl Aggregator {
    /// Accept one agent's ranked batch.
    pub fn push(&self, agent: &str, candidates: Vec<Candidate>) {
        match self {
            Aggregator::PassThrough(a) => a.push(agent, candidates),
            Aggregator::SortSlice(a) => a.push(agent, candidates),
            Aggregator::BoundedHeap(a) => a.push(agent, candidates),
        }
    }

    /// The globally ranked top-K, ascending by distance, ties broken by id.
    pub fn finish(&self) -> Vec<Candidate> {
        match self {
            Aggregator::PassThrough(a) => a.finish(),
            Aggregator::SortSlice(a) => a.finish(),
            Aggregator::BoundedHeap(a) => a.finish(),
        }
    }

    pub fn algorithm(&self) -> AggregationAlgorithm {
        match self {
            Aggregator::PassThrough(_) => AggregationAlgorithm::PassThrough,
            Aggregator::SortSlice(_) => AggregationAlgorithm::SortSlice,
            Aggregator::BoundedHeap(_) => AggregationAlgorithm::BoundedHeap,
        }
    }

    /// Number of batches pushed so far.
    pub fn pushes(&self) -> usize {
        match self {
            Aggregator::PassThrough(a) => a.pushes(),
            Aggregator::SortSlice(a) => a.pushes(),
            Aggregator::BoundedHeap(a) => a.pushes(),
        }
    }
}

/// Push-only handle given to dispatch units.
///
/// Units never see the [`Aggregator`] itself, so they cannot call `finish`.
/// The dispatcher seals the sink once every unit settled or was abandoned;
/// pushes after that are dropped.
#[derive(Debug, Clone)]
pub struct AggregatorSink {
    inner: Arc<Aggregator>,
    sealed: Arc<AtomicBool>,
}

impl AggregatorSink {
    pub(crate) fn new(inner: Arc<Aggregator>) -> Self {
        Self {
            inner,
            sealed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn push(&self, agent: &str, candidates: Vec<Candidate>) {
        if self.sealed.load(Ordering::Acquire) {
            tracing::debug!(agent, "late batch dropped, aggregation already sealed");
            return;
        }
        self.inner.push(agent, candidates);
    }

    pub(crate) fn seal(&self) {
        self.sealed.store(true, Ordering::Release);
    }
}

/// Truncate one pushed batch to the per-agent limit (0 = unlimited).
pub(crate) fn clip_batch(mut candidates: Vec<Candidate>, per_agent_k: usize) -> Vec<Candidate> {
    if per_agent_k > 0 && candidates.len() > per_agent_k {
        candidates.truncate(per_agent_k);
    }
    candidates
}

/// Sort, de-duplicate according to policy, and truncate to `k`.
pub(crate) fn finalize(
    mut candidates: Vec<Candidate>,
    k: usize,
    dedup: DedupPolicy,
) -> Vec<Candidate> {
    candidates.sort_by(|a, b| a.rank_cmp(b));
    if dedup == DedupPolicy::BestById {
        let mut seen = std::collections::HashSet::with_capacity(candidates.len());
        // sorted ascending, so the first copy of an id is its best
        candidates.retain(|c| seen.insert(c.id.clone()));
    }
    candidates.truncate(k);
    candidates
}
