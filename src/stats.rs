//! Cluster-wide index statistics.
//!
//! Agents report an [`IndexStatsSnapshot`] each; [`StatsReducer`] folds them
//! into one snapshot with a per-field [`MergeRule`]. Merging is pure and
//! deterministic: counts sum, histograms sum bucket-wise, and medians are
//! recomputed from raw samples whenever every agent provided them.

pub mod reducer;
pub mod snapshot;

pub use reducer::{ExcludedSnapshot, MergeRule, MergedStats, StatsReducer};
pub use snapshot::{IndexCount, IndexStatsSnapshot, MedianSketch, StatKind, StatValue};
