//! Per-agent statistics values.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Median of a sorted, non-empty slice. Even lengths take the integer mean of
/// the two middle values.
pub(crate) fn median_of_sorted(values: &[u64]) -> u64 {
    let n = values.len();
    if n == 0 {
        return 0;
    }
    if n % 2 == 1 {
        values[n / 2]
    } else {
        let (a, b) = (values[n / 2 - 1], values[n / 2]);
        a / 2 + b / 2 + (a % 2 + b % 2) / 2
    }
}

/// Mergeable median.
///
/// Carries raw samples when the agent reported them, and always carries the
/// per-agent medians. When every merged sketch had raw samples the median is
/// exact; otherwise it falls back to the median of per-agent medians, which is
/// an approximation and is flagged with `exact == false`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedianSketch {
    samples: Vec<u64>,
    medians: Vec<u64>,
    exact: bool,
}

impl MedianSketch {
    /// Sketch over raw samples.
    pub fn from_samples(mut samples: Vec<u64>) -> Self {
        samples.sort_unstable();
        let medians = if samples.is_empty() {
            Vec::new()
        } else {
            vec![median_of_sorted(&samples)]
        };
        Self {
            samples,
            medians,
            exact: true,
        }
    }

    /// Sketch from an agent that only reports its own median.
    pub fn from_median(median: u64) -> Self {
        Self {
            samples: Vec::new(),
            medians: vec![median],
            exact: false,
        }
    }

    pub fn median(&self) -> u64 {
        if self.exact {
            median_of_sorted(&self.samples)
        } else {
            median_of_sorted(&self.medians)
        }
    }

    pub fn is_exact(&self) -> bool {
        self.exact
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub(crate) fn combine(&self, other: &Self) -> Self {
        let exact = self.exact && other.exact;
        let samples = if exact {
            merge_sorted(&self.samples, &other.samples)
        } else {
            Vec::new()
        };
        Self {
            samples,
            medians: merge_sorted(&self.medians, &other.medians),
            exact,
        }
    }
}

fn merge_sorted(a: &[u64], b: &[u64]) -> Vec<u64> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if a[i] <= b[j] {
            out.push(a[i]);
            i += 1;
        } else {
            out.push(b[j]);
            j += 1;
        }
    }
    out.extend_from_slice(&a[i..]);
    out.extend_from_slice(&b[j..]);
    out
}

/// One statistics field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StatValue {
    Count(u64),
    Gauge(f64),
    Flag(bool),
    /// Running mean kept as sum and sample count so merging stays associative.
    Mean { sum: f64, count: u64 },
    /// Fixed-width bucket counts.
    Histogram(Vec<u64>),
    Median(MedianSketch),
}

impl StatValue {
    pub fn kind(&self) -> StatKind {
        match self {
            StatValue::Count(_) => StatKind::Count,
            StatValue::Gauge(_) => StatKind::Gauge,
            StatValue::Flag(_) => StatKind::Flag,
            StatValue::Mean { .. } => StatKind::Mean,
            StatValue::Histogram(_) => StatKind::Histogram,
            StatValue::Median(_) => StatKind::Median,
        }
    }

    /// Shape used to check that agents agree on a field; histograms include
    /// their bucket count.
    pub(crate) fn shape(&self) -> (StatKind, usize) {
        match self {
            StatValue::Histogram(buckets) => (StatKind::Histogram, buckets.len()),
            other => (other.kind(), 0),
        }
    }

    pub fn as_count(&self) -> Option<u64> {
        match self {
            StatValue::Count(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_mean(&self) -> Option<f64> {
        match self {
            StatValue::Mean { sum, count } if *count > 0 => Some(sum / *count as f64),
            StatValue::Mean { .. } => Some(0.0),
            _ => None,
        }
    }

    pub fn as_histogram(&self) -> Option<&[u64]> {
        match self {
            StatValue::Histogram(buckets) => Some(buckets),
            _ => None,
        }
    }

    pub fn as_median(&self) -> Option<&MedianSketch> {
        match self {
            StatValue::Median(sketch) => Some(sketch),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StatKind {
    Count,
    Gauge,
    Flag,
    Mean,
    Histogram,
    Median,
}

/// Statistics reported by one agent, keyed by field name.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IndexStatsSnapshot {
    /// Agents that have not built an index yet report `valid == false`.
    pub valid: bool,
    pub fields: BTreeMap<String, StatValue>,
}

impl IndexStatsSnapshot {
    pub fn new() -> Self {
        Self {
            valid: true,
            fields: BTreeMap::new(),
        }
    }

    pub fn invalid() -> Self {
        Self::default()
    }

    pub fn with<S: Into<String>>(mut self, name: S, value: StatValue) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn with_count<S: Into<String>>(self, name: S, value: u64) -> Self {
        self.with(name, StatValue::Count(value))
    }

    pub fn with_histogram<S: Into<String>>(self, name: S, buckets: Vec<u64>) -> Self {
        self.with(name, StatValue::Histogram(buckets))
    }

    pub fn with_mean<S: Into<String>>(self, name: S, sum: f64, count: u64) -> Self {
        self.with(name, StatValue::Mean { sum, count })
    }

    pub fn with_samples<S: Into<String>>(self, name: S, samples: Vec<u64>) -> Self {
        self.with(name, StatValue::Median(MedianSketch::from_samples(samples)))
    }

    pub fn get(&self, name: &str) -> Option<&StatValue> {
        self.fields.get(name)
    }
}

/// Index element counters, reported by every agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IndexCount {
    pub stored: u64,
    pub uncommitted: u64,
    pub indexing: bool,
    pub saving: bool,
}

impl IndexCount {
    pub fn merge(self, other: IndexCount) -> IndexCount {
        IndexCount {
            stored: self.stored + other.stored,
            uncommitted: self.uncommitted + other.uncommitted,
            indexing: self.indexing || other.indexing,
            saving: self.saving || other.saving,
        }
    }
}
