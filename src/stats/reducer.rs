//! Merging of per-agent statistics into one cluster snapshot.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::stats::snapshot::{IndexCount, IndexStatsSnapshot, StatKind, StatValue};

type CombineFn = dyn Fn(&StatValue, &StatValue) -> Option<StatValue> + Send + Sync;

/// Associative combine function for one statistics field.
#[derive(Clone)]
pub enum MergeRule {
    Sum,
    Max,
    Min,
    /// Logical OR of flags.
    Any,
    /// Logical AND of flags.
    All,
    Mean,
    /// Bucket-wise sum of equal-width histograms.
    Histogram,
    Median,
    Custom(Arc<CombineFn>),
}

impl fmt::Debug for MergeRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeRule::Sum => f.write_str("Sum"),
            MergeRule::Max => f.write_str("Max"),
            MergeRule::Min => f.write_str("Min"),
            MergeRule::Any => f.write_str("Any"),
            MergeRule::All => f.write_str("All"),
            MergeRule::Mean => f.write_str("Mean"),
            MergeRule::Histogram => f.write_str("Histogram"),
            MergeRule::Median => f.write_str("Median"),
            MergeRule::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl MergeRule {
    /// Rule applied to a field with no explicit override.
    pub fn default_for(kind: StatKind) -> MergeRule {
        match kind {
            StatKind::Count => MergeRule::Sum,
            StatKind::Gauge => MergeRule::Max,
            StatKind::Flag => MergeRule::Any,
            StatKind::Mean => MergeRule::Mean,
            StatKind::Histogram => MergeRule::Histogram,
            StatKind::Median => MergeRule::Median,
        }
    }

    /// Combine two values, `None` when the rule does not apply to them.
    pub fn combine(&self, a: &StatValue, b: &StatValue) -> Option<StatValue> {
        use StatValue::*;

        let merged = match (self, a, b) {
            (MergeRule::Sum, Count(x), Count(y)) => Count(x.saturating_add(*y)),
            (MergeRule::Sum, Gauge(x), Gauge(y)) => Gauge(x + y),
            (MergeRule::Max, Count(x), Count(y)) => Count(*x.max(y)),
            (MergeRule::Max, Gauge(x), Gauge(y)) => Gauge(x.max(*y)),
            (MergeRule::Min, Count(x), Count(y)) => Count(*x.min(y)),
            (MergeRule::Min, Gauge(x), Gauge(y)) => Gauge(x.min(*y)),
            (MergeRule::Any, Flag(x), Flag(y)) => Flag(*x || *y),
            (MergeRule::All, Flag(x), Flag(y)) => Flag(*x && *y),
            (
                MergeRule::Mean,
                Mean { sum: s1, count: c1 },
                Mean { sum: s2, count: c2 },
            ) => Mean {
                sum: s1 + s2,
                count: c1 + c2,
            },
            (MergeRule::Histogram, Histogram(x), Histogram(y)) if x.len() == y.len() => {
                Histogram(x.iter().zip(y).map(|(a, b)| a.saturating_add(*b)).collect())
            }
            (MergeRule::Median, Median(x), Median(y)) => Median(x.combine(y)),
            (MergeRule::Custom(f), a, b) => return f(a, b),
            _ => return None,
        };
        Some(merged)
    }
}

/// A snapshot left out of the merge because it disagreed with the others.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcludedSnapshot {
    pub agent: String,
    pub field: String,
    pub reason: String,
}

/// Result of a statistics merge.
///
/// `excluded` is how reducer inconsistencies surface: the merge still succeeds
/// and the offending agents are listed here.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MergedStats {
    pub snapshot: IndexStatsSnapshot,
    pub merged_agents: Vec<String>,
    pub excluded: Vec<ExcludedSnapshot>,
    /// Agents whose snapshot was marked invalid.
    pub skipped_invalid: Vec<String>,
}

impl MergedStats {
    pub fn excluded_count(&self) -> usize {
        self.excluded.len()
    }
}

/// Folds per-agent snapshots field by field using per-field merge rules.
#[derive(Debug, Clone, Default)]
pub struct StatsReducer {
    rules: HashMap<String, MergeRule>,
}

impl StatsReducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reducer preconfigured for the agent index statistics fields.
    pub fn for_index_statistics() -> Self {
        Self::new()
            .with_rule("max_in_degree", MergeRule::Max)
            .with_rule("max_out_degree", MergeRule::Max)
            .with_rule("min_in_degree", MergeRule::Min)
            .with_rule("min_out_degree", MergeRule::Min)
            .with_rule("max_norm", MergeRule::Max)
            .with_rule("min_norm", MergeRule::Min)
    }

    pub fn with_rule<S: Into<String>>(mut self, field: S, rule: MergeRule) -> Self {
        self.rules.insert(field.into(), rule);
        self
    }

    fn rule_for(&self, field: &str, kind: StatKind) -> MergeRule {
        self.rules
            .get(field)
            .cloned()
            .unwrap_or_else(|| MergeRule::default_for(kind))
    }

    /// Merge the snapshots of every agent.
    ///
    /// Agents are folded in name order, so the output does not depend on how
    /// the caller built the map.
    pub fn merge(&self, snapshots: &BTreeMap<String, IndexStatsSnapshot>) -> MergedStats {
        let mut result = MergedStats::default();

        let mut valid = Vec::with_capacity(snapshots.len());
        for (agent, snapshot) in snapshots {
            if snapshot.valid {
                valid.push((agent, snapshot));
            } else {
                result.skipped_invalid.push(agent.clone());
            }
        }

        let expected = expected_shapes(&valid);

        let mut merged: BTreeMap<String, StatValue> = BTreeMap::new();
        'agents: for (agent, snapshot) in valid {
            for (field, value) in &snapshot.fields {
                let shape = value.shape();
                if let Some(want) = expected.get(field.as_str()) {
                    if shape != *want {
                        let reason = describe_mismatch(shape, *want);
                        tracing::warn!(
                            agent = %agent,
                            field = %field,
                            %reason,
                            "statistics snapshot excluded"
                        );
                        result.excluded.push(ExcludedSnapshot {
                            agent: agent.clone(),
                            field: field.clone(),
                            reason,
                        });
                        continue 'agents;
                    }
                }
            }

            // A rule failure excludes the whole snapshot.
            let mut staged = Vec::with_capacity(snapshot.fields.len());
            for (field, value) in &snapshot.fields {
                let next = match merged.get(field) {
                    Some(acc) => {
                        let rule = self.rule_for(field, value.kind());
                        match rule.combine(acc, value) {
                            Some(next) => next,
                            None => {
                                let reason = format!("merge rule {rule:?} does not apply");
                                tracing::warn!(
                                    agent = %agent,
                                    field = %field,
                                    %reason,
                                    "statistics snapshot excluded"
                                );
                                result.excluded.push(ExcludedSnapshot {
                                    agent: agent.clone(),
                                    field: field.clone(),
                                    reason,
                                });
                                continue 'agents;
                            }
                        }
                    }
                    None => value.clone(),
                };
                staged.push((field, next));
            }
            for (field, next) in staged {
                merged.insert(field.clone(), next);
            }
            result.merged_agents.push(agent.clone());
        }

        result.snapshot = IndexStatsSnapshot {
            valid: !result.merged_agents.is_empty(),
            fields: merged,
        };
        result
    }

    /// Sum stored and uncommitted counts, OR the indexing and saving flags.
    pub fn merge_counts(counts: &BTreeMap<String, IndexCount>) -> IndexCount {
        counts
            .values()
            .fold(IndexCount::default(), |acc, count| acc.merge(*count))
    }
}

/// Majority shape per field. Ties prefer the wider histogram.
fn expected_shapes(
    valid: &[(&String, &IndexStatsSnapshot)],
) -> HashMap<String, (StatKind, usize)> {
    let mut votes: HashMap<&str, HashMap<(StatKind, usize), usize>> = HashMap::new();
    for (_, snapshot) in valid {
        for (field, value) in &snapshot.fields {
            *votes
                .entry(field.as_str())
                .or_default()
                .entry(value.shape())
                .or_default() += 1;
        }
    }

    votes
        .into_iter()
        .filter_map(|(field, shapes)| {
            shapes
                .into_iter()
                .max_by_key(|((kind, width), count)| (*count, *width, *kind))
                .map(|(shape, _)| (field.to_string(), shape))
        })
        .collect()
}

fn describe_mismatch(got: (StatKind, usize), want: (StatKind, usize)) -> String {
    if got.0 == StatKind::Histogram && want.0 == StatKind::Histogram {
        format!("histogram has {} buckets, expected {}", got.1, want.1)
    } else {
        format!("value is {:?}, expected {:?}", got.0, want.0)
    }
}
