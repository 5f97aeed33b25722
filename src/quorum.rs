//! Quorum sizing.
//!
//! Decides how many candidates to request from each agent for a global top-K,
//! and how many agents must succeed before an aggregate call counts as
//! successful.
//!
//! Ratios are clamped to `(0, 1]`. The number of agents required to succeed
//! is `max(1, floor(targets * ratio))`, so a single answering agent is always
//! required and a ratio of `1.0` requires every target.

use crate::error::{GatewayError, Result};

/// Absorbs float noise such as `10 * 0.7f32 == 6.9999...`.
const RATIO_EPSILON: f64 = 1e-6;

/// Pure quorum arithmetic.
pub struct QuorumSizer;

impl QuorumSizer {
    /// Per-agent result count for a global top-K under a minimum success ratio.
    ///
    /// Returns `ceil(global_k / ratio)`, exactly `global_k` when the ratio is
    /// 1, and the floor value 1 for degenerate input (`global_k == 0` or
    /// `ratio <= 0`).
    pub fn required_per_agent(global_k: u32, success_ratio: f32) -> u32 {
        if global_k == 0 || success_ratio.is_nan() || success_ratio <= 0.0 {
            return 1;
        }
        if success_ratio >= 1.0 {
            return global_k;
        }
        let inflated = (global_k as f64 / success_ratio as f64 - RATIO_EPSILON).ceil();
        if inflated >= u32::MAX as f64 {
            u32::MAX
        } else {
            (inflated as u32).max(global_k).max(1)
        }
    }

    /// Per-agent count when each object lives on `replica` out of `agents`
    /// agents and the request carries its own ratio.
    ///
    /// With `m = replica / agents`, the count is
    /// `ceil(num * (m + (1 - m) * ratio)) - 1`, never below `ceil(num * m)`.
    /// A non-positive ratio yields `ceil(num * m)`.
    pub fn replica_scaled(num: u32, ratio: f32, replica: usize, agents: usize) -> u32 {
        if agents == 0 || num == 0 {
            return num.max(1);
        }
        let replica = replica.min(agents) as u64;
        let agents = agents as u64;
        let floor = (num as u64 * replica).div_ceil(agents) as u32;
        if ratio.is_nan() || ratio <= 0.0 {
            return floor.max(1);
        }
        let min = replica as f64 / agents as f64;
        let ratio = (ratio as f64).min(1.0);
        let n = (num as f64 * (min + (1.0 - min) * ratio) - RATIO_EPSILON).ceil() as u32;
        n.saturating_sub(1).max(floor).max(1)
    }

    /// Number of agents that must succeed out of `targets`.
    pub fn required_successes(targets: usize, success_ratio: f32) -> usize {
        if targets == 0 {
            return 0;
        }
        let ratio = if success_ratio.is_nan() || success_ratio <= 0.0 {
            0.0
        } else {
            (success_ratio as f64).min(1.0)
        };
        let required = (targets as f64 * ratio + RATIO_EPSILON).floor() as usize;
        required.clamp(1, targets)
    }

    /// Fail with [`GatewayError::QuorumFailure`] when too few agents succeeded.
    pub fn check(
        succeeded: usize,
        failed: usize,
        targets: usize,
        success_ratio: f32,
    ) -> Result<()> {
        if targets == 0 {
            return Err(GatewayError::invalid_argument(
                "no target agents, quorum cannot be satisfied",
            ));
        }
        let required = Self::required_successes(targets, success_ratio);
        if succeeded < required {
            return Err(GatewayError::QuorumFailure {
                succeeded,
                failed,
                required,
                targets,
            });
        }
        Ok(())
    }
}
