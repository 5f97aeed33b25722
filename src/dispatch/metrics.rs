//! Metrics collection for dispatches and agent calls.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::dispatch::result::OutcomeKind;

/// Point-in-time copy of the collected metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DispatchMetrics {
    /// Dispatches executed.
    pub dispatches: u64,

    /// Dispatches that failed their quorum check.
    pub quorum_failures: u64,

    /// Agent calls issued.
    pub agent_calls: u64,

    pub agent_successes: u64,
    pub agent_failures: u64,
    pub agent_timeouts: u64,
    pub agent_cancellations: u64,

    /// Candidates received from agents.
    pub candidates_received: u64,

    pub avg_agent_latency: Duration,
    pub max_agent_latency: Duration,
    pub min_agent_latency: Duration,
}

/// Lock-free collector shared by every dispatch of a load balancer.
#[derive(Debug)]
pub struct DispatchMetricsCollector {
    dispatches: AtomicU64,
    quorum_failures: AtomicU64,
    agent_calls: AtomicU64,
    agent_successes: AtomicU64,
    agent_failures: AtomicU64,
    agent_timeouts: AtomicU64,
    agent_cancellations: AtomicU64,
    candidates_received: AtomicU64,
    total_latency_nanos: AtomicU64,
    max_latency_nanos: AtomicU64,
    min_latency_nanos: AtomicU64,
    start_time: Instant,
}

impl DispatchMetricsCollector {
    pub fn new() -> Self {
        Self {
            dispatches: AtomicU64::new(0),
            quorum_failures: AtomicU64::new(0),
            agent_calls: AtomicU64::new(0),
            agent_successes: AtomicU64::new(0),
            agent_failures: AtomicU64::new(0),
            agent_timeouts: AtomicU64::new(0),
            agent_cancellations: AtomicU64::new(0),
            candidates_received: AtomicU64::new(0),
            total_latency_nanos: AtomicU64::new(0),
            max_latency_nanos: AtomicU64::new(0),
            min_latency_nanos: AtomicU64::new(u64::MAX),
            start_time: Instant::now(),
        }
    }

    pub fn record_dispatch(&self) {
        self.dispatches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_quorum_failure(&self) {
        self.quorum_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one settled agent call.
    pub fn record_agent_call(&self, latency: Duration, outcome: OutcomeKind, candidates: usize) {
        self.agent_calls.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            OutcomeKind::Success => &self.agent_successes,
            OutcomeKind::Failure(_) => &self.agent_failures,
            OutcomeKind::Timeout => &self.agent_timeouts,
            OutcomeKind::Cancelled => &self.agent_cancellations,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.candidates_received
            .fetch_add(candidates as u64, Ordering::Relaxed);

        let nanos = latency.as_nanos().min(u64::MAX as u128) as u64;
        self.total_latency_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.max_latency_nanos.fetch_max(nanos, Ordering::Relaxed);
        self.min_latency_nanos.fetch_min(nanos, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DispatchMetrics {
        let calls = self.agent_calls.load(Ordering::Relaxed);
        let total = self.total_latency_nanos.load(Ordering::Relaxed);
        let avg = if calls > 0 { total / calls } else { 0 };
        let min = self.min_latency_nanos.load(Ordering::Relaxed);

        DispatchMetrics {
            dispatches: self.dispatches.load(Ordering::Relaxed),
            quorum_failures: self.quorum_failures.load(Ordering::Relaxed),
            agent_calls: calls,
            agent_successes: self.agent_successes.load(Ordering::Relaxed),
            agent_failures: self.agent_failures.load(Ordering::Relaxed),
            agent_timeouts: self.agent_timeouts.load(Ordering::Relaxed),
            agent_cancellations: self.agent_cancellations.load(Ordering::Relaxed),
            candidates_received: self.candidates_received.load(Ordering::Relaxed),
            avg_agent_latency: Duration::from_nanos(avg),
            max_agent_latency: Duration::from_nanos(self.max_latency_nanos.load(Ordering::Relaxed)),
            min_agent_latency: if min == u64::MAX {
                Duration::ZERO
            } else {
                Duration::from_nanos(min)
            },
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.dispatches,
            &self.quorum_failures,
            &self.agent_calls,
            &self.agent_successes,
            &self.agent_failures,
            &self.agent_timeouts,
            &self.agent_cancellations,
            &self.candidates_received,
            &self.total_latency_nanos,
            &self.max_latency_nanos,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.min_latency_nanos.store(u64::MAX, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }
}

impl Default for DispatchMetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
