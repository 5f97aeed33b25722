//! Per-agent outcomes of a dispatch.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, GatewayError};
use crate::types::AgentTarget;

/// What happened to one agent call.
#[derive(Debug)]
pub enum Outcome<T> {
    Success(T),
    /// The agent answered with an error, already tagged with the agent name.
    Failure(GatewayError),
    /// No answer before the deadline.
    Timeout,
    /// The caller cancelled the request while the call was in flight.
    Cancelled,
}

/// Outcome label without payload, recorded in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomeKind {
    Success,
    Failure(ErrorCode),
    Timeout,
    Cancelled,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeKind::Success => f.write_str("success"),
            OutcomeKind::Failure(code) => write!(f, "failure:{code}"),
            OutcomeKind::Timeout => f.write_str("timeout"),
            OutcomeKind::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Values a caller can attach to its own tracing spans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDiagnostic {
    pub agent: String,
    pub address: String,
    pub operation: String,
    pub latency: Duration,
    pub outcome: OutcomeKind,
    /// Candidates contributed; 0 for non-search calls.
    pub candidates: usize,
}

/// Result of one agent call within a dispatch.
#[derive(Debug)]
pub struct PartialResult<T> {
    pub target: AgentTarget,
    pub outcome: Outcome<T>,
    pub diagnostic: AgentDiagnostic,
}

impl<T> PartialResult<T> {
    pub(crate) fn new(
        target: AgentTarget,
        operation: &str,
        outcome: Outcome<T>,
        latency: Duration,
        candidates: usize,
    ) -> Self {
        let kind = match &outcome {
            Outcome::Success(_) => OutcomeKind::Success,
            Outcome::Failure(err) => OutcomeKind::Failure(err.code()),
            Outcome::Timeout => OutcomeKind::Timeout,
            Outcome::Cancelled => OutcomeKind::Cancelled,
        };
        let diagnostic = AgentDiagnostic {
            agent: target.name.clone(),
            address: target.address.clone(),
            operation: operation.to_string(),
            latency,
            outcome: kind,
            candidates,
        };
        Self {
            target,
            outcome,
            diagnostic,
        }
    }

    /// Create a timeout result for a call that never settled.
    pub(crate) fn timeout(target: AgentTarget, operation: &str, latency: Duration) -> Self {
        Self::new(target, operation, Outcome::Timeout, latency, 0)
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success(_))
    }

    pub fn agent(&self) -> &str {
        &self.target.name
    }

    pub fn kind(&self) -> OutcomeKind {
        self.diagnostic.outcome
    }

    pub fn value(&self) -> Option<&T> {
        match &self.outcome {
            Outcome::Success(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self.outcome {
            Outcome::Success(v) => Some(v),
            _ => None,
        }
    }

    /// The error this result stands for, `None` on success.
    pub fn error(&self) -> Option<GatewayError> {
        match &self.outcome {
            Outcome::Success(_) => None,
            Outcome::Failure(GatewayError::AgentFailure {
                agent,
                code,
                message,
            }) => Some(GatewayError::agent(agent.clone(), *code, message.clone())),
            Outcome::Failure(err) => Some(GatewayError::agent(
                self.target.name.clone(),
                err.code(),
                err.to_string(),
            )),
            Outcome::Timeout => Some(GatewayError::agent(
                self.target.name.clone(),
                ErrorCode::DeadlineExceeded,
                "no answer before the deadline",
            )),
            Outcome::Cancelled => Some(GatewayError::agent(
                self.target.name.clone(),
                ErrorCode::Cancelled,
                "call cancelled",
            )),
        }
    }
}

/// Tally of a completed dispatch, used for the quorum decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchSummary {
    pub targets: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub cancelled: usize,
}

impl DispatchSummary {
    pub fn from_results<T>(results: &[PartialResult<T>]) -> Self {
        let mut summary = DispatchSummary {
            targets: results.len(),
            ..Default::default()
        };
        for result in results {
            match result.outcome {
                Outcome::Success(_) => summary.succeeded += 1,
                Outcome::Failure(_) => summary.failed += 1,
                Outcome::Timeout => summary.timed_out += 1,
                Outcome::Cancelled => summary.cancelled += 1,
            }
        }
        summary
    }

    /// Every unsuccessful agent, whatever the reason.
    pub fn unsuccessful(&self) -> usize {
        self.failed + self.timed_out + self.cancelled
    }
}
