//! Per-request dispatch inputs: the target plan and the deadline context.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{GatewayError, Result};
use crate::types::{AgentTarget, Operation};

/// Agents selected for one logical operation and the per-agent parameter.
///
/// Immutable once built.
#[derive(Debug, Clone)]
pub struct DispatchPlan {
    operation: Operation,
    targets: Vec<AgentTarget>,
    per_agent_k: u32,
}

impl DispatchPlan {
    /// Build a plan. Zero targets can never satisfy a quorum and are rejected
    /// here, before any work starts.
    pub fn new(operation: Operation, targets: Vec<AgentTarget>, per_agent_k: u32) -> Result<Self> {
        if targets.is_empty() {
            return Err(GatewayError::invalid_argument(format!(
                "no target agents for {operation:?} operation"
            )));
        }
        Ok(Self {
            operation,
            targets,
            per_agent_k,
        })
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn targets(&self) -> &[AgentTarget] {
        &self.targets
    }

    pub fn per_agent_k(&self) -> u32 {
        self.per_agent_k
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Deadline and cancellation shared by every agent call of one request.
#[derive(Debug, Clone)]
pub struct DispatchContext {
    deadline: Instant,
    cancel: CancellationToken,
}

impl DispatchContext {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline,
            cancel: CancellationToken::new(),
        }
    }

    /// Attach the caller's cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Context with the same deadline whose token is cancelled together with
    /// this one, but can also be cancelled on its own.
    pub fn child(&self) -> Self {
        Self {
            deadline: self.deadline,
            cancel: self.cancel.child_token(),
        }
    }

    /// Context with a deadline no later than `timeout` from now.
    pub fn narrowed(&self, timeout: Option<Duration>) -> Self {
        let deadline = match timeout {
            Some(t) => self.deadline.min(Instant::now() + t),
            None => self.deadline,
        };
        Self {
            deadline,
            cancel: self.cancel.clone(),
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}
