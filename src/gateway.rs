//! Boundary to the agent connection layer.
//!
//! The core never talks to the network itself. A [`Gateway`] resolves which
//! agents an operation targets and performs one call against one agent;
//! everything else (fan-out, deadlines, merging) happens in the core.
//! Cancellation is by drop: the dispatcher stops polling a call future once
//! its deadline or the caller's cancellation fires.

pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::error::{ErrorCode, GatewayError, Result};
use crate::stats::{IndexCount, IndexStatsSnapshot};
use crate::types::{AgentTarget, Candidate, ObjectLocation, ObjectVector, Operation};

pub use memory::{AgentFault, MemoryGateway};

/// Payload of one agent call.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentRequest {
    Search {
        vector: Vec<f32>,
        num: u32,
        radius: f32,
        epsilon: f32,
    },
    SearchById {
        id: String,
        num: u32,
        radius: f32,
        epsilon: f32,
    },
    LinearSearch {
        vector: Vec<f32>,
        num: u32,
    },
    LinearSearchById {
        id: String,
        num: u32,
    },
    Insert(ObjectVector),
    Update(ObjectVector),
    Remove {
        id: String,
        timestamp: i64,
    },
    Exists {
        id: String,
    },
    GetObject {
        id: String,
    },
    IndexInfo,
    IndexStatistics,
    IndexProperty,
}

impl AgentRequest {
    /// Short name recorded on tracing spans.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentRequest::Search { .. } => "search",
            AgentRequest::SearchById { .. } => "search_by_id",
            AgentRequest::LinearSearch { .. } => "linear_search",
            AgentRequest::LinearSearchById { .. } => "linear_search_by_id",
            AgentRequest::Insert(_) => "insert",
            AgentRequest::Update(_) => "update",
            AgentRequest::Remove { .. } => "remove",
            AgentRequest::Exists { .. } => "exists",
            AgentRequest::GetObject { .. } => "get_object",
            AgentRequest::IndexInfo => "index_info",
            AgentRequest::IndexStatistics => "index_statistics",
            AgentRequest::IndexProperty => "index_property",
        }
    }
}

/// Answer of one agent call.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentResponse {
    Candidates(Vec<Candidate>),
    Location(ObjectLocation),
    Id(String),
    Object(ObjectVector),
    IndexCount(IndexCount),
    Statistics(IndexStatsSnapshot),
    Property(BTreeMap<String, String>),
}

impl AgentResponse {
    /// Number of search candidates carried, 0 for every other payload.
    pub fn candidate_count(&self) -> usize {
        match self {
            AgentResponse::Candidates(c) => c.len(),
            _ => 0,
        }
    }
}

/// Error returned by a single agent, before the core attaches the agent name.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{code}: {message}")]
pub struct AgentError {
    pub code: ErrorCode,
    pub message: String,
}

impl AgentError {
    pub fn new<S: Into<String>>(code: ErrorCode, message: S) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn unavailable<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorCode::Unavailable, message)
    }

    /// Wrap with the name of the agent that produced it.
    pub fn into_gateway_error(self, agent: &str) -> GatewayError {
        GatewayError::agent(agent, self.code, self.message)
    }
}

/// Connection-layer collaborator.
#[async_trait]
pub trait Gateway: Send + Sync + 'static {
    /// Agents an operation of this kind should be sent to.
    async fn targets(&self, op: Operation) -> Result<Vec<AgentTarget>>;

    /// Perform one call against one agent.
    async fn call(
        &self,
        target: &AgentTarget,
        request: AgentRequest,
    ) -> std::result::Result<AgentResponse, AgentError>;

    /// Number of live agents, used for replica-scaled sizing.
    fn agent_count(&self) -> usize;
}
