//! Request-scoped value types shared by every gateway component.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::aggregator::AggregationAlgorithm;
use crate::error::{ErrorCode, GatewayError};

/// One ranked search result. Lower distance is better.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    pub distance: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl Candidate {
    pub fn new<S: Into<String>>(id: S, distance: f32) -> Self {
        Self {
            id: id.into(),
            distance,
            vector: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_vector(mut self, vector: Vec<f32>) -> Self {
        self.vector = Some(vector);
        self
    }

    /// Total ranking order: ascending distance, ties broken by id.
    pub fn rank_cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Health of an agent as last observed by the gateway collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentHealth {
    Healthy,
    Degraded,
    Unknown,
}

/// Opaque handle to one backend agent, owned by the gateway collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentTarget {
    pub name: String,
    pub address: String,
    pub health: AgentHealth,
}

impl AgentTarget {
    pub fn new<N: Into<String>, A: Into<String>>(name: N, address: A) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            health: AgentHealth::Healthy,
        }
    }
}

/// Kind of logical operation, used to resolve target agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Search,
    Write,
    Read,
    Info,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Search => "search",
            Operation::Write => "write",
            Operation::Read => "read",
            Operation::Info => "info",
        }
    }
}

/// Per-request search options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub request_id: String,
    /// Requested global top-K.
    pub num: u32,
    /// Minimum acceptable number of merged results; 0 disables the check.
    pub min_num: u32,
    /// Request-level ratio for replica-scaled per-agent sizing.
    pub ratio: Option<f32>,
    pub timeout: Option<Duration>,
    pub algorithm: AggregationAlgorithm,
    pub radius: f32,
    pub epsilon: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            request_id: String::new(),
            num: 10,
            min_num: 0,
            ratio: None,
            timeout: None,
            algorithm: AggregationAlgorithm::Auto,
            radius: -1.0,
            epsilon: 0.1,
        }
    }
}

impl SearchConfig {
    pub fn new(num: u32) -> Self {
        Self {
            num,
            ..Default::default()
        }
    }

    pub fn with_request_id<S: Into<String>>(mut self, id: S) -> Self {
        self.request_id = id.into();
        self
    }

    pub fn with_min_num(mut self, min_num: u32) -> Self {
        self.min_num = min_num;
        self
    }

    pub fn with_ratio(mut self, ratio: f32) -> Self {
        self.ratio = Some(ratio);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_algorithm(mut self, algorithm: AggregationAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub vector: Vec<f32>,
    pub config: SearchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchIdRequest {
    pub id: String,
    pub config: SearchConfig,
}

/// Merged search result plus the bookkeeping used for the quorum decision.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregatedResponse {
    pub request_id: String,
    pub results: Vec<Candidate>,
    /// Agents that answered successfully.
    pub responded: usize,
    /// Agents that failed with an error.
    pub failed: usize,
    /// Agents that did not answer before the deadline.
    pub timed_out: usize,
}

/// A stored vector with its identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectVector {
    pub id: String,
    pub vector: Vec<f32>,
    /// Nanoseconds since the epoch; 0 means "assign now".
    pub timestamp: i64,
}

impl ObjectVector {
    pub fn new<S: Into<String>>(id: S, vector: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            vector,
            timestamp: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WriteConfig {
    pub skip_strict_exist_check: bool,
    pub timestamp: i64,
    pub timeout: Option<Duration>,
}

/// Insert, update and upsert requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteRequest {
    pub object: ObjectVector,
    pub config: WriteConfig,
}

impl WriteRequest {
    pub fn new(object: ObjectVector) -> Self {
        Self {
            object,
            config: WriteConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveRequest {
    pub id: String,
    pub config: WriteConfig,
}

impl RemoveRequest {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self {
            id: id.into(),
            config: WriteConfig::default(),
        }
    }
}

/// Where an object lives after a write.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectLocation {
    pub uuid: String,
    /// Agent names, sorted and comma-joined.
    pub name: String,
    pub ips: Vec<String>,
}

/// Error status sent in place of a response on streams that model per-item
/// failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub code: ErrorCode,
    pub message: String,
}

impl From<&GatewayError> for Status {
    fn from(err: &GatewayError) -> Self {
        Status {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

/// One outbound message of a streaming endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StreamItem<T> {
    Response(T),
    Status(Status),
}

impl<T> StreamItem<T> {
    pub fn from_error(err: GatewayError) -> Self {
        StreamItem::Status(Status::from(&err))
    }

    pub fn is_status(&self) -> bool {
        matches!(self, StreamItem::Status(_))
    }
}

/// Current time as nanoseconds since the epoch.
pub(crate) fn now_nanos() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_rank_order() {
        let a = Candidate::new("a", 0.1);
        let b = Candidate::new("b", 0.1);
        let c = Candidate::new("a", 0.3);

        assert_eq!(a.rank_cmp(&b), Ordering::Less);
        assert_eq!(b.rank_cmp(&c), Ordering::Less);
        assert_eq!(a.rank_cmp(&a.clone()), Ordering::Equal);
    }

    #[test]
    fn test_search_config_builder() {
        let config = SearchConfig::new(25)
            .with_request_id("req-1")
            .with_min_num(5)
            .with_ratio(0.2)
            .with_timeout(Duration::from_millis(100));

        assert_eq!(config.num, 25);
        assert_eq!(config.min_num, 5);
        assert_eq!(config.ratio, Some(0.2));
        assert_eq!(config.request_id, "req-1");
    }

    #[test]
    fn test_agent_targets_hash_by_identity_and_health() {
        use std::collections::HashSet;

        let mut degraded = AgentTarget::new("agent-0", "10.0.0.1:8081");
        degraded.health = AgentHealth::Degraded;
        let targets: HashSet<AgentTarget> = [
            AgentTarget::new("agent-0", "10.0.0.1:8081"),
            AgentTarget::new("agent-0", "10.0.0.1:8081"),
            degraded,
        ]
        .into_iter()
        .collect();
        assert_eq!(targets.len(), 2);
    }

    #[test]
    fn test_stream_item_from_error() {
        let item: StreamItem<ObjectLocation> =
            StreamItem::from_error(GatewayError::not_found("id-1"));
        assert!(item.is_status());
        match item {
            StreamItem::Status(status) => assert_eq!(status.code, ErrorCode::NotFound),
            StreamItem::Response(_) => panic!("expected status"),
        }
    }
}
