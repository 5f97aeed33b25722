//! Configuration for the load-balancing gateway.
//!
//! A [`GatewayConfig`] is built once at startup, validated, and shared as an
//! `Arc` with every component. Nothing in the crate reads configuration from
//! global state.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::aggregator::{AggregationAlgorithm, DedupPolicy};
use crate::error::{GatewayError, Result};

/// How the index is laid out across agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Deployment {
    /// Every agent holds a distinct shard; equal ids from different agents are
    /// different objects.
    Sharded,
    /// Agents hold copies of the same objects; equal ids are the same object.
    Replicated,
}

impl Deployment {
    /// De-duplication policy the aggregators apply for this layout.
    pub fn dedup_policy(self) -> DedupPolicy {
        match self {
            Deployment::Sharded => DedupPolicy::KeepAll,
            Deployment::Replicated => DedupPolicy::BestById,
        }
    }
}

/// Configuration for the gateway core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Gateway name echoed in diagnostics and error messages.
    pub name: String,

    /// Per-call deadline used when a request carries none.
    #[serde(with = "duration_ms")]
    pub timeout: Duration,

    /// Grace period after the deadline before unsettled agent calls are
    /// abandoned.
    #[serde(with = "duration_ms")]
    pub drain_grace: Duration,

    /// Replication factor for writes.
    pub replica: usize,

    /// Maximum in-flight dispatches per stream.
    pub stream_concurrency: usize,

    /// Maximum in-flight items per multi request.
    pub multi_concurrency: usize,

    /// Maximum concurrent agent calls per dispatch.
    pub agent_concurrency: usize,

    /// Minimum fraction of targeted agents that must succeed.
    pub success_ratio: f32,

    /// Sharded or replicated index layout.
    pub deployment: Deployment,

    /// Aggregation strategy used when a request carries no hint.
    pub default_algorithm: AggregationAlgorithm,

    /// Below this `K * replicas` product, concatenate-then-sort is selected.
    pub small_merge_threshold: usize,

    /// Minimum accepted vector dimension.
    pub min_vector_dimension: usize,

    /// Re-query an agent once when it returns zero candidates.
    pub retry_empty_search: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            name: "shardgate".to_string(),
            timeout: Duration::from_secs(3),
            drain_grace: Duration::from_millis(200),
            replica: 1,
            stream_concurrency: 20,
            multi_concurrency: 20,
            agent_concurrency: num_cpus::get() * 4,
            success_ratio: 1.0,
            deployment: Deployment::Replicated,
            default_algorithm: AggregationAlgorithm::Auto,
            small_merge_threshold: 512,
            min_vector_dimension: 2,
            retry_empty_search: true,
        }
    }
}

impl GatewayConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let config: GatewayConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }

    pub fn with_replica(mut self, replica: usize) -> Self {
        self.replica = replica;
        self
    }

    pub fn with_stream_concurrency(mut self, limit: usize) -> Self {
        self.stream_concurrency = limit;
        self
    }

    pub fn with_multi_concurrency(mut self, limit: usize) -> Self {
        self.multi_concurrency = limit;
        self
    }

    pub fn with_agent_concurrency(mut self, limit: usize) -> Self {
        self.agent_concurrency = limit;
        self
    }

    pub fn with_success_ratio(mut self, ratio: f32) -> Self {
        self.success_ratio = ratio;
        self
    }

    pub fn with_deployment(mut self, deployment: Deployment) -> Self {
        self.deployment = deployment;
        self
    }

    pub fn with_default_algorithm(mut self, algorithm: AggregationAlgorithm) -> Self {
        self.default_algorithm = algorithm;
        self
    }

    pub fn with_retry_empty_search(mut self, retry: bool) -> Self {
        self.retry_empty_search = retry;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(GatewayError::invalid_config("timeout must be greater than 0"));
        }
        if self.replica == 0 {
            return Err(GatewayError::invalid_config("replica must be at least 1"));
        }
        if self.stream_concurrency == 0 {
            return Err(GatewayError::invalid_config(
                "stream_concurrency must be greater than 0",
            ));
        }
        if self.multi_concurrency == 0 {
            return Err(GatewayError::invalid_config(
                "multi_concurrency must be greater than 0",
            ));
        }
        if self.agent_concurrency == 0 {
            return Err(GatewayError::invalid_config(
                "agent_concurrency must be greater than 0",
            ));
        }
        if !(self.success_ratio > 0.0 && self.success_ratio <= 1.0) {
            return Err(GatewayError::invalid_config(format!(
                "success_ratio must be in (0, 1], got {}",
                self.success_ratio
            )));
        }
        Ok(())
    }
}

/// Serialize durations as integer milliseconds.
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.timeout, Duration::from_secs(3));
        assert_eq!(config.success_ratio, 1.0);
        assert_eq!(config.deployment, Deployment::Replicated);
        assert!(config.agent_concurrency > 0);
    }

    #[test]
    fn test_builder() {
        let config = GatewayConfig::new()
            .with_name("lb-0")
            .with_timeout(Duration::from_millis(500))
            .with_stream_concurrency(4)
            .with_success_ratio(0.5)
            .with_deployment(Deployment::Sharded);

        assert_eq!(config.name, "lb-0");
        assert_eq!(config.timeout, Duration::from_millis(500));
        assert_eq!(config.stream_concurrency, 4);
        assert_eq!(config.deployment.dedup_policy(), DedupPolicy::KeepAll);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(GatewayConfig::new().with_success_ratio(0.0).validate().is_err());
        assert!(GatewayConfig::new().with_success_ratio(1.5).validate().is_err());
        assert!(GatewayConfig::new().with_replica(0).validate().is_err());
        assert!(GatewayConfig::new().with_multi_concurrency(0).validate().is_err());
        assert!(
            GatewayConfig::new()
                .with_timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"name": "lb-json", "timeout": 1500, "deployment": "sharded", "default_algorithm": "bounded_heap"}}"#
        )
        .unwrap();

        let config = GatewayConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.name, "lb-json");
        assert_eq!(config.timeout, Duration::from_millis(1500));
        assert_eq!(config.deployment, Deployment::Sharded);
        assert_eq!(config.default_algorithm, AggregationAlgorithm::BoundedHeap);
        // untouched fields fall back to defaults
        assert_eq!(config.stream_concurrency, 20);
    }

    #[test]
    fn test_from_json_file_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"success_ratio": 0.0}}"#).unwrap();
        assert!(GatewayConfig::from_json_file(file.path()).is_err());
    }
}
