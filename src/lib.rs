//! # Shardgate
//!
//! The fan-out and aggregation core of a load-balancing gateway for a
//! distributed vector search cluster.
//!
//! ## Features
//!
//! - Bounded-concurrency fan-out with a shared deadline and caller cancellation
//! - Quorum sizing for per-agent top-K and success ratios
//! - Exact global top-K merge with pass-through, sorted-slice and bounded-heap strategies
//! - Per-field statistics reduction (counts, histograms, medians)
//! - Backpressured streaming with ordered or unordered delivery
//! - In-memory agent cluster for tests and simulation

pub mod aggregator;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod quorum;
pub mod service;
pub mod stats;
pub mod stream;
pub mod types;

pub mod prelude {
    pub use crate::aggregator::{AggregationAlgorithm, DedupPolicy};
    pub use crate::config::{Deployment, GatewayConfig};
    pub use crate::dispatch::DispatchContext;
    pub use crate::error::{ErrorCode, GatewayError, Result};
    pub use crate::gateway::{Gateway, MemoryGateway};
    pub use crate::service::LoadBalancer;
    pub use crate::types::{
        AggregatedResponse, Candidate, ObjectVector, RemoveRequest, SearchConfig, SearchRequest,
        WriteRequest,
    };
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
