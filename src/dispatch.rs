//! Fan-out of one logical operation to many agents.
//!
//! A [`DispatchPlan`] names the target agents, a [`DispatchContext`] carries
//! the shared deadline and cancellation, and the [`Dispatcher`] runs one unit
//! of work per target under a concurrency limit, producing one
//! [`PartialResult`] per target.

pub mod dispatcher;
pub mod metrics;
pub mod plan;
pub mod result;

pub use dispatcher::{AggregateOutcome, Dispatcher, call_agent};
pub use metrics::{DispatchMetrics, DispatchMetricsCollector};
pub use plan::{DispatchContext, DispatchPlan};
pub use result::{AgentDiagnostic, DispatchSummary, Outcome, OutcomeKind, PartialResult};
