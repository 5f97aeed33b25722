//! Concurrent fan-out of one logical operation to its target agents.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::Instrument;

use crate::aggregator::{AggregationAlgorithm, Aggregator, AggregatorSink};
use crate::config::GatewayConfig;
use crate::dispatch::metrics::DispatchMetricsCollector;
use crate::dispatch::plan::{DispatchContext, DispatchPlan};
use crate::dispatch::result::{DispatchSummary, Outcome, PartialResult};
use crate::error::{ErrorCode, GatewayError, Result};
use crate::gateway::{AgentRequest, AgentResponse, Gateway};
use crate::quorum::QuorumSizer;
use crate::types::{AgentTarget, Candidate, Operation};

/// Perform one call and tag any error with the agent's name.
pub async fn call_agent<G: Gateway + ?Sized>(
    gateway: &G,
    target: &AgentTarget,
    request: AgentRequest,
) -> Result<AgentResponse> {
    gateway
        .call(target, request)
        .await
        .map_err(|err| err.into_gateway_error(&target.name))
}

/// Result of a search dispatch: the per-agent outcomes and the merged top-K.
#[derive(Debug)]
pub struct AggregateOutcome {
    /// Each success carries the number of candidates the agent contributed.
    pub results: Vec<PartialResult<usize>>,
    pub candidates: Vec<Candidate>,
    pub algorithm: AggregationAlgorithm,
    pub summary: DispatchSummary,
}

/// Issues one operation against every agent of a plan.
///
/// At most `agent_concurrency` calls run at once. A failing agent never
/// cancels its siblings; only the caller's cancellation token does. Every
/// call is bounded by the context deadline, and collection gives up
/// `drain_grace` after it, so `dispatch` never waits on a call that ignores
/// cancellation.
pub struct Dispatcher<G: Gateway> {
    gateway: Arc<G>,
    config: Arc<GatewayConfig>,
    metrics: Arc<DispatchMetricsCollector>,
}

impl<G: Gateway> Clone for Dispatcher<G> {
    fn clone(&self) -> Self {
        Self {
            gateway: Arc::clone(&self.gateway),
            config: Arc::clone(&self.config),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl<G: Gateway> Dispatcher<G> {
    pub fn new(gateway: Arc<G>, config: Arc<GatewayConfig>) -> Self {
        Self {
            gateway,
            config,
            metrics: Arc::new(DispatchMetricsCollector::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<DispatchMetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn gateway(&self) -> &Arc<G> {
        &self.gateway
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<DispatchMetricsCollector> {
        &self.metrics
    }

    /// Resolve the targets of an operation into a plan.
    pub async fn plan(&self, operation: Operation, per_agent_k: u32) -> Result<DispatchPlan> {
        let targets = self.gateway.targets(operation).await?;
        DispatchPlan::new(operation, targets, per_agent_k)
    }

    /// Fail with a quorum error when too few agents of a dispatch succeeded.
    pub fn check_quorum(&self, summary: &DispatchSummary) -> Result<()> {
        QuorumSizer::check(
            summary.succeeded,
            summary.unsuccessful(),
            summary.targets,
            self.config.success_ratio,
        )
        .inspect_err(|err| {
            self.metrics.record_quorum_failure();
            tracing::warn!(error = %err, "quorum not met");
        })
    }

    /// Run `call` once per target and return one result per target.
    pub async fn dispatch<T, F, Fut>(
        &self,
        ctx: &DispatchContext,
        plan: &DispatchPlan,
        call: F,
    ) -> Vec<PartialResult<T>>
    where
        T: Send + 'static,
        F: Fn(Arc<G>, AgentTarget) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.run(ctx, plan, call, |_| 0).await
    }

    /// Run a search `call` per target and merge the answers with `aggregator`.
    ///
    /// The aggregator is owned by the dispatch: units only get a push-only
    /// sink, and `finish` runs after every unit settled or was abandoned.
    /// An agent answering with zero candidates is asked once more when
    /// `retry_empty_search` is set and the deadline has not passed.
    pub async fn dispatch_aggregate<F, Fut>(
        &self,
        ctx: &DispatchContext,
        plan: &DispatchPlan,
        aggregator: Aggregator,
        call: F,
    ) -> AggregateOutcome
    where
        F: Fn(Arc<G>, AgentTarget) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<Candidate>>> + Send + 'static,
    {
        let algorithm = aggregator.algorithm();
        let aggregator = Arc::new(aggregator);
        let sink = AggregatorSink::new(Arc::clone(&aggregator));
        let gate = sink.clone();
        let retry_empty = self.config.retry_empty_search;
        let deadline = ctx.deadline();
        let call = Arc::new(call);

        let unit = move |gateway: Arc<G>, target: AgentTarget| {
            let call = Arc::clone(&call);
            let sink = sink.clone();
            async move {
                let mut candidates = (*call)(Arc::clone(&gateway), target.clone()).await?;
                if candidates.is_empty() && retry_empty && Instant::now() < deadline {
                    tracing::debug!(agent = %target.name, "empty answer, retrying once");
                    candidates = (*call)(gateway, target.clone()).await?;
                }
                let count = candidates.len();
                sink.push(&target.name, candidates);
                Ok::<usize, GatewayError>(count)
            }
        };

        let results = self.run(ctx, plan, unit, |count: &usize| *count).await;
        gate.seal();
        let candidates = aggregator.finish();
        let summary = DispatchSummary::from_results(&results);

        AggregateOutcome {
            results,
            candidates,
            algorithm,
            summary,
        }
    }

    async fn run<T, F, Fut, C>(
        &self,
        ctx: &DispatchContext,
        plan: &DispatchPlan,
        call: F,
        count: C,
    ) -> Vec<PartialResult<T>>
    where
        T: Send + 'static,
        F: Fn(Arc<G>, AgentTarget) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        C: Fn(&T) -> usize + Send + Sync + 'static,
    {
        self.metrics.record_dispatch();
        let operation = plan.operation().as_str();
        let semaphore = Arc::new(Semaphore::new(self.config.agent_concurrency.max(1)));
        let call = Arc::new(call);
        let count = Arc::new(count);
        let started = Instant::now();

        let mut set = JoinSet::new();
        for (index, target) in plan.targets().iter().cloned().enumerate() {
            let span = tracing::debug_span!(
                "agent_call",
                agent = %target.name,
                addr = %target.address,
                op = operation,
                latency_ms = tracing::field::Empty,
                outcome = tracing::field::Empty,
                candidates = tracing::field::Empty,
            );
            let semaphore = Arc::clone(&semaphore);
            let call = Arc::clone(&call);
            let count = Arc::clone(&count);
            let gateway = Arc::clone(&self.gateway);
            let metrics = Arc::clone(&self.metrics);
            let token = ctx.token().clone();
            let deadline = ctx.deadline();

            set.spawn(
                async move {
                    let unit_started = Instant::now();
                    let call_target = target.clone();
                    let work = async move {
                        let _permit = semaphore
                            .acquire_owned()
                            .await
                            .map_err(|_| GatewayError::internal("dispatch semaphore closed"))?;
                        (*call)(gateway, call_target).await
                    };

                    let outcome = tokio::select! {
                        biased;
                        _ = token.cancelled() => Outcome::Cancelled,
                        _ = tokio::time::sleep_until(deadline) => Outcome::Timeout,
                        result = work => match result {
                            Ok(value) => Outcome::Success(value),
                            Err(err) => Outcome::Failure(err),
                        },
                    };

                    let latency = unit_started.elapsed();
                    let candidates = match &outcome {
                        Outcome::Success(value) => (*count)(value),
                        _ => 0,
                    };
                    let result =
                        PartialResult::new(target, operation, outcome, latency, candidates);
                    report(&result);
                    metrics.record_agent_call(latency, result.kind(), candidates);
                    (index, result)
                }
                .instrument(span),
            );
        }

        let hard_deadline = ctx.deadline() + self.config.drain_grace;
        let mut slots: Vec<Option<PartialResult<T>>> = (0..plan.len()).map(|_| None).collect();
        let mut abandoned = false;
        loop {
            match tokio::time::timeout_at(hard_deadline, set.join_next()).await {
                Ok(Some(Ok((index, result)))) => {
                    if let Some(slot) = slots.get_mut(index) {
                        *slot = Some(result);
                    }
                }
                Ok(Some(Err(err))) => {
                    tracing::warn!(error = %err, "agent call task failed");
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        unsettled = set.len(),
                        "agent calls ignored the deadline, abandoning them"
                    );
                    set.abort_all();
                    abandoned = true;
                    break;
                }
            }
        }

        slots
            .into_iter()
            .zip(plan.targets())
            .map(|(slot, target)| {
                slot.unwrap_or_else(|| {
                    let latency = started.elapsed();
                    let result = if abandoned {
                        PartialResult::timeout(target.clone(), operation, latency)
                    } else {
                        let err = GatewayError::agent(
                            target.name.clone(),
                            ErrorCode::Internal,
                            "agent call task panicked",
                        );
                        let outcome = Outcome::Failure(err);
                        PartialResult::new(target.clone(), operation, outcome, latency, 0)
                    };
                    self.metrics.record_agent_call(latency, result.kind(), 0);
                    result
                })
            })
            .collect()
    }
}

/// Record the outcome on the current `agent_call` span and log it.
fn report<T>(result: &PartialResult<T>) {
    let span = tracing::Span::current();
    let diagnostic = &result.diagnostic;
    span.record("latency_ms", diagnostic.latency.as_millis() as u64);
    span.record("outcome", tracing::field::display(diagnostic.outcome));
    span.record("candidates", diagnostic.candidates as u64);

    match &result.outcome {
        Outcome::Failure(err)
            if matches!(
                err.code(),
                ErrorCode::Internal | ErrorCode::Unavailable | ErrorCode::ResourceExhausted
            ) =>
        {
            tracing::warn!(error = %err, "agent call failed");
        }
        Outcome::Failure(err) => tracing::debug!(error = %err, "agent call failed"),
        _ => tracing::debug!(outcome = %diagnostic.outcome, "agent call settled"),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::aggregator::{AggregatorSelector, DedupPolicy};
    use crate::gateway::{AgentFault, MemoryGateway};
    use crate::types::ObjectVector;

    fn dispatcher(gateway: MemoryGateway, config: GatewayConfig) -> Dispatcher<MemoryGateway> {
        Dispatcher::new(Arc::new(gateway), Arc::new(config))
    }

    type SearchFuture = std::pin::Pin<Box<dyn Future<Output = Result<Vec<Candidate>>> + Send>>;

    fn search_call(
        vector: Vec<f32>,
        num: u32,
    ) -> impl Fn(Arc<MemoryGateway>, AgentTarget) -> SearchFuture + Send + Sync + 'static {
        move |gateway, target| {
            let request = AgentRequest::Search {
                vector: vector.clone(),
                num,
                radius: -1.0,
                epsilon: 0.1,
            };
            Box::pin(async move {
                match call_agent(gateway.as_ref(), &target, request).await? {
                    AgentResponse::Candidates(c) => Ok(c),
                    other => Err(GatewayError::internal(format!("unexpected {other:?}"))),
                }
            })
        }
    }

    fn seeded(agents: usize) -> MemoryGateway {
        let gateway = MemoryGateway::new(agents);
        gateway.seed_replicated(
            (0..20).map(|i| ObjectVector::new(format!("id-{i:02}"), vec![i as f32, 0.0])),
        );
        gateway
    }

    #[tokio::test]
    async fn test_dispatch_collects_every_target() {
        let dispatcher = dispatcher(seeded(4), GatewayConfig::default());
        let plan = dispatcher.plan(Operation::Info, 0).await.unwrap();
        let ctx = DispatchContext::with_timeout(Duration::from_secs(1));

        let results = dispatcher
            .dispatch(&ctx, &plan, |gateway, target| async move {
                call_agent(gateway.as_ref(), &target, AgentRequest::IndexInfo).await
            })
            .await;

        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|r| r.is_success()));
        assert_eq!(dispatcher.metrics().snapshot().agent_successes, 4);
    }

    #[tokio::test]
    async fn test_failure_does_not_cancel_siblings() {
        let gateway = seeded(3);
        gateway.set_fault("agent-0", AgentFault::error(ErrorCode::Internal));
        gateway.set_fault("agent-1", AgentFault::error(ErrorCode::Unavailable));
        let dispatcher = dispatcher(gateway, GatewayConfig::default().with_success_ratio(0.5));
        let plan = dispatcher.plan(Operation::Search, 10).await.unwrap();
        let ctx = DispatchContext::with_timeout(Duration::from_secs(1));
        let aggregator = AggregatorSelector::new(512, DedupPolicy::BestById).select(
            AggregationAlgorithm::Auto,
            10,
            10,
            3,
        );

        let outcome = dispatcher
            .dispatch_aggregate(&ctx, &plan, aggregator, search_call(vec![0.0, 0.0], 10))
            .await;

        assert_eq!(outcome.summary.succeeded, 1);
        assert_eq!(outcome.summary.failed, 2);
        assert_eq!(outcome.candidates.len(), 10);
        assert!(dispatcher.check_quorum(&outcome.summary).is_ok());

        let failed = outcome.results.iter().find(|r| r.agent() == "agent-0").unwrap();
        assert_eq!(
            failed.error().and_then(|e| e.agent_name().map(String::from)),
            Some("agent-0".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_and_drain_grace() {
        let gateway = seeded(3);
        gateway.set_fault("agent-1", AgentFault::delay(Duration::from_secs(10)));
        let config = GatewayConfig::default().with_drain_grace(Duration::from_millis(50));
        let dispatcher = dispatcher(gateway, config);
        let plan = dispatcher.plan(Operation::Info, 0).await.unwrap();
        let ctx = DispatchContext::with_timeout(Duration::from_millis(100));

        let started = Instant::now();
        let results = dispatcher
            .dispatch(&ctx, &plan, |gateway, target| async move {
                call_agent(gateway.as_ref(), &target, AgentRequest::IndexInfo).await
            })
            .await;

        assert!(started.elapsed() <= Duration::from_millis(150));
        let summary = DispatchSummary::from_results(&results);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.timed_out, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_cancellation() {
        let gateway = seeded(2);
        gateway.set_fault("agent-0", AgentFault::hang());
        gateway.set_fault("agent-1", AgentFault::hang());
        let dispatcher = dispatcher(gateway, GatewayConfig::default());
        let plan = dispatcher.plan(Operation::Info, 0).await.unwrap();
        let ctx = DispatchContext::with_timeout(Duration::from_secs(30));

        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        let results = dispatcher
            .dispatch(&ctx, &plan, |gateway, target| async move {
                call_agent(gateway.as_ref(), &target, AgentRequest::IndexInfo).await
            })
            .await;

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(DispatchSummary::from_results(&results).cancelled, 2);
    }

    #[tokio::test]
    async fn test_empty_answer_retried_once() {
        let gateway = seeded(1);
        gateway.set_fault("agent-0", AgentFault::empty_searches(1));
        let dispatcher = dispatcher(gateway, GatewayConfig::default());
        let plan = dispatcher.plan(Operation::Search, 5).await.unwrap();
        let ctx = DispatchContext::with_timeout(Duration::from_secs(1));
        let aggregator = AggregatorSelector::new(512, DedupPolicy::BestById).select(
            AggregationAlgorithm::Auto,
            5,
            5,
            1,
        );

        let outcome = dispatcher
            .dispatch_aggregate(&ctx, &plan, aggregator, search_call(vec![0.0, 0.0], 5))
            .await;

        assert_eq!(outcome.candidates.len(), 5);
        assert_eq!(outcome.algorithm, AggregationAlgorithm::PassThrough);
        assert_eq!(dispatcher.gateway().calls_to("agent-0"), 2);
    }

    #[tokio::test]
    async fn test_agent_concurrency_bound() {
        let gateway = seeded(8);
        for name in gateway.agent_names() {
            gateway.set_fault(&name, AgentFault::delay(Duration::from_millis(20)));
        }
        let dispatcher = dispatcher(gateway, GatewayConfig::default().with_agent_concurrency(3));
        let plan = dispatcher.plan(Operation::Info, 0).await.unwrap();
        let ctx = DispatchContext::with_timeout(Duration::from_secs(5));

        let results = dispatcher
            .dispatch(&ctx, &plan, |gateway, target| async move {
                call_agent(gateway.as_ref(), &target, AgentRequest::IndexInfo).await
            })
            .await;

        assert!(results.iter().all(|r| r.is_success()));
        assert!(dispatcher.gateway().peak_in_flight() <= 3);
    }
}
