//! k-NN search endpoints.

use std::sync::Arc;

use tracing::Instrument;

use crate::aggregator::AggregationAlgorithm;
use crate::dispatch::{DispatchContext, DispatchPlan, call_agent};
use crate::error::{ErrorCode, GatewayError, Result};
use crate::gateway::{AgentRequest, AgentResponse, Gateway};
use crate::quorum::QuorumSizer;
use crate::service::{LoadBalancer, ensure_not_cancelled};
use crate::stream::{InboundStream, OutboundStream, StreamSummary};
use crate::types::{
    AgentTarget, AggregatedResponse, Candidate, Operation, SearchConfig, SearchIdRequest,
    SearchRequest, StreamItem,
};

/// Which agent-side search a request runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SearchMode {
    Approximate,
    Linear,
}

impl<G: Gateway> LoadBalancer<G> {
    /// Approximate k-NN search over every agent.
    pub async fn search(
        &self,
        ctx: &DispatchContext,
        request: SearchRequest,
    ) -> Result<AggregatedResponse> {
        self.search_vector(ctx, request, SearchMode::Approximate).await
    }

    /// Search with the vector stored under `id`.
    ///
    /// The vector is resolved with `get_object` first; when that fails the
    /// by-id search is fanned out to the agents instead.
    pub async fn search_by_id(
        &self,
        ctx: &DispatchContext,
        request: SearchIdRequest,
    ) -> Result<AggregatedResponse> {
        self.search_id(ctx, request, SearchMode::Approximate).await
    }

    /// Exact brute-force search over every agent.
    pub async fn linear_search(
        &self,
        ctx: &DispatchContext,
        request: SearchRequest,
    ) -> Result<AggregatedResponse> {
        self.search_vector(ctx, request, SearchMode::Linear).await
    }

    pub async fn linear_search_by_id(
        &self,
        ctx: &DispatchContext,
        request: SearchIdRequest,
    ) -> Result<AggregatedResponse> {
        self.search_id(ctx, request, SearchMode::Linear).await
    }

    pub async fn multi_search(
        &self,
        ctx: &DispatchContext,
        requests: Vec<SearchRequest>,
    ) -> Vec<Result<AggregatedResponse>> {
        self.multi(requests, |request| self.search(ctx, request)).await
    }

    pub async fn multi_search_by_id(
        &self,
        ctx: &DispatchContext,
        requests: Vec<SearchIdRequest>,
    ) -> Vec<Result<AggregatedResponse>> {
        self.multi(requests, |request| self.search_by_id(ctx, request)).await
    }

    pub async fn multi_linear_search(
        &self,
        ctx: &DispatchContext,
        requests: Vec<SearchRequest>,
    ) -> Vec<Result<AggregatedResponse>> {
        self.multi(requests, |request| self.linear_search(ctx, request)).await
    }

    pub async fn multi_linear_search_by_id(
        &self,
        ctx: &DispatchContext,
        requests: Vec<SearchIdRequest>,
    ) -> Vec<Result<AggregatedResponse>> {
        self.multi(requests, |request| self.linear_search_by_id(ctx, request)).await
    }

    /// Streaming search. Responses leave as they complete; a failed search is
    /// reported as a per-item status.
    pub async fn stream_search<I, O>(
        &self,
        ctx: &DispatchContext,
        inbound: &mut I,
        outbound: &mut O,
    ) -> Result<StreamSummary>
    where
        I: InboundStream<SearchRequest> + ?Sized,
        O: OutboundStream<StreamItem<AggregatedResponse>> + ?Sized,
    {
        self.drive_stream(ctx, |c| c, inbound, outbound, |lb, ctx, request| async move {
            lb.search(&ctx, request).await
        })
        .await
    }

    pub async fn stream_search_by_id<I, O>(
        &self,
        ctx: &DispatchContext,
        inbound: &mut I,
        outbound: &mut O,
    ) -> Result<StreamSummary>
    where
        I: InboundStream<SearchIdRequest> + ?Sized,
        O: OutboundStream<StreamItem<AggregatedResponse>> + ?Sized,
    {
        self.drive_stream(ctx, |c| c, inbound, outbound, |lb, ctx, request| async move {
            lb.search_by_id(&ctx, request).await
        })
        .await
    }

    pub async fn stream_linear_search<I, O>(
        &self,
        ctx: &DispatchContext,
        inbound: &mut I,
        outbound: &mut O,
    ) -> Result<StreamSummary>
    where
        I: InboundStream<SearchRequest> + ?Sized,
        O: OutboundStream<StreamItem<AggregatedResponse>> + ?Sized,
    {
        self.drive_stream(ctx, |c| c, inbound, outbound, |lb, ctx, request| async move {
            lb.linear_search(&ctx, request).await
        })
        .await
    }

    pub async fn stream_linear_search_by_id<I, O>(
        &self,
        ctx: &DispatchContext,
        inbound: &mut I,
        outbound: &mut O,
    ) -> Result<StreamSummary>
    where
        I: InboundStream<SearchIdRequest> + ?Sized,
        O: OutboundStream<StreamItem<AggregatedResponse>> + ?Sized,
    {
        self.drive_stream(ctx, |c| c, inbound, outbound, |lb, ctx, request| async move {
            lb.linear_search_by_id(&ctx, request).await
        })
        .await
    }

    async fn search_vector(
        &self,
        ctx: &DispatchContext,
        request: SearchRequest,
        mode: SearchMode,
    ) -> Result<AggregatedResponse> {
        self.validate_vector(&request.vector)?;
        let SearchRequest { vector, config } = request;
        let (radius, epsilon) = (config.radius, config.epsilon);
        self.aggregate_search(ctx, config, move |num| match mode {
            SearchMode::Approximate => AgentRequest::Search {
                vector,
                num,
                radius,
                epsilon,
            },
            SearchMode::Linear => AgentRequest::LinearSearch { vector, num },
        })
        .await
    }

    async fn search_id(
        &self,
        ctx: &DispatchContext,
        request: SearchIdRequest,
        mode: SearchMode,
    ) -> Result<AggregatedResponse> {
        let SearchIdRequest { id, config } = request;
        if id.is_empty() {
            return Err(GatewayError::invalid_argument("search id must not be empty"));
        }

        match self.get_object(ctx, &id).await {
            Ok(object) => {
                let request = SearchRequest {
                    vector: object.vector,
                    config,
                };
                return self.search_vector(ctx, request, mode).await;
            }
            Err(err) if err.code() == ErrorCode::Cancelled => return Err(err),
            Err(err) => {
                tracing::debug!(
                    %id,
                    error = %err,
                    "object lookup failed, searching by id on the agents"
                );
            }
        }

        let (radius, epsilon) = (config.radius, config.epsilon);
        self.aggregate_search(ctx, config, move |num| match mode {
            SearchMode::Approximate => AgentRequest::SearchById {
                id,
                num,
                radius,
                epsilon,
            },
            SearchMode::Linear => AgentRequest::LinearSearchById { id, num },
        })
        .await
    }

    /// Fan a search out, merge the answers and apply the result checks.
    async fn aggregate_search<B>(
        &self,
        ctx: &DispatchContext,
        config: SearchConfig,
        build: B,
    ) -> Result<AggregatedResponse>
    where
        B: FnOnce(u32) -> AgentRequest,
    {
        if config.num == 0 {
            return Err(GatewayError::invalid_argument(
                "search result number must be greater than 0",
            ));
        }
        let request_id = if config.request_id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            config.request_id.clone()
        };
        let span = tracing::debug_span!("search", request_id = %request_id, num = config.num);

        async move {
            let ctx = ctx.narrowed(config.timeout);
            let dispatcher = self.dispatcher();
            let targets = dispatcher.gateway().targets(Operation::Search).await?;
            let per_agent_k = self.per_agent_k(&config, targets.len());
            let plan = DispatchPlan::new(Operation::Search, targets, per_agent_k)?;

            let algorithm = match config.algorithm {
                AggregationAlgorithm::Auto => self.config().default_algorithm,
                explicit => explicit,
            };
            let aggregator = self.selector().select(
                algorithm,
                config.num as usize,
                per_agent_k as usize,
                plan.len(),
            );

            let request = Arc::new(build(per_agent_k));
            let call = move |gateway: Arc<G>, target: AgentTarget| {
                let request = AgentRequest::clone(&request);
                async move { search_answer(call_agent(gateway.as_ref(), &target, request).await) }
            };
            let outcome = dispatcher
                .dispatch_aggregate(&ctx, &plan, aggregator, call)
                .await;

            ensure_not_cancelled(&ctx)?;
            dispatcher.check_quorum(&outcome.summary)?;

            let found = outcome.candidates.len();
            let min_num = config.min_num as usize;
            if min_num > 0 && found < min_num {
                let err = GatewayError::InsufficientResults {
                    required: min_num,
                    found,
                };
                if ctx.is_expired() {
                    return Err(GatewayError::deadline_exceeded(err.to_string()));
                }
                return Err(err);
            }
            if found == 0 && ctx.is_expired() {
                return Err(GatewayError::deadline_exceeded(
                    "search produced no results before the deadline",
                ));
            }

            tracing::debug!(
                algorithm = %outcome.algorithm,
                found,
                responded = outcome.summary.succeeded,
                "search merged"
            );
            Ok(AggregatedResponse {
                request_id,
                results: outcome.candidates,
                responded: outcome.summary.succeeded,
                failed: outcome.summary.failed,
                timed_out: outcome.summary.timed_out,
            })
        }
        .instrument(span)
        .await
    }

    /// Candidates to request from each agent.
    ///
    /// A request-level ratio scales by the replica layout; otherwise the
    /// count is inflated by the configured success ratio.
    fn per_agent_k(&self, config: &SearchConfig, targets: usize) -> u32 {
        match config.ratio {
            Some(ratio) => QuorumSizer::replica_scaled(
                config.num,
                ratio,
                self.config().replica,
                self.gateway().agent_count().max(targets),
            ),
            None => QuorumSizer::required_per_agent(config.num, self.config().success_ratio),
        }
    }
}

/// Interpret one agent's answer to a search call.
///
/// Agents answering `NotFound`, `Aborted` or `InvalidArgument` are healthy
/// but have nothing to contribute.
fn search_answer(answer: Result<AgentResponse>) -> Result<Vec<Candidate>> {
    match answer {
        Ok(AgentResponse::Candidates(candidates)) => Ok(candidates),
        Ok(other) => Err(GatewayError::internal(format!(
            "unexpected answer to a search call: {other:?}"
        ))),
        Err(err) if !err.code().is_agent_failure() => {
            tracing::debug!(error = %err, "agent has nothing to contribute");
            Ok(Vec::new())
        }
        Err(err) => Err(err),
    }
}
