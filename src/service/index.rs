//! Fleet information endpoints.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::dispatch::{DispatchContext, Outcome, call_agent};
use crate::error::{ErrorCode, GatewayError, Result};
use crate::gateway::{AgentRequest, AgentResponse, Gateway};
use crate::service::{LoadBalancer, ensure_not_cancelled};
use crate::stats::{IndexCount, IndexStatsSnapshot, MergedStats, StatsReducer};
use crate::types::{AgentTarget, Operation};

/// Agent error codes an info call tolerates; any other code aborts it.
fn tolerated(code: ErrorCode) -> bool {
    matches!(
        code,
        ErrorCode::Cancelled
            | ErrorCode::DeadlineExceeded
            | ErrorCode::InvalidArgument
            | ErrorCode::NotFound
            | ErrorCode::Unimplemented
    )
}

impl<G: Gateway> LoadBalancer<G> {
    /// Cluster-wide index counters.
    pub async fn index_info(&self, ctx: &DispatchContext) -> Result<IndexCount> {
        let counts = self
            .collect_info(ctx, AgentRequest::IndexInfo, |response| match response {
                AgentResponse::IndexCount(count) => Some(count),
                _ => None,
            })
            .await?;
        Ok(StatsReducer::merge_counts(&counts))
    }

    /// Statistics snapshot of every agent, keyed by agent name.
    pub async fn index_statistics_detail(
        &self,
        ctx: &DispatchContext,
    ) -> Result<BTreeMap<String, IndexStatsSnapshot>> {
        self.collect_info(ctx, AgentRequest::IndexStatistics, |response| match response {
            AgentResponse::Statistics(snapshot) => Some(snapshot),
            _ => None,
        })
        .await
    }

    /// Statistics merged across the fleet.
    ///
    /// Snapshots the reducer cannot merge are listed in
    /// [`MergedStats::excluded`] rather than failing the call.
    pub async fn index_statistics(&self, ctx: &DispatchContext) -> Result<MergedStats> {
        let snapshots = self.index_statistics_detail(ctx).await?;
        let merged = self.reducer().merge(&snapshots);
        if merged.excluded_count() > 0 {
            tracing::warn!(
                excluded = merged.excluded_count(),
                merged = merged.merged_agents.len(),
                "index statistics merged with exclusions"
            );
        }
        Ok(merged)
    }

    /// Index properties of every agent, keyed by agent name.
    pub async fn index_property(
        &self,
        ctx: &DispatchContext,
    ) -> Result<BTreeMap<String, BTreeMap<String, String>>> {
        self.collect_info(ctx, AgentRequest::IndexProperty, |response| match response {
            AgentResponse::Property(property) => Some(property),
            _ => None,
        })
        .await
    }

    async fn collect_info<T, E>(
        &self,
        ctx: &DispatchContext,
        request: AgentRequest,
        extract: E,
    ) -> Result<BTreeMap<String, T>>
    where
        T: Send + 'static,
        E: Fn(AgentResponse) -> Option<T> + Send + Sync + 'static,
    {
        let dispatcher = self.dispatcher();
        let plan = dispatcher.plan(Operation::Info, 0).await?;
        let extract = Arc::new(extract);
        let results = dispatcher
            .dispatch(ctx, &plan, move |gateway: Arc<G>, target: AgentTarget| {
                let request = request.clone();
                let extract = Arc::clone(&extract);
                async move {
                    let response = call_agent(gateway.as_ref(), &target, request).await?;
                    (*extract)(response).ok_or_else(|| {
                        GatewayError::internal(format!("unexpected answer from {}", target.name))
                    })
                }
            })
            .await;
        ensure_not_cancelled(ctx)?;

        let mut collected = BTreeMap::new();
        for result in results {
            match result.outcome {
                Outcome::Success(value) => {
                    collected.insert(result.target.name, value);
                }
                Outcome::Failure(err) if tolerated(err.code()) => {
                    tracing::debug!(agent = %result.target.name, error = %err, "agent skipped");
                }
                Outcome::Failure(err) => return Err(err),
                Outcome::Timeout | Outcome::Cancelled => {}
            }
        }
        Ok(collected)
    }
}
