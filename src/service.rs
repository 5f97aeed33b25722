//! The load balancer: every client-facing operation of the gateway.
//!
//! [`LoadBalancer`] owns the immutable configuration, a [`Dispatcher`] over
//! the [`Gateway`] collaborator, the aggregator selector and the statistics
//! reducer. Operations are grouped by concern in the submodules:
//! searches in `search`, writes in `write`, object reads in `object` and
//! fleet information in `index`.

pub mod index;
pub mod object;
pub mod search;
pub mod write;

use std::future::Future;
use std::sync::Arc;

use futures::stream::{self, StreamExt};

use crate::aggregator::AggregatorSelector;
use crate::config::GatewayConfig;
use crate::dispatch::{DispatchContext, DispatchMetrics, Dispatcher};
use crate::error::{GatewayError, Result};
use crate::gateway::Gateway;
use crate::stats::StatsReducer;
use crate::stream::{InboundStream, OutboundStream, StreamCoordinator, StreamSummary};
use crate::types::StreamItem;

/// Client-facing gateway over a fleet of agents.
pub struct LoadBalancer<G: Gateway> {
    dispatcher: Dispatcher<G>,
    config: Arc<GatewayConfig>,
    selector: AggregatorSelector,
    reducer: Arc<StatsReducer>,
}

impl<G: Gateway> Clone for LoadBalancer<G> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: self.dispatcher.clone(),
            config: Arc::clone(&self.config),
            selector: self.selector,
            reducer: Arc::clone(&self.reducer),
        }
    }
}

impl<G: Gateway> LoadBalancer<G> {
    /// Create a load balancer. Fails when the configuration is invalid.
    pub fn new(gateway: Arc<G>, config: GatewayConfig) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let selector = AggregatorSelector::new(
            config.small_merge_threshold,
            config.deployment.dedup_policy(),
        );
        tracing::info!(
            name = %config.name,
            agents = gateway.agent_count(),
            deployment = ?config.deployment,
            "load balancer ready"
        );
        Ok(Self {
            dispatcher: Dispatcher::new(gateway, Arc::clone(&config)),
            config,
            selector,
            reducer: Arc::new(StatsReducer::for_index_statistics()),
        })
    }

    /// Replace the reducer used by [`LoadBalancer::index_statistics`].
    pub fn with_reducer(mut self, reducer: StatsReducer) -> Self {
        self.reducer = Arc::new(reducer);
        self
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn gateway(&self) -> &Arc<G> {
        self.dispatcher.gateway()
    }

    pub fn metrics(&self) -> DispatchMetrics {
        self.dispatcher.metrics().snapshot()
    }

    /// A fresh request context using the configured timeout.
    pub fn context(&self) -> DispatchContext {
        DispatchContext::with_timeout(self.config.timeout)
    }

    pub(crate) fn dispatcher(&self) -> &Dispatcher<G> {
        &self.dispatcher
    }

    pub(crate) fn selector(&self) -> &AggregatorSelector {
        &self.selector
    }

    pub(crate) fn reducer(&self) -> &StatsReducer {
        &self.reducer
    }

    /// Reject vectors below the configured minimum dimension.
    pub(crate) fn validate_vector(&self, vector: &[f32]) -> Result<()> {
        if vector.len() < self.config.min_vector_dimension {
            return Err(GatewayError::invalid_argument(format!(
                "vector dimension {} is too small, minimum is {}",
                vector.len(),
                self.config.min_vector_dimension
            )));
        }
        Ok(())
    }

    /// Run `op` over every item with at most `multi_concurrency` in flight,
    /// returning one result per item in request order.
    pub(crate) async fn multi<Req, Resp, F, Fut>(&self, items: Vec<Req>, op: F) -> Vec<Result<Resp>>
    where
        F: FnMut(Req) -> Fut,
        Fut: Future<Output = Result<Resp>>,
    {
        stream::iter(items)
            .map(op)
            .buffered(self.config.multi_concurrency)
            .collect()
            .await
    }

    fn coordinator(&self) -> StreamCoordinator {
        StreamCoordinator::new(self.config.stream_concurrency)
    }

    /// Drive a stream with `op` handling each item.
    ///
    /// Every item gets its own deadline from the configured timeout, bounded
    /// by the stream context, and is cancelled together with the stream.
    pub(crate) async fn drive_stream<Req, Resp, I, O, F, Fut>(
        &self,
        ctx: &DispatchContext,
        coordinator: impl FnOnce(StreamCoordinator) -> StreamCoordinator,
        inbound: &mut I,
        outbound: &mut O,
        op: F,
    ) -> Result<StreamSummary>
    where
        Req: Send + 'static,
        Resp: Send + 'static,
        I: InboundStream<Req> + ?Sized,
        O: OutboundStream<StreamItem<Resp>> + ?Sized,
        F: Fn(Self, DispatchContext, Req) -> Fut,
        Fut: Future<Output = Result<Resp>> + Send + 'static,
    {
        let timeout = self.config.timeout;
        coordinator(self.coordinator())
            .run(inbound, outbound, |request| {
                let item_ctx = ctx.child().narrowed(Some(timeout));
                op(self.clone(), item_ctx, request)
            })
            .await
    }
}

/// Fail with `Cancelled` when the caller gave up on the request.
pub(crate) fn ensure_not_cancelled(ctx: &DispatchContext) -> Result<()> {
    if ctx.is_cancelled() {
        return Err(GatewayError::cancelled("request cancelled by the caller"));
    }
    Ok(())
}
