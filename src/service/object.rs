//! Object lookups: stop at the first agent holding the object.

use std::sync::Arc;

use crate::dispatch::{DispatchContext, call_agent};
use crate::error::{GatewayError, Result};
use crate::gateway::{AgentRequest, AgentResponse, Gateway};
use crate::quorum::QuorumSizer;
use crate::service::{LoadBalancer, ensure_not_cancelled};
use crate::stream::{FailurePolicy, InboundStream, OutboundStream, StreamSummary};
use crate::types::{AgentTarget, ObjectVector, Operation, StreamItem};

impl<G: Gateway> LoadBalancer<G> {
    /// Whether any agent holds `id`. Returns the id when found.
    pub async fn exists(&self, ctx: &DispatchContext, id: &str) -> Result<String> {
        if id.is_empty() {
            return Err(GatewayError::invalid_argument("object id must not be empty"));
        }
        let request = AgentRequest::Exists { id: id.to_string() };
        self.first_found(ctx, id, request, |response| match response {
            AgentResponse::Id(id) => Some(id),
            _ => None,
        })
        .await
    }

    /// Fetch the stored vector of `id` from the first agent that has it.
    pub async fn get_object(&self, ctx: &DispatchContext, id: &str) -> Result<ObjectVector> {
        if id.is_empty() {
            return Err(GatewayError::invalid_argument("object id must not be empty"));
        }
        let request = AgentRequest::GetObject { id: id.to_string() };
        self.first_found(ctx, id, request, |response| match response {
            AgentResponse::Object(object) => Some(object),
            _ => None,
        })
        .await
    }

    /// Streaming object lookup. There is no per-item status on this stream:
    /// the first failed lookup aborts it.
    pub async fn stream_get_object<I, O>(
        &self,
        ctx: &DispatchContext,
        inbound: &mut I,
        outbound: &mut O,
    ) -> Result<StreamSummary>
    where
        I: InboundStream<String> + ?Sized,
        O: OutboundStream<StreamItem<ObjectVector>> + ?Sized,
    {
        self.drive_stream(
            ctx,
            |c| c.with_failure_policy(FailurePolicy::Abort),
            inbound,
            outbound,
            |lb, ctx, id| async move { lb.get_object(&ctx, &id).await },
        )
        .await
    }

    /// Ask every read target and keep the first answer; the remaining calls
    /// are cancelled as soon as one agent answers.
    async fn first_found<T, E>(
        &self,
        ctx: &DispatchContext,
        id: &str,
        request: AgentRequest,
        extract: E,
    ) -> Result<T>
    where
        T: Send + 'static,
        E: Fn(AgentResponse) -> Option<T> + Send + Sync + 'static,
    {
        let dispatcher = self.dispatcher();
        let plan = dispatcher.plan(Operation::Read, 0).await?;
        let ctx = ctx.child();
        let stop = ctx.token().clone();
        let extract = Arc::new(extract);

        let results = dispatcher
            .dispatch(&ctx, &plan, move |gateway: Arc<G>, target: AgentTarget| {
                let request = request.clone();
                let extract = Arc::clone(&extract);
                let stop = stop.clone();
                async move {
                    let response = call_agent(gateway.as_ref(), &target, request).await?;
                    let value = (*extract)(response).ok_or_else(|| {
                        GatewayError::internal(format!("unexpected answer from {}", target.name))
                    })?;
                    stop.cancel();
                    Ok(value)
                }
            })
            .await;

        let targets = results.len();
        let real_failures = results
            .iter()
            .filter_map(|r| r.error())
            .filter(|err| err.code().is_agent_failure())
            .count();
        if let Some(value) = results.into_iter().find_map(|r| r.into_value()) {
            return Ok(value);
        }
        ensure_not_cancelled(&ctx)?;

        // no agent could even tell whether it holds the object
        if real_failures == targets {
            return Err(GatewayError::QuorumFailure {
                succeeded: 0,
                failed: real_failures,
                required: QuorumSizer::required_successes(targets, self.config().success_ratio),
                targets,
            });
        }
        Err(GatewayError::not_found(format!("object {id} not found")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::error::ErrorCode;
    use crate::gateway::{AgentFault, MemoryGateway};
    use crate::stream::{inbound_channel, outbound_channel};

    fn lb(agents: usize) -> LoadBalancer<MemoryGateway> {
        LoadBalancer::new(Arc::new(MemoryGateway::new(agents)), GatewayConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_get_object_from_one_agent() {
        let lb = lb(3);
        lb.gateway()
            .seed_agent("agent-2", vec![ObjectVector::new("x", vec![1.0, 2.0])]);

        let object = lb.get_object(&lb.context(), "x").await.unwrap();
        assert_eq!(object.vector, vec![1.0, 2.0]);
        assert_eq!(lb.exists(&lb.context(), "x").await.unwrap(), "x");
    }

    #[tokio::test]
    async fn test_missing_object() {
        let lb = lb(2);
        let err = lb.get_object(&lb.context(), "missing").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
        assert_eq!(
            lb.exists(&lb.context(), "").await.unwrap_err().code(),
            ErrorCode::InvalidArgument
        );
    }

    #[tokio::test]
    async fn test_all_agents_down() {
        let lb = lb(2);
        for name in lb.gateway().agent_names() {
            lb.gateway().set_fault(&name, AgentFault::error(ErrorCode::Unavailable));
        }
        let err = lb.exists(&lb.context(), "x").await.unwrap_err();
        assert!(matches!(err, GatewayError::QuorumFailure { .. }));
    }

    #[tokio::test]
    async fn test_first_answer_cancels_siblings() {
        let lb = lb(3);
        lb.gateway().seed_agent("agent-0", vec![ObjectVector::new("x", vec![1.0, 2.0])]);
        lb.gateway().set_fault("agent-1", AgentFault::hang());
        lb.gateway().set_fault("agent-2", AgentFault::hang());

        let started = tokio::time::Instant::now();
        lb.get_object(&lb.context(), "x").await.unwrap();
        assert!(started.elapsed() < lb.config().timeout);
        assert_eq!(lb.metrics().agent_cancellations, 2);
    }

    #[tokio::test]
    async fn test_stream_get_object_aborts() {
        let lb = lb(2);
        lb.gateway().seed_replicated(vec![ObjectVector::new("a", vec![0.0, 1.0])]);
        let (tx, mut inbound) = inbound_channel(4);
        let (mut outbound, mut rx) = outbound_channel(4);
        tx.send(Ok("a".to_string())).await.unwrap();
        tx.send(Ok("b".to_string())).await.unwrap();
        drop(tx);

        let err = lb
            .stream_get_object(&lb.context(), &mut inbound, &mut outbound)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
        while let Ok(item) = rx.try_recv() {
            assert!(!item.is_status());
        }
    }
}
