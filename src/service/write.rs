//! Write endpoints: insert, update, upsert and remove.

use std::sync::Arc;

use crate::dispatch::{DispatchContext, DispatchSummary, PartialResult, call_agent};
use crate::error::{ErrorCode, GatewayError, Result};
use crate::gateway::{AgentRequest, AgentResponse, Gateway};
use crate::service::{LoadBalancer, ensure_not_cancelled};
use crate::stream::{DeliveryOrder, InboundStream, OutboundStream, StreamSummary};
use crate::types::{
    AgentTarget, ObjectLocation, ObjectVector, Operation, RemoveRequest, StreamItem, WriteConfig,
    WriteRequest, now_nanos,
};

impl<G: Gateway> LoadBalancer<G> {
    /// Insert a new object on the write targets.
    ///
    /// Unless `skip_strict_exist_check` is set, an object that already exists
    /// anywhere is rejected with `AlreadyExists`.
    pub async fn insert(
        &self,
        ctx: &DispatchContext,
        request: WriteRequest,
    ) -> Result<ObjectLocation> {
        let WriteRequest { mut object, config } = request;
        self.validate_object(&object)?;
        let ctx = ctx.narrowed(config.timeout);

        if !config.skip_strict_exist_check {
            match self.exists(&ctx, &object.id).await {
                Ok(_) => {
                    return Err(GatewayError::already_exists(format!(
                        "object {} already exists",
                        object.id
                    )));
                }
                Err(err) if err.code() == ErrorCode::NotFound => {}
                Err(err) => return Err(err),
            }
        }

        object.timestamp = write_timestamp(&config, &object);
        let id = object.id.clone();
        self.write_fanout(&ctx, Operation::Write, &id, AgentRequest::Insert(object))
            .await
    }

    /// Replace the vector of an existing object on every agent holding it.
    pub async fn update(
        &self,
        ctx: &DispatchContext,
        request: WriteRequest,
    ) -> Result<ObjectLocation> {
        let WriteRequest { mut object, config } = request;
        self.validate_object(&object)?;
        let ctx = ctx.narrowed(config.timeout);

        if !config.skip_strict_exist_check {
            self.exists(&ctx, &object.id).await?;
        }

        object.timestamp = write_timestamp(&config, &object);
        let id = object.id.clone();
        self.write_fanout(&ctx, Operation::Read, &id, AgentRequest::Update(object))
            .await
    }

    /// Update the object when it exists, insert it otherwise.
    pub async fn upsert(
        &self,
        ctx: &DispatchContext,
        request: WriteRequest,
    ) -> Result<ObjectLocation> {
        self.validate_object(&request.object)?;
        let ctx = ctx.narrowed(request.config.timeout);
        let exists = match self.exists(&ctx, &request.object.id).await {
            Ok(_) => true,
            Err(err) if err.code() == ErrorCode::NotFound => false,
            Err(err) => return Err(err),
        };

        let request = WriteRequest {
            config: WriteConfig {
                skip_strict_exist_check: true,
                ..request.config
            },
            ..request
        };
        if exists {
            self.update(&ctx, request).await
        } else {
            self.insert(&ctx, request).await
        }
    }

    /// Remove an object from every agent holding it.
    pub async fn remove(
        &self,
        ctx: &DispatchContext,
        request: RemoveRequest,
    ) -> Result<ObjectLocation> {
        let RemoveRequest { id, config } = request;
        if id.is_empty() {
            return Err(GatewayError::invalid_argument("object id must not be empty"));
        }
        let ctx = ctx.narrowed(config.timeout);
        let timestamp = if config.timestamp > 0 {
            config.timestamp
        } else {
            now_nanos()
        };
        self.write_fanout(
            &ctx,
            Operation::Read,
            &id,
            AgentRequest::Remove {
                id: id.clone(),
                timestamp,
            },
        )
        .await
    }

    pub async fn multi_insert(
        &self,
        ctx: &DispatchContext,
        requests: Vec<WriteRequest>,
    ) -> Vec<Result<ObjectLocation>> {
        self.multi(requests, |request| self.insert(ctx, request)).await
    }

    pub async fn multi_update(
        &self,
        ctx: &DispatchContext,
        requests: Vec<WriteRequest>,
    ) -> Vec<Result<ObjectLocation>> {
        self.multi(requests, |request| self.update(ctx, request)).await
    }

    pub async fn multi_upsert(
        &self,
        ctx: &DispatchContext,
        requests: Vec<WriteRequest>,
    ) -> Vec<Result<ObjectLocation>> {
        self.multi(requests, |request| self.upsert(ctx, request)).await
    }

    pub async fn multi_remove(
        &self,
        ctx: &DispatchContext,
        requests: Vec<RemoveRequest>,
    ) -> Vec<Result<ObjectLocation>> {
        self.multi(requests, |request| self.remove(ctx, request)).await
    }

    pub async fn stream_insert<I, O>(
        &self,
        ctx: &DispatchContext,
        inbound: &mut I,
        outbound: &mut O,
    ) -> Result<StreamSummary>
    where
        I: InboundStream<WriteRequest> + ?Sized,
        O: OutboundStream<StreamItem<ObjectLocation>> + ?Sized,
    {
        self.drive_stream(ctx, |c| c, inbound, outbound, |lb, ctx, request| async move {
            lb.insert(&ctx, request).await
        })
        .await
    }

    pub async fn stream_update<I, O>(
        &self,
        ctx: &DispatchContext,
        inbound: &mut I,
        outbound: &mut O,
    ) -> Result<StreamSummary>
    where
        I: InboundStream<WriteRequest> + ?Sized,
        O: OutboundStream<StreamItem<ObjectLocation>> + ?Sized,
    {
        self.drive_stream(ctx, |c| c, inbound, outbound, |lb, ctx, request| async move {
            lb.update(&ctx, request).await
        })
        .await
    }

    pub async fn stream_upsert<I, O>(
        &self,
        ctx: &DispatchContext,
        inbound: &mut I,
        outbound: &mut O,
    ) -> Result<StreamSummary>
    where
        I: InboundStream<WriteRequest> + ?Sized,
        O: OutboundStream<StreamItem<ObjectLocation>> + ?Sized,
    {
        self.drive_stream(ctx, |c| c, inbound, outbound, |lb, ctx, request| async move {
            lb.upsert(&ctx, request).await
        })
        .await
    }

    /// Streaming remove. Callers pair requests with responses, so responses
    /// leave in request order.
    pub async fn stream_remove<I, O>(
        &self,
        ctx: &DispatchContext,
        inbound: &mut I,
        outbound: &mut O,
    ) -> Result<StreamSummary>
    where
        I: InboundStream<RemoveRequest> + ?Sized,
        O: OutboundStream<StreamItem<ObjectLocation>> + ?Sized,
    {
        self.drive_stream(
            ctx,
            |c| c.with_order(DeliveryOrder::Ordered),
            inbound,
            outbound,
            |lb, ctx, request| async move { lb.remove(&ctx, request).await },
        )
        .await
    }

    fn validate_object(&self, object: &ObjectVector) -> Result<()> {
        if object.id.is_empty() {
            return Err(GatewayError::invalid_argument("object id must not be empty"));
        }
        self.validate_vector(&object.vector)
    }

    /// Send one write to every target of `operation` and merge the locations.
    ///
    /// Agents answering `NotFound` do not hold the object and are skipped.
    async fn write_fanout(
        &self,
        ctx: &DispatchContext,
        operation: Operation,
        id: &str,
        request: AgentRequest,
    ) -> Result<ObjectLocation> {
        let dispatcher = self.dispatcher();
        let plan = dispatcher.plan(operation, 0).await?;
        let results = dispatcher
            .dispatch(ctx, &plan, move |gateway: Arc<G>, target: AgentTarget| {
                let request = request.clone();
                async move {
                    match call_agent(gateway.as_ref(), &target, request).await {
                        Ok(AgentResponse::Location(location)) => Ok(Some(location)),
                        Ok(other) => Err(GatewayError::internal(format!(
                            "unexpected answer to a write: {other:?}"
                        ))),
                        Err(err) if err.code() == ErrorCode::NotFound => Ok(None),
                        Err(err) => Err(err),
                    }
                }
            })
            .await;

        ensure_not_cancelled(ctx)?;
        let summary = DispatchSummary::from_results(&results);
        if let Err(err) = dispatcher.check_quorum(&summary) {
            return Err(uniform_rejection(&results).unwrap_or(err));
        }

        let locations: Vec<ObjectLocation> = results
            .into_iter()
            .filter_map(|r| r.into_value().flatten())
            .collect();
        if locations.is_empty() {
            return Err(GatewayError::not_found(format!("object {id} not found")));
        }
        tracing::debug!(id, op = operation.as_str(), agents = locations.len(), "write applied");
        Ok(merge_locations(id, locations))
    }
}

/// When every failed agent rejected the request for the same client-side
/// reason, that reason is the answer rather than a quorum error.
fn uniform_rejection<T>(results: &[PartialResult<T>]) -> Option<GatewayError> {
    let mut errors = results.iter().filter_map(|r| r.error());
    let first = errors.next()?;
    let client_side = matches!(
        first.code(),
        ErrorCode::AlreadyExists | ErrorCode::InvalidArgument
    );
    if client_side && errors.all(|err| err.code() == first.code()) {
        Some(first)
    } else {
        None
    }
}

fn write_timestamp(config: &WriteConfig, object: &ObjectVector) -> i64 {
    if config.timestamp > 0 {
        config.timestamp
    } else if object.timestamp > 0 {
        object.timestamp
    } else {
        now_nanos()
    }
}

/// One location for all agents: names sorted and comma-joined, addresses in
/// the same order.
fn merge_locations(id: &str, mut locations: Vec<ObjectLocation>) -> ObjectLocation {
    locations.sort_by(|a, b| a.name.cmp(&b.name));
    let name = locations
        .iter()
        .map(|l| l.name.as_str())
        .collect::<Vec<_>>()
        .join(",");
    let ips = locations.into_iter().flat_map(|l| l.ips).collect();
    ObjectLocation {
        uuid: id.to_string(),
        name,
        ips,
    }
}
