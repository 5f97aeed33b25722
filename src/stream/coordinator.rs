//! Bounded-concurrency driver for streaming endpoints.

use std::collections::BTreeMap;
use std::future::Future;

use serde::Serialize;
use tokio::task::JoinSet;

use crate::error::{GatewayError, Result};
use crate::stream::{InboundStream, OutboundStream};
use crate::types::StreamItem;

/// Lifecycle of one stream.
///
/// `Open → Receiving → (Dispatching ⇄ Receiving) → Draining → Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StreamState {
    Open,
    Receiving,
    Dispatching,
    Draining,
    Closed,
}

/// Whether responses must leave in request order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOrder {
    /// Emit each response as soon as it completes.
    Unordered,
    /// Buffer completed responses and emit them in request order.
    Ordered,
}

/// What a failed item does to the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Send the error as a per-item status and keep going.
    PerItem,
    /// Stop the whole stream with the item's error.
    Abort,
}

/// Counters reported when a stream closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreamSummary {
    pub received: usize,
    pub sent: usize,
    pub failed: usize,
    /// Highest number of dispatches observed in flight at once.
    pub peak_in_flight: usize,
}

/// Pulls requests off an inbound stream, dispatches each one without waiting
/// for the previous, and writes results to the outbound stream.
///
/// In-flight dispatches plus responses buffered for ordering never exceed
/// the concurrency limit, so a slow client cannot make the gateway buffer
/// without bound: once the limit is reached no further message is read.
#[derive(Debug, Clone, Copy)]
pub struct StreamCoordinator {
    concurrency: usize,
    order: DeliveryOrder,
    on_failure: FailurePolicy,
}

impl StreamCoordinator {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            order: DeliveryOrder::Unordered,
            on_failure: FailurePolicy::PerItem,
        }
    }

    pub fn with_order(mut self, order: DeliveryOrder) -> Self {
        self.order = order;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.on_failure = policy;
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Drive the stream to completion.
    ///
    /// Returns once the inbound stream ended and every dispatch was written
    /// out, or with an error when either stream fails or, under
    /// [`FailurePolicy::Abort`], when an item fails.
    pub async fn run<Req, Resp, I, O, H, Fut>(
        &self,
        inbound: &mut I,
        outbound: &mut O,
        handler: H,
    ) -> Result<StreamSummary>
    where
        Req: Send + 'static,
        Resp: Send + 'static,
        I: InboundStream<Req> + ?Sized,
        O: OutboundStream<StreamItem<Resp>> + ?Sized,
        H: Fn(Req) -> Fut,
        Fut: Future<Output = Result<Resp>> + Send + 'static,
    {
        let mut state = StreamState::Open;
        let mut summary = StreamSummary::default();
        let mut in_flight: JoinSet<(u64, Result<Resp>)> = JoinSet::new();
        let mut reorder: BTreeMap<u64, Result<Resp>> = BTreeMap::new();
        let mut next_seq: u64 = 0;
        let mut next_emit: u64 = 0;
        let mut inbound_open = true;

        loop {
            if !inbound_open && in_flight.is_empty() {
                break;
            }
            let can_receive = inbound_open && in_flight.len() + reorder.len() < self.concurrency;
            if can_receive {
                transition(&mut state, StreamState::Receiving);
            }

            tokio::select! {
                biased;
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    let (seq, result) = joined.map_err(|err| {
                        GatewayError::internal(format!("stream dispatch task failed: {err}"))
                    })?;
                    match self.order {
                        DeliveryOrder::Unordered => {
                            self.emit(outbound, result, &mut summary).await?;
                        }
                        DeliveryOrder::Ordered => {
                            reorder.insert(seq, result);
                            while let Some(ready) = reorder.remove(&next_emit) {
                                next_emit += 1;
                                self.emit(outbound, ready, &mut summary).await?;
                            }
                        }
                    }
                }
                message = inbound.recv(), if can_receive => {
                    match message {
                        Ok(Some(request)) => {
                            let seq = next_seq;
                            next_seq += 1;
                            summary.received += 1;
                            transition(&mut state, StreamState::Dispatching);
                            let dispatch = handler(request);
                            in_flight.spawn(async move { (seq, dispatch.await) });
                            summary.peak_in_flight = summary.peak_in_flight.max(in_flight.len());
                        }
                        Ok(None) => {
                            inbound_open = false;
                            transition(&mut state, StreamState::Draining);
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "inbound stream failed, aborting");
                            return Err(into_stream_abort(err));
                        }
                    }
                }
                else => break,
            }
        }

        transition(&mut state, StreamState::Closed);
        tracing::debug!(
            received = summary.received,
            sent = summary.sent,
            failed = summary.failed,
            peak_in_flight = summary.peak_in_flight,
            "stream closed"
        );
        Ok(summary)
    }

    async fn emit<Resp, O>(
        &self,
        outbound: &mut O,
        result: Result<Resp>,
        summary: &mut StreamSummary,
    ) -> Result<()>
    where
        Resp: Send + 'static,
        O: OutboundStream<StreamItem<Resp>> + ?Sized,
    {
        let item = match result {
            Ok(response) => StreamItem::Response(response),
            Err(err) => {
                summary.failed += 1;
                match self.on_failure {
                    FailurePolicy::PerItem => StreamItem::from_error(err),
                    FailurePolicy::Abort => {
                        tracing::warn!(error = %err, "stream item failed, aborting stream");
                        return Err(err);
                    }
                }
            }
        };
        outbound.send(item).await.map_err(into_stream_abort)?;
        summary.sent += 1;
        Ok(())
    }
}

fn transition(state: &mut StreamState, next: StreamState) {
    if *state != next {
        tracing::trace!(from = ?*state, to = ?next, "stream state");
        *state = next;
    }
}

fn into_stream_abort(err: GatewayError) -> GatewayError {
    match err {
        GatewayError::StreamAbort(_) => err,
        other => GatewayError::stream_abort(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::error::ErrorCode;
    use crate::stream::{inbound_channel, outbound_channel};

    async fn feed(
        tx: tokio::sync::mpsc::Sender<Result<u64>>,
        items: impl IntoIterator<Item = u64>,
    ) {
        for item in items {
            if tx.send(Ok(item)).await.is_err() {
                break;
            }
        }
    }

    fn drain<T>(rx: &mut tokio::sync::mpsc::Receiver<T>) -> Vec<T> {
        let mut out = Vec::new();
        while let Ok(item) = rx.try_recv() {
            out.push(item);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_never_exceeded() {
        let (tx, mut inbound) = inbound_channel(4);
        let (mut outbound, mut rx) = outbound_channel(1024);
        tokio::spawn(feed(tx, 0..100));

        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let coordinator = StreamCoordinator::new(5);
        let summary = coordinator
            .run(&mut inbound, &mut outbound, |n: u64| {
                let current = Arc::clone(&current);
                let peak = Arc::clone(&peak);
                async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10 + n % 7)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    Ok(n * 2)
                }
            })
            .await
            .unwrap();

        assert_eq!(summary.received, 100);
        assert_eq!(summary.sent, 100);
        assert!(summary.peak_in_flight <= 5);
        assert!(peak.load(Ordering::SeqCst) <= 5);
        assert_eq!(drain(&mut rx).len(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ordered_delivery() {
        let (tx, mut inbound) = inbound_channel(8);
        let (mut outbound, mut rx) = outbound_channel(64);
        tokio::spawn(feed(tx, 0..10));

        let coordinator = StreamCoordinator::new(4).with_order(DeliveryOrder::Ordered);
        coordinator
            .run(&mut inbound, &mut outbound, |n: u64| async move {
                // later requests finish first
                tokio::time::sleep(Duration::from_millis(100 - n * 10)).await;
                Ok(n)
            })
            .await
            .unwrap();

        let received: Vec<u64> = drain(&mut rx)
            .into_iter()
            .map(|item| match item {
                StreamItem::Response(n) => n,
                StreamItem::Status(s) => panic!("unexpected status {s:?}"),
            })
            .collect();
        assert_eq!(received, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_per_item_failure() {
        let (tx, mut inbound) = inbound_channel(8);
        let (mut outbound, mut rx) = outbound_channel(64);
        tokio::spawn(feed(tx, 0..6));

        let coordinator = StreamCoordinator::new(2).with_order(DeliveryOrder::Ordered);
        let summary = coordinator
            .run(&mut inbound, &mut outbound, |n: u64| async move {
                if n % 3 == 0 {
                    Err(GatewayError::not_found(format!("item {n}")))
                } else {
                    Ok(n)
                }
            })
            .await
            .unwrap();

        assert_eq!(summary.failed, 2);
        assert_eq!(summary.sent, 6);
        let items = drain(&mut rx);
        assert!(items[0].is_status());
        assert_eq!(items[1], StreamItem::Response(1));
        match &items[3] {
            StreamItem::Status(status) => assert_eq!(status.code, ErrorCode::NotFound),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_abort_policy() {
        let (tx, mut inbound) = inbound_channel(8);
        let (mut outbound, _rx) = outbound_channel(64);
        tokio::spawn(feed(tx, 0..4));

        let coordinator = StreamCoordinator::new(1).with_failure_policy(FailurePolicy::Abort);
        let err = coordinator
            .run(&mut inbound, &mut outbound, |n: u64| async move {
                if n == 2 {
                    Err(GatewayError::not_found("missing"))
                } else {
                    Ok(n)
                }
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn test_inbound_error_aborts() {
        let (tx, mut inbound) = inbound_channel::<u64>(8);
        let (mut outbound, _rx) = outbound_channel(64);
        tx.send(Ok(1)).await.unwrap();
        tx.send(Err(GatewayError::internal("connection reset"))).await.unwrap();

        let err = StreamCoordinator::new(4)
            .run(&mut inbound, &mut outbound, |n: u64| async move { Ok(n) })
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::StreamAbort(_)));
    }

    #[tokio::test]
    async fn test_outbound_closed_aborts() {
        let (tx, mut inbound) = inbound_channel(8);
        let (mut outbound, rx) = outbound_channel::<StreamItem<u64>>(1);
        drop(rx);
        tokio::spawn(feed(tx, 0..3));

        let err = StreamCoordinator::new(2)
            .run(&mut inbound, &mut outbound, |n: u64| async move { Ok(n) })
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Aborted);
    }

    #[tokio::test]
    async fn test_empty_stream() {
        let (tx, mut inbound) = inbound_channel::<u64>(1);
        let (mut outbound, _rx) = outbound_channel::<StreamItem<u64>>(1);
        drop(tx);

        let summary = StreamCoordinator::new(2)
            .run(&mut inbound, &mut outbound, |n: u64| async move { Ok(n) })
            .await
            .unwrap();
        assert_eq!(summary, StreamSummary::default());
    }
}
