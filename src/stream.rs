//! Bidirectional streaming endpoints.
//!
//! A transport hands the gateway an [`InboundStream`] of requests and an
//! [`OutboundStream`] for responses; [`StreamCoordinator`] drives the pair.
//! Channel-backed implementations are provided for in-process use and tests.

pub mod coordinator;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{GatewayError, Result};

pub use coordinator::{DeliveryOrder, FailurePolicy, StreamCoordinator, StreamState, StreamSummary};

/// Source of client messages.
#[async_trait]
pub trait InboundStream<T: Send>: Send {
    /// Next message, or `None` once the client closed its side.
    ///
    /// Must be cancel-safe: the coordinator may drop a pending `recv` to
    /// service a completed dispatch first.
    async fn recv(&mut self) -> Result<Option<T>>;
}

/// Sink for server messages.
#[async_trait]
pub trait OutboundStream<T: Send>: Send {
    async fn send(&mut self, item: T) -> Result<()>;
}

/// Inbound stream fed through a tokio channel. Sending an `Err` simulates a
/// transport failure.
#[derive(Debug)]
pub struct ChannelInbound<T> {
    rx: mpsc::Receiver<Result<T>>,
}

#[async_trait]
impl<T: Send> InboundStream<T> for ChannelInbound<T> {
    async fn recv(&mut self) -> Result<Option<T>> {
        self.rx.recv().await.transpose()
    }
}

/// Outbound stream writing into a tokio channel.
#[derive(Debug)]
pub struct ChannelOutbound<T> {
    tx: mpsc::Sender<T>,
}

#[async_trait]
impl<T: Send> OutboundStream<T> for ChannelOutbound<T> {
    async fn send(&mut self, item: T) -> Result<()> {
        self.tx
            .send(item)
            .await
            .map_err(|_| GatewayError::stream_abort("client closed the response stream"))
    }
}

/// Create a bounded inbound stream and the sender that feeds it.
pub fn inbound_channel<T>(capacity: usize) -> (mpsc::Sender<Result<T>>, ChannelInbound<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (tx, ChannelInbound { rx })
}

/// Create a bounded outbound stream and the receiver that reads it.
pub fn outbound_channel<T>(capacity: usize) -> (ChannelOutbound<T>, mpsc::Receiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ChannelOutbound { tx }, rx)
}
