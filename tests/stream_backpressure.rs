use std::sync::Arc;
use std::time::Duration;

use shardgate::gateway::AgentFault;
use shardgate::prelude::*;
use shardgate::stream::{inbound_channel, outbound_channel};
use shardgate::types::{StreamItem, WriteConfig};

fn cluster(config: GatewayConfig) -> LoadBalancer<MemoryGateway> {
    let gateway = MemoryGateway::new(3);
    gateway.seed_replicated(
        (0..100).map(|i| ObjectVector::new(format!("id-{i:03}"), vec![i as f32, 1.0])),
    );
    LoadBalancer::new(Arc::new(gateway), config.with_replica(3)).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_stream_search_respects_concurrency_limit() {
    let lb = cluster(GatewayConfig::default().with_stream_concurrency(4));
    for name in lb.gateway().agent_names() {
        lb.gateway().set_fault(&name, AgentFault::delay(Duration::from_millis(20)));
    }

    let (tx, mut inbound) = inbound_channel(128);
    let (mut outbound, mut rx) = outbound_channel(128);
    for i in 0..60 {
        let request = SearchRequest {
            vector: vec![i as f32, 1.0],
            config: SearchConfig::new(3),
        };
        tx.send(Ok(request)).await.unwrap();
    }
    drop(tx);

    let summary = lb
        .stream_search(&lb.context(), &mut inbound, &mut outbound)
        .await
        .unwrap();
    assert_eq!(summary.received, 60);
    assert_eq!(summary.sent, 60);
    assert_eq!(summary.failed, 0);
    assert!(summary.peak_in_flight <= 4, "peak {}", summary.peak_in_flight);
    assert!(summary.peak_in_flight > 1);
    // one call per agent per in-flight search
    assert!(lb.gateway().peak_in_flight() <= 4 * 3);

    drop(outbound);
    let mut responses = 0;
    while let Some(item) = rx.recv().await {
        assert!(matches!(item, StreamItem::Response(ref r) if r.results.len() == 3));
        responses += 1;
    }
    assert_eq!(responses, 60);
}

#[tokio::test]
async fn test_stream_search_reports_bad_items_and_continues() {
    let lb = cluster(GatewayConfig::default());
    let (tx, mut inbound) = inbound_channel(8);
    let (mut outbound, mut rx) = outbound_channel(8);

    tx.send(Ok(SearchRequest {
        vector: vec![3.0, 1.0],
        config: SearchConfig::new(2),
    }))
    .await
    .unwrap();
    tx.send(Ok(SearchRequest {
        vector: vec![1.0],
        config: SearchConfig::new(2),
    }))
    .await
    .unwrap();
    drop(tx);

    let summary = lb
        .stream_search(&lb.context(), &mut inbound, &mut outbound)
        .await
        .unwrap();
    assert_eq!(summary.received, 2);
    assert_eq!(summary.failed, 1);
    drop(outbound);

    let mut statuses = Vec::new();
    while let Some(item) = rx.recv().await {
        if let StreamItem::Status(status) = item {
            statuses.push(status.code);
        }
    }
    assert_eq!(statuses, vec![ErrorCode::InvalidArgument]);
}

#[tokio::test]
async fn test_stream_insert_then_stream_remove() {
    let lb = cluster(GatewayConfig::default());
    let ctx = lb.context();

    let (tx, mut inbound) = inbound_channel(8);
    let (mut outbound, mut rx) = outbound_channel(8);
    for i in 0..3 {
        let request = WriteRequest {
            object: ObjectVector::new(format!("new-{i}"), vec![500.0 + i as f32, 0.0]),
            config: WriteConfig::default(),
        };
        tx.send(Ok(request)).await.unwrap();
    }
    drop(tx);
    let summary = lb.stream_insert(&ctx, &mut inbound, &mut outbound).await.unwrap();
    assert_eq!(summary.sent, 3);
    assert_eq!(summary.failed, 0);
    drop(outbound);
    while let Some(item) = rx.recv().await {
        assert!(matches!(item, StreamItem::Response(_)));
    }

    let (tx, mut inbound) = inbound_channel(8);
    let (mut outbound, mut rx) = outbound_channel(8);
    for i in 0..3 {
        tx.send(Ok(RemoveRequest::new(format!("new-{i}")))).await.unwrap();
    }
    drop(tx);
    lb.stream_remove(&ctx, &mut inbound, &mut outbound).await.unwrap();
    drop(outbound);
    let mut removed = 0;
    while let Some(item) = rx.recv().await {
        assert!(matches!(item, StreamItem::Response(_)));
        removed += 1;
    }
    assert_eq!(removed, 3);
    assert_eq!(
        lb.exists(&ctx, "new-0").await.unwrap_err().code(),
        ErrorCode::NotFound
    );
}
