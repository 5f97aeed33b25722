use std::sync::Arc;
use std::time::Duration;

use shardgate::gateway::AgentFault;
use shardgate::prelude::*;

fn objects(count: usize) -> impl Iterator<Item = ObjectVector> {
    (0..count).map(|i| ObjectVector::new(format!("id-{i:03}"), vec![i as f32, 0.0]))
}

fn query(num: u32) -> SearchRequest {
    SearchRequest {
        vector: vec![0.0, 0.0],
        config: SearchConfig::new(num),
    }
}

fn replicated_cluster(agents: usize, config: GatewayConfig) -> LoadBalancer<MemoryGateway> {
    let gateway = MemoryGateway::new(agents);
    gateway.seed_replicated(objects(50));
    LoadBalancer::new(Arc::new(gateway), config.with_replica(agents)).unwrap()
}

#[tokio::test]
async fn test_two_of_three_failing_meets_half_quorum() {
    let lb = replicated_cluster(3, GatewayConfig::default().with_success_ratio(0.5));
    lb.gateway().set_fault("agent-0", AgentFault::error(ErrorCode::Unavailable));
    lb.gateway().set_fault("agent-2", AgentFault::error(ErrorCode::Internal));

    let response = lb.search(&lb.context(), query(10)).await.unwrap();
    assert_eq!(response.results.len(), 10);
    assert_eq!(response.responded, 1);
    assert_eq!(response.failed, 2);
    assert_eq!(response.results[0].id, "id-000");
}

#[tokio::test]
async fn test_all_failing_is_quorum_failure_for_any_ratio() {
    for ratio in [0.1f32, 0.5, 0.9, 1.0] {
        let lb = replicated_cluster(3, GatewayConfig::default().with_success_ratio(ratio));
        for name in lb.gateway().agent_names() {
            lb.gateway().set_fault(&name, AgentFault::error(ErrorCode::Unavailable));
        }
        let err = lb.search(&lb.context(), query(10)).await.unwrap_err();
        assert!(
            matches!(err, GatewayError::QuorumFailure { succeeded: 0, targets: 3, .. }),
            "ratio {ratio}: {err:?}"
        );
    }
}

#[tokio::test]
async fn test_full_ratio_requires_every_agent() {
    let lb = replicated_cluster(3, GatewayConfig::default());
    lb.gateway().set_fault("agent-1", AgentFault::error(ErrorCode::Unavailable));
    let err = lb.search(&lb.context(), query(5)).await.unwrap_err();
    assert!(matches!(err, GatewayError::QuorumFailure { succeeded: 2, required: 3, .. }));
}

#[tokio::test(start_paused = true)]
async fn test_slow_agent_is_abandoned_at_deadline() {
    let lb = replicated_cluster(
        3,
        GatewayConfig::default()
            .with_success_ratio(0.5)
            .with_timeout(Duration::from_millis(100)),
    );
    lb.gateway().set_fault("agent-2", AgentFault::hang());

    let response = lb.search(&lb.context(), query(5)).await.unwrap();
    assert_eq!(response.results.len(), 5);
    assert_eq!(response.responded, 2);
    assert_eq!(response.timed_out, 1);
}

#[tokio::test]
async fn test_cancelled_caller_gets_cancelled() {
    let lb = replicated_cluster(3, GatewayConfig::default());
    let ctx = lb.context();
    ctx.cancel();
    let err = lb.search(&ctx, query(5)).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Cancelled);
}

#[tokio::test]
async fn test_dedup_follows_deployment() {
    let seed = |gateway: &MemoryGateway| {
        for name in gateway.agent_names() {
            gateway.seed_agent(
                &name,
                [
                    ObjectVector::new("1", vec![0.1, 0.0]),
                    ObjectVector::new("2", vec![0.3, 0.0]),
                ],
            );
        }
    };

    let sharded = MemoryGateway::new(3);
    seed(&sharded);
    let lb = LoadBalancer::new(
        Arc::new(sharded),
        GatewayConfig::default().with_deployment(Deployment::Sharded),
    )
    .unwrap();
    let response = lb.search(&lb.context(), query(3)).await.unwrap();
    let ids: Vec<_> = response.results.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["1", "1", "1"]);

    let replicated = MemoryGateway::new(3);
    seed(&replicated);
    let lb = LoadBalancer::new(
        Arc::new(replicated),
        GatewayConfig::default()
            .with_deployment(Deployment::Replicated)
            .with_replica(3),
    )
    .unwrap();
    let response = lb.search(&lb.context(), query(3)).await.unwrap();
    let ids: Vec<_> = response.results.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["1", "2"]);
}

#[tokio::test]
async fn test_write_then_search_round_trip() {
    let gateway = MemoryGateway::new(3).with_write_replica(2);
    let lb = LoadBalancer::new(
        Arc::new(gateway),
        GatewayConfig::default().with_replica(2),
    )
    .unwrap();
    let ctx = lb.context();

    let location = lb
        .insert(&ctx, WriteRequest::new(ObjectVector::new("fresh", vec![5.0, 5.0])))
        .await
        .unwrap();
    assert_eq!(location.name.split(',').count(), 2);

    let mut request = query(1);
    request.vector = vec![5.0, 5.0];
    let response = lb.search(&ctx, request).await.unwrap();
    assert_eq!(response.results[0].id, "fresh");

    lb.remove(&ctx, RemoveRequest::new("fresh")).await.unwrap();
    let err = lb.get_object(&ctx, "fresh").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
}
