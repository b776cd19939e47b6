//! Gateway fleet integration tests
//!
//! End-to-end tests against an in-process mock gateway: connect handshake,
//! send routing, resume after close, zombie detection, transport
//! compression, and the worker-isolated strategy.
//!
//! Run with: cargo test -p integration-tests --test gateway_tests

use std::sync::Arc;
use std::time::Duration;

use gateway_client::{
    DestroyOptions, ShardEvent, SimpleShardingStrategy, StaticGatewayProvider, ShardStatus,
    WebSocketManager, WorkerShardingStrategy,
};
use gateway_protocol::{CompressionMethod, GatewayMessage};
use integration_tests::{
    next_matching_event, test_config, test_information, wait_until, MockGateway,
    MockGatewayOptions,
};
use serde_json::json;

const WAIT: Duration = Duration::from_secs(10);

fn manager_for(mock: &MockGateway, shard_count: u32) -> WebSocketManager {
    let provider = Arc::new(StaticGatewayProvider::new(test_information(
        &mock.url(),
        shard_count,
    )));
    WebSocketManager::with_parts(
        test_config(shard_count),
        provider,
        Box::new(SimpleShardingStrategy::new()),
    )
}

// ============================================================================
// Connect Handshake
// ============================================================================

#[tokio::test]
async fn test_fleet_connects_and_identifies_each_shard() {
    let mock = MockGateway::start(MockGatewayOptions::default())
        .await
        .unwrap();
    let mut manager = manager_for(&mock, 2);
    let mut events = manager.take_event_stream().unwrap();

    manager.connect().await.unwrap();

    let statuses = manager.fetch_status().await.unwrap();
    assert_eq!(statuses.len(), 2);
    assert!(statuses.values().all(|s| *s == ShardStatus::Ready));

    // Each shard identified with its own [id, count] pair and the token
    let identifies = mock.identifies();
    assert_eq!(identifies.len(), 2);
    let mut shards: Vec<_> = identifies.iter().map(|(_, d)| d["shard"].clone()).collect();
    shards.sort_by_key(|s| s[0].as_u64());
    assert_eq!(shards, vec![json!([0, 2]), json!([1, 2])]);
    assert!(identifies.iter().all(|(_, d)| d["token"] == "test-token"));

    // Ready events surfaced for both shards
    for shard_id in [0u32, 1] {
        let ready = next_matching_event(&mut events, WAIT, |(id, event)| {
            *id == shard_id && matches!(event, ShardEvent::Ready { .. })
        })
        .await;
        assert!(ready.is_some(), "no ready event for shard {shard_id}");
    }

    // Session info is populated and distinct per shard
    let sessions = manager.fetch_session_info().await.unwrap();
    let ids: Vec<_> = sessions
        .values()
        .map(|info| info.as_ref().unwrap().session_id.clone())
        .collect();
    assert_eq!(ids.len(), 2);
    assert_ne!(ids[0], ids[1]);

    manager.destroy(DestroyOptions::default()).await.unwrap();
}

// ============================================================================
// Send Routing
// ============================================================================

#[tokio::test]
async fn test_send_routes_to_the_right_shard() {
    let mock = MockGateway::start(MockGatewayOptions::default())
        .await
        .unwrap();
    let mut manager = manager_for(&mock, 2);

    manager.connect().await.unwrap();
    manager
        .send(1, GatewayMessage::heartbeat(Some(4242)))
        .await
        .unwrap();

    assert!(
        wait_until(WAIT, || {
            mock.received()
                .iter()
                .any(|(_, value)| value["op"] == 1 && value["d"] == 4242)
        })
        .await
    );

    // Only the connection that identified as shard 1 saw the payload
    let shard1_conn = mock.connection_for_shard(1).unwrap();
    let receivers: Vec<u64> = mock
        .received()
        .iter()
        .filter(|(_, value)| value["op"] == 1 && value["d"] == 4242)
        .map(|(conn, _)| *conn)
        .collect();
    assert_eq!(receivers, vec![shard1_conn]);

    manager.destroy(DestroyOptions::default()).await.unwrap();
}

// ============================================================================
// Resume
// ============================================================================

#[tokio::test]
async fn test_resume_carries_the_last_seen_sequence() {
    let mock = MockGateway::start(MockGatewayOptions::default())
        .await
        .unwrap();
    let mut manager = manager_for(&mock, 1);
    let mut events = manager.take_event_stream().unwrap();

    manager.connect().await.unwrap();

    // READY was s=1; these land as s=2 and s=3
    mock.dispatch("MESSAGE_CREATE", json!({"id": "1"}));
    mock.dispatch("MESSAGE_CREATE", json!({"id": "2"}));

    let last = next_matching_event(&mut events, WAIT, |(_, event)| {
        matches!(event, ShardEvent::Dispatch { seq: Some(3), .. })
    })
    .await;
    assert!(last.is_some(), "client never saw the third sequence");

    // Resumable close: the client must come back with the exact sequence
    mock.close_all(4000);
    assert!(wait_until(WAIT, || mock.resumes().len() == 1).await);

    let (_, resume) = mock.resumes().pop().unwrap();
    assert_eq!(resume["seq"], 3);
    assert_eq!(resume["session_id"], "session-1");
    assert_eq!(resume["token"], "test-token");
    assert_eq!(mock.connection_count(), 2);

    // Resumed event and a ready status again
    let resumed = next_matching_event(&mut events, WAIT, |(_, event)| {
        matches!(event, ShardEvent::Resumed)
    })
    .await;
    assert!(resumed.is_some());

    let mut ready_again = false;
    for _ in 0..100 {
        let statuses = manager.fetch_status().await.unwrap();
        if statuses.values().all(|s| *s == ShardStatus::Ready) {
            ready_again = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(ready_again);

    manager.destroy(DestroyOptions::default()).await.unwrap();
}

#[tokio::test]
async fn test_server_requested_reconnect_resumes() {
    let mock = MockGateway::start(MockGatewayOptions::default())
        .await
        .unwrap();
    let mut manager = manager_for(&mock, 1);

    manager.connect().await.unwrap();

    mock.send_reconnect();
    assert!(wait_until(WAIT, || mock.resumes().len() == 1).await);
    assert_eq!(mock.connection_count(), 2);

    manager.destroy(DestroyOptions::default()).await.unwrap();
}

// ============================================================================
// Zombie Detection
// ============================================================================

#[tokio::test]
async fn test_zombied_connection_is_replaced() {
    let mock = MockGateway::start(MockGatewayOptions {
        heartbeat_interval_ms: 200,
        ack_heartbeats: false,
        ..MockGatewayOptions::default()
    })
    .await
    .unwrap();
    let mut manager = manager_for(&mock, 1);

    manager.connect().await.unwrap();

    // No acks: the second tick declares the socket zombied and the session
    // reconnects with a resume
    assert!(
        wait_until(WAIT, || {
            mock.connection_count() >= 2 && !mock.resumes().is_empty()
        })
        .await
    );

    manager.destroy(DestroyOptions::default()).await.unwrap();
}

// ============================================================================
// Transport Compression
// ============================================================================

#[tokio::test]
async fn test_chunked_compressed_stream_delivers_dispatches() {
    let mock = MockGateway::start(MockGatewayOptions {
        compression: true,
        chunk_size: Some(3),
        ..MockGatewayOptions::default()
    })
    .await
    .unwrap();

    let provider = Arc::new(StaticGatewayProvider::new(test_information(&mock.url(), 1)));
    let mut config = test_config(1);
    config.compression = Some(CompressionMethod::ZlibStream);
    let mut manager = WebSocketManager::with_parts(
        config,
        provider,
        Box::new(SimpleShardingStrategy::new()),
    );
    let mut events = manager.take_event_stream().unwrap();

    // The whole handshake already flows through 3-byte compressed chunks
    manager.connect().await.unwrap();

    mock.dispatch("MESSAGE_CREATE", json!({"content": "hello world"}));

    let dispatch = next_matching_event(&mut events, WAIT, |(_, event)| {
        matches!(event, ShardEvent::Dispatch { name, .. } if name == "MESSAGE_CREATE")
    })
    .await;

    match dispatch {
        Some((_, ShardEvent::Dispatch { data, .. })) => {
            assert_eq!(data["content"], "hello world");
        }
        other => panic!("expected dispatch, got {other:?}"),
    }

    manager.destroy(DestroyOptions::default()).await.unwrap();
}

// ============================================================================
// Worker Strategy
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_worker_strategy_runs_the_same_handshake() {
    let mock = MockGateway::start(MockGatewayOptions::default())
        .await
        .unwrap();

    let provider = Arc::new(StaticGatewayProvider::new(test_information(&mock.url(), 1)));
    let mut manager = WebSocketManager::with_parts(
        test_config(1),
        provider,
        Box::new(WorkerShardingStrategy::new()),
    );
    let mut events = manager.take_event_stream().unwrap();

    manager.connect().await.unwrap();

    let statuses = manager.fetch_status().await.unwrap();
    assert_eq!(statuses.get(&0), Some(&ShardStatus::Ready));

    let ready = next_matching_event(&mut events, WAIT, |(id, event)| {
        *id == 0 && matches!(event, ShardEvent::Ready { .. })
    })
    .await;
    assert!(ready.is_some());

    manager
        .send(0, GatewayMessage::heartbeat(Some(777)))
        .await
        .unwrap();
    assert!(
        wait_until(WAIT, || {
            mock.received()
                .iter()
                .any(|(_, value)| value["op"] == 1 && value["d"] == 777)
        })
        .await
    );

    let sessions = manager.fetch_session_info().await.unwrap();
    assert!(sessions.get(&0).map(Option::is_some).unwrap_or(false));

    manager.destroy(DestroyOptions::default()).await.unwrap();
    assert!(manager.fetch_status().await.unwrap().is_empty());
}
