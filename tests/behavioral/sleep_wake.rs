// ABOUTME: Behavioral tests for idle sleep and on-demand wake
//
// A tenant with an idle timeout drops its connection after that long without
// requests; the next request reconnects it before being forwarded.

use std::time::Duration;

use serde_json::json;
use tenantgate::gateway::{ConnectionState, GatewayError, OperationRequest};

use crate::fixtures::{fast_settings, tenant, token, ScriptedFactory, TestPool};

fn list_request() -> OperationRequest {
    OperationRequest::parse("entity_list", json!({"limit": 5})).unwrap()
}

#[tokio::test]
async fn test_idle_connection_sleeps_then_wakes_on_request() {
    let config = tenant("a").with_idle_timeout(Duration::from_millis(60));
    let pool = TestPool::new(fast_settings(), ScriptedFactory::new(), vec![config]);
    pool.manager.reconcile_once().await.unwrap();

    pool.wait_state("a", ConnectionState::Asleep).await;

    let client = pool.factory.client("a").unwrap();
    assert!(!client.is_live());
    assert_eq!(client.starts(), 1);

    let outcome = pool
        .manager
        .invoke("a", &token("a"), list_request())
        .await
        .unwrap();
    assert_eq!(outcome.payload, Some(json!({"ok": true})));
    assert_eq!(pool.worker("a").await.state(), ConnectionState::Awake);
    assert_eq!(client.starts(), 2);
    assert_eq!(client.submitted().len(), 1);

    let snap = pool.manager.metrics().snapshot();
    assert!(snap.sleeps >= 1);
    assert_eq!(snap.wakes, 1);

    pool.manager.stop().await;
}

#[tokio::test]
async fn test_failed_wake_stays_asleep_and_retries_next_request() {
    let config = tenant("a").with_idle_timeout(Duration::from_millis(40));
    let pool = TestPool::new(fast_settings(), ScriptedFactory::new(), vec![config]);
    pool.manager.reconcile_once().await.unwrap();
    pool.wait_state("a", ConnectionState::Asleep).await;

    let client = pool.factory.client("a").unwrap();
    client.fail_next_starts(1);

    let err = pool
        .manager
        .invoke("a", &token("a"), list_request())
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::ConnectionFailed { .. }));
    assert_eq!(pool.worker("a").await.state(), ConnectionState::Asleep);
    assert!(client.submitted().is_empty());

    // A single wake attempt per request, then the next request tries again
    pool.manager
        .invoke("a", &token("a"), list_request())
        .await
        .unwrap();
    assert_eq!(client.starts(), 3);
    assert_eq!(client.submitted().len(), 1);

    pool.manager.stop().await;
}

#[tokio::test]
async fn test_requests_keep_connection_awake() {
    let config = tenant("a").with_idle_timeout(Duration::from_millis(150));
    let pool = TestPool::new(fast_settings(), ScriptedFactory::new(), vec![config]);
    pool.manager.reconcile_once().await.unwrap();
    pool.wait_state("a", ConnectionState::Awake).await;

    for _ in 0..6 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        pool.manager
            .invoke("a", &token("a"), list_request())
            .await
            .unwrap();
    }

    let client = pool.factory.client("a").unwrap();
    assert_eq!(client.starts(), 1);
    assert_eq!(pool.manager.metrics().snapshot().sleeps, 0);

    pool.manager.stop().await;
}

#[tokio::test]
async fn test_without_idle_timeout_never_sleeps() {
    let pool = TestPool::new(fast_settings(), ScriptedFactory::new(), vec![tenant("a")]);
    pool.manager.reconcile_once().await.unwrap();
    pool.wait_state("a", ConnectionState::Awake).await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(pool.worker("a").await.state(), ConnectionState::Awake);
    assert_eq!(pool.manager.metrics().snapshot().sleeps, 0);

    pool.manager.stop().await;
}

#[tokio::test]
async fn test_stop_while_asleep_settles_stopped() {
    let config = tenant("a").with_idle_timeout(Duration::from_millis(30));
    let pool = TestPool::new(fast_settings(), ScriptedFactory::new(), vec![config]);
    pool.manager.reconcile_once().await.unwrap();
    pool.wait_state("a", ConnectionState::Asleep).await;

    let worker = pool.worker("a").await;
    pool.manager.stop().await;
    assert_eq!(worker.state(), ConnectionState::Stopped);

    let err = worker.submit(list_request()).await.unwrap_err();
    assert!(matches!(err, GatewayError::ConnectionFailed { .. }));
}
