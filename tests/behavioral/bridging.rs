// ABOUTME: Behavioral tests for bridging requests to completions
//
// Covers outcome mapping, the request deadline, uniform auth failures and
// argument validation before anything reaches the agent client.

use std::time::Duration;

use chrono::Utc;
use pretty_assertions::assert_eq;
use serde_json::json;
use tenantgate::gateway::codec::TEXT_MIME;
use tenantgate::gateway::{
    Completion, CompletionEvent, CompletionEventKind, ConnectionState, EventHook, EventKind,
    GatewayError, Operation, OperationRequest, OutcomeKind, RawSample,
};

use crate::fixtures::{fast_settings, tenant, token, Reply, ScriptedFactory, TestPool};

async fn awake_pool(factory: ScriptedFactory) -> TestPool {
    let mut settings = fast_settings();
    settings.request_timeout = Duration::from_millis(150);
    let pool = TestPool::new(settings, factory, vec![tenant("a").with_retention(3)]);
    pool.manager.reconcile_once().await.unwrap();
    pool.wait_state("a", ConnectionState::Awake).await;
    pool
}

// ==================== Outcome Tests ====================

#[tokio::test]
async fn test_crud_event_overrides_payload() {
    let completion = Completion::ok(Some(json!({"ignored": true})))
        .crud()
        .with_event(CompletionEvent::new(
            CompletionEventKind::Renamed,
            json!({"lid": "new-name"}),
        ));
    let pool = awake_pool(ScriptedFactory::replying(Reply::Complete(completion))).await;

    let request = OperationRequest::parse(
        "entity_rename",
        json!({"lid": "old-name", "new_lid": "new-name"}),
    )
    .unwrap();
    let outcome = pool.manager.invoke("a", &token("a"), request).await.unwrap();

    assert_eq!(outcome.kind, OutcomeKind::Renamed);
    assert_eq!(outcome.payload, Some(json!({"lid": "new-name"})));
    pool.manager.stop().await;
}

#[tokio::test]
async fn test_recent_data_samples_decoded() {
    let time = Utc::now();
    let ubjson = vec![b'{', b'i', 1, b't', b'i', 21, b'}'];
    let completion = Completion::ok(None).with_event(CompletionEvent::recent_data(vec![
        RawSample {
            data: ubjson,
            mime: Some("idx/1".to_string()),
            time,
        },
        RawSample {
            data: b"hello".to_vec(),
            mime: Some(TEXT_MIME.to_string()),
            time,
        },
    ]));
    let pool = awake_pool(ScriptedFactory::replying(Reply::Complete(completion))).await;

    let request = OperationRequest::parse(
        "point_value_list",
        json!({"lid": "e", "pid": "p", "foc": "feed"}),
    )
    .unwrap();
    let outcome = pool.manager.invoke("a", &token("a"), request).await.unwrap();

    assert_eq!(outcome.kind, OutcomeKind::Samples);
    let samples = outcome.payload.unwrap()["samples"].clone();
    assert_eq!(samples[0]["data"], json!({"t": 21}));
    assert_eq!(samples[1]["data"], json!("hello"));
    assert_eq!(samples[1]["time"], json!(time.to_rfc3339()));
    pool.manager.stop().await;
}

#[tokio::test]
async fn test_remote_failure_surfaces_message() {
    let pool = awake_pool(ScriptedFactory::replying(Reply::Complete(Completion::failed(
        "entity not found",
    ))))
    .await;

    let request = OperationRequest::parse("entity_delete", json!({"lid": "gone"})).unwrap();
    let err = pool.manager.invoke("a", &token("a"), request).await.unwrap_err();
    match err {
        GatewayError::RemoteOperationFailed(message) => assert_eq!(message, "entity not found"),
        other => panic!("unexpected error: {other}"),
    }
    pool.manager.stop().await;
}

// ==================== Deadline Tests ====================

#[tokio::test]
async fn test_request_times_out_at_deadline() {
    let pool = awake_pool(ScriptedFactory::replying(Reply::Hang)).await;

    let started = tokio::time::Instant::now();
    let request = OperationRequest::parse("entity_list", json!({})).unwrap();
    let err = pool.manager.invoke("a", &token("a"), request).await.unwrap_err();

    assert!(matches!(
        err,
        GatewayError::RequestTimeout {
            operation: "entity_list",
            ..
        }
    ));
    assert!(started.elapsed() >= Duration::from_millis(150));
    assert!(started.elapsed() < Duration::from_secs(2));

    let snap = pool.manager.metrics().snapshot();
    assert_eq!(snap.total_timeouts, 1);
    assert_eq!(snap.total_errors, 1);

    // The tenant stays usable after a timeout
    pool.factory
        .client("a")
        .unwrap()
        .set_reply(Reply::Complete(Completion::ok(None)));
    let request = OperationRequest::parse("entity_list", json!({})).unwrap();
    assert!(pool.manager.invoke("a", &token("a"), request).await.is_ok());
    pool.manager.stop().await;
}

// ==================== Auth Tests ====================

#[tokio::test]
async fn test_unknown_tenant_and_bad_token_look_the_same() {
    let pool = awake_pool(ScriptedFactory::new()).await;
    let request = || OperationRequest::parse("entity_list", json!({})).unwrap();

    let unknown = pool.manager.invoke("nobody", &token("a"), request()).await.unwrap_err();
    let bad_token = pool.manager.invoke("a", "wrong", request()).await.unwrap_err();

    assert!(matches!(unknown, GatewayError::Unauthorized));
    assert!(matches!(bad_token, GatewayError::Unauthorized));
    assert_eq!(unknown.to_string(), bad_token.to_string());
    assert_eq!(unknown.status_hint(), bad_token.status_hint());

    assert!(matches!(
        pool.manager.drain_feed_data("a", "wrong").await,
        Err(GatewayError::Unauthorized)
    ));
    assert!(pool.factory.client("a").unwrap().submitted().is_empty());
    pool.manager.stop().await;
}

#[tokio::test]
async fn test_explicit_auth_tokens_replace_connection_token() {
    let config = tenant("a").with_auth_tokens(["gw-1", "gw-2"]);
    let pool = TestPool::new(fast_settings(), ScriptedFactory::new(), vec![config]);
    pool.manager.reconcile_once().await.unwrap();

    assert!(pool.manager.resolve("a", "gw-1").await.is_ok());
    assert!(pool.manager.resolve("a", "gw-2").await.is_ok());
    assert!(pool.manager.resolve("a", &token("a")).await.is_err());
    pool.manager.stop().await;
}

// ==================== Validation Tests ====================

#[tokio::test]
async fn test_malformed_requests_never_reach_client() {
    let pool = awake_pool(ScriptedFactory::new()).await;

    let cases = [
        ("entity_create", json!({})),
        ("entity_create", json!({"lid": "x", "bogus": 1})),
        ("entity_list", json!({"limit": "ten"})),
        ("point_create", json!({"lid": "e", "pid": "p", "foc": "sideways"})),
        ("search", json!({"limit": 5})),
        ("no_such_operation", json!({})),
        ("entity_list", json!([1, 2])),
    ];
    for (name, args) in cases {
        let err = OperationRequest::parse(name, args.clone()).unwrap_err();
        assert!(
            matches!(err, GatewayError::MalformedRequest(_)),
            "{name} {args} gave {err}"
        );
        assert_eq!(err.status_hint(), 400);
    }

    assert!(pool.factory.client("a").unwrap().submitted().is_empty());
    pool.manager.stop().await;
}

#[tokio::test]
async fn test_tag_delete_forwarded_as_tag_create() {
    let pool = awake_pool(ScriptedFactory::new()).await;

    let request = OperationRequest::parse(
        "point_tag_delete",
        json!({"foc": "control", "lid": "e", "pid": "p", "tags": ["hot"]}),
    )
    .unwrap();
    pool.manager.invoke("a", &token("a"), request).await.unwrap();

    let forwarded = pool.factory.client("a").unwrap().submitted();
    assert_eq!(forwarded.len(), 1);
    assert_eq!(forwarded[0].operation(), Operation::PointTagCreate);
    assert_eq!(forwarded[0].arg("delete"), Some(&json!(true)));
    assert_eq!(forwarded[0].arg("tags"), Some(&json!(["hot"])));
    pool.manager.stop().await;
}

// ==================== Event Queue Tests ====================

#[tokio::test]
async fn test_unsolicited_events_buffered_with_eviction() {
    let pool = awake_pool(ScriptedFactory::new()).await;
    let client = pool.factory.client("a").unwrap();

    for n in 0..5 {
        client.emit(EventHook::FeedData, json!({"n": n}));
    }
    client.emit(EventHook::ControlRequest, json!({"ask": 1}));
    client.emit(EventHook::Reassigned, json!({"lid": "e"}));
    client.emit(EventHook::Subscription, json!({"sub": "s"}));

    let feed = pool.manager.drain_feed_data("a", &token("a")).await.unwrap();
    let ns: Vec<i64> = feed.iter().map(|e| e.payload["n"].as_i64().unwrap()).collect();
    assert_eq!(ns, vec![2, 3, 4]);
    assert!(feed.iter().all(|e| e.kind == EventKind::FeedData));

    let control = pool.manager.drain_control_requests("a", &token("a")).await.unwrap();
    assert_eq!(control.len(), 1);

    let unsolicited = pool.manager.drain_unsolicited("a", &token("a")).await.unwrap();
    let kinds: Vec<EventKind> = unsolicited.iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![EventKind::Reassigned, EventKind::Subscription]);

    // Draining empties the queue
    assert!(pool.manager.drain_feed_data("a", &token("a")).await.unwrap().is_empty());
    pool.manager.stop().await;
}
