mod common;

use assert_matches::assert_matches;
use common::{connected, create_order, echo_action, failing_action, validating_action, ErrorLog};
use serde_json::json;
use service_communication::rpc::{action_fn, RpcHandlerParams};
use service_communication::{
    Exception, InMemoryBroker, MessageBrokerConnector, MessageBrokerRpcCaller,
    MessageBrokerRpcHandler, RpcCaller, RpcCallerOptions, RpcCodec, RpcHandler,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Fixture {
    broker: InMemoryBroker,
    handler: MessageBrokerRpcHandler,
    caller: MessageBrokerRpcCaller,
    handler_errors: ErrorLog,
}

async fn fixture() -> Fixture {
    let broker = InMemoryBroker::new();

    let handler = MessageBrokerRpcHandler::new(
        "orders",
        connected(&broker, "handler").await,
        RpcCodec::default(),
    );
    handler.init().await.unwrap();
    let handler_errors = ErrorLog::default();
    handler.on_error(handler_errors.listener());

    let caller = MessageBrokerRpcCaller::new(
        "gateway",
        connected(&broker, "caller").await,
        RpcCodec::default(),
    );
    caller.init().await.unwrap();

    Fixture {
        broker,
        handler,
        caller,
        handler_errors,
    }
}

#[tokio::test]
async fn test_round_trip() {
    let f = fixture().await;
    f.handler.handle("orders", "create", create_order()).await.unwrap();
    f.handler.start().await.unwrap();

    let response = f
        .caller
        .call(RpcCallerOptions::new("orders", "create", json!({"id": 1})))
        .await
        .unwrap();

    assert!(response.is_success);
    assert_eq!(response.payload, json!({"ok": true}));
    assert_eq!(response.from, "orders");
    assert_eq!(response.to, "gateway");
    assert!(response.error.is_none());

    // 回應主題在呼叫完成後解除訂閱
    assert!(f.caller.connector().subscribed_patterns().is_empty());
    assert_eq!(f.caller.pending_calls(), 0);
}

#[tokio::test]
async fn test_unexpected_failure_is_internal_error() {
    let f = fixture().await;
    f.handler.handle("orders", "create", failing_action()).await.unwrap();
    f.handler.start().await.unwrap();

    let err = f
        .caller
        .call(RpcCallerOptions::new("orders", "create", json!({"id": 1})))
        .await
        .unwrap_err();

    assert_eq!(err, Exception::InternalError);
    assert_eq!(err.message(), None);
    assert_eq!(err.details(), None);

    let logged = f.handler_errors.messages();
    assert_eq!(logged.len(), 1);
    assert!(logged[0].contains("connection pool exhausted"));
}

#[tokio::test]
async fn test_validation_error_is_reconstructed() {
    let f = fixture().await;
    f.handler.handle("orders", "create", validating_action()).await.unwrap();
    f.handler.start().await.unwrap();

    let response = f
        .caller
        .call(RpcCallerOptions::new("orders", "create", json!({"id": -1})))
        .await
        .unwrap();

    assert!(!response.is_success);
    assert_eq!(
        response.payload,
        json!({
            "type": "ValidationError",
            "message": "Invalid order",
            "details": [{"path": ["id"], "message": "must be positive"}],
        })
    );
    assert_eq!(
        response.error,
        Some(Exception::Validation {
            message: "Invalid order".to_string(),
            details: Some(json!([{"path": ["id"], "message": "must be positive"}])),
        })
    );
    assert!(f.handler_errors.messages().is_empty());
}

#[tokio::test]
async fn test_unknown_routing_key_is_requeued() {
    let broker = InMemoryBroker::new();
    let connector = connected(&broker, "handler").await;
    connector.set_queue(Some("orders-requests")).unwrap();
    connector.set_message_expired_in(300).unwrap();

    let handler = MessageBrokerRpcHandler::new("orders", connector.clone(), RpcCodec::default());
    handler.init().await.unwrap();

    let invoked = Arc::new(AtomicUsize::new(0));
    let counter = invoked.clone();
    let action = action_fn(move |params: RpcHandlerParams| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            params.resolve.resolve(json!(null));
            Ok(())
        }
    });
    handler.handle("orders", "create", action).await.unwrap();
    connector.subscribe("request.orders.#").await.unwrap();
    handler.start().await.unwrap();

    let caller = MessageBrokerRpcCaller::new("gateway", connected(&broker, "caller").await, RpcCodec::default());
    caller
        .call_impatient(RpcCallerOptions::new("orders", "delete", json!({"id": 1})))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(invoked.load(Ordering::SeqCst), 0);
    assert!(broker.redelivery_count("orders-requests") >= 1);

    handler.pause().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_calls_get_their_own_response() {
    let f = fixture().await;
    f.handler.handle("math", "echo", echo_action()).await.unwrap();
    f.handler.start().await.unwrap();

    let calls = (0..20).map(|i| {
        f.caller
            .call(RpcCallerOptions::new("math", "echo", json!({"n": i})))
    });
    let responses = futures::future::join_all(calls).await;

    for (i, response) in responses.into_iter().enumerate() {
        let response = response.unwrap();
        assert!(response.is_success);
        assert_eq!(response.payload, json!({"n": i}));
    }
    assert_eq!(f.caller.pending_calls(), 0);
}

#[tokio::test]
async fn test_call_without_handler_times_out() {
    let f = fixture().await;
    f.caller.set_timeout(1000);

    let started = Instant::now();
    let err = f
        .caller
        .call(RpcCallerOptions::new("nobody", "home", json!({})))
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert_matches!(err, Exception::Timeout { waited_ms: 1000 });
    assert_eq!(err.kind(), service_communication::ExceptionKind::Minor);
    assert!(elapsed >= Duration::from_millis(1000));
    assert!(elapsed < Duration::from_millis(2000));
}

#[tokio::test]
async fn test_call_impatient_does_not_wait() {
    let f = fixture().await;
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let action = action_fn(move |params: RpcHandlerParams| {
        let tx = tx.clone();
        async move {
            tx.send(params.rpc_request.clone())?;
            params.resolve.resolve(json!("done"));
            Ok(())
        }
    });
    f.handler.handle("jobs", "rebuild", action).await.unwrap();
    f.handler.start().await.unwrap();

    f.caller
        .call_impatient(RpcCallerOptions::new("jobs", "rebuild", json!({"all": true})))
        .await
        .unwrap();

    let request = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(request.from, "gateway");
    assert_eq!(request.to, "jobs");
    assert_eq!(request.payload, json!({"all": true}));
    assert!(f.caller.connector().subscribed_patterns().is_empty());
}

#[tokio::test]
async fn test_raw_destination() {
    let f = fixture().await;
    f.handler
        .handle_raw("jobs.rebuild", echo_action())
        .await
        .unwrap();
    f.handler.start().await.unwrap();

    let response = f
        .caller
        .call(RpcCallerOptions::raw("jobs.rebuild", json!("now")))
        .await
        .unwrap();
    assert_eq!(response.payload, json!("now"));
}

#[tokio::test]
async fn test_pause_and_resume() {
    let f = fixture().await;
    f.handler.handle("orders", "create", create_order()).await.unwrap();
    f.handler.start().await.unwrap();
    f.caller.set_timeout(1000);

    f.handler.pause().await.unwrap();
    let err = f
        .caller
        .call(RpcCallerOptions::new("orders", "create", json!({"id": 1})))
        .await
        .unwrap_err();
    assert!(err.is_timeout());

    f.handler.resume().await.unwrap();
    let response = f
        .caller
        .call(RpcCallerOptions::new("orders", "create", json!({"id": 1})))
        .await
        .unwrap();
    assert!(response.is_success);
}

#[tokio::test]
async fn test_dispose_keeps_connectors_open() {
    let f = fixture().await;
    f.handler.handle("orders", "create", create_order()).await.unwrap();
    f.handler.start().await.unwrap();

    f.handler.dispose().await.unwrap();
    f.caller.dispose().await.unwrap();

    assert!(f.handler.connector().is_active());
    assert!(f.handler.connector().subscribed_patterns().is_empty());
    assert!(f.caller.connector().is_active());
    assert_eq!(f.broker.queue_depth(&f.handler.connector().queue()), 0);
}
