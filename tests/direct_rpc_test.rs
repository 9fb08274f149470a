mod common;

use assert_matches::assert_matches;
use common::{create_order, echo_action, failing_action, validating_action, ErrorLog};
use serde_json::json;
use service_communication::{
    Exception, HttpRpcCaller, HttpRpcHandler, RpcCaller, RpcCallerOptions, RpcCodec, RpcHandler,
};

async fn started_handler() -> (HttpRpcHandler, ErrorLog) {
    let handler = HttpRpcHandler::new("orders", RpcCodec::default()).with_host("127.0.0.1");
    handler.set_port(0).unwrap();
    handler.init().await.unwrap();
    let errors = ErrorLog::default();
    handler.on_error(errors.listener());

    handler.handle("orders", "create", create_order()).await.unwrap();
    handler.handle("orders", "fail", failing_action()).await.unwrap();
    handler.handle("orders", "validate", validating_action()).await.unwrap();
    handler.handle("math", "echo", echo_action()).await.unwrap();
    handler.start().await.unwrap();
    (handler, errors)
}

async fn caller_for(handler: &HttpRpcHandler) -> HttpRpcCaller {
    let caller = HttpRpcCaller::new("gateway", RpcCodec::default());
    let addr = handler.local_addr().await.unwrap();
    caller.set_base_address(addr.to_string());
    caller.init().await.unwrap();
    caller
}

#[tokio::test]
async fn test_round_trip() {
    let (handler, errors) = started_handler().await;
    let caller = caller_for(&handler).await;

    let response = caller
        .call(RpcCallerOptions::new("orders", "create", json!({"id": 1})))
        .await
        .unwrap();

    assert!(response.is_success);
    assert_eq!(response.payload, json!({"ok": true}));
    assert_eq!(response.from, "orders");
    assert_eq!(response.to, "gateway");
    assert!(errors.messages().is_empty());

    handler.dispose().await.unwrap();
}

#[tokio::test]
async fn test_unexpected_failure_is_internal_error() {
    let (handler, errors) = started_handler().await;
    let caller = caller_for(&handler).await;

    let err = caller
        .call(RpcCallerOptions::new("orders", "fail", json!({})))
        .await
        .unwrap_err();

    assert_eq!(err, Exception::InternalError);
    let logged = errors.messages();
    assert_eq!(logged.len(), 1);
    assert!(logged[0].contains("connection pool exhausted"));

    handler.dispose().await.unwrap();
}

#[tokio::test]
async fn test_validation_error_is_reconstructed() {
    let (handler, errors) = started_handler().await;
    let caller = caller_for(&handler).await;

    let response = caller
        .call(RpcCallerOptions::new("orders", "validate", json!({"id": -1})))
        .await
        .unwrap();

    assert!(!response.is_success);
    assert_eq!(response.payload["type"], "ValidationError");
    assert_eq!(
        response.error,
        Some(Exception::Validation {
            message: "Invalid order".to_string(),
            details: Some(json!([{"path": ["id"], "message": "must be positive"}])),
        })
    );
    assert!(errors.messages().is_empty());

    handler.dispose().await.unwrap();
}

#[tokio::test]
async fn test_paused_handler_answers_gone() {
    let (handler, _) = started_handler().await;
    let caller = caller_for(&handler).await;

    handler.pause().await.unwrap();
    assert!(!handler.is_open());
    let err = caller
        .call(RpcCallerOptions::new("orders", "create", json!({"id": 1})))
        .await
        .unwrap_err();
    assert_matches!(err, Exception::Minor { .. });
    assert_eq!(err.details().unwrap()["status"], 410);

    handler.resume().await.unwrap();
    let response = caller
        .call(RpcCallerOptions::new("orders", "create", json!({"id": 1})))
        .await
        .unwrap();
    assert!(response.is_success);

    handler.dispose().await.unwrap();
}

#[tokio::test]
async fn test_unknown_action_is_not_found() {
    let (handler, _) = started_handler().await;
    let caller = caller_for(&handler).await;

    let err = caller
        .call(RpcCallerOptions::new("orders", "delete", json!({})))
        .await
        .unwrap_err();
    assert_matches!(err, Exception::Minor { .. });
    assert_eq!(err.details().unwrap()["status"], 404);

    handler.dispose().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_calls() {
    let (handler, _) = started_handler().await;
    let caller = caller_for(&handler).await;

    let calls = (0..16).map(|i| caller.call(RpcCallerOptions::new("math", "echo", json!([i]))));
    let responses = futures::future::join_all(calls).await;
    for (i, response) in responses.into_iter().enumerate() {
        assert_eq!(response.unwrap().payload, json!([i]));
    }

    handler.dispose().await.unwrap();
}

#[tokio::test]
async fn test_disposed_handler_is_unreachable() {
    let (handler, _) = started_handler().await;
    let caller = caller_for(&handler).await;
    handler.dispose().await.unwrap();
    assert!(handler.local_addr().await.is_none());

    let err = caller
        .call(RpcCallerOptions::new("math", "echo", json!(1)))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), service_communication::ExceptionKind::Minor);
}

#[tokio::test]
async fn test_invalid_registration() {
    let handler = HttpRpcHandler::new("orders", RpcCodec::default());
    assert!(handler.handle("orders", "create", echo_action()).await.is_err());

    handler.init().await.unwrap();
    assert!(handler.init().await.is_err());
    assert!(handler.handle("orders/v2", "create", echo_action()).await.is_err());
    assert!(handler.handle("orders", "", echo_action()).await.is_err());

    let err = handler.set_port(70000).unwrap_err();
    assert_eq!(err.message().as_deref(), Some("INVALID_PORT_DIRECT_RPC_HANDLER"));
}
