#![allow(dead_code)]

use serde_json::json;
use service_communication::messaging::InMemoryConnector;
use service_communication::rpc::{action_fn, RpcHandlerFunction, RpcHandlerParams};
use service_communication::{ConnectionOptions, Exception, InMemoryBroker, MessageBrokerConnector};
use std::sync::{Arc, Mutex};

pub const EXCHANGE: &str = "svc-test";

/// Connects a fresh connector to the shared in-memory broker
pub async fn connected(broker: &InMemoryBroker, name: &str) -> Arc<InMemoryConnector> {
    let connector = Arc::new(broker.connector(ConnectionOptions::new(name, "memory", EXCHANGE)));
    connector
        .connect()
        .await
        .expect("in-memory connector must connect");
    connector
}

/// Scenario A: `orders.create` resolves `{ok: true}`
pub fn create_order() -> RpcHandlerFunction {
    action_fn(|params: RpcHandlerParams| async move {
        assert_eq!(params.payload, json!({"id": 1}));
        params.resolve.resolve(json!({"ok": true}));
        Ok(())
    })
}

/// Scenario B: the action fails with an unexpected error
pub fn failing_action() -> RpcHandlerFunction {
    action_fn(|_| async { Err(anyhow::anyhow!("connection pool exhausted")) })
}

/// Scenario C: the action rejects with a validation error
pub fn validating_action() -> RpcHandlerFunction {
    action_fn(|params: RpcHandlerParams| async move {
        params.reject.reject(
            Exception::validation("Invalid order")
                .with_details(json!([{"path": ["id"], "message": "must be positive"}])),
        );
        Ok(())
    })
}

/// Echoes the payload back
pub fn echo_action() -> RpcHandlerFunction {
    action_fn(|params: RpcHandlerParams| async move {
        params.resolve.resolve(params.payload.clone());
        Ok(())
    })
}

/// Records every error emitted on a channel
#[derive(Clone, Default)]
pub struct ErrorLog {
    errors: Arc<Mutex<Vec<String>>>,
}

impl ErrorLog {
    pub fn listener(&self) -> service_communication::ErrorListener {
        let errors = self.errors.clone();
        Arc::new(move |err: Arc<anyhow::Error>| {
            errors.lock().unwrap().push(err.to_string());
        })
    }

    pub fn messages(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}
