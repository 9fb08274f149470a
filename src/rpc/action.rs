// action.rs - 應用程式動作的呼叫
//
// 動作以 resolve/reject 回報結果；同步 panic、返回的錯誤與未回報結果都會被轉為拒絕。

use axum::http::{HeaderMap, Method, Uri};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;

use crate::exception::Exception;
use crate::messaging::message::BrokerMessage;
use crate::rpc::envelope::{HandlerRejection, Rejection, RpcRequest};

/// 動作處理函數
pub type RpcHandlerFunction =
    Arc<dyn Fn(RpcHandlerParams) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// 將非同步閉包包裝為 `RpcHandlerFunction`
pub fn action_fn<F, Fut>(f: F) -> RpcHandlerFunction
where
    F: Fn(RpcHandlerParams) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |params| Box::pin(f(params)))
}

/// 請求的原始來源
#[derive(Debug, Clone)]
pub enum RawMessage {
    Http {
        method: Method,
        uri: Uri,
        headers: HeaderMap,
    },
    Broker(BrokerMessage),
}

type Settlement = Result<Value, HandlerRejection>;

/// 只接受第一次回報的結果槽
struct SettleSlot {
    sender: Mutex<Option<oneshot::Sender<Settlement>>>,
}

impl SettleSlot {
    fn settle(&self, outcome: Settlement) -> bool {
        match self.sender.lock().take() {
            Some(sender) => sender.send(outcome).is_ok(),
            None => false,
        }
    }

    fn is_settled(&self) -> bool {
        self.sender.lock().is_none()
    }
}

/// 以成功結果回應
#[derive(Clone)]
pub struct Resolver {
    slot: Arc<SettleSlot>,
}

impl Resolver {
    /// 回報成功，已回報過時返回 `false`
    pub fn resolve(&self, value: impl Into<Value>) -> bool {
        self.slot.settle(Ok(value.into()))
    }
}

/// 以預期中的錯誤回應
#[derive(Clone)]
pub struct Rejecter {
    slot: Arc<SettleSlot>,
}

impl Rejecter {
    /// 回報預期中的失敗，已回報過時返回 `false`
    pub fn reject(&self, reason: impl Into<Rejection>) -> bool {
        self.slot.settle(Err(HandlerRejection::intended(reason)))
    }
}

/// 傳給動作的參數
pub struct RpcHandlerParams {
    pub payload: Value,
    pub resolve: Resolver,
    pub reject: Rejecter,
    pub rpc_request: RpcRequest,
    pub raw_message: RawMessage,
}

/// 執行動作並等待第一個回報的結果
pub async fn invoke_action(
    action: &RpcHandlerFunction,
    request: RpcRequest,
    raw_message: RawMessage,
) -> Settlement {
    let (sender, receiver) = oneshot::channel();
    let slot = Arc::new(SettleSlot {
        sender: Mutex::new(Some(sender)),
    });

    let params = RpcHandlerParams {
        payload: request.payload.clone(),
        resolve: Resolver { slot: slot.clone() },
        reject: Rejecter { slot: slot.clone() },
        rpc_request: request,
        raw_message,
    };

    let action = action.clone();
    let outcome = AssertUnwindSafe(async move { action(params).await })
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            // 驗證錯誤視為預期中的拒絕
            let is_validation = matches!(
                err.downcast_ref::<Exception>(),
                Some(Exception::Validation { .. })
            );
            let rejection = if is_validation {
                HandlerRejection::intended(err)
            } else {
                HandlerRejection::unintended(err)
            };
            if !slot.settle(Err(rejection)) {
                debug!("Action returned an error after it had already settled");
            }
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            slot.settle(Err(HandlerRejection::unintended(anyhow::anyhow!(
                "Action panicked: {}",
                message
            ))));
        }
    }

    if !slot.is_settled() {
        debug!("Action finished without settling, waiting for outstanding resolvers");
    }
    drop(slot);

    // 所有 resolver 都被丟棄仍未回報時視為非預期錯誤
    receiver.await.unwrap_or_else(|_| {
        Err(HandlerRejection::unintended(Exception::critical(
            "Action completed without resolving or rejecting",
        )))
    })
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn request(payload: Value) -> RpcRequest {
        RpcRequest::new("caller", "orders", payload)
    }

    fn raw() -> RawMessage {
        RawMessage::Http {
            method: Method::POST,
            uri: Uri::from_static("/orders/create"),
            headers: HeaderMap::new(),
        }
    }

    #[tokio::test]
    async fn test_resolve() {
        let action = action_fn(|params: RpcHandlerParams| async move {
            params.resolve.resolve(json!({"echo": params.payload}));
            Ok(())
        });
        let result = invoke_action(&action, request(json!(1)), raw()).await;
        assert_eq!(result.unwrap(), json!({"echo": 1}));
    }

    #[tokio::test]
    async fn test_first_settle_wins() {
        let action = action_fn(|params: RpcHandlerParams| async move {
            assert!(params.reject.reject("first"));
            assert!(!params.resolve.resolve(json!(1)));
            Err(anyhow::anyhow!("ignored"))
        });
        let rejection = invoke_action(&action, request(Value::Null), raw())
            .await
            .unwrap_err();
        assert!(rejection.is_intended);
        assert_matches!(rejection.reason, Rejection::Message(m) if m == "first");
    }

    #[tokio::test]
    async fn test_returned_error_is_unintended() {
        let action = action_fn(|_| async { Err(anyhow::anyhow!("db down")) });
        let rejection = invoke_action(&action, request(Value::Null), raw())
            .await
            .unwrap_err();
        assert!(!rejection.is_intended);
    }

    #[tokio::test]
    async fn test_returned_validation_error_is_intended() {
        let action = action_fn(|_| async { Err(Exception::validation("bad id").into()) });
        let rejection = invoke_action(&action, request(Value::Null), raw())
            .await
            .unwrap_err();
        assert!(rejection.is_intended);
        assert_matches!(rejection.reason, Rejection::Exception(Exception::Validation { .. }));
    }

    #[tokio::test]
    async fn test_panic_is_unintended() {
        let action: RpcHandlerFunction =
            Arc::new(|_: RpcHandlerParams| -> BoxFuture<'static, anyhow::Result<()>> {
                panic!("boom")
            });
        let rejection = invoke_action(&action, request(Value::Null), raw())
            .await
            .unwrap_err();
        assert!(!rejection.is_intended);
        assert!(rejection.reason.to_error().to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_unsettled_action_is_unintended() {
        let action = action_fn(|_| async { Ok(()) });
        let rejection = invoke_action(&action, request(Value::Null), raw())
            .await
            .unwrap_err();
        assert!(!rejection.is_intended);
    }

    #[tokio::test]
    async fn test_resolve_from_spawned_task() {
        let action = action_fn(|params: RpcHandlerParams| async move {
            let resolve = params.resolve.clone();
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                resolve.resolve("later");
            });
            Ok(())
        });
        let result = invoke_action(&action, request(Value::Null), raw()).await;
        assert_eq!(result.unwrap(), json!("later"));
    }
}
