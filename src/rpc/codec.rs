use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::exception::{Exception, ExceptionRegistry, RpcResult, INTERNAL_ERROR, MINOR_EXCEPTION};
use crate::rpc::envelope::{HandlerRejection, Rejection, RpcError, RpcResponse};

/// 回應與錯誤的編解碼器
///
/// 處理端用來把拒絕原因轉為線路上的錯誤，呼叫端用來依登錄表重建錯誤。
#[derive(Debug, Clone)]
pub struct RpcCodec {
    registry: Arc<ExceptionRegistry>,
}

impl Default for RpcCodec {
    fn default() -> Self {
        Self::new(Arc::new(ExceptionRegistry::standard()))
    }
}

impl RpcCodec {
    pub fn new(registry: Arc<ExceptionRegistry>) -> Self {
        Self { registry }
    }

    /// 建立回應信封
    pub fn create_response(&self, is_success: bool, payload: Value, from: &str, to: &str) -> RpcResponse {
        RpcResponse {
            is_success,
            from: from.to_string(),
            to: to.to_string(),
            payload,
            error: None,
        }
    }

    /// 將拒絕轉為線路上的錯誤
    ///
    /// 非預期的拒絕一律只送出 `{type: "InternalError"}`，不洩漏任何細節。
    pub fn create_error(&self, rejection: &HandlerRejection) -> RpcError {
        if !rejection.is_intended {
            return RpcError::new(INTERNAL_ERROR);
        }

        match &rejection.reason {
            Rejection::Exception(exception) => exception_to_wire(exception),
            Rejection::Message(message) => RpcError {
                kind: MINOR_EXCEPTION.to_string(),
                message: Some(message.clone()),
                details: None,
            },
            Rejection::Data(data) => RpcError {
                kind: MINOR_EXCEPTION.to_string(),
                message: None,
                details: Some(data.clone()),
            },
            Rejection::Error(error) => match error.downcast_ref::<Exception>() {
                Some(exception) => exception_to_wire(exception),
                None => RpcError {
                    kind: MINOR_EXCEPTION.to_string(),
                    message: Some(error.to_string()),
                    details: None,
                },
            },
        }
    }

    /// 依登錄表重建錯誤，字串形式的 `details` 會先嘗試解析為 JSON
    pub fn rebuild_error(&self, error: &RpcError) -> Exception {
        let Some(kind) = self.registry.lookup(&error.kind) else {
            return Exception::critical(format!("Unknown exception type \"{}\"", error.kind))
                .with_details(serde_json::to_value(error).unwrap_or(Value::Null));
        };

        let details = error.details.clone().map(|details| match details {
            Value::String(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
            other => other,
        });
        kind.build(error.message.clone(), details)
    }

    /// 從失敗回應的 `payload` 重建錯誤
    pub fn parse_error(&self, payload: &Value) -> Exception {
        match serde_json::from_value::<RpcError>(payload.clone()) {
            Ok(error) => self.rebuild_error(&error),
            Err(_) => Exception::critical("Malformed error response").with_details(payload.clone()),
        }
    }

    /// 呼叫端處理收到的回應
    ///
    /// 成功回應原樣返回；失敗回應重建錯誤後，嚴重或內部錯誤拒絕呼叫，
    /// 其他錯誤以附帶 `error` 的失敗回應返回。
    pub fn resolve_reply(&self, mut response: RpcResponse) -> RpcResult<RpcResponse> {
        if response.is_success {
            return Ok(response);
        }

        let error = self.parse_error(&response.payload);
        debug!("Remote action from {} failed: {}", response.from, error);
        if error.is_fatal() {
            return Err(error);
        }
        response.error = Some(error);
        Ok(response)
    }
}

fn exception_to_wire(exception: &Exception) -> RpcError {
    match exception {
        Exception::InternalError => RpcError::new(INTERNAL_ERROR),
        other => RpcError {
            kind: other.kind().as_str().to_string(),
            message: other.message(),
            details: other.details().cloned(),
        },
    }
}
