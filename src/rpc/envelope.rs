use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::exception::Exception;

/// 呼叫端送出的請求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub payload: Value,
}

impl RpcRequest {
    pub fn new(from: impl Into<String>, to: impl Into<String>, payload: Value) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            payload,
        }
    }
}

/// 處理端返回的回應
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcResponse {
    pub is_success: bool,
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub payload: Value,
    /// 失敗回應在呼叫端重建後的錯誤，不會出現在線路上
    #[serde(skip)]
    pub error: Option<Exception>,
}

impl RpcResponse {
    pub fn success(from: impl Into<String>, to: impl Into<String>, payload: Value) -> Self {
        Self {
            is_success: true,
            from: from.into(),
            to: to.into(),
            payload,
            error: None,
        }
    }

    pub fn failure(from: impl Into<String>, to: impl Into<String>, error: &RpcError) -> Self {
        Self {
            is_success: false,
            from: from.into(),
            to: to.into(),
            payload: serde_json::to_value(error).unwrap_or(Value::Null),
            error: None,
        }
    }
}

/// 線路上的錯誤格式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl RpcError {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: None,
            details: None,
        }
    }
}

/// 動作拒絕的原因
#[derive(Debug, Clone)]
pub enum Rejection {
    Exception(Exception),
    Message(String),
    Data(Value),
    Error(Arc<anyhow::Error>),
}

impl Rejection {
    /// 轉為可送往錯誤通道的錯誤
    pub fn to_error(&self) -> Arc<anyhow::Error> {
        match self {
            Rejection::Exception(e) => Arc::new(anyhow::Error::new(e.clone())),
            Rejection::Message(m) => Arc::new(anyhow::anyhow!("{}", m)),
            Rejection::Data(v) => Arc::new(anyhow::anyhow!("Action rejected with {}", v)),
            Rejection::Error(e) => e.clone(),
        }
    }
}

impl From<Exception> for Rejection {
    fn from(e: Exception) -> Self {
        Rejection::Exception(e)
    }
}

impl From<String> for Rejection {
    fn from(m: String) -> Self {
        Rejection::Message(m)
    }
}

impl From<&str> for Rejection {
    fn from(m: &str) -> Self {
        Rejection::Message(m.to_string())
    }
}

impl From<Value> for Rejection {
    fn from(v: Value) -> Self {
        match v {
            Value::String(m) => Rejection::Message(m),
            other => Rejection::Data(other),
        }
    }
}

impl From<anyhow::Error> for Rejection {
    fn from(e: anyhow::Error) -> Self {
        match e.downcast::<Exception>() {
            Ok(exception) => Rejection::Exception(exception),
            Err(e) => Rejection::Error(Arc::new(e)),
        }
    }
}

/// 處理端的拒絕，明確標示是否為預期中的錯誤
#[derive(Debug, Clone)]
pub struct HandlerRejection {
    pub is_intended: bool,
    pub reason: Rejection,
}

impl HandlerRejection {
    pub fn intended(reason: impl Into<Rejection>) -> Self {
        Self {
            is_intended: true,
            reason: reason.into(),
        }
    }

    pub fn unintended(reason: impl Into<Rejection>) -> Self {
        Self {
            is_intended: false,
            reason: reason.into(),
        }
    }
}
