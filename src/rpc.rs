// RPC 模組
// 兩種可互換的 RPC 傳輸：直接 HTTP 呼叫，以及經由訊息代理轉送的請求與回應。
// 兩者共用相同的信封格式、錯誤編解碼與處理函數介面。

// 導出子模組
pub mod action;
pub mod codec;
pub mod direct;
pub mod envelope;
pub mod mediate;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::event::ErrorListener;
use crate::exception::{Exception, RpcResult};
use crate::messaging::connector::assert_not_empty;

// 重新導出常用類型
pub use action::{action_fn, RawMessage, Rejecter, Resolver, RpcHandlerFunction, RpcHandlerParams};
pub use codec::RpcCodec;
pub use direct::{HttpRpcCaller, HttpRpcHandler};
pub use envelope::{HandlerRejection, Rejection, RpcError, RpcRequest, RpcResponse};
pub use mediate::{MessageBrokerRpcCaller, MessageBrokerRpcHandler};

/// 預設等待回應的毫秒數
pub const DEFAULT_TIMEOUT_MS: u64 = 30000;
/// 等待時間下限
pub const MIN_TIMEOUT_MS: u64 = 1000;
/// 等待時間上限
pub const MAX_TIMEOUT_MS: u64 = 60000;

/// 將等待時間限制在允許範圍內
pub fn clamp_timeout(millis: u64) -> u64 {
    millis.clamp(MIN_TIMEOUT_MS, MAX_TIMEOUT_MS)
}

/// 呼叫端的等待時間設定，可在呼叫之間調整
#[derive(Debug)]
pub struct CallerTimeout(AtomicU64);

impl CallerTimeout {
    pub fn new(millis: u64) -> Self {
        Self(AtomicU64::new(clamp_timeout(millis)))
    }

    pub fn millis(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.millis())
    }

    pub fn set(&self, millis: u64) {
        self.0.store(clamp_timeout(millis), Ordering::Relaxed);
    }
}

impl Default for CallerTimeout {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT_MS)
    }
}

/// 一次呼叫的目的地與參數
#[derive(Debug, Clone, PartialEq)]
pub struct RpcCallerOptions {
    pub module_name: String,
    pub action_name: String,
    pub params: Value,
    /// 指定時直接作為請求的路由鍵，忽略模組與動作名稱
    pub raw_dest: Option<String>,
}

impl RpcCallerOptions {
    pub fn new(module_name: impl Into<String>, action_name: impl Into<String>, params: Value) -> Self {
        Self {
            module_name: module_name.into(),
            action_name: action_name.into(),
            params,
            raw_dest: None,
        }
    }

    /// 以原始路由鍵呼叫
    pub fn raw(dest: impl Into<String>, params: Value) -> Self {
        Self {
            module_name: String::new(),
            action_name: String::new(),
            params,
            raw_dest: Some(dest.into()),
        }
    }

    /// 檢查目的地，未指定原始路由鍵時模組與動作名稱為必填
    pub fn validate(&self) -> RpcResult<()> {
        match self.raw_dest.as_deref() {
            Some(dest) => assert_not_empty(dest, "rawDest"),
            None => {
                assert_not_empty(&self.module_name, "moduleName")?;
                assert_not_empty(&self.action_name, "actionName")
            }
        }
    }

    /// 請求的路由鍵
    pub fn request_topic(&self) -> String {
        match &self.raw_dest {
            Some(dest) => dest.clone(),
            None => format!("request.{}.{}", self.module_name, self.action_name),
        }
    }

    /// 帶有關聯 ID 的回應路由鍵
    pub fn reply_topic(&self, correlation_id: &str) -> String {
        match &self.raw_dest {
            Some(dest) => format!("response.{}@{}", dest, correlation_id),
            None => format!(
                "response.{}.{}@{}",
                self.module_name, self.action_name, correlation_id
            ),
        }
    }
}

/// RPC 呼叫端
#[async_trait]
pub trait RpcCaller: Send + Sync {
    /// 請求中 `from` 使用的名稱
    fn name(&self) -> &str;

    /// 目前的等待時間
    fn timeout(&self) -> Duration;

    /// 設定等待時間，超出 1000..=60000 毫秒時取最近的邊界
    fn set_timeout(&self, millis: u64);

    async fn init(&self) -> RpcResult<()>;

    /// 呼叫遠端動作並等待回應
    async fn call(&self, options: RpcCallerOptions) -> RpcResult<RpcResponse>;

    /// 釋放資源，不會斷開共用的連接器
    async fn dispose(&self) -> RpcResult<()>;

    fn on_error(&self, listener: ErrorListener);
}

/// RPC 處理端
#[async_trait]
pub trait RpcHandler: Send + Sync {
    /// 回應中 `from` 使用的名稱
    fn name(&self) -> &str;

    async fn init(&self) -> RpcResult<()>;

    /// 註冊模組動作的處理函數
    async fn handle(&self, module: &str, action: &str, handler: RpcHandlerFunction) -> RpcResult<()>;

    /// 開始接收請求
    async fn start(&self) -> RpcResult<()>;

    /// 暫停接收新請求
    async fn pause(&self) -> RpcResult<()>;

    /// 恢復接收請求
    async fn resume(&self) -> RpcResult<()>;

    /// 停止處理請求並釋放資源
    async fn dispose(&self) -> RpcResult<()>;

    fn on_error(&self, listener: ErrorListener);
}

/// 呼叫端在發送前失敗時的錯誤
pub(crate) fn call_failed(err: Exception) -> Exception {
    match err {
        Exception::Minor { .. } | Exception::Validation { .. } | Exception::Timeout { .. } => err,
        other => Exception::minor(format!("RPC error: {}", other)).with_details(Value::String(
            other.message().unwrap_or_default(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_timeout_is_clamped() {
        let timeout = CallerTimeout::default();
        assert_eq!(timeout.millis(), 30000);

        timeout.set(10);
        assert_eq!(timeout.millis(), 1000);
        timeout.set(120_000);
        assert_eq!(timeout.millis(), 60000);
        timeout.set(5000);
        assert_eq!(timeout.duration(), Duration::from_millis(5000));
    }

    #[test]
    fn test_topics() {
        let options = RpcCallerOptions::new("orders", "create", json!({"id": 1}));
        assert!(options.validate().is_ok());
        assert_eq!(options.request_topic(), "request.orders.create");
        assert_eq!(options.reply_topic("abc"), "response.orders.create@abc");

        let options = RpcCallerOptions::raw("jobs.rebuild", Value::Null);
        assert_eq!(options.request_topic(), "jobs.rebuild");
        assert_eq!(options.reply_topic("abc"), "response.jobs.rebuild@abc");
    }

    #[test]
    fn test_missing_destination() {
        let options = RpcCallerOptions::new("", "create", Value::Null);
        assert!(matches!(options.validate(), Err(Exception::Minor { .. })));

        let options = RpcCallerOptions::new("orders", " ", Value::Null);
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_call_failed_keeps_minor_errors() {
        let minor = Exception::minor("bad");
        assert_eq!(call_failed(minor.clone()), minor);

        let wrapped = call_failed(Exception::critical("socket closed"));
        assert_eq!(wrapped.kind(), crate::exception::ExceptionKind::Minor);
        assert_eq!(
            wrapped.message().as_deref(),
            Some("RPC error: Critical exception: socket closed")
        );
    }
}
