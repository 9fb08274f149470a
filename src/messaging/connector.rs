use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::event::{ErrorListener, ListenerId};
use crate::exception::{Exception, RpcResult};
use crate::messaging::message::{generate_id, ConnectionOptions, MessageHandleFunction, PublishOptions};

/// 自動產生的佇列名稱前綴
pub const AUTO_GEN_QUEUE_PREFIX: &str = "auto-gen";

/// 訊息代理連接器
///
/// 一個連接器擁有一條代理連線，以及一個發布通道和一個消費通道。
/// 連接器可由多個呼叫端與處理端共用。
#[async_trait]
pub trait MessageBrokerConnector: Send + Sync {
    /// 連接器名稱
    fn name(&self) -> &str;

    /// 目前綁定的佇列名稱
    fn queue(&self) -> String;

    /// 設定佇列名稱，空值會產生隨機名稱；佇列綁定後不可變更
    fn set_queue(&self, name: Option<&str>) -> RpcResult<()>;

    /// 訊息存活毫秒數，0 表示不限
    fn message_expired_in(&self) -> u64;

    /// 設定訊息存活毫秒數，負值視為 0；佇列綁定後不可變更
    fn set_message_expired_in(&self, millis: i64) -> RpcResult<()>;

    /// 已訂閱的主題樣式
    fn subscribed_patterns(&self) -> Vec<String>;

    /// 連線中或已連線時為 `true`
    fn is_active(&self) -> bool;

    /// 是否正在消費訊息
    fn is_listening(&self) -> bool;

    /// 建立與代理的連線
    async fn connect(&self) -> RpcResult<()>;

    /// 關閉所有通道與連線
    async fn disconnect(&self) -> RpcResult<()>;

    /// 刪除佇列，必須先停止消費
    async fn delete_queue(&self) -> RpcResult<()>;

    /// 清空佇列，返回被刪除的訊息數量
    async fn empty_queue(&self) -> RpcResult<u32>;

    /// 開始接收訊息；`no_ack` 為 `true` 時訊息自動確認
    async fn listen(&self, on_message: MessageHandleFunction, no_ack: bool) -> RpcResult<()>;

    /// 停止接收訊息
    async fn stop_listen(&self) -> RpcResult<()>;

    /// 以 `topic` 為路由鍵發布訊息
    async fn publish(&self, topic: &str, payload: Value, options: PublishOptions) -> RpcResult<()>;

    /// 以主題樣式綁定佇列，例如 "request.*" 或 "response.#"
    async fn subscribe(&self, pattern: &str) -> RpcResult<()>;

    /// 解除主題樣式的綁定
    async fn unsubscribe(&self, pattern: &str) -> RpcResult<()>;

    /// 同時解除所有已訂閱的主題樣式
    async fn unsubscribe_all(&self) -> RpcResult<()> {
        let patterns = self.subscribed_patterns();
        futures::future::try_join_all(patterns.iter().map(|pattern| self.unsubscribe(pattern)))
            .await?;
        Ok(())
    }

    /// 註冊帶外錯誤監聽器
    fn on_error(&self, listener: ErrorListener) -> ListenerId;

    /// 移除先前註冊的錯誤監聽器
    fn off_error(&self, id: ListenerId) -> bool;
}

/// 依連線選項建立連接器
pub type ConnectorFactory =
    Arc<dyn Fn(ConnectionOptions) -> Arc<dyn MessageBrokerConnector> + Send + Sync>;

/// 佇列設定，首次綁定後即鎖定
#[derive(Debug, Clone)]
pub struct QueueSettings {
    queue: String,
    message_expired_in: u64,
    bound: bool,
}

impl QueueSettings {
    pub fn new(queue: Option<&str>, message_expired_in: Option<i64>) -> Self {
        Self {
            queue: queue_name_or_generate(queue),
            message_expired_in: message_expired_in.map(clamp_expiration).unwrap_or(0),
            bound: false,
        }
    }

    pub fn from_options(options: &ConnectionOptions) -> Self {
        Self::new(options.queue.as_deref(), options.message_expired_in)
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn set_queue(&mut self, name: Option<&str>) -> RpcResult<()> {
        if self.bound {
            return Err(Exception::minor("Cannot change queue after binding!"));
        }
        self.queue = queue_name_or_generate(name);
        Ok(())
    }

    pub fn message_expired_in(&self) -> u64 {
        self.message_expired_in
    }

    pub fn set_message_expired_in(&mut self, millis: i64) -> RpcResult<()> {
        if self.bound {
            return Err(Exception::minor(
                "Cannot change message expiration after queue has been bound!",
            ));
        }
        self.message_expired_in = clamp_expiration(millis);
        Ok(())
    }

    /// 自動產生的佇列為暫時佇列，連線關閉時刪除
    pub fn is_temporary(&self) -> bool {
        self.queue.starts_with(AUTO_GEN_QUEUE_PREFIX)
    }

    pub fn mark_bound(&mut self) {
        self.bound = true;
    }
}

fn queue_name_or_generate(name: Option<&str>) -> String {
    match name {
        Some(name) if !name.trim().is_empty() => name.to_string(),
        _ => format!("{}-{}", AUTO_GEN_QUEUE_PREFIX, generate_id()),
    }
}

fn clamp_expiration(millis: i64) -> u64 {
    if millis >= 0 {
        millis as u64
    } else {
        0
    }
}

/// 已綁定主題樣式的有序集合
#[derive(Debug, Clone, Default)]
pub struct SubscriptionSet {
    patterns: Vec<String>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 加入樣式，已存在時不重複加入
    pub fn add(&mut self, pattern: &str) -> bool {
        if self.contains(pattern) {
            return false;
        }
        self.patterns.push(pattern.to_string());
        true
    }

    pub fn remove(&mut self, pattern: &str) -> bool {
        match self.patterns.iter().position(|p| p == pattern) {
            Some(pos) => {
                self.patterns.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, pattern: &str) -> bool {
        self.patterns.iter().any(|p| p == pattern)
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.patterns.clone()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// 檢查主題或樣式參數不為空
pub(crate) fn assert_not_empty(value: &str, field: &str) -> RpcResult<()> {
    if value.trim().is_empty() {
        return Err(Exception::minor(format!("Argument \"{}\" must not be empty", field)));
    }
    Ok(())
}

/// 尚未連線或已斷線
pub(crate) fn not_connected() -> Exception {
    Exception::critical("Connection to message broker is not established or has been disconnected!")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_queue_name_is_generated() {
        let settings = QueueSettings::new(None, None);
        assert!(settings.queue().starts_with("auto-gen-"));
        assert!(settings.is_temporary());

        let settings = QueueSettings::new(Some("  "), None);
        assert!(settings.is_temporary());

        let settings = QueueSettings::new(Some("orders"), Some(5000));
        assert_eq!(settings.queue(), "orders");
        assert_eq!(settings.message_expired_in(), 5000);
        assert!(!settings.is_temporary());
    }

    #[test]
    fn test_negative_expiration_means_unlimited() {
        let mut settings = QueueSettings::new(None, Some(-1));
        assert_eq!(settings.message_expired_in(), 0);
        settings.set_message_expired_in(-100).unwrap();
        assert_eq!(settings.message_expired_in(), 0);
    }

    #[test]
    fn test_settings_locked_after_binding() {
        let mut settings = QueueSettings::new(Some("orders"), Some(1000));
        settings.set_queue(Some("payments")).unwrap();
        settings.set_message_expired_in(2000).unwrap();
        settings.mark_bound();

        assert!(settings.set_queue(Some("other")).is_err());
        assert!(settings.set_message_expired_in(3000).is_err());
        assert_eq!(settings.queue(), "payments");
        assert_eq!(settings.message_expired_in(), 2000);
    }

    #[test]
    fn test_subscription_set_has_no_duplicates() {
        let mut set = SubscriptionSet::new();
        assert!(set.add("request.orders.*"));
        assert!(!set.add("request.orders.*"));
        assert!(set.add("request.users.*"));
        assert_eq!(set.snapshot(), vec!["request.orders.*", "request.users.*"]);

        assert!(set.remove("request.orders.*"));
        assert!(!set.remove("request.orders.*"));
        assert_eq!(set.len(), 1);
    }
}
