use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::exception::{Exception, RpcResult};

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_TEXT: &str = "text/plain";

/// 預設重新連線延遲（毫秒）
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 3000;

/// 發布訊息時附帶的屬性，接收時亦以相同結構呈現
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishOptions {
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
}

impl PublishOptions {
    pub fn correlated(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: Some(correlation_id.into()),
            ..Self::default()
        }
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }
}

/// 接收到的訊息屬性
pub type MessageProperties = PublishOptions;

/// 代理投遞的原始資訊
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawDelivery {
    pub exchange: String,
    pub routing_key: String,
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub body: Vec<u8>,
}

/// 訊息確認介面
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> RpcResult<()>;
    async fn nack(&self, requeue: bool) -> RpcResult<()>;
}

/// 從代理收到的訊息
#[derive(Clone)]
pub struct BrokerMessage {
    /// 依 `contentType` 解析後的內容，純文字為 `Value::String`
    pub data: Value,
    pub raw: RawDelivery,
    pub properties: MessageProperties,
    acker: Option<Arc<dyn Acknowledger>>,
}

impl BrokerMessage {
    pub fn new(data: Value, raw: RawDelivery, properties: MessageProperties) -> Self {
        Self {
            data,
            raw,
            properties,
            acker: None,
        }
    }

    /// 設定確認處理器；自動確認模式下不設定
    pub fn with_acker(mut self, acker: Arc<dyn Acknowledger>) -> Self {
        self.acker = Some(acker);
        self
    }

    pub fn routing_key(&self) -> &str {
        &self.raw.routing_key
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.properties.correlation_id.as_deref()
    }

    pub fn reply_to(&self) -> Option<&str> {
        self.properties.reply_to.as_deref()
    }

    /// 確認訊息，自動確認模式下為空操作
    pub async fn ack(&self) -> RpcResult<()> {
        match &self.acker {
            Some(acker) => acker.ack().await,
            None => Ok(()),
        }
    }

    /// 拒絕訊息並重新排入佇列，自動確認模式下為空操作
    pub async fn nack(&self) -> RpcResult<()> {
        match &self.acker {
            Some(acker) => acker.nack(true).await,
            None => Ok(()),
        }
    }

    /// 拒絕訊息且不重新排入佇列
    pub async fn reject(&self) -> RpcResult<()> {
        match &self.acker {
            Some(acker) => acker.nack(false).await,
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for BrokerMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerMessage")
            .field("data", &self.data)
            .field("routing_key", &self.raw.routing_key)
            .field("properties", &self.properties)
            .field("manual_ack", &self.acker.is_some())
            .finish()
    }
}

/// 訊息處理函數，每個投遞等待處理完成後才處理下一個
pub type MessageHandleFunction =
    Arc<dyn Fn(BrokerMessage) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// 將非同步閉包包裝為 `MessageHandleFunction`
pub fn message_handler<F, Fut>(f: F) -> MessageHandleFunction
where
    F: Fn(BrokerMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |msg| Box::pin(f(msg)))
}

/// 序列化發布內容：字串以純文字發送，其他一律為 JSON
pub fn encode_payload(
    payload: &Value,
    mut options: PublishOptions,
) -> RpcResult<(Vec<u8>, PublishOptions)> {
    let body = match payload {
        Value::String(text) => {
            options.content_type = Some(CONTENT_TYPE_TEXT.to_string());
            text.as_bytes().to_vec()
        }
        other => {
            options.content_type = Some(CONTENT_TYPE_JSON.to_string());
            serde_json::to_vec(other)?
        }
    };
    Ok((body, options))
}

/// 依 `contentType` 解析訊息內容
pub fn decode_payload(body: &[u8], properties: &MessageProperties) -> RpcResult<Value> {
    match properties.content_type.as_deref() {
        Some(CONTENT_TYPE_JSON) => Ok(serde_json::from_slice(body)?),
        _ => Ok(Value::String(String::from_utf8_lossy(body).into_owned())),
    }
}

/// 產生簡短的隨機識別碼
pub fn generate_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(12);
    id
}

/// 訊息代理連線選項
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionOptions {
    /// 連接器名稱，用於管理與日誌
    pub name: String,
    /// 代理主機位址，可包含連接埠與 vhost
    pub host_address: String,
    pub username: String,
    pub password: String,
    /// 主題交換機名稱
    pub exchange: String,
    /// 連線中斷後重新連線前等待的毫秒數
    pub reconnect_delay: Option<u64>,
    /// 綁定的佇列名稱，未指定時自動產生暫時佇列
    pub queue: Option<String>,
    /// 訊息在佇列中的存活毫秒數
    pub message_expired_in: Option<i64>,
}

impl ConnectionOptions {
    pub fn new(
        name: impl Into<String>,
        host_address: impl Into<String>,
        exchange: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            host_address: host_address.into(),
            exchange: exchange.into(),
            ..Self::default()
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn with_message_expired_in(mut self, millis: i64) -> Self {
        self.message_expired_in = Some(millis);
        self
    }

    pub fn with_reconnect_delay(mut self, millis: u64) -> Self {
        self.reconnect_delay = Some(millis);
        self
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay.unwrap_or(DEFAULT_RECONNECT_DELAY_MS))
    }

    /// 建立 AMQP URI，帳密嵌入於 URI 中
    pub fn uri(&self) -> String {
        let credentials = if self.username.is_empty() && self.password.is_empty() {
            String::new()
        } else {
            format!("{}:{}@", self.username, self.password)
        };
        format!("amqp://{}{}", credentials, self.host_address)
    }

    /// 檢查必要欄位
    pub fn validate(&self) -> RpcResult<()> {
        if self.host_address.trim().is_empty() {
            return Err(Exception::critical("Message broker host address must be set!"));
        }
        if self.exchange.trim().is_empty() {
            return Err(Exception::critical("Message broker exchange must be set!"));
        }
        Ok(())
    }
}
