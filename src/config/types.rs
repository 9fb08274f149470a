use serde::{Deserialize, Serialize};

use crate::config::validation::{ValidationError, ValidationUtils, Validator};
use crate::messaging::message::ConnectionOptions;
use crate::rpc::{DEFAULT_TIMEOUT_MS, MAX_TIMEOUT_MS, MIN_TIMEOUT_MS};

/// 通訊層配置結構
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommunicationConfig {
    pub service: ServiceConfig,
    pub log: LogConfig,
    pub broker: BrokerConfig,
    pub rpc: RpcConfig,
}

impl Validator for CommunicationConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        self.service.validate()?;
        self.log.validate()?;
        self.broker.validate()?;
        self.rpc.validate()?;

        Ok(())
    }
}

/// 服務識別
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// 服務代號，作為請求的 `from` 與連接器名稱
    pub slug: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            slug: "service".to_string(),
        }
    }
}

impl Validator for ServiceConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        ValidationUtils::not_empty(&self.slug, "service.slug")
    }
}

/// 日誌配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Validator for LogConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        ValidationUtils::one_of(&self.level, &["trace", "debug", "info", "warn", "error"], "log.level")?;
        ValidationUtils::one_of(&self.format, &["pretty", "json"], "log.format")?;

        Ok(())
    }
}

/// 訊息代理配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// 代理主機位址，可包含連接埠與 vhost
    pub host: String,
    pub username: String,
    pub password: String,
    /// 主題交換機名稱
    pub exchange: String,
    /// 固定佇列名稱，未設定時使用自動產生的暫時佇列
    pub queue: Option<String>,
    /// 重新連線延遲（毫秒）
    pub reconnect_delay_ms: u64,
    /// 訊息存活時間（毫秒），0 表示不限
    pub message_expired_in_ms: i64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            username: String::new(),
            password: String::new(),
            exchange: "amq.topic".to_string(),
            queue: None,
            reconnect_delay_ms: 3000,
            message_expired_in_ms: 50000,
        }
    }
}

impl Validator for BrokerConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        ValidationUtils::not_empty(&self.host, "broker.host")?;
        ValidationUtils::plain_name(&self.exchange, "broker.exchange")?;
        if let Some(queue) = self.queue.as_deref().filter(|q| !q.trim().is_empty()) {
            ValidationUtils::plain_name(queue, "broker.queue")?;
        }
        ValidationUtils::in_range(self.reconnect_delay_ms, 100, 600_000, "broker.reconnect_delay_ms")?;
        ValidationUtils::check_dependency(
            !self.password.is_empty(),
            !self.username.is_empty(),
            "broker.password",
            "broker.username",
        )?;

        Ok(())
    }
}

impl BrokerConfig {
    /// 轉換為連接器使用的連線選項
    pub fn to_connection_options(&self, name: &str) -> ConnectionOptions {
        ConnectionOptions {
            name: name.to_string(),
            host_address: self.host.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            exchange: self.exchange.clone(),
            reconnect_delay: Some(self.reconnect_delay_ms),
            queue: self.queue.clone().filter(|q| !q.trim().is_empty()),
            message_expired_in: Some(self.message_expired_in_ms),
        }
    }
}

/// RPC 配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// 呼叫端等待回應的毫秒數
    pub caller_timeout_ms: u64,
    /// HTTP 處理端監聽的連接埠，0 表示由系統分配
    pub handler_port: u16,
    /// HTTP 處理端綁定的位址
    pub handler_host: String,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            caller_timeout_ms: DEFAULT_TIMEOUT_MS,
            handler_port: 30000,
            handler_host: "0.0.0.0".to_string(),
        }
    }
}

impl Validator for RpcConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        ValidationUtils::in_range(
            self.caller_timeout_ms,
            MIN_TIMEOUT_MS,
            MAX_TIMEOUT_MS,
            "rpc.caller_timeout_ms",
        )?;
        ValidationUtils::ip_address(&self.handler_host, "rpc.handler_host")?;

        Ok(())
    }
}

impl RpcConfig {
    pub fn caller_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.caller_timeout_ms)
    }
}
