use std::sync::Arc;
use tracing::info;

use crate::config::BrokerConfig;
use crate::exception::RpcResult;
use crate::messaging::connector::{ConnectorFactory, MessageBrokerConnector};

/// 以配置建立並管理共用連接器的生命週期
pub struct MessageBrokerAddOn {
    name: String,
    connector: Arc<dyn MessageBrokerConnector>,
}

impl MessageBrokerAddOn {
    pub fn new(factory: ConnectorFactory, config: &BrokerConfig, name: &str) -> Self {
        let connector = factory(config.to_connection_options(name));
        Self {
            name: name.to_string(),
            connector,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 共用的連接器，呼叫端與處理端皆透過它收發訊息
    pub fn connector(&self) -> Arc<dyn MessageBrokerConnector> {
        self.connector.clone()
    }

    pub async fn init(&self) -> RpcResult<()> {
        self.connector.connect().await?;
        info!("Message broker add-on {} initialized", self.name);
        Ok(())
    }

    /// 停止接收新訊息，連線保持開啟以送出剩餘的回應
    pub async fn dead_letter(&self) -> RpcResult<()> {
        self.connector.stop_listen().await
    }

    pub async fn dispose(&self) -> RpcResult<()> {
        self.connector.disconnect().await?;
        info!("Message broker add-on {} disposed", self.name);
        Ok(())
    }
}
