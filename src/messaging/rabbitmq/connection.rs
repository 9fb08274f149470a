use lapin::{Connection, ConnectionProperties};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::exception::{Exception, RpcResult};
use crate::messaging::connector::not_connected;
use crate::messaging::message::ConnectionOptions;

/// 代理連線的持有者
///
/// 每次建立新連線都會遞增 `epoch`，舊連線發出的事件可藉此辨識並忽略。
pub struct ConnectionLink {
    uri: String,
    reconnect_delay: Duration,
    current: RwLock<Option<Arc<Connection>>>,
    connected: AtomicBool,
    connecting: AtomicBool,
    epoch: AtomicU64,
}

impl ConnectionLink {
    pub fn new(options: &ConnectionOptions) -> Self {
        Self {
            uri: options.uri(),
            reconnect_delay: options.reconnect_delay(),
            current: RwLock::new(None),
            connected: AtomicBool::new(false),
            connecting: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn reconnect_delay(&self) -> Duration {
        self.reconnect_delay
    }

    /// 連線中或已連線
    pub fn is_active(&self) -> bool {
        self.connected.load(Ordering::SeqCst) || self.connecting.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn is_connecting(&self) -> bool {
        self.connecting.load(Ordering::SeqCst)
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub fn begin_connecting(&self) {
        self.connecting.store(true, Ordering::SeqCst);
    }

    pub fn abort_connecting(&self) {
        self.connecting.store(false, Ordering::SeqCst);
    }

    /// 開啟新的 AMQP 連線
    pub async fn open(&self) -> RpcResult<Connection> {
        debug!("Opening message broker connection");
        let properties = ConnectionProperties::default()
            .with_executor(tokio_executor_trait::Tokio::current());

        Connection::connect(&self.uri, properties)
            .await
            .map_err(|e| Exception::wrap(e, "Connection creation error"))
    }

    /// 安裝新連線並返回其 epoch
    pub fn install(&self, connection: Arc<Connection>) -> u64 {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.connected.store(true, Ordering::SeqCst);
        self.connecting.store(false, Ordering::SeqCst);
        *self.current.write() = Some(connection);
        info!("Message broker connection established (epoch {})", epoch);
        epoch
    }

    /// 標記連線遺失，若 `epoch` 已過期則返回 `false`
    pub fn mark_lost(&self, epoch: u64) -> bool {
        if self.epoch() != epoch || !self.is_active() {
            return false;
        }
        self.connected.store(false, Ordering::SeqCst);
        self.connecting.store(true, Ordering::SeqCst);
        *self.current.write() = None;
        true
    }

    /// 取出目前連線並標記為未啟用，之後舊連線的事件都會被忽略
    pub fn take(&self) -> Option<Arc<Connection>> {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        self.connecting.store(false, Ordering::SeqCst);
        self.current.write().take()
    }

    /// 目前的連線；重連期間沒有可用連線，立即返回錯誤而不等待
    pub fn current(&self) -> RpcResult<Arc<Connection>> {
        self.current.read().clone().ok_or_else(not_connected)
    }
}
