use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::event::{ErrorChannel, ErrorListener, ListenerId};
use crate::exception::{Exception, RpcResult};
use crate::messaging::connector::MessageBrokerConnector;
use crate::messaging::message::{message_handler, BrokerMessage, PublishOptions};
use crate::rpc::codec::RpcCodec;
use crate::rpc::envelope::{RpcRequest, RpcResponse};
use crate::rpc::{call_failed, CallerTimeout, RpcCaller, RpcCallerOptions};

/// 等待回應的呼叫，以關聯 ID 為鍵
type PendingCalls = DashMap<String, oneshot::Sender<BrokerMessage>>;

/// 經由訊息代理呼叫處理端
///
/// 所有呼叫共用連接器的同一個消費者；回應依關聯 ID 分派給等待中的呼叫，
/// 最後一個呼叫完成後停止消費。
pub struct MessageBrokerRpcCaller {
    name: String,
    connector: Arc<dyn MessageBrokerConnector>,
    timeout: CallerTimeout,
    codec: RpcCodec,
    errors: ErrorChannel,
    pending: Arc<PendingCalls>,
    listening: Mutex<bool>,
    forwarder: parking_lot::Mutex<Option<ListenerId>>,
}

impl MessageBrokerRpcCaller {
    pub fn new(name: impl Into<String>, connector: Arc<dyn MessageBrokerConnector>, codec: RpcCodec) -> Self {
        if !connector.queue().starts_with(crate::messaging::connector::AUTO_GEN_QUEUE_PREFIX) {
            debug!("MessageBrokerRpcCaller should only use temporary unique queue.");
        }
        Self {
            name: name.into(),
            connector,
            timeout: CallerTimeout::default(),
            codec,
            errors: ErrorChannel::new(),
            pending: Arc::new(DashMap::new()),
            listening: Mutex::new(false),
            forwarder: parking_lot::Mutex::new(None),
        }
    }

    pub fn connector(&self) -> &Arc<dyn MessageBrokerConnector> {
        &self.connector
    }

    /// 目前等待回應的呼叫數量
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// 發送請求但不等待回應
    pub async fn call_impatient(&self, options: RpcCallerOptions) -> RpcResult<()> {
        options.validate()?;
        let request = RpcRequest::new(self.name.clone(), options.module_name.clone(), options.params.clone());
        let payload = serde_json::to_value(&request)?;

        self.connector
            .publish(&options.request_topic(), payload, PublishOptions::default())
            .await
            .map_err(call_failed)
    }

    /// 確保回應消費者正在執行
    async fn ensure_listening(&self) -> RpcResult<()> {
        let mut listening = self.listening.lock().await;
        if *listening && self.connector.is_listening() {
            return Ok(());
        }

        let pending = self.pending.clone();
        self.connector
            .listen(
                message_handler(move |msg: BrokerMessage| {
                    let pending = pending.clone();
                    async move {
                        dispatch_reply(&pending, msg);
                        Ok(())
                    }
                }),
                true,
            )
            .await?;
        *listening = true;
        Ok(())
    }

    /// 沒有等待中的呼叫時停止消費
    async fn stop_listening_if_idle(&self) {
        let mut listening = self.listening.lock().await;
        if !*listening || !self.pending.is_empty() {
            return;
        }
        match self.connector.stop_listen().await {
            Ok(()) => *listening = false,
            Err(err) => warn!("Failed to stop listening for replies: {}", err),
        }
    }

    /// 呼叫結束後的清理，重複解除訂閱的錯誤會被忽略
    async fn finish(&self, correlation_id: &str, reply_to: &str) {
        self.pending.remove(correlation_id);
        if let Err(err) = self.connector.unsubscribe(reply_to).await {
            debug!("Ignoring unsubscribe error for {}: {}", reply_to, err);
        }
        self.stop_listening_if_idle().await;
    }

    fn parse_reply(&self, msg: BrokerMessage) -> RpcResult<RpcResponse> {
        let response: RpcResponse = serde_json::from_value(msg.data).map_err(|e| {
            Exception::critical(format!("Malformed RPC response: {}", e))
        })?;
        self.codec.resolve_reply(response)
    }
}

/// 將回應交給對應的呼叫，第一個符合者取走後即移除
fn dispatch_reply(pending: &PendingCalls, msg: BrokerMessage) {
    let Some(correlation_id) = msg.correlation_id().map(str::to_string) else {
        debug!("Dropping reply without correlation id from {}", msg.routing_key());
        return;
    };
    match pending.remove(&correlation_id) {
        Some((_, sender)) => {
            if sender.send(msg).is_err() {
                debug!("Call {} is no longer waiting", correlation_id);
            }
        }
        None => debug!("No outstanding call for correlation id {}", correlation_id),
    }
}

#[async_trait]
impl RpcCaller for MessageBrokerRpcCaller {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Duration {
        self.timeout.duration()
    }

    fn set_timeout(&self, millis: u64) {
        self.timeout.set(millis);
    }

    /// 回應訊息的存活時間與呼叫的等待時間相同
    async fn init(&self) -> RpcResult<()> {
        let ttl = self.timeout.millis() as i64;
        if let Err(err) = self.connector.set_message_expired_in(ttl) {
            warn!("Cannot apply caller timeout to connector {}: {}", self.connector.name(), err);
        }

        let mut forwarder = self.forwarder.lock();
        if forwarder.is_none() {
            let errors = self.errors.clone();
            *forwarder = Some(
                self.connector
                    .on_error(Arc::new(move |err: Arc<anyhow::Error>| errors.emit_shared(err))),
            );
        }
        Ok(())
    }

    async fn call(&self, options: RpcCallerOptions) -> RpcResult<RpcResponse> {
        options.validate()?;

        let correlation_id = Uuid::new_v4().simple().to_string();
        let reply_to = options.reply_topic(&correlation_id);
        let request = RpcRequest::new(self.name.clone(), options.module_name.clone(), options.params.clone());
        let payload = serde_json::to_value(&request)?;

        let waited = self.timeout();

        // 等待時間涵蓋訂閱、發布與等待回應，代理重連期間也不會無限等待
        let exchange = async {
            self.connector.subscribe(&reply_to).await.map_err(call_failed)?;

            let (sender, receiver) = oneshot::channel();
            self.pending.insert(correlation_id.clone(), sender);

            self.ensure_listening().await.map_err(call_failed)?;
            self.connector
                .publish(
                    &options.request_topic(),
                    payload,
                    PublishOptions::correlated(correlation_id.clone()).with_reply_to(reply_to.clone()),
                )
                .await
                .map_err(call_failed)?;

            receiver
                .await
                .map_err(|_| Exception::minor("RPC caller was disposed while waiting for response"))
        };
        let outcome = tokio::time::timeout(waited, exchange).await;
        self.finish(&correlation_id, &reply_to).await;

        match outcome {
            Ok(Ok(msg)) => self.parse_reply(msg),
            Ok(Err(err)) => Err(err),
            Err(_) => {
                debug!("Call {} to {} timed out", correlation_id, options.request_topic());
                Err(Exception::Timeout {
                    waited_ms: waited.as_millis() as u64,
                })
            }
        }
    }

    /// 不斷開連接器，其他呼叫端與處理端可能共用同一個連接器
    async fn dispose(&self) -> RpcResult<()> {
        if let Some(id) = self.forwarder.lock().take() {
            self.connector.off_error(id);
        }
        self.pending.clear();
        let mut listening = self.listening.lock().await;
        if *listening {
            self.connector.stop_listen().await?;
            *listening = false;
        }
        self.errors.clear();
        Ok(())
    }

    fn on_error(&self, listener: ErrorListener) {
        self.errors.add_listener(listener);
    }
}
