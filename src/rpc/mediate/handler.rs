use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::event::{ErrorChannel, ErrorListener, ListenerId};
use crate::exception::{Exception, RpcResult};
use crate::messaging::connector::{assert_not_empty, MessageBrokerConnector};
use crate::messaging::message::{message_handler, BrokerMessage, PublishOptions};
use crate::rpc::action::{invoke_action, RawMessage, RpcHandlerFunction};
use crate::rpc::codec::RpcCodec;
use crate::rpc::envelope::{RpcRequest, RpcResponse};
use crate::rpc::RpcHandler;

struct HandlerCore {
    name: String,
    connector: Arc<dyn MessageBrokerConnector>,
    codec: RpcCodec,
    errors: ErrorChannel,
    actions: DashMap<String, RpcHandlerFunction>,
}

/// 經由訊息代理接收請求的處理端
pub struct MessageBrokerRpcHandler {
    core: Arc<HandlerCore>,
    /// 轉發連接器錯誤的監聽器，`dispose` 時移除
    forwarder: Mutex<Option<ListenerId>>,
}

impl MessageBrokerRpcHandler {
    pub fn new(name: impl Into<String>, connector: Arc<dyn MessageBrokerConnector>, codec: RpcCodec) -> Self {
        Self {
            core: Arc::new(HandlerCore {
                name: name.into(),
                connector,
                codec,
                errors: ErrorChannel::new(),
                actions: DashMap::new(),
            }),
            forwarder: Mutex::new(None),
        }
    }

    pub fn connector(&self) -> &Arc<dyn MessageBrokerConnector> {
        &self.core.connector
    }

    /// 以原始路由鍵註冊動作
    pub async fn handle_raw(&self, dest: &str, handler: RpcHandlerFunction) -> RpcResult<()> {
        assert_not_empty(dest, "rawDest")?;
        if self.core.actions.insert(dest.to_string(), handler).is_some() {
            warn!("Override existing subscription key {}", dest);
        }
        self.core.connector.subscribe(dest).await
    }

    /// 處理一則收到的訊息
    pub async fn on_message(&self, msg: BrokerMessage) -> anyhow::Result<()> {
        self.core.clone().on_message(msg).await
    }
}

impl HandlerCore {
    async fn on_message(self: Arc<Self>, msg: BrokerMessage) -> anyhow::Result<()> {
        let routing_key = msg.routing_key().to_string();
        let Some(action) = self.actions.get(&routing_key).map(|a| a.value().clone()) else {
            // 重新排入佇列讓其他服務處理，沒人處理的訊息會在過期後消失
            msg.nack().await?;
            debug!("No handlers for request {}", routing_key);
            return Ok(());
        };
        msg.ack().await?;

        let request: RpcRequest = match serde_json::from_value(msg.data.clone()) {
            Ok(request) => request,
            Err(err) => {
                self.errors.emit(Exception::critical(format!(
                    "Malformed RPC request on {}: {}",
                    routing_key, err
                )));
                return Ok(());
            }
        };

        // 動作在背景執行，消費者可以繼續接收下一則請求
        tokio::spawn(async move {
            self.process(action, request, msg).await;
        });
        Ok(())
    }

    async fn process(&self, action: RpcHandlerFunction, request: RpcRequest, msg: BrokerMessage) {
        let correlation_id = msg.correlation_id().map(str::to_string);
        let reply_to = msg.reply_to().map(str::to_string);
        let caller = request.from.clone();

        let response = match invoke_action(&action, request, RawMessage::Broker(msg)).await {
            Ok(result) => self.codec.create_response(true, result, &self.name, &caller),
            Err(rejection) => {
                if !rejection.is_intended {
                    error!("Action for {} failed unexpectedly", caller);
                    self.errors.emit_shared(rejection.reason.to_error());
                }
                let error = self.codec.create_error(&rejection);
                RpcResponse::failure(self.name.clone(), caller, &error)
            }
        };

        let Some(reply_to) = reply_to else {
            debug!("Request has no reply topic, response dropped");
            return;
        };
        if let Err(err) = self.reply(&reply_to, correlation_id, &response).await {
            self.errors.emit(err);
        }
    }

    async fn reply(&self, reply_to: &str, correlation_id: Option<String>, response: &RpcResponse) -> RpcResult<()> {
        let payload = serde_json::to_value(response)?;
        let options = PublishOptions {
            correlation_id,
            ..PublishOptions::default()
        };
        self.connector.publish(reply_to, payload, options).await
    }
}

#[async_trait]
impl RpcHandler for MessageBrokerRpcHandler {
    fn name(&self) -> &str {
        &self.core.name
    }

    async fn init(&self) -> RpcResult<()> {
        let mut forwarder = self.forwarder.lock();
        if forwarder.is_none() {
            let errors = self.core.errors.clone();
            *forwarder = Some(
                self.core
                    .connector
                    .on_error(Arc::new(move |err: Arc<anyhow::Error>| errors.emit_shared(err))),
            );
        }
        Ok(())
    }

    async fn handle(&self, module: &str, action: &str, handler: RpcHandlerFunction) -> RpcResult<()> {
        assert_not_empty(module, "moduleName")?;
        assert_not_empty(action, "actionName")?;
        self.handle_raw(&format!("request.{}.{}", module, action), handler)
            .await
    }

    async fn start(&self) -> RpcResult<()> {
        let core = self.core.clone();
        self.core
            .connector
            .listen(
                message_handler(move |msg: BrokerMessage| core.clone().on_message(msg)),
                false,
            )
            .await
    }

    async fn pause(&self) -> RpcResult<()> {
        self.core.connector.stop_listen().await
    }

    async fn resume(&self) -> RpcResult<()> {
        self.start().await
    }

    /// 停止接收並解除所有訂閱，不斷開共用的連接器
    async fn dispose(&self) -> RpcResult<()> {
        let connector = &self.core.connector;
        if let Some(id) = self.forwarder.lock().take() {
            connector.off_error(id);
        }
        futures::try_join!(connector.stop_listen(), connector.unsubscribe_all())?;
        self.core.actions.clear();
        Ok(())
    }

    fn on_error(&self, listener: ErrorListener) {
        self.core.errors.add_listener(listener);
    }
}
