use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::StreamExt;
use lapin::{
    acker::Acker,
    message::Delivery,
    options::{
        BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions,
        BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
        QueueDeleteOptions, QueuePurgeOptions,
    },
    types::{AMQPValue, FieldTable, ShortString},
    BasicProperties, Channel, Connection, Consumer, ExchangeKind,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::event::{ErrorChannel, ErrorListener, ListenerId};
use crate::exception::{Exception, RpcResult};
use crate::messaging::connector::{
    assert_not_empty, not_connected, ConnectorFactory, MessageBrokerConnector, QueueSettings,
    SubscriptionSet,
};
use crate::messaging::message::{
    decode_payload, encode_payload, Acknowledger, BrokerMessage, ConnectionOptions,
    MessageHandleFunction, MessageProperties, PublishOptions, RawDelivery,
};
use crate::messaging::rabbitmq::channel::{
    is_same_generation, needs_reset, stamp_of, ChannelEntry, ChannelKind, ChannelSlot, ChannelStamp,
    CHANNEL_RECREATE_DELAY,
};
use crate::messaging::rabbitmq::connection::ConnectionLink;

/// 正在執行的消費者
struct ActiveConsumer {
    tag: String,
    channel: Channel,
    task: JoinHandle<()>,
}

struct ConnectorInner {
    options: ConnectionOptions,
    settings: Mutex<QueueSettings>,
    patterns: Mutex<SubscriptionSet>,
    link: ConnectionLink,
    consume: ChannelSlot,
    publish: ChannelSlot,
    consumer: tokio::sync::Mutex<Option<ActiveConsumer>>,
    generation: AtomicU64,
    runtime: Mutex<Option<Handle>>,
    errors: ErrorChannel,
}

/// 基於 RabbitMQ 主題交換機的連接器
///
/// 每個連接器只有一個消費通道和一個發布通道，兩者都在第一次使用時建立，
/// 通道關閉後會自動重建；連線中斷則在 `reconnect_delay` 後重新連線。
#[derive(Clone)]
pub struct TopicMessageBrokerConnector {
    inner: Arc<ConnectorInner>,
}

impl TopicMessageBrokerConnector {
    /// 創建新的連接器，尚未連線
    pub fn new(options: ConnectionOptions) -> Self {
        let settings = QueueSettings::from_options(&options);
        let link = ConnectionLink::new(&options);
        Self {
            inner: Arc::new(ConnectorInner {
                options,
                settings: Mutex::new(settings),
                patterns: Mutex::new(SubscriptionSet::new()),
                link,
                consume: ChannelSlot::new(),
                publish: ChannelSlot::new(),
                consumer: tokio::sync::Mutex::new(None),
                generation: AtomicU64::new(0),
                runtime: Mutex::new(None),
                errors: ErrorChannel::new(),
            }),
        }
    }

    /// 連接器工廠
    pub fn factory() -> ConnectorFactory {
        Arc::new(|options| Arc::new(TopicMessageBrokerConnector::new(options)))
    }

    fn assert_connection(&self) -> RpcResult<()> {
        if !self.inner.link.is_active() {
            return Err(not_connected());
        }
        Ok(())
    }

    async fn bind_queue(&self, channel: &Channel, pattern: &str) -> RpcResult<()> {
        let (queue, ttl, is_temporary) = {
            let settings = self.inner.settings.lock();
            (
                settings.queue().to_string(),
                settings.message_expired_in(),
                settings.is_temporary(),
            )
        };

        let mut arguments = FieldTable::default();
        if ttl > 0 {
            arguments.insert(
                ShortString::from("x-message-ttl"),
                AMQPValue::LongUInt(ttl.min(u32::MAX as u64) as u32),
            );
        }

        // 不設定 auto_delete：佇列沒有綁定時會被刪除，之後再綁定就會找不到佇列
        channel
            .queue_declare(
                &queue,
                QueueDeclareOptions {
                    exclusive: is_temporary,
                    durable: false,
                    ..QueueDeclareOptions::default()
                },
                arguments,
            )
            .await
            .map_err(|e| Exception::wrap(e, "Queue binding error"))?;

        channel
            .queue_bind(
                &queue,
                &self.inner.options.exchange,
                pattern,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| Exception::wrap(e, "Queue binding error"))?;

        self.inner.settings.lock().mark_bound();
        debug!("Queue {} bound with pattern {}", queue, pattern);
        Ok(())
    }
}

impl ConnectorInner {
    fn slot(&self, kind: ChannelKind) -> &ChannelSlot {
        match kind {
            ChannelKind::Consume => &self.consume,
            ChannelKind::Publish => &self.publish,
        }
    }

    fn runtime(&self) -> Option<Handle> {
        self.runtime.lock().clone()
    }

    /// 安裝新連線，並監聽其錯誤事件
    fn attach(self: &Arc<Self>, connection: Connection) {
        let connection = Arc::new(connection);
        let epoch = self.link.install(connection.clone());
        let weak = Arc::downgrade(self);

        connection.on_error(move |err| {
            if let Some(inner) = weak.upgrade() {
                inner.on_connection_lost(epoch, err);
            }
        });
    }

    fn on_connection_lost(self: Arc<Self>, epoch: u64, err: lapin::Error) {
        if !self.link.mark_lost(epoch) {
            debug!("Ignoring error from stale connection: {}", err);
            return;
        }
        self.errors.emit(Exception::wrap(err, "Connection error"));

        let delay = self.link.reconnect_delay();
        warn!(
            "Message broker connection {} lost, reconnecting in {:?}",
            self.options.name, delay
        );
        match self.runtime() {
            Some(handle) => {
                handle.spawn(reconnect(self));
            }
            None => error!("No runtime available to schedule reconnection"),
        }
    }

    /// 在目前連線上建立新通道並宣告交換機
    async fn create_channel(self: &Arc<Self>, kind: ChannelKind) -> RpcResult<ChannelEntry> {
        let epoch = self.link.epoch();
        let connection = self.link.current()?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| Exception::wrap(e, "Channel creation error"))?;

        // 持久化的交換機在代理重啟後仍存在，但佇列與等待中的訊息會遺失
        channel
            .exchange_declare(
                &self.options.exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| Exception::wrap(e, "Channel creation error"))?;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let weak: Weak<Self> = Arc::downgrade(self);
        channel.on_error(move |err| {
            let Some(inner) = weak.upgrade() else { return };
            if !inner.link.is_active() {
                return;
            }
            inner.errors.emit(Exception::wrap(err, "Channel error"));
            if let Some(handle) = inner.runtime() {
                handle.spawn(async move {
                    tokio::time::sleep(CHANNEL_RECREATE_DELAY).await;
                    inner.recreate_channel(kind, generation).await;
                });
            }
        });

        debug!("Created {} channel (generation {})", kind, generation);
        Ok(ChannelEntry {
            channel,
            stamp: ChannelStamp { generation, epoch },
        })
    }

    /// 取得通道，不存在或已關閉時建立新通道
    async fn channel(self: &Arc<Self>, kind: ChannelKind) -> RpcResult<Channel> {
        let mut slot = self.slot(kind).lock().await;
        if let Some(entry) = slot.as_ref() {
            if entry.channel.status().connected() {
                return Ok(entry.channel.clone());
            }
        }
        let entry = self.create_channel(kind).await?;
        let channel = entry.channel.clone();
        *slot = Some(entry);
        Ok(channel)
    }

    /// 只有槽位仍指向已關閉的通道時才重建
    fn recreate_channel(self: Arc<Self>, kind: ChannelKind, generation: u64) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let mut slot = self.slot(kind).lock().await;
            let stamp = stamp_of(&slot);
            if !is_same_generation(stamp, generation) {
                debug!("A fresher {} channel is already in place", kind);
                return;
            }
            if !self.link.is_connected() || needs_reset(stamp, self.link.epoch()) {
                // 連線本身已遺失，通道由重連流程重建
                debug!("Connection lost, {} channel is left to reconnection", kind);
                return;
            }

            match self.create_channel(kind).await {
                Ok(entry) => *slot = Some(entry),
                Err(err) => {
                    *slot = None;
                    self.errors.emit(err);
                }
            }
            drop(slot);

            if kind == ChannelKind::Consume {
                self.forget_consumer().await;
            }
        })
    }

    /// 連線重建後，為仍屬於舊連線的通道建立新通道
    async fn reset_channels(self: &Arc<Self>) {
        let epoch = self.link.epoch();
        for kind in [ChannelKind::Consume, ChannelKind::Publish] {
            let mut slot = self.slot(kind).lock().await;
            if !needs_reset(stamp_of(&slot), epoch) {
                continue;
            }
            match self.create_channel(kind).await {
                Ok(entry) => *slot = Some(entry),
                Err(err) => {
                    *slot = None;
                    self.errors.emit(err);
                }
            }
        }
        self.forget_consumer().await;
    }

    /// 舊通道上的消費者已失效，需要由使用者重新開始接收
    async fn forget_consumer(&self) {
        if let Some(active) = self.consumer.lock().await.take() {
            warn!(
                "Consumer {} was lost with its channel, listen() must be called again",
                active.tag
            );
        }
    }
}

/// 延遲後重新連線，失敗時持續重試直到連接器被斷開
async fn reconnect(inner: Arc<ConnectorInner>) {
    loop {
        tokio::time::sleep(inner.link.reconnect_delay()).await;
        if !inner.link.is_connecting() {
            debug!("Connector was disconnected, abort reconnecting");
            return;
        }
        match inner.link.open().await {
            Ok(connection) => {
                inner.attach(connection);
                inner.reset_channels().await;
                info!("Message broker connection {} restored", inner.options.name);
                return;
            }
            Err(err) => {
                error!("Reconnection failed: {}", err);
                inner.errors.emit(err);
            }
        }
    }
}

/// lapin 的訊息確認包裝
struct LapinAcker {
    acker: Acker,
}

#[async_trait]
impl Acknowledger for LapinAcker {
    async fn ack(&self) -> RpcResult<()> {
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| Exception::wrap(e, "Message acknowledging error"))
    }

    async fn nack(&self, requeue: bool) -> RpcResult<()> {
        self.acker
            .nack(BasicNackOptions {
                multiple: false,
                requeue,
            })
            .await
            .map_err(|e| Exception::wrap(e, "Message rejecting error"))
    }
}

fn short_string(value: &Option<ShortString>) -> Option<String> {
    value.as_ref().map(|s| s.as_str().to_string())
}

fn to_properties(options: &PublishOptions) -> BasicProperties {
    let mut properties = BasicProperties::default();
    if let Some(content_type) = &options.content_type {
        properties = properties.with_content_type(content_type.as_str().into());
    }
    if let Some(encoding) = &options.content_encoding {
        properties = properties.with_content_encoding(encoding.as_str().into());
    }
    if let Some(correlation_id) = &options.correlation_id {
        properties = properties.with_correlation_id(correlation_id.as_str().into());
    }
    if let Some(reply_to) = &options.reply_to {
        properties = properties.with_reply_to(reply_to.as_str().into());
    }
    properties
}

fn parse_delivery(delivery: &Delivery, no_ack: bool) -> RpcResult<BrokerMessage> {
    let properties = MessageProperties {
        content_type: short_string(delivery.properties.content_type()),
        content_encoding: short_string(delivery.properties.content_encoding()),
        correlation_id: short_string(delivery.properties.correlation_id()),
        reply_to: short_string(delivery.properties.reply_to()),
    };
    let data = decode_payload(&delivery.data, &properties)?;
    let raw = RawDelivery {
        exchange: delivery.exchange.as_str().to_string(),
        routing_key: delivery.routing_key.as_str().to_string(),
        delivery_tag: delivery.delivery_tag,
        redelivered: delivery.redelivered,
        body: delivery.data.clone(),
    };

    let message = BrokerMessage::new(data, raw, properties);
    if no_ack {
        Ok(message)
    } else {
        Ok(message.with_acker(Arc::new(LapinAcker {
            acker: delivery.acker.clone(),
        })))
    }
}

/// 逐一處理投遞，處理器錯誤送往錯誤通道
async fn consume_loop(
    mut consumer: Consumer,
    on_message: MessageHandleFunction,
    no_ack: bool,
    errors: ErrorChannel,
) {
    let tag = consumer.tag().as_str().to_string();
    debug!("Consumer {} started", tag);

    while let Some(delivery) = consumer.next().await {
        let delivery = match delivery {
            Ok(delivery) => delivery,
            Err(err) => {
                errors.emit(Exception::wrap(err, "Error receiving message"));
                break;
            }
        };

        let message = match parse_delivery(&delivery, no_ack) {
            Ok(message) => message,
            Err(err) => {
                errors.emit(err);
                if !no_ack {
                    // 無法解析的訊息不重新排入佇列
                    let _ = delivery
                        .acker
                        .nack(BasicNackOptions {
                            multiple: false,
                            requeue: false,
                        })
                        .await;
                }
                continue;
            }
        };

        if let Err(err) = on_message(message).await {
            errors.emit(err);
        }
    }

    debug!("Consumer {} stopped", tag);
}

#[async_trait]
impl MessageBrokerConnector for TopicMessageBrokerConnector {
    fn name(&self) -> &str {
        &self.inner.options.name
    }

    fn queue(&self) -> String {
        self.inner.settings.lock().queue().to_string()
    }

    fn set_queue(&self, name: Option<&str>) -> RpcResult<()> {
        self.inner.settings.lock().set_queue(name)
    }

    fn message_expired_in(&self) -> u64 {
        self.inner.settings.lock().message_expired_in()
    }

    fn set_message_expired_in(&self, millis: i64) -> RpcResult<()> {
        self.inner.settings.lock().set_message_expired_in(millis)
    }

    fn subscribed_patterns(&self) -> Vec<String> {
        self.inner.patterns.lock().snapshot()
    }

    fn is_active(&self) -> bool {
        self.inner.link.is_active()
    }

    fn is_listening(&self) -> bool {
        self.inner
            .consumer
            .try_lock()
            .map(|consumer| consumer.is_some())
            .unwrap_or(true)
    }

    async fn connect(&self) -> RpcResult<()> {
        if self.inner.link.is_active() {
            debug!("Connector {} is already active", self.name());
            return Ok(());
        }
        self.inner.options.validate()?;
        *self.inner.runtime.lock() = Handle::try_current().ok();

        self.inner.link.begin_connecting();
        match self.inner.link.open().await {
            Ok(connection) => {
                self.inner.attach(connection);
                info!(
                    "Connector {} connected to {}",
                    self.name(),
                    self.inner.options.host_address
                );
                Ok(())
            }
            Err(err) => {
                self.inner.link.abort_connecting();
                Err(err)
            }
        }
    }

    async fn disconnect(&self) -> RpcResult<()> {
        // 先讓連線失效，舊連線與舊通道的事件從此都會被忽略
        let Some(connection) = self.inner.link.take() else {
            debug!("Connector {} was never connected", self.name());
            return Ok(());
        };

        if let Some(active) = self.inner.consumer.lock().await.take() {
            active.task.abort();
        }
        let consume = self.inner.consume.take().await;
        let publish = self.inner.publish.take().await;

        // 先關閉所有通道再關閉連線，避免遺留懸空通道
        let closing = consume
            .into_iter()
            .chain(publish)
            .map(|channel| async move { channel.close(200, "Bye").await });
        let results = futures::future::join_all(closing).await;
        for result in results {
            if let Err(err) = result {
                debug!("Channel closing error: {}", err);
            }
        }

        connection
            .close(200, "Bye")
            .await
            .map_err(|e| Exception::wrap(e, "Connection closing error"))?;
        info!("Connector {} disconnected", self.name());
        Ok(())
    }

    async fn delete_queue(&self) -> RpcResult<()> {
        self.assert_connection()?;
        if self.inner.consumer.lock().await.is_some() {
            return Err(Exception::minor("Must stop listening before deleting queue"));
        }

        let channel = self.inner.channel(ChannelKind::Consume).await?;
        let queue = self.queue();
        channel
            .queue_delete(&queue, QueueDeleteOptions::default())
            .await
            .map_err(|e| Exception::wrap(e, "Queue deleting failed"))?;
        debug!("Queue {} deleted", queue);
        Ok(())
    }

    async fn empty_queue(&self) -> RpcResult<u32> {
        self.assert_connection()?;

        let channel = self.inner.channel(ChannelKind::Consume).await?;
        channel
            .queue_purge(&self.queue(), QueuePurgeOptions::default())
            .await
            .map_err(|e| Exception::wrap(e, "Queue emptying failed"))
    }

    async fn listen(&self, on_message: MessageHandleFunction, no_ack: bool) -> RpcResult<()> {
        self.assert_connection()?;

        let channel = self
            .inner
            .channel(ChannelKind::Consume)
            .await
            .map_err(|e| Exception::wrap(e, "Error when start listening"))?;
        let queue = self.queue();

        let mut active = self.inner.consumer.lock().await;
        if let Some(previous) = active.take() {
            warn!("Connector {} replaces consumer {}", self.name(), previous.tag);
            if let Err(err) = previous
                .channel
                .basic_cancel(&previous.tag, BasicCancelOptions::default())
                .await
            {
                debug!("Cancelling previous consumer failed: {}", err);
            }
        }

        let consumer = channel
            .basic_consume(
                &queue,
                "",
                BasicConsumeOptions {
                    no_ack,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| Exception::wrap(e, "Error when start listening"))?;

        let tag = consumer.tag().as_str().to_string();
        let task = tokio::spawn(consume_loop(
            consumer,
            on_message,
            no_ack,
            self.inner.errors.clone(),
        ));
        debug!("Listening on queue {} with consumer {}", queue, tag);

        *active = Some(ActiveConsumer { tag, channel, task });
        Ok(())
    }

    async fn stop_listen(&self) -> RpcResult<()> {
        let mut active = self.inner.consumer.lock().await;
        let Some(consumer) = active.take() else {
            return Ok(());
        };
        self.assert_connection()?;

        // 取消後消費迴圈會在串流結束時自行退出
        consumer
            .channel
            .basic_cancel(&consumer.tag, BasicCancelOptions::default())
            .await
            .map_err(|e| Exception::wrap(e, "Error when stop listening"))?;
        debug!("Consumer {} cancelled", consumer.tag);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Value, options: PublishOptions) -> RpcResult<()> {
        assert_not_empty(topic, "topic")?;
        if payload.is_null() {
            return Err(Exception::minor("Argument \"payload\" must not be empty"));
        }
        self.assert_connection()?;

        let channel = self
            .inner
            .channel(ChannelKind::Publish)
            .await
            .map_err(|e| Exception::wrap(e, "Publishing error"))?;
        let (body, options) = encode_payload(&payload, options)?;

        // 發布到交換機，由交換機路由到符合的佇列
        channel
            .basic_publish(
                &self.inner.options.exchange,
                topic,
                BasicPublishOptions::default(),
                &body,
                to_properties(&options),
            )
            .await
            .map_err(|e| Exception::wrap(e, "Publishing error"))?;

        debug!("Published message to {}", topic);
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> RpcResult<()> {
        assert_not_empty(pattern, "matchingPattern")?;
        self.assert_connection()?;

        // 消費通道只綁定一個佇列，但佇列可以用多個樣式綁定
        let channel = self
            .inner
            .channel(ChannelKind::Consume)
            .await
            .map_err(|e| Exception::wrap(e, "Subscription error"))?;
        self.bind_queue(&channel, pattern).await?;

        self.inner.patterns.lock().add(pattern);
        Ok(())
    }

    async fn unsubscribe(&self, pattern: &str) -> RpcResult<()> {
        self.assert_connection()?;
        // 先移除記錄，通道不存在時綁定已隨舊通道消失
        self.inner.patterns.lock().remove(pattern);
        let Some(channel) = self.inner.consume.current().await else {
            return Ok(());
        };

        channel
            .queue_unbind(
                &self.queue(),
                &self.inner.options.exchange,
                pattern,
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                Exception::wrap(e, &format!("Failed to unsubscribe pattern \"{}\"", pattern))
            })?;
        debug!("Unsubscribed pattern {}", pattern);
        Ok(())
    }

    fn on_error(&self, listener: ErrorListener) -> ListenerId {
        self.inner.errors.add_listener(listener)
    }

    fn off_error(&self, id: ListenerId) -> bool {
        self.inner.errors.remove_listener(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::time::Duration;

    fn connector() -> TopicMessageBrokerConnector {
        TopicMessageBrokerConnector::new(
            ConnectionOptions::new("test-connector", "localhost", "svc-test")
                .with_message_expired_in(1000),
        )
    }

    #[test]
    fn test_new_connector_is_inactive() {
        let connector = connector();
        assert_eq!(connector.name(), "test-connector");
        assert!(!connector.is_active());
        assert!(!connector.is_listening());
        assert!(connector.queue().starts_with("auto-gen-"));
        assert_eq!(connector.message_expired_in(), 1000);
        assert!(connector.subscribed_patterns().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_without_connect_is_noop() {
        let connector = connector();
        assert!(connector.disconnect().await.is_ok());
        assert!(connector.disconnect().await.is_ok());
    }

    #[tokio::test]
    async fn test_operations_require_connection() {
        let connector = connector();
        let err = connector.subscribe("request.orders.*").await.unwrap_err();
        assert_matches!(err, Exception::Critical { .. });

        let err = connector
            .publish("request.orders.create", Value::from("hi"), PublishOptions::default())
            .await
            .unwrap_err();
        assert_matches!(err, Exception::Critical { .. });
    }

    #[tokio::test]
    async fn test_publish_validates_arguments() {
        let connector = connector();
        let err = connector
            .publish("", Value::from("hi"), PublishOptions::default())
            .await
            .unwrap_err();
        assert_matches!(err, Exception::Minor { .. });

        let err = connector
            .publish("topic", Value::Null, PublishOptions::default())
            .await
            .unwrap_err();
        assert_matches!(err, Exception::Minor { .. });
    }

    #[tokio::test]
    async fn test_stop_listen_when_not_listening() {
        let connector = connector();
        assert!(connector.stop_listen().await.is_ok());
    }

    #[tokio::test]
    async fn test_operations_fail_fast_while_reconnecting() {
        let connector = connector();
        // 連線遺失後的狀態：啟用中但沒有可用連線
        connector.inner.link.begin_connecting();
        assert!(connector.is_active());

        let wait = Duration::from_secs(1);
        let subscribed = tokio::time::timeout(wait, connector.subscribe("request.orders.*"))
            .await
            .expect("subscribe must not wait for reconnection");
        assert_matches!(subscribed, Err(Exception::Critical { .. }));

        let published = tokio::time::timeout(
            wait,
            connector.publish("request.orders.create", Value::from("hi"), PublishOptions::default()),
        )
        .await
        .expect("publish must not wait for reconnection");
        assert_matches!(published, Err(Exception::Critical { .. }));
        assert!(connector.inner.consume.current().await.is_none());
    }

    #[tokio::test]
    async fn test_recreate_ignores_stale_generation() {
        let connector = connector();
        connector.inner.link.begin_connecting();

        connector
            .inner
            .clone()
            .recreate_channel(ChannelKind::Consume, 7)
            .await;
        assert!(connector.inner.consume.current().await.is_none());
    }

    #[tokio::test]
    async fn test_unsubscribe_without_channel_forgets_pattern() {
        let connector = connector();
        connector.inner.link.begin_connecting();
        connector.inner.patterns.lock().add("response.orders.create@abc");

        connector.unsubscribe("response.orders.create@abc").await.unwrap();
        assert!(connector.subscribed_patterns().is_empty());
    }

    #[test]
    fn test_to_properties() {
        let options = PublishOptions::correlated("abc").with_reply_to("response.a.b@abc");
        let properties = to_properties(&options);
        assert_eq!(short_string(properties.correlation_id()).as_deref(), Some("abc"));
        assert_eq!(
            short_string(properties.reply_to()).as_deref(),
            Some("response.a.b@abc")
        );
        assert_eq!(properties.content_type(), &None);
    }
}
