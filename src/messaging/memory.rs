// memory.rs - 行程內訊息代理
//
// 提供與 RabbitMQ 主題交換機相同語意的行程內代理：萬用字元路由、佇列存活時間、
// 手動確認與重新排入佇列。多個連接器可共用同一個代理，用於測試與本機開發。

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::event::{ErrorChannel, ErrorListener, ListenerId};
use crate::exception::{Exception, RpcResult};
use crate::messaging::connector::{
    assert_not_empty, not_connected, ConnectorFactory, MessageBrokerConnector, QueueSettings,
    SubscriptionSet,
};
use crate::messaging::message::{
    decode_payload, encode_payload, Acknowledger, BrokerMessage, ConnectionOptions,
    MessageHandleFunction, PublishOptions, RawDelivery,
};

/// 消費者在沒有通知時重新檢查佇列的間隔
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// 判斷路由鍵是否符合主題樣式
///
/// `*` 恰好匹配一個單字，`#` 匹配零個或多個單字，單字以 `.` 分隔。
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let words: Vec<&str> = routing_key.split('.').collect();
    match_words(&pattern, &words)
}

fn match_words(pattern: &[&str], words: &[&str]) -> bool {
    match pattern.split_first() {
        None => words.is_empty(),
        Some((&"#", rest)) => (0..=words.len()).any(|skip| match_words(rest, &words[skip..])),
        Some((&head, rest)) => match words.split_first() {
            Some((&word, remaining)) if head == "*" || head == word => {
                match_words(rest, remaining)
            }
            _ => false,
        },
    }
}

#[derive(Debug, Clone)]
struct QueuedMessage {
    routing_key: String,
    exchange: String,
    body: Vec<u8>,
    properties: PublishOptions,
    enqueued_at: Instant,
    redelivered: bool,
}

struct MemoryQueue {
    owner: Option<u64>,
    ttl: Option<Duration>,
    messages: VecDeque<QueuedMessage>,
    notify: Arc<Notify>,
    redeliveries: usize,
}

impl MemoryQueue {
    fn new(owner: Option<u64>, ttl_ms: u64) -> Self {
        Self {
            owner,
            ttl: (ttl_ms > 0).then(|| Duration::from_millis(ttl_ms)),
            messages: VecDeque::new(),
            notify: Arc::new(Notify::new()),
            redeliveries: 0,
        }
    }

    fn drop_expired(&mut self) {
        if let Some(ttl) = self.ttl {
            self.messages.retain(|m| m.enqueued_at.elapsed() < ttl);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Binding {
    exchange: String,
    pattern: String,
    queue: String,
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, MemoryQueue>,
    bindings: Vec<Binding>,
}

/// 行程內主題交換機代理
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    next_owner: Arc<AtomicU64>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 建立連接到此代理的連接器
    pub fn connector(&self, options: ConnectionOptions) -> InMemoryConnector {
        let owner = self.next_owner.fetch_add(1, Ordering::SeqCst) + 1;
        InMemoryConnector::new(self.clone(), owner, options)
    }

    /// 連接器工廠，產生的連接器都連接到此代理
    pub fn factory(&self) -> ConnectorFactory {
        let broker = self.clone();
        Arc::new(move |options| Arc::new(broker.connector(options)))
    }

    /// 佇列中等待投遞的訊息數量，已過期的訊息不計入
    pub fn queue_depth(&self, queue: &str) -> usize {
        let mut state = self.state.lock();
        match state.queues.get_mut(queue) {
            Some(q) => {
                q.drop_expired();
                q.messages.len()
            }
            None => 0,
        }
    }

    /// 佇列累計被重新排入的次數
    pub fn redelivery_count(&self, queue: &str) -> usize {
        self.state
            .lock()
            .queues
            .get(queue)
            .map(|q| q.redeliveries)
            .unwrap_or(0)
    }

    pub fn has_queue(&self, queue: &str) -> bool {
        self.state.lock().queues.contains_key(queue)
    }

    /// 宣告佇列，已存在時沿用；排他佇列只能由擁有者使用
    fn declare_queue(&self, queue: &str, owner: Option<u64>, ttl_ms: u64) -> RpcResult<Arc<Notify>> {
        let mut state = self.state.lock();
        if let Some(existing) = state.queues.get(queue) {
            if let (Some(current), Some(requested)) = (existing.owner, owner) {
                if current != requested {
                    return Err(Exception::critical(format!(
                        "Queue \"{}\" is locked by another connection",
                        queue
                    )));
                }
            }
            return Ok(existing.notify.clone());
        }

        let created = MemoryQueue::new(owner, ttl_ms);
        let notify = created.notify.clone();
        state.queues.insert(queue.to_string(), created);
        debug!("In-memory queue {} declared", queue);
        Ok(notify)
    }

    fn bind(&self, exchange: &str, pattern: &str, queue: &str) {
        let binding = Binding {
            exchange: exchange.to_string(),
            pattern: pattern.to_string(),
            queue: queue.to_string(),
        };
        let mut state = self.state.lock();
        if !state.bindings.contains(&binding) {
            state.bindings.push(binding);
        }
    }

    fn unbind(&self, exchange: &str, pattern: &str, queue: &str) {
        self.state
            .lock()
            .bindings
            .retain(|b| !(b.exchange == exchange && b.pattern == pattern && b.queue == queue));
    }

    /// 路由訊息到所有綁定相符的佇列，每個佇列最多收到一份
    fn route(&self, exchange: &str, routing_key: &str, body: Vec<u8>, properties: PublishOptions) -> usize {
        let mut state = self.state.lock();
        let mut targets: Vec<String> = state
            .bindings
            .iter()
            .filter(|b| b.exchange == exchange && topic_matches(&b.pattern, routing_key))
            .map(|b| b.queue.clone())
            .collect();
        targets.sort();
        targets.dedup();

        let mut delivered = 0;
        for name in targets {
            if let Some(queue) = state.queues.get_mut(&name) {
                queue.messages.push_back(QueuedMessage {
                    routing_key: routing_key.to_string(),
                    exchange: exchange.to_string(),
                    body: body.clone(),
                    properties: properties.clone(),
                    enqueued_at: Instant::now(),
                    redelivered: false,
                });
                queue.notify.notify_one();
                delivered += 1;
            }
        }
        delivered
    }

    fn pop(&self, queue: &str) -> Option<QueuedMessage> {
        let mut state = self.state.lock();
        let queue = state.queues.get_mut(queue)?;
        queue.drop_expired();
        queue.messages.pop_front()
    }

    fn requeue(&self, queue: &str, mut message: QueuedMessage) {
        let mut state = self.state.lock();
        if let Some(q) = state.queues.get_mut(queue) {
            message.redelivered = true;
            q.messages.push_front(message);
            q.redeliveries += 1;
            q.notify.notify_one();
        }
    }

    fn purge(&self, queue: &str) -> u32 {
        let mut state = self.state.lock();
        match state.queues.get_mut(queue) {
            Some(q) => {
                let count = q.messages.len() as u32;
                q.messages.clear();
                count
            }
            None => 0,
        }
    }

    fn delete_queue(&self, queue: &str) {
        let mut state = self.state.lock();
        state.queues.remove(queue);
        state.bindings.retain(|b| b.queue != queue);
    }

    /// 移除擁有者的所有排他佇列
    fn release_owner(&self, owner: u64) {
        let mut state = self.state.lock();
        let owned: Vec<String> = state
            .queues
            .iter()
            .filter(|(_, q)| q.owner == Some(owner))
            .map(|(name, _)| name.clone())
            .collect();
        for name in &owned {
            state.queues.remove(name);
        }
        state.bindings.retain(|b| !owned.contains(&b.queue));
    }
}

/// 手動確認模式下的訊息確認
struct MemoryAcker {
    broker: InMemoryBroker,
    queue: String,
    message: QueuedMessage,
    settled: AtomicBool,
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) -> RpcResult<()> {
        self.settled.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> RpcResult<()> {
        if self.settled.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if requeue {
            self.broker.requeue(&self.queue, self.message.clone());
        }
        Ok(())
    }
}

struct MemoryConsumer {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct MemoryInner {
    broker: InMemoryBroker,
    owner: u64,
    options: ConnectionOptions,
    settings: Mutex<QueueSettings>,
    patterns: Mutex<SubscriptionSet>,
    active: AtomicBool,
    consumer: tokio::sync::Mutex<Option<MemoryConsumer>>,
    errors: ErrorChannel,
}

/// 連接到 `InMemoryBroker` 的連接器
#[derive(Clone)]
pub struct InMemoryConnector {
    inner: Arc<MemoryInner>,
}

impl InMemoryConnector {
    fn new(broker: InMemoryBroker, owner: u64, options: ConnectionOptions) -> Self {
        let settings = QueueSettings::from_options(&options);
        Self {
            inner: Arc::new(MemoryInner {
                broker,
                owner,
                options,
                settings: Mutex::new(settings),
                patterns: Mutex::new(SubscriptionSet::new()),
                active: AtomicBool::new(false),
                consumer: tokio::sync::Mutex::new(None),
                errors: ErrorChannel::new(),
            }),
        }
    }

    pub fn broker(&self) -> &InMemoryBroker {
        &self.inner.broker
    }

    fn assert_connection(&self) -> RpcResult<()> {
        if !self.inner.active.load(Ordering::SeqCst) {
            return Err(not_connected());
        }
        Ok(())
    }

    /// 依目前設定宣告佇列
    fn assert_queue(&self) -> RpcResult<(String, Arc<Notify>)> {
        let (queue, ttl, temporary) = {
            let settings = self.inner.settings.lock();
            (
                settings.queue().to_string(),
                settings.message_expired_in(),
                settings.is_temporary(),
            )
        };
        let owner = temporary.then_some(self.inner.owner);
        let notify = self.inner.broker.declare_queue(&queue, owner, ttl)?;
        Ok((queue, notify))
    }

    async fn cancel_consumer(&self) -> bool {
        match self.inner.consumer.lock().await.take() {
            Some(consumer) => {
                let _ = consumer.cancel.send(true);
                let _ = consumer.task.await;
                true
            }
            None => false,
        }
    }
}

async fn consume_loop(
    broker: InMemoryBroker,
    queue: String,
    notify: Arc<Notify>,
    mut cancel: watch::Receiver<bool>,
    on_message: MessageHandleFunction,
    no_ack: bool,
    errors: ErrorChannel,
) {
    let mut delivery_tag = 0u64;
    loop {
        if *cancel.borrow() {
            break;
        }

        let Some(queued) = broker.pop(&queue) else {
            tokio::select! {
                _ = notify.notified() => {}
                _ = cancel.changed() => {}
                _ = tokio::time::sleep(IDLE_POLL_INTERVAL) => {}
            }
            continue;
        };

        delivery_tag += 1;
        let raw = RawDelivery {
            exchange: queued.exchange.clone(),
            routing_key: queued.routing_key.clone(),
            delivery_tag,
            redelivered: queued.redelivered,
            body: queued.body.clone(),
        };

        let data = match decode_payload(&queued.body, &queued.properties) {
            Ok(data) => data,
            Err(err) => {
                errors.emit(err);
                continue;
            }
        };

        let mut message = BrokerMessage::new(data, raw, queued.properties.clone());
        if !no_ack {
            message = message.with_acker(Arc::new(MemoryAcker {
                broker: broker.clone(),
                queue: queue.clone(),
                message: queued,
                settled: AtomicBool::new(false),
            }));
        }

        if let Err(err) = on_message(message).await {
            errors.emit(err);
        }
        tokio::task::yield_now().await;
    }
    debug!("In-memory consumer on {} stopped", queue);
}

#[async_trait]
impl MessageBrokerConnector for InMemoryConnector {
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
        self.inner.active.load(Ordering::SeqCst)
    }

    fn is_listening(&self) -> bool {
        self.inner
            .consumer
            .try_lock()
            .map(|consumer| consumer.is_some())
            .unwrap_or(true)
    }

    async fn connect(&self) -> RpcResult<()> {
        self.inner.options.validate()?;
        if !self.inner.active.swap(true, Ordering::SeqCst) {
            info!("In-memory connector {} connected", self.name());
        }
        Ok(())
    }

    async fn disconnect(&self) -> RpcResult<()> {
        if !self.inner.active.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.cancel_consumer().await;
        self.inner.broker.release_owner(self.inner.owner);
        info!("In-memory connector {} disconnected", self.name());
        Ok(())
    }

    async fn delete_queue(&self) -> RpcResult<()> {
        self.assert_connection()?;
        if self.inner.consumer.lock().await.is_some() {
            return Err(Exception::minor("Must stop listening before deleting queue"));
        }
        self.inner.broker.delete_queue(&self.queue());
        Ok(())
    }

    async fn empty_queue(&self) -> RpcResult<u32> {
        self.assert_connection()?;
        Ok(self.inner.broker.purge(&self.queue()))
    }

    async fn listen(&self, on_message: MessageHandleFunction, no_ack: bool) -> RpcResult<()> {
        self.assert_connection()?;
        if self.cancel_consumer().await {
            warn!("In-memory connector {} replaces its consumer", self.name());
        }

        let (queue, notify) = self.assert_queue()?;
        let (cancel, cancelled) = watch::channel(false);
        let task = tokio::spawn(consume_loop(
            self.inner.broker.clone(),
            queue,
            notify,
            cancelled,
            on_message,
            no_ack,
            self.inner.errors.clone(),
        ));

        *self.inner.consumer.lock().await = Some(MemoryConsumer { cancel, task });
        Ok(())
    }

    async fn stop_listen(&self) -> RpcResult<()> {
        self.cancel_consumer().await;
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Value, options: PublishOptions) -> RpcResult<()> {
        assert_not_empty(topic, "topic")?;
        if payload.is_null() {
            return Err(Exception::minor("Argument \"payload\" must not be empty"));
        }
        self.assert_connection()?;

        let (body, options) = encode_payload(&payload, options)?;
        let routed = self
            .inner
            .broker
            .route(&self.inner.options.exchange, topic, body, options);
        debug!("Published {} to {} queue(s)", topic, routed);
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> RpcResult<()> {
        assert_not_empty(pattern, "matchingPattern")?;
        self.assert_connection()?;

        let (queue, _) = self.assert_queue()?;
        self.inner
            .broker
            .bind(&self.inner.options.exchange, pattern, &queue);
        self.inner.settings.lock().mark_bound();
        self.inner.patterns.lock().add(pattern);
        Ok(())
    }

    async fn unsubscribe(&self, pattern: &str) -> RpcResult<()> {
        self.assert_connection()?;
        self.inner.patterns.lock().remove(pattern);
        self.inner
            .broker
            .unbind(&self.inner.options.exchange, pattern, &self.queue());
        Ok(())
    }

    fn on_error(&self, listener: ErrorListener) -> ListenerId {
        self.inner.errors.add_listener(listener)
    }

    fn off_error(&self, id: ListenerId) -> bool {
        self.inner.errors.remove_listener(id)
    }
}
