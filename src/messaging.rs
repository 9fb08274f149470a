// 消息系統模組
// 提供基於主題交換機的訊息代理連接器，以及測試與本機開發使用的行程內代理

// 導出子模組
pub mod addon;
pub mod connector;
pub mod memory;
pub mod message;
pub mod rabbitmq;

// 重新導出常用類型
pub use addon::MessageBrokerAddOn;
pub use connector::{ConnectorFactory, MessageBrokerConnector, QueueSettings, SubscriptionSet};
pub use memory::{InMemoryBroker, InMemoryConnector};
pub use message::{
    message_handler, Acknowledger, BrokerMessage, ConnectionOptions, MessageHandleFunction,
    MessageProperties, PublishOptions, RawDelivery,
};
pub use rabbitmq::TopicMessageBrokerConnector;
