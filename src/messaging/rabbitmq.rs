// RabbitMQ 模組
// 以 lapin 實作主題交換機連接器：連線生命週期、自動重連與通道重建

// 導出子模組
pub mod channel;
pub mod connection;
pub mod connector;

// 重新導出常用結構
pub use channel::{ChannelKind, CHANNEL_RECREATE_DELAY};
pub use connection::ConnectionLink;
pub use connector::TopicMessageBrokerConnector;
