// 模組定義
pub mod config;
pub mod event;
pub mod exception;
pub mod logging;
pub mod messaging;
pub mod rpc;

// 重新導出常用類型
pub use event::{ErrorChannel, ErrorListener, ListenerId};
pub use exception::{Exception, ExceptionKind, ExceptionRegistry, RpcResult};
pub use messaging::{
    BrokerMessage, ConnectionOptions, InMemoryBroker, MessageBrokerAddOn, MessageBrokerConnector,
    PublishOptions, TopicMessageBrokerConnector,
};
pub use rpc::{
    action_fn, HttpRpcCaller, HttpRpcHandler, MessageBrokerRpcCaller, MessageBrokerRpcHandler,
    RpcCaller, RpcCallerOptions, RpcCodec, RpcHandler, RpcHandlerParams, RpcRequest, RpcResponse,
};
