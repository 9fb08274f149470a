// 中介 RPC 模組
// 請求發布到 `request.<module>.<action>`，回應經由帶關聯 ID 的暫時主題送回呼叫端

// 導出子模組
pub mod caller;
pub mod handler;

// 重新導出常用結構
pub use caller::MessageBrokerRpcCaller;
pub use handler::MessageBrokerRpcHandler;
