// 直接 RPC 模組
// 呼叫端以 HTTP POST 呼叫 `/<module>/<action>`，處理端為內嵌的 HTTP 伺服器

// 導出子模組
pub mod caller;
pub mod handler;

// 重新導出常用結構
pub use caller::HttpRpcCaller;
pub use handler::{is_url_safe, HttpRpcHandler, DEFAULT_HANDLER_PORT};
