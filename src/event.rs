// event.rs - 錯誤事件通道
//
// 連線錯誤、通道錯誤、處理器拋出的例外等帶外失敗不會出現在呼叫的結果中，
// 而是透過此通道通知已註冊的監聽者。

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::error;

/// 錯誤監聽器
pub type ErrorListener = Arc<dyn Fn(Arc<anyhow::Error>) + Send + Sync>;

/// 註冊監聽器時取得的代號，用來移除該監聽器
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// 帶外錯誤通道
#[derive(Clone, Default)]
pub struct ErrorChannel {
    listeners: Arc<RwLock<Vec<(ListenerId, ErrorListener)>>>,
    next_id: Arc<AtomicU64>,
}

impl ErrorChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// 註冊監聽器
    pub fn on_error<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(Arc<anyhow::Error>) + Send + Sync + 'static,
    {
        self.add_listener(Arc::new(listener))
    }

    /// 註冊已包裝的監聽器
    pub fn add_listener(&self, listener: ErrorListener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    /// 移除監聽器，代號不存在時返回 `false`
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(current, _)| *current != id);
        listeners.len() != before
    }

    /// 發出錯誤
    pub fn emit<E>(&self, err: E)
    where
        E: Into<anyhow::Error>,
    {
        self.emit_shared(Arc::new(err.into()));
    }

    /// 轉發已共享的錯誤
    pub fn emit_shared(&self, err: Arc<anyhow::Error>) {
        // 複製一份，避免監聽器內部再註冊時死鎖
        let listeners = self.listeners.read().clone();
        if listeners.is_empty() {
            error!("Unobserved communication error: {:#}", err);
            return;
        }
        for (_, listener) in listeners {
            listener(err.clone());
        }
    }

    /// 清除所有監聽器
    pub fn clear(&self) {
        self.listeners.write().clear();
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }
}

impl std::fmt::Debug for ErrorChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorChannel")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
