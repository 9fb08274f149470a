use lapin::Channel;
use std::fmt;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};

/// 通道關閉後等待多久再重建，讓底層連線有時間回報狀態
pub const CHANNEL_RECREATE_DELAY: Duration = Duration::from_millis(100);

/// 連接器持有的兩種通道
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Consume,
    Publish,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Consume => write!(f, "consume"),
            ChannelKind::Publish => write!(f, "publish"),
        }
    }
}

/// 通道的世代編號，以及建立它的連線 epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelStamp {
    pub generation: u64,
    pub epoch: u64,
}

/// 通道及其識別
#[derive(Clone)]
pub struct ChannelEntry {
    pub channel: Channel,
    pub stamp: ChannelStamp,
}

/// 延遲建立的單一通道槽位
pub struct ChannelSlot {
    entry: Mutex<Option<ChannelEntry>>,
}

impl ChannelSlot {
    pub fn new() -> Self {
        Self {
            entry: Mutex::new(None),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, Option<ChannelEntry>> {
        self.entry.lock().await
    }

    /// 目前的通道，不會建立新通道
    pub async fn current(&self) -> Option<Channel> {
        self.entry.lock().await.as_ref().map(|e| e.channel.clone())
    }

    /// 取出通道，槽位清空後舊通道的關閉事件不會再觸發重建
    pub async fn take(&self) -> Option<Channel> {
        self.entry.lock().await.take().map(|e| e.channel)
    }
}

impl Default for ChannelSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// 槽位中通道的識別
pub fn stamp_of(entry: &Option<ChannelEntry>) -> Option<ChannelStamp> {
    entry.as_ref().map(|e| e.stamp)
}

/// 槽位是否仍指向指定世代的通道
pub fn is_same_generation(stamp: Option<ChannelStamp>, generation: u64) -> bool {
    matches!(stamp, Some(s) if s.generation == generation)
}

/// 重新連線後，只有仍屬於舊連線的通道需要重建
pub fn needs_reset(stamp: Option<ChannelStamp>, epoch: u64) -> bool {
    matches!(stamp, Some(s) if s.epoch != epoch)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stamp(generation: u64, epoch: u64) -> Option<ChannelStamp> {
        Some(ChannelStamp { generation, epoch })
    }

    #[test]
    fn test_same_generation() {
        assert!(!is_same_generation(None, 1));
        assert!(is_same_generation(stamp(3, 1), 3));
        // 槽位已被較新的通道取代
        assert!(!is_same_generation(stamp(4, 1), 3));
    }

    #[test]
    fn test_needs_reset_only_for_previous_connection() {
        assert!(!needs_reset(None, 2));
        assert!(needs_reset(stamp(1, 1), 2));
        // 重連後已在新連線上重建的通道不再重建
        assert!(!needs_reset(stamp(2, 2), 2));
    }

    #[tokio::test]
    async fn test_empty_slot() {
        let slot = ChannelSlot::new();
        assert!(slot.current().await.is_none());
        assert!(slot.take().await.is_none());
        assert!(stamp_of(&*slot.lock().await).is_none());
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ChannelKind::Consume.to_string(), "consume");
        assert_eq!(ChannelKind::Publish.to_string(), "publish");
    }
}
