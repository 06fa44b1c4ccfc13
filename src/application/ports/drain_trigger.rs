use crate::domain::entities::DrainResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTriggerReason {
    Manual,
    Reconnected,
    Background,
    Foreground,
}

impl fmt::Display for SyncTriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            SyncTriggerReason::Manual => "manual",
            SyncTriggerReason::Reconnected => "reconnected",
            SyncTriggerReason::Background => "background",
            SyncTriggerReason::Foreground => "foreground",
        };
        write!(f, "{value}")
    }
}

/// 接続監視やバックグラウンドタスクから同期を起動するための入口。
#[async_trait]
pub trait DrainTrigger: Send + Sync {
    async fn pending_count(&self) -> usize;

    async fn drain_now(&self, reason: SyncTriggerReason) -> DrainResult;
}
