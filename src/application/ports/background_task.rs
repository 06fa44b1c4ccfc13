use super::drain_trigger::DrainTrigger;
use crate::shared::error::AppError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// OS のバックグラウンド実行枠への登録口。
///
/// 対応していない環境では `is_supported()` が `false` を返し、
/// `register` は `Ok(false)` で何もしない（フォアグラウンドのみで同期する）。
#[async_trait]
pub trait BackgroundTaskRegistrar: Send + Sync {
    fn is_supported(&self) -> bool;

    async fn register(
        &self,
        name: &str,
        interval: Duration,
        trigger: Arc<dyn DrainTrigger>,
    ) -> Result<bool, AppError>;

    async fn unregister(&self, name: &str) -> Result<bool, AppError>;

    async fn is_registered(&self, name: &str) -> bool;
}
