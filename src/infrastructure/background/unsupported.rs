use crate::application::ports::{BackgroundTaskRegistrar, DrainTrigger};
use crate::shared::error::AppError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// バックグラウンド実行枠が無いプラットフォーム向け。登録は常に `Ok(false)`。
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedBackgroundRegistrar;

#[async_trait]
impl BackgroundTaskRegistrar for UnsupportedBackgroundRegistrar {
    fn is_supported(&self) -> bool {
        false
    }

    async fn register(
        &self,
        name: &str,
        _interval: Duration,
        _trigger: Arc<dyn DrainTrigger>,
    ) -> Result<bool, AppError> {
        tracing::info!(
            target: "offline::background",
            task = name,
            "background tasks are not supported on this platform"
        );
        Ok(false)
    }

    async fn unregister(&self, _name: &str) -> Result<bool, AppError> {
        Ok(false)
    }

    async fn is_registered(&self, _name: &str) -> bool {
        false
    }
}
