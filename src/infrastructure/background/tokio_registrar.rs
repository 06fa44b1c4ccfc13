use crate::application::ports::{BackgroundTaskRegistrar, DrainTrigger, SyncTriggerReason};
use crate::shared::error::AppError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

struct RegisteredTask {
    handle_id: Uuid,
    interval: Duration,
    handle: JoinHandle<()>,
}

/// `tokio::time::interval` でドレインを定期起動するレジストラ。
///
/// 同じ名前で再登録すると前のタスクは中断されて置き換わる。
#[derive(Clone, Default)]
pub struct TokioBackgroundRegistrar {
    tasks: Arc<Mutex<HashMap<String, RegisteredTask>>>,
}

impl TokioBackgroundRegistrar {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn registered_interval(&self, name: &str) -> Option<Duration> {
        let tasks = self.tasks.lock().await;
        tasks.get(name).map(|task| task.interval)
    }

    pub async fn shutdown(&self) {
        let mut tasks = self.tasks.lock().await;
        for (name, task) in tasks.drain() {
            task.handle.abort();
            tracing::debug!(target: "offline::background", task = %name, "background task aborted");
        }
    }
}

#[async_trait]
impl BackgroundTaskRegistrar for TokioBackgroundRegistrar {
    fn is_supported(&self) -> bool {
        true
    }

    async fn register(
        &self,
        name: &str,
        interval: Duration,
        trigger: Arc<dyn DrainTrigger>,
    ) -> Result<bool, AppError> {
        if interval.is_zero() {
            return Err(AppError::ValidationError(
                "background interval must be greater than zero".to_string(),
            ));
        }

        let handle_id = Uuid::new_v4();
        let task_name = name.to_string();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // 最初の tick は即時に完了するため読み捨てる
            ticker.tick().await;

            loop {
                ticker.tick().await;

                if trigger.pending_count().await == 0 {
                    continue;
                }
                let result = trigger.drain_now(SyncTriggerReason::Background).await;
                tracing::info!(
                    target: "offline::background",
                    task = %task_name,
                    handle = %handle_id,
                    success = result.success_count,
                    conflicts = result.conflict_count,
                    failed = result.failed_count,
                    "background drain finished"
                );
            }
        });

        let mut tasks = self.tasks.lock().await;
        if let Some(previous) = tasks.insert(
            name.to_string(),
            RegisteredTask {
                handle_id,
                interval,
                handle,
            },
        ) {
            previous.handle.abort();
            tracing::debug!(
                target: "offline::background",
                task = name,
                replaced = %previous.handle_id,
                "background task replaced"
            );
        }

        Ok(true)
    }

    async fn unregister(&self, name: &str) -> Result<bool, AppError> {
        let mut tasks = self.tasks.lock().await;
        match tasks.remove(name) {
            Some(task) => {
                task.handle.abort();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn is_registered(&self, name: &str) -> bool {
        let tasks = self.tasks.lock().await;
        tasks
            .get(name)
            .map(|task| !task.handle.is_finished())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::DrainResult;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTrigger {
        pending: usize,
        drains: AtomicUsize,
    }

    #[async_trait]
    impl DrainTrigger for CountingTrigger {
        async fn pending_count(&self) -> usize {
            self.pending
        }

        async fn drain_now(&self, reason: SyncTriggerReason) -> DrainResult {
            assert_eq!(reason, SyncTriggerReason::Background);
            self.drains.fetch_add(1, Ordering::SeqCst);
            DrainResult::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_registered_task_drains_on_interval() {
        let registrar = TokioBackgroundRegistrar::new();
        let trigger = Arc::new(CountingTrigger {
            pending: 1,
            drains: AtomicUsize::new(0),
        });

        let registered = registrar
            .register("sync", Duration::from_secs(60), trigger.clone())
            .await
            .unwrap();
        assert!(registered);
        assert!(registrar.is_registered("sync").await);

        tokio::time::sleep(Duration::from_secs(185)).await;
        assert_eq!(trigger.drains.load(Ordering::SeqCst), 3);

        assert!(registrar.unregister("sync").await.unwrap());
        assert!(!registrar.is_registered("sync").await);
        assert!(!registrar.unregister("sync").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_queue_skips_drain() {
        let registrar = TokioBackgroundRegistrar::new();
        let trigger = Arc::new(CountingTrigger {
            pending: 0,
            drains: AtomicUsize::new(0),
        });

        registrar
            .register("sync", Duration::from_secs(10), trigger.clone())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(35)).await;

        assert_eq!(trigger.drains.load(Ordering::SeqCst), 0);
        registrar.shutdown().await;
    }

    #[tokio::test]
    async fn test_zero_interval_is_rejected() {
        let registrar = TokioBackgroundRegistrar::new();
        let trigger = Arc::new(CountingTrigger {
            pending: 0,
            drains: AtomicUsize::new(0),
        });

        let result = registrar.register("sync", Duration::ZERO, trigger).await;
        assert!(matches!(result, Err(AppError::ValidationError(_))));
    }
}
