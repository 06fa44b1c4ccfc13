use crate::application::ports::{
    BackgroundTaskRegistrar, DrainTrigger, RemoteStore, SyncTriggerReason,
};
use crate::domain::entities::DrainResult;
use crate::shared::config::{ConnectivityConfig, SyncConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

pub const BACKGROUND_TASK_NAME: &str = "elite-sync-drain";

const LOG_TARGET: &str = "offline::connectivity";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectivityState {
    /// `None` はまだプラットフォームから通知が無い状態
    pub is_network_reachable: Option<bool>,
    pub is_remote_reachable: bool,
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl ConnectivityState {
    pub fn is_connected(&self) -> bool {
        self.is_network_reachable == Some(true)
    }
}

/// ネットワーク / リモートの到達性を監視し、復帰時にドレインを起動する。
pub struct ConnectivityMonitor {
    remote: Arc<dyn RemoteStore>,
    trigger: Arc<dyn DrainTrigger>,
    registrar: Arc<dyn BackgroundTaskRegistrar>,
    poll_interval: Duration,
    background_interval: Duration,
    auto_sync: bool,
    state_tx: watch::Sender<ConnectivityState>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectivityMonitor {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        trigger: Arc<dyn DrainTrigger>,
        registrar: Arc<dyn BackgroundTaskRegistrar>,
        connectivity: &ConnectivityConfig,
        sync: &SyncConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectivityState::default());
        Self {
            remote,
            trigger,
            registrar,
            poll_interval: Duration::from_secs(connectivity.poll_interval_secs.max(1)),
            background_interval: Duration::from_secs(sync.background_interval_secs.max(1)),
            auto_sync: sync.auto_sync,
            state_tx,
            poller: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> ConnectivityState {
        self.state_tx.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn is_remote_reachable(&self) -> bool {
        self.state().is_remote_reachable
    }

    /// Platform input. A transition to reachable pings the remote and, when
    /// operations are waiting, drains the queue; the drain result is returned.
    pub async fn set_network_reachable(&self, reachable: Option<bool>) -> Option<DrainResult> {
        let previous = self.state().is_network_reachable;
        self.state_tx.send_modify(|state| {
            state.is_network_reachable = reachable;
            if reachable == Some(false) {
                state.is_remote_reachable = false;
                state.last_checked_at = Some(Utc::now());
            }
        });

        if previous != reachable {
            tracing::info!(
                target: LOG_TARGET,
                previous = ?previous,
                current = ?reachable,
                "network reachability changed"
            );
        }

        let became_reachable = reachable == Some(true) && previous != Some(true);
        if !became_reachable {
            return None;
        }

        self.check_remote_reachable().await;

        if !self.auto_sync {
            return None;
        }
        let pending = self.trigger.pending_count().await;
        if pending == 0 {
            return None;
        }

        tracing::info!(target: LOG_TARGET, pending, "network restored; draining queue");
        Some(self.trigger.drain_now(SyncTriggerReason::Reconnected).await)
    }

    /// ネットワーク断のときはリモートに問い合わせずに `false`。
    pub async fn check_remote_reachable(&self) -> bool {
        if self.state().is_network_reachable == Some(false) {
            return false;
        }

        let reachable = match self.remote.ping().await {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!(target: LOG_TARGET, error = %err, "remote ping failed");
                false
            }
        };

        self.state_tx.send_if_modified(|state| {
            let changed = state.is_remote_reachable != reachable;
            state.is_remote_reachable = reachable;
            state.last_checked_at = Some(Utc::now());
            changed
        });
        reachable
    }

    /// Starts the polling loop; pings only run while the network is reachable.
    pub async fn start(self: &Arc<Self>) {
        let mut poller = self.poller.lock().await;
        if poller.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let monitor = Arc::downgrade(self);
        let period = self.poll_interval;
        *poller = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(monitor) = monitor.upgrade() else {
                    break;
                };
                if monitor.state().is_network_reachable == Some(true) {
                    monitor.check_remote_reachable().await;
                }
            }
        }));
        tracing::debug!(target: LOG_TARGET, period_secs = period.as_secs(), "connectivity polling started");
    }

    pub async fn shutdown(&self) {
        if let Some(handle) = self.poller.lock().await.take() {
            handle.abort();
            tracing::debug!(target: LOG_TARGET, "connectivity polling stopped");
        }
    }

    /// 未対応環境では `false`（フォアグラウンドのみで同期）。
    pub async fn enable_background_sync(&self) -> bool {
        if !self.registrar.is_supported() {
            tracing::info!(target: LOG_TARGET, "background sync unsupported; staying foreground-only");
            return false;
        }

        match self
            .registrar
            .register(
                BACKGROUND_TASK_NAME,
                self.background_interval,
                self.trigger.clone(),
            )
            .await
        {
            Ok(registered) => registered,
            Err(err) => {
                tracing::warn!(target: LOG_TARGET, error = %err, "failed to register background sync");
                false
            }
        }
    }

    pub async fn disable_background_sync(&self) -> bool {
        match self.registrar.unregister(BACKGROUND_TASK_NAME).await {
            Ok(removed) => removed,
            Err(err) => {
                tracing::warn!(target: LOG_TARGET, error = %err, "failed to unregister background sync");
                false
            }
        }
    }

    pub async fn is_background_sync_enabled(&self) -> bool {
        self.registrar.is_registered(BACKGROUND_TASK_NAME).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::background::{
        TokioBackgroundRegistrar, UnsupportedBackgroundRegistrar,
    };
    use crate::infrastructure::remote::InMemoryRemoteStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubTrigger {
        pending: AtomicUsize,
        drains: AtomicUsize,
    }

    impl StubTrigger {
        fn with_pending(pending: usize) -> Arc<Self> {
            Arc::new(Self {
                pending: AtomicUsize::new(pending),
                drains: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl DrainTrigger for StubTrigger {
        async fn pending_count(&self) -> usize {
            self.pending.load(Ordering::SeqCst)
        }

        async fn drain_now(&self, _reason: SyncTriggerReason) -> DrainResult {
            self.drains.fetch_add(1, Ordering::SeqCst);
            DrainResult::new(self.pending.swap(0, Ordering::SeqCst) as u32, 0)
        }
    }

    fn monitor(
        remote: &InMemoryRemoteStore,
        trigger: Arc<StubTrigger>,
        registrar: Arc<dyn BackgroundTaskRegistrar>,
    ) -> Arc<ConnectivityMonitor> {
        Arc::new(ConnectivityMonitor::new(
            Arc::new(remote.clone()),
            trigger,
            registrar,
            &ConnectivityConfig {
                poll_interval_secs: 30,
            },
            &SyncConfig {
                auto_sync: true,
                resolve_conflicts_automatically: false,
                background_interval_secs: 900,
            },
        ))
    }

    #[tokio::test]
    async fn test_going_offline_skips_remote_ping() {
        let remote = InMemoryRemoteStore::new();
        let monitor = monitor(
            &remote,
            StubTrigger::with_pending(0),
            Arc::new(UnsupportedBackgroundRegistrar),
        );

        assert!(monitor.set_network_reachable(Some(false)).await.is_none());
        assert!(!monitor.is_remote_reachable());
        assert!(!monitor.check_remote_reachable().await);
        assert_eq!(remote.ping_calls(), 0);
    }

    #[tokio::test]
    async fn test_reconnect_with_pending_queue_triggers_drain() {
        let remote = InMemoryRemoteStore::new();
        let trigger = StubTrigger::with_pending(2);
        let monitor = monitor(&remote, trigger.clone(), Arc::new(UnsupportedBackgroundRegistrar));

        monitor.set_network_reachable(Some(false)).await;
        let result = monitor.set_network_reachable(Some(true)).await;

        assert_eq!(result, Some(DrainResult::new(2, 0)));
        assert!(monitor.is_connected());
        assert!(monitor.is_remote_reachable());
        assert_eq!(remote.ping_calls(), 1);

        // 既に接続中なら再度ドレインしない
        assert!(monitor.set_network_reachable(Some(true)).await.is_none());
        assert_eq!(trigger.drains.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reconnect_with_empty_queue_only_pings() {
        let remote = InMemoryRemoteStore::new();
        let trigger = StubTrigger::with_pending(0);
        let monitor = monitor(&remote, trigger.clone(), Arc::new(UnsupportedBackgroundRegistrar));

        let mut receiver = monitor.subscribe();
        assert!(monitor.set_network_reachable(Some(true)).await.is_none());
        assert!(receiver.has_changed().unwrap());
        assert!(receiver.borrow_and_update().is_remote_reachable);
        assert_eq!(trigger.drains.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unsupported_background_sync_degrades() {
        let remote = InMemoryRemoteStore::new();
        let monitor = monitor(
            &remote,
            StubTrigger::with_pending(0),
            Arc::new(UnsupportedBackgroundRegistrar),
        );

        assert!(!monitor.enable_background_sync().await);
        assert!(!monitor.is_background_sync_enabled().await);
        assert!(!monitor.disable_background_sync().await);
    }

    #[tokio::test]
    async fn test_background_sync_registration_roundtrip() {
        let remote = InMemoryRemoteStore::new();
        let registrar = Arc::new(TokioBackgroundRegistrar::new());
        let monitor = monitor(&remote, StubTrigger::with_pending(0), registrar.clone());

        assert!(monitor.enable_background_sync().await);
        assert!(monitor.is_background_sync_enabled().await);
        assert_eq!(
            registrar.registered_interval(BACKGROUND_TASK_NAME).await,
            Some(Duration::from_secs(900))
        );
        assert!(monitor.disable_background_sync().await);
        assert!(!monitor.is_background_sync_enabled().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_only_pings_while_network_reachable() {
        let remote = InMemoryRemoteStore::new();
        let monitor = monitor(
            &remote,
            StubTrigger::with_pending(0),
            Arc::new(UnsupportedBackgroundRegistrar),
        );

        monitor.start().await;
        tokio::time::sleep(Duration::from_secs(65)).await;
        assert_eq!(remote.ping_calls(), 0);

        monitor.set_network_reachable(Some(true)).await;
        assert_eq!(remote.ping_calls(), 1);

        remote.set_reachable(false);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(remote.ping_calls(), 2);
        assert!(!monitor.is_remote_reachable());

        monitor.shutdown().await;
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(remote.ping_calls(), 2);
    }
}
