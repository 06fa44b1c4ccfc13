use crate::application::ports::{BackgroundTaskRegistrar, KeyValueStore, RemoteStore};
use crate::application::services::{
    CacheService, ConflictResolver, ConnectivityMonitor, ConnectivityState, DrainOptions,
    OfflineDataService, OperationQueue, SyncOrchestrator, SyncStatusSnapshot,
};
use crate::domain::entities::{CacheStats, Conflict, DrainResult, SyncOperation};
use crate::domain::value_objects::{
    ConflictId, OperationId, OperationType, RecordPayload, ResolutionStrategy,
};
use crate::infrastructure::background::TokioBackgroundRegistrar;
use crate::infrastructure::database::ConnectionPool;
use crate::infrastructure::offline::{metrics, DrainMetricsSnapshot};
use crate::infrastructure::remote::{PostgrestRemoteStore, UnconfiguredRemoteStore};
use crate::infrastructure::storage::SqliteKeyValueStore;
use crate::shared::config::AppConfig;
use crate::shared::error::AppError;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;

const LOG_TARGET: &str = "offline::state";

/// アプリ全体で共有するオフライン同期の状態。UI はここだけを触る。
#[derive(Clone)]
pub struct OfflineSyncState {
    pub config: AppConfig,
    pub cache: Arc<CacheService>,
    pub queue: Arc<OperationQueue>,
    pub conflicts: Arc<ConflictResolver>,
    pub sync: Arc<SyncOrchestrator>,
    pub connectivity: Arc<ConnectivityMonitor>,
    pub data: Arc<OfflineDataService>,
    pool: Option<ConnectionPool>,
}

impl OfflineSyncState {
    /// 依存を外から差し込んで組み立てる。
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        remote: Arc<dyn RemoteStore>,
        registrar: Arc<dyn BackgroundTaskRegistrar>,
        config: AppConfig,
    ) -> Self {
        let cache = Arc::new(CacheService::new(store.clone(), config.cache.clone()));
        let queue = Arc::new(OperationQueue::new(store.clone()));
        let conflicts = Arc::new(ConflictResolver::new(
            store,
            remote.clone(),
            config.conflicts.clone(),
        ));
        let sync = Arc::new(SyncOrchestrator::new(
            queue.clone(),
            conflicts.clone(),
            remote.clone(),
            config.sync.clone(),
        ));
        let connectivity = Arc::new(ConnectivityMonitor::new(
            remote.clone(),
            sync.clone(),
            registrar,
            &config.connectivity,
            &config.sync,
        ));
        let data = Arc::new(OfflineDataService::new(
            remote,
            queue.clone(),
            cache.clone(),
            connectivity.clone(),
        ));

        Self {
            config,
            cache,
            queue,
            conflicts,
            sync,
            connectivity,
            data,
            pool: None,
        }
    }

    /// Opens the sqlite store, runs migrations and connects the configured remote.
    ///
    /// Without `remote.url` and `remote.api_key` the queue only accumulates;
    /// every drain leaves operations in place until a remote is configured.
    pub async fn initialize(config: AppConfig) -> anyhow::Result<Self> {
        config.validate().map_err(|e| anyhow::anyhow!(e))?;

        let pool = ConnectionPool::new(
            &config.storage.database_url,
            config.storage.max_connections,
        )
        .await?;
        pool.migrate().await?;
        let store = Arc::new(SqliteKeyValueStore::new(pool.get_pool().clone()));

        let remote: Arc<dyn RemoteStore> = match PostgrestRemoteStore::from_config(&config.remote)?
        {
            Some(client) => Arc::new(client),
            None => {
                tracing::warn!(
                    target: LOG_TARGET,
                    "remote store not configured; writes stay queued"
                );
                Arc::new(UnconfiguredRemoteStore)
            }
        };

        let mut state = Self::new(
            store,
            remote,
            Arc::new(TokioBackgroundRegistrar::new()),
            config,
        );
        state.pool = Some(pool);
        Ok(state)
    }

    /// 接続監視のポーリングを開始する。
    pub async fn start(&self) {
        self.connectivity.start().await;
    }

    /// バックグラウンドドレインとポーリングを止めてからプールを閉じる。
    pub async fn shutdown(&self) {
        self.connectivity.disable_background_sync().await;
        self.connectivity.shutdown().await;
        if let Some(pool) = &self.pool {
            pool.close().await;
        }
        tracing::info!(target: LOG_TARGET, "offline sync state shut down");
    }

    // --- queue ---

    pub async fn enqueue_create(
        &self,
        table: &str,
        data: RecordPayload,
    ) -> Result<OperationId, AppError> {
        self.queue.enqueue(OperationType::Create, table, data).await
    }

    pub async fn enqueue_update(
        &self,
        table: &str,
        id: &str,
        data: RecordPayload,
    ) -> Result<OperationId, AppError> {
        let mut data = data;
        data.insert("id", Value::String(id.to_string()));
        self.queue.enqueue(OperationType::Update, table, data).await
    }

    pub async fn enqueue_delete(&self, table: &str, id: &str) -> Result<OperationId, AppError> {
        let mut data = RecordPayload::default();
        data.insert("id", Value::String(id.to_string()));
        self.queue.enqueue(OperationType::Delete, table, data).await
    }

    pub async fn list_pending(&self) -> Vec<SyncOperation> {
        self.queue.list_pending().await
    }

    pub async fn drain(&self, options: DrainOptions) -> DrainResult {
        self.sync.drain(options).await
    }

    pub async fn sync_status(&self) -> SyncStatusSnapshot {
        self.sync.status().await
    }

    /// Process-wide drain counters (clean / degraded totals, last outcome).
    pub fn drain_metrics(&self) -> DrainMetricsSnapshot {
        metrics::snapshot()
    }

    // --- cache ---

    pub async fn get_cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    pub async fn set_cache_storage_limit(&self, bytes: u64) -> bool {
        self.cache.set_storage_limit(bytes).await
    }

    pub async fn clear_cache(&self) -> bool {
        self.cache.clear_all().await
    }

    // --- conflicts ---

    pub async fn list_unresolved_conflicts(&self) -> Vec<Conflict> {
        self.conflicts.list_unresolved().await
    }

    pub async fn resolve_conflict(
        &self,
        id: &ConflictId,
        strategy: Option<ResolutionStrategy>,
    ) -> Option<RecordPayload> {
        self.conflicts.resolve_conflict(id, strategy).await
    }

    pub async fn manually_resolve_conflict(&self, id: &ConflictId, data: RecordPayload) -> bool {
        self.conflicts.manually_resolve_conflict(id, data).await
    }

    // --- connectivity ---

    pub fn is_connected(&self) -> bool {
        self.connectivity.is_connected()
    }

    pub fn is_remote_reachable(&self) -> bool {
        self.connectivity.is_remote_reachable()
    }

    pub fn subscribe_connectivity(&self) -> watch::Receiver<ConnectivityState> {
        self.connectivity.subscribe()
    }

    /// OS からのネットワーク到達性通知をそのまま渡す。
    pub async fn set_network_reachable(&self, reachable: Option<bool>) -> Option<DrainResult> {
        self.connectivity.set_network_reachable(reachable).await
    }

    // --- background ---

    pub async fn enable_background_sync(&self) -> bool {
        self.connectivity.enable_background_sync().await
    }

    pub async fn disable_background_sync(&self) -> bool {
        self.connectivity.disable_background_sync().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::background::UnsupportedBackgroundRegistrar;
    use crate::infrastructure::remote::InMemoryRemoteStore;
    use crate::infrastructure::storage::MemoryKeyValueStore;
    use serde_json::json;

    fn state_with(remote: InMemoryRemoteStore) -> OfflineSyncState {
        OfflineSyncState::new(
            Arc::new(MemoryKeyValueStore::new()),
            Arc::new(remote),
            Arc::new(UnsupportedBackgroundRegistrar),
            AppConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_enqueue_helpers_attach_record_id() {
        let state = state_with(InMemoryRemoteStore::new());

        state
            .enqueue_create(
                "workouts",
                RecordPayload::from_value(json!({"title": "Push"})).unwrap(),
            )
            .await
            .unwrap();
        state
            .enqueue_update(
                "workouts",
                "w1",
                RecordPayload::from_value(json!({"title": "Pull"})).unwrap(),
            )
            .await
            .unwrap();
        state.enqueue_delete("workouts", "w2").await.unwrap();

        let pending = state.list_pending().await;
        assert_eq!(pending.len(), 3);
        assert_eq!(pending[0].op_type, OperationType::Create);
        assert_eq!(pending[1].record_id().unwrap().as_str(), "w1");
        assert_eq!(pending[2].record_id().unwrap().as_str(), "w2");
    }

    #[tokio::test]
    async fn test_drain_through_facade() {
        let remote = InMemoryRemoteStore::new();
        let state = state_with(remote.clone());

        state
            .enqueue_create(
                "workout_logs",
                RecordPayload::from_value(json!({"id": "log-1", "weight": 80})).unwrap(),
            )
            .await
            .unwrap();

        let result = state.drain(DrainOptions::default()).await;
        assert_eq!(result, DrainResult::new(1, 0));
        assert!(remote.record("workout_logs", "log-1").await.is_some());
        assert!(state.list_pending().await.is_empty());
        assert_eq!(state.sync_status().await.pending_operations, 0);
    }

    #[tokio::test]
    async fn test_drain_metrics_count_every_drain() {
        let state = state_with(InMemoryRemoteStore::new());
        let before = state.drain_metrics();

        state.drain(DrainOptions::default()).await;

        let after = state.drain_metrics();
        assert!(after.total_clean + after.total_degraded > before.total_clean + before.total_degraded);
        assert!(after.last_result.is_some());
    }

    #[tokio::test]
    async fn test_unsupported_background_sync_is_reported() {
        let state = state_with(InMemoryRemoteStore::new());
        assert!(!state.enable_background_sync().await);
        assert!(!state.disable_background_sync().await);
    }

    #[tokio::test]
    async fn test_cache_surface() {
        let state = state_with(InMemoryRemoteStore::new());
        assert!(state.set_cache_storage_limit(2 * 1024 * 1024).await);
        assert_eq!(state.get_cache_stats().await.storage_limit, 2 * 1024 * 1024);
        assert!(state.clear_cache().await);
        assert_eq!(state.get_cache_stats().await.item_count, 0);
    }
}
