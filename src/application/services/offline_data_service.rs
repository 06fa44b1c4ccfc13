use crate::application::ports::{RemoteFilter, RemoteStore};
use crate::application::services::cache_service::CacheService;
use crate::application::services::connectivity_service::ConnectivityMonitor;
use crate::application::services::operation_queue::OperationQueue;
use crate::domain::value_objects::{
    OperationId, OperationType, RecordId, RecordPayload, TableName,
};
use crate::shared::error::RemoteStoreError;
use serde_json::Value;
use std::sync::Arc;

const LOG_TARGET: &str = "offline::data";
const QUERY_CACHE_PREFIX: &str = "query:";

/// Result of a write made through [`OfflineDataService`].
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    /// リモートに反映済み（リモートが返したレコード）
    Applied(RecordPayload),
    /// キューに積んだ。`optimistic` は UI に即時表示するための値
    Queued {
        operation_id: OperationId,
        optimistic: RecordPayload,
    },
    /// 再試行しても成功しない失敗
    Failed(String),
}

impl WriteOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, WriteOutcome::Applied(_))
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, WriteOutcome::Queued { .. })
    }

    /// 表示に使うレコード（確定値または楽観値）
    pub fn record(&self) -> Option<&RecordPayload> {
        match self {
            WriteOutcome::Applied(record) => Some(record),
            WriteOutcome::Queued { optimistic, .. } => Some(optimistic),
            WriteOutcome::Failed(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePolicy {
    /// キャッシュにあればそれを返し、無ければリモートから取得して保存する
    #[default]
    CacheFirst,
    /// 常にリモートから取得し、キャッシュを更新する
    NetworkOnly,
    /// キャッシュのみ参照する
    CacheOnly,
}

/// UI からの書き込みを、オンラインならリモートへ、オフラインならキューへ振り分ける。
pub struct OfflineDataService {
    remote: Arc<dyn RemoteStore>,
    queue: Arc<OperationQueue>,
    cache: Arc<CacheService>,
    connectivity: Arc<ConnectivityMonitor>,
}

impl OfflineDataService {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        queue: Arc<OperationQueue>,
        cache: Arc<CacheService>,
        connectivity: Arc<ConnectivityMonitor>,
    ) -> Self {
        Self {
            remote,
            queue,
            cache,
            connectivity,
        }
    }

    pub async fn insert(&self, table: &str, data: RecordPayload) -> WriteOutcome {
        let table = match TableName::new(table.to_string()) {
            Ok(table) => table,
            Err(err) => return WriteOutcome::Failed(err),
        };

        if !self.should_try_remote() {
            return self.enqueue(OperationType::Create, &table, data).await;
        }

        match self.remote.insert(&table, &data).await {
            Ok(record) => {
                self.invalidate(&table).await;
                WriteOutcome::Applied(record)
            }
            Err(err) => self.on_remote_error(OperationType::Create, &table, data, err).await,
        }
    }

    pub async fn update(&self, table: &str, id: &str, data: RecordPayload) -> WriteOutcome {
        let (table, record_id) = match Self::target(table, id) {
            Ok(target) => target,
            Err(err) => return WriteOutcome::Failed(err),
        };
        let mut data = data;
        data.insert("id", Value::String(record_id.as_str().to_string()));

        if !self.should_try_remote() || self.has_pending_for(&table, &record_id).await {
            return self.enqueue(OperationType::Update, &table, data).await;
        }

        match self.remote.update(&table, &record_id, &data).await {
            Ok(record) => {
                self.invalidate(&table).await;
                WriteOutcome::Applied(record)
            }
            Err(err) => self.on_remote_error(OperationType::Update, &table, data, err).await,
        }
    }

    pub async fn delete(&self, table: &str, id: &str) -> WriteOutcome {
        let (table, record_id) = match Self::target(table, id) {
            Ok(target) => target,
            Err(err) => return WriteOutcome::Failed(err),
        };
        let mut data = RecordPayload::default();
        data.insert("id", Value::String(record_id.as_str().to_string()));

        if !self.should_try_remote() || self.has_pending_for(&table, &record_id).await {
            return self.enqueue(OperationType::Delete, &table, data).await;
        }

        match self.remote.delete(&table, &record_id).await {
            Ok(()) => {
                self.invalidate(&table).await;
                WriteOutcome::Applied(data)
            }
            Err(err) => self.on_remote_error(OperationType::Delete, &table, data, err).await,
        }
    }

    /// Cache-aside read keyed by table and filters.
    pub async fn fetch_one(
        &self,
        table: &str,
        filters: &[RemoteFilter],
        policy: CachePolicy,
    ) -> Option<RecordPayload> {
        let table = match TableName::new(table.to_string()) {
            Ok(table) => table,
            Err(err) => {
                tracing::warn!(target: LOG_TARGET, error = %err, "invalid table name");
                return None;
            }
        };
        let cache_key = Self::query_key(&table, filters);

        if policy != CachePolicy::NetworkOnly {
            if let Some(cached) = self.cache.get::<RecordPayload>(&cache_key).await {
                return Some(cached);
            }
            if policy == CachePolicy::CacheOnly {
                return None;
            }
        }

        match self.remote.fetch_one(&table, filters).await {
            Ok(Some(record)) => {
                self.cache.put(&cache_key, &record, None, None).await;
                Some(record)
            }
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(target: LOG_TARGET, table = %table, error = %err, "remote read failed");
                None
            }
        }
    }

    fn should_try_remote(&self) -> bool {
        // 未通知（None）の間はリモートを試す
        self.connectivity.state().is_network_reachable != Some(false)
    }

    async fn has_pending_for(&self, table: &TableName, record_id: &RecordId) -> bool {
        self.queue.list_pending().await.iter().any(|operation| {
            &operation.table == table
                && operation
                    .record_id()
                    .is_some_and(|pending_id| &pending_id == record_id)
        })
    }

    async fn on_remote_error(
        &self,
        op_type: OperationType,
        table: &TableName,
        data: RecordPayload,
        err: RemoteStoreError,
    ) -> WriteOutcome {
        if err.is_retryable() {
            tracing::info!(
                target: LOG_TARGET,
                table = %table,
                op_type = %op_type,
                error = %err,
                "remote write deferred to the queue"
            );
            return self.enqueue(op_type, table, data).await;
        }

        tracing::warn!(target: LOG_TARGET, table = %table, op_type = %op_type, error = %err, "remote write rejected");
        WriteOutcome::Failed(err.to_string())
    }

    async fn enqueue(
        &self,
        op_type: OperationType,
        table: &TableName,
        data: RecordPayload,
    ) -> WriteOutcome {
        match self.queue.enqueue(op_type, table.as_str(), data.clone()).await {
            Ok(operation_id) => {
                let mut optimistic = data;
                if !optimistic.contains_field("id") {
                    optimistic.insert(
                        "id",
                        Value::String(format!("local_{}", operation_id.as_str())),
                    );
                }
                WriteOutcome::Queued {
                    operation_id,
                    optimistic,
                }
            }
            Err(err) => {
                tracing::warn!(target: LOG_TARGET, table = %table, error = %err, "failed to queue write");
                WriteOutcome::Failed(err.to_string())
            }
        }
    }

    async fn invalidate(&self, table: &TableName) {
        let prefix = format!("{QUERY_CACHE_PREFIX}{}:", table.as_str());
        self.cache.remove_by_prefix(&prefix).await;
    }

    fn target(table: &str, id: &str) -> Result<(TableName, RecordId), String> {
        Ok((
            TableName::new(table.to_string())?,
            RecordId::new(id.to_string())?,
        ))
    }

    fn query_key(table: &TableName, filters: &[RemoteFilter]) -> String {
        let mut pairs: Vec<(&str, &Value)> = filters
            .iter()
            .map(|filter| (filter.column.as_str(), &filter.value))
            .collect();
        pairs.sort_by(|a, b| a.0.cmp(b.0));
        let canonical = serde_json::to_string(&pairs).unwrap_or_default();
        format!("{QUERY_CACHE_PREFIX}{}:{canonical}", table.as_str())
    }
}
