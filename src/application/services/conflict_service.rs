use crate::application::ports::{KeyValueStore, RemoteFilter, RemoteStore};
use crate::domain::entities::{Conflict, SyncOperation};
use crate::domain::value_objects::{
    ConflictId, OperationId, RecordId, RecordPayload, ResolutionStrategy, TableName,
};
use crate::shared::config::ConflictConfig;
use crate::shared::error::AppError;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

pub const CONFLICT_PREFIX: &str = "conflict:";

const LOG_TARGET: &str = "offline::conflicts";

/// キュー内の UPDATE とリモートの現行レコードの食い違いを検出・解決する。
pub struct ConflictResolver {
    store: Arc<dyn KeyValueStore>,
    remote: Arc<dyn RemoteStore>,
    config: ConflictConfig,
}

impl ConflictResolver {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        remote: Arc<dyn RemoteStore>,
        config: ConflictConfig,
    ) -> Self {
        Self {
            store,
            remote,
            config,
        }
    }

    pub fn storage_key(id: &ConflictId) -> String {
        format!("{CONFLICT_PREFIX}{}", id.as_str())
    }

    /// Strategy used when the caller passes none.
    pub fn default_strategy(&self, table: &TableName) -> ResolutionStrategy {
        self.config.strategy_for(table.as_str())
    }

    /// Fetches the remote record (never from cache) and compares the fields
    /// present on both sides. On divergence a `Conflict` is persisted.
    ///
    /// A missing remote record or a failed fetch counts as "no conflict".
    pub async fn detect_conflict(
        &self,
        table: &TableName,
        record_id: &RecordId,
        client_fields: &RecordPayload,
    ) -> bool {
        let now = Utc::now();
        self.detect_logged(table, record_id, client_fields, now, None)
            .await
            .is_some()
    }

    /// `detect_conflict` for a queued UPDATE; the conflict is linked to the operation.
    pub async fn detect_for_operation(&self, operation: &SyncOperation) -> Option<Conflict> {
        let record_id = operation.record_id()?;
        self.detect_logged(
            &operation.table,
            &record_id,
            &operation.data,
            operation.timestamp,
            Some(operation.id.clone()),
        )
        .await
    }

    /// Resolves a pending conflict. Already-resolved conflicts return their stored data.
    ///
    /// `ManualResolution` leaves the conflict pending and returns `None`.
    pub async fn resolve_conflict(
        &self,
        id: &ConflictId,
        strategy: Option<ResolutionStrategy>,
    ) -> Option<RecordPayload> {
        match self.try_resolve(id, strategy).await {
            Ok(resolved) => resolved,
            Err(err) => {
                tracing::warn!(target: LOG_TARGET, conflict_id = %id, error = %err, "conflict resolution failed");
                None
            }
        }
    }

    pub async fn manually_resolve_conflict(&self, id: &ConflictId, data: RecordPayload) -> bool {
        let result = async {
            let mut conflict = self
                .load(id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("conflict {id}")))?;
            conflict.mark_resolved(ResolutionStrategy::ManualResolution, data);
            self.save(&conflict).await
        }
        .await;

        match result {
            Ok(()) => {
                tracing::info!(target: LOG_TARGET, conflict_id = %id, "conflict resolved manually");
                true
            }
            Err(err) => {
                tracing::warn!(target: LOG_TARGET, conflict_id = %id, error = %err, "manual resolution failed");
                false
            }
        }
    }

    /// 未解決のコンフリクト（検出時刻順）
    pub async fn list_unresolved(&self) -> Vec<Conflict> {
        self.list_all()
            .await
            .into_iter()
            .filter(Conflict::is_pending)
            .collect()
    }

    pub async fn list_all(&self) -> Vec<Conflict> {
        match self.load_all().await {
            Ok(conflicts) => conflicts,
            Err(err) => {
                tracing::warn!(target: LOG_TARGET, error = %err, "failed to list conflicts");
                Vec::new()
            }
        }
    }

    pub async fn get_conflict(&self, id: &ConflictId) -> Option<Conflict> {
        match self.load(id).await {
            Ok(conflict) => conflict,
            Err(err) => {
                tracing::warn!(target: LOG_TARGET, conflict_id = %id, error = %err, "failed to load conflict");
                None
            }
        }
    }

    /// Deletes resolved conflicts. Nothing is purged automatically.
    pub async fn purge_resolved(&self) -> u32 {
        let result = async {
            let keys: Vec<String> = self
                .load_all()
                .await?
                .into_iter()
                .filter(|conflict| conflict.resolved)
                .map(|conflict| Self::storage_key(&conflict.id))
                .collect();
            self.store.multi_remove(&keys).await?;
            Ok::<u32, AppError>(keys.len() as u32)
        }
        .await;

        match result {
            Ok(purged) => purged,
            Err(err) => {
                tracing::warn!(target: LOG_TARGET, error = %err, "failed to purge resolved conflicts");
                0
            }
        }
    }

    /// 各テーブルの既定戦略で未解決コンフリクトを一括解決する。解決できた件数を返す。
    pub async fn resolve_all_unresolved(&self) -> u32 {
        let mut resolved = 0;
        for conflict in self.list_unresolved().await {
            if self.resolve_conflict(&conflict.id, None).await.is_some() {
                resolved += 1;
            }
        }
        resolved
    }

    /// Conflicts keyed by the queued operation that raised them.
    pub async fn conflicts_by_operation(&self) -> Result<HashMap<OperationId, Conflict>, AppError> {
        Ok(self
            .load_all()
            .await?
            .into_iter()
            .filter_map(|conflict| {
                conflict
                    .operation_id
                    .clone()
                    .map(|operation_id| (operation_id, conflict))
            })
            .collect())
    }

    async fn detect_logged(
        &self,
        table: &TableName,
        record_id: &RecordId,
        client_fields: &RecordPayload,
        enqueued_at: DateTime<Utc>,
        operation_id: Option<OperationId>,
    ) -> Option<Conflict> {
        match self
            .try_detect(table, record_id, client_fields, enqueued_at, operation_id)
            .await
        {
            Ok(conflict) => conflict,
            Err(err) => {
                tracing::warn!(
                    target: LOG_TARGET,
                    table = %table,
                    record_id = %record_id,
                    error = %err,
                    "conflict detection skipped"
                );
                None
            }
        }
    }

    async fn try_detect(
        &self,
        table: &TableName,
        record_id: &RecordId,
        client_fields: &RecordPayload,
        enqueued_at: DateTime<Utc>,
        operation_id: Option<OperationId>,
    ) -> Result<Option<Conflict>, AppError> {
        let Some(server) = self
            .remote
            .fetch_one(table, &[RemoteFilter::by_id(record_id)])
            .await?
        else {
            return Ok(None);
        };

        let diverging = client_fields.diverging_fields(&server);
        if diverging.is_empty() {
            return Ok(None);
        }

        let mut conflict = Conflict::detected(
            table.clone(),
            record_id.clone(),
            client_fields.clone(),
            server,
            enqueued_at,
            Utc::now(),
        );
        if let Some(operation_id) = operation_id {
            conflict = conflict.with_operation(operation_id);
        }
        self.save(&conflict).await?;

        tracing::info!(
            target: LOG_TARGET,
            conflict_id = %conflict.id,
            fields = ?diverging,
            "conflict detected"
        );
        Ok(Some(conflict))
    }

    async fn try_resolve(
        &self,
        id: &ConflictId,
        strategy: Option<ResolutionStrategy>,
    ) -> Result<Option<RecordPayload>, AppError> {
        let mut conflict = self
            .load(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("conflict {id}")))?;

        if conflict.resolved {
            return Ok(conflict.resolved_data);
        }

        let strategy = strategy.unwrap_or_else(|| self.default_strategy(&conflict.table));
        let Some(resolved) = conflict.compute_resolution(strategy) else {
            tracing::debug!(target: LOG_TARGET, conflict_id = %id, "conflict awaits manual resolution");
            return Ok(None);
        };

        conflict.mark_resolved(strategy, resolved.clone());
        self.save(&conflict).await?;
        tracing::info!(
            target: LOG_TARGET,
            conflict_id = %id,
            strategy = strategy.as_str(),
            "conflict resolved"
        );
        Ok(Some(resolved))
    }

    async fn load(&self, id: &ConflictId) -> Result<Option<Conflict>, AppError> {
        match self.store.get_item(&Self::storage_key(id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn load_all(&self) -> Result<Vec<Conflict>, AppError> {
        let keys = self.store.keys_with_prefix(CONFLICT_PREFIX).await?;
        let values = self.store.multi_get(&keys).await?;

        let mut conflicts = Vec::with_capacity(values.len());
        for (key, raw) in values {
            let Some(raw) = raw else {
                continue;
            };
            match serde_json::from_str::<Conflict>(&raw) {
                Ok(conflict) => conflicts.push(conflict),
                Err(err) => {
                    tracing::warn!(target: LOG_TARGET, key = %key, error = %err, "skipping unreadable conflict");
                }
            }
        }
        conflicts.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(conflicts)
    }

    async fn save(&self, conflict: &Conflict) -> Result<(), AppError> {
        self.store
            .set_item(&Self::storage_key(&conflict.id), serde_json::to_string(conflict)?)
            .await
    }
}
