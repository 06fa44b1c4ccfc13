use crate::application::ports::{DrainTrigger, RemoteStore, SyncTriggerReason};
use crate::application::services::conflict_service::ConflictResolver;
use crate::application::services::operation_queue::OperationQueue;
use crate::domain::entities::{Conflict, DrainResult, SyncOperation};
use crate::domain::value_objects::{
    OperationId, OperationType, RecordId, RecordPayload, ResolutionStrategy,
};
use crate::infrastructure::offline::metrics::{self, DrainOutcomeMetadata};
use crate::shared::config::SyncConfig;
use crate::shared::error::RemoteStoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::{Mutex, RwLock, watch};

const LOG_TARGET: &str = "offline::sync";

pub type ProgressCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

#[derive(Clone, Default)]
pub struct DrainOptions {
    /// `(processed, total)`。各操作の後に呼ばれ、最後は `total/total`。
    pub on_progress: Option<ProgressCallback>,
    /// `None` なら `SyncConfig::resolve_conflicts_automatically` に従う
    pub resolve_conflicts_automatically: Option<bool>,
    /// 操作と操作の間で確認される協調的キャンセル
    pub cancel: Option<Arc<AtomicBool>>,
}

impl DrainOptions {
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    pub fn resolving_conflicts(mut self, resolve: bool) -> Self {
        self.resolve_conflicts_automatically = Some(resolve);
        self
    }

    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }
}

impl fmt::Debug for DrainOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DrainOptions")
            .field("on_progress", &self.on_progress.is_some())
            .field(
                "resolve_conflicts_automatically",
                &self.resolve_conflicts_automatically,
            )
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Draining,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusSnapshot {
    pub is_syncing: bool,
    pub pending_operations: usize,
    pub unresolved_conflicts: usize,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_result: Option<DrainResult>,
    pub sync_errors: u32,
}

#[derive(Debug, Clone, Default)]
struct SyncStatus {
    last_sync_at: Option<DateTime<Utc>>,
    last_result: Option<DrainResult>,
    sync_errors: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OperationOutcome {
    Applied,
    ConflictDetected,
    Blocked,
    Failed,
    /// 再送しても成功しない操作を隔離した
    Quarantined,
}

type RecordKey = (String, String);

/// キューを FIFO 順にリモートへ反映するドレイン処理。
///
/// ドレインは同時に 1 つだけ走る。実行中に呼ばれた `drain` は空の結果を即座に返す。
pub struct SyncOrchestrator {
    queue: Arc<OperationQueue>,
    resolver: Arc<ConflictResolver>,
    remote: Arc<dyn RemoteStore>,
    config: SyncConfig,
    gate: Mutex<()>,
    state_tx: watch::Sender<SyncState>,
    status: Arc<RwLock<SyncStatus>>,
}

impl SyncOrchestrator {
    pub fn new(
        queue: Arc<OperationQueue>,
        resolver: Arc<ConflictResolver>,
        remote: Arc<dyn RemoteStore>,
        config: SyncConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(SyncState::Idle);
        Self {
            queue,
            resolver,
            remote,
            config,
            gate: Mutex::new(()),
            state_tx,
            status: Arc::new(RwLock::new(SyncStatus::default())),
        }
    }

    pub fn state(&self) -> SyncState {
        *self.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state_tx.subscribe()
    }

    pub async fn status(&self) -> SyncStatusSnapshot {
        let status = self.status.read().await.clone();
        let (pending_operations, unresolved) =
            futures::join!(self.queue.pending_count(), self.resolver.list_unresolved());
        SyncStatusSnapshot {
            is_syncing: self.state() == SyncState::Draining,
            pending_operations,
            unresolved_conflicts: unresolved.len(),
            last_sync_at: status.last_sync_at,
            last_result: status.last_result,
            sync_errors: status.sync_errors,
        }
    }

    pub async fn drain(&self, options: DrainOptions) -> DrainResult {
        self.drain_with_reason(options, SyncTriggerReason::Manual)
            .await
    }

    pub async fn drain_with_reason(
        &self,
        options: DrainOptions,
        reason: SyncTriggerReason,
    ) -> DrainResult {
        let Ok(_guard) = self.gate.try_lock() else {
            tracing::debug!(target: LOG_TARGET, trigger = %reason, "drain already running; skipping");
            return DrainResult::default();
        };

        self.state_tx.send_replace(SyncState::Draining);
        let started = Instant::now();
        let (result, errored) = self.run_cycle(&options).await;

        let mut status = self.status.write().await;
        status.last_sync_at = Some(Utc::now());
        status.last_result = Some(result);
        if errored || result.failed_count > 0 {
            status.sync_errors = status.sync_errors.saturating_add(1);
        }
        drop(status);

        let duration_ms = started.elapsed().as_millis() as u64;
        let totals = metrics::record_drain(
            &result,
            &DrainOutcomeMetadata {
                trigger: Some(reason.to_string()),
                duration_ms: Some(duration_ms),
            },
        );
        self.state_tx.send_replace(SyncState::Idle);

        tracing::info!(
            target: LOG_TARGET,
            trigger = %reason,
            success = result.success_count,
            conflicts = result.conflict_count,
            failed = result.failed_count,
            blocked = result.blocked_count,
            quarantined = result.quarantined_count,
            consecutive_degraded = totals.consecutive_degraded,
            duration_ms,
            "drain finished"
        );
        result
    }

    /// Returns the counts and whether the cycle stopped on a store error.
    async fn run_cycle(&self, options: &DrainOptions) -> (DrainResult, bool) {
        let mut result = DrainResult::default();

        let scan = match self.queue.scan().await {
            Ok(scan) => scan,
            Err(err) => {
                tracing::warn!(target: LOG_TARGET, error = %err, "failed to read the operation queue");
                return (result, true);
            }
        };

        for malformed in &scan.malformed {
            match self.queue.quarantine(malformed).await {
                Ok(()) => result.quarantined_count += 1,
                Err(err) => {
                    tracing::warn!(
                        target: LOG_TARGET,
                        key = %malformed.storage_key,
                        error = %err,
                        "failed to quarantine malformed operation"
                    );
                }
            }
        }

        // 既存コンフリクトを読めないと解決済みのものを未解決で上書きしかねないので中断する
        let conflicts = match self.resolver.conflicts_by_operation().await {
            Ok(conflicts) => conflicts,
            Err(err) => {
                tracing::warn!(target: LOG_TARGET, error = %err, "failed to load conflicts; aborting drain");
                return (result, true);
            }
        };

        let total = scan.operations.len();
        let mut held: HashSet<RecordKey> = HashSet::new();
        for (index, operation) in scan.operations.iter().enumerate() {
            if options.is_cancelled() {
                tracing::info!(
                    target: LOG_TARGET,
                    processed = index,
                    total,
                    "drain cancelled"
                );
                break;
            }

            match self.process(operation, &conflicts, &mut held).await {
                OperationOutcome::Applied => result.success_count += 1,
                OperationOutcome::ConflictDetected => result.conflict_count += 1,
                OperationOutcome::Blocked => result.blocked_count += 1,
                OperationOutcome::Failed => result.failed_count += 1,
                OperationOutcome::Quarantined => result.quarantined_count += 1,
            }

            if let Some(callback) = &options.on_progress {
                callback(index + 1, total);
            }
        }

        let auto_resolve = options
            .resolve_conflicts_automatically
            .unwrap_or(self.config.resolve_conflicts_automatically);
        if auto_resolve {
            let resolved = self.resolver.resolve_all_unresolved().await;
            tracing::debug!(target: LOG_TARGET, resolved, "auto-resolved conflicts");
        }

        (result, false)
    }

    async fn process(
        &self,
        operation: &SyncOperation,
        conflicts: &HashMap<OperationId, Conflict>,
        held: &mut HashSet<RecordKey>,
    ) -> OperationOutcome {
        let record_key = operation
            .record_id()
            .map(|id| (operation.table.as_str().to_string(), id.as_str().to_string()));

        // 同じレコードの前の操作が保留中なら順序を守るために保留する
        if let Some(key) = &record_key {
            if held.contains(key) {
                return OperationOutcome::Blocked;
            }
        }

        let outcome = self.process_operation(operation, conflicts).await;
        if matches!(
            outcome,
            OperationOutcome::ConflictDetected | OperationOutcome::Blocked | OperationOutcome::Failed
        ) {
            if let Some(key) = record_key {
                held.insert(key);
            }
        }
        outcome
    }

    async fn process_operation(
        &self,
        operation: &SyncOperation,
        conflicts: &HashMap<OperationId, Conflict>,
    ) -> OperationOutcome {
        if operation.op_type != OperationType::Update {
            return self.apply_and_dequeue(operation, &operation.data).await;
        }

        match conflicts.get(&operation.id) {
            Some(conflict) if conflict.is_pending() => OperationOutcome::Blocked,
            Some(conflict) if conflict.resolution == Some(ResolutionStrategy::ServerWins) => {
                // サーバー値を採用したので送信せずに破棄する
                self.dequeue(operation).await;
                OperationOutcome::Applied
            }
            Some(conflict) => {
                let data = conflict
                    .resolved_data
                    .as_ref()
                    .unwrap_or(&operation.data);
                self.apply_and_dequeue(operation, data).await
            }
            None => match self.resolver.detect_for_operation(operation).await {
                Some(_) => OperationOutcome::ConflictDetected,
                None => self.apply_and_dequeue(operation, &operation.data).await,
            },
        }
    }

    async fn apply_and_dequeue(
        &self,
        operation: &SyncOperation,
        data: &RecordPayload,
    ) -> OperationOutcome {
        match self.apply(operation, data).await {
            Ok(()) => {
                self.dequeue(operation).await;
                OperationOutcome::Applied
            }
            Err(err) if err.is_missing_record() => {
                self.quarantine(operation, format!("remote record no longer exists: {err}"))
                    .await
            }
            Err(err) => {
                tracing::warn!(
                    target: LOG_TARGET,
                    operation_id = %operation.id,
                    op_type = %operation.op_type,
                    table = %operation.table,
                    retryable = err.is_retryable(),
                    error = %err,
                    "remote write failed; operation stays queued"
                );
                OperationOutcome::Failed
            }
        }
    }

    async fn apply(
        &self,
        operation: &SyncOperation,
        data: &RecordPayload,
    ) -> Result<(), RemoteStoreError> {
        match operation.op_type {
            OperationType::Create => self.remote.insert(&operation.table, data).await.map(|_| ()),
            OperationType::Update => {
                let id = Self::required_id(operation)?;
                self.remote
                    .update(&operation.table, &id, data)
                    .await
                    .map(|_| ())
            }
            OperationType::Delete => {
                let id = Self::required_id(operation)?;
                self.remote.delete(&operation.table, &id).await
            }
        }
    }

    fn required_id(operation: &SyncOperation) -> Result<RecordId, RemoteStoreError> {
        operation.record_id().ok_or_else(|| {
            RemoteStoreError::Serialization(format!(
                "{} operation {} has no data.id",
                operation.op_type, operation.id
            ))
        })
    }

    async fn quarantine(&self, operation: &SyncOperation, reason: String) -> OperationOutcome {
        match self.queue.quarantine_operation(operation, reason).await {
            Ok(()) => OperationOutcome::Quarantined,
            Err(err) => {
                tracing::warn!(
                    target: LOG_TARGET,
                    operation_id = %operation.id,
                    error = %err,
                    "failed to quarantine operation"
                );
                OperationOutcome::Failed
            }
        }
    }

    async fn dequeue(&self, operation: &SyncOperation) {
        if let Err(err) = self.queue.remove(&operation.id).await {
            // リモートには反映済み。次回のドレインで再送される可能性がある
            tracing::warn!(
                target: LOG_TARGET,
                operation_id = %operation.id,
                error = %err,
                "failed to remove applied operation"
            );
        }
    }
}

#[async_trait]
impl DrainTrigger for SyncOrchestrator {
    async fn pending_count(&self) -> usize {
        self.queue.pending_count().await
    }

    async fn drain_now(&self, reason: SyncTriggerReason) -> DrainResult {
        self.drain_with_reason(DrainOptions::default(), reason).await
    }
}
