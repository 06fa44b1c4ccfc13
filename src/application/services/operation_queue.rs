use crate::application::ports::KeyValueStore;
use crate::domain::entities::{MalformedOperation, QuarantinedOperation, SyncOperation};
use crate::domain::value_objects::{OperationId, OperationType, RecordPayload, TableName};
use crate::shared::error::AppError;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;

pub const SYNC_OPERATION_PREFIX: &str = "sync_op:";
pub const QUARANTINE_PREFIX: &str = "sync_quarantine:";

const LOG_TARGET: &str = "offline::queue";

/// Result of reading every queued record.
#[derive(Debug, Clone, Default)]
pub struct QueueScan {
    /// FIFO 順
    pub operations: Vec<SyncOperation>,
    pub malformed: Vec<MalformedOperation>,
}

/// 永続化された書き込みキュー。ネットワークには一切触れない。
pub struct OperationQueue {
    store: Arc<dyn KeyValueStore>,
    last_enqueued_at: Mutex<Option<DateTime<Utc>>>,
}

impl OperationQueue {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            last_enqueued_at: Mutex::new(None),
        }
    }

    pub fn storage_key(id: &OperationId) -> String {
        format!("{SYNC_OPERATION_PREFIX}{}", id.as_str())
    }

    /// Appends an operation. UPDATE / DELETE must carry `data.id`.
    pub async fn enqueue(
        &self,
        op_type: OperationType,
        table: &str,
        data: RecordPayload,
    ) -> Result<OperationId, AppError> {
        let table = TableName::new(table.to_string()).map_err(AppError::ValidationError)?;

        // 同一ミリ秒の投入でも FIFO が崩れないよう時刻を単調増加させる
        let mut last = self.last_enqueued_at.lock().await;
        let mut timestamp = Utc::now();
        if let Some(previous) = *last {
            if timestamp <= previous {
                timestamp = previous + ChronoDuration::milliseconds(1);
            }
        }

        let operation = SyncOperation::new(op_type, table, data, timestamp)
            .map_err(AppError::ValidationError)?;
        self.store
            .set_item(
                &Self::storage_key(&operation.id),
                serde_json::to_string(&operation)?,
            )
            .await?;
        *last = Some(timestamp);

        tracing::debug!(
            target: LOG_TARGET,
            operation_id = %operation.id,
            op_type = %operation.op_type,
            table = %operation.table,
            "operation enqueued"
        );
        Ok(operation.id)
    }

    pub async fn enqueue_record<T: Serialize>(
        &self,
        op_type: OperationType,
        table: &str,
        record: &T,
    ) -> Result<OperationId, AppError> {
        let payload = RecordPayload::from_serializable(record).map_err(AppError::ValidationError)?;
        self.enqueue(op_type, table, payload).await
    }

    /// 正常な操作を FIFO 順で返す。ストア障害時は空。
    pub async fn list_pending(&self) -> Vec<SyncOperation> {
        match self.scan().await {
            Ok(scan) => scan.operations,
            Err(err) => {
                tracing::warn!(target: LOG_TARGET, error = %err, "failed to list pending operations");
                Vec::new()
            }
        }
    }

    pub async fn pending_count(&self) -> usize {
        match self.store.keys_with_prefix(SYNC_OPERATION_PREFIX).await {
            Ok(keys) => keys.len(),
            Err(err) => {
                tracing::warn!(target: LOG_TARGET, error = %err, "failed to count pending operations");
                0
            }
        }
    }

    pub async fn get(&self, id: &OperationId) -> Result<Option<SyncOperation>, AppError> {
        match self.store.get_item(&Self::storage_key(id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Idempotent: removing an absent id is a no-op.
    pub async fn remove(&self, id: &OperationId) -> Result<(), AppError> {
        self.store.remove_item(&Self::storage_key(id)).await
    }

    /// Reads every queued record, splitting well-formed operations from malformed ones.
    pub async fn scan(&self) -> Result<QueueScan, AppError> {
        let keys = self.store.keys_with_prefix(SYNC_OPERATION_PREFIX).await?;
        let values = self.store.multi_get(&keys).await?;

        let mut scan = QueueScan::default();
        for (storage_key, raw) in values {
            let Some(raw) = raw else {
                continue;
            };
            match Self::parse_operation(&raw) {
                Ok(operation) => scan.operations.push(operation),
                Err(reason) => {
                    let raw_value =
                        serde_json::from_str::<Value>(&raw).unwrap_or(Value::String(raw));
                    scan.malformed.push(MalformedOperation {
                        storage_key,
                        raw: raw_value,
                        reason,
                    });
                }
            }
        }

        scan.operations
            .sort_by(|a, b| a.ordering_key().cmp(&b.ordering_key()));
        Ok(scan)
    }

    /// 壊れたレコードを `sync_quarantine:*` に移し、キューから外す。
    pub async fn quarantine(&self, malformed: &MalformedOperation) -> Result<(), AppError> {
        let suffix = malformed
            .storage_key
            .strip_prefix(SYNC_OPERATION_PREFIX)
            .unwrap_or(&malformed.storage_key);
        let record = QuarantinedOperation::new(
            malformed.storage_key.clone(),
            malformed.raw.clone(),
            malformed.reason.clone(),
            Utc::now(),
        );

        self.store
            .set_item(
                &format!("{QUARANTINE_PREFIX}{suffix}"),
                serde_json::to_string(&record)?,
            )
            .await?;
        self.store.remove_item(&malformed.storage_key).await?;

        tracing::warn!(
            target: LOG_TARGET,
            key = %malformed.storage_key,
            reason = %malformed.reason,
            "malformed operation quarantined"
        );
        Ok(())
    }

    /// Moves a well-formed operation that can never be applied out of the queue.
    pub async fn quarantine_operation(
        &self,
        operation: &SyncOperation,
        reason: String,
    ) -> Result<(), AppError> {
        let malformed = MalformedOperation {
            storage_key: Self::storage_key(&operation.id),
            raw: serde_json::to_value(operation)?,
            reason,
        };
        self.quarantine(&malformed).await
    }

    pub async fn list_quarantined(&self) -> Vec<QuarantinedOperation> {
        let result = async {
            let keys = self.store.keys_with_prefix(QUARANTINE_PREFIX).await?;
            let values = self.store.multi_get(&keys).await?;
            Ok::<_, AppError>(
                values
                    .into_iter()
                    .filter_map(|(_, raw)| raw)
                    .filter_map(|raw| serde_json::from_str::<QuarantinedOperation>(&raw).ok())
                    .collect::<Vec<_>>(),
            )
        }
        .await;

        match result {
            Ok(mut records) => {
                records.sort_by(|a, b| a.quarantined_at.cmp(&b.quarantined_at));
                records
            }
            Err(err) => {
                tracing::warn!(target: LOG_TARGET, error = %err, "failed to list quarantined operations");
                Vec::new()
            }
        }
    }

    pub async fn purge_quarantined(&self) -> Result<u32, AppError> {
        let keys = self.store.keys_with_prefix(QUARANTINE_PREFIX).await?;
        self.store.multi_remove(&keys).await?;
        Ok(keys.len() as u32)
    }

    fn parse_operation(raw: &str) -> Result<SyncOperation, String> {
        let operation: SyncOperation =
            serde_json::from_str(raw).map_err(|err| format!("unreadable operation: {err}"))?;

        if operation.table.as_str().trim().is_empty() {
            return Err("operation has an empty table".to_string());
        }
        if operation.op_type.requires_record_id() && operation.record_id().is_none() {
            return Err(format!("{} operation is missing data.id", operation.op_type));
        }
        OperationId::parse(operation.id.as_str())?;
        Ok(operation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::storage::MemoryKeyValueStore;
    use serde_json::json;

    fn payload(value: Value) -> RecordPayload {
        RecordPayload::from_value(value).unwrap()
    }

    fn queue() -> (OperationQueue, Arc<MemoryKeyValueStore>) {
        let store = Arc::new(MemoryKeyValueStore::new());
        (OperationQueue::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_enqueue_and_list_in_fifo_order() {
        let (queue, _) = queue();

        let mut ids = Vec::new();
        for i in 0..20 {
            let id = queue
                .enqueue(OperationType::Create, "workouts", payload(json!({"n": i})))
                .await
                .unwrap();
            ids.push(id);
        }

        let pending = queue.list_pending().await;
        let listed: Vec<_> = pending.iter().map(|op| op.id.clone()).collect();
        assert_eq!(listed, ids);
        assert!(pending
            .windows(2)
            .all(|pair| pair[0].timestamp < pair[1].timestamp));
        assert_eq!(queue.pending_count().await, 20);
    }

    #[tokio::test]
    async fn test_update_without_id_is_rejected() {
        let (queue, _) = queue();

        let result = queue
            .enqueue(OperationType::Update, "workouts", payload(json!({"weight": 1})))
            .await;
        assert!(matches!(result, Err(AppError::ValidationError(_))));

        let result = queue
            .enqueue(OperationType::Create, "  ", payload(json!({"weight": 1})))
            .await;
        assert!(matches!(result, Err(AppError::ValidationError(_))));
        assert_eq!(queue.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let (queue, _) = queue();
        let id = queue
            .enqueue(OperationType::Delete, "workouts", payload(json!({"id": "w1"})))
            .await
            .unwrap();

        queue.remove(&id).await.unwrap();
        queue.remove(&id).await.unwrap();
        assert!(queue.list_pending().await.is_empty());
        assert!(queue.get(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scan_separates_and_quarantines_malformed_records() {
        let (queue, store) = queue();
        queue
            .enqueue(OperationType::Create, "workouts", payload(json!({"title": "Leg Day"})))
            .await
            .unwrap();
        store
            .set_item("sync_op:0000000000001_broken", "{not json".into())
            .await
            .unwrap();
        store
            .set_item(
                "sync_op:0000000000002_noid",
                json!({
                    "id": "0000000000002_noid",
                    "type": "UPDATE",
                    "table": "workouts",
                    "data": {"weight": 3},
                    "timestamp": "2025-01-01T00:00:00Z"
                })
                .to_string(),
            )
            .await
            .unwrap();

        let scan = queue.scan().await.unwrap();
        assert_eq!(scan.operations.len(), 1);
        assert_eq!(scan.malformed.len(), 2);

        for malformed in &scan.malformed {
            queue.quarantine(malformed).await.unwrap();
        }
        assert_eq!(queue.pending_count().await, 1);

        let quarantined = queue.list_quarantined().await;
        assert_eq!(quarantined.len(), 2);
        assert!(quarantined
            .iter()
            .any(|record| record.raw == Value::String("{not json".into())));

        assert_eq!(queue.purge_quarantined().await.unwrap(), 2);
        assert!(queue.list_quarantined().await.is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_record_accepts_typed_payloads() {
        #[derive(Serialize)]
        struct WorkoutLog {
            id: String,
            weight: u32,
        }

        let (queue, _) = queue();
        queue
            .enqueue_record(
                OperationType::Update,
                "workout_logs",
                &WorkoutLog {
                    id: "log-1".into(),
                    weight: 100,
                },
            )
            .await
            .unwrap();

        let pending = queue.list_pending().await;
        assert_eq!(pending[0].data.get("weight"), Some(&json!(100)));
        assert_eq!(pending[0].record_id().unwrap().as_str(), "log-1");
    }
}
