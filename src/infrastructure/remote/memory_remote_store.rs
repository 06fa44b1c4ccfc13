use crate::application::ports::{RemoteFilter, RemoteStore};
use crate::domain::value_objects::offline::json_values_equal;
use crate::domain::value_objects::{RecordId, RecordPayload, TableName};
use crate::shared::error::RemoteStoreError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// テーブルをメモリに保持するリモートストア。
///
/// `set_reachable(false)` で全呼び出しが `Unreachable` になり、
/// `fail_next_write` で次の書き込みに任意のエラーを返せる。
#[derive(Clone)]
pub struct InMemoryRemoteStore {
    tables: Arc<RwLock<HashMap<String, Vec<RecordPayload>>>>,
    reachable: Arc<AtomicBool>,
    scripted_failures: Arc<Mutex<VecDeque<RemoteStoreError>>>,
    write_calls: Arc<AtomicUsize>,
    read_calls: Arc<AtomicUsize>,
    ping_calls: Arc<AtomicUsize>,
}

impl Default for InMemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(HashMap::new())),
            reachable: Arc::new(AtomicBool::new(true)),
            scripted_failures: Arc::new(Mutex::new(VecDeque::new())),
            write_calls: Arc::new(AtomicUsize::new(0)),
            read_calls: Arc::new(AtomicUsize::new(0)),
            ping_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    pub async fn fail_next_write(&self, error: RemoteStoreError) {
        self.scripted_failures.lock().await.push_back(error);
    }

    /// 直接行を差し込む（呼び出し回数には数えない）。
    pub async fn seed(&self, table: &str, record: RecordPayload) {
        let mut tables = self.tables.write().await;
        let rows = tables.entry(table.to_string()).or_default();
        match record.get("id").cloned() {
            Some(id) => {
                rows.retain(|row| !row.get("id").is_some_and(|v| json_values_equal(v, &id)));
                rows.push(record);
            }
            None => rows.push(record),
        }
    }

    pub async fn record(&self, table: &str, id: &str) -> Option<RecordPayload> {
        let tables = self.tables.read().await;
        tables
            .get(table)
            .and_then(|rows| rows.iter().find(|row| row_has_id(row, id)).cloned())
    }

    pub async fn rows(&self, table: &str) -> Vec<RecordPayload> {
        let tables = self.tables.read().await;
        tables.get(table).cloned().unwrap_or_default()
    }

    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    pub fn read_calls(&self) -> usize {
        self.read_calls.load(Ordering::SeqCst)
    }

    pub fn ping_calls(&self) -> usize {
        self.ping_calls.load(Ordering::SeqCst)
    }

    /// 書き込み・読み込み・疎通確認の合計回数
    pub fn total_calls(&self) -> usize {
        self.write_calls() + self.read_calls() + self.ping_calls()
    }

    fn ensure_reachable(&self) -> Result<(), RemoteStoreError> {
        if self.is_reachable() {
            Ok(())
        } else {
            Err(RemoteStoreError::Unreachable(
                "in-memory remote store is offline".to_string(),
            ))
        }
    }

    async fn begin_write(&self) -> Result<(), RemoteStoreError> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_reachable()?;
        if let Some(error) = self.scripted_failures.lock().await.pop_front() {
            return Err(error);
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn insert(
        &self,
        table: &TableName,
        data: &RecordPayload,
    ) -> Result<RecordPayload, RemoteStoreError> {
        self.begin_write().await?;

        let mut record = data.clone();
        if !record.contains_field("id") {
            record.insert("id", Value::String(Uuid::new_v4().to_string()));
        }

        let mut tables = self.tables.write().await;
        let rows = tables.entry(table.as_str().to_string()).or_default();
        if let Some(id) = record.get("id") {
            if rows
                .iter()
                .any(|row| row.get("id").is_some_and(|v| json_values_equal(v, id)))
            {
                return Err(RemoteStoreError::rejected(
                    409,
                    format!("duplicate key in {table}"),
                ));
            }
        }
        rows.push(record.clone());
        Ok(record)
    }

    async fn update(
        &self,
        table: &TableName,
        id: &RecordId,
        data: &RecordPayload,
    ) -> Result<RecordPayload, RemoteStoreError> {
        self.begin_write().await?;

        let mut tables = self.tables.write().await;
        let row = tables
            .get_mut(table.as_str())
            .and_then(|rows| rows.iter_mut().find(|row| row_has_id(row, id.as_str())))
            .ok_or_else(|| RemoteStoreError::rejected(404, format!("{table} row {id} not found")))?;

        *row = row.overlaid_with(&data.without_id());
        Ok(row.clone())
    }

    async fn delete(&self, table: &TableName, id: &RecordId) -> Result<(), RemoteStoreError> {
        self.begin_write().await?;

        let mut tables = self.tables.write().await;
        if let Some(rows) = tables.get_mut(table.as_str()) {
            rows.retain(|row| !row_has_id(row, id.as_str()));
        }
        Ok(())
    }

    async fn fetch_one(
        &self,
        table: &TableName,
        filters: &[RemoteFilter],
    ) -> Result<Option<RecordPayload>, RemoteStoreError> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_reachable()?;

        let tables = self.tables.read().await;
        Ok(tables.get(table.as_str()).and_then(|rows| {
            rows.iter()
                .find(|row| {
                    filters.iter().all(|filter| {
                        row.get(&filter.column)
                            .is_some_and(|value| filter_matches(value, &filter.value))
                    })
                })
                .cloned()
        }))
    }

    async fn ping(&self) -> Result<(), RemoteStoreError> {
        self.ping_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_reachable()
    }
}

fn row_has_id(row: &RecordPayload, id: &str) -> bool {
    row.record_id().is_some_and(|row_id| row_id.as_str() == id)
}

/// PostgREST の `eq.` 比較と同様に、文字列表現が一致すれば等しいとみなす。
fn filter_matches(stored: &Value, expected: &Value) -> bool {
    if json_values_equal(stored, expected) {
        return true;
    }
    scalar_text(stored).is_some_and(|text| Some(text) == scalar_text(expected))
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> RecordPayload {
        RecordPayload::from_value(value).unwrap()
    }

    fn table(name: &str) -> TableName {
        TableName::new(name.to_string()).unwrap()
    }

    #[tokio::test]
    async fn test_insert_assigns_id_and_rejects_duplicates() {
        let store = InMemoryRemoteStore::new();
        let created = store
            .insert(&table("workouts"), &payload(json!({"name": "Push"})))
            .await
            .unwrap();
        assert!(created.contains_field("id"));

        let dup = payload(json!({"id": "w1"}));
        store.insert(&table("workouts"), &dup).await.unwrap();
        let err = store.insert(&table("workouts"), &dup).await.unwrap_err();
        assert_eq!(err, RemoteStoreError::rejected(409, "duplicate key in workouts"));
    }

    #[tokio::test]
    async fn test_update_overlays_fields() {
        let store = InMemoryRemoteStore::new();
        store
            .seed("workouts", payload(json!({"id": "w1", "name": "Push", "sets": 3})))
            .await;

        let id = RecordId::new("w1".into()).unwrap();
        let updated = store
            .update(&table("workouts"), &id, &payload(json!({"id": "w1", "sets": 5})))
            .await
            .unwrap();

        assert_eq!(updated.get("name"), Some(&json!("Push")));
        assert_eq!(updated.get("sets"), Some(&json!(5)));
    }

    #[tokio::test]
    async fn test_fetch_matches_numeric_ids_by_text() {
        let store = InMemoryRemoteStore::new();
        store.seed("exercises", payload(json!({"id": 7, "name": "Squat"}))).await;

        let id = RecordId::new("7".into()).unwrap();
        let found = store
            .fetch_one(&table("exercises"), &[RemoteFilter::by_id(&id)])
            .await
            .unwrap();
        assert_eq!(found.unwrap().get("name"), Some(&json!("Squat")));
    }

    #[tokio::test]
    async fn test_unreachable_and_scripted_failures() {
        let store = InMemoryRemoteStore::new();
        store.set_reachable(false);
        assert!(matches!(
            store.ping().await,
            Err(RemoteStoreError::Unreachable(_))
        ));

        store.set_reachable(true);
        store
            .fail_next_write(RemoteStoreError::SchemaMismatch("PGRST204".into()))
            .await;
        let err = store
            .insert(&table("workouts"), &payload(json!({"name": "Pull"})))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteStoreError::SchemaMismatch(_)));

        store
            .insert(&table("workouts"), &payload(json!({"name": "Pull"})))
            .await
            .unwrap();
        assert_eq!(store.write_calls(), 2);
        assert_eq!(store.ping_calls(), 1);
    }
}
