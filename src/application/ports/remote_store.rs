use crate::domain::value_objects::{RecordId, RecordPayload, TableName};
use crate::shared::error::RemoteStoreError;
use async_trait::async_trait;
use serde_json::Value;

/// 等価条件 `column = value` のフィルタ。
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteFilter {
    pub column: String,
    pub value: Value,
}

impl RemoteFilter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn by_id(record_id: &RecordId) -> Self {
        Self::eq("id", record_id.as_str())
    }
}

/// The authoritative remote data store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn insert(
        &self,
        table: &TableName,
        data: &RecordPayload,
    ) -> Result<RecordPayload, RemoteStoreError>;

    async fn update(
        &self,
        table: &TableName,
        id: &RecordId,
        data: &RecordPayload,
    ) -> Result<RecordPayload, RemoteStoreError>;

    async fn delete(&self, table: &TableName, id: &RecordId) -> Result<(), RemoteStoreError>;

    /// Returns `Ok(None)` when no row matches.
    async fn fetch_one(
        &self,
        table: &TableName,
        filters: &[RemoteFilter],
    ) -> Result<Option<RecordPayload>, RemoteStoreError>;

    /// Cheap round-trip used as a reachability check.
    async fn ping(&self) -> Result<(), RemoteStoreError>;
}
