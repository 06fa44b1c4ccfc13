use crate::application::ports::{RemoteFilter, RemoteStore};
use crate::domain::value_objects::{RecordId, RecordPayload, TableName};
use crate::shared::error::RemoteStoreError;
use async_trait::async_trait;

/// 接続先が未設定のときのリモート。すべて `Unreachable` を返すので書き込みはキューに残る。
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredRemoteStore;

impl UnconfiguredRemoteStore {
    fn unreachable<T>() -> Result<T, RemoteStoreError> {
        Err(RemoteStoreError::Unreachable(
            "remote store is not configured".to_string(),
        ))
    }
}

#[async_trait]
impl RemoteStore for UnconfiguredRemoteStore {
    async fn insert(
        &self,
        _table: &TableName,
        _data: &RecordPayload,
    ) -> Result<RecordPayload, RemoteStoreError> {
        Self::unreachable()
    }

    async fn update(
        &self,
        _table: &TableName,
        _id: &RecordId,
        _data: &RecordPayload,
    ) -> Result<RecordPayload, RemoteStoreError> {
        Self::unreachable()
    }

    async fn delete(&self, _table: &TableName, _id: &RecordId) -> Result<(), RemoteStoreError> {
        Self::unreachable()
    }

    async fn fetch_one(
        &self,
        _table: &TableName,
        _filters: &[RemoteFilter],
    ) -> Result<Option<RecordPayload>, RemoteStoreError> {
        Self::unreachable()
    }

    async fn ping(&self) -> Result<(), RemoteStoreError> {
        Self::unreachable()
    }
}
