use std::sync::Arc;

use async_trait::async_trait;
use elite_sync::application::ports::{KeyValueStore, RemoteFilter, RemoteStore};
use elite_sync::domain::value_objects::{RecordId, RecordPayload, TableName};
use elite_sync::infrastructure::remote::InMemoryRemoteStore;
use elite_sync::shared::error::{AppError, RemoteStoreError};
use tokio::sync::Notify;

/// すべての呼び出しが失敗する KV ストア
#[derive(Debug, Default)]
pub struct FailingKeyValueStore;

impl FailingKeyValueStore {
    fn error() -> AppError {
        AppError::Storage("disk unavailable".to_string())
    }
}

#[async_trait]
impl KeyValueStore for FailingKeyValueStore {
    async fn get_item(&self, _key: &str) -> Result<Option<String>, AppError> {
        Err(Self::error())
    }

    async fn set_item(&self, _key: &str, _value: String) -> Result<(), AppError> {
        Err(Self::error())
    }

    async fn remove_item(&self, _key: &str) -> Result<(), AppError> {
        Err(Self::error())
    }

    async fn get_all_keys(&self) -> Result<Vec<String>, AppError> {
        Err(Self::error())
    }

    async fn multi_get(
        &self,
        _keys: &[String],
    ) -> Result<Vec<(String, Option<String>)>, AppError> {
        Err(Self::error())
    }

    async fn multi_set(&self, _entries: Vec<(String, String)>) -> Result<(), AppError> {
        Err(Self::error())
    }

    async fn multi_remove(&self, _keys: &[String]) -> Result<(), AppError> {
        Err(Self::error())
    }
}

/// Remote whose inserts park until `release()` is called.
#[derive(Clone)]
pub struct GatedRemoteStore {
    inner: InMemoryRemoteStore,
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

impl GatedRemoteStore {
    pub fn new(inner: InMemoryRemoteStore) -> Self {
        Self {
            inner,
            entered: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        }
    }

    /// 最初の insert が到達するまで待つ
    pub async fn wait_until_entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_waiters();
    }
}

#[async_trait]
impl RemoteStore for GatedRemoteStore {
    async fn insert(
        &self,
        table: &TableName,
        data: &RecordPayload,
    ) -> Result<RecordPayload, RemoteStoreError> {
        let released = self.release.notified();
        self.entered.notify_one();
        released.await;
        self.inner.insert(table, data).await
    }

    async fn update(
        &self,
        table: &TableName,
        id: &RecordId,
        data: &RecordPayload,
    ) -> Result<RecordPayload, RemoteStoreError> {
        self.inner.update(table, id, data).await
    }

    async fn delete(&self, table: &TableName, id: &RecordId) -> Result<(), RemoteStoreError> {
        self.inner.delete(table, id).await
    }

    async fn fetch_one(
        &self,
        table: &TableName,
        filters: &[RemoteFilter],
    ) -> Result<Option<RecordPayload>, RemoteStoreError> {
        self.inner.fetch_one(table, filters).await
    }

    async fn ping(&self) -> Result<(), RemoteStoreError> {
        self.inner.ping().await
    }
}
