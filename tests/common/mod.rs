#![allow(dead_code)]

pub mod mocks;

use std::sync::Arc;

use elite_sync::application::ports::{BackgroundTaskRegistrar, KeyValueStore, RemoteStore};
use elite_sync::domain::value_objects::RecordPayload;
use elite_sync::infrastructure::background::UnsupportedBackgroundRegistrar;
use elite_sync::infrastructure::database::ConnectionPool;
use elite_sync::infrastructure::remote::InMemoryRemoteStore;
use elite_sync::infrastructure::storage::{MemoryKeyValueStore, SqliteKeyValueStore};
use elite_sync::shared::config::AppConfig;
use elite_sync::state::OfflineSyncState;
use serde_json::Value;

pub fn payload(value: Value) -> RecordPayload {
    RecordPayload::from_value(value).expect("object payload")
}

pub struct SyncTestContext {
    pub state: OfflineSyncState,
    pub store: Arc<dyn KeyValueStore>,
    pub remote: InMemoryRemoteStore,
}

pub fn setup_memory_state() -> SyncTestContext {
    setup_with(
        Arc::new(MemoryKeyValueStore::new()),
        Arc::new(UnsupportedBackgroundRegistrar),
        AppConfig::default(),
    )
}

pub fn setup_with(
    store: Arc<dyn KeyValueStore>,
    registrar: Arc<dyn BackgroundTaskRegistrar>,
    config: AppConfig,
) -> SyncTestContext {
    let remote = InMemoryRemoteStore::new();
    let state = OfflineSyncState::new(
        store.clone(),
        Arc::new(remote.clone()) as Arc<dyn RemoteStore>,
        registrar,
        config,
    );
    SyncTestContext {
        state,
        store,
        remote,
    }
}

pub async fn setup_sqlite_store() -> (Arc<SqliteKeyValueStore>, ConnectionPool) {
    let pool = ConnectionPool::from_memory().await.expect("in-memory sqlite");
    pool.migrate().await.expect("migrations");
    (
        Arc::new(SqliteKeyValueStore::new(pool.get_pool().clone())),
        pool,
    )
}
