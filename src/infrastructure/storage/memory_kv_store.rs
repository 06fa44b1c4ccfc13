use crate::application::ports::KeyValueStore;
use crate::shared::error::AppError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// メモリ上の KV ストア（テストやストレージ未設定時のフォールバック）
#[derive(Clone, Default)]
pub struct MemoryKeyValueStore {
    items: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>, AppError> {
        let items = self.items.read().await;
        Ok(items.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: String) -> Result<(), AppError> {
        let mut items = self.items.write().await;
        items.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), AppError> {
        let mut items = self.items.write().await;
        items.remove(key);
        Ok(())
    }

    async fn get_all_keys(&self) -> Result<Vec<String>, AppError> {
        let items = self.items.read().await;
        let mut keys: Vec<String> = items.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    async fn multi_get(&self, keys: &[String]) -> Result<Vec<(String, Option<String>)>, AppError> {
        let items = self.items.read().await;
        Ok(keys
            .iter()
            .map(|key| (key.clone(), items.get(key).cloned()))
            .collect())
    }

    async fn multi_set(&self, entries: Vec<(String, String)>) -> Result<(), AppError> {
        let mut items = self.items.write().await;
        for (key, value) in entries {
            items.insert(key, value);
        }
        Ok(())
    }

    async fn multi_remove(&self, keys: &[String]) -> Result<(), AppError> {
        let mut items = self.items.write().await;
        for key in keys {
            items.remove(key);
        }
        Ok(())
    }
}
