use crate::application::ports::KeyValueStore;
use crate::domain::entities::{CacheEntry, CacheMetadata, CacheStats};
use crate::domain::value_objects::{CacheKey, CachePriority};
use crate::shared::config::{CacheConfig, MIN_STORAGE_LIMIT_BYTES};
use crate::shared::error::AppError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::cmp::Ordering;
use std::sync::Arc;
use tokio::sync::Mutex;

pub const CACHE_ENTRY_PREFIX: &str = "cache_entry:";
pub const CACHE_METADATA_KEY: &str = "cache_meta";

const LOG_TARGET: &str = "offline::cache";

/// 容量上限付きの永続キャッシュ。
///
/// ストア障害は `tracing::warn!` に記録し、呼び出し側には `None` / `false` / `0`
/// を返す（キャッシュは派生データなので失敗しても致命的ではない）。
pub struct CacheService {
    store: Arc<dyn KeyValueStore>,
    config: CacheConfig,
    initial_limit: u64,
    gate: Mutex<()>,
}

struct LoadedEntry {
    storage_key: String,
    size: u64,
    /// 読めなかったエントリは `None`（最優先で削除対象）
    entry: Option<CacheEntry>,
}

impl CacheService {
    pub fn new(store: Arc<dyn KeyValueStore>, config: CacheConfig) -> Self {
        let initial_limit = config.storage_limit_bytes.max(MIN_STORAGE_LIMIT_BYTES);
        Self {
            store,
            config,
            initial_limit,
            gate: Mutex::new(()),
        }
    }

    pub fn storage_key(key: &CacheKey) -> String {
        format!("{CACHE_ENTRY_PREFIX}{}", key.as_str())
    }

    /// Stores `data` under `key`; `None` falls back to the configured TTL / priority.
    pub async fn put<T: Serialize + ?Sized>(
        &self,
        key: &str,
        data: &T,
        expiration_ms: Option<i64>,
        priority: Option<CachePriority>,
    ) -> bool {
        match self.try_put(key, data, expiration_ms, priority).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(target: LOG_TARGET, key, error = %err, "cache put failed");
                false
            }
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get_value(key).await?;
        match serde_json::from_value(value) {
            Ok(typed) => Some(typed),
            Err(err) => {
                tracing::warn!(
                    target: LOG_TARGET,
                    key,
                    error = %err,
                    "cached value does not match requested type"
                );
                None
            }
        }
    }

    /// 期限切れなら削除して `None`、そうでなければ `last_accessed` を更新して返す。
    pub async fn get_value(&self, key: &str) -> Option<Value> {
        match self.try_get(key).await {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(target: LOG_TARGET, key, error = %err, "cache get failed");
                None
            }
        }
    }

    pub async fn remove(&self, key: &str) -> bool {
        let result = async {
            let cache_key = CacheKey::new(key.to_string()).map_err(AppError::ValidationError)?;
            let _guard = self.gate.lock().await;
            self.remove_locked(&Self::storage_key(&cache_key)).await
        }
        .await;

        match result {
            Ok(_) => true,
            Err(err) => {
                tracing::warn!(target: LOG_TARGET, key, error = %err, "cache remove failed");
                false
            }
        }
    }

    pub async fn clear_all(&self) -> bool {
        let result = async {
            let _guard = self.gate.lock().await;
            let keys = self.store.keys_with_prefix(CACHE_ENTRY_PREFIX).await?;
            self.store.multi_remove(&keys).await?;

            let mut metadata = self.load_metadata().await?;
            metadata.total_size = 0;
            metadata.item_count = 0;
            self.save_metadata(&metadata).await?;
            Ok::<usize, AppError>(keys.len())
        }
        .await;

        match result {
            Ok(removed) => {
                tracing::debug!(target: LOG_TARGET, removed, "cache cleared");
                true
            }
            Err(err) => {
                tracing::warn!(target: LOG_TARGET, error = %err, "cache clear failed");
                false
            }
        }
    }

    /// 上限を変更する（1 MiB 未満は 1 MiB に切り上げ）。超過していれば即座に退避する。
    pub async fn set_storage_limit(&self, bytes: u64) -> bool {
        let result = async {
            let _guard = self.gate.lock().await;
            let mut metadata = self.load_metadata().await?;
            metadata.storage_limit = bytes.max(MIN_STORAGE_LIMIT_BYTES);
            self.save_metadata(&metadata).await?;

            if metadata.is_over_budget() {
                let target = self.default_target(metadata.storage_limit);
                self.cleanup_locked(target).await?;
            }
            Ok::<(), AppError>(())
        }
        .await;

        match result {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(target: LOG_TARGET, bytes, error = %err, "failed to update storage limit");
                false
            }
        }
    }

    pub async fn stats(&self) -> CacheStats {
        match self.load_metadata().await {
            Ok(metadata) => metadata.stats(),
            Err(err) => {
                tracing::warn!(target: LOG_TARGET, error = %err, "failed to load cache stats");
                CacheMetadata::empty(self.initial_limit).stats()
            }
        }
    }

    /// Evicts entries until the cache fits in `target_bytes`
    /// (defaults to the configured ratio of the current limit).
    ///
    /// Order: unreadable and expired entries, then ascending priority, then
    /// least recently accessed. Returns the number of entries removed.
    pub async fn cleanup(&self, target_bytes: Option<u64>) -> u32 {
        let result = async {
            let _guard = self.gate.lock().await;
            let target = match target_bytes {
                Some(target) => target,
                None => {
                    let metadata = self.load_metadata().await?;
                    self.default_target(metadata.storage_limit)
                }
            };
            self.cleanup_locked(target).await
        }
        .await;

        match result {
            Ok(removed) => removed,
            Err(err) => {
                tracing::warn!(target: LOG_TARGET, error = %err, "cache cleanup failed");
                0
            }
        }
    }

    /// 期限切れのエントリだけを削除する。
    pub async fn purge_expired(&self) -> u32 {
        let result = async {
            let _guard = self.gate.lock().await;
            let now = Utc::now();
            let entries = self.load_entries().await?;
            let (expired, kept): (Vec<_>, Vec<_>) = entries
                .into_iter()
                .partition(|loaded| Self::is_stale(loaded, now));

            let keys: Vec<String> = expired.iter().map(|e| e.storage_key.clone()).collect();
            self.store.multi_remove(&keys).await?;

            let mut metadata = self.load_metadata().await?;
            Self::recount(&mut metadata, &kept);
            self.save_metadata(&metadata).await?;
            Ok::<u32, AppError>(keys.len() as u32)
        }
        .await;

        match result {
            Ok(removed) => removed,
            Err(err) => {
                tracing::warn!(target: LOG_TARGET, error = %err, "expired cache purge failed");
                0
            }
        }
    }

    /// キー接頭辞に一致するエントリを削除する（テーブル単位の無効化用）。
    pub async fn remove_by_prefix(&self, prefix: &str) -> u32 {
        let result = async {
            let _guard = self.gate.lock().await;
            let storage_prefix = format!("{CACHE_ENTRY_PREFIX}{prefix}");
            let keys = self.store.keys_with_prefix(&storage_prefix).await?;
            if keys.is_empty() {
                return Ok(0);
            }

            let values = self.store.multi_get(&keys).await?;
            let mut metadata = self.load_metadata().await?;
            for (_, raw) in &values {
                if let Some(raw) = raw {
                    metadata.record_removal(Self::size_of_raw(raw));
                }
            }
            self.store.multi_remove(&keys).await?;
            self.save_metadata(&metadata).await?;
            Ok::<u32, AppError>(keys.len() as u32)
        }
        .await;

        match result {
            Ok(removed) => removed,
            Err(err) => {
                tracing::warn!(target: LOG_TARGET, prefix, error = %err, "prefix invalidation failed");
                0
            }
        }
    }

    async fn try_put<T: Serialize + ?Sized>(
        &self,
        key: &str,
        data: &T,
        expiration_ms: Option<i64>,
        priority: Option<CachePriority>,
    ) -> Result<(), AppError> {
        let cache_key = CacheKey::new(key.to_string()).map_err(AppError::ValidationError)?;
        let value = serde_json::to_value(data)?;
        let entry = CacheEntry::new(
            cache_key.clone(),
            value,
            expiration_ms.unwrap_or(self.config.default_expiration_ms),
            priority.unwrap_or_else(|| CachePriority::new(self.config.default_priority)),
            Utc::now(),
        )
        .map_err(AppError::SerializationError)?;

        let storage_key = Self::storage_key(&cache_key);
        let _guard = self.gate.lock().await;

        let previous = self.store.get_item(&storage_key).await?;
        let mut metadata = self.load_metadata().await?;
        match previous {
            Some(raw) => metadata.record_replace(Self::size_of_raw(&raw), entry.size),
            None => metadata.record_insert(entry.size),
        }

        self.store
            .multi_set(vec![
                (storage_key, serde_json::to_string(&entry)?),
                (CACHE_METADATA_KEY.to_string(), serde_json::to_string(&metadata)?),
            ])
            .await?;

        if metadata.is_over_budget() {
            let target = self.default_target(metadata.storage_limit);
            let removed = self.cleanup_locked(target).await?;
            tracing::debug!(target: LOG_TARGET, removed, "eviction after put");
        }
        Ok(())
    }

    async fn try_get(&self, key: &str) -> Result<Option<Value>, AppError> {
        let cache_key = CacheKey::new(key.to_string()).map_err(AppError::ValidationError)?;
        let storage_key = Self::storage_key(&cache_key);
        let _guard = self.gate.lock().await;

        let Some(raw) = self.store.get_item(&storage_key).await? else {
            return Ok(None);
        };

        let now = Utc::now();
        let mut entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(target: LOG_TARGET, key, error = %err, "dropping unreadable cache entry");
                self.remove_locked(&storage_key).await?;
                return Ok(None);
            }
        };

        if entry.is_expired(now) {
            self.remove_locked(&storage_key).await?;
            return Ok(None);
        }

        entry.touch(now);
        self.store
            .set_item(&storage_key, serde_json::to_string(&entry)?)
            .await?;
        Ok(Some(entry.data))
    }

    /// Returns whether an entry was present.
    async fn remove_locked(&self, storage_key: &str) -> Result<bool, AppError> {
        let Some(raw) = self.store.get_item(storage_key).await? else {
            return Ok(false);
        };
        let mut metadata = self.load_metadata().await?;
        metadata.record_removal(Self::size_of_raw(&raw));

        self.store.remove_item(storage_key).await?;
        self.save_metadata(&metadata).await?;
        Ok(true)
    }

    async fn cleanup_locked(&self, target_bytes: u64) -> Result<u32, AppError> {
        let now = Utc::now();
        let mut entries = self.load_entries().await?;
        entries.sort_by(|a, b| Self::eviction_order(a, b, now));

        // 実エントリから集計し直す（カウンタのずれを補正）
        let mut current: u64 = entries.iter().map(|loaded| loaded.size).sum();
        let mut evicted = Vec::new();
        let mut remaining = Vec::new();
        for loaded in entries {
            if current > target_bytes {
                current = current.saturating_sub(loaded.size);
                evicted.push(loaded.storage_key);
            } else {
                remaining.push(loaded);
            }
        }

        self.store.multi_remove(&evicted).await?;

        let mut metadata = self.load_metadata().await?;
        Self::recount(&mut metadata, &remaining);
        metadata.last_cleanup = Some(now);
        self.save_metadata(&metadata).await?;

        tracing::debug!(
            target: LOG_TARGET,
            evicted = evicted.len(),
            total_size = metadata.total_size,
            target_bytes,
            "cache cleanup finished"
        );
        Ok(evicted.len() as u32)
    }

    fn eviction_order(a: &LoadedEntry, b: &LoadedEntry, now: DateTime<Utc>) -> Ordering {
        match (&a.entry, &b.entry) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(left), Some(right)) => {
                // expired-first → priority asc → last_accessed asc
                right
                    .is_expired(now)
                    .cmp(&left.is_expired(now))
                    .then_with(|| left.priority.cmp(&right.priority))
                    .then_with(|| left.last_accessed.cmp(&right.last_accessed))
            }
        }
    }

    fn is_stale(loaded: &LoadedEntry, now: DateTime<Utc>) -> bool {
        loaded
            .entry
            .as_ref()
            .map(|entry| entry.is_expired(now))
            .unwrap_or(true)
    }

    fn recount(metadata: &mut CacheMetadata, remaining: &[LoadedEntry]) {
        metadata.total_size = remaining.iter().map(|loaded| loaded.size).sum();
        metadata.item_count = remaining.len() as u64;
    }

    async fn load_entries(&self) -> Result<Vec<LoadedEntry>, AppError> {
        let keys = self.store.keys_with_prefix(CACHE_ENTRY_PREFIX).await?;
        let values = self.store.multi_get(&keys).await?;

        Ok(values
            .into_iter()
            .filter_map(|(storage_key, raw)| {
                let raw = raw?;
                let entry = serde_json::from_str::<CacheEntry>(&raw).ok();
                let size = entry
                    .as_ref()
                    .map(|entry| entry.size)
                    .unwrap_or(raw.len() as u64);
                Some(LoadedEntry {
                    storage_key,
                    size,
                    entry,
                })
            })
            .collect())
    }

    async fn load_metadata(&self) -> Result<CacheMetadata, AppError> {
        match self.store.get_item(CACHE_METADATA_KEY).await? {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(metadata) => Ok(metadata),
                Err(err) => {
                    tracing::warn!(target: LOG_TARGET, error = %err, "resetting unreadable cache metadata");
                    Ok(CacheMetadata::empty(self.initial_limit))
                }
            },
            None => Ok(CacheMetadata::empty(self.initial_limit)),
        }
    }

    async fn save_metadata(&self, metadata: &CacheMetadata) -> Result<(), AppError> {
        self.store
            .set_item(CACHE_METADATA_KEY, serde_json::to_string(metadata)?)
            .await
    }

    fn default_target(&self, limit: u64) -> u64 {
        let ratio = self.config.cleanup_target_ratio.clamp(0.0, 1.0);
        (limit as f64 * ratio) as u64
    }

    fn size_of_raw(raw: &str) -> u64 {
        serde_json::from_str::<CacheEntry>(raw)
            .map(|entry| entry.size)
            .unwrap_or(raw.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::storage::MemoryKeyValueStore;
    use serde_json::json;
    use std::time::Duration;

    fn service_with_limit(limit: u64) -> (CacheService, Arc<MemoryKeyValueStore>) {
        let store = Arc::new(MemoryKeyValueStore::new());
        let config = CacheConfig {
            storage_limit_bytes: limit,
            ..CacheConfig::default()
        };
        (CacheService::new(store.clone(), config), store)
    }

    fn blob(bytes: usize) -> Value {
        json!({ "payload": "x".repeat(bytes) })
    }

    #[tokio::test]
    async fn test_put_then_get_roundtrip() {
        let (cache, _) = service_with_limit(MIN_STORAGE_LIMIT_BYTES);

        assert!(cache.put("workout:1", &json!({"a": 1}), None, None).await);
        let value: Option<Value> = cache.get("workout:1").await;
        assert_eq!(value, Some(json!({"a": 1})));

        let stats = cache.stats().await;
        assert_eq!(stats.item_count, 1);
        assert_eq!(stats.total_size, r#"{"a":1}"#.len() as u64);
    }

    #[tokio::test]
    async fn test_replacing_key_keeps_item_count() {
        let (cache, _) = service_with_limit(MIN_STORAGE_LIMIT_BYTES);

        cache.put("k", &json!({"a": 1}), None, None).await;
        cache.put("k", &json!({"a": 12345}), None, None).await;

        let stats = cache.stats().await;
        assert_eq!(stats.item_count, 1);
        assert_eq!(stats.total_size, r#"{"a":12345}"#.len() as u64);
    }

    #[tokio::test]
    async fn test_expired_entry_is_purged_on_read() {
        let (cache, store) = service_with_limit(MIN_STORAGE_LIMIT_BYTES);

        cache.put("short", &json!({"a": 1}), Some(1), None).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let value: Option<Value> = cache.get("short").await;
        assert!(value.is_none());
        assert!(store.get_item("cache_entry:short").await.unwrap().is_none());
        assert_eq!(cache.stats().await.item_count, 0);
    }

    #[tokio::test]
    async fn test_get_with_wrong_type_returns_none() {
        let (cache, _) = service_with_limit(MIN_STORAGE_LIMIT_BYTES);
        cache.put("k", &json!({"a": 1}), None, None).await;

        let value: Option<Vec<String>> = cache.get("k").await;
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_storage_limit_has_floor() {
        let (cache, _) = service_with_limit(MIN_STORAGE_LIMIT_BYTES);

        assert!(cache.set_storage_limit(10).await);
        assert_eq!(cache.stats().await.storage_limit, MIN_STORAGE_LIMIT_BYTES);
    }

    #[tokio::test]
    async fn test_put_over_budget_evicts_to_target() {
        let (cache, _) = service_with_limit(MIN_STORAGE_LIMIT_BYTES);
        let chunk = 200 * 1024;

        for i in 0..6 {
            cache
                .put(&format!("blob:{i}"), &blob(chunk), None, None)
                .await;
        }

        let stats = cache.stats().await;
        let target = (MIN_STORAGE_LIMIT_BYTES as f64 * 0.8) as u64;
        assert!(stats.total_size <= target, "total {} > target {}", stats.total_size, target);
        assert!(stats.last_cleanup.is_some());
    }

    #[tokio::test]
    async fn test_eviction_prefers_low_priority_then_oldest_access() {
        let (cache, _) = service_with_limit(MIN_STORAGE_LIMIT_BYTES);

        cache.put("low-old", &blob(100), None, Some(CachePriority::new(1))).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.put("low-new", &blob(100), None, Some(CachePriority::new(1))).await;
        cache.put("high", &blob(100), None, Some(CachePriority::new(9))).await;

        // "low-old" に触れて最終アクセスを新しくする
        tokio::time::sleep(Duration::from_millis(5)).await;
        let _: Option<Value> = cache.get("low-old").await;

        let one_entry = blob(100).to_string().len() as u64;
        let removed = cache.cleanup(Some(one_entry * 2)).await;
        assert_eq!(removed, 1);

        assert!(cache.get::<Value>("low-new").await.is_none());
        assert!(cache.get::<Value>("low-old").await.is_some());
        assert!(cache.get::<Value>("high").await.is_some());
    }

    #[tokio::test]
    async fn test_cleanup_removes_expired_before_low_priority() {
        let (cache, _) = service_with_limit(MIN_STORAGE_LIMIT_BYTES);

        cache.put("cheap", &blob(100), None, Some(CachePriority::new(1))).await;
        cache
            .put("stale-important", &blob(100), Some(1), Some(CachePriority::new(10)))
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let one_entry = blob(100).to_string().len() as u64;
        let removed = cache.cleanup(Some(one_entry)).await;
        assert_eq!(removed, 1);
        assert!(cache.get::<Value>("cheap").await.is_some());
    }

    #[tokio::test]
    async fn test_clear_all_and_prefix_invalidation() {
        let (cache, store) = service_with_limit(MIN_STORAGE_LIMIT_BYTES);

        cache.put("query:workouts:a", &json!(1), None, None).await;
        cache.put("query:workouts:b", &json!(2), None, None).await;
        cache.put("query:exercises:a", &json!(3), None, None).await;

        assert_eq!(cache.remove_by_prefix("query:workouts:").await, 2);
        assert_eq!(cache.stats().await.item_count, 1);

        assert!(cache.clear_all().await);
        let stats = cache.stats().await;
        assert_eq!(stats.item_count, 0);
        assert_eq!(stats.total_size, 0);
        assert!(store.keys_with_prefix(CACHE_ENTRY_PREFIX).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_purge_expired_only_touches_expired() {
        let (cache, _) = service_with_limit(MIN_STORAGE_LIMIT_BYTES);

        cache.put("fresh", &json!(1), None, None).await;
        cache.put("stale", &json!(2), Some(1), None).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(cache.purge_expired().await, 1);
        assert_eq!(cache.stats().await.item_count, 1);
    }

    #[tokio::test]
    async fn test_empty_key_is_rejected() {
        let (cache, _) = service_with_limit(MIN_STORAGE_LIMIT_BYTES);
        assert!(!cache.put("", &json!(1), None, None).await);
        assert!(cache.get::<Value>("").await.is_none());
    }
}
