use crate::domain::value_objects::{CacheKey, CachePriority};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    pub expiration_ms: i64,
    pub size: u64,
    pub priority: CachePriority,
    pub last_accessed: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(
        key: CacheKey,
        data: Value,
        expiration_ms: i64,
        priority: CachePriority,
        now: DateTime<Utc>,
    ) -> Result<Self, String> {
        let size = serde_json::to_string(&data)
            .map_err(|e| format!("Failed to serialize cache data: {e}"))?
            .len() as u64;
        Ok(Self {
            key,
            data,
            timestamp: now,
            expiration_ms,
            size,
            priority,
            last_accessed: now,
        })
    }

    /// `now - timestamp > expiration` のとき論理的に存在しない。
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        (now - self.timestamp).num_milliseconds() > self.expiration_ms
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_accessed = now;
    }
}
