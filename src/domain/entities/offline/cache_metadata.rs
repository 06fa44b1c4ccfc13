use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// キャッシュ全体の集計値（プロセス共通の単一レコード）。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheMetadata {
    pub total_size: u64,
    pub item_count: u64,
    pub storage_limit: u64,
    pub last_cleanup: Option<DateTime<Utc>>,
}

impl CacheMetadata {
    pub fn empty(storage_limit: u64) -> Self {
        Self {
            total_size: 0,
            item_count: 0,
            storage_limit,
            last_cleanup: None,
        }
    }

    pub fn record_insert(&mut self, size: u64) {
        self.total_size = self.total_size.saturating_add(size);
        self.item_count = self.item_count.saturating_add(1);
    }

    pub fn record_replace(&mut self, old_size: u64, new_size: u64) {
        self.total_size = self.total_size.saturating_sub(old_size).saturating_add(new_size);
    }

    pub fn record_removal(&mut self, size: u64) {
        self.total_size = self.total_size.saturating_sub(size);
        self.item_count = self.item_count.saturating_sub(1);
    }

    pub fn is_over_budget(&self) -> bool {
        self.total_size > self.storage_limit
    }

    pub fn stats(&self) -> CacheStats {
        let usage_percentage = if self.storage_limit == 0 {
            0.0
        } else {
            self.total_size as f64 / self.storage_limit as f64 * 100.0
        };
        CacheStats {
            total_size: self.total_size,
            item_count: self.item_count,
            storage_limit: self.storage_limit,
            last_cleanup: self.last_cleanup,
            usage_percentage,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub total_size: u64,
    pub item_count: u64,
    pub storage_limit: u64,
    pub last_cleanup: Option<DateTime<Utc>>,
    pub usage_percentage: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_never_underflow() {
        let mut meta = CacheMetadata::empty(1024);
        meta.record_removal(50);
        assert_eq!(meta.total_size, 0);
        assert_eq!(meta.item_count, 0);
    }

    #[test]
    fn usage_percentage_is_relative_to_limit() {
        let mut meta = CacheMetadata::empty(200);
        meta.record_insert(50);
        assert_eq!(meta.stats().usage_percentage, 25.0);
        meta.record_replace(50, 250);
        assert!(meta.is_over_budget());
    }
}
