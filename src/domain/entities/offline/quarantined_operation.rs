use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 解釈できなかったキュー内レコード。再試行せず隔離して保持する。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuarantinedOperation {
    pub storage_key: String,
    pub raw: Value,
    pub reason: String,
    pub quarantined_at: DateTime<Utc>,
}

impl QuarantinedOperation {
    pub fn new(storage_key: String, raw: Value, reason: String, now: DateTime<Utc>) -> Self {
        Self {
            storage_key,
            raw,
            reason,
            quarantined_at: now,
        }
    }
}

/// A queued record that failed to parse into a `SyncOperation`.
#[derive(Debug, Clone, PartialEq)]
pub struct MalformedOperation {
    pub storage_key: String,
    pub raw: Value,
    pub reason: String,
}
