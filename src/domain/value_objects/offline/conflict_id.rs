use super::{RecordId, TableName};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConflictId(String);

impl ConflictId {
    pub fn new(value: String) -> Result<Self, String> {
        if value.trim().is_empty() {
            return Err("Conflict ID cannot be empty".to_string());
        }
        Ok(Self(value))
    }

    /// `{table}_{recordId}_{enqueuedMillis}` で導出する。
    pub fn derive(table: &TableName, record_id: &RecordId, enqueued_at: DateTime<Utc>) -> Self {
        Self(format!(
            "{}_{}_{}",
            table.as_str(),
            record_id.as_str(),
            enqueued_at.timestamp_millis()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConflictId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<ConflictId> for String {
    fn from(value: ConflictId) -> Self {
        value.0
    }
}
