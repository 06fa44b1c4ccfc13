use crate::domain::value_objects::{
    OperationId, OperationType, RecordId, RecordPayload, TableName,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// リモートへ未反映の変更（CREATE/UPDATE/DELETE）。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncOperation {
    pub id: OperationId,
    #[serde(rename = "type")]
    pub op_type: OperationType,
    pub table: TableName,
    pub data: RecordPayload,
    pub timestamp: DateTime<Utc>,
}

impl SyncOperation {
    pub fn new(
        op_type: OperationType,
        table: TableName,
        data: RecordPayload,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, String> {
        if op_type.requires_record_id() && data.record_id().is_none() {
            return Err(format!(
                "{op_type} operation on {table} requires data.id"
            ));
        }
        Ok(Self {
            id: OperationId::generate(timestamp),
            op_type,
            table,
            data,
            timestamp,
        })
    }

    pub fn record_id(&self) -> Option<RecordId> {
        self.data.record_id()
    }

    /// FIFO の並び順キー。
    pub fn ordering_key(&self) -> (DateTime<Utc>, &OperationId) {
        (self.timestamp, &self.id)
    }
}
