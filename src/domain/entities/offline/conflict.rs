use crate::domain::value_objects::{
    ConflictId, OperationId, RecordId, RecordPayload, ResolutionStrategy, TableName,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conflict {
    pub id: ConflictId,
    pub table: TableName,
    pub record_id: RecordId,
    pub client_data: RecordPayload,
    pub server_data: RecordPayload,
    pub timestamp: DateTime<Utc>,
    pub resolved: bool,
    pub resolution: Option<ResolutionStrategy>,
    pub resolved_data: Option<RecordPayload>,
    /// 検出の契機になったキュー内の UPDATE。
    #[serde(default)]
    pub operation_id: Option<OperationId>,
}

impl Conflict {
    pub fn detected(
        table: TableName,
        record_id: RecordId,
        client_data: RecordPayload,
        server_data: RecordPayload,
        enqueued_at: DateTime<Utc>,
        detected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ConflictId::derive(&table, &record_id, enqueued_at),
            table,
            record_id,
            client_data,
            server_data,
            timestamp: detected_at,
            resolved: false,
            resolution: None,
            resolved_data: None,
            operation_id: None,
        }
    }

    pub fn with_operation(mut self, operation_id: OperationId) -> Self {
        self.operation_id = Some(operation_id);
        self
    }

    /// 戦略に従って解決済みデータを計算する。`ManualResolution` は `None`。
    pub fn compute_resolution(&self, strategy: ResolutionStrategy) -> Option<RecordPayload> {
        match strategy {
            ResolutionStrategy::ClientWins | ResolutionStrategy::Merge => {
                Some(self.server_data.overlaid_with(&self.client_data))
            }
            ResolutionStrategy::DeepMerge => {
                Some(self.server_data.deep_overlaid_with(&self.client_data))
            }
            ResolutionStrategy::ServerWins => Some(self.server_data.clone()),
            ResolutionStrategy::ManualResolution => None,
        }
    }

    pub fn mark_resolved(&mut self, strategy: ResolutionStrategy, resolved_data: RecordPayload) {
        self.resolved = true;
        self.resolution = Some(strategy);
        self.resolved_data = Some(resolved_data);
    }

    pub fn is_pending(&self) -> bool {
        !self.resolved
    }
}
