pub mod offline;

pub use offline::{
    CacheKey, CachePriority, ConflictId, OperationId, OperationType, RecordId, RecordPayload,
    ResolutionStrategy, TableName,
};
