pub mod cache_key;
pub mod cache_priority;
pub mod conflict_id;
pub mod operation_id;
pub mod operation_type;
pub mod payload;
pub mod record_id;
pub mod resolution_strategy;
pub mod table_name;

pub use cache_key::CacheKey;
pub use cache_priority::CachePriority;
pub use conflict_id::ConflictId;
pub use operation_id::OperationId;
pub use operation_type::OperationType;
pub use payload::{json_values_equal, RecordPayload, CONFLICT_IGNORED_FIELDS};
pub use record_id::RecordId;
pub use resolution_strategy::ResolutionStrategy;
pub use table_name::TableName;
