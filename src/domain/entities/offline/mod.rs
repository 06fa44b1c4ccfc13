pub mod cache_entry;
pub mod cache_metadata;
pub mod conflict;
pub mod drain_result;
pub mod quarantined_operation;
pub mod sync_operation;

pub use cache_entry::CacheEntry;
pub use cache_metadata::{CacheMetadata, CacheStats};
pub use conflict::Conflict;
pub use drain_result::DrainResult;
pub use quarantined_operation::{MalformedOperation, QuarantinedOperation};
pub use sync_operation::SyncOperation;
