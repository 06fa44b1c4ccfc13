pub mod offline;

pub use offline::{
    CacheEntry, CacheMetadata, CacheStats, Conflict, DrainResult, MalformedOperation,
    QuarantinedOperation, SyncOperation,
};
