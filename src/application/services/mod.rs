pub mod cache_service;
pub mod conflict_service;
pub mod connectivity_service;
pub mod offline_data_service;
pub mod operation_queue;
pub mod sync_service;

pub use cache_service::CacheService;
pub use conflict_service::ConflictResolver;
pub use connectivity_service::{ConnectivityMonitor, ConnectivityState};
pub use offline_data_service::{CachePolicy, OfflineDataService, WriteOutcome};
pub use operation_queue::{OperationQueue, QueueScan};
pub use sync_service::{
    DrainOptions, ProgressCallback, SyncOrchestrator, SyncState, SyncStatusSnapshot,
};
