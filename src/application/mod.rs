pub mod ports;
pub mod services;

pub use services::{
    CacheService, ConflictResolver, ConnectivityMonitor, OfflineDataService, OperationQueue,
    SyncOrchestrator,
};
