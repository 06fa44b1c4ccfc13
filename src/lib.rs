//! Offline-first sync core: a durable cache, a persistent write queue, conflict
//! handling against a remote table store, and connectivity-driven draining.

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod shared;
pub mod state;

pub use application::services::{
    CachePolicy, DrainOptions, SyncState, SyncStatusSnapshot, WriteOutcome,
};
pub use domain::entities::{CacheStats, Conflict, DrainResult, SyncOperation};
pub use domain::value_objects::{
    ConflictId, OperationId, OperationType, RecordPayload, ResolutionStrategy, TableName,
};
pub use shared::config::AppConfig;
pub use shared::error::{AppError, RemoteStoreError};
pub use state::OfflineSyncState;
