pub mod entities;
pub mod value_objects;

pub use entities::offline::{Conflict, SyncOperation};
pub use value_objects::offline::{OperationType, RecordPayload, ResolutionStrategy, TableName};
