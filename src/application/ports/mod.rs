pub mod background_task;
pub mod drain_trigger;
pub mod key_value_store;
pub mod remote_store;

pub use background_task::BackgroundTaskRegistrar;
pub use drain_trigger::{DrainTrigger, SyncTriggerReason};
pub use key_value_store::KeyValueStore;
pub use remote_store::{RemoteFilter, RemoteStore};
