pub mod memory_remote_store;
pub mod postgrest_client;
pub mod unconfigured_remote_store;

pub use memory_remote_store::InMemoryRemoteStore;
pub use postgrest_client::PostgrestRemoteStore;
pub use unconfigured_remote_store::UnconfiguredRemoteStore;
