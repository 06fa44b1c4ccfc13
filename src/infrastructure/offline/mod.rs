pub mod metrics;

pub use metrics::{DrainMetricsSnapshot, DrainOutcomeMetadata, DrainOutcomeStatus};
