use crate::domain::entities::DrainResult;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{LazyLock, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DrainOutcomeStatus {
    /// 失敗なしで完了（衝突や保留は含んでよい）
    Clean,
    /// 1 件以上のリモート失敗が残った
    Degraded,
}

impl DrainOutcomeStatus {
    pub fn from_result(result: &DrainResult) -> Self {
        if result.failed_count == 0 {
            DrainOutcomeStatus::Clean
        } else {
            DrainOutcomeStatus::Degraded
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DrainMetricsSnapshot {
    pub total_clean: u64,
    pub total_degraded: u64,
    pub consecutive_degraded: u64,
    pub total_applied: u64,
    pub total_conflicts: u64,
    pub total_quarantined: u64,
    pub last_clean_ms: Option<u64>,
    pub last_degraded_ms: Option<u64>,
    pub last_outcome: Option<DrainOutcomeStatus>,
    pub last_trigger: Option<String>,
    pub last_duration_ms: Option<u64>,
    pub last_result: Option<DrainResult>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DrainOutcomeMetadata {
    pub trigger: Option<String>,
    pub duration_ms: Option<u64>,
}

#[derive(Default, Clone)]
struct LastDrainMetadata {
    last_outcome: Option<DrainOutcomeStatus>,
    trigger: Option<String>,
    duration_ms: Option<u64>,
    result: Option<DrainResult>,
}

struct DrainMetrics {
    clean: AtomicU64,
    degraded: AtomicU64,
    consecutive_degraded: AtomicU64,
    applied: AtomicU64,
    conflicts: AtomicU64,
    quarantined: AtomicU64,
    last_clean_ms: AtomicU64,
    last_degraded_ms: AtomicU64,
    metadata: Mutex<LastDrainMetadata>,
}

impl DrainMetrics {
    fn new() -> Self {
        Self {
            clean: AtomicU64::new(0),
            degraded: AtomicU64::new(0),
            consecutive_degraded: AtomicU64::new(0),
            applied: AtomicU64::new(0),
            conflicts: AtomicU64::new(0),
            quarantined: AtomicU64::new(0),
            last_clean_ms: AtomicU64::new(0),
            last_degraded_ms: AtomicU64::new(0),
            metadata: Mutex::new(LastDrainMetadata::default()),
        }
    }

    fn record(&self, result: &DrainResult, meta: &DrainOutcomeMetadata) {
        let status = DrainOutcomeStatus::from_result(result);
        match status {
            DrainOutcomeStatus::Clean => {
                self.clean.fetch_add(1, Ordering::Relaxed);
                self.last_clean_ms
                    .store(current_unix_ms(), Ordering::Relaxed);
                self.consecutive_degraded.store(0, Ordering::Relaxed);
            }
            DrainOutcomeStatus::Degraded => {
                self.degraded.fetch_add(1, Ordering::Relaxed);
                self.last_degraded_ms
                    .store(current_unix_ms(), Ordering::Relaxed);
                self.consecutive_degraded.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.applied
            .fetch_add(u64::from(result.success_count), Ordering::Relaxed);
        self.conflicts
            .fetch_add(u64::from(result.conflict_count), Ordering::Relaxed);
        self.quarantined
            .fetch_add(u64::from(result.quarantined_count), Ordering::Relaxed);

        if let Ok(mut guard) = self.metadata.lock() {
            guard.last_outcome = Some(status);
            guard.trigger = meta.trigger.clone();
            guard.duration_ms = meta.duration_ms;
            guard.result = Some(*result);
        }
    }

    fn snapshot(&self) -> DrainMetricsSnapshot {
        let metadata = self
            .metadata
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_else(|_| LastDrainMetadata::default());

        DrainMetricsSnapshot {
            total_clean: self.clean.load(Ordering::Relaxed),
            total_degraded: self.degraded.load(Ordering::Relaxed),
            consecutive_degraded: self.consecutive_degraded.load(Ordering::Relaxed),
            total_applied: self.applied.load(Ordering::Relaxed),
            total_conflicts: self.conflicts.load(Ordering::Relaxed),
            total_quarantined: self.quarantined.load(Ordering::Relaxed),
            last_clean_ms: to_option(self.last_clean_ms.load(Ordering::Relaxed)),
            last_degraded_ms: to_option(self.last_degraded_ms.load(Ordering::Relaxed)),
            last_outcome: metadata.last_outcome,
            last_trigger: metadata.trigger,
            last_duration_ms: metadata.duration_ms,
            last_result: metadata.result,
        }
    }
}

fn to_option(value: u64) -> Option<u64> {
    if value == 0 { None } else { Some(value) }
}

fn current_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}

static DRAIN_METRICS: LazyLock<DrainMetrics> = LazyLock::new(DrainMetrics::new);

pub fn record_drain(result: &DrainResult, metadata: &DrainOutcomeMetadata) -> DrainMetricsSnapshot {
    DRAIN_METRICS.record(result, metadata);
    DRAIN_METRICS.snapshot()
}

pub fn snapshot() -> DrainMetricsSnapshot {
    DRAIN_METRICS.snapshot()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_clean_and_degraded_drains() {
        let before = snapshot();

        let clean = DrainResult {
            success_count: 2,
            conflict_count: 1,
            ..DrainResult::default()
        };
        let meta = DrainOutcomeMetadata {
            trigger: Some("manual".into()),
            duration_ms: Some(40),
        };
        let after_clean = record_drain(&clean, &meta);
        assert!(after_clean.total_clean > before.total_clean);
        assert!(after_clean.total_applied >= before.total_applied + 2);

        let degraded = DrainResult {
            failed_count: 1,
            ..DrainResult::default()
        };
        let after_degraded = record_drain(&degraded, &DrainOutcomeMetadata::default());
        assert!(after_degraded.total_degraded > before.total_degraded);
        assert!(after_degraded.last_degraded_ms.is_some());
    }

    #[test]
    fn status_reflects_failures_only() {
        let with_conflicts = DrainResult {
            conflict_count: 3,
            blocked_count: 1,
            ..DrainResult::default()
        };
        assert_eq!(
            DrainOutcomeStatus::from_result(&with_conflicts),
            DrainOutcomeStatus::Clean
        );

        let with_failure = DrainResult {
            failed_count: 1,
            ..DrainResult::default()
        };
        assert_eq!(
            DrainOutcomeStatus::from_result(&with_failure),
            DrainOutcomeStatus::Degraded
        );
    }
}
