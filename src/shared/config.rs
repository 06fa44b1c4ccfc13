use crate::domain::value_objects::offline::ResolutionStrategy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const MIN_STORAGE_LIMIT_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub cache: CacheConfig,
    pub sync: SyncConfig,
    pub connectivity: ConnectivityConfig,
    pub remote: RemoteConfig,
    pub conflicts: ConflictConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub database_url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub storage_limit_bytes: u64,
    pub default_expiration_ms: i64,
    pub default_priority: u8,
    /// 掃除後に目指す使用率（上限に対する割合）
    pub cleanup_target_ratio: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub auto_sync: bool,
    pub resolve_conflicts_automatically: bool,
    pub background_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectivityConfig {
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictConfig {
    pub table_strategies: HashMap<String, ResolutionStrategy>,
    pub fallback: ResolutionStrategy,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                database_url: default_database_url(),
                max_connections: 5,
            },
            cache: CacheConfig::default(),
            sync: SyncConfig {
                auto_sync: true,
                resolve_conflicts_automatically: false,
                background_interval_secs: 900, // 15 minutes
            },
            connectivity: ConnectivityConfig {
                poll_interval_secs: 30,
            },
            remote: RemoteConfig::default(),
            conflicts: ConflictConfig::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            storage_limit_bytes: 50 * 1024 * 1024, // 50MB
            default_expiration_ms: 60 * 60 * 1000, // 1 hour
            default_priority: 5,
            cleanup_target_ratio: 0.8,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            timeout_secs: 30,
        }
    }
}

impl Default for ConflictConfig {
    fn default() -> Self {
        let table_strategies = HashMap::from([
            ("workout_logs".to_string(), ResolutionStrategy::ClientWins),
            ("exercises".to_string(), ResolutionStrategy::ServerWins),
            ("workouts".to_string(), ResolutionStrategy::Merge),
            ("profiles".to_string(), ResolutionStrategy::ManualResolution),
        ]);
        Self {
            table_strategies,
            fallback: ResolutionStrategy::ServerWins,
        }
    }
}

impl ConflictConfig {
    pub fn strategy_for(&self, table: &str) -> ResolutionStrategy {
        self.table_strategies
            .get(table)
            .copied()
            .unwrap_or(self.fallback)
    }
}

fn default_database_url() -> String {
    let base = dirs::data_local_dir()
        .map(|dir| dir.join("elite-locker"))
        .unwrap_or_else(|| std::path::PathBuf::from("./data"));
    format!("sqlite:{}?mode=rwc", base.join("offline.db").display())
}

impl AppConfig {
    pub fn from_env() -> Self {
        // 既定値
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("ELITE_SYNC_DATABASE_URL") {
            if !v.trim().is_empty() {
                cfg.storage.database_url = v.trim().to_string();
            }
        }

        if let Some(value) = env_u64("ELITE_SYNC_CACHE_LIMIT_BYTES") {
            cfg.cache.storage_limit_bytes = value.max(MIN_STORAGE_LIMIT_BYTES);
        }
        if let Some(value) = env_u64("ELITE_SYNC_CACHE_TTL_MS") {
            cfg.cache.default_expiration_ms = value as i64;
        }

        if let Ok(v) = std::env::var("ELITE_SYNC_AUTO_SYNC") {
            cfg.sync.auto_sync = parse_bool(&v, cfg.sync.auto_sync);
        }
        if let Ok(v) = std::env::var("ELITE_SYNC_AUTO_RESOLVE") {
            cfg.sync.resolve_conflicts_automatically =
                parse_bool(&v, cfg.sync.resolve_conflicts_automatically);
        }
        if let Some(value) = env_u64("ELITE_SYNC_BACKGROUND_INTERVAL_SECS") {
            cfg.sync.background_interval_secs = value.max(60);
        }
        if let Some(value) = env_u64("ELITE_SYNC_POLL_INTERVAL_SECS") {
            cfg.connectivity.poll_interval_secs = value.max(1);
        }

        if let Ok(v) = std::env::var("ELITE_SYNC_REMOTE_URL") {
            cfg.remote.url = Some(v.trim().to_string()).filter(|s| !s.is_empty());
        }
        if let Ok(v) = std::env::var("ELITE_SYNC_REMOTE_API_KEY") {
            cfg.remote.api_key = Some(v.trim().to_string()).filter(|s| !s.is_empty());
        }

        // 例: ELITE_SYNC_CONFLICT_STRATEGIES="workouts=CLIENT_WINS,profiles=SERVER_WINS"
        if let Ok(v) = std::env::var("ELITE_SYNC_CONFLICT_STRATEGIES") {
            for (table, strategy) in parse_strategy_overrides(&v) {
                cfg.conflicts.table_strategies.insert(table, strategy);
            }
        }

        cfg
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.storage.max_connections == 0 {
            return Err("Storage max_connections must be greater than 0".to_string());
        }
        if self.cache.storage_limit_bytes < MIN_STORAGE_LIMIT_BYTES {
            return Err(format!(
                "Cache storage_limit_bytes must be at least {MIN_STORAGE_LIMIT_BYTES}"
            ));
        }
        if !(1..=10).contains(&self.cache.default_priority) {
            return Err("Cache default_priority must be between 1 and 10".to_string());
        }
        if !(self.cache.cleanup_target_ratio > 0.0 && self.cache.cleanup_target_ratio <= 1.0) {
            return Err("Cache cleanup_target_ratio must be in (0, 1]".to_string());
        }
        if self.connectivity.poll_interval_secs == 0 {
            return Err("Connectivity poll_interval_secs must be greater than 0".to_string());
        }
        if self.sync.background_interval_secs == 0 {
            return Err("Sync background_interval_secs must be greater than 0".to_string());
        }
        if let Some(url) = &self.remote.url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err("Remote url must start with http:// or https://".to_string());
            }
        }
        Ok(())
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| parse_u64(&v))
}

fn parse_bool(s: &str, default: bool) -> bool {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

fn parse_u64(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok()
}

fn parse_strategy_overrides(value: &str) -> Vec<(String, ResolutionStrategy)> {
    value
        .split(',')
        .filter_map(|pair| {
            let (table, strategy) = pair.split_once('=')?;
            let table = table.trim();
            if table.is_empty() {
                return None;
            }
            let strategy = ResolutionStrategy::parse(strategy.trim())?;
            Some((table.to_string(), strategy))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.connectivity.poll_interval_secs, 30);
        assert_eq!(cfg.cache.cleanup_target_ratio, 0.8);
    }

    #[test]
    fn default_table_strategies() {
        let conflicts = ConflictConfig::default();
        assert_eq!(
            conflicts.strategy_for("workout_logs"),
            ResolutionStrategy::ClientWins
        );
        assert_eq!(conflicts.strategy_for("exercises"), ResolutionStrategy::ServerWins);
        assert_eq!(conflicts.strategy_for("workouts"), ResolutionStrategy::Merge);
        assert_eq!(
            conflicts.strategy_for("profiles"),
            ResolutionStrategy::ManualResolution
        );
        assert_eq!(conflicts.strategy_for("clubs"), ResolutionStrategy::ServerWins);
    }

    #[test]
    fn storage_limit_below_floor_is_rejected() {
        let mut cfg = AppConfig::default();
        cfg.cache.storage_limit_bytes = 1024;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn strategy_overrides_skip_garbage() {
        let parsed = parse_strategy_overrides("workouts=CLIENT_WINS, =MERGE,clubs=nope,posts=merge");
        assert_eq!(
            parsed,
            vec![
                ("workouts".to_string(), ResolutionStrategy::ClientWins),
                ("posts".to_string(), ResolutionStrategy::Merge),
            ]
        );
    }

    #[test]
    fn parse_bool_falls_back_to_default() {
        assert!(parse_bool("YES", false));
        assert!(!parse_bool("off", true));
        assert!(parse_bool("maybe", true));
    }
}
