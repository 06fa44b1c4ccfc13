use serde::{Deserialize, Serialize};
use std::fmt;

/// コンフリクト解決戦略。
///
/// `Merge` は `ClientWins` と同じ浅い上書きを行う。ネストしたオブジェクトを
/// フィールド単位で統合したい場合は `DeepMerge` を明示的に指定する。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionStrategy {
    ClientWins,
    ServerWins,
    Merge,
    ManualResolution,
    DeepMerge,
}

impl ResolutionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStrategy::ClientWins => "CLIENT_WINS",
            ResolutionStrategy::ServerWins => "SERVER_WINS",
            ResolutionStrategy::Merge => "MERGE",
            ResolutionStrategy::ManualResolution => "MANUAL_RESOLUTION",
            ResolutionStrategy::DeepMerge => "DEEP_MERGE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "CLIENT_WINS" => Some(ResolutionStrategy::ClientWins),
            "SERVER_WINS" => Some(ResolutionStrategy::ServerWins),
            "MERGE" => Some(ResolutionStrategy::Merge),
            "MANUAL_RESOLUTION" => Some(ResolutionStrategy::ManualResolution),
            "DEEP_MERGE" => Some(ResolutionStrategy::DeepMerge),
            _ => None,
        }
    }

    pub fn requires_user_input(&self) -> bool {
        matches!(self, ResolutionStrategy::ManualResolution)
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
