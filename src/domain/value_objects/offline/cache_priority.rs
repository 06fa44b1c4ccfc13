use serde::{Deserialize, Serialize};
use std::fmt;

/// 退避優先度（1〜10、大きいほど後まで残る）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub struct CachePriority(u8);

impl CachePriority {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 10;

    /// 範囲外の値は 1〜10 に丸める。
    pub fn new(value: u8) -> Self {
        Self(value.clamp(Self::MIN, Self::MAX))
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl Default for CachePriority {
    fn default() -> Self {
        Self(5)
    }
}

impl From<u8> for CachePriority {
    fn from(value: u8) -> Self {
        Self::new(value)
    }
}

impl From<CachePriority> for u8 {
    fn from(value: CachePriority) -> Self {
        value.0
    }
}

impl fmt::Display for CachePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_out_of_range_values() {
        assert_eq!(CachePriority::new(0).value(), 1);
        assert_eq!(CachePriority::new(42).value(), 10);
        assert_eq!(CachePriority::new(7).value(), 7);
    }

    #[test]
    fn deserialization_clamps_too() {
        let priority: CachePriority = serde_json::from_str("99").unwrap();
        assert_eq!(priority.value(), 10);
    }
}
