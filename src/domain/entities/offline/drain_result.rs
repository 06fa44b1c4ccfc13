use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DrainResult {
    pub success_count: u32,
    pub conflict_count: u32,
    pub failed_count: u32,
    /// 未解決コンフリクトの後ろで保留された操作数
    pub blocked_count: u32,
    pub quarantined_count: u32,
}

impl DrainResult {
    pub fn new(success_count: u32, conflict_count: u32) -> Self {
        Self {
            success_count,
            conflict_count,
            ..Self::default()
        }
    }

    /// 成功もコンフリクトも無かった（冪等な再実行）かどうか。
    pub fn is_noop(&self) -> bool {
        self.success_count == 0 && self.conflict_count == 0
    }
}
