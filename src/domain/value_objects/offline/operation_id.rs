use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

const SUFFIX_LEN: usize = 9;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// 同期キュー内の操作ID。
///
/// `{13桁ゼロ埋めのミリ秒}_{9文字のbase36乱数}` 形式で、文字列順がそのまま投入順になる。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationId(String);

impl OperationId {
    pub fn generate(at: DateTime<Utc>) -> Self {
        let mut rng = rand::thread_rng();
        let suffix: String = (0..SUFFIX_LEN)
            .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
            .collect();
        let millis = at.timestamp_millis().max(0);
        Self(format!("{millis:013}_{suffix}"))
    }

    pub fn parse(value: &str) -> Result<Self, String> {
        Self::validate(value)?;
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// ID に埋め込まれた投入時刻（ミリ秒）。
    pub fn timestamp_millis(&self) -> Option<i64> {
        self.0.split_once('_').and_then(|(ms, _)| ms.parse().ok())
    }

    fn validate(value: &str) -> Result<(), String> {
        let Some((millis, suffix)) = value.split_once('_') else {
            return Err(format!("Operation ID is missing its suffix: {value}"));
        };
        if millis.is_empty() || !millis.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!("Operation ID has a non-numeric timestamp: {value}"));
        }
        if suffix.is_empty() {
            return Err(format!("Operation ID has an empty suffix: {value}"));
        }
        Ok(())
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<OperationId> for String {
    fn from(id: OperationId) -> Self {
        id.0
    }
}

impl FromStr for OperationId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn generated_ids_sort_by_time() {
        let now = Utc::now();
        let earlier = OperationId::generate(now);
        let later = OperationId::generate(now + Duration::milliseconds(1));
        assert!(earlier < later);
        assert_eq!(earlier.timestamp_millis(), Some(now.timestamp_millis()));
    }

    #[test]
    fn generated_ids_round_trip_through_parse() {
        let id = OperationId::generate(Utc::now());
        assert_eq!(OperationId::parse(id.as_str()).unwrap(), id);
    }

    #[test]
    fn parse_rejects_malformed_ids() {
        assert!(OperationId::parse("no-suffix").is_err());
        assert!(OperationId::parse("abc_def").is_err());
        assert!(OperationId::parse("123_").is_err());
    }
}
