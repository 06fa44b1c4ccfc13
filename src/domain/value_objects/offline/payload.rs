use super::RecordId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Fields never compared when looking for divergence between client and server.
pub const CONFLICT_IGNORED_FIELDS: [&str; 2] = ["id", "created_at"];

/// リモートのレコード（JSON オブジェクト）を表すペイロード。
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct RecordPayload(Map<String, Value>);

impl RecordPayload {
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Err("Record payload cannot be null".to_string()),
            other => Err(format!("Record payload must be a JSON object, got {other}")),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, String> {
        let value: Value =
            serde_json::from_str(json).map_err(|e| format!("Invalid JSON payload: {e}"))?;
        Self::from_value(value)
    }

    /// 任意のシリアライズ可能な型から生成する。
    pub fn from_serializable<T: Serialize>(record: &T) -> Result<Self, String> {
        let value = serde_json::to_value(record)
            .map_err(|e| format!("Failed to serialize record: {e}"))?;
        Self::from_value(value)
    }

    pub fn to_typed<T: DeserializeOwned>(&self) -> Result<T, String> {
        serde_json::from_value(Value::Object(self.0.clone()))
            .map_err(|e| format!("Failed to deserialize record: {e}"))
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(field.into(), value)
    }

    pub fn contains_field(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn record_id(&self) -> Option<RecordId> {
        self.0.get("id").and_then(|v| RecordId::from_json(v).ok())
    }

    /// `id` を除いたフィールド（UPDATE の本体）。
    pub fn without_id(&self) -> Self {
        let mut map = self.0.clone();
        map.remove("id");
        Self(map)
    }

    /// 浅い上書き: `self` を土台に `overlay` のフィールドで置き換える。
    pub fn overlaid_with(&self, overlay: &RecordPayload) -> Self {
        let mut merged = self.0.clone();
        for (key, value) in &overlay.0 {
            merged.insert(key.clone(), value.clone());
        }
        Self(merged)
    }

    /// 再帰的な上書き: 双方がオブジェクトのフィールドは中身をマージする。
    pub fn deep_overlaid_with(&self, overlay: &RecordPayload) -> Self {
        let mut merged = self.0.clone();
        deep_merge_into(&mut merged, &overlay.0);
        Self(merged)
    }

    /// Fields present on both sides (excluding ignored ones) whose values differ.
    pub fn diverging_fields(&self, server: &RecordPayload) -> Vec<String> {
        self.0
            .iter()
            .filter(|(key, _)| !CONFLICT_IGNORED_FIELDS.contains(&key.as_str()))
            .filter_map(|(key, client_value)| {
                let server_value = server.0.get(key)?;
                (!json_values_equal(client_value, server_value)).then(|| key.clone())
            })
            .collect()
    }

    /// シリアライズ後のバイト数。
    pub fn serialized_size(&self) -> usize {
        serde_json::to_string(&self.0).map(|s| s.len()).unwrap_or(0)
    }
}

impl From<RecordPayload> for Value {
    fn from(payload: RecordPayload) -> Self {
        Value::Object(payload.0)
    }
}

impl TryFrom<Value> for RecordPayload {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(value)
    }
}

fn deep_merge_into(base: &mut Map<String, Value>, overlay: &Map<String, Value>) {
    for (key, value) in overlay {
        match (base.get_mut(key), value) {
            (Some(Value::Object(base_obj)), Value::Object(overlay_obj)) => {
                deep_merge_into(base_obj, overlay_obj);
            }
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

/// 深い等価比較。数値は表現ではなく値で比較する（`100` と `100.0` は等しい）。
pub fn json_values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => a == b,
        },
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| json_values_equal(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a
                    .iter()
                    .all(|(k, v)| b.get(k).is_some_and(|other| json_values_equal(v, other)))
        }
        _ => left == right,
    }
}
