//! Dynamic envelope payload values (§9 design note: "represent as a tagged
//! value... require the caller to declare a schema for the cleartext
//! payload they intend to marshal").
//!
//! The enum itself is the tag; on the wire every variant serializes as its
//! natural JSON shape except `Bytes`, which is wrapped in a single-key
//! `{"$bytes": "<base64>"}` object so it round-trips unambiguously through
//! plain JSON (which has no native byte-string type).

use std::collections::BTreeMap;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

const BYTES_TAG: &str = "$bytes";

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Bytes(b) => {
                let mut obj = serde_json::Map::new();
                obj.insert(BYTES_TAG.to_string(), serde_json::Value::String(URL_SAFE_NO_PAD.encode(b)));
                serde_json::Value::Object(obj)
            }
            Value::List(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(map) => {
                let mut obj = serde_json::Map::new();
                for (k, v) in map {
                    let json = v.to_json();
                    if json.is_null() {
                        continue;
                    }
                    obj.insert(k.clone(), json);
                }
                serde_json::Value::Object(obj)
            }
        }
    }

    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => Value::List(items.iter().map(Value::from_json).collect()),
            serde_json::Value::Object(obj) => {
                if obj.len() == 1 {
                    if let Some(serde_json::Value::String(b64)) = obj.get(BYTES_TAG) {
                        if let Ok(bytes) = URL_SAFE_NO_PAD.decode(b64) {
                            return Value::Bytes(bytes);
                        }
                    }
                }
                Value::Map(obj.iter().map(|(k, v)| (k.clone(), Value::from_json(v))).collect())
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let json = serde_json::Value::deserialize(deserializer)?;
        Ok(Value::from_json(&json))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_roundtrip_through_json() {
        let original = Value::Bytes(vec![1, 2, 3, 255]);
        let json = serde_json::to_string(&original).unwrap();
        let parsed: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(original, parsed);
    }

    #[test]
    fn map_keys_are_sorted_on_serialize() {
        let mut map = BTreeMap::new();
        map.insert("zeta".to_string(), Value::Bool(true));
        map.insert("alpha".to_string(), Value::Number(1.0));
        let value = Value::Map(map);
        let json = serde_json::to_string(&value).unwrap();
        assert!(json.find("alpha").unwrap() < json.find("zeta").unwrap());
    }

    #[test]
    fn null_fields_are_omitted_from_maps() {
        let mut map = BTreeMap::new();
        map.insert("present".to_string(), Value::String("x".into()));
        map.insert("absent".to_string(), Value::Null);
        let json = serde_json::to_string(&Value::Map(map)).unwrap();
        assert!(!json.contains("absent"));
    }
}
