use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value as JsonValue;

use crate::core::{DbError, Result};

/// Document payload: a string-keyed map of store values.
pub type Fields = BTreeMap<String, Value>;

/// The document store's value model.
///
/// Schema-less by design: every field of every document is one of these
/// variants. `Timestamp`, `Reference` and `GeoPoint` are the store-native
/// wrapper types that get normalized to plain JSON on the way out.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Timestamp(DateTime<Utc>),
    Reference(String),
    GeoPoint { latitude: f64, longitude: f64 },
    Array(Vec<Value>),
    Map(Fields),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Bool(_) => "BOOLEAN",
            Self::Integer(_) => "INTEGER",
            Self::Float(_) => "FLOAT",
            Self::Text(_) => "TEXT",
            Self::Bytes(_) => "BYTES",
            Self::Timestamp(_) => "TIMESTAMP",
            Self::Reference(_) => "REFERENCE",
            Self::GeoPoint { .. } => "GEO_POINT",
            Self::Array(_) => "ARRAY",
            Self::Map(_) => "MAP",
        }
    }

    /// Ordering used by query filters and order-by evaluation.
    ///
    /// NULL sorts before everything; mixed numeric types coerce; any other
    /// cross-type comparison is a query error.
    pub fn compare(&self, other: &Value) -> Result<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Ok(Ordering::Equal),
            (Value::Null, _) => Ok(Ordering::Less),
            (_, Value::Null) => Ok(Ordering::Greater),

            (Value::Bool(a), Value::Bool(b)) => Ok(a.cmp(b)),
            (Value::Integer(a), Value::Integer(b)) => Ok(a.cmp(b)),
            (Value::Text(a), Value::Text(b)) => Ok(a.cmp(b)),
            (Value::Reference(a), Value::Reference(b)) => Ok(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Ok(a.cmp(b)),
            (Value::Bytes(a), Value::Bytes(b)) => Ok(a.cmp(b)),

            (Value::Float(a), Value::Float(b)) => {
                Ok(a.partial_cmp(b).unwrap_or(Ordering::Equal))
            }
            (Value::Integer(a), Value::Float(b)) => {
                Ok((*a as f64).partial_cmp(b).unwrap_or(Ordering::Equal))
            }
            (Value::Float(a), Value::Integer(b)) => {
                Ok(a.partial_cmp(&(*b as f64)).unwrap_or(Ordering::Equal))
            }

            _ => Err(DbError::Query(format!(
                "Cannot compare incompatible types: {} and {}",
                self.type_name(),
                other.type_name()
            ))),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::Float(f) if f.is_finite() && f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Reference(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer(_) | Self::Float(_))
    }

    /// Convert a JSON value into a store value.
    ///
    /// Lossless for everything JSON can express; numbers become `Integer`
    /// when they fit, `Float` otherwise.
    pub fn from_json(json: &JsonValue) -> Value {
        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(*b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Integer(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            JsonValue::String(s) => Value::Text(s.clone()),
            JsonValue::Array(items) => Value::Array(items.iter().map(Value::from_json).collect()),
            JsonValue::Object(obj) => Value::Map(
                obj.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert to plain JSON, normalizing store-native wrappers:
    /// timestamps render as RFC 3339 strings, references as path strings,
    /// geo-points as `{latitude, longitude}` maps, bytes as hex.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Null => JsonValue::Null,
            Self::Bool(b) => JsonValue::Bool(*b),
            Self::Integer(i) => JsonValue::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Self::Text(s) => JsonValue::String(s.clone()),
            Self::Bytes(b) => {
                let mut hex = String::with_capacity(b.len() * 2);
                for byte in b {
                    hex.push_str(&format!("{:02x}", byte));
                }
                JsonValue::String(hex)
            }
            Self::Timestamp(ts) => {
                JsonValue::String(ts.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
            Self::Reference(path) => JsonValue::String(path.clone()),
            Self::GeoPoint {
                latitude,
                longitude,
            } => serde_json::json!({ "latitude": latitude, "longitude": longitude }),
            Self::Array(items) => JsonValue::Array(items.iter().map(Value::to_json).collect()),
            Self::Map(fields) => JsonValue::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Float(fl) => write!(f, "{}", fl),
            Self::Text(s) => write!(f, "{}", s),
            Self::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Self::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339_opts(SecondsFormat::Millis, true)),
            Self::Reference(path) => write!(f, "ref({})", path),
            Self::GeoPoint {
                latitude,
                longitude,
            } => write!(f, "geo({}, {})", latitude, longitude),
            Self::Array(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Self::Map(fields) => {
                let parts: Vec<String> =
                    fields.iter().map(|(k, v)| format!("{}: {}", k, v)).collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(ts: DateTime<Utc>) -> Self {
        Self::Timestamp(ts)
    }
}

// ============================================================================
// Field-path addressing
// ============================================================================

/// Read a possibly-dotted field path ("data.text" addresses the "text" key
/// inside the "data" map).
pub fn get_path<'a>(fields: &'a Fields, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = fields.get(first)?;

    for segment in segments {
        match current {
            Value::Map(inner) => current = inner.get(segment)?,
            _ => return None,
        }
    }
    Some(current)
}

/// Write a dotted field path, creating intermediate maps as needed.
/// Sibling keys of every traversed map are preserved.
pub fn set_path(fields: &mut Fields, path: &str, value: Value) {
    let segments: Vec<&str> = path.split('.').collect();
    set_path_segments(fields, &segments, value);
}

fn set_path_segments(fields: &mut Fields, segments: &[&str], value: Value) {
    match segments {
        [] => {}
        [last] => {
            fields.insert((*last).to_string(), value);
        }
        [head, rest @ ..] => {
            let entry = fields
                .entry((*head).to_string())
                .or_insert_with(|| Value::Map(Fields::new()));
            if !matches!(entry, Value::Map(_)) {
                // A scalar in the middle of the path gets replaced by a map,
                // matching the store's nested-update behavior.
                *entry = Value::Map(Fields::new());
            }
            if let Value::Map(inner) = entry {
                set_path_segments(inner, rest, value);
            }
        }
    }
}

/// Remove a dotted field path. Returns the removed value, if any.
pub fn remove_path(fields: &mut Fields, path: &str) -> Option<Value> {
    let segments: Vec<&str> = path.split('.').collect();
    match segments.as_slice() {
        [] => None,
        [last] => fields.remove(*last),
        [head, rest @ ..] => match fields.get_mut(*head)? {
            Value::Map(inner) => {
                let joined = rest.join(".");
                remove_path(inner, &joined)
            }
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_ordering() {
        assert_eq!(
            Value::Integer(1).compare(&Value::Integer(2)).unwrap(),
            Ordering::Less
        );
        assert_eq!(
            Value::Text("a".into()).compare(&Value::Text("b".into())).unwrap(),
            Ordering::Less
        );
        assert_eq!(
            Value::Null.compare(&Value::Integer(0)).unwrap(),
            Ordering::Less
        );
        assert_eq!(
            Value::Integer(2).compare(&Value::Float(1.5)).unwrap(),
            Ordering::Greater
        );
    }

    #[test]
    fn test_incompatible_comparison() {
        let result = Value::Text("a".into()).compare(&Value::Integer(1));
        assert!(matches!(result, Err(DbError::Query(_))));
    }

    #[test]
    fn test_json_round_trip() {
        let json = serde_json::json!({
            "name": "Alice",
            "age": 30,
            "score": 9.5,
            "tags": ["a", "b"],
            "nested": { "active": true }
        });

        let value = Value::from_json(&json);
        assert_eq!(value.to_json(), json);
    }

    #[test]
    fn test_timestamp_normalizes_to_rfc3339() {
        let ts = DateTime::parse_from_rfc3339("2024-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let json = Value::Timestamp(ts).to_json();
        assert_eq!(json, JsonValue::String("2024-03-01T12:00:00.000Z".into()));
    }

    #[test]
    fn test_get_path_nested() {
        let mut inner = Fields::new();
        inner.insert("text".into(), Value::from("hi"));
        let mut fields = Fields::new();
        fields.insert("data".into(), Value::Map(inner));

        assert_eq!(get_path(&fields, "data.text"), Some(&Value::from("hi")));
        assert_eq!(get_path(&fields, "data.missing"), None);
        assert_eq!(get_path(&fields, "missing.text"), None);
    }

    #[test]
    fn test_set_path_preserves_siblings() {
        let mut inner = Fields::new();
        inner.insert("text".into(), Value::from("hi"));
        inner.insert("likes".into(), Value::Integer(3));
        let mut fields = Fields::new();
        fields.insert("data".into(), Value::Map(inner));

        set_path(&mut fields, "data.text", Value::from("bye"));

        assert_eq!(get_path(&fields, "data.text"), Some(&Value::from("bye")));
        assert_eq!(get_path(&fields, "data.likes"), Some(&Value::Integer(3)));
    }

    #[test]
    fn test_remove_path() {
        let mut fields = Fields::new();
        set_path(&mut fields, "refs.postId", Value::from("p1"));
        set_path(&mut fields, "refs.userId", Value::from("u1"));

        let removed = remove_path(&mut fields, "refs.postId");
        assert_eq!(removed, Some(Value::from("p1")));
        assert_eq!(get_path(&fields, "refs.userId"), Some(&Value::from("u1")));
    }
}
