use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::core::{DbError, Fields, Result, Value, value};

/// Field names of the relational document convention.
pub const DATA_FIELD: &str = "data";
pub const REFS_FIELD: &str = "refs";
pub const CREATED_AT_FIELD: &str = "createdAt";
pub const UPDATED_AT_FIELD: &str = "updatedAt";

/// A document as returned by the store: its ID plus the field map.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        value::get_path(&self.fields, path)
    }

    /// Plain-JSON rendition with wrappers normalized.
    pub fn to_json(&self) -> serde_json::Value {
        Value::Map(self.fields.clone()).to_json()
    }
}

/// The `{data, refs}` convention: user payload and foreign-key-style
/// pointers separated inside one document.
///
/// `created_at` is assigned once at creation and never overwritten;
/// `updated_at` is refreshed by every mutating operation. The `data` and
/// `refs` key spaces are disjoint by convention.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationalDocument {
    pub id: String,
    pub data: Fields,
    pub refs: BTreeMap<String, String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl RelationalDocument {
    /// Interpret a raw document as a relational one.
    ///
    /// Missing `data`/`refs` maps degrade to empty; non-string ref values are
    /// a validation error since relations are references by string ID.
    pub fn from_document(doc: Document) -> Result<Self> {
        let mut data = Fields::new();
        let mut refs = BTreeMap::new();
        let mut created_at = None;
        let mut updated_at = None;

        for (key, val) in doc.fields {
            match (key.as_str(), val) {
                (DATA_FIELD, Value::Map(map)) => data = map,
                (REFS_FIELD, Value::Map(map)) => {
                    for (ref_key, ref_val) in map {
                        match ref_val {
                            Value::Text(s) | Value::Reference(s) => {
                                refs.insert(ref_key, s);
                            }
                            other => {
                                return Err(DbError::Validation(format!(
                                    "Ref '{}' must be a string ID, got {}",
                                    ref_key,
                                    other.type_name()
                                )));
                            }
                        }
                    }
                }
                (CREATED_AT_FIELD, Value::Timestamp(ts)) => created_at = Some(ts),
                (UPDATED_AT_FIELD, Value::Timestamp(ts)) => updated_at = Some(ts),
                _ => {}
            }
        }

        Ok(Self {
            id: doc.id,
            data,
            refs,
            created_at,
            updated_at,
        })
    }

    /// Flatten into a single map: data fields, then refs, plus the ID.
    /// Refs win on (convention-violating) key collisions.
    pub fn flattened(&self) -> Fields {
        let mut flat = self.data.clone();
        for (key, val) in &self.refs {
            flat.insert(key.clone(), Value::Text(val.clone()));
        }
        flat.insert("id".to_string(), Value::Text(self.id.clone()));
        flat
    }
}

// ============================================================================
// Identifier validation
// ============================================================================

/// Collection paths are slash-separated and must not start or end with a
/// separator. Raised synchronously before any I/O.
pub fn validate_collection(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(DbError::Validation("Collection path cannot be empty".into()));
    }
    if path.starts_with('/') || path.ends_with('/') {
        return Err(DbError::Validation(format!(
            "Collection path '{}' cannot start or end with '/'",
            path
        )));
    }
    if path.split('/').any(|segment| segment.is_empty()) {
        return Err(DbError::Validation(format!(
            "Collection path '{}' contains an empty segment",
            path
        )));
    }
    Ok(())
}

/// Document IDs are single path segments.
pub fn validate_document_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(DbError::Validation("Document ID cannot be empty".into()));
    }
    if id.contains('/') {
        return Err(DbError::Validation(format!(
            "Document ID '{}' cannot contain '/'",
            id
        )));
    }
    Ok(())
}
