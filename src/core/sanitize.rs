use crate::core::{DbError, Fields, Result, Value};

/// Maximum nesting depth the store accepts for a single document.
///
/// The original runtime needed an identity-keyed cycle guard here; owned
/// value trees cannot alias, so the same protection reduces to this bound.
pub const MAX_NESTING_DEPTH: usize = 20;

/// Validate a payload before any write reaches the store.
///
/// Rejects empty field names, names containing the path separator `.`
/// (reserved for field-path addressing), and nesting deeper than the store
/// permits. Raised synchronously, never retried.
pub fn sanitize_payload(fields: &Fields) -> Result<()> {
    check_map(fields, 1)
}

fn check_map(fields: &Fields, depth: usize) -> Result<()> {
    if depth > MAX_NESTING_DEPTH {
        return Err(DbError::Validation(format!(
            "Document nesting exceeds the maximum depth of {}",
            MAX_NESTING_DEPTH
        )));
    }

    for (key, val) in fields {
        if key.is_empty() {
            return Err(DbError::Validation("Field names cannot be empty".into()));
        }
        if key.contains('.') {
            return Err(DbError::Validation(format!(
                "Field name '{}' cannot contain '.'",
                key
            )));
        }
        check_value(val, depth)?;
    }
    Ok(())
}

fn check_value(value: &Value, depth: usize) -> Result<()> {
    match value {
        Value::Map(inner) => check_map(inner, depth + 1),
        Value::Array(items) => {
            if depth + 1 > MAX_NESTING_DEPTH {
                return Err(DbError::Validation(format!(
                    "Document nesting exceeds the maximum depth of {}",
                    MAX_NESTING_DEPTH
                )));
            }
            for item in items {
                check_value(item, depth + 1)?;
            }
            Ok(())
        }
        Value::Float(f) if f.is_nan() || f.is_infinite() => Err(DbError::Validation(
            "Float fields must be finite".into(),
        )),
        _ => Ok(()),
    }
}
