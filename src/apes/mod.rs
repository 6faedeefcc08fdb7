//! Semantics-only value encoding.
//!
//! Configuration bodies are plain trees of null, boolean, number, text,
//! list and map nodes, carried as [`serde_json::Value`] with map insertion
//! order preserved. Two concrete serializations exist: canonical JSON
//! (round-trip) and annotated XML (write only).

mod media;
mod xml;

pub use media::{MediaRegistry, MediaType};
pub use xml::write_xml;

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApesError {
    #[error("map key {0:?} is not a valid identifier")]
    BadKey(String),
    #[error("number is not finite")]
    BadNumber,
    #[error("the root of an annotated XML document must be a list or a map")]
    RootNotComposite,
    #[error("JSON syntax: {0}")]
    Json(#[from] serde_json::Error),
}

/// The type tag of a value: `Null`, `Boolean`, `Number`, `Text`, `List` or
/// `Map`.
pub fn type_tag(value: &Value) -> &'static str {
    match value {
        Value::Null => "Null",
        Value::Bool(_) => "Boolean",
        Value::Number(_) => "Number",
        Value::String(_) => "Text",
        Value::Array(_) => "List",
        Value::Object(_) => "Map",
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

/// Every map key must be an identifier and every number finite.
pub fn check_value(value: &Value) -> Result<(), ApesError> {
    match value {
        Value::Number(number) => {
            if number.as_f64().map_or(true, |n| !n.is_finite()) {
                return Err(ApesError::BadNumber);
            }
        }
        Value::Array(items) => {
            for item in items {
                check_value(item)?;
            }
        }
        Value::Object(entries) => {
            for (key, entry) in entries {
                if !is_identifier(key) {
                    return Err(ApesError::BadKey(key.clone()));
                }
                check_value(entry)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Canonical JSON: compact, validated.
pub fn write_json(value: &Value) -> Result<Vec<u8>, ApesError> {
    check_value(value)?;
    Ok(serde_json::to_vec(value)?)
}

pub fn read_json(bytes: &[u8]) -> Result<Value, ApesError> {
    let value: Value = serde_json::from_slice(bytes)?;
    check_value(&value)?;
    Ok(value)
}
