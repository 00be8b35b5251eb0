// src/core/change/codec.rs

//! The versioned JSON encoding of changes. V2 is the current format and
//! addresses stripes and nodes by UID; V1 documents (index/name addressing)
//! are accepted for read compatibility only and get rewritten when a format
//! upgrade commits.

use crate::core::NomadError;
use crate::core::change::NomadChange;
use serde_json::Value;

pub const FORMAT_V1: u32 = 1;
pub const FORMAT_V2: u32 = 2;
pub const CURRENT_FORMAT: u32 = FORMAT_V2;

const VERSION_FIELD: &str = "version";

/// Encodes a change in the current (V2) format.
pub fn encode(change: &NomadChange) -> Result<Value, NomadError> {
    let mut value = serde_json::to_value(change)
        .map_err(|e| NomadError::InvalidInput(format!("Unencodable change: {e}")))?;
    value
        .as_object_mut()
        .expect("changes serialize to JSON objects")
        .insert(VERSION_FIELD.to_string(), Value::String("v2".to_string()));
    Ok(value)
}

pub fn encode_string(change: &NomadChange) -> Result<String, NomadError> {
    Ok(encode(change)?.to_string())
}

/// Decodes a change document of either format. Documents without a version
/// marker are treated as V1.
pub fn decode(value: &Value) -> Result<NomadChange, NomadError> {
    match value.get(VERSION_FIELD).and_then(Value::as_str) {
        None | Some("v1") | Some("v2") => {
            serde_json::from_value(value.clone()).map_err(|e| {
                NomadError::InvalidInput(format!("Malformed change document: {e}"))
            })
        }
        Some(other) => Err(NomadError::InvalidInput(format!(
            "Unsupported change format '{other}'"
        ))),
    }
}

pub fn decode_str(s: &str) -> Result<NomadChange, NomadError> {
    let value: Value = serde_json::from_str(s)
        .map_err(|e| NomadError::InvalidInput(format!("Malformed change document: {e}")))?;
    decode(&value)
}

/// The format a decoded document was written in.
pub fn document_format(value: &Value) -> Result<u32, NomadError> {
    match value.get(VERSION_FIELD).and_then(Value::as_str) {
        None | Some("v1") => Ok(FORMAT_V1),
        Some("v2") => Ok(FORMAT_V2),
        Some(other) => Err(NomadError::InvalidInput(format!(
            "Unsupported change format '{other}'"
        ))),
    }
}
