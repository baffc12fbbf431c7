//! Row/field/document id generation and validation (C10 glossary: Id, FieldId).
//!
//! Ids and field ids share one constraint: they must never contain `:`,
//! since cell keys join them as `rowId:fieldId` (C2). Validation happens
//! once, at the boundary where a caller hands in an externally-sourced
//! id; ids minted by `generate_id`/`generate_guid` are trusted by
//! construction and skip the check.

use nanoid::nanoid;

use crate::error::{EpicenterError, Result};

const ID_ALPHABET: [char; 36] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i',
    'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z',
];

/// Generates a 10-character row/field id.
pub fn generate_id() -> String {
    nanoid!(10, &ID_ALPHABET)
}

/// Generates a 15-character document/session guid.
pub fn generate_guid() -> String {
    nanoid!(15, &ID_ALPHABET)
}

/// Validates an externally-sourced id: non-empty and `:`-free.
pub fn validate_id(value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(EpicenterError::InvalidId {
            value: value.to_string(),
            reason: "must not be empty".to_string(),
        });
    }
    if value.contains(':') {
        return Err(EpicenterError::InvalidId {
            value: value.to_string(),
            reason: "must not contain ':'".to_string(),
        });
    }
    Ok(())
}
