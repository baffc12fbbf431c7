//! Cell-key codec (C2): `rowId:fieldId` composite keys over the LWW log.
//!
//! Tables store every cell of every row as one LWW-log entry keyed by
//! `cell_key(row_id, field_id)`. This module owns the join/split so the
//! table engine never hand-rolls string splitting at more than one site.

use crate::error::{EpicenterError, Result};
use crate::id::validate_id;

/// Joins a row id and field id into a cell key.
///
/// Both ids are validated (non-empty, `:`-free) before joining, so a
/// malformed id can never silently produce an ambiguous key.
pub fn cell_key(row_id: &str, field_id: &str) -> Result<String> {
    validate_id(row_id)?;
    validate_id(field_id)?;
    Ok(format!("{row_id}:{field_id}"))
}

/// The prefix a row's cells all share: `rowId:`.
pub fn row_prefix(row_id: &str) -> String {
    format!("{row_id}:")
}

/// Splits a cell key back into `(row_id, field_id)`.
pub fn parse_cell_key(key: &str) -> Result<(&str, &str)> {
    let mut parts = key.splitn(2, ':');
    let row_id = parts.next().filter(|s| !s.is_empty());
    let field_id = parts.next().filter(|s| !s.is_empty());
    match (row_id, field_id) {
        (Some(r), Some(f)) if !f.contains(':') => Ok((r, f)),
        _ => Err(EpicenterError::MalformedCellKey(key.to_string())),
    }
}
