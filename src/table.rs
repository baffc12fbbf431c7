//! Cell-addressed table engine (C3): typed row CRUD over one LWW log per
//! table, with read-time validation and row-level observers.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::cell::{cell_key, parse_cell_key, row_prefix};
use crate::crdt::{ChangeAction, LwwLog};
use crate::error::Result;
use crate::id::validate_id;
use crate::validator::{Field, FieldError, RowValidator};

/// A table's shape: `{ id, name, description, icon, fields }`.
#[derive(Debug, Clone)]
pub struct TableDefinition {
    /// The table's stable identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Optional human-readable description.
    pub description: Option<String>,
    /// Optional icon identifier, meaningful only to UI layers.
    pub icon: Option<String>,
    /// The table's columns.
    pub fields: Vec<Field>,
}

/// A row, represented as a JSON object keyed by field id (including `id`).
pub type RowData = Map<String, Value>;

/// The outcome of reading a single row.
#[derive(Debug, Clone)]
pub enum RowResult {
    /// The row exists and passes schema validation.
    Valid {
        /// The row's data.
        row: RowData,
    },
    /// The row exists but fails schema validation.
    Invalid {
        /// The row's id.
        id: String,
        /// The row's (invalid) data, as stored.
        row: RowData,
        /// What failed.
        errors: Vec<FieldError>,
    },
    /// No cell with this row's prefix is live.
    NotFound {
        /// The row id that was looked up.
        id: String,
    },
}

impl RowResult {
    /// True if this result is `Valid`.
    pub fn is_valid(&self) -> bool {
        matches!(self, RowResult::Valid { .. })
    }
}

/// The outcome of `update`/`delete` on a single row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The row existed locally and was updated.
    Applied,
    /// No cell with this row's prefix existed locally; nothing was written.
    NotFoundLocally,
}

/// The outcome of `delete` on a single row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The row existed locally and its cells were removed.
    Deleted,
    /// No cell with this row's prefix existed locally.
    NotFoundLocally,
}

/// Aggregate status across a batch of rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    /// Every row in the batch was applied.
    AllApplied,
    /// Some rows were applied, some were not found locally.
    PartiallyApplied,
    /// No rows in the batch were found locally.
    NoneApplied,
}

/// The result of `updateMany`/`deleteMany`.
#[derive(Debug, Clone)]
pub struct BatchResult {
    /// Aggregate status.
    pub status: BatchStatus,
    /// Ids that were applied.
    pub applied: Vec<String>,
    /// Ids that had no local evidence.
    pub not_found_locally: Vec<String>,
}

fn batch_status(applied: &[String], not_found: &[String]) -> BatchStatus {
    match (applied.is_empty(), not_found.is_empty()) {
        (false, true) => BatchStatus::AllApplied,
        (true, false) => BatchStatus::NoneApplied,
        (false, false) => BatchStatus::PartiallyApplied,
        (true, true) => BatchStatus::AllApplied,
    }
}

/// Typed row CRUD on top of the LWW log (C1), addressed by `rowId:fieldId`
/// cell keys (C2).
pub struct TableHelper {
    definition: TableDefinition,
    log: Arc<LwwLog<Value>>,
    validator: RowValidator,
}

impl TableHelper {
    /// Builds a table helper over an already-constructed log, compiling
    /// the validator from `definition.fields` once.
    pub fn new(definition: TableDefinition, log: Arc<LwwLog<Value>>) -> Self {
        let validator = RowValidator::new(definition.fields.clone());
        Self { definition, log, validator }
    }

    /// The table's definition.
    pub fn definition(&self) -> &TableDefinition {
        &self.definition
    }

    /// The table's field ids, in definition order.
    pub fn field_names(&self) -> Vec<&str> {
        self.definition.fields.iter().map(|f| f.id.as_str()).collect()
    }

    /// The underlying LWW log, for sync/persistence extensions that need
    /// raw state-vector/update access rather than row-shaped reads.
    pub fn log(&self) -> &Arc<LwwLog<Value>> {
        &self.log
    }

    fn row_id_of(&self, row: &RowData) -> Result<String> {
        let id = row
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| crate::error::EpicenterError::InvalidId {
                value: String::new(),
                reason: "row is missing an 'id' field".to_string(),
            })?;
        validate_id(&id)?;
        Ok(id)
    }

    /// Writes every field of `row` as a cell, inside one CRDT transaction.
    pub fn upsert(&self, row: RowData) -> Result<()> {
        let row_id = self.row_id_of(&row)?;
        let mut entries = Vec::with_capacity(row.len());
        for (field_id, value) in row {
            if field_id == "id" {
                continue;
            }
            entries.push((cell_key(&row_id, &field_id)?, value));
        }
        self.log.set_many(entries)
    }

    /// Writes multiple rows in a single CRDT transaction.
    pub fn upsert_many(&self, rows: Vec<RowData>) -> Result<()> {
        let mut entries = Vec::new();
        for row in rows {
            let row_id = self.row_id_of(&row)?;
            for (field_id, value) in row {
                if field_id == "id" {
                    continue;
                }
                entries.push((cell_key(&row_id, &field_id)?, value));
            }
        }
        self.log.set_many(entries)
    }

    /// Writes `partial`'s fields onto an existing row. Returns
    /// `NotFoundLocally` and writes nothing if no cell with this row's
    /// prefix exists locally yet.
    pub fn update(&self, partial: RowData) -> Result<UpdateOutcome> {
        let row_id = self.row_id_of(&partial)?;
        if !self.row_exists(&row_id) {
            return Ok(UpdateOutcome::NotFoundLocally);
        }
        self.upsert(partial)?;
        Ok(UpdateOutcome::Applied)
    }

    /// Applies `update` to every row in `rows`, aggregating the outcome.
    pub fn update_many(&self, rows: Vec<RowData>) -> Result<BatchResult> {
        let mut applied = Vec::new();
        let mut not_found_locally = Vec::new();
        for row in rows {
            let row_id = self.row_id_of(&row)?;
            match self.update(row)? {
                UpdateOutcome::Applied => applied.push(row_id),
                UpdateOutcome::NotFoundLocally => not_found_locally.push(row_id),
            }
        }
        let status = batch_status(&applied, &not_found_locally);
        Ok(BatchResult { status, applied, not_found_locally })
    }

    fn row_exists(&self, id: &str) -> bool {
        !self.log.entries_with_prefix(&row_prefix(id)).is_empty()
    }

    fn compose_row(&self, id: &str) -> Option<RowData> {
        let cells = self.log.entries_with_prefix(&row_prefix(id));
        if cells.is_empty() {
            return None;
        }
        let mut row = RowData::new();
        row.insert("id".to_string(), Value::String(id.to_string()));
        for (key, value) in cells {
            if let Ok((_, field_id)) = parse_cell_key(&key) {
                row.insert(field_id.to_string(), value);
            }
        }
        Some(row)
    }

    /// Reads and validates a single row.
    pub fn get(&self, id: &str) -> RowResult {
        let Some(row) = self.compose_row(id) else {
            return RowResult::NotFound { id: id.to_string() };
        };
        match self.validator.validate(&Value::Object(row.clone())) {
            Ok(errors) if errors.is_empty() => RowResult::Valid { row },
            Ok(errors) => RowResult::Invalid { id: id.to_string(), row, errors },
            Err(_) => RowResult::Invalid { id: id.to_string(), row, errors: Vec::new() },
        }
    }

    /// Returns every row, valid or not.
    pub fn get_all(&self) -> Vec<RowResult> {
        self.row_ids().into_iter().map(|id| self.get(&id)).collect()
    }

    /// Returns only rows that pass validation.
    pub fn get_all_valid(&self) -> Vec<RowData> {
        self.get_all()
            .into_iter()
            .filter_map(|r| match r {
                RowResult::Valid { row } => Some(row),
                _ => None,
            })
            .collect()
    }

    /// Returns only rows that exist but fail validation.
    pub fn get_all_invalid(&self) -> Vec<RowResult> {
        self.get_all()
            .into_iter()
            .filter(|r| matches!(r, RowResult::Invalid { .. }))
            .collect()
    }

    /// True if any cell with this row's prefix is live.
    pub fn has(&self, id: &str) -> bool {
        self.row_exists(id)
    }

    /// The number of distinct live rows.
    pub fn count(&self) -> usize {
        self.row_ids().len()
    }

    fn row_ids(&self) -> Vec<String> {
        let mut ids: HashSet<String> = HashSet::new();
        for (key, _) in self.log.entries() {
            if let Ok((row_id, _)) = parse_cell_key(&key) {
                ids.insert(row_id.to_string());
            }
        }
        ids.into_iter().collect()
    }

    /// Returns every valid row matching `predicate`.
    pub fn filter(&self, predicate: impl Fn(&RowData) -> bool) -> Vec<RowData> {
        self.get_all_valid().into_iter().filter(predicate).collect()
    }

    /// Returns the first valid row matching `predicate`.
    pub fn find(&self, predicate: impl Fn(&RowData) -> bool) -> Option<RowData> {
        self.get_all_valid().into_iter().find(predicate)
    }

    /// Removes every cell with this row's prefix, in one transaction.
    pub fn delete(&self, id: &str) -> Result<DeleteOutcome> {
        let keys: Vec<String> =
            self.log.entries_with_prefix(&row_prefix(id)).into_iter().map(|(k, _)| k).collect();
        if keys.is_empty() {
            return Ok(DeleteOutcome::NotFoundLocally);
        }
        self.log.delete_many(&keys)?;
        Ok(DeleteOutcome::Deleted)
    }

    /// Deletes every row in `ids`, aggregating the outcome.
    pub fn delete_many(&self, ids: &[String]) -> Result<BatchResult> {
        let mut applied = Vec::new();
        let mut not_found_locally = Vec::new();
        for id in ids {
            match self.delete(id)? {
                DeleteOutcome::Deleted => applied.push(id.clone()),
                DeleteOutcome::NotFoundLocally => not_found_locally.push(id.clone()),
            }
        }
        let status = batch_status(&applied, &not_found_locally);
        Ok(BatchResult { status, applied, not_found_locally })
    }

    /// Removes every entry in the table's log. The log itself and its
    /// observers are untouched.
    pub fn clear(&self) -> Result<()> {
        self.log.clear()
    }

    /// Subscribes to row-level changes: the callback receives the set of
    /// row ids touched by one transaction, never empty, never a
    /// classification of what happened to them — callers re-read via
    /// `get` to find out.
    pub fn observe<F>(&self, callback: F) -> u64
    where
        F: Fn(&HashSet<String>) + Send + Sync + 'static,
    {
        self.log.observe(move |changes| {
            let mut rows = HashSet::new();
            for change in changes {
                if let Ok((row_id, _)) = parse_cell_key(&change.key) {
                    rows.insert(row_id.to_string());
                }
                debug_assert!(
                    matches!(change.action, ChangeAction::Add | ChangeAction::Update | ChangeAction::Delete)
                );
            }
            if !rows.is_empty() {
                callback(&rows);
            }
        })
    }

    /// Unsubscribes a previously registered observer.
    pub fn unobserve(&self, id: u64) {
        self.log.unobserve(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::MemoryStorage;
    use crate::validator::FieldKind;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn row(id: &str, title: &str, views: i64) -> RowData {
        let mut row = RowData::new();
        row.insert("id".to_string(), json!(id));
        row.insert("title".to_string(), json!(title));
        row.insert("views".to_string(), json!(views));
        row
    }

    fn posts_table() -> TableHelper {
        let log = Arc::new(LwwLog::new(Arc::new(MemoryStorage::new()), "table:posts".to_string()));
        let definition = TableDefinition {
            id: "posts".to_string(),
            name: "Posts".to_string(),
            description: None,
            icon: None,
            fields: vec![
                Field::new("title", FieldKind::Text),
                Field::new("views", FieldKind::Integer).with_default(json!(0)),
            ],
        };
        TableHelper::new(definition, log)
    }

    #[test]
    fn upsert_then_get_round_trips() {
        let table = posts_table();
        table.upsert(row("p1", "Hello", 0)).unwrap();
        match table.get("p1") {
            RowResult::Valid { row } => assert_eq!(row.get("title"), Some(&json!("Hello"))),
            other => panic!("expected valid row, got {other:?}"),
        }
    }

    #[test]
    fn update_before_upsert_is_not_found_locally() {
        let table = posts_table();
        let mut partial = RowData::new();
        partial.insert("id".to_string(), json!("ghost"));
        partial.insert("title".to_string(), json!("x"));
        assert_eq!(table.update(partial).unwrap(), UpdateOutcome::NotFoundLocally);
        assert!(matches!(table.get("ghost"), RowResult::NotFound { .. }));
        assert_eq!(table.count(), 0);
    }

    #[test]
    fn invalid_row_surfaces_without_crashing() {
        let table = posts_table();
        table
            .upsert(row("r", "has-bad-views", 0))
            .unwrap();
        // Directly write a schema-incompatible cell, as a remote peer might.
        let key = cell_key("r", "views").unwrap();
        table.log.set(&key, json!("not a number")).unwrap();

        match table.get("r") {
            RowResult::Invalid { errors, .. } => {
                assert!(errors.iter().any(|e| e.path.contains("views")));
            }
            other => panic!("expected invalid row, got {other:?}"),
        }
    }

    #[test]
    fn delete_removes_every_cell() {
        let table = posts_table();
        table.upsert(row("p1", "Hello", 0)).unwrap();
        assert_eq!(table.delete("p1").unwrap(), DeleteOutcome::Deleted);
        assert!(matches!(table.get("p1"), RowResult::NotFound { .. }));
    }

    #[test]
    fn delete_missing_row_is_not_found_locally() {
        let table = posts_table();
        assert_eq!(table.delete("ghost").unwrap(), DeleteOutcome::NotFoundLocally);
    }

    #[test]
    fn clear_empties_table_but_keeps_it_usable() {
        let table = posts_table();
        table.upsert(row("p1", "Hello", 0)).unwrap();
        table.upsert(row("p2", "World", 1)).unwrap();
        table.clear().unwrap();
        assert_eq!(table.count(), 0);
        table.upsert(row("p3", "Again", 2)).unwrap();
        assert_eq!(table.count(), 1);
    }

    #[test]
    fn observer_sees_one_row_id_per_transaction() {
        let table = posts_table();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        table.observe(move |rows| {
            seen2.lock().unwrap().push(rows.clone());
        });
        table.upsert(row("p1", "Hello", 0)).unwrap();
        let captured = seen.lock().unwrap();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].len(), 1);
        assert!(captured[0].contains("p1"));
    }

    #[test]
    fn update_many_reports_partial_application() {
        let table = posts_table();
        table.upsert(row("p1", "Hello", 0)).unwrap();
        let result = table
            .update_many(vec![row("p1", "Hi", 0), row("ghost", "x", 0)])
            .unwrap();
        assert_eq!(result.status, BatchStatus::PartiallyApplied);
        assert_eq!(result.applied, vec!["p1".to_string()]);
        assert_eq!(result.not_found_locally, vec!["ghost".to_string()]);
    }

    #[test]
    fn unobserve_stops_delivery() {
        let table = posts_table();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = Arc::clone(&calls);
        let id = table.observe(move |_| {
            calls2.fetch_add(1, Ordering::SeqCst);
        });
        table.upsert(row("p1", "Hello", 0)).unwrap();
        table.unobserve(id);
        table.upsert(row("p2", "World", 0)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    /// Concurrent edits to different fields of the same row, made by two
    /// peers starting from the same state, both survive merge.
    #[test]
    fn concurrent_field_edits_on_same_row_both_survive_merge() {
        fn table_over(storage: Arc<MemoryStorage>, doc_name: &str) -> TableHelper {
            let log = Arc::new(LwwLog::new(storage as Arc<dyn crate::crdt::CrdtStorage>, doc_name.to_string()));
            let definition = TableDefinition {
                id: "posts".to_string(),
                name: "Posts".to_string(),
                description: None,
                icon: None,
                fields: vec![
                    Field::new("title", FieldKind::Text),
                    Field::new("views", FieldKind::Integer).with_default(json!(0)),
                ],
            };
            TableHelper::new(definition, log)
        }

        let storage_a = Arc::new(MemoryStorage::new());
        let storage_b = Arc::new(MemoryStorage::new());
        let a = table_over(storage_a, "shared");
        let b = table_over(storage_b, "shared");

        a.upsert(row("p1", "Hello", 0)).unwrap();
        let seed = a.log.encode_state_as_update();
        b.log.apply_remote_update(&seed, crate::crdt::UpdateOrigin::Remote).unwrap();

        let mut title_only = RowData::new();
        title_only.insert("id".to_string(), json!("p1"));
        title_only.insert("title".to_string(), json!("Hi"));
        a.update(title_only).unwrap();

        let mut views_only = RowData::new();
        views_only.insert("id".to_string(), json!("p1"));
        views_only.insert("views".to_string(), json!(5));
        b.update(views_only).unwrap();

        let update_from_b = b.log.encode_state_as_update();
        a.log.apply_remote_update(&update_from_b, crate::crdt::UpdateOrigin::Remote).unwrap();

        match a.get("p1") {
            RowResult::Valid { row } => {
                assert_eq!(row.get("title"), Some(&json!("Hi")));
                assert_eq!(row.get("views"), Some(&json!(5)));
            }
            other => panic!("expected valid merged row, got {other:?}"),
        }
    }
}
