//! The file tree (C7): a flat, parent-pointer `files` table plus two
//! derived in-memory indexes rebuilt from it on every change. Per the
//! ownership rule that these indexes belong exclusively to the file
//! tree, the rebuild is wired in as a table observer at construction, so
//! no caller can observe a stale index after a mutation commits.
//!
//! `display_name` resolves the concurrent-same-name-creation case by
//! separating a node's stored `name` from how it is shown: the stored
//! row never changes, but a losing sibling is displayed as `name (N).ext`.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{EpicenterError, FsErrorCode, Result};
use crate::id::generate_id;
use crate::path;
use crate::table::{RowData, TableDefinition, TableHelper, UpdateOutcome};
use crate::validator::{Field, FieldKind};

/// A file or folder's kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    /// A regular file.
    File,
    /// A directory.
    Folder,
}

impl FileKind {
    fn as_str(self) -> &'static str {
        match self {
            FileKind::File => "file",
            FileKind::Folder => "folder",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "file" => Some(FileKind::File),
            "folder" => Some(FileKind::Folder),
            _ => None,
        }
    }
}

/// One row of the `files` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRow {
    /// The row's stable id.
    pub id: String,
    /// The stored (never auto-renamed) name.
    pub name: String,
    /// The parent folder's id, or `None` for a root-level entry.
    pub parent_id: Option<String>,
    /// File or folder.
    pub kind: FileKind,
    /// Byte size; meaningless for folders.
    pub size: u64,
    /// Creation time, epoch milliseconds.
    pub created_at: i64,
    /// Last metadata/content change, epoch milliseconds.
    pub updated_at: i64,
    /// Soft-delete timestamp; `None` while active.
    pub trashed_at: Option<i64>,
}

impl FileRow {
    fn to_row_data(&self) -> RowData {
        let mut row = RowData::new();
        row.insert("id".to_string(), json!(self.id));
        row.insert("name".to_string(), json!(self.name));
        row.insert("parent_id".to_string(), json!(self.parent_id));
        row.insert("kind".to_string(), json!(self.kind.as_str()));
        row.insert("size".to_string(), json!(self.size));
        row.insert("created_at".to_string(), json!(self.created_at));
        row.insert("updated_at".to_string(), json!(self.updated_at));
        row.insert("trashed_at".to_string(), json!(self.trashed_at));
        row
    }

    fn from_row_data(row: &RowData) -> Option<Self> {
        Some(Self {
            id: row.get("id")?.as_str()?.to_string(),
            name: row.get("name")?.as_str()?.to_string(),
            parent_id: match row.get("parent_id") {
                Some(Value::String(s)) => Some(s.clone()),
                _ => None,
            },
            kind: FileKind::parse(row.get("kind")?.as_str()?)?,
            size: row.get("size")?.as_u64()?,
            created_at: row.get("created_at")?.as_i64()?,
            updated_at: row.get("updated_at")?.as_i64()?,
            trashed_at: match row.get("trashed_at") {
                Some(Value::Number(n)) => n.as_i64(),
                _ => None,
            },
        })
    }

    /// True while not soft-deleted.
    pub fn is_active(&self) -> bool {
        self.trashed_at.is_none()
    }
}

/// The `files` table's schema, registered by the workspace builder.
pub fn files_table_definition() -> TableDefinition {
    TableDefinition {
        id: "files".to_string(),
        name: "Files".to_string(),
        description: Some("Flat parent-pointer file/folder tree".to_string()),
        icon: None,
        fields: vec![
            Field::new("name", FieldKind::Text),
            Field::new("parent_id", FieldKind::Text).nullable(),
            Field::new("kind", FieldKind::Select { options: vec!["file".into(), "folder".into()] }),
            Field::new("size", FieldKind::Integer).with_default(json!(0)),
            Field::new("created_at", FieldKind::Integer),
            Field::new("updated_at", FieldKind::Integer),
            Field::new("trashed_at", FieldKind::Integer).nullable().with_default(Value::Null),
        ],
    }
}

#[derive(Default)]
struct Indexes {
    path_to_id: HashMap<String, String>,
    children_of: HashMap<Option<String>, Vec<String>>,
}

/// The file tree: typed access to the `files` table plus two indexes
/// (`path -> id`, `parentId -> childIds`) rebuilt from it on every change.
pub struct FileTree {
    table: Arc<TableHelper>,
    indexes: RwLock<Indexes>,
}

impl FileTree {
    /// Wraps an already-constructed `files` table, performing an initial
    /// index build and wiring up the table observer that keeps the
    /// indexes current on every subsequent change.
    pub fn new(table: Arc<TableHelper>) -> Arc<Self> {
        let tree = Arc::new(Self { table, indexes: RwLock::new(Indexes::default()) });
        tree.rebuild();
        let observed = Arc::clone(&tree);
        tree.table.observe(move |_rows| observed.rebuild());
        tree
    }

    fn rebuild(&self) {
        let rows: HashMap<String, FileRow> = self
            .table
            .get_all_valid()
            .iter()
            .filter_map(FileRow::from_row_data)
            .filter(FileRow::is_active)
            .map(|r| (r.id.clone(), r))
            .collect();

        let mut cache: HashMap<String, String> = HashMap::new();
        let mut path_to_id = HashMap::new();
        let mut children_of: HashMap<Option<String>, Vec<String>> = HashMap::new();

        for (id, row) in &rows {
            let mut visiting = HashSet::new();
            if let Some(p) = compute_path(id, &rows, &mut cache, &mut visiting) {
                path_to_id.insert(p, id.clone());
            }
            children_of.entry(row.parent_id.clone()).or_default().push(id.clone());
        }
        for children in children_of.values_mut() {
            children.sort();
        }

        let mut indexes = self.indexes.write().unwrap();
        indexes.path_to_id = path_to_id;
        indexes.children_of = children_of;
    }

    /// The underlying `files` table, for sync/persistence extensions that
    /// need raw log access rather than tree-shaped reads.
    pub fn table(&self) -> &Arc<TableHelper> {
        &self.table
    }

    /// Resolves `path` to a row id, or `ENOENT` if nothing lives there.
    pub fn resolve_id(&self, abs_path: &str) -> Result<String> {
        self.lookup_id(abs_path).ok_or_else(|| {
            EpicenterError::fs(FsErrorCode::ENOENT, abs_path, "no such file or directory")
        })
    }

    /// Resolves `path` to a row id without erroring on a miss.
    pub fn lookup_id(&self, abs_path: &str) -> Option<String> {
        let normalized = path::normalize(abs_path);
        self.indexes.read().unwrap().path_to_id.get(&normalized).cloned()
    }

    /// Reads a row by id, trashed or not.
    pub fn get_row(&self, id: &str) -> Option<FileRow> {
        match self.table.get(id) {
            crate::table::RowResult::Valid { row } => FileRow::from_row_data(&row),
            _ => None,
        }
    }

    /// Splits an absolute path into `(parentId, name)`. The parent must
    /// already resolve, except at the root.
    pub fn parse_path(&self, abs_path: &str) -> Result<(Option<String>, String)> {
        let (parent_path, name) = path::split(abs_path);
        let parent_id = match parent_path {
            None => None,
            Some(p) if p == "/" => None,
            Some(p) => Some(self.resolve_id(&p)?),
        };
        Ok((parent_id, name))
    }

    /// Errors with `ENOTDIR` unless `id` names an active folder.
    pub fn assert_directory(&self, id: &str) -> Result<()> {
        match self.get_row(id) {
            Some(row) if row.kind == FileKind::Folder && row.is_active() => Ok(()),
            Some(_) => Err(EpicenterError::fs(FsErrorCode::ENOTDIR, id, "not a directory")),
            None => Err(EpicenterError::fs(FsErrorCode::ENOENT, id, "no such file or directory")),
        }
    }

    /// The active, non-trashed children of `parent_id` (`None` = root).
    pub fn active_children(&self, parent_id: Option<&str>) -> Vec<FileRow> {
        let key = parent_id.map(str::to_string);
        let ids = self.indexes.read().unwrap().children_of.get(&key).cloned().unwrap_or_default();
        ids.iter().filter_map(|id| self.get_row(id)).filter(FileRow::is_active).collect()
    }

    /// Every active descendant id of `parent_id`, recursively, not
    /// including `parent_id` itself.
    pub fn descendant_ids(&self, parent_id: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut stack: Vec<String> = self.active_children(Some(parent_id)).into_iter().map(|r| r.id).collect();
        while let Some(id) = stack.pop() {
            stack.extend(self.active_children(Some(&id)).into_iter().map(|r| r.id));
            out.push(id);
        }
        out
    }

    /// Every currently resolvable absolute path.
    pub fn all_paths(&self) -> Vec<String> {
        self.indexes.read().unwrap().path_to_id.keys().cloned().collect()
    }

    /// True if `path` resolves to an active row.
    pub fn exists(&self, abs_path: &str) -> bool {
        self.lookup_id(abs_path).is_some()
    }

    /// Creates a new row under `parent_id` (root if `None`). Rejects an
    /// empty name, a name containing `/`, and a name colliding with an
    /// existing active sibling.
    pub fn create(
        &self,
        name: &str,
        parent_id: Option<&str>,
        kind: FileKind,
        size: u64,
    ) -> Result<FileRow> {
        if name.is_empty() || name.contains('/') {
            return Err(EpicenterError::InvalidId {
                value: name.to_string(),
                reason: "file name must be non-empty and contain no '/'".to_string(),
            });
        }
        if let Some(parent) = parent_id {
            self.assert_directory(parent)?;
        }
        if self.active_children(parent_id).iter().any(|r| r.name == name) {
            return Err(EpicenterError::fs(
                FsErrorCode::EEXIST,
                name,
                "a file with this name already exists in this folder",
            ));
        }
        let now = Utc::now().timestamp_millis();
        let row = FileRow {
            id: generate_id(),
            name: name.to_string(),
            parent_id: parent_id.map(str::to_string),
            kind,
            size,
            created_at: now,
            updated_at: now,
            trashed_at: None,
        };
        self.table.upsert(row.to_row_data())?;
        Ok(row)
    }

    /// Soft-deletes `id`: its row stays, but it and its descendants drop
    /// out of the active tree.
    pub fn soft_delete(&self, id: &str) -> Result<()> {
        let mut partial = RowData::new();
        partial.insert("id".to_string(), json!(id));
        partial.insert("trashed_at".to_string(), json!(Utc::now().timestamp_millis()));
        match self.table.update(partial)? {
            UpdateOutcome::Applied => Ok(()),
            UpdateOutcome::NotFoundLocally => {
                Err(EpicenterError::fs(FsErrorCode::ENOENT, id, "no such file or directory"))
            }
        }
    }

    /// Moves/renames `id`. Rejects moving a folder into its own
    /// descendant, and rejects a name collision at the destination.
    pub fn move_row(&self, id: &str, new_parent_id: Option<&str>, new_name: &str) -> Result<()> {
        let row = self
            .get_row(id)
            .filter(FileRow::is_active)
            .ok_or_else(|| EpicenterError::fs(FsErrorCode::ENOENT, id, "no such file or directory"))?;
        if let Some(parent) = new_parent_id {
            if parent == id || self.descendant_ids(id).iter().any(|d| d == parent) {
                return Err(EpicenterError::fs(
                    FsErrorCode::EISDIR,
                    id,
                    "cannot move a folder into its own descendant",
                ));
            }
            self.assert_directory(parent)?;
        }
        let collides = self
            .active_children(new_parent_id)
            .iter()
            .any(|r| r.id != row.id && r.name == new_name);
        if collides {
            return Err(EpicenterError::fs(
                FsErrorCode::EEXIST,
                new_name,
                "a file with this name already exists in this folder",
            ));
        }
        let mut partial = RowData::new();
        partial.insert("id".to_string(), json!(id));
        partial.insert("parent_id".to_string(), json!(new_parent_id));
        partial.insert("name".to_string(), json!(new_name));
        partial.insert("updated_at".to_string(), json!(Utc::now().timestamp_millis()));
        self.table.update(partial)?;
        Ok(())
    }

    /// Updates `id`'s recorded size and bumps `updatedAt`.
    pub fn touch(&self, id: &str, size: u64) -> Result<()> {
        let mut partial = RowData::new();
        partial.insert("id".to_string(), json!(id));
        partial.insert("size".to_string(), json!(size));
        partial.insert("updated_at".to_string(), json!(Utc::now().timestamp_millis()));
        match self.table.update(partial)? {
            UpdateOutcome::Applied => Ok(()),
            UpdateOutcome::NotFoundLocally => {
                Err(EpicenterError::fs(FsErrorCode::ENOENT, id, "no such file or directory"))
            }
        }
    }

    /// Sets `id`'s `updatedAt` directly, for callers restoring a known mtime.
    pub fn set_mtime(&self, id: &str, mtime: i64) -> Result<()> {
        let mut partial = RowData::new();
        partial.insert("id".to_string(), json!(id));
        partial.insert("updated_at".to_string(), json!(mtime));
        match self.table.update(partial)? {
            UpdateOutcome::Applied => Ok(()),
            UpdateOutcome::NotFoundLocally => {
                Err(EpicenterError::fs(FsErrorCode::ENOENT, id, "no such file or directory"))
            }
        }
    }

    /// The name under which `id` should be displayed: its stored name,
    /// unless an earlier-created active sibling already holds it, in
    /// which case a ` (N)` disambiguator is inserted before the
    /// extension, `N` counted by creation order among same-named
    /// siblings.
    pub fn display_name(&self, id: &str) -> Option<String> {
        let row = self.get_row(id)?;
        if !row.is_active() {
            return Some(row.name);
        }
        let mut siblings: Vec<FileRow> = self
            .active_children(row.parent_id.as_deref())
            .into_iter()
            .filter(|r| r.name == row.name)
            .collect();
        siblings.sort_by_key(|r| (r.created_at, r.id.clone()));
        let index = siblings.iter().position(|r| r.id == row.id).unwrap_or(0);
        if index == 0 {
            Some(row.name)
        } else {
            Some(disambiguate(&row.name, index))
        }
    }
}

fn disambiguate(name: &str, n: usize) -> String {
    match name.rfind('.') {
        Some(0) | None => format!("{name} ({n})"),
        Some(i) => format!("{} ({n}){}", &name[..i], &name[i..]),
    }
}

fn compute_path(
    id: &str,
    rows: &HashMap<String, FileRow>,
    cache: &mut HashMap<String, String>,
    visiting: &mut HashSet<String>,
) -> Option<String> {
    if let Some(p) = cache.get(id) {
        return Some(p.clone());
    }
    if !visiting.insert(id.to_string()) {
        return None;
    }
    let row = rows.get(id)?;
    let computed = match &row.parent_id {
        None => path::join("/", &row.name),
        Some(parent_id) => {
            let parent_path = compute_path(parent_id, rows, cache, visiting)?;
            path::join(&parent_path, &row.name)
        }
    };
    visiting.remove(id);
    cache.insert(id.to_string(), computed.clone());
    Some(computed)
}
