//! The virtual POSIX filesystem (C8): `mkdir`/`rm`/`mv`/`readdir`/`stat`
//! composed from the file tree (C7) for structure and the content-doc
//! store (C6) for file bodies.
//!
//! Binary writes are intentionally kept out of the CRDT substrate
//! entirely — they live in a local, non-synced side map keyed by file
//! id, treating non-text attachments as storage-backed blobs rather than
//! CRDT state. Switching a file between text and binary mode clears
//! whichever representation it's leaving.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::content_doc::ContentDocStore;
use crate::error::{EpicenterError, FsErrorCode, Result};
use crate::path;
use crate::tree::{FileKind, FileRow, FileTree};

/// Whether a file's body lives as CRDT text or as an opaque local blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    /// Body lives in the file's `ContentDoc` text CRDT.
    Text,
    /// Body lives in the local binary side map, uncommitted to any CRDT.
    Binary,
}

/// A file's content as read back by `read_file`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContent {
    /// Plain/markdown text content.
    Text(String),
    /// Opaque binary content.
    Binary(Vec<u8>),
}

/// Filesystem metadata for a single entry, as returned by `stat`.
#[derive(Debug, Clone)]
pub struct Stat {
    /// The entry's row id.
    pub id: String,
    /// The name under which it should be displayed (disambiguated).
    pub name: String,
    /// File or folder.
    pub kind: FileKind,
    /// Byte size; for folders this is always `0`.
    pub size: u64,
    /// Creation time, epoch milliseconds.
    pub created_at: i64,
    /// Last metadata/content change, epoch milliseconds.
    pub updated_at: i64,
}

impl Stat {
    fn from_row(row: &FileRow, display_name: String) -> Self {
        Self {
            id: row.id.clone(),
            name: display_name,
            kind: row.kind,
            size: row.size,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// The virtual filesystem: structure from [`FileTree`], text content from
/// [`ContentDocStore`], binary content from a local side map.
pub struct Vfs {
    tree: Arc<FileTree>,
    content: Arc<ContentDocStore>,
    binary: RwLock<HashMap<String, Vec<u8>>>,
    mode: RwLock<HashMap<String, FileMode>>,
}

impl Vfs {
    /// Composes a filesystem over an already-constructed tree and content store.
    pub fn new(tree: Arc<FileTree>, content: Arc<ContentDocStore>) -> Self {
        Self { tree, content, binary: RwLock::new(HashMap::new()), mode: RwLock::new(HashMap::new()) }
    }

    /// The underlying file tree, for callers that need direct C7 access.
    pub fn tree(&self) -> &Arc<FileTree> {
        &self.tree
    }

    /// The underlying content-doc store, for callers that need direct C6
    /// access (e.g. asserting a removed file's document is gone).
    pub fn content(&self) -> &Arc<ContentDocStore> {
        &self.content
    }

    fn mode_of(&self, id: &str) -> FileMode {
        self.mode.read().unwrap().get(id).copied().unwrap_or(FileMode::Text)
    }

    // ------------------------------------------------------------
    // Structure
    // ------------------------------------------------------------

    /// Creates a folder at `path`, including any missing intermediate
    /// directories if `parents` is true.
    pub fn mkdir(&self, abs_path: &str, parents: bool) -> Result<Stat> {
        let normalized = path::normalize(abs_path);
        if let Some(existing) = self.tree.lookup_id(&normalized) {
            let row = self.tree.get_row(&existing).expect("indexed row must exist");
            if row.kind == FileKind::Folder {
                return Ok(Stat::from_row(&row, self.tree.display_name(&existing).unwrap_or(row.name.clone())));
            }
            return Err(EpicenterError::fs(FsErrorCode::EEXIST, abs_path, "a file already exists at this path"));
        }

        let (parent_path, name) = path::split(&normalized);
        let parent_id = match parent_path {
            None => None,
            Some(p) if p == "/" => None,
            Some(p) => match self.tree.lookup_id(&p) {
                Some(id) => Some(id),
                None if parents => Some(self.mkdir(&p, true)?.id),
                None => {
                    return Err(EpicenterError::fs(FsErrorCode::ENOENT, &p, "no such file or directory"));
                }
            },
        };
        let row = self.tree.create(&name, parent_id.as_deref(), FileKind::Folder, 0)?;
        Ok(Stat::from_row(&row, name))
    }

    /// Removes the entry at `path`. Removing a non-empty folder requires
    /// `recursive`. Every removed file's content document is destroyed
    /// along with it, not merely unlinked from the tree.
    pub fn rm(&self, abs_path: &str, recursive: bool) -> Result<()> {
        let id = self.tree.resolve_id(abs_path)?;
        let row = self.tree.get_row(&id).expect("resolved row must exist");
        if row.kind == FileKind::Folder {
            let descendants = self.tree.descendant_ids(&id);
            if !descendants.is_empty() && !recursive {
                return Err(EpicenterError::fs(FsErrorCode::ENOTEMPTY, abs_path, "directory not empty"));
            }
            for descendant in descendants {
                self.forget_content(&descendant)?;
                self.tree.soft_delete(&descendant)?;
            }
        }
        self.forget_content(&id)?;
        self.tree.soft_delete(&id)
    }

    fn forget_content(&self, id: &str) -> Result<()> {
        self.binary.write().unwrap().remove(id);
        self.mode.write().unwrap().remove(id);
        if self.tree.get_row(id).is_some_and(|row| row.kind == FileKind::File) {
            self.content.delete(id)?;
        }
        Ok(())
    }

    /// Moves/renames the entry at `src` to `dst`.
    pub fn mv(&self, src: &str, dst: &str) -> Result<()> {
        let id = self.tree.resolve_id(src)?;
        let (new_parent_id, new_name) = self.tree.parse_path(&path::normalize(dst))?;
        self.tree.move_row(&id, new_parent_id.as_deref(), &new_name)
    }

    /// Lists the active, display-disambiguated entries directly under `path`.
    pub fn readdir(&self, abs_path: &str) -> Result<Vec<Stat>> {
        let parent_id = if path::normalize(abs_path) == "/" {
            None
        } else {
            Some(self.tree.resolve_id(abs_path)?)
        };
        if let Some(id) = &parent_id {
            self.tree.assert_directory(id)?;
        }
        Ok(self
            .tree
            .active_children(parent_id.as_deref())
            .into_iter()
            .map(|row| {
                let display = self.tree.display_name(&row.id).unwrap_or_else(|| row.name.clone());
                Stat::from_row(&row, display)
            })
            .collect())
    }

    /// Metadata for the entry at `path`.
    pub fn stat(&self, abs_path: &str) -> Result<Stat> {
        let id = self.tree.resolve_id(abs_path)?;
        let row = self.tree.get_row(&id).expect("resolved row must exist");
        let display = self.tree.display_name(&id).unwrap_or_else(|| row.name.clone());
        Ok(Stat::from_row(&row, display))
    }

    /// True if `path` resolves to an active entry.
    pub fn exists(&self, abs_path: &str) -> bool {
        self.tree.exists(abs_path)
    }

    /// Resolves `path` against `cwd` into a canonical absolute path,
    /// without checking whether anything lives there.
    pub fn realpath(&self, cwd: &str, abs_path: &str) -> String {
        path::resolve(cwd, abs_path)
    }

    // ------------------------------------------------------------
    // Content
    // ------------------------------------------------------------

    /// Reads a file's content, text or binary depending on how it was
    /// last written.
    pub fn read_file(&self, abs_path: &str) -> Result<FileContent> {
        let id = self.tree.resolve_id(abs_path)?;
        self.assert_file(&id, abs_path)?;
        match self.mode_of(&id) {
            FileMode::Binary => {
                let bytes = self.binary.read().unwrap().get(&id).cloned().unwrap_or_default();
                Ok(FileContent::Binary(bytes))
            }
            FileMode::Text => {
                let doc = self.content.ensure(&id)?;
                Ok(FileContent::Text(doc.get_text()))
            }
        }
    }

    fn assert_file(&self, id: &str, abs_path: &str) -> Result<()> {
        match self.tree.get_row(id) {
            Some(row) if row.kind == FileKind::File => Ok(()),
            Some(_) => Err(EpicenterError::fs(FsErrorCode::EISDIR, abs_path, "is a directory")),
            None => Err(EpicenterError::fs(FsErrorCode::ENOENT, abs_path, "no such file or directory")),
        }
    }

    /// Writes `content` to `path`, creating the file if it doesn't exist.
    /// Switching modes clears whichever representation is being left
    /// behind: a binary write clears the CRDT text, a text write clears
    /// the binary side map.
    pub fn write_file(&self, abs_path: &str, content: FileContent) -> Result<Stat> {
        let normalized = path::normalize(abs_path);
        let id = match self.tree.lookup_id(&normalized) {
            Some(id) => {
                self.assert_file(&id, abs_path)?;
                id
            }
            None => {
                let (parent_id, name) = self.tree.parse_path(&normalized)?;
                self.tree.create(&name, parent_id.as_deref(), FileKind::File, 0)?.id
            }
        };

        let size = match content {
            FileContent::Text(text) => {
                self.binary.write().unwrap().remove(&id);
                self.mode.write().unwrap().insert(id.clone(), FileMode::Text);
                let doc = self.content.ensure(&id)?;
                doc.set_text(&text)?;
                text.len() as u64
            }
            FileContent::Binary(bytes) => {
                let doc = self.content.ensure(&id)?;
                doc.set_text("")?;
                self.mode.write().unwrap().insert(id.clone(), FileMode::Binary);
                let size = bytes.len() as u64;
                self.binary.write().unwrap().insert(id.clone(), bytes);
                size
            }
        };

        self.tree.touch(&id, size)?;
        let row = self.tree.get_row(&id).expect("just written row must exist");
        let display = self.tree.display_name(&id).unwrap_or_else(|| row.name.clone());
        Ok(Stat::from_row(&row, display))
    }

    /// Appends to a file's content. Binary appends concatenate bytes;
    /// text appends are routed through the content doc's minimal-diff path.
    pub fn append_file(&self, abs_path: &str, content: FileContent) -> Result<Stat> {
        let id = self.tree.resolve_id(abs_path)?;
        self.assert_file(&id, abs_path)?;

        let size = match (self.mode_of(&id), content) {
            (FileMode::Text, FileContent::Text(text)) => {
                let doc = self.content.ensure(&id)?;
                doc.append_text(&text)?;
                doc.get_text().len() as u64
            }
            (FileMode::Binary, FileContent::Binary(bytes)) => {
                let mut map = self.binary.write().unwrap();
                let entry = map.entry(id.clone()).or_default();
                entry.extend_from_slice(&bytes);
                entry.len() as u64
            }
            (_, content) => return self.write_file(abs_path, content),
        };

        self.tree.touch(&id, size)?;
        let row = self.tree.get_row(&id).expect("touched row must exist");
        let display = self.tree.display_name(&id).unwrap_or_else(|| row.name.clone());
        Ok(Stat::from_row(&row, display))
    }

    /// Copies `src` to `dst`. Copying a folder requires `recursive`.
    pub fn cp(&self, src: &str, dst: &str, recursive: bool) -> Result<()> {
        let src_id = self.tree.resolve_id(src)?;
        let row = self.tree.get_row(&src_id).expect("resolved row must exist");

        if row.kind == FileKind::Folder {
            if !recursive {
                return Err(EpicenterError::fs(FsErrorCode::EISDIR, src, "is a directory; pass recursive to copy"));
            }
            self.mkdir(dst, true)?;
            for child in self.tree.active_children(Some(&src_id)) {
                let child_src = path::join(&path::normalize(src), &child.name);
                let child_dst = path::join(&path::normalize(dst), &child.name);
                self.cp(&child_src, &child_dst, true)?;
            }
            return Ok(());
        }

        let content = self.read_file(src)?;
        self.write_file(dst, content)?;
        Ok(())
    }

    // ------------------------------------------------------------
    // Permissions / metadata (simplified: no POSIX mode bits are
    // actually enforced, only `updatedAt` is observable).
    // ------------------------------------------------------------

    /// Accepted for POSIX compatibility; mode bits are not modeled, only
    /// the modification time is bumped.
    pub fn chmod(&self, abs_path: &str, _mode_bits: u32) -> Result<()> {
        let id = self.tree.resolve_id(abs_path)?;
        self.tree.set_mtime(&id, chrono::Utc::now().timestamp_millis())
    }

    /// Sets an entry's modification time directly.
    pub fn utimes(&self, abs_path: &str, mtime: i64) -> Result<()> {
        let id = self.tree.resolve_id(abs_path)?;
        self.tree.set_mtime(&id, mtime)
    }

    /// Symlinks are not supported by the virtual filesystem.
    pub fn symlink(&self, _target: &str, _link_path: &str) -> Result<()> {
        Err(EpicenterError::fs(FsErrorCode::ENOSYS, _link_path, "symlinks are not supported"))
    }

    /// Hard links are not supported by the virtual filesystem.
    pub fn link(&self, _existing: &str, _link_path: &str) -> Result<()> {
        Err(EpicenterError::fs(FsErrorCode::ENOSYS, _link_path, "hard links are not supported"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::{LwwLog, MemoryStorage};
    use crate::table::TableHelper;
    use crate::tree::files_table_definition;

    fn new_vfs() -> Vfs {
        let storage = Arc::new(MemoryStorage::new());
        let log = Arc::new(LwwLog::new(Arc::clone(&storage) as Arc<dyn crate::crdt::CrdtStorage>, "table:files".to_string()));
        let table = Arc::new(TableHelper::new(files_table_definition(), log));
        let tree = FileTree::new(table);
        let content = Arc::new(ContentDocStore::new(storage));
        Vfs::new(tree, content)
    }

    #[test]
    fn mkdir_then_readdir_lists_child() {
        let vfs = new_vfs();
        vfs.mkdir("/docs", false).unwrap();
        let entries = vfs.readdir("/").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "docs");
    }

    #[test]
    fn mkdir_parents_creates_missing_intermediate_dirs() {
        let vfs = new_vfs();
        vfs.mkdir("/a/b/c", true).unwrap();
        assert!(vfs.exists("/a"));
        assert!(vfs.exists("/a/b"));
        assert!(vfs.exists("/a/b/c"));
    }

    #[test]
    fn write_then_read_file_round_trips() {
        let vfs = new_vfs();
        vfs.write_file("/note.txt", FileContent::Text("hello".to_string())).unwrap();
        match vfs.read_file("/note.txt").unwrap() {
            FileContent::Text(s) => assert_eq!(s, "hello"),
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[test]
    fn append_file_extends_content() {
        let vfs = new_vfs();
        vfs.write_file("/note.txt", FileContent::Text("hello".to_string())).unwrap();
        vfs.append_file("/note.txt", FileContent::Text(" world".to_string())).unwrap();
        match vfs.read_file("/note.txt").unwrap() {
            FileContent::Text(s) => assert_eq!(s, "hello world"),
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[test]
    fn rm_non_empty_folder_requires_recursive() {
        let vfs = new_vfs();
        vfs.mkdir("/docs", false).unwrap();
        vfs.write_file("/docs/a.txt", FileContent::Text("x".to_string())).unwrap();
        assert!(vfs.rm("/docs", false).is_err());
        vfs.rm("/docs", true).unwrap();
        assert!(!vfs.exists("/docs"));
        assert!(!vfs.exists("/docs/a.txt"));
    }

    #[test]
    fn rm_destroys_the_removed_file_content_doc() {
        let vfs = new_vfs();
        vfs.write_file("/a.txt", FileContent::Text("hi".to_string())).unwrap();
        let id = vfs.stat("/a.txt").unwrap().id;
        assert!(vfs.content().get(&id).is_some());
        vfs.rm("/a.txt", false).unwrap();
        assert!(vfs.content().get(&id).is_none());
    }

    #[test]
    fn mv_renames_and_preserves_content() {
        let vfs = new_vfs();
        vfs.write_file("/a.txt", FileContent::Text("hi".to_string())).unwrap();
        vfs.mv("/a.txt", "/b.txt").unwrap();
        assert!(!vfs.exists("/a.txt"));
        match vfs.read_file("/b.txt").unwrap() {
            FileContent::Text(s) => assert_eq!(s, "hi"),
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[test]
    fn binary_write_clears_text_and_vice_versa() {
        let vfs = new_vfs();
        vfs.write_file("/f", FileContent::Text("hello".to_string())).unwrap();
        vfs.write_file("/f", FileContent::Binary(vec![1, 2, 3])).unwrap();
        match vfs.read_file("/f").unwrap() {
            FileContent::Binary(b) => assert_eq!(b, vec![1, 2, 3]),
            other => panic!("expected binary, got {other:?}"),
        }
        vfs.write_file("/f", FileContent::Text("back to text".to_string())).unwrap();
        match vfs.read_file("/f").unwrap() {
            FileContent::Text(s) => assert_eq!(s, "back to text"),
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[test]
    fn cp_recursive_copies_folder_tree() {
        let vfs = new_vfs();
        vfs.mkdir("/src", false).unwrap();
        vfs.write_file("/src/a.txt", FileContent::Text("a".to_string())).unwrap();
        vfs.cp("/src", "/dst", true).unwrap();
        match vfs.read_file("/dst/a.txt").unwrap() {
            FileContent::Text(s) => assert_eq!(s, "a"),
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[test]
    fn symlink_is_not_supported() {
        let vfs = new_vfs();
        assert!(vfs.symlink("/a.txt", "/link").is_err());
    }

    #[test]
    fn read_directory_as_file_is_eisdir() {
        let vfs = new_vfs();
        vfs.mkdir("/docs", false).unwrap();
        assert!(vfs.read_file("/docs").is_err());
    }
}
