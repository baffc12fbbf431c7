//! Storage abstraction for CRDT persistence.
//!
//! [`CrdtStorage`] is the one seam transport/persistence providers attach
//! to: a document snapshot plus an append-only update log per named
//! document. Nothing in this crate assumes a particular backend; the
//! only implementation shipped here is [`super::memory_storage::MemoryStorage`],
//! used by default and by every test.

use crate::error::Result;

use super::types::{CrdtUpdate, UpdateOrigin};

/// Result type for storage operations.
pub type StorageResult<T> = Result<T>;

/// Trait for CRDT document storage backends.
///
/// A "document" here is anything named that `yrs` can encode/decode as a
/// self-contained `Doc` state: the workspace LWW log, or one file's
/// content document. The storage maintains two views of each:
///
/// 1. a compacted snapshot (`load_doc`/`save_doc`)
/// 2. an incremental update log (`append_update`/`get_updates_since`), used
///    for sync and history
pub trait CrdtStorage: Send + Sync {
    /// Load the full document state as a binary blob.
    ///
    /// Returns `None` if the document doesn't exist.
    fn load_doc(&self, name: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Save the full document state, overwriting any existing snapshot.
    fn save_doc(&self, name: &str, state: &[u8]) -> StorageResult<()>;

    /// Delete a document and all its updates.
    fn delete_doc(&self, name: &str) -> StorageResult<()>;

    /// List all document names in storage.
    fn list_docs(&self) -> StorageResult<Vec<String>>;

    /// Append an incremental update to the update log.
    ///
    /// Returns the id of the newly created update record.
    fn append_update(&self, name: &str, update: &[u8], origin: UpdateOrigin) -> StorageResult<i64> {
        self.append_update_with_device(name, update, origin, None, None)
    }

    /// Append an incremental update with device attribution.
    fn append_update_with_device(
        &self,
        name: &str,
        update: &[u8],
        origin: UpdateOrigin,
        device_id: Option<&str>,
        device_name: Option<&str>,
    ) -> StorageResult<i64>;

    /// Get all updates for a document recorded after `since_id`.
    fn get_updates_since(&self, name: &str, since_id: i64) -> StorageResult<Vec<CrdtUpdate>>;

    /// Get all updates ever recorded for a document.
    fn get_all_updates(&self, name: &str) -> StorageResult<Vec<CrdtUpdate>>;

    /// Merge old updates into the document snapshot, keeping only the most
    /// recent `keep_updates` log entries.
    fn compact(&self, name: &str, keep_updates: usize) -> StorageResult<()>;

    /// Get the latest update id for a document, or 0 if none exist.
    fn get_latest_update_id(&self, name: &str) -> StorageResult<i64>;

    /// Rename a document, moving its snapshot and update log to a new name.
    fn rename_doc(&self, old_name: &str, new_name: &str) -> StorageResult<()>;
}
