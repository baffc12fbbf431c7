//! Content-doc store (C6): on-demand lifecycle of per-file content CRDT
//! documents, separate from the workspace document so each file's GC
//! policy (off, for revision history) can differ from the workspace's
//! (on, for LWW-log compaction).
//!
//! One CRDT document per file, holding a `Y.Text("text")` for body
//! content and, when the file has structured metadata (markdown
//! frontmatter), a `Y.Map("frontmatter")` alongside it. Rich body content
//! is represented as `Y.Text` the same as plain text rather than a
//! separate XML fragment type, keeping a single text-merge code path for
//! both.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use yrs::{Doc, GetString, Map, Observable, ReadTxn, Text, Transact, Update};
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;

use crate::error::{EpicenterError, Result};
use crate::crdt::{CrdtStorage, UpdateOrigin};

const TEXT_NAME: &str = "text";
const FRONTMATTER_MAP_NAME: &str = "frontmatter";

/// A single file's content CRDT document.
///
/// Constructed with garbage collection disabled (`skip_gc: true`) so
/// that a file's full edit history remains reconstructable, unlike the
/// workspace document's LWW log, which relies on GC to stay compact.
pub struct ContentDoc {
    doc: Doc,
    text: yrs::TextRef,
    frontmatter: yrs::MapRef,
    storage: Arc<dyn CrdtStorage>,
    doc_name: String,
}

impl ContentDoc {
    fn new_doc(file_id: &str) -> Doc {
        let options = yrs::Options {
            guid: file_id.into(),
            skip_gc: true,
            ..yrs::Options::default()
        };
        Doc::with_options(options)
    }

    /// Creates a new, empty content document for `file_id`.
    pub fn new(storage: Arc<dyn CrdtStorage>, file_id: String) -> Self {
        let doc = Self::new_doc(&file_id);
        let text = doc.get_or_insert_text(TEXT_NAME);
        let frontmatter = doc.get_or_insert_map(FRONTMATTER_MAP_NAME);
        Self { doc, text, frontmatter, storage, doc_name: file_id }
    }

    /// Loads a content document from storage, or creates a new empty one.
    pub fn load(storage: Arc<dyn CrdtStorage>, file_id: String) -> Result<Self> {
        let doc = Self::new_doc(&file_id);
        let text = doc.get_or_insert_text(TEXT_NAME);
        let frontmatter = doc.get_or_insert_map(FRONTMATTER_MAP_NAME);

        if let Some(state) = storage.load_doc(&file_id)? {
            let update = Update::decode_v1(&state)
                .map_err(|e| EpicenterError::Crdt(format!("failed to decode snapshot: {e}")))?;
            let mut txn = doc.transact_mut();
            txn.apply_update(update)
                .map_err(|e| EpicenterError::Crdt(format!("failed to apply snapshot: {e}")))?;
        }

        Ok(Self { doc, text, frontmatter, storage, doc_name: file_id })
    }

    /// The file id this document belongs to (also its CRDT guid).
    pub fn file_id(&self) -> &str {
        &self.doc_name
    }

    // ------------------------------------------------------------
    // Body content
    // ------------------------------------------------------------

    /// Returns the full body content.
    pub fn get_text(&self) -> String {
        let txn = self.doc.transact();
        self.text.get_string(&txn)
    }

    /// Replaces the body content, computing a minimal insert/delete diff
    /// so unchanged spans keep their CRDT identity across peers.
    pub fn set_text(&self, content: &str) -> Result<()> {
        let (current, sv_before) = {
            let txn = self.doc.transact();
            (self.text.get_string(&txn), txn.state_vector())
        };
        if current == content {
            return Ok(());
        }

        let current_chars: Vec<char> = current.chars().collect();
        let new_chars: Vec<char> = content.chars().collect();
        let prefix = current_chars
            .iter()
            .zip(new_chars.iter())
            .take_while(|(a, b)| a == b)
            .count();
        let remaining_current = current_chars.len() - prefix;
        let remaining_new = new_chars.len() - prefix;
        let suffix = current_chars[prefix..]
            .iter()
            .rev()
            .zip(new_chars[prefix..].iter().rev())
            .take_while(|(a, b)| a == b)
            .take(remaining_current.min(remaining_new))
            .count();

        let delete_start = prefix;
        let delete_end = current_chars.len() - suffix;
        let insert_end = new_chars.len() - suffix;

        {
            let mut txn = self.doc.transact_mut();
            if delete_end > delete_start {
                self.text.remove_range(&mut txn, delete_start as u32, (delete_end - delete_start) as u32);
            }
            if insert_end > prefix {
                let inserted: String = new_chars[prefix..insert_end].iter().collect();
                self.text.insert(&mut txn, delete_start as u32, &inserted);
            }
        }

        self.record_update(&sv_before)
    }

    /// Appends text to the end of the body.
    pub fn append_text(&self, content: &str) -> Result<()> {
        let sv_before = { let txn = self.doc.transact(); txn.state_vector() };
        {
            let mut txn = self.doc.transact_mut();
            let len = self.text.len(&txn);
            self.text.insert(&mut txn, len, content);
        }
        self.record_update(&sv_before)
    }

    // ------------------------------------------------------------
    // Frontmatter
    // ------------------------------------------------------------

    /// Reads a frontmatter property.
    pub fn get_frontmatter(&self, key: &str) -> Option<String> {
        let txn = self.doc.transact();
        self.frontmatter.get(&txn, key).and_then(|v| v.cast::<String>().ok())
    }

    /// Sets a frontmatter property.
    pub fn set_frontmatter(&self, key: &str, value: &str) -> Result<()> {
        let sv_before = { let txn = self.doc.transact(); txn.state_vector() };
        {
            let mut txn = self.doc.transact_mut();
            self.frontmatter.insert(&mut txn, key, value);
        }
        self.record_update(&sv_before)
    }

    /// Removes a frontmatter property.
    pub fn remove_frontmatter(&self, key: &str) -> Result<()> {
        let sv_before = { let txn = self.doc.transact(); txn.state_vector() };
        {
            let mut txn = self.doc.transact_mut();
            self.frontmatter.remove(&mut txn, key);
        }
        self.record_update(&sv_before)
    }

    /// Lists every frontmatter key.
    pub fn frontmatter_keys(&self) -> Vec<String> {
        let txn = self.doc.transact();
        self.frontmatter.keys(&txn).map(String::from).collect()
    }

    // ------------------------------------------------------------
    // Sync / persistence
    // ------------------------------------------------------------

    fn record_update(&self, sv_before: &yrs::StateVector) -> Result<()> {
        let update = {
            let txn = self.doc.transact();
            txn.encode_state_as_update_v1(sv_before)
        };
        if !update.is_empty() {
            self.storage.append_update(&self.doc_name, &update, UpdateOrigin::Local)?;
        }
        Ok(())
    }

    /// Applies an update from a remote peer.
    pub fn apply_update(&self, update: &[u8], origin: UpdateOrigin) -> Result<()> {
        let decoded = Update::decode_v1(update)
            .map_err(|e| EpicenterError::Crdt(format!("failed to decode update: {e}")))?;
        {
            let mut txn = self.doc.transact_mut();
            txn.apply_update(decoded)
                .map_err(|e| EpicenterError::Crdt(format!("failed to apply update: {e}")))?;
        }
        self.storage.append_update(&self.doc_name, update, origin)?;
        Ok(())
    }

    /// Saves the current full state as the document's snapshot.
    pub fn save(&self) -> Result<()> {
        let state = { let txn = self.doc.transact(); txn.encode_state_as_update_v1(&Default::default()) };
        self.storage.save_doc(&self.doc_name, &state)
    }

    /// Observes body text changes.
    pub fn observe_text<F>(&self, callback: F) -> yrs::Subscription
    where
        F: Fn() + 'static,
    {
        self.text.observe(move |_txn, _event| callback())
    }
}

impl std::fmt::Debug for ContentDoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentDoc").field("file_id", &self.doc_name).finish_non_exhaustive()
    }
}

/// A process-wide registry of `fileId -> ContentDoc`, caching documents
/// behind double-checked locking the way `BodyDocManager` does.
pub struct ContentDocStore {
    storage: Arc<dyn CrdtStorage>,
    docs: RwLock<HashMap<String, Arc<ContentDoc>>>,
}

impl ContentDocStore {
    /// Creates a new, empty store.
    pub fn new(storage: Arc<dyn CrdtStorage>) -> Self {
        Self { storage, docs: RwLock::new(HashMap::new()) }
    }

    /// Returns the content document for `file_id`, loading or creating it
    /// if it isn't already cached.
    pub fn ensure(&self, file_id: &str) -> Result<Arc<ContentDoc>> {
        if let Some(doc) = self.docs.read().unwrap().get(file_id) {
            return Ok(Arc::clone(doc));
        }

        let mut docs = self.docs.write().unwrap();
        if let Some(doc) = docs.get(file_id) {
            return Ok(Arc::clone(doc));
        }

        let doc = match ContentDoc::load(Arc::clone(&self.storage), file_id.to_string()) {
            Ok(doc) => doc,
            Err(_) => ContentDoc::new(Arc::clone(&self.storage), file_id.to_string()),
        };
        let doc = Arc::new(doc);
        docs.insert(file_id.to_string(), Arc::clone(&doc));
        Ok(doc)
    }

    /// Returns a cached or stored document without creating a new one.
    pub fn get(&self, file_id: &str) -> Option<Arc<ContentDoc>> {
        if let Some(doc) = self.docs.read().unwrap().get(file_id) {
            return Some(Arc::clone(doc));
        }
        match self.storage.load_doc(file_id) {
            Ok(Some(_)) => self.ensure(file_id).ok(),
            _ => None,
        }
    }

    /// Renames a document's backing storage entry. The document's guid
    /// (the file id) never changes; this only moves persisted state.
    pub fn rename(&self, old_file_id: &str, new_file_id: &str) -> Result<()> {
        self.storage.rename_doc(old_file_id, new_file_id)?;
        let mut docs = self.docs.write().unwrap();
        if let Some(doc) = docs.remove(old_file_id) {
            docs.insert(new_file_id.to_string(), doc);
        }
        Ok(())
    }

    /// Permanently removes a document and its storage.
    pub fn delete(&self, file_id: &str) -> Result<()> {
        self.docs.write().unwrap().remove(file_id);
        self.storage.delete_doc(file_id)
    }

    /// Removes every cached document without touching storage.
    pub fn destroy_all(&self) {
        self.docs.write().unwrap().clear();
    }

    /// Saves every currently loaded document.
    pub fn save_all(&self) -> Result<()> {
        for doc in self.docs.read().unwrap().values() {
            doc.save()?;
        }
        Ok(())
    }

    /// The number of documents currently loaded in memory.
    pub fn loaded_count(&self) -> usize {
        self.docs.read().unwrap().len()
    }
}
