//! In-memory storage implementation, the only [`CrdtStorage`] backend
//! shipped with this crate: used as the default for in-process use and
//! by every test.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::storage::{CrdtStorage, StorageResult};
use super::types::{CrdtUpdate, UpdateOrigin};

/// Threshold for triggering auto-compaction (number of updates).
const AUTO_COMPACT_THRESHOLD: usize = 1000;

/// Number of updates kept after auto-compaction.
const AUTO_COMPACT_KEEP: usize = 500;

/// In-memory CRDT storage.
///
/// Thread-safe via `RwLock`; data is lost when dropped. Auto-compaction
/// triggers once a document's update log exceeds [`AUTO_COMPACT_THRESHOLD`],
/// keeping the most recent [`AUTO_COMPACT_KEEP`] entries.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    docs: RwLock<HashMap<String, Vec<u8>>>,
    updates: RwLock<HashMap<String, Vec<StoredUpdate>>>,
    next_id: RwLock<i64>,
}

#[derive(Debug, Clone)]
struct StoredUpdate {
    id: i64,
    data: Vec<u8>,
    timestamp: i64,
    origin: UpdateOrigin,
    device_id: Option<String>,
    device_name: Option<String>,
}

impl MemoryStorage {
    /// Creates a new empty in-memory storage.
    pub fn new() -> Self {
        Self::default()
    }

    fn next_update_id(&self) -> i64 {
        let mut id = self.next_id.write().unwrap();
        *id += 1;
        *id
    }
}

impl CrdtStorage for MemoryStorage {
    fn load_doc(&self, name: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.docs.read().unwrap().get(name).cloned())
    }

    fn save_doc(&self, name: &str, state: &[u8]) -> StorageResult<()> {
        self.docs
            .write()
            .unwrap()
            .insert(name.to_string(), state.to_vec());
        Ok(())
    }

    fn delete_doc(&self, name: &str) -> StorageResult<()> {
        self.docs.write().unwrap().remove(name);
        self.updates.write().unwrap().remove(name);
        Ok(())
    }

    fn list_docs(&self) -> StorageResult<Vec<String>> {
        Ok(self.docs.read().unwrap().keys().cloned().collect())
    }

    fn append_update_with_device(
        &self,
        name: &str,
        update: &[u8],
        origin: UpdateOrigin,
        device_id: Option<&str>,
        device_name: Option<&str>,
    ) -> StorageResult<i64> {
        let id = self.next_update_id();
        let stored = StoredUpdate {
            id,
            data: update.to_vec(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            origin,
            device_id: device_id.map(String::from),
            device_name: device_name.map(String::from),
        };

        let mut updates = self.updates.write().unwrap();
        let doc_updates = updates.entry(name.to_string()).or_default();
        doc_updates.push(stored);

        if doc_updates.len() > AUTO_COMPACT_THRESHOLD {
            log::debug!("auto-compacting '{name}': {} updates queued", doc_updates.len());
            let drain_count = doc_updates.len() - AUTO_COMPACT_KEEP;
            doc_updates.drain(0..drain_count);
        }

        Ok(id)
    }

    fn get_updates_since(&self, name: &str, since_id: i64) -> StorageResult<Vec<CrdtUpdate>> {
        let updates = self.updates.read().unwrap();
        let doc_updates = updates.get(name).map(|u| u.as_slice()).unwrap_or(&[]);

        Ok(doc_updates
            .iter()
            .filter(|u| u.id > since_id)
            .map(|u| CrdtUpdate {
                update_id: u.id,
                doc_name: name.to_string(),
                data: u.data.clone(),
                timestamp: u.timestamp,
                origin: u.origin,
                device_id: u.device_id.clone(),
                device_name: u.device_name.clone(),
            })
            .collect())
    }

    fn get_all_updates(&self, name: &str) -> StorageResult<Vec<CrdtUpdate>> {
        self.get_updates_since(name, 0)
    }

    fn compact(&self, name: &str, keep_updates: usize) -> StorageResult<()> {
        let mut updates = self.updates.write().unwrap();
        if let Some(doc_updates) = updates.get_mut(name) {
            if doc_updates.len() > keep_updates {
                let drain_count = doc_updates.len() - keep_updates;
                doc_updates.drain(0..drain_count);
            }
        }
        Ok(())
    }

    fn get_latest_update_id(&self, name: &str) -> StorageResult<i64> {
        Ok(self
            .updates
            .read()
            .unwrap()
            .get(name)
            .and_then(|u| u.last())
            .map(|u| u.id)
            .unwrap_or(0))
    }

    fn rename_doc(&self, old_name: &str, new_name: &str) -> StorageResult<()> {
        if let Some(state) = self.docs.write().unwrap().remove(old_name) {
            self.docs.write().unwrap().insert(new_name.to_string(), state);
        }
        if let Some(old_updates) = self.updates.write().unwrap().remove(old_name) {
            self.updates
                .write()
                .unwrap()
                .insert(new_name.to_string(), old_updates);
        }
        Ok(())
    }
}

// Re-export so Arc<dyn CrdtStorage> works without the caller importing the trait twice.
pub(crate) type SharedStorage = Arc<dyn CrdtStorage>;
