//! Last-write-wins log (C1): the substrate every table and KV store is
//! built on.
//!
//! Each live key occupies exactly one slot in an ordered `yrs::ArrayRef`,
//! encoded as a JSON blob `{key, val, ts}` — one array slot per *entry*
//! rather than one `Y.Map` key per row, which is the deliberate shift
//! this crate makes from a native-CRDT-map design: a `Y.Map` resolves
//! concurrent writes to the same key with its own internal clock, which
//! can't be steered by an application-supplied timestamp. An ordered
//! sequence can: on merge, duplicate live slots for one key are resolved
//! by comparing `ts` (ties broken by array position, which `yrs` itself
//! resolves deterministically across peers) and the losing slots are
//! removed, restoring the one-slot-per-key invariant.
//!
//! An in-memory `HashMap` mirrors the live view so reads don't rescan the
//! sequence.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use yrs::{Array, Doc, ReadTxn, Transact, TransactionMut, Update};
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;

use crate::error::{EpicenterError, Result};

use super::storage::CrdtStorage;
use super::types::UpdateOrigin;

const SEQUENCE_NAME: &str = "lww";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LwwEntrySer<V> {
    key: String,
    val: V,
    ts: i64,
}

/// A live entry as seen through the in-memory mirror.
#[derive(Debug, Clone)]
pub struct LwwEntry<V> {
    /// The stored value.
    pub value: V,
    /// The timestamp it was last written at (milliseconds).
    pub ts: i64,
}

/// What happened to a key as the result of one mutation or merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    /// The key had no prior live entry.
    Add,
    /// The key's value was replaced.
    Update,
    /// The key's live entry was removed.
    Delete,
}

/// A single key's before/after state, delivered to observers.
#[derive(Debug, Clone)]
pub struct Change<V> {
    /// The key that changed.
    pub key: String,
    /// What kind of change this was.
    pub action: ChangeAction,
    /// The value before the change, if any.
    pub old_value: Option<V>,
    /// The value after the change, if any.
    pub new_value: Option<V>,
    /// The timestamp of the prior entry, if any.
    pub old_ts: Option<i64>,
    /// The timestamp of the new entry, if any.
    pub new_ts: Option<i64>,
}

type Observer<V> = Box<dyn Fn(&[Change<V>]) + Send + Sync>;

/// An ordered CRDT sequence presenting last-write-wins map semantics.
pub struct LwwLog<V> {
    doc: Doc,
    seq: yrs::ArrayRef,
    storage: Arc<dyn CrdtStorage>,
    doc_name: String,
    mirror: RwLock<HashMap<String, LwwEntry<V>>>,
    observers: RwLock<HashMap<u64, Observer<V>>>,
    next_observer_id: RwLock<u64>,
}

impl<V> LwwLog<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Creates a new, empty LWW log backed by `doc_name` in `storage`, in
    /// its own private CRDT document.
    pub fn new(storage: Arc<dyn CrdtStorage>, doc_name: String) -> Self {
        Self::new_in_doc(Doc::new(), SEQUENCE_NAME, storage, doc_name)
    }

    /// Loads an LWW log from storage, or creates a new empty one if
    /// `doc_name` doesn't exist yet, in its own private CRDT document.
    pub fn load(storage: Arc<dyn CrdtStorage>, doc_name: String) -> Result<Self> {
        Self::load_in_doc(Doc::new(), SEQUENCE_NAME, storage, doc_name)
    }

    /// Creates a new, empty LWW log bound to the `root_name` array root of
    /// an already-constructed `doc`, shared with every other log in the
    /// same workspace.
    pub fn new_in_doc(doc: Doc, root_name: &str, storage: Arc<dyn CrdtStorage>, doc_name: String) -> Self {
        let seq = doc.get_or_insert_array(root_name);
        Self {
            doc,
            seq,
            storage,
            doc_name,
            mirror: RwLock::new(HashMap::new()),
            observers: RwLock::new(HashMap::new()),
            next_observer_id: RwLock::new(0),
        }
    }

    /// Loads an LWW log from storage into the `root_name` array root of an
    /// already-constructed, possibly shared, `doc`.
    pub fn load_in_doc(doc: Doc, root_name: &str, storage: Arc<dyn CrdtStorage>, doc_name: String) -> Result<Self> {
        let log = Self::new_in_doc(doc, root_name, storage, doc_name);
        if let Some(state) = log.storage.load_doc(&log.doc_name)? {
            let update = Update::decode_v1(&state)
                .map_err(|e| EpicenterError::Crdt(format!("failed to decode snapshot: {e}")))?;
            let mut txn = log.doc.transact_mut();
            txn.apply_update(update)
                .map_err(|e| EpicenterError::Crdt(format!("failed to apply snapshot: {e}")))?;
        }
        log.rebuild_mirror();
        Ok(log)
    }

    /// The document/sequence name this log is stored under.
    pub fn doc_name(&self) -> &str {
        &self.doc_name
    }

    // ---------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------

    /// Gets the current value for `key`, if live.
    pub fn get(&self, key: &str) -> Option<V> {
        self.mirror.read().unwrap().get(key).map(|e| e.value.clone())
    }

    /// Gets the current value and its timestamp for `key`, if live.
    pub fn get_entry(&self, key: &str) -> Option<LwwEntry<V>> {
        self.mirror.read().unwrap().get(key).cloned()
    }

    /// Returns true if `key` has a live entry.
    pub fn has(&self, key: &str) -> bool {
        self.mirror.read().unwrap().contains_key(key)
    }

    /// Returns the number of live keys.
    pub fn size(&self) -> usize {
        self.mirror.read().unwrap().len()
    }

    /// Returns every live `(key, value)` pair.
    pub fn entries(&self) -> Vec<(String, V)> {
        self.mirror
            .read()
            .unwrap()
            .iter()
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect()
    }

    /// Returns every live key with a given prefix, e.g. a row's cells.
    pub fn entries_with_prefix(&self, prefix: &str) -> Vec<(String, V)> {
        self.mirror
            .read()
            .unwrap()
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect()
    }

    // ---------------------------------------------------------------
    // Writes
    // ---------------------------------------------------------------

    /// Sets `key` to `value`, last-write-wins.
    pub fn set(&self, key: &str, value: V) -> Result<()> {
        self.set_with_device(key, value, None, None)
    }

    /// Sets `key` to `value`, attributing the write to a device.
    ///
    /// Device attribution is ambient provenance only: it has no bearing
    /// on merge order, which is always decided by `ts`.
    pub fn set_with_device(
        &self,
        key: &str,
        value: V,
        device_id: Option<&str>,
        device_name: Option<&str>,
    ) -> Result<()> {
        let existing = self.mirror.read().unwrap().get(key).map(|e| e.ts);
        let ts = next_ts(existing);

        let sv_before = { let txn = self.doc.transact(); txn.state_vector() };
        {
            let mut txn = self.doc.transact_mut();
            self.remove_live_slot(&mut txn, key);
            let blob = serde_json::to_string(&LwwEntrySer {
                key: key.to_string(),
                val: value.clone(),
                ts,
            })
            .map_err(|e| EpicenterError::Crdt(format!("failed to encode entry: {e}")))?;
            self.seq.push_back(&mut txn, blob);
        }

        let old = self.mirror.write().unwrap().insert(
            key.to_string(),
            LwwEntry { value: value.clone(), ts },
        );
        self.record_update(&sv_before, device_id, device_name)?;

        let change = Change {
            key: key.to_string(),
            action: if old.is_some() { ChangeAction::Update } else { ChangeAction::Add },
            old_value: old.as_ref().map(|e| e.value.clone()),
            new_value: Some(value),
            old_ts: old.map(|e| e.ts),
            new_ts: Some(ts),
        };
        self.notify(&[change]);
        Ok(())
    }

    /// Deletes `key`'s live entry.
    ///
    /// A delete against a key with no local evidence of ever existing is
    /// a no-op: there is nothing to tombstone, and nothing is recorded
    /// or propagated.
    pub fn delete(&self, key: &str) -> Result<()> {
        self.delete_with_device(key, None, None)
    }

    /// Deletes `key`'s live entry, attributing the write to a device.
    pub fn delete_with_device(
        &self,
        key: &str,
        device_id: Option<&str>,
        device_name: Option<&str>,
    ) -> Result<()> {
        let Some(old) = self.mirror.write().unwrap().remove(key) else {
            return Ok(());
        };

        let sv_before = { let txn = self.doc.transact(); txn.state_vector() };
        {
            let mut txn = self.doc.transact_mut();
            self.remove_live_slot(&mut txn, key);
        }
        self.record_update(&sv_before, device_id, device_name)?;

        let change = Change {
            key: key.to_string(),
            action: ChangeAction::Delete,
            old_value: Some(old.value),
            new_value: None,
            old_ts: Some(old.ts),
            new_ts: None,
        };
        self.notify(&[change]);
        Ok(())
    }

    /// Sets every `(key, value)` pair in `entries` inside a single CRDT
    /// transaction, so observers see exactly one notification covering
    /// all of them. Used by the table engine to write a whole row's
    /// cells atomically.
    pub fn set_many(&self, entries: Vec<(String, V)>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let planned: Vec<(String, V, i64, Option<LwwEntry<V>>)> = {
            let mirror = self.mirror.read().unwrap();
            entries
                .into_iter()
                .map(|(key, value)| {
                    let old = mirror.get(&key).cloned();
                    let ts = next_ts(old.as_ref().map(|e| e.ts));
                    (key, value, ts, old)
                })
                .collect()
        };

        let sv_before = { let txn = self.doc.transact(); txn.state_vector() };
        {
            let mut txn = self.doc.transact_mut();
            for (key, value, ts, _) in &planned {
                self.remove_live_slot(&mut txn, key);
                let blob = serde_json::to_string(&LwwEntrySer {
                    key: key.clone(),
                    val: value.clone(),
                    ts: *ts,
                })
                .map_err(|e| EpicenterError::Crdt(format!("failed to encode entry: {e}")))?;
                self.seq.push_back(&mut txn, blob);
            }
        }

        let mut changes = Vec::with_capacity(planned.len());
        {
            let mut mirror = self.mirror.write().unwrap();
            for (key, value, ts, old) in planned {
                mirror.insert(key.clone(), LwwEntry { value: value.clone(), ts });
                changes.push(Change {
                    key,
                    action: if old.is_some() { ChangeAction::Update } else { ChangeAction::Add },
                    old_value: old.as_ref().map(|e| e.value.clone()),
                    new_value: Some(value),
                    old_ts: old.map(|e| e.ts),
                    new_ts: Some(ts),
                });
            }
        }

        self.record_update(&sv_before, None, None)?;
        self.notify(&changes);
        Ok(())
    }

    /// Deletes every key in `keys` inside a single CRDT transaction.
    /// Keys with no live entry are silently skipped, same as [`Self::delete`].
    pub fn delete_many(&self, keys: &[String]) -> Result<()> {
        let removed: Vec<(String, LwwEntry<V>)> = {
            let mut mirror = self.mirror.write().unwrap();
            keys.iter()
                .filter_map(|key| mirror.remove(key).map(|e| (key.clone(), e)))
                .collect()
        };
        if removed.is_empty() {
            return Ok(());
        }

        let sv_before = { let txn = self.doc.transact(); txn.state_vector() };
        {
            let mut txn = self.doc.transact_mut();
            for (key, _) in &removed {
                self.remove_live_slot(&mut txn, key);
            }
        }
        self.record_update(&sv_before, None, None)?;

        let changes: Vec<Change<V>> = removed
            .into_iter()
            .map(|(key, old)| Change {
                key,
                action: ChangeAction::Delete,
                old_value: Some(old.value),
                new_value: None,
                old_ts: Some(old.ts),
                new_ts: None,
            })
            .collect();
        self.notify(&changes);
        Ok(())
    }

    /// Removes every live entry from the log in a single transaction.
    pub fn clear(&self) -> Result<()> {
        let keys: Vec<String> = self.mirror.read().unwrap().keys().cloned().collect();
        self.delete_many(&keys)
    }

    // ---------------------------------------------------------------
    // Remote merge
    // ---------------------------------------------------------------

    /// Applies a remote update, reconciling any keys left with more than
    /// one live slot and delivering a batched [`Change`] per affected key.
    pub fn apply_remote_update(&self, update: &[u8], origin: UpdateOrigin) -> Result<()> {
        let decoded = Update::decode_v1(update)
            .map_err(|e| EpicenterError::Crdt(format!("failed to decode update: {e}")))?;
        {
            let mut txn = self.doc.transact_mut();
            txn.apply_update(decoded)
                .map_err(|e| EpicenterError::Crdt(format!("failed to apply update: {e}")))?;
            let touched = self.reconcile(&mut txn);
            if !touched.is_empty() {
                log::debug!("reconciled {} duplicate key(s) in '{}'", touched.len(), self.doc_name);
            }
        }

        let before = self.mirror.read().unwrap().clone();
        self.rebuild_mirror();
        let after = self.mirror.read().unwrap();

        let mut changes = Vec::new();
        for (key, new_entry) in after.iter() {
            match before.get(key) {
                None => changes.push(Change {
                    key: key.clone(),
                    action: ChangeAction::Add,
                    old_value: None,
                    new_value: Some(new_entry.value.clone()),
                    old_ts: None,
                    new_ts: Some(new_entry.ts),
                }),
                Some(old_entry) if old_entry.ts != new_entry.ts => changes.push(Change {
                    key: key.clone(),
                    action: ChangeAction::Update,
                    old_value: Some(old_entry.value.clone()),
                    new_value: Some(new_entry.value.clone()),
                    old_ts: Some(old_entry.ts),
                    new_ts: Some(new_entry.ts),
                }),
                _ => {}
            }
        }
        for (key, old_entry) in before.iter() {
            if !after.contains_key(key) {
                changes.push(Change {
                    key: key.clone(),
                    action: ChangeAction::Delete,
                    old_value: Some(old_entry.value.clone()),
                    new_value: None,
                    old_ts: Some(old_entry.ts),
                    new_ts: None,
                });
            }
        }
        drop(after);

        self.storage.append_update(&self.doc_name, update, origin)?;
        if !changes.is_empty() {
            self.notify(&changes);
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Sync / persistence
    // ---------------------------------------------------------------

    /// Encodes the current state vector, for computing a sync diff.
    pub fn encode_state_vector(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.state_vector().encode_v1()
    }

    /// Encodes the full current state as an update.
    pub fn encode_state_as_update(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&Default::default())
    }

    /// Saves the current full state as the document's snapshot.
    pub fn save(&self) -> Result<()> {
        let state = self.encode_state_as_update();
        self.storage.save_doc(&self.doc_name, &state)
    }

    // ---------------------------------------------------------------
    // Observation
    // ---------------------------------------------------------------

    /// Registers an observer, returning a token for [`Self::unobserve`].
    pub fn observe<F>(&self, callback: F) -> u64
    where
        F: Fn(&[Change<V>]) + Send + Sync + 'static,
    {
        let mut next_id = self.next_observer_id.write().unwrap();
        let id = *next_id;
        *next_id += 1;
        self.observers.write().unwrap().insert(id, Box::new(callback));
        id
    }

    /// Unregisters a previously registered observer.
    pub fn unobserve(&self, id: u64) {
        self.observers.write().unwrap().remove(&id);
    }

    fn notify(&self, changes: &[Change<V>]) {
        for observer in self.observers.read().unwrap().values() {
            observer(changes);
        }
    }

    // ---------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------

    fn record_update(
        &self,
        sv_before: &yrs::StateVector,
        device_id: Option<&str>,
        device_name: Option<&str>,
    ) -> Result<()> {
        let update = {
            let txn = self.doc.transact();
            txn.encode_state_as_update_v1(sv_before)
        };
        if !update.is_empty() {
            self.storage.append_update_with_device(
                &self.doc_name,
                &update,
                UpdateOrigin::Local,
                device_id,
                device_name,
            )?;
        }
        Ok(())
    }

    /// Removes the (at most one, under the local invariant) live slot for
    /// `key`, if any.
    fn remove_live_slot(&self, txn: &mut TransactionMut, key: &str) {
        let index = self
            .seq
            .iter(txn)
            .enumerate()
            .find_map(|(i, value)| {
                let text = value.cast::<String>().ok()?;
                let entry: LwwEntrySer<serde_json::Value> = serde_json::from_str(&text).ok()?;
                (entry.key == key).then_some(i as u32)
            });
        if let Some(index) = index {
            self.seq.remove_range(txn, index, 1);
        }
    }

    /// Scans the sequence for keys with more than one live slot (the
    /// result of a merge between two peers who both wrote the same key)
    /// and removes every slot but the winner: highest `ts`, ties broken
    /// by later array position.
    fn reconcile(&self, txn: &mut TransactionMut) -> Vec<String> {
        let mut by_key: HashMap<String, Vec<(u32, i64)>> = HashMap::new();
        for (i, value) in self.seq.iter(txn).enumerate() {
            let Ok(text) = value.cast::<String>() else { continue };
            let Ok(entry) = serde_json::from_str::<LwwEntrySer<serde_json::Value>>(&text) else {
                continue;
            };
            by_key.entry(entry.key).or_default().push((i as u32, entry.ts));
        }

        let mut touched = Vec::new();
        for (key, mut slots) in by_key {
            if slots.len() <= 1 {
                continue;
            }
            touched.push(key);
            slots.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));
            let winner_index = slots.last().unwrap().0;
            let mut losers: Vec<u32> = slots
                .into_iter()
                .map(|(i, _)| i)
                .filter(|i| *i != winner_index)
                .collect();
            losers.sort_unstable_by(|a, b| b.cmp(a));
            for index in losers {
                self.seq.remove_range(txn, index, 1);
            }
        }
        touched
    }

    /// Rebuilds the in-memory mirror from the sequence's current live
    /// slots. Assumes [`Self::reconcile`] has already resolved duplicate
    /// keys, but tolerates duplicates defensively (keeping the highest
    /// `ts`) since this is also called right after `load`, before any
    /// reconciliation pass has run.
    fn rebuild_mirror(&self) {
        let txn = self.doc.transact();
        let mut mirror = HashMap::new();
        for value in self.seq.iter(&txn) {
            let Ok(text) = value.cast::<String>() else { continue };
            let Ok(entry) = serde_json::from_str::<LwwEntrySer<V>>(&text) else {
                continue;
            };
            match mirror.get(&entry.key) {
                Some(LwwEntry { ts, .. }) if *ts >= entry.ts => {}
                _ => {
                    mirror.insert(entry.key.clone(), LwwEntry { value: entry.val, ts: entry.ts });
                }
            }
        }
        *self.mirror.write().unwrap() = mirror;
    }
}

/// Monotonic per-key clock: never less than wall-clock now, and always
/// strictly greater than the entry it's replacing.
fn next_ts(existing: Option<i64>) -> i64 {
    let now = chrono::Utc::now().timestamp_millis();
    match existing {
        Some(prev) if prev >= now => prev + 1,
        _ => now,
    }
}

impl<V> std::fmt::Debug for LwwLog<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LwwLog")
            .field("doc_name", &self.doc_name)
            .field("size", &self.mirror.read().unwrap().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::MemoryStorage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn new_log(name: &str) -> LwwLog<String> {
        LwwLog::new(Arc::new(MemoryStorage::new()), name.to_string())
    }

    #[test]
    fn set_then_get() {
        let log = new_log("t");
        log.set("a", "1".to_string()).unwrap();
        assert_eq!(log.get("a"), Some("1".to_string()));
        assert_eq!(log.size(), 1);
    }

    #[test]
    fn overwrite_replaces_value_without_growing() {
        let log = new_log("t");
        log.set("a", "1".to_string()).unwrap();
        log.set("a", "2".to_string()).unwrap();
        assert_eq!(log.get("a"), Some("2".to_string()));
        assert_eq!(log.size(), 1);
    }

    #[test]
    fn delete_removes_key() {
        let log = new_log("t");
        log.set("a", "1".to_string()).unwrap();
        log.delete("a").unwrap();
        assert!(!log.has("a"));
    }

    #[test]
    fn delete_without_local_evidence_is_noop() {
        let log = new_log("t");
        log.delete("never-set").unwrap();
        assert!(!log.has("never-set"));
        assert_eq!(log.encode_state_as_update(), Doc::new().transact().encode_state_as_update_v1(&Default::default()));
    }

    #[test]
    fn observers_see_add_update_delete() {
        let log = new_log("t");
        let seen: Arc<std::sync::Mutex<Vec<ChangeAction>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        log.observe(move |changes| {
            for c in changes {
                seen2.lock().unwrap().push(c.action);
            }
        });
        log.set("a", "1".to_string()).unwrap();
        log.set("a", "2".to_string()).unwrap();
        log.delete("a").unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![ChangeAction::Add, ChangeAction::Update, ChangeAction::Delete]
        );
    }

    #[test]
    fn unobserve_stops_delivery() {
        let log = new_log("t");
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = Arc::clone(&calls);
        let id = log.observe(move |_| {
            calls2.fetch_add(1, Ordering::SeqCst);
        });
        log.set("a", "1".to_string()).unwrap();
        log.unobserve(id);
        log.set("a", "2".to_string()).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_writes_to_same_key_converge_on_later_timestamp() {
        let storage = Arc::new(MemoryStorage::new());
        let a = LwwLog::<String>::new(Arc::clone(&storage) as Arc<dyn CrdtStorage>, "shared-a".to_string());
        let b = LwwLog::<String>::new(Arc::clone(&storage) as Arc<dyn CrdtStorage>, "shared-b".to_string());

        a.set("k", "from-a".to_string()).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        b.set("k", "from-b".to_string()).unwrap();

        let update_from_b = b.encode_state_as_update();
        a.apply_remote_update(&update_from_b, UpdateOrigin::Remote).unwrap();

        assert_eq!(a.get("k"), Some("from-b".to_string()));
        assert_eq!(a.size(), 1);
    }

    #[test]
    fn save_and_load_round_trips() {
        let storage = Arc::new(MemoryStorage::new());
        {
            let log = LwwLog::<String>::new(Arc::clone(&storage) as Arc<dyn CrdtStorage>, "doc".to_string());
            log.set("a", "1".to_string()).unwrap();
            log.save().unwrap();
        }
        let reloaded = LwwLog::<String>::load(storage, "doc".to_string()).unwrap();
        assert_eq!(reloaded.get("a"), Some("1".to_string()));
    }

    #[test]
    fn entries_with_prefix_filters_by_row() {
        let log = new_log("t");
        log.set("row1:title", "hi".to_string()).unwrap();
        log.set("row1:body", "there".to_string()).unwrap();
        log.set("row2:title", "other".to_string()).unwrap();
        let mut cells = log.entries_with_prefix("row1:");
        cells.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(cells.len(), 2);
    }

    #[test]
    fn set_many_fires_one_batched_notification() {
        let log = new_log("t");
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = Arc::clone(&calls);
        log.observe(move |changes| {
            calls2.fetch_add(1, Ordering::SeqCst);
            assert_eq!(changes.len(), 2);
        });
        log.set_many(vec![
            ("row1:title".to_string(), "hi".to_string()),
            ("row1:body".to_string(), "there".to_string()),
        ])
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(log.size(), 2);
    }

    #[test]
    fn delete_many_skips_missing_keys() {
        let log = new_log("t");
        log.set("a", "1".to_string()).unwrap();
        log.delete_many(&["a".to_string(), "missing".to_string()]).unwrap();
        assert!(!log.has("a"));
    }

    #[test]
    fn clear_removes_every_key() {
        let log = new_log("t");
        log.set("a", "1".to_string()).unwrap();
        log.set("b", "2".to_string()).unwrap();
        log.clear().unwrap();
        assert_eq!(log.size(), 0);
    }
}
