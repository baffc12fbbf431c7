//! Typed KV store (C4): one LWW log per workspace, keyed directly by
//! field id, with schema defaults and per-key observation.

use std::sync::Arc;

use serde_json::Value;

use crate::crdt::LwwLog;
use crate::error::{EpicenterError, Result};
use crate::validator::{Field, FieldError, RowValidator};

/// The outcome of reading a single KV field.
#[derive(Debug, Clone)]
pub enum KvResult {
    /// A value is present (or a default/null applies) and passes validation.
    Valid {
        /// The value.
        value: Value,
    },
    /// A value is stored but fails validation.
    Invalid {
        /// The field's key.
        key: String,
        /// What failed.
        error: FieldError,
    },
    /// No value is stored, the field has no default, and isn't nullable.
    NotFound {
        /// The field's key.
        key: String,
    },
}

/// The KV store: one LWW log keyed by field id, no row prefix.
pub struct Kv {
    fields: Vec<Field>,
    log: Arc<LwwLog<Value>>,
}

impl Kv {
    /// Builds a KV store over an already-constructed log.
    pub fn new(fields: Vec<Field>, log: Arc<LwwLog<Value>>) -> Self {
        Self { fields, log }
    }

    /// The KV store's field definitions.
    pub fn definitions(&self) -> &[Field] {
        &self.fields
    }

    fn field(&self, key: &str) -> Result<&Field> {
        self.fields
            .iter()
            .find(|f| f.id == key)
            .ok_or_else(|| EpicenterError::UnknownKvField(key.to_string()))
    }

    /// Reads `key`.
    ///
    /// If no value is stored: returns the field's default if it has one,
    /// else `null` if nullable, else `not_found`. If a value is stored,
    /// validates it against the field's schema.
    pub fn get(&self, key: &str) -> Result<KvResult> {
        let field = self.field(key)?;
        match self.log.get(key) {
            Some(value) => {
                let errors = RowValidator::validate_field(field, &value)?;
                match errors.into_iter().next() {
                    None => Ok(KvResult::Valid { value }),
                    Some(error) => Ok(KvResult::Invalid { key: key.to_string(), error }),
                }
            }
            None => match &field.default {
                Some(default) => Ok(KvResult::Valid { value: default.clone() }),
                None if field.nullable => Ok(KvResult::Valid { value: Value::Null }),
                None => Ok(KvResult::NotFound { key: key.to_string() }),
            },
        }
    }

    /// Sets `key` to `value`, unvalidated (validation happens on read).
    pub fn set(&self, key: &str, value: Value) -> Result<()> {
        self.field(key)?;
        self.log.set(key, value)
    }

    /// Resets `key`: sets it to its default if it has one, else to `null`
    /// if nullable, else deletes the entry (subsequent reads are `not_found`).
    pub fn reset(&self, key: &str) -> Result<()> {
        let field = self.field(key)?;
        match &field.default {
            Some(default) => self.log.set(key, default.clone()),
            None if field.nullable => self.log.set(key, Value::Null),
            None => self.log.delete(key),
        }
    }

    /// True if `key` is a defined field.
    pub fn has_field(&self, key: &str) -> bool {
        self.fields.iter().any(|f| f.id == key)
    }

    /// True if `key` has an explicit stored entry (ignores defaults).
    pub fn has(&self, key: &str) -> bool {
        self.log.has(key)
    }

    /// Deletes every defined key's stored entry.
    pub fn clear(&self) -> Result<()> {
        let keys: Vec<String> = self.fields.iter().map(|f| f.id.clone()).collect();
        self.log.delete_many(&keys)
    }

    /// Returns every explicitly stored value, unvalidated — no defaults,
    /// no nullable substitution.
    pub fn to_json(&self) -> serde_json::Map<String, Value> {
        self.log.entries().into_iter().collect()
    }

    /// Subscribes to every change across the whole store.
    pub fn observe<F>(&self, callback: F) -> u64
    where
        F: Fn(&[crate::crdt::Change<Value>]) + Send + Sync + 'static,
    {
        self.log.observe(callback)
    }

    /// Subscribes to changes on a single key.
    pub fn observe_key<F>(&self, key: &str, callback: F) -> u64
    where
        F: Fn(&crate::crdt::Change<Value>) + Send + Sync + 'static,
    {
        let key = key.to_string();
        self.log.observe(move |changes| {
            for change in changes {
                if change.key == key {
                    callback(change);
                }
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

    fn settings_kv() -> Kv {
        let log = Arc::new(LwwLog::new(Arc::new(MemoryStorage::new()), "kv".to_string()));
        let fields = vec![
            Field::new("theme", FieldKind::Text).with_default(json!("light")),
            Field::new("nickname", FieldKind::Text).nullable(),
            Field::new("max_items", FieldKind::Integer),
        ];
        Kv::new(fields, log)
    }

    #[test]
    fn default_applies_before_first_set() {
        let kv = settings_kv();
        match kv.get("theme").unwrap() {
            KvResult::Valid { value } => assert_eq!(value, json!("light")),
            other => panic!("expected valid, got {other:?}"),
        }
    }

    #[test]
    fn reset_after_set_returns_to_default() {
        let kv = settings_kv();
        kv.set("theme", json!("dark")).unwrap();
        kv.reset("theme").unwrap();
        match kv.get("theme").unwrap() {
            KvResult::Valid { value } => assert_eq!(value, json!("light")),
            other => panic!("expected valid, got {other:?}"),
        }
    }

    #[test]
    fn nullable_without_default_returns_null_when_unset() {
        let kv = settings_kv();
        match kv.get("nickname").unwrap() {
            KvResult::Valid { value } => assert_eq!(value, Value::Null),
            other => panic!("expected valid null, got {other:?}"),
        }
    }

    #[test]
    fn required_without_default_is_not_found() {
        let kv = settings_kv();
        assert!(matches!(kv.get("max_items").unwrap(), KvResult::NotFound { .. }));
    }

    #[test]
    fn reset_without_default_or_nullable_deletes_entry() {
        let kv = settings_kv();
        kv.set("max_items", json!(10)).unwrap();
        kv.reset("max_items").unwrap();
        assert!(matches!(kv.get("max_items").unwrap(), KvResult::NotFound { .. }));
    }

    #[test]
    fn invalid_stored_value_surfaces_not_drops() {
        let kv = settings_kv();
        kv.set("max_items", json!("not a number")).unwrap();
        assert!(matches!(kv.get("max_items").unwrap(), KvResult::Invalid { .. }));
    }

    #[test]
    fn unknown_field_is_an_error() {
        let kv = settings_kv();
        assert!(kv.get("does_not_exist").is_err());
    }

    #[test]
    fn to_json_only_includes_explicitly_set_keys() {
        let kv = settings_kv();
        kv.set("theme", json!("dark")).unwrap();
        let json = kv.to_json();
        assert_eq!(json.len(), 1);
        assert_eq!(json.get("theme"), Some(&json!("dark")));
    }

    #[test]
    fn clear_deletes_every_defined_key() {
        let kv = settings_kv();
        kv.set("theme", json!("dark")).unwrap();
        kv.set("max_items", json!(5)).unwrap();
        kv.clear().unwrap();
        assert!(kv.to_json().is_empty());
    }

    #[test]
    fn observe_key_filters_to_one_key() {
        let kv = settings_kv();
        let hits = Arc::new(std::sync::Mutex::new(0));
        let hits2 = Arc::clone(&hits);
        kv.observe_key("theme", move |_| {
            *hits2.lock().unwrap() += 1;
        });
        kv.set("max_items", json!(1)).unwrap();
        kv.set("theme", json!("dark")).unwrap();
        assert_eq!(*hits.lock().unwrap(), 1);
    }
}
