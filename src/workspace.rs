//! The workspace client and its extension builder (C5): owns the tables
//! (C3) and KV store (C4) for one workspace, and lets callers attach
//! extensions progressively, each seeing the exports of every extension
//! registered before it.
//!
//! A chained builder that accumulates extension exports at the type
//! level (`extensions: E1 & E2 & ...`) has no zero-cost equivalent in
//! Rust without const-generic string-set gymnastics, so registration is
//! runtime composition instead: a single growing `WorkspaceClient`, keys
//! checked at registration time, and typed access to an extension's
//! exports through `Extensions::get` downcasting via `Any`.
//!
//! One `yrs::Doc` backs the whole workspace: every table's [`crate::crdt::LwwLog`]
//! and the KV store's log bind their own named array root (`table:<tableId>`,
//! `kv`) within it, rather than each owning a private document. The
//! shared handle is exposed as `ydoc` on both the client and the context
//! handed to extension factories.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use serde_json::Value;
use yrs::Doc;

use crate::crdt::CrdtStorage;
use crate::error::{EpicenterError, Result};
use crate::kv::Kv;
use crate::table::{TableDefinition, TableHelper};
use crate::validator::Field;

/// A future resolving once, used for `whenReady`/`destroy` hooks so the
/// core crate stays agnostic of any particular async runtime.
pub type ReadyFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// An attached extension: a `whenReady`/`destroy` lifecycle plus
/// whatever exports the concrete type carries as its own fields/methods.
pub trait Extension: Send + Sync {
    /// Resolves once the extension has finished its asynchronous setup.
    fn when_ready(&self) -> ReadyFuture;
    /// Tears the extension down. Called in reverse registration order.
    fn destroy(&self) -> ReadyFuture;
    /// Enables downcasting back to the concrete extension type to read
    /// its exports.
    fn as_any(&self) -> &dyn Any;
}

/// A resolved `whenReady` with a no-op `destroy`, for extensions with no
/// asynchronous setup of their own.
pub fn ready_now() -> ReadyFuture {
    Box::pin(std::future::ready(Ok(())))
}

/// The keyed export registry: every registered extension, looked up by
/// its registration key and downcast to its concrete type.
#[derive(Default)]
pub struct Extensions {
    by_key: HashMap<&'static str, Arc<dyn Extension>>,
}

impl Extensions {
    /// Looks up `key` and downcasts it to `T`. Returns `None` if the key
    /// isn't registered or isn't of type `T`.
    pub fn get<T: 'static>(&self, key: &str) -> Option<&T> {
        self.by_key.get(key)?.as_any().downcast_ref::<T>()
    }

    /// True if `key` is already registered.
    pub fn contains(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }
}

/// The read-only context handed to an extension factory: the workspace's
/// id, its shared CRDT document, its tables and KV store, and every
/// extension registered so far.
pub struct WorkspaceContext<'a> {
    /// The workspace's id.
    pub id: &'a str,
    /// The workspace's shared CRDT document.
    pub ydoc: &'a Doc,
    /// Every table registered in this workspace, keyed by table id.
    pub tables: &'a HashMap<String, Arc<TableHelper>>,
    /// The workspace's KV store, if one was defined.
    pub kv: Option<&'a Arc<Kv>>,
    /// Extensions registered before this one.
    pub extensions: &'a Extensions,
}

/// A table/KV-store shape to construct a workspace from.
#[derive(Default)]
pub struct WorkspaceDefinition {
    /// The workspace's tables.
    pub tables: Vec<TableDefinition>,
    /// The workspace's KV fields. Empty means no KV store.
    pub kv_fields: Vec<Field>,
}

struct Registered {
    key: &'static str,
    extension: Arc<dyn Extension>,
}

/// The workspace client: directly usable for table/KV access, and a
/// progressive builder for extensions.
pub struct WorkspaceClient {
    id: String,
    ydoc: Doc,
    storage: Arc<dyn CrdtStorage>,
    tables: HashMap<String, Arc<TableHelper>>,
    kv: Option<Arc<Kv>>,
    extensions: RwLock<Extensions>,
    registered: RwLock<Vec<Registered>>,
    destroyed: RwLock<bool>,
}

/// Creates a workspace client: one shared `yrs::Doc`, with every table's
/// and the KV store's log bound to its own named array root
/// (`table:<tableId>`, `kv`) within it, loaded from `storage` under names
/// scoped by `id`.
pub fn create_workspace(
    id: impl Into<String>,
    def: WorkspaceDefinition,
    storage: Arc<dyn CrdtStorage>,
) -> Result<WorkspaceClient> {
    let id = id.into();
    let ydoc = Doc::new();
    let mut tables = HashMap::new();
    for table_def in def.tables {
        let root_name = format!("table:{}", table_def.id);
        let doc_name = format!("{id}:table:{}", table_def.id);
        let log = Arc::new(crate::crdt::LwwLog::load_in_doc(ydoc.clone(), &root_name, Arc::clone(&storage), doc_name)?);
        tables.insert(table_def.id.clone(), Arc::new(TableHelper::new(table_def, log)));
    }
    let kv = if def.kv_fields.is_empty() {
        None
    } else {
        let log = Arc::new(crate::crdt::LwwLog::load_in_doc(
            ydoc.clone(),
            "kv",
            Arc::clone(&storage),
            format!("{id}:kv"),
        )?);
        Some(Arc::new(Kv::new(def.kv_fields, log)))
    };
    Ok(WorkspaceClient {
        id,
        ydoc,
        storage,
        tables,
        kv,
        extensions: RwLock::new(Extensions::default()),
        registered: RwLock::new(Vec::new()),
        destroyed: RwLock::new(false),
    })
}

impl WorkspaceClient {
    /// The workspace's id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The workspace's shared CRDT document.
    pub fn ydoc(&self) -> &Doc {
        &self.ydoc
    }

    /// Looks up a table by its definition id.
    pub fn table(&self, table_id: &str) -> Result<&Arc<TableHelper>> {
        self.tables.get(table_id).ok_or_else(|| EpicenterError::UnknownTable(table_id.to_string()))
    }

    /// Every registered table, keyed by table id.
    pub fn tables(&self) -> &HashMap<String, Arc<TableHelper>> {
        &self.tables
    }

    /// The workspace's KV store, if one was defined.
    pub fn kv(&self) -> Option<&Arc<Kv>> {
        self.kv.as_ref()
    }

    /// The storage backend this workspace persists through.
    pub fn storage(&self) -> &Arc<dyn CrdtStorage> {
        &self.storage
    }

    /// Registers an extension under `key`. Returns `Err` if `key` is
    /// already registered.
    pub fn try_with_extension<F>(&self, key: &'static str, factory: F) -> Result<()>
    where
        F: FnOnce(&WorkspaceContext) -> Result<Arc<dyn Extension>>,
    {
        if self.extensions.read().unwrap().contains(key) {
            return Err(EpicenterError::ExtensionKeyCollision(key.to_string()));
        }
        let extension = {
            let extensions_guard = self.extensions.read().unwrap();
            let ctx = WorkspaceContext {
                id: &self.id,
                ydoc: &self.ydoc,
                tables: &self.tables,
                kv: self.kv.as_ref(),
                extensions: &extensions_guard,
            };
            factory(&ctx)?
        };
        self.extensions.write().unwrap().by_key.insert(key, Arc::clone(&extension));
        self.registered.write().unwrap().push(Registered { key, extension });
        Ok(())
    }

    /// Registers an extension under `key`. Panics if `key` is already
    /// registered; this is the infallible chain entry point, for callers
    /// that know their keys can't collide.
    pub fn with_extension<F>(&self, key: &'static str, factory: F)
    where
        F: FnOnce(&WorkspaceContext) -> Result<Arc<dyn Extension>>,
    {
        self.try_with_extension(key, factory)
            .unwrap_or_else(|e| panic!("with_extension({key}): {e}"));
    }

    /// A snapshot of every currently registered extension's exports.
    pub fn extensions(&self) -> std::sync::RwLockReadGuard<'_, Extensions> {
        self.extensions.read().unwrap()
    }

    /// The conjunction of every registered extension's `whenReady`.
    pub async fn when_ready(&self) -> Result<()> {
        let futures: Vec<ReadyFuture> =
            self.registered.read().unwrap().iter().map(|r| r.extension.when_ready()).collect();
        for future in futures {
            future.await?;
        }
        Ok(())
    }

    /// Tears down every extension in reverse registration order
    /// (best-effort: one failure doesn't block the rest), then marks the
    /// workspace destroyed. Idempotent.
    pub async fn destroy(&self) -> Result<()> {
        if *self.destroyed.read().unwrap() {
            return Ok(());
        }
        let extensions: Vec<Arc<dyn Extension>> = {
            let registered = self.registered.read().unwrap();
            registered.iter().rev().map(|r| Arc::clone(&r.extension)).collect()
        };
        let mut first_error = None;
        for extension in extensions {
            if let Err(e) = extension.destroy().await
                && first_error.is_none()
            {
                first_error = Some(e);
            }
        }
        *self.destroyed.write().unwrap() = true;
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Reads every table's and the KV store's raw stored values, for
    /// debugging/export tooling.
    pub fn snapshot(&self) -> HashMap<String, Value> {
        let mut out = HashMap::new();
        for (id, table) in &self.tables {
            let rows: Vec<Value> = table
                .get_all_valid()
                .into_iter()
                .map(Value::Object)
                .collect();
            out.insert(id.clone(), Value::Array(rows));
        }
        if let Some(kv) = &self.kv {
            out.insert("__kv".to_string(), Value::Object(kv.to_json()));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::MemoryStorage;
    use crate::validator::FieldKind;
    use futures_lite::future::block_on;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn empty_workspace() -> WorkspaceClient {
        create_workspace(
            "ws1",
            WorkspaceDefinition {
                tables: vec![TableDefinition {
                    id: "posts".to_string(),
                    name: "Posts".to_string(),
                    description: None,
                    icon: None,
                    fields: vec![Field::new("title", FieldKind::Text)],
                }],
                kv_fields: vec![Field::new("theme", FieldKind::Text).with_default(serde_json::json!("light"))],
            },
            Arc::new(MemoryStorage::new()),
        )
        .unwrap()
    }

    struct CounterExtension {
        destroyed: AtomicUsize,
        doubled: i64,
    }

    impl Extension for CounterExtension {
        fn when_ready(&self) -> ReadyFuture {
            ready_now()
        }
        fn destroy(&self) -> ReadyFuture {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
            ready_now()
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn table_and_kv_are_reachable_from_the_client() {
        let client = empty_workspace();
        assert!(client.table("posts").is_ok());
        assert!(client.kv().is_some());
    }

    #[test]
    fn unknown_table_is_an_error() {
        let client = empty_workspace();
        assert!(client.table("missing").is_err());
    }

    #[test]
    fn with_extension_installs_typed_exports() {
        let client = empty_workspace();
        client
            .try_with_extension("counter", |_ctx| {
                Ok(Arc::new(CounterExtension { destroyed: AtomicUsize::new(0), doubled: 84 }) as Arc<dyn Extension>)
            })
            .unwrap();
        let exports = client.extensions();
        let counter = exports.get::<CounterExtension>("counter").unwrap();
        assert_eq!(counter.doubled, 84);
    }

    #[test]
    fn duplicate_extension_key_is_rejected() {
        let client = empty_workspace();
        client
            .try_with_extension("counter", |_ctx| {
                Ok(Arc::new(CounterExtension { destroyed: AtomicUsize::new(0), doubled: 1 }) as Arc<dyn Extension>)
            })
            .unwrap();
        let result = client.try_with_extension("counter", |_ctx| {
            Ok(Arc::new(CounterExtension { destroyed: AtomicUsize::new(0), doubled: 2 }) as Arc<dyn Extension>)
        });
        assert!(result.is_err());
    }

    #[test]
    fn later_extension_sees_earlier_exports() {
        let client = empty_workspace();
        client
            .try_with_extension("counter", |_ctx| {
                Ok(Arc::new(CounterExtension { destroyed: AtomicUsize::new(0), doubled: 21 }) as Arc<dyn Extension>)
            })
            .unwrap();
        client
            .try_with_extension("derived", |ctx| {
                let base = ctx.extensions.get::<CounterExtension>("counter").unwrap();
                Ok(Arc::new(CounterExtension { destroyed: AtomicUsize::new(0), doubled: base.doubled * 2 })
                    as Arc<dyn Extension>)
            })
            .unwrap();
        assert_eq!(client.extensions().get::<CounterExtension>("derived").unwrap().doubled, 42);
    }

    #[test]
    fn when_ready_resolves_once_every_extension_is_ready() {
        let client = empty_workspace();
        client
            .try_with_extension("counter", |_ctx| {
                Ok(Arc::new(CounterExtension { destroyed: AtomicUsize::new(0), doubled: 1 }) as Arc<dyn Extension>)
            })
            .unwrap();
        assert!(block_on(client.when_ready()).is_ok());
    }

    #[test]
    fn destroy_is_idempotent_and_tears_down_in_reverse_order() {
        let client = empty_workspace();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        struct OrderedExtension {
            name: &'static str,
            order: Arc<std::sync::Mutex<Vec<&'static str>>>,
        }
        impl Extension for OrderedExtension {
            fn when_ready(&self) -> ReadyFuture {
                ready_now()
            }
            fn destroy(&self) -> ReadyFuture {
                self.order.lock().unwrap().push(self.name);
                ready_now()
            }
            fn as_any(&self) -> &dyn Any {
                self
            }
        }

        client
            .try_with_extension("first", {
                let order = Arc::clone(&order);
                move |_ctx| Ok(Arc::new(OrderedExtension { name: "first", order }) as Arc<dyn Extension>)
            })
            .unwrap();
        client
            .try_with_extension("second", {
                let order = Arc::clone(&order);
                move |_ctx| Ok(Arc::new(OrderedExtension { name: "second", order }) as Arc<dyn Extension>)
            })
            .unwrap();

        assert!(block_on(client.destroy()).is_ok());
        assert_eq!(*order.lock().unwrap(), vec!["second", "first"]);
        assert!(block_on(client.destroy()).is_ok());
        assert_eq!(order.lock().unwrap().len(), 2);
    }
}
