//! CRDT substrate: storage abstraction, the in-memory backend, and the
//! last-write-wins log every table and KV store is built on (C1).

mod lww_log;
mod memory_storage;
mod storage;
mod types;

pub use lww_log::{Change, ChangeAction, LwwEntry, LwwLog};
pub use memory_storage::MemoryStorage;
pub use storage::{CrdtStorage, StorageResult};
pub use types::{CrdtUpdate, UpdateOrigin};
