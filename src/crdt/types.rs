//! Wire types shared by the CRDT storage boundary.

use serde::{Deserialize, Serialize};

/// A CRDT update record, stored for history and sync purposes.
#[derive(Debug, Clone)]
pub struct CrdtUpdate {
    /// Unique identifier for this update.
    pub update_id: i64,
    /// Name of the document this update belongs to.
    pub doc_name: String,
    /// Binary yrs update data.
    pub data: Vec<u8>,
    /// Unix timestamp when this update was recorded (milliseconds).
    pub timestamp: i64,
    /// Origin of this update.
    pub origin: UpdateOrigin,
    /// Device id that produced this update, if attributed.
    pub device_id: Option<String>,
    /// Human-readable device name, if attributed.
    pub device_name: Option<String>,
}

/// Origin of a CRDT update, used to distinguish local vs. remote changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateOrigin {
    /// Update originated from a local mutation.
    Local,
    /// Update received from a remote peer.
    Remote,
    /// Update applied during initial sync handshake.
    Sync,
}

impl std::fmt::Display for UpdateOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UpdateOrigin::Local => "local",
            UpdateOrigin::Remote => "remote",
            UpdateOrigin::Sync => "sync",
        };
        write!(f, "{s}")
    }
}
