//! Unified error taxonomy for the engine.
//!
//! Data-path outcomes (`not_found`, `not_found_locally`, `invalid`) are
//! deliberately **not** represented here — they are plain enum values
//! returned from table/KV operations, not errors. This enum only carries
//! programmer errors, provider/storage failures, and FS errors, keeping
//! recoverable data states and hard failures on separate paths.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EpicenterError>;

/// POSIX-like error codes surfaced by the virtual filesystem (C8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsErrorCode {
    /// No such file or directory.
    ENOENT,
    /// File exists.
    EEXIST,
    /// Is a directory.
    EISDIR,
    /// Not a directory.
    ENOTDIR,
    /// Directory not empty.
    ENOTEMPTY,
    /// Function not implemented (symlinks/hardlinks).
    ENOSYS,
}

impl std::fmt::Display for FsErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FsErrorCode::ENOENT => "ENOENT",
            FsErrorCode::EEXIST => "EEXIST",
            FsErrorCode::EISDIR => "EISDIR",
            FsErrorCode::ENOTDIR => "ENOTDIR",
            FsErrorCode::ENOTEMPTY => "ENOTEMPTY",
            FsErrorCode::ENOSYS => "ENOSYS",
        };
        write!(f, "{s}")
    }
}

/// Unified error type for engine operations.
#[derive(Debug, Error)]
pub enum EpicenterError {
    /// Underlying I/O failure from a storage backend.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A `yrs` update failed to decode or apply.
    #[error("CRDT error: {0}")]
    Crdt(String),

    /// A `CrdtStorage` backend failed to persist or load state.
    #[error("storage error: {0}")]
    Storage(String),

    /// A row id or field id violated the `:`-free, non-empty contract (C2/C10).
    ///
    /// This is a programmer error: ids are validated at construction time,
    /// not at call time, so a caller who passes an untrusted string through
    /// unchecked will see this fail loudly rather than silently corrupt a
    /// cell key.
    #[error("invalid id '{value}': {reason}")]
    InvalidId {
        /// The offending id value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A cell key did not split into exactly one `rowId:fieldId` pair.
    #[error("malformed cell key '{0}'")]
    MalformedCellKey(String),

    /// `Tables.get(tableId)` was called with an id not in the workspace definition.
    #[error("unknown table '{0}'")]
    UnknownTable(String),

    /// A KV helper was asked for a field id not in the workspace definition.
    #[error("unknown kv field '{0}'")]
    UnknownKvField(String),

    /// A POSIX-style filesystem error.
    #[error("{code} at '{}': {message}", path.display())]
    Fs {
        /// POSIX-like error code.
        code: FsErrorCode,
        /// Path the operation was attempted against.
        path: PathBuf,
        /// Human-readable detail.
        message: String,
    },

    /// `.withExtension(key, ...)` was called twice with the same key.
    #[error("extension key '{0}' is already registered")]
    ExtensionKeyCollision(String),

    /// An extension's `whenReady` future rejected.
    #[error("extension '{key}' failed to become ready: {reason}")]
    ExtensionReady {
        /// The extension's registration key.
        key: String,
        /// The failure reported by the extension.
        reason: String,
    },
}

impl EpicenterError {
    /// Construct an `Fs` error with a message.
    pub fn fs(code: FsErrorCode, path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        EpicenterError::Fs {
            code,
            path: path.into(),
            message: message.into(),
        }
    }

    /// Convert to a serializable representation, for host/IPC boundaries
    /// that can't carry a `thiserror` enum across a process edge.
    pub fn to_serializable(&self) -> SerializableError {
        SerializableError::from(self)
    }
}

/// A serializable representation of [`EpicenterError`], for callers that
/// need to carry an error across an IPC boundary this crate doesn't itself
/// define (e.g. a desktop shell host).
#[derive(Debug, Clone, Serialize)]
pub struct SerializableError {
    /// The error variant's name.
    pub kind: String,
    /// The error's `Display` message.
    pub message: String,
    /// The associated path, if the variant carries one.
    pub path: Option<PathBuf>,
}

impl From<&EpicenterError> for SerializableError {
    fn from(err: &EpicenterError) -> Self {
        let kind = match err {
            EpicenterError::Io(_) => "Io",
            EpicenterError::Crdt(_) => "Crdt",
            EpicenterError::Storage(_) => "Storage",
            EpicenterError::InvalidId { .. } => "InvalidId",
            EpicenterError::MalformedCellKey(_) => "MalformedCellKey",
            EpicenterError::UnknownTable(_) => "UnknownTable",
            EpicenterError::UnknownKvField(_) => "UnknownKvField",
            EpicenterError::Fs { .. } => "Fs",
            EpicenterError::ExtensionKeyCollision(_) => "ExtensionKeyCollision",
            EpicenterError::ExtensionReady { .. } => "ExtensionReady",
        }
        .to_string();

        let path = match err {
            EpicenterError::Fs { path, .. } => Some(path.clone()),
            _ => None,
        };

        Self { kind, message: err.to_string(), path }
    }
}

impl From<EpicenterError> for SerializableError {
    fn from(err: EpicenterError) -> Self {
        SerializableError::from(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializable_error_preserves_kind_and_path() {
        let err = EpicenterError::fs(FsErrorCode::ENOENT, "/a.txt", "no such file or directory");
        let serializable = err.to_serializable();
        assert_eq!(serializable.kind, "Fs");
        assert_eq!(serializable.path, Some(PathBuf::from("/a.txt")));
    }

    #[test]
    fn non_path_error_has_no_path() {
        let err = EpicenterError::UnknownTable("ghost".to_string());
        assert_eq!(err.to_serializable().path, None);
    }
}
