//! Error types for store operations.

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

/// Errors that can occur while reading or writing the store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid kind {kind:?}: {reason}")]
    InvalidKind { kind: String, reason: &'static str },

    #[error("invalid relative path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("input for kind {kind:?} cannot be serialized as JSON: {source}")]
    Unserializable {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("corrupt descriptor in {dir}: {source}")]
    CorruptDescriptor {
        dir: Utf8PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode descriptor for {dir}: {source}")]
    EncodeDescriptor {
        dir: Utf8PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("entry link in {dir} escapes the workspace (target {target:?})")]
    EntryLinkEscape { dir: Utf8PathBuf, target: String },

    #[error("symlinks not supported on this platform")]
    SymlinksUnsupported,

    #[error("failed to {op} {path}: {source}")]
    Io {
        op: &'static str,
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    /// Attach operation and path context to an I/O error.
    pub fn io(op: &'static str, path: &Utf8Path, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.to_owned(),
            source,
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
