//! Store path layout.
//!
//! Maps fingerprints to sharded directory paths and defines the reserved
//! member names inside an artifact directory. Everything here is pure
//! string manipulation; no path ever touches the filesystem.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};

use crate::{Result, StoreError};

/// Data directory under the store root.
pub const DATA_DIR: &str = "fs-data";

/// Store layout version; governs on-disk compatibility.
pub const STORE_VERSION: &str = "v1";

/// Reserved descriptor filename. Its presence is the existence predicate
/// for the artifact.
pub const DESCRIPTOR_FILE: &str = ".manifest.json";

/// Reserved entry link name (a symlink into the workspace).
pub const ENTRY_LINK: &str = ".entry";

/// Reserved workspace directory name.
pub const WORKSPACE_DIR: &str = "workspace";

/// Name prefix for scratch directories staged next to their artifact.
pub const SCRATCH_PREFIX: &str = ".tmp-";

/// The full reserved member set of an artifact directory.
pub const RESERVED_NAMES: [&str; 3] = [DESCRIPTOR_FILE, ENTRY_LINK, WORKSPACE_DIR];

/// Path layout over a store root.
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: Utf8PathBuf,
}

impl StoreLayout {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// `<root>/fs-data/<storeVersion>`
    pub fn data_dir(&self) -> Utf8PathBuf {
        self.root.join(DATA_DIR).join(STORE_VERSION)
    }

    pub fn kind_dir(&self, kind: &str) -> Utf8PathBuf {
        self.data_dir().join(kind)
    }

    /// Sharded artifact directory for a fingerprint.
    pub fn artifact_dir(&self, kind: &str, fingerprint: &str) -> Utf8PathBuf {
        self.kind_dir(kind).join(shard(fingerprint)).join(fingerprint)
    }

    /// A fresh scratch sibling for the artifact. Unique per call; scratch
    /// names always carry the `.tmp-` prefix, so they never collide with
    /// a published fingerprint directory.
    pub fn scratch_dir(&self, kind: &str, fingerprint: &str) -> Utf8PathBuf {
        self.kind_dir(kind).join(shard(fingerprint)).join(format!(
            "{SCRATCH_PREFIX}{fingerprint}-{:016x}",
            scratch_nonce()
        ))
    }
}

/// First two hex characters of a fingerprint; caps directory fan-out.
pub fn shard(fingerprint: &str) -> &str {
    &fingerprint[..2]
}

/// Descriptor path inside an artifact (or scratch) directory.
pub fn descriptor_path(dir: &Utf8Path) -> Utf8PathBuf {
    dir.join(DESCRIPTOR_FILE)
}

/// Entry-link path inside an artifact (or scratch) directory.
pub fn entry_link_path(dir: &Utf8Path) -> Utf8PathBuf {
    dir.join(ENTRY_LINK)
}

/// Workspace directory inside an artifact (or scratch) directory.
pub fn workspace_dir(dir: &Utf8Path) -> Utf8PathBuf {
    dir.join(WORKSPACE_DIR)
}

/// Whether a directory name denotes an in-progress scratch build.
pub fn is_scratch_name(name: &str) -> bool {
    name.starts_with(SCRATCH_PREFIX)
}

/// Validate an executor kind: non-empty, no path separators, no leading
/// or trailing whitespace, not `.` or `..`.
pub fn validate_kind(kind: &str) -> Result<()> {
    let reason = if kind.is_empty() {
        Some("empty")
    } else if kind == "." || kind == ".." {
        Some("dot name")
    } else if kind.contains(['/', '\\']) {
        Some("contains a path separator")
    } else if kind != kind.trim() {
        Some("leading or trailing whitespace")
    } else if kind.contains('\0') {
        Some("contains NUL")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(StoreError::InvalidKind {
            kind: kind.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Validate a relative path used for entries and dependency mounts:
/// non-empty, relative, no `.` or `..` components, and the first
/// component must not shadow a reserved artifact member name.
pub fn validate_relative_path(path: &Utf8Path) -> Result<()> {
    let invalid = |reason| StoreError::InvalidPath {
        path: path.to_string(),
        reason,
    };

    if path.as_str().is_empty() {
        return Err(invalid("empty"));
    }
    if path.is_absolute() {
        return Err(invalid("absolute"));
    }
    for (i, component) in path.components().enumerate() {
        match component {
            Utf8Component::Normal(name) => {
                if i == 0 && RESERVED_NAMES.contains(&name) {
                    return Err(invalid("shadows a reserved artifact name"));
                }
            }
            Utf8Component::CurDir => return Err(invalid("contains a `.` component")),
            Utf8Component::ParentDir => return Err(invalid("contains a `..` component")),
            _ => return Err(invalid("not a plain relative path")),
        }
    }
    Ok(())
}

fn scratch_nonce() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    nanos ^ ((std::process::id() as u64) << 32) ^ count.wrapping_mul(0x9e37_79b9_7f4a_7c15)
}
