//! Artifact descriptors and entry links.
//!
//! The descriptor is the artifact's existence predicate: a directory in
//! the store is an artifact iff its reserved descriptor file is present.
//! The entry link is a relative symlink (`workspace/<entry>`) naming the
//! artifact's canonical entry point; relative targets keep artifacts
//! relocatable when the store root moves.

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::layout::{self, WORKSPACE_DIR};
use crate::{Result, StoreError};

/// Descriptor schema version recorded in every artifact.
pub const MANIFEST_VERSION: &str = "1.0.0";

/// The on-disk descriptor record (stable wire format, camelCase keys).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub manifest_version: String,
    pub kind: String,
    pub input: Value,
    pub metadata: Map<String, Value>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Descriptor {
    /// A descriptor stamped now. `created_at` may be carried over from a
    /// prior publish of the same fingerprint; it is immutable across
    /// republish, while `updated_at` is rewritten on every publish.
    pub fn new(
        kind: &str,
        input: Value,
        metadata: Map<String, Value>,
        created_at: Option<Timestamp>,
    ) -> Self {
        let now = Timestamp::now();
        Self {
            manifest_version: MANIFEST_VERSION.to_string(),
            kind: kind.to_string(),
            input,
            metadata,
            created_at: created_at.unwrap_or(now),
            updated_at: now,
        }
    }
}

/// Serialize the descriptor into the reserved filename inside `dir`.
/// Pretty-printed; the field set is the stable wire format, the
/// whitespace is not.
pub async fn write_descriptor(dir: &Utf8Path, descriptor: &Descriptor) -> Result<()> {
    let path = layout::descriptor_path(dir);
    let json = serde_json::to_string_pretty(descriptor).map_err(|source| {
        StoreError::EncodeDescriptor {
            dir: dir.to_owned(),
            source,
        }
    })?;
    tokio::fs::write(&path, json)
        .await
        .map_err(|e| StoreError::io("write descriptor", &path, e))
}

/// Parse the descriptor in `dir`. Invalid JSON is a `CorruptDescriptor`
/// error, never silently treated as absent; the caller decides whether
/// to delete and retry.
pub async fn read_descriptor(dir: &Utf8Path) -> Result<Descriptor> {
    let path = layout::descriptor_path(dir);
    let json = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| StoreError::io("read descriptor", &path, e))?;
    serde_json::from_str(&json).map_err(|source| StoreError::CorruptDescriptor {
        dir: dir.to_owned(),
        source,
    })
}

/// Existence predicate: the artifact exists iff its descriptor file does.
pub async fn artifact_exists(dir: &Utf8Path) -> bool {
    tokio::fs::try_exists(layout::descriptor_path(dir))
        .await
        .unwrap_or(false)
}

/// Create the reserved entry link pointing at `workspace/<entry>`.
pub async fn create_entry_link(dir: &Utf8Path, entry: &Utf8Path) -> Result<()> {
    layout::validate_relative_path(entry)?;
    let link = layout::entry_link_path(dir);
    let target = Utf8PathBuf::from(WORKSPACE_DIR).join(entry);
    symlink(&target, &link).await
}

/// Follow the entry link and verify its target lies strictly within the
/// artifact's workspace. Returns the (artifact-absolute) resolved path.
pub async fn resolve_entry_link(dir: &Utf8Path) -> Result<Utf8PathBuf> {
    let link = layout::entry_link_path(dir);
    let raw = tokio::fs::read_link(&link)
        .await
        .map_err(|e| StoreError::io("read entry link", &link, e))?;
    let target = Utf8PathBuf::from_path_buf(raw).map_err(|p| StoreError::EntryLinkEscape {
        dir: dir.to_owned(),
        target: p.display().to_string(),
    })?;

    if !entry_target_is_safe(&target) {
        return Err(StoreError::EntryLinkEscape {
            dir: dir.to_owned(),
            target: target.into_string(),
        });
    }
    Ok(dir.join(target))
}

/// Whether an entry-link target stays strictly within `workspace/`.
/// Shared with graph discovery, which must make the same judgment
/// without touching the filesystem.
pub fn entry_target_is_safe(target: &Utf8Path) -> bool {
    let mut components = target.components();
    match components.next() {
        Some(Utf8Component::Normal(first)) if first == WORKSPACE_DIR => {
            let rest: Vec<_> = components.collect();
            !rest.is_empty()
                && rest
                    .iter()
                    .all(|c| matches!(c, Utf8Component::Normal(_)))
        }
        _ => false,
    }
}

pub(crate) async fn symlink(target: &Utf8Path, link: &Utf8Path) -> Result<()> {
    #[cfg(unix)]
    {
        tokio::fs::symlink(target, link)
            .await
            .map_err(|e| StoreError::io("create symlink", link, e))
    }
    #[cfg(not(unix))]
    {
        let _ = (target, link);
        Err(StoreError::SymlinksUnsupported)
    }
}
