//! ox-graph: DAG discovery over the artifact store
//!
//! Reconstructs the graph of artifacts currently on disk by scanning the
//! sharded store layout, reading descriptors, and resolving workspace
//! mount symlinks back into `(kind, fingerprint)` edges.
//!
//! Discovery is advisory: it never mutates the store, skips in-progress
//! scratch directories, and drops nodes or edges it cannot decode
//! (corrupt descriptors, symlinks leaving the store) instead of
//! surfacing them as errors.

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::warn;

use ox_store::layout::{self, ENTRY_LINK, StoreLayout};
use ox_store::manifest::{Descriptor, entry_target_is_safe};

/// Errors during a store scan. Only I/O on the store skeleton surfaces;
/// per-artifact decode problems are skipped with a warning.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("failed to {op} {path}: {source}")]
    Io {
        op: &'static str,
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One artifact on disk.
#[derive(Debug, Clone)]
pub struct ArtifactNode {
    pub kind: String,
    pub fingerprint: String,
    pub descriptor: Descriptor,
    /// Resolved entry path, or `None` when the entry link is missing or
    /// does not stay within the workspace.
    pub entry: Option<Utf8PathBuf>,
    /// Mounts pointing at other artifacts in this store.
    pub edges: Vec<MountEdge>,
}

/// A dependency edge: the owning artifact mounts `(kind, fingerprint)`
/// at the workspace-relative `mount` path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEdge {
    pub mount: Utf8PathBuf,
    pub kind: String,
    pub fingerprint: String,
}

/// The discovered graph. Nodes are sorted by `(kind, fingerprint)` for
/// deterministic output.
#[derive(Debug, Clone, Default)]
pub struct ArtifactGraph {
    pub nodes: Vec<ArtifactNode>,
}

impl ArtifactGraph {
    pub fn get(&self, kind: &str, fingerprint: &str) -> Option<&ArtifactNode> {
        self.nodes
            .iter()
            .find(|n| n.kind == kind && n.fingerprint == fingerprint)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Scan the store under `root` and reconstruct the artifact DAG.
///
/// Directories whose name begins with the scratch prefix are never
/// reported. Workspace symlinks that resolve to another artifact's entry
/// link become edges labeled with their mount path; symlinks leaving the
/// store are ignored.
pub fn list_artifacts(root: &Utf8Path) -> Result<ArtifactGraph, GraphError> {
    let layout = StoreLayout::new(root);
    let data_dir = layout.data_dir();
    let mut nodes = Vec::new();

    if !data_dir.exists() {
        return Ok(ArtifactGraph::default());
    }

    for kind_dir in read_subdirs(&data_dir)? {
        let Some(kind) = kind_dir.file_name().map(str::to_owned) else {
            continue;
        };
        for shard_dir in read_subdirs(&kind_dir)? {
            for artifact_dir in read_subdirs(&shard_dir)? {
                let Some(name) = artifact_dir.file_name().map(str::to_owned) else {
                    continue;
                };
                if layout::is_scratch_name(&name) {
                    continue;
                }
                match read_node(&data_dir, &artifact_dir, &kind, &name) {
                    Ok(Some(node)) => nodes.push(node),
                    Ok(None) => {}
                    Err(e) => {
                        warn!(dir = %artifact_dir, error = %e, "skipping undecodable artifact");
                    }
                }
            }
        }
    }

    nodes.sort_by(|a, b| (&a.kind, &a.fingerprint).cmp(&(&b.kind, &b.fingerprint)));
    Ok(ArtifactGraph { nodes })
}

fn read_node(
    data_dir: &Utf8Path,
    dir: &Utf8Path,
    kind: &str,
    fingerprint: &str,
) -> Result<Option<ArtifactNode>, GraphError> {
    let descriptor_path = layout::descriptor_path(dir);
    let json = match std::fs::read_to_string(&descriptor_path) {
        Ok(json) => json,
        // No descriptor, no artifact.
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(GraphError::Io {
                op: "read descriptor",
                path: descriptor_path,
                source,
            });
        }
    };
    let descriptor: Descriptor = match serde_json::from_str(&json) {
        Ok(d) => d,
        Err(e) => {
            warn!(dir = %dir, error = %e, "skipping artifact with corrupt descriptor");
            return Ok(None);
        }
    };

    let entry = match std::fs::read_link(layout::entry_link_path(dir)) {
        Ok(raw) => Utf8PathBuf::from_path_buf(raw)
            .ok()
            .filter(|target| entry_target_is_safe(target))
            .map(|target| dir.join(target)),
        Err(_) => None,
    };

    let workspace = layout::workspace_dir(dir);
    let mut edges = Vec::new();
    if workspace.is_dir() {
        collect_edges(&workspace, &workspace, data_dir, &mut edges)?;
    }
    edges.sort_by(|a, b| a.mount.cmp(&b.mount));

    Ok(Some(ArtifactNode {
        kind: kind.to_owned(),
        fingerprint: fingerprint.to_owned(),
        descriptor,
        entry,
        edges,
    }))
}

/// Walk a workspace looking for symlinks that resolve (lexically) to an
/// entry link inside the store.
fn collect_edges(
    dir: &Utf8Path,
    workspace: &Utf8Path,
    data_dir: &Utf8Path,
    edges: &mut Vec<MountEdge>,
) -> Result<(), GraphError> {
    let entries = std::fs::read_dir(dir).map_err(|source| GraphError::Io {
        op: "read workspace directory",
        path: dir.to_owned(),
        source,
    })?;
    for entry in entries {
        let entry = entry.map_err(|source| GraphError::Io {
            op: "read workspace directory",
            path: dir.to_owned(),
            source,
        })?;
        let Ok(path) = Utf8PathBuf::from_path_buf(entry.path()) else {
            warn!(dir = %dir, "skipping non-UTF-8 workspace entry");
            continue;
        };
        let Ok(file_type) = entry.file_type() else {
            continue;
        };

        if file_type.is_symlink() {
            let Ok(raw_target) = std::fs::read_link(&path) else {
                continue;
            };
            let Ok(target) = Utf8PathBuf::from_path_buf(raw_target) else {
                continue;
            };
            let resolved = if target.is_absolute() {
                normalize(&target)
            } else {
                let parent = path.parent().unwrap_or(dir);
                normalize(&parent.join(target))
            };
            if let Some((kind, fingerprint)) = match_entry_link(data_dir, &resolved) {
                let mount = path
                    .strip_prefix(workspace)
                    .unwrap_or(&path)
                    .to_owned();
                edges.push(MountEdge {
                    mount,
                    kind,
                    fingerprint,
                });
            }
        } else if file_type.is_dir() {
            collect_edges(&path, workspace, data_dir, edges)?;
        }
    }
    Ok(())
}

/// Whether `resolved` names an entry link inside the store data
/// directory: `<data>/<kind>/<shard>/<fingerprint>/<entry-link-name>`
/// with a matching shard.
fn match_entry_link(data_dir: &Utf8Path, resolved: &Utf8Path) -> Option<(String, String)> {
    let relative = resolved.strip_prefix(data_dir).ok()?;
    let components: Vec<&str> = relative
        .components()
        .map(|c| match c {
            Utf8Component::Normal(name) => Some(name),
            _ => None,
        })
        .collect::<Option<_>>()?;
    match components.as_slice() {
        [kind, shard, fingerprint, link]
            if *link == ENTRY_LINK
                && fingerprint.len() == 32
                && fingerprint.bytes().all(|b| b.is_ascii_hexdigit())
                && *shard == layout::shard(fingerprint) =>
        {
            Some((kind.to_string(), fingerprint.to_string()))
        }
        _ => None,
    }
}

/// Lexical normalization: resolves `.` and `..` components without
/// touching the filesystem, so broken links still classify.
fn normalize(path: &Utf8Path) -> Utf8PathBuf {
    let mut out = Utf8PathBuf::new();
    for component in path.components() {
        match component {
            Utf8Component::ParentDir => {
                out.pop();
            }
            Utf8Component::CurDir => {}
            other => out.push(other.as_str()),
        }
    }
    out
}

fn read_subdirs(dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>, GraphError> {
    let entries = std::fs::read_dir(dir).map_err(|source| GraphError::Io {
        op: "read store directory",
        path: dir.to_owned(),
        source,
    })?;
    let mut subdirs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| GraphError::Io {
            op: "read store directory",
            path: dir.to_owned(),
            source,
        })?;
        let Ok(path) = Utf8PathBuf::from_path_buf(entry.path()) else {
            warn!(dir = %dir, "skipping non-UTF-8 store entry");
            continue;
        };
        if path.is_dir() {
            subdirs.push(path);
        }
    }
    Ok(subdirs)
}
