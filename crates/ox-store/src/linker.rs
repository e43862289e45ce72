//! Dependency mounts.
//!
//! A mount is a symlink inside a consumer's workspace that points through
//! a producer artifact's entry link, so dereferencing the mount resolves
//! transitively into the producer's workspace. Targets are relative,
//! computed from the mount's parent directory to the producer's entry
//! link; a store can be relocated wholesale without breaking mounts.

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};

use crate::layout;
use crate::manifest::symlink;
use crate::{Result, StoreError};

/// State of an on-disk mount, judged against its expected target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountState {
    /// Link present with the expected target; the target stats fine.
    Valid,
    /// Link present but its literal target string differs (config drift).
    Stale,
    /// Link present and equal, but the target cannot be stat'd: the
    /// dependency artifact was removed out-of-band.
    TargetMissing,
    /// No link at the mount path.
    Missing,
}

/// The canonical relative target a valid mount symlink must carry: the
/// path from the mount's parent directory to the target artifact's entry
/// link.
pub fn expected_link_target(
    workspace: &Utf8Path,
    mount: &Utf8Path,
    target_artifact_dir: &Utf8Path,
) -> Result<Utf8PathBuf> {
    layout::validate_relative_path(mount)?;
    let mount_parent = match mount.parent() {
        Some(parent) if !parent.as_str().is_empty() => workspace.join(parent),
        _ => workspace.to_owned(),
    };
    Ok(relative_from(
        &layout::entry_link_path(target_artifact_dir),
        &mount_parent,
    ))
}

/// Create the mount symlink (and its parent directories) inside the
/// workspace. The mount's existence is the contract; there is no return
/// value beyond success.
pub async fn link_dependency(
    workspace: &Utf8Path,
    mount: &Utf8Path,
    target_artifact_dir: &Utf8Path,
) -> Result<()> {
    let target = expected_link_target(workspace, mount, target_artifact_dir)?;
    let link = workspace.join(mount);
    if let Some(parent) = link.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StoreError::io("create mount parent", parent, e))?;
    }
    symlink(&target, &link).await
}

/// Compare the on-disk mount link against its expected target.
pub async fn validate_mount(
    workspace: &Utf8Path,
    mount: &Utf8Path,
    expected: &Utf8Path,
) -> MountState {
    let link = workspace.join(mount);
    let on_disk = match tokio::fs::read_link(&link).await {
        Ok(target) => target,
        Err(_) => return MountState::Missing,
    };
    if on_disk != expected.as_std_path() {
        return MountState::Stale;
    }
    // Stat through the link chain: proves the dependency's entry is
    // still reachable.
    match tokio::fs::metadata(&link).await {
        Ok(_) => MountState::Valid,
        Err(_) => MountState::TargetMissing,
    }
}

/// Remove a mount link, tolerating its absence.
pub async fn unlink_mount(workspace: &Utf8Path, mount: &Utf8Path) -> Result<()> {
    let link = workspace.join(mount);
    match tokio::fs::remove_file(&link).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::io("remove mount", &link, e)),
    }
}

/// Lexical relative path from `base` (a directory) to `target`. Both
/// must be absolute; no filesystem access, no symlink resolution.
fn relative_from(target: &Utf8Path, base: &Utf8Path) -> Utf8PathBuf {
    let target_components: Vec<Utf8Component> = target.components().collect();
    let base_components: Vec<Utf8Component> = base.components().collect();
    let common = target_components
        .iter()
        .zip(&base_components)
        .take_while(|(a, b)| a == b)
        .count();

    let mut relative = Utf8PathBuf::new();
    for _ in common..base_components.len() {
        relative.push("..");
    }
    for component in &target_components[common..] {
        relative.push(component.as_str());
    }
    relative
}
