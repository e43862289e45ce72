//! The executor registry and execute/cache-hit state machine.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use camino::{Utf8Path, Utf8PathBuf};
use futures_util::future::{BoxFuture, try_join_all};
use serde_json::Value;
use tracing::{debug, info, warn};

use ox_store::layout;
use ox_store::linker::{self, MountState};
use ox_store::manifest::{self, Descriptor};
use ox_store::{StoreError, StoreLayout};

use crate::executor::{DependencyMap, Executor, ExecutorConfig};
use crate::{EngineConfig, EngineError, Result};

/// The execution/cache engine.
///
/// Cheap to clone; all state lives behind an `Arc`. The engine holds no
/// per-artifact state between calls other than the registry itself.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl std::ops::Deref for Engine {
    type Target = EngineInner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// Inner engine state.
pub struct EngineInner {
    layout: StoreLayout,
    config: EngineConfig,
    registry: RwLock<HashMap<String, Arc<dyn Executor>>>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                layout: StoreLayout::new(config.root.clone()),
                config,
                registry: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Path layout over this engine's store root.
    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    /// Register (or replace) the executor for `kind`.
    pub fn register(&self, kind: &str, executor: Arc<dyn Executor>) -> Result<()> {
        layout::validate_kind(kind)?;
        let replaced = self
            .registry
            .write()
            .unwrap()
            .insert(kind.to_string(), executor)
            .is_some();
        if replaced {
            debug!(kind, "replaced registered executor");
        }
        Ok(())
    }

    /// Execute a request, returning the artifact's entry-link path.
    ///
    /// Identical `(kind, input)` pairs share one artifact. On a cache
    /// hit the registered function is not re-run, but declared
    /// dependency mounts are validated and silently repaired first. The
    /// entry link is verified before returning.
    #[tracing::instrument(skip_all, fields(kind = %config.kind))]
    pub async fn execute(&self, config: &ExecutorConfig) -> Result<Utf8PathBuf> {
        let dir = self.execute_inner(config, &[]).await?;
        manifest::resolve_entry_link(&dir).await?;
        Ok(layout::entry_link_path(&dir))
    }

    /// Probe the cache without executing. Returns the entry-link path if
    /// the artifact is published. Never runs an executor and never
    /// repairs dependencies.
    pub async fn peek(&self, kind: &str, input: &Value) -> Result<Option<Utf8PathBuf>> {
        layout::validate_kind(kind)?;
        let dir = self
            .layout
            .artifact_dir(kind, &ox_store::fingerprint(kind, input));
        if manifest::artifact_exists(&dir).await {
            Ok(Some(layout::entry_link_path(&dir)))
        } else {
            Ok(None)
        }
    }

    /// Remove the artifact for `(kind, input)`. Idempotent; succeeds
    /// when the artifact is already absent.
    pub async fn forget(&self, kind: &str, input: &Value) -> Result<()> {
        layout::validate_kind(kind)?;
        let fingerprint = ox_store::fingerprint(kind, input);
        let dir = self.layout.artifact_dir(kind, &fingerprint);
        remove_artifact_dir(&dir).await?;
        debug!(kind, fingerprint = %fingerprint, "forgot artifact");
        Ok(())
    }

    /// The miss-or-hit state machine. Returns the artifact directory.
    ///
    /// `chain` carries the `(kind, fingerprint)` pairs of the ancestors
    /// currently being executed, so dependency cycles fail fast instead
    /// of recursing unboundedly.
    fn execute_inner<'a>(
        &'a self,
        config: &'a ExecutorConfig,
        chain: &'a [(String, String)],
    ) -> BoxFuture<'a, Result<Utf8PathBuf>> {
        Box::pin(async move {
            let kind = &config.kind;
            layout::validate_kind(kind)?;
            let executor = self
                .registry
                .read()
                .unwrap()
                .get(kind)
                .cloned()
                .ok_or_else(|| EngineError::UnknownExecutor { kind: kind.clone() })?;

            // Dependency maps may be a function of the input; evaluate
            // once per invocation, before anything touches the store.
            let deps = executor
                .dependencies(&config.input)
                .map_err(|report| EngineError::DependencySpec {
                    kind: kind.clone(),
                    report,
                })?;
            for (mount, dep) in &deps {
                layout::validate_relative_path(mount)?;
                layout::validate_kind(&dep.kind)?;
            }

            let fingerprint = config.fingerprint();
            if chain.iter().any(|(_, ancestor)| ancestor == &fingerprint) {
                let chain_text = chain
                    .iter()
                    .map(|(k, f)| format!("{k}:{f}"))
                    .chain([format!("{kind}:{fingerprint}")])
                    .collect::<Vec<_>>()
                    .join(" -> ");
                return Err(EngineError::DependencyCycle {
                    kind: kind.clone(),
                    fingerprint,
                    chain: chain_text,
                });
            }

            let dir = self.layout.artifact_dir(kind, &fingerprint);
            let mut carried_created_at = None;

            if manifest::artifact_exists(&dir).await {
                if config.force_recompute {
                    // The creation stamp is immutable across republish.
                    carried_created_at = manifest::read_descriptor(&dir)
                        .await
                        .ok()
                        .map(|d| d.created_at);
                    debug!(kind = %kind, fingerprint = %fingerprint, "force recompute, removing published artifact");
                    remove_artifact_dir(&dir).await?;
                } else {
                    // Corrupt descriptors surface; the caller decides
                    // whether to forget and retry.
                    manifest::read_descriptor(&dir).await?;
                    match manifest::resolve_entry_link(&dir).await {
                        Ok(_) => {
                            self.recover_dependencies(&dir, &deps, kind, &fingerprint, chain)
                                .await?;
                            debug!(kind = %kind, fingerprint = %fingerprint, "cache hit");
                            return Ok(dir);
                        }
                        Err(e) => {
                            // Descriptor present but the entry link is
                            // broken or escapes the workspace: treat as
                            // corruption and rebuild.
                            warn!(
                                kind = %kind,
                                fingerprint = %fingerprint,
                                error = %e,
                                "published artifact has an unusable entry link, rebuilding"
                            );
                            remove_artifact_dir(&dir).await?;
                        }
                    }
                }
            }

            self.build_and_publish(
                executor.as_ref(),
                config,
                &deps,
                &fingerprint,
                &dir,
                carried_created_at,
                chain,
            )
            .await
        })
    }

    /// Cache-hit dependency recovery: re-materialize and re-link any
    /// declared mount whose on-disk symlink differs from the expected
    /// target (config drift) or whose target no longer stats (pruned
    /// dependency). The artifact's own function is never re-run.
    async fn recover_dependencies(
        &self,
        dir: &Utf8Path,
        deps: &DependencyMap,
        kind: &str,
        fingerprint: &str,
        chain: &[(String, String)],
    ) -> Result<()> {
        if deps.is_empty() {
            return Ok(());
        }
        let workspace = layout::workspace_dir(dir);
        for (mount, dep) in deps {
            let dep_dir = self.layout.artifact_dir(&dep.kind, &dep.fingerprint());
            let expected = linker::expected_link_target(&workspace, mount, &dep_dir)?;
            let state = linker::validate_mount(&workspace, mount, &expected).await;
            if state == MountState::Valid {
                continue;
            }
            info!(
                kind,
                fingerprint,
                mount = %mount,
                dep_kind = %dep.kind,
                state = ?state,
                "recovering dependency mount"
            );
            self.execute_dependency(mount, dep, kind, fingerprint, chain)
                .await?;
            linker::unlink_mount(&workspace, mount).await?;
            linker::link_dependency(&workspace, mount, &dep_dir).await?;
        }
        Ok(())
    }

    /// Recursively execute one dependency, wrapping failures with the
    /// parent's context.
    async fn execute_dependency(
        &self,
        mount: &Utf8Path,
        dep: &ExecutorConfig,
        parent_kind: &str,
        parent_fingerprint: &str,
        chain: &[(String, String)],
    ) -> Result<Utf8PathBuf> {
        let mut child_chain = chain.to_vec();
        child_chain.push((parent_kind.to_string(), parent_fingerprint.to_string()));
        self.execute_inner(dep, &child_chain)
            .await
            .map_err(|e| match e {
                cycle @ EngineError::DependencyCycle { .. } => cycle,
                e => EngineError::Dependency {
                    kind: parent_kind.to_string(),
                    fingerprint: parent_fingerprint.to_string(),
                    mount: mount.to_owned(),
                    dep_kind: dep.kind.clone(),
                    source: Box::new(e),
                },
            })
    }

    /// The miss path: stage a scratch directory, mount dependencies, run
    /// the executor, then atomically rename into place.
    #[allow(clippy::too_many_arguments)]
    async fn build_and_publish(
        &self,
        executor: &dyn Executor,
        config: &ExecutorConfig,
        deps: &DependencyMap,
        fingerprint: &str,
        dir: &Utf8Path,
        carried_created_at: Option<jiff::Timestamp>,
        chain: &[(String, String)],
    ) -> Result<Utf8PathBuf> {
        let kind = &config.kind;
        let scratch = self.layout.scratch_dir(kind, fingerprint);
        let workspace = layout::workspace_dir(&scratch);
        tokio::fs::create_dir_all(&workspace)
            .await
            .map_err(|e| StoreError::io("create scratch workspace", &workspace, e))?;
        let guard = ScratchGuard::new(scratch.clone(), self.config.keep_scratch);

        // Resolve all dependencies in parallel. Every declared mount is
        // durable on disk before the executor function runs.
        let dep_dirs = try_join_all(deps.iter().map(|(mount, dep)| async move {
            let dep_dir = self
                .execute_dependency(mount, dep, kind, fingerprint, chain)
                .await?;
            Ok::<_, EngineError>((mount, dep_dir))
        }))
        .await?;
        for (mount, dep_dir) in &dep_dirs {
            linker::link_dependency(&workspace, mount, dep_dir).await?;
        }

        let output = executor
            .run(&config.input, &workspace)
            .await
            .map_err(|report| EngineError::UserFn {
                kind: kind.clone(),
                fingerprint: fingerprint.to_string(),
                report,
            })?;
        layout::validate_relative_path(&output.entry)?;

        // The descriptor is written after all workspace content and
        // before the entry link; a reader that observes the artifact
        // through a successful rename finds a complete one.
        let descriptor = Descriptor::new(
            kind,
            config.input.clone(),
            output.metadata,
            carried_created_at,
        );
        manifest::write_descriptor(&scratch, &descriptor).await?;
        manifest::create_entry_link(&scratch, &output.entry).await?;

        // Atomic publish: exactly one rename wins per fingerprint.
        match tokio::fs::rename(&scratch, dir).await {
            Ok(()) => {
                guard.defuse();
                info!(kind = %kind, fingerprint, "published artifact");
                Ok(dir.to_owned())
            }
            Err(e) => {
                if manifest::artifact_exists(dir).await {
                    // Another writer won; its artifact is canonical. The
                    // loser's scratch is always removed, whatever the
                    // failure-cleanup policy says.
                    debug!(kind = %kind, fingerprint, "lost publish race, reusing existing artifact");
                    guard.defuse();
                    if let Err(rm) = tokio::fs::remove_dir_all(&scratch).await {
                        warn!(scratch = %scratch, error = %rm, "failed to remove loser scratch");
                    }
                    Ok(dir.to_owned())
                } else {
                    Err(EngineError::PublishFailed {
                        kind: kind.clone(),
                        fingerprint: fingerprint.to_string(),
                        source: e,
                    })
                }
            }
        }
    }
}

async fn remove_artifact_dir(dir: &Utf8Path) -> Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::io("remove artifact", dir, e).into()),
    }
}

/// Removes the scratch directory unless defused (published) or the
/// engine is configured to keep failed scratches. Runs on every exit
/// path, including cancellation between suspension points.
struct ScratchGuard {
    dir: Utf8PathBuf,
    keep: bool,
    defused: bool,
}

impl ScratchGuard {
    fn new(dir: Utf8PathBuf, keep: bool) -> Self {
        Self {
            dir,
            keep,
            defused: false,
        }
    }

    fn defuse(mut self) {
        self.defused = true;
    }
}

impl Drop for ScratchGuard {
    fn drop(&mut self) {
        if self.defused {
            return;
        }
        if self.keep {
            warn!(scratch = %self.dir, "keeping failed scratch directory for inspection");
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(scratch = %self.dir, error = %e, "failed to clean up scratch directory");
            }
        }
    }
}
