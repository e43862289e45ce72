//! Test harness for engine integration tests.
//!
//! Provides isolated engines over temp-dir store roots plus a small zoo
//! of executors with side-effect counters.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use ox_engine::{DependencyMap, Engine, EngineConfig, ExecOutput, Executor, ExecutorConfig};
use serde_json::Value;
use tempfile::TempDir;

/// An isolated engine over a temporary store root.
pub struct TestEnv {
    pub engine: Engine,
    root: Utf8PathBuf,
    _guard: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_config(|config| config)
    }

    pub fn with_config(configure: impl FnOnce(EngineConfig) -> EngineConfig) -> Self {
        let guard = TempDir::new().expect("failed to create store root");
        let root = Utf8PathBuf::from_path_buf(guard.path().to_path_buf())
            .expect("temp dir is not UTF-8");
        let engine = Engine::new(configure(EngineConfig::new(root.clone())));
        Self {
            engine,
            root,
            _guard: guard,
        }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// All `.tmp-*` scratch directories currently under the store.
    pub fn scratch_dirs(&self) -> Vec<Utf8PathBuf> {
        let mut found = Vec::new();
        collect_scratch(self.root.as_std_path(), &mut found);
        found
    }
}

fn collect_scratch(dir: &std::path::Path, found: &mut Vec<Utf8PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() || path.is_symlink() {
            continue;
        }
        let name = entry.file_name();
        if name.to_string_lossy().starts_with(".tmp-") {
            found.push(Utf8PathBuf::from_path_buf(path).expect("utf-8 path"));
        } else {
            collect_scratch(&path, found);
        }
    }
}

/// Shorthand for an executor request.
pub fn cfg(kind: &str, input: Value) -> ExecutorConfig {
    ExecutorConfig::from_value(kind, input)
}

/// Shorthand for one dependency-map entry.
pub fn mount(path: &str, config: ExecutorConfig) -> (Utf8PathBuf, ExecutorConfig) {
    (Utf8PathBuf::from(path), config)
}

/// Writes `out.txt` containing the input's `text` field.
pub struct Echo;

#[async_trait]
impl Executor for Echo {
    async fn run(&self, input: &Value, workspace: &Utf8Path) -> eyre::Result<ExecOutput> {
        let text = input.get("text").and_then(Value::as_str).unwrap_or_default();
        tokio::fs::write(workspace.join("out.txt"), text).await?;
        Ok(ExecOutput::new("out.txt"))
    }
}

/// Writes a fixed payload to `out.txt` and counts how many times it
/// actually ran. Optionally sleeps first, to widen race windows.
pub struct Counting {
    payload: String,
    delay: Option<Duration>,
    runs: Arc<AtomicUsize>,
}

impl Counting {
    pub fn new(payload: &str) -> (Arc<Self>, Arc<AtomicUsize>) {
        Self::build(payload, None)
    }

    pub fn slow(payload: &str, delay: Duration) -> (Arc<Self>, Arc<AtomicUsize>) {
        Self::build(payload, Some(delay))
    }

    fn build(payload: &str, delay: Option<Duration>) -> (Arc<Self>, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        (
            Arc::new(Self {
                payload: payload.to_string(),
                delay,
                runs: runs.clone(),
            }),
            runs,
        )
    }
}

#[async_trait]
impl Executor for Counting {
    async fn run(&self, _input: &Value, workspace: &Utf8Path) -> eyre::Result<ExecOutput> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        tokio::fs::write(workspace.join("out.txt"), &self.payload).await?;
        Ok(ExecOutput::new("out.txt"))
    }
}

/// Writes `out.txt` containing the input's `v` field; counts runs.
/// Distinct inputs produce distinct artifacts from one registration.
pub struct Source {
    runs: Arc<AtomicUsize>,
}

impl Source {
    pub fn new() -> (Arc<Self>, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        (Arc::new(Self { runs: runs.clone() }), runs)
    }
}

#[async_trait]
impl Executor for Source {
    async fn run(&self, input: &Value, workspace: &Utf8Path) -> eyre::Result<ExecOutput> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let v = input.get("v").and_then(Value::as_str).unwrap_or_default();
        tokio::fs::write(workspace.join("out.txt"), v).await?;
        Ok(ExecOutput::new("out.txt"))
    }
}

/// Declares a fixed dependency map and concatenates the mounted files
/// into `combined.txt`; counts runs. Reading through every mount proves
/// each dependency is durable before the function is entered.
pub struct Sink {
    deps: DependencyMap,
    runs: Arc<AtomicUsize>,
}

impl Sink {
    pub fn new(deps: DependencyMap) -> (Arc<Self>, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        (
            Arc::new(Self {
                deps,
                runs: runs.clone(),
            }),
            runs,
        )
    }
}

#[async_trait]
impl Executor for Sink {
    fn dependencies(&self, _input: &Value) -> eyre::Result<DependencyMap> {
        Ok(self.deps.clone())
    }

    async fn run(&self, _input: &Value, workspace: &Utf8Path) -> eyre::Result<ExecOutput> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let mut combined = String::new();
        for mount in self.deps.keys() {
            combined.push_str(&tokio::fs::read_to_string(workspace.join(mount)).await?);
        }
        tokio::fs::write(workspace.join("combined.txt"), combined).await?;
        Ok(ExecOutput::new("combined.txt"))
    }
}

/// Leaves some litter in the workspace, then fails.
pub struct Failing;

#[async_trait]
impl Executor for Failing {
    async fn run(&self, _input: &Value, workspace: &Utf8Path) -> eyre::Result<ExecOutput> {
        tokio::fs::write(workspace.join("partial.txt"), "half-done").await?;
        Err(eyre::eyre!("executor blew up"))
    }
}

/// Returns an entry that tries to escape the workspace.
pub struct Escaping;

#[async_trait]
impl Executor for Escaping {
    async fn run(&self, _input: &Value, workspace: &Utf8Path) -> eyre::Result<ExecOutput> {
        tokio::fs::write(workspace.join("out.txt"), "payload").await?;
        Ok(ExecOutput::new("../evil"))
    }
}

/// Dynamic dependencies that reference the executor's own kind and
/// input: the smallest possible cycle.
pub struct SelfReferential {
    pub kind: &'static str,
}

#[async_trait]
impl Executor for SelfReferential {
    fn dependencies(&self, input: &Value) -> eyre::Result<DependencyMap> {
        Ok(DependencyMap::from([(
            Utf8PathBuf::from("self"),
            ExecutorConfig::from_value(self.kind, input.clone()),
        )]))
    }

    async fn run(&self, _input: &Value, workspace: &Utf8Path) -> eyre::Result<ExecOutput> {
        tokio::fs::write(workspace.join("out.txt"), "unreachable").await?;
        Ok(ExecOutput::new("out.txt"))
    }
}
