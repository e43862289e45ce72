//! Executors and executor configs.
//!
//! An `Executor` is a registered capability: it produces an artifact
//! from an input inside a scratch workspace. An `ExecutorConfig` is a
//! request handle naming another artifact; dependency maps are
//! collections of such requests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::{EngineError, Result};
use ox_store::StoreError;

/// Mount path (relative to the workspace root) → dependency request.
pub type DependencyMap = BTreeMap<Utf8PathBuf, ExecutorConfig>;

/// What an executor run produced: the relative path of the artifact's
/// entry point inside the workspace, plus metadata recorded in the
/// descriptor.
///
/// Metadata does not participate in the cache key. When a concurrent
/// publish race is lost, the loser's metadata is discarded with its
/// scratch directory; the first publish wins.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub entry: Utf8PathBuf,
    pub metadata: Map<String, Value>,
}

impl ExecOutput {
    pub fn new(entry: impl Into<Utf8PathBuf>) -> Self {
        Self {
            entry: entry.into(),
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A registered capability.
///
/// `dependencies` is consulted on every invocation, cache hit or miss:
/// a fixed dependency mapping is simply a constant function of the
/// input, and a dynamic mapping is a genuine one. The engine guarantees
/// every declared mount is durable on disk before `run` begins.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Declared dependency mounts for this input.
    fn dependencies(&self, input: &Value) -> eyre::Result<DependencyMap> {
        let _ = input;
        Ok(DependencyMap::new())
    }

    /// Produce the artifact. Must write all outputs under `workspace`
    /// and return the relative path of the entry point.
    async fn run(&self, input: &Value, workspace: &Utf8Path) -> eyre::Result<ExecOutput>;
}

/// A request handle naming another artifact: the unit stored in
/// dependency maps and accepted by [`crate::Engine::execute`].
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub kind: String,
    pub input: Value,
    pub force_recompute: bool,
}

impl ExecutorConfig {
    /// Build a request. Fails if `input` cannot be represented as
    /// canonicalizable JSON.
    pub fn new(kind: impl Into<String>, input: &(impl Serialize + ?Sized)) -> Result<Self> {
        let kind = kind.into();
        let input = serde_json::to_value(input).map_err(|source| {
            EngineError::Store(StoreError::Unserializable {
                kind: kind.clone(),
                source,
            })
        })?;
        Ok(Self {
            kind,
            input,
            force_recompute: false,
        })
    }

    pub fn from_value(kind: impl Into<String>, input: Value) -> Self {
        Self {
            kind: kind.into(),
            input,
            force_recompute: false,
        }
    }

    /// Request a rebuild even if the artifact is already published.
    pub fn force(mut self) -> Self {
        self.force_recompute = true;
        self
    }

    pub(crate) fn fingerprint(&self) -> String {
        ox_store::fingerprint(&self.kind, &self.input)
    }
}
