//! ox-engine: content-addressed execution/cache engine
//!
//! Treats each computation as a pure function of its declared input.
//! `execute` fingerprints `(kind, input)`, probes the store, and either
//! returns the previously published artifact or runs the registered
//! executor inside an isolated scratch workspace and atomically renames
//! the result into place. Declared dependencies are materialized
//! recursively and mounted into the workspace before the executor runs;
//! stale or pruned dependency mounts are silently repaired on cache
//! hits.
//!
//! Concurrent executions of the same `(kind, input)` are safe within a
//! process and across processes sharing a filesystem: mutual exclusion
//! derives entirely from the atomicity of directory rename, and exactly
//! one publisher wins per fingerprint.

mod config;
mod engine;
mod error;
mod executor;

pub use config::EngineConfig;
pub use engine::{Engine, EngineInner};
pub use error::{EngineError, Result};
pub use executor::{DependencyMap, ExecOutput, Executor, ExecutorConfig};

pub use ox_store::{Descriptor, StoreError, StoreLayout, canonical_json, fingerprint};
