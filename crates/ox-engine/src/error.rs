//! Error types for engine operations.

use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors that can occur while executing or probing artifacts.
///
/// Every variant carries enough context (kind, fingerprint, mount) for
/// the caller to choose retry, abort, or forget. Lost publish races are
/// recovered internally and never surface.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no executor registered for kind {kind:?}")]
    UnknownExecutor { kind: String },

    #[error(transparent)]
    Store(#[from] ox_store::StoreError),

    #[error("executor function for {kind}:{fingerprint} failed: {report}")]
    UserFn {
        kind: String,
        fingerprint: String,
        report: eyre::Report,
    },

    #[error("dependency declaration for kind {kind:?} failed: {report}")]
    DependencySpec { kind: String, report: eyre::Report },

    #[error("dependency {mount} ({dep_kind}) of {kind}:{fingerprint} failed")]
    Dependency {
        kind: String,
        fingerprint: String,
        mount: Utf8PathBuf,
        dep_kind: String,
        #[source]
        source: Box<EngineError>,
    },

    #[error("dependency cycle detected at {kind}:{fingerprint} (chain: {chain})")]
    DependencyCycle {
        kind: String,
        fingerprint: String,
        chain: String,
    },

    #[error("publish of {kind}:{fingerprint} failed: {source}")]
    PublishFailed {
        kind: String,
        fingerprint: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
