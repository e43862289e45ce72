//! ox-store: on-disk content-addressed artifact store
//!
//! An artifact is a directory addressed by the fingerprint of the
//! `(kind, input)` pair that produced it. Each artifact directory holds
//! exactly three reserved members: a JSON descriptor (whose presence is
//! the existence predicate), an entry link (a relative symlink naming the
//! artifact's entry point), and a workspace directory with the produced
//! files and dependency mounts.
//!
//! This crate owns the pure and filesystem-level pieces of the store:
//! fingerprint computation, path layout, descriptor and entry-link I/O,
//! and dependency mount links. The execute-or-cache-hit state machine
//! lives in `ox-engine`.

pub mod fingerprint;
pub mod layout;
pub mod linker;
pub mod manifest;

mod error;

pub use error::{Result, StoreError};
pub use fingerprint::{canonical_json, fingerprint};
pub use layout::StoreLayout;
pub use manifest::{Descriptor, MANIFEST_VERSION};
