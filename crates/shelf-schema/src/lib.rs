//! Shared types and wire formats for shelf.
//!
//! Everything here is plain data: the engine in `shelf-core` and the
//! `shelf` binary both depend on these definitions, and nothing in this
//! crate touches the network or the registry.

pub mod manifest;
pub mod types;
pub mod version;

// Re-exports
pub use manifest::{BUILD_DESCRIPTOR, BuildManifest, BuildSection, ManifestError, PackageMeta};
pub use types::*;
pub use version::{Version, VersionError};
