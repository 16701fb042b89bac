//! Reporter trait for dependency injection
//!
//! This trait allows the engine to report progress and status without
//! being coupled to a specific terminal or GUI implementation.

use shelf_schema::{PackageName, SourceKind, Version};

pub trait Reporter: Send + Sync {
    /// A specifier has been resolved to a concrete distribution.
    fn resolved(&self, name: &PackageName, version: &Version, source: SourceKind);

    /// Updates the progress of a download.
    fn downloading(&self, name: &PackageName, version: &Version, current: u64, total: Option<u64>);

    /// The build descriptor is about to run.
    fn building(&self, name: &PackageName, version: &Version);

    /// Marks a package as committed to the registry.
    fn installed(&self, name: &PackageName, version: &Version, files: usize);

    /// Updates the state of a package to 'removing'.
    fn removing(&self, name: &PackageName, version: &Version);

    /// Marks a package as removed from disk and registry.
    fn removed(&self, name: &PackageName, version: &Version);

    /// Log a warning message.
    fn warning(&self, msg: &str);
}

impl<T: Reporter + ?Sized> Reporter for std::sync::Arc<T> {
    fn resolved(&self, name: &PackageName, version: &Version, source: SourceKind) {
        (**self).resolved(name, version, source);
    }
    fn downloading(&self, name: &PackageName, version: &Version, current: u64, total: Option<u64>) {
        (**self).downloading(name, version, current, total);
    }
    fn building(&self, name: &PackageName, version: &Version) {
        (**self).building(name, version);
    }
    fn installed(&self, name: &PackageName, version: &Version, files: usize) {
        (**self).installed(name, version, files);
    }
    fn removing(&self, name: &PackageName, version: &Version) {
        (**self).removing(name, version);
    }
    fn removed(&self, name: &PackageName, version: &Version) {
        (**self).removed(name, version);
    }
    fn warning(&self, msg: &str) {
        (**self).warning(msg);
    }
}

/// A no-op reporter for silent operations (e.g., testing).
#[derive(Debug, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn resolved(&self, _: &PackageName, _: &Version, _: SourceKind) {}
    fn downloading(&self, _: &PackageName, _: &Version, _: u64, _: Option<u64>) {}
    fn building(&self, _: &PackageName, _: &Version) {}
    fn installed(&self, _: &PackageName, _: &Version, _: usize) {}
    fn removing(&self, _: &PackageName, _: &Version) {}
    fn removed(&self, _: &PackageName, _: &Version) {}
    fn warning(&self, _: &str) {}
}
