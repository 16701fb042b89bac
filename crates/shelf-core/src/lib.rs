//! shelf-core - the package engine behind `shelf`.
//!
//! # Pipeline
//!
//! ```text
//! specifier ─► spec::PackageSpec::parse
//!           ─► source::SourceProvider::{list_versions, resolve}
//!           ─► matcher::select            (index sources only)
//!           ─► fetch::Fetcher::fetch
//!           ─► builder::Builder::build     (runs the build descriptor in a Sandbox)
//!           ─► registry::Registry::commit
//! ```
//!
//! Uninstall walks the other way: `Registry::lookup`, remove the recorded
//! files deepest first, `Registry::remove`.
//!
//! The [`Engine`] ties these together and is the only type the CLI needs.

pub mod builder;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod io;
pub mod matcher;
pub mod paths;
pub mod registry;
pub mod repo;
pub mod reporter;
pub mod sandbox;
pub mod settings;
pub mod source;
pub mod spec;

pub use engine::{Components, Engine, InstallResult, InstalledPackage, UpdateOutcome};
pub use error::{EngineError, Result};
pub use reporter::{NullReporter, Reporter};
pub use settings::Settings;
pub use source::SearchHit;
pub use spec::{PackageSpec, SpecKind};

/// User Agent string for outgoing HTTP requests
pub const USER_AGENT: &str = concat!("shelf/", env!("CARGO_PKG_VERSION"));
