//! Engine error taxonomy.
//!
//! Every public engine operation returns exactly one [`EngineError`] on
//! failure. Stage-local errors (`SpecError`, `TransportError`,
//! `RegistryError`, ...) are folded into it at the stage boundary.

use thiserror::Error;

use crate::registry::{ConflictError, RegistryError};
use crate::spec::SpecError;

pub type Result<T, E = EngineError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("malformed package specifier: {0}")]
    MalformedSpec(#[from] SpecError),

    #[error("package not found: {0}")]
    PackageNotFound(String),

    #[error("version {version} of {name} not found")]
    VersionNotFound { name: String, version: String },

    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("no build descriptor found in {package}")]
    NoBuildDescriptor { package: String },

    /// The build routine failed. `output` is the captured diagnostic text,
    /// verbatim. `cleanup_warnings` lists partial outputs that could not be
    /// removed afterwards; they never replace the original failure.
    #[error("build of {package} failed:\n{output}")]
    BuildFailed {
        package: String,
        output: String,
        cleanup_warnings: Vec<String>,
    },

    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error("package not installed: {0}")]
    NotFound(String),

    #[error("{stage} timed out")]
    Timeout { stage: &'static str },

    #[error("registry error: {0}")]
    Registry(RegistryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<RegistryError> for EngineError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Conflict(conflict) => Self::Conflict(conflict),
            RegistryError::NotFound(name) => Self::NotFound(name),
            other => Self::Registry(other),
        }
    }
}

impl EngineError {
    /// Short machine-friendly label, used for logging and exit reporting.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedSpec(_) => "malformed-spec",
            Self::PackageNotFound(_) => "package-not-found",
            Self::VersionNotFound { .. } => "version-not-found",
            Self::SourceUnavailable(_) => "source-unavailable",
            Self::Fetch(_) => "fetch",
            Self::NoBuildDescriptor { .. } => "no-build-descriptor",
            Self::BuildFailed { .. } => "build-failed",
            Self::Conflict(_) => "conflict",
            Self::NotFound(_) => "not-found",
            Self::Timeout { .. } => "timeout",
            Self::Registry(_) => "registry",
            Self::Io(_) => "io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_errors_are_unwrapped() {
        let err: EngineError = RegistryError::NotFound("rsa".into()).into();
        assert!(matches!(err, EngineError::NotFound(ref n) if n == "rsa"));

        let err: EngineError =
            RegistryError::Conflict(ConflictError::NameTaken("rsa".into())).into();
        assert_eq!(err.kind(), "conflict");

        let err: EngineError = RegistryError::ActorDied.into();
        assert_eq!(err.kind(), "registry");
    }

    #[test]
    fn test_build_failure_keeps_output_verbatim() {
        let err = EngineError::BuildFailed {
            package: "stpkg".into(),
            output: "line 1\nerror: boom".into(),
            cleanup_warnings: vec![],
        };
        assert!(err.to_string().ends_with("line 1\nerror: boom"));
    }
}
