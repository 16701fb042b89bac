//! Package specifier parsing.
//!
//! Classifies raw user input into one of three shapes, checked in order:
//!
//! 1. A path (contains a separator, or is an existing archive file) → Local
//! 2. `owner/repo`, optionally `owner/repo@ref` → Remote
//! 3. `name` or `name==version` → Indexed

use std::path::Path;

use shelf_schema::{NameError, PackageName, Version, VersionError};
use thiserror::Error;

use crate::repo::RepoSlug;

/// Extensions treated as local archives even without a path separator.
const ARCHIVE_SUFFIXES: &[&str] = &[".zip", ".tar.gz", ".tgz", ".tar.zst", ".tar"];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpecError {
    #[error("empty package specifier")]
    Empty,

    #[error("'{0}' has more than one '==' version constraint")]
    MultipleConstraints(String),

    #[error("'{0}' is missing a name or version around '=='")]
    EmptyComponent(String),

    #[error(transparent)]
    Name(#[from] NameError),

    #[error(transparent)]
    Version(#[from] VersionError),

    #[error("{0}")]
    Repo(String),
}

/// Which source provider a specifier is dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecKind {
    /// `name` or `name==version`, resolved against the package index.
    Indexed,
    /// Path to an archive or directory on disk.
    Local,
    /// `owner/repo[@ref]` snapshot of a remote repository.
    Remote,
}

/// A parsed package specifier. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSpec {
    kind: SpecKind,
    name: Option<PackageName>,
    version_constraint: Option<Version>,
    path_or_ref: String,
    git_ref: Option<String>,
}

impl PackageSpec {
    /// Parse a raw specifier string.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError`] if the input is empty, carries more than one
    /// `==`, has an empty name or version, or names an invalid package or
    /// repository.
    pub fn parse(raw: &str) -> Result<Self, SpecError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(SpecError::Empty);
        }

        let has_separator = raw.contains('/') || raw.contains(std::path::MAIN_SEPARATOR);
        let path = Path::new(raw);
        if (has_separator && path.exists()) || (path.is_file() && is_archive_name(raw)) {
            return Ok(Self {
                kind: SpecKind::Local,
                name: None,
                version_constraint: None,
                path_or_ref: raw.to_string(),
                git_ref: None,
            });
        }

        if has_separator && !raw.contains("==") {
            return Self::parse_remote(raw);
        }

        Self::parse_indexed(raw)
    }

    fn parse_remote(raw: &str) -> Result<Self, SpecError> {
        let (slug, git_ref) = match raw.split_once('@') {
            Some((_, "")) => return Err(SpecError::EmptyComponent(raw.to_string())),
            Some((slug, reference)) => (slug, Some(reference.to_string())),
            None => (raw, None),
        };
        let repo = RepoSlug::new(slug).map_err(SpecError::Repo)?;
        Ok(Self {
            kind: SpecKind::Remote,
            name: Some(PackageName::new(repo.name())),
            version_constraint: None,
            path_or_ref: repo.to_string(),
            git_ref,
        })
    }

    fn parse_indexed(raw: &str) -> Result<Self, SpecError> {
        let (name, version) = match raw.matches("==").count() {
            0 => (raw, None),
            1 => {
                let (name, version) = raw
                    .split_once("==")
                    .ok_or_else(|| SpecError::EmptyComponent(raw.to_string()))?;
                let (name, version) = (name.trim(), version.trim());
                if name.is_empty() || version.is_empty() {
                    return Err(SpecError::EmptyComponent(raw.to_string()));
                }
                (name, Some(Version::parse(version)?))
            }
            _ => return Err(SpecError::MultipleConstraints(raw.to_string())),
        };

        Ok(Self {
            kind: SpecKind::Indexed,
            name: Some(PackageName::parse(name)?),
            version_constraint: version,
            path_or_ref: raw.to_string(),
            git_ref: None,
        })
    }

    pub fn kind(&self) -> SpecKind {
        self.kind
    }

    /// Package name, known up front for Indexed and Remote specs.
    pub fn name(&self) -> Option<&PackageName> {
        self.name.as_ref()
    }

    pub fn version_constraint(&self) -> Option<&Version> {
        self.version_constraint.as_ref()
    }

    /// The original path (Local), `owner/repo` (Remote) or raw input (Indexed).
    pub fn path_or_ref(&self) -> &str {
        &self.path_or_ref
    }

    /// Explicit git ref for Remote specs (`owner/repo@ref`).
    pub fn git_ref(&self) -> Option<&str> {
        self.git_ref.as_deref()
    }

    /// Check if this specifier requests a specific version
    pub fn is_pinned(&self) -> bool {
        self.version_constraint.is_some()
    }
}

impl std::fmt::Display for PackageSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.name, &self.version_constraint, self.kind) {
            (Some(name), Some(version), SpecKind::Indexed) => write!(f, "{name}=={version}"),
            (Some(name), None, SpecKind::Indexed) => write!(f, "{name}"),
            _ => f.write_str(&self.path_or_ref),
        }
    }
}

fn is_archive_name(raw: &str) -> bool {
    let lower = raw.to_ascii_lowercase();
    ARCHIVE_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_simple() {
        let spec = PackageSpec::parse("pytest").unwrap();
        assert_eq!(spec.kind(), SpecKind::Indexed);
        assert_eq!(spec.name().unwrap().as_str(), "pytest");
        assert!(!spec.is_pinned());
    }

    #[test]
    fn test_parse_versioned() {
        let spec = PackageSpec::parse("rsa==3.4.2").unwrap();
        assert_eq!(spec.kind(), SpecKind::Indexed);
        assert_eq!(spec.name().unwrap().as_str(), "rsa");
        assert_eq!(spec.version_constraint().unwrap().as_str(), "3.4.2");
        assert_eq!(spec.to_string(), "rsa==3.4.2");
    }

    #[test]
    fn test_parse_invalid() {
        assert_eq!(PackageSpec::parse(""), Err(SpecError::Empty));
        assert_eq!(PackageSpec::parse("   "), Err(SpecError::Empty));
        assert!(matches!(
            PackageSpec::parse("rsa==1==2"),
            Err(SpecError::MultipleConstraints(_))
        ));
        assert!(matches!(
            PackageSpec::parse("==1.0"),
            Err(SpecError::EmptyComponent(_))
        ));
        assert!(matches!(
            PackageSpec::parse("rsa=="),
            Err(SpecError::EmptyComponent(_))
        ));
        assert!(matches!(PackageSpec::parse("bad name"), Err(SpecError::Name(_))));
        assert!(matches!(
            PackageSpec::parse("a/b==1.0"),
            Err(SpecError::Name(_))
        ));
    }

    #[test]
    fn test_parse_remote() {
        let spec = PackageSpec::parse("bennr01/benterfaces").unwrap();
        assert_eq!(spec.kind(), SpecKind::Remote);
        assert_eq!(spec.name().unwrap().as_str(), "benterfaces");
        assert_eq!(spec.path_or_ref(), "bennr01/benterfaces");
        assert_eq!(spec.git_ref(), None);

        let pinned = PackageSpec::parse("bennr01/benterfaces@dev").unwrap();
        assert_eq!(pinned.git_ref(), Some("dev"));

        assert!(matches!(PackageSpec::parse("a/b/c"), Err(SpecError::Repo(_))));
        assert!(matches!(
            PackageSpec::parse("a/b@"),
            Err(SpecError::EmptyComponent(_))
        ));
    }

    #[test]
    fn test_parse_local_paths() {
        let tmp = tempdir().unwrap();
        let dir = tmp.path().join("stpkg");
        std::fs::create_dir_all(&dir).unwrap();
        let spec = PackageSpec::parse(dir.to_str().unwrap()).unwrap();
        assert_eq!(spec.kind(), SpecKind::Local);
        assert_eq!(spec.name(), None);

        let archive = tmp.path().join("stpkg.zip");
        std::fs::write(&archive, b"PK").unwrap();
        let spec = PackageSpec::parse(archive.to_str().unwrap()).unwrap();
        assert_eq!(spec.kind(), SpecKind::Local);
    }

    #[test]
    fn test_missing_path_with_two_components_is_remote() {
        // Not on disk, so this is treated as a repository reference.
        let spec = PackageSpec::parse("owner/missing-archive").unwrap();
        assert_eq!(spec.kind(), SpecKind::Remote);
    }
}
