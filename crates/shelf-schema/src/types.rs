use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::sync::LazyLock;

use regex::Regex;

static NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9](?:[A-Za-z0-9._-]*[A-Za-z0-9])?$").expect("static regex")
});

/// Errors produced when validating a [`PackageName`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum NameError {
    /// The name was empty.
    #[error("package name is empty")]
    Empty,

    /// The name contains characters outside `[A-Za-z0-9._-]` or starts/ends
    /// with punctuation.
    #[error("invalid package name '{0}'")]
    Invalid(String),
}

/// A normalized package name.
///
/// Names compare case-insensitively: the stored form is always lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageName(String);

impl PackageName {
    /// Create a new package name, normalizing the input to lowercase.
    ///
    /// No validation is performed; use [`PackageName::parse`] for user input.
    pub fn new(name: &str) -> Self {
        Self(name.to_lowercase())
    }

    /// Validate and normalize a user supplied package name.
    ///
    /// # Errors
    ///
    /// Returns [`NameError::Empty`] for an empty string and
    /// [`NameError::Invalid`] when the name is not `[A-Za-z0-9._-]+` with an
    /// alphanumeric first and last character.
    pub fn parse(name: &str) -> Result<Self, NameError> {
        if name.is_empty() {
            return Err(NameError::Empty);
        }
        if !NAME_PATTERN.is_match(name) {
            return Err(NameError::Invalid(name.to_string()));
        }
        Ok(Self::new(name))
    }

    /// Return the normalized name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PackageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Deref for PackageName {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for PackageName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for PackageName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other.to_lowercase()
    }
}

impl PartialEq<&str> for PackageName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == other.to_lowercase()
    }
}

impl Borrow<str> for PackageName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PackageName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Where a distribution came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// A searchable version index (PyPI-style).
    Index,
    /// An archive or directory on the local filesystem.
    Local,
    /// A snapshot of a remote repository (`owner/repo`).
    Remote,
}

impl SourceKind {
    /// Stable string form, used as the persisted representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Index => "index",
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "index" => Ok(Self::Index),
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            other => Err(format!("unknown source kind '{other}'")),
        }
    }
}

/// Archive or layout of a fetched artifact.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactFormat {
    /// Zip archive (`.zip`).
    Zip,
    /// Gzip-compressed tar archive (`.tar.gz` / `.tgz`).
    #[serde(rename = "tar.gz")]
    TarGz,
    /// Zstandard-compressed tar archive (`.tar.zst`).
    #[serde(rename = "tar.zst")]
    TarZst,
    /// Uncompressed tar archive (`.tar`).
    Tar,
    /// An already unpacked directory tree.
    Directory,
}

impl ArtifactFormat {
    /// Whether the artifact has to be unpacked before it can be built.
    pub fn is_archive(self) -> bool {
        !matches!(self, Self::Directory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_normalizes_case() {
        let name = PackageName::parse("PyTest").unwrap();
        assert_eq!(name.as_str(), "pytest");
        assert_eq!(name, "PYTEST");
    }

    #[test]
    fn test_name_rejects_garbage() {
        assert_eq!(PackageName::parse(""), Err(NameError::Empty));
        assert!(PackageName::parse("foo/bar").is_err());
        assert!(PackageName::parse("-leading").is_err());
        assert!(PackageName::parse("has space").is_err());
        assert!(PackageName::parse("a").is_ok());
        assert!(PackageName::parse("pytest-cov").is_ok());
        assert!(PackageName::parse("zope.interface").is_ok());
    }

    #[test]
    fn test_source_kind_round_trips_through_str() {
        for kind in [SourceKind::Index, SourceKind::Local, SourceKind::Remote] {
            assert_eq!(kind.as_str().parse::<SourceKind>().unwrap(), kind);
        }
        assert!("git".parse::<SourceKind>().is_err());
    }
}
