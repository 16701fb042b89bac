//! Build descriptor (`shelf.toml`) format.
//!
//! Every distribution carries a build descriptor at its root:
//!
//! ```toml
//! [package]
//! name = "stpkg"
//! version = "1.0.0"
//! description = "local test package"
//!
//! [build]
//! script = '''
//! mkdir -p "$PREFIX/bin"
//! cp stash_pip_test "$PREFIX/bin/"
//! '''
//! ```
//!
//! The `[package]` table is optional. When present it is the distribution's
//! embedded metadata and takes precedence over names derived from file names
//! or repository references.

use serde::{Deserialize, Serialize};

/// File name of the build descriptor at the artifact root.
pub const BUILD_DESCRIPTOR: &str = "shelf.toml";

/// Errors produced while reading a build descriptor.
#[derive(thiserror::Error, Debug)]
pub enum ManifestError {
    /// The document is not valid TOML or does not match the schema.
    #[error("invalid build descriptor: {0}")]
    Parse(#[from] toml::de::Error),

    /// The `[build]` script is empty.
    #[error("build descriptor has an empty [build].script")]
    EmptyScript,
}

/// Top-level structure of `shelf.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildManifest {
    /// Embedded package metadata.
    #[serde(default)]
    pub package: Option<PackageMeta>,
    /// The install routine.
    pub build: BuildSection,
}

/// The `[package]` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackageMeta {
    /// Declared package name.
    pub name: String,
    /// Declared version string.
    pub version: String,
    /// One-line summary.
    #[serde(default)]
    pub description: Option<String>,
}

/// The `[build]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSection {
    /// Shell script executed with the artifact root as working directory.
    pub script: String,
}

/// Lenient view used when only the metadata is of interest.
#[derive(Deserialize)]
struct Header {
    #[serde(default)]
    package: Option<PackageMeta>,
}

impl BuildManifest {
    /// Parse a full build descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Parse`] for malformed TOML or a missing
    /// `[build]` table, and [`ManifestError::EmptyScript`] when the script is
    /// blank.
    pub fn from_toml(s: &str) -> Result<Self, ManifestError> {
        let manifest: Self = toml::from_str(s)?;
        if manifest.build.script.trim().is_empty() {
            return Err(ManifestError::EmptyScript);
        }
        Ok(manifest)
    }

    /// Read only the `[package]` table, ignoring everything else.
    ///
    /// Returns `None` if the document cannot be parsed or has no metadata.
    pub fn metadata_from_toml(s: &str) -> Option<PackageMeta> {
        toml::from_str::<Header>(s).ok().and_then(|h| h.package)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[package]
name = "stpkg"
version = "1.0.0"

[build]
script = "mkdir -p \"$PREFIX/bin\""
"#;

    #[test]
    fn test_parse_full_manifest() {
        let manifest = BuildManifest::from_toml(SAMPLE).unwrap();
        let meta = manifest.package.unwrap();
        assert_eq!(meta.name, "stpkg");
        assert_eq!(meta.version, "1.0.0");
        assert_eq!(meta.description, None);
        assert!(manifest.build.script.contains("$PREFIX"));
    }

    #[test]
    fn test_package_table_is_optional() {
        let manifest = BuildManifest::from_toml("[build]\nscript = \"true\"\n").unwrap();
        assert!(manifest.package.is_none());
    }

    #[test]
    fn test_rejects_missing_or_empty_script() {
        assert!(matches!(
            BuildManifest::from_toml("[package]\nname = \"x\"\nversion = \"1\"\n"),
            Err(ManifestError::Parse(_))
        ));
        assert!(matches!(
            BuildManifest::from_toml("[build]\nscript = \"  \"\n"),
            Err(ManifestError::EmptyScript)
        ));
    }

    #[test]
    fn test_metadata_is_lenient() {
        let meta = BuildManifest::metadata_from_toml("[package]\nname = \"x\"\nversion = \"2\"\n");
        assert_eq!(meta.unwrap().version, "2");
        assert!(BuildManifest::metadata_from_toml("not = [toml").is_none());
    }
}
