//! Local archives and directories.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use shelf_schema::{BUILD_DESCRIPTOR, BuildManifest, PackageMeta, PackageName, SourceKind, Version};

use super::{DistributionDescriptor, FetchHandle, SourceProvider};
use crate::error::{EngineError, Result};
use crate::io::extract;
use crate::spec::PackageSpec;

static FILENAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<name>.+?)-(?P<version>\d[A-Za-z0-9._+-]*)$").expect("filename regex is valid")
});

const ARCHIVE_EXTENSIONS: &[&str] = &[".tar.gz", ".tar.zst", ".tgz", ".tzst", ".tar", ".zip"];

/// Derive name and version from an artifact's file name:
/// `rsa-3.4.2.tar.gz` gives `rsa` / `3.4.2`, `stpkg.zip` gives `stpkg` / `0.0.0`.
pub fn metadata_from_filename(path: &Path) -> Option<(PackageName, Version)> {
    let file_name = path.file_name()?.to_string_lossy();
    let lower = file_name.to_lowercase();
    let stem = ARCHIVE_EXTENSIONS
        .iter()
        .find(|ext| lower.ends_with(*ext))
        .map_or(&*file_name, |ext| &file_name[..file_name.len() - ext.len()]);

    if let Some(caps) = FILENAME_RE.captures(stem) {
        if let (Ok(name), Ok(version)) = (
            PackageName::parse(&caps["name"]),
            Version::parse(&caps["version"]),
        ) {
            return Some((name, version));
        }
    }

    let name = PackageName::parse(stem).ok()?;
    let version = Version::parse("0.0.0").ok()?;
    Some((name, version))
}

/// Validate embedded `[package]` metadata. Invalid fields are ignored.
fn validate_meta(meta: &PackageMeta) -> Option<(PackageName, Version)> {
    let name = PackageName::parse(&meta.name).ok()?;
    let version = Version::parse(&meta.version).ok()?;
    Some((name, version))
}

/// Read `[package]` from the artifact's build descriptor, if it has one.
fn embedded_metadata(path: &Path) -> Result<Option<(PackageName, Version)>> {
    let format = extract::detect_format(path).ok_or_else(|| {
        EngineError::SourceUnavailable(format!(
            "{} is not a supported archive or directory",
            path.display()
        ))
    })?;
    let text = extract::read_embedded(path, format, BUILD_DESCRIPTOR)
        .map_err(|e| EngineError::SourceUnavailable(format!("{}: {e}", path.display())))?;
    Ok(text
        .as_deref()
        .and_then(BuildManifest::metadata_from_toml)
        .as_ref()
        .and_then(validate_meta))
}

/// Resolves specifiers naming a path on disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalProvider;

impl LocalProvider {
    async fn describe(&self, spec: &PackageSpec) -> Result<DistributionDescriptor> {
        let raw = PathBuf::from(spec.path_or_ref());
        let path = tokio::fs::canonicalize(&raw)
            .await
            .map_err(|_| EngineError::PackageNotFound(raw.display().to_string()))?;

        let probe = path.clone();
        let embedded = tokio::task::spawn_blocking(move || embedded_metadata(&probe))
            .await
            .map_err(|e| EngineError::SourceUnavailable(e.to_string()))??;

        let (name, version) = match embedded {
            Some(found) => found,
            None => metadata_from_filename(&path).ok_or_else(|| {
                EngineError::SourceUnavailable(format!(
                    "cannot derive a package name from {}",
                    path.display()
                ))
            })?,
        };
        tracing::debug!(path = %path.display(), %name, %version, "resolved local artifact");

        Ok(DistributionDescriptor {
            name,
            version,
            source_kind: SourceKind::Local,
            fetch_handle: FetchHandle::Path(path),
        })
    }
}

#[async_trait]
impl SourceProvider for LocalProvider {
    fn kind(&self) -> SourceKind {
        SourceKind::Local
    }

    async fn list_versions(&self, spec: &PackageSpec) -> Result<Vec<Version>> {
        Ok(vec![self.describe(spec).await?.version])
    }

    async fn resolve(
        &self,
        spec: &PackageSpec,
        _version: Option<&Version>,
    ) -> Result<DistributionDescriptor> {
        self.describe(spec).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_metadata_from_filename() {
        let (name, version) = metadata_from_filename(Path::new("/tmp/rsa-3.4.2.tar.gz")).unwrap();
        assert_eq!(name.as_str(), "rsa");
        assert_eq!(version.as_str(), "3.4.2");

        let (name, version) = metadata_from_filename(Path::new("my-pkg-2.0rc1.zip")).unwrap();
        assert_eq!(name.as_str(), "my-pkg");
        assert_eq!(version.as_str(), "2.0rc1");

        let (name, version) = metadata_from_filename(Path::new("stpkg.zip")).unwrap();
        assert_eq!(name.as_str(), "stpkg");
        assert_eq!(version.as_str(), "0.0.0");

        assert!(metadata_from_filename(Path::new("bad name!.zip")).is_none());
    }

    #[tokio::test]
    async fn test_resolve_prefers_embedded_metadata() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("stpkg.zip");
        let mut zip = zip::ZipWriter::new(File::create(&archive).unwrap());
        zip.start_file("shelf.toml", zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(b"[package]\nname = \"stpkg\"\nversion = \"1.2.0\"\n\n[build]\nscript = \"true\"\n")
            .unwrap();
        zip.finish().unwrap();

        let spec = PackageSpec::parse(archive.to_str().unwrap()).unwrap();
        let d = LocalProvider.resolve(&spec, None).await.unwrap();
        assert_eq!(d.name.as_str(), "stpkg");
        assert_eq!(d.version.as_str(), "1.2.0");
        assert_eq!(d.source_kind, SourceKind::Local);
        assert!(matches!(d.fetch_handle, FetchHandle::Path(ref p) if p.is_absolute()));
    }

    #[tokio::test]
    async fn test_resolve_directory_falls_back_to_dir_name() {
        let dir = tempdir().unwrap();
        let pkg = dir.path().join("tool-0.3.1");
        std::fs::create_dir(&pkg).unwrap();
        std::fs::write(pkg.join("shelf.toml"), "[build]\nscript = \"true\"\n").unwrap();

        let spec = PackageSpec::parse(pkg.to_str().unwrap()).unwrap();
        let versions = LocalProvider.list_versions(&spec).await.unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].as_str(), "0.3.1");

        let d = LocalProvider.resolve(&spec, None).await.unwrap();
        assert_eq!(d.name.as_str(), "tool");
    }
}
