//! Builder: unpack a fetched artifact and run its build descriptor.
//!
//! Builds never write into the packages directory directly. The script's
//! `$PREFIX` is a fresh staging directory; on success the staged paths are
//! promoted into the packages root by [`BuildOutput::promote`], after the
//! engine has checked that nobody else owns them.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use shelf_schema::{ArtifactFormat, BUILD_DESCRIPTOR, BuildManifest, PackageMeta};
use tempfile::TempDir;

use crate::error::{EngineError, Result};
use crate::fetch::FetchedArtifact;
use crate::io::{cleanup, extract};
use crate::sandbox::{Sandbox, SandboxRequest};

/// A successful build, staged and waiting to be promoted.
#[derive(Debug)]
pub struct BuildOutput {
    stage: TempDir,
    files: Vec<PathBuf>,
    package: Option<PackageMeta>,
    log: String,
}

impl BuildOutput {
    /// `[package]` metadata from the build descriptor.
    pub fn package(&self) -> Option<&PackageMeta> {
        self.package.as_ref()
    }

    /// Staged paths relative to `$PREFIX`, in creation order.
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Captured script output.
    pub fn log(&self) -> &str {
        &self.log
    }

    fn is_staged_dir(&self, relative: &Path) -> bool {
        self.stage
            .path()
            .join(relative)
            .symlink_metadata()
            .is_ok_and(|m| m.is_dir())
    }

    /// The paths under `dest_root` this package would own once promoted.
    /// Directories that already exist there are not claimed.
    pub fn claims(&self, dest_root: &Path) -> Vec<PathBuf> {
        self.files
            .iter()
            .filter_map(|rel| {
                let dst = dest_root.join(rel);
                let existing_dir = self.is_staged_dir(rel) && dst.symlink_metadata().is_ok();
                (!existing_dir).then_some(dst)
            })
            .collect()
    }

    /// Move the staged paths into `dest_root` and return what was placed,
    /// in creation order. On failure everything placed so far is removed.
    ///
    /// # Errors
    ///
    /// Returns the first filesystem error; placed paths are removed first.
    pub fn promote(&self, dest_root: &Path) -> io::Result<Vec<PathBuf>> {
        fs::create_dir_all(dest_root)?;
        let mut placed = Vec::with_capacity(self.files.len());

        for rel in &self.files {
            let src = self.stage.path().join(rel);
            let dst = dest_root.join(rel);
            match place(&src, &dst) {
                Ok(true) => placed.push(dst),
                Ok(false) => {}
                Err(e) => {
                    let report = cleanup::remove_paths(&placed);
                    for warning in report.failures() {
                        tracing::warn!("{warning}");
                    }
                    return Err(e);
                }
            }
        }
        Ok(placed)
    }
}

/// Move one staged path. Returns `false` for directories that already exist.
fn place(src: &Path, dst: &Path) -> io::Result<bool> {
    let meta = src.symlink_metadata()?;
    if meta.is_dir() {
        if dst.symlink_metadata().is_ok() {
            return Ok(false);
        }
        fs::create_dir_all(dst)?;
        return Ok(true);
    }

    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    if dst.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} is a directory", dst.display()),
        ));
    }

    if fs::rename(src, dst).is_err() {
        #[cfg(unix)]
        if meta.is_symlink() {
            let target = fs::read_link(src)?;
            if dst.symlink_metadata().is_ok() {
                fs::remove_file(dst)?;
            }
            std::os::unix::fs::symlink(target, dst)?;
            return Ok(true);
        }
        fs::copy(src, dst)?;
    }
    Ok(true)
}

/// Unpacks artifacts and runs their build descriptors through a [`Sandbox`].
#[derive(Clone)]
pub struct Builder {
    sandbox: Arc<dyn Sandbox>,
    scratch_root: PathBuf,
}

impl std::fmt::Debug for Builder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builder")
            .field("scratch_root", &self.scratch_root)
            .finish_non_exhaustive()
    }
}

impl Builder {
    pub fn new(sandbox: Arc<dyn Sandbox>, scratch_root: PathBuf) -> Self {
        Self {
            sandbox,
            scratch_root,
        }
    }

    fn scratch(&self, prefix: &str) -> io::Result<TempDir> {
        fs::create_dir_all(&self.scratch_root)?;
        tempfile::Builder::new()
            .prefix(prefix)
            .tempdir_in(&self.scratch_root)
    }

    fn unpack(artifact: &FetchedArtifact, dest: &Path) -> Result<()> {
        let source = artifact.local_path();
        match artifact.format() {
            ArtifactFormat::Directory => {
                let options = fs_extra::dir::CopyOptions::new().content_only(true);
                fs_extra::dir::copy(source, dest, &options)
                    .map(|_| ())
                    .map_err(|e| EngineError::Fetch(format!("copy {}: {e}", source.display())))
            }
            format => extract::extract(source, format, dest)
                .map_err(|e| EngineError::Fetch(format!("unpack {}: {e}", source.display()))),
        }
    }

    /// Unpack `artifact`, locate and parse its build descriptor, and run it.
    ///
    /// Blocking; the engine calls this from `spawn_blocking`.
    ///
    /// # Errors
    ///
    /// - [`EngineError::NoBuildDescriptor`] if the artifact has no `shelf.toml`
    /// - [`EngineError::BuildFailed`] for an invalid descriptor or a failing
    ///   script, with the script's output verbatim
    /// - [`EngineError::Timeout`] if `deadline` passes
    pub fn build(
        &self,
        artifact: &FetchedArtifact,
        deadline: Option<Instant>,
    ) -> Result<BuildOutput> {
        let package = artifact.declared_name().to_string();
        let work = self.scratch("build-")?;
        Self::unpack(artifact, work.path())?;

        let root = if work.path().join(BUILD_DESCRIPTOR).is_file() {
            work.path().to_path_buf()
        } else {
            extract::artifact_root(work.path())?
        };
        let descriptor = root.join(BUILD_DESCRIPTOR);
        if !descriptor.is_file() {
            return Err(EngineError::NoBuildDescriptor { package });
        }

        let text = fs::read_to_string(&descriptor)?;
        let manifest = BuildManifest::from_toml(&text).map_err(|e| EngineError::BuildFailed {
            package: package.clone(),
            output: e.to_string(),
            cleanup_warnings: Vec::new(),
        })?;

        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(EngineError::Timeout { stage: "build" });
        }

        let stage = self.scratch("stage-")?;
        let outcome = self
            .sandbox
            .run(&SandboxRequest {
                script: &manifest.build.script,
                working_dir: &root,
                write_root: stage.path(),
                deadline,
            })
            .map_err(|e| EngineError::BuildFailed {
                package: package.clone(),
                output: e.to_string(),
                cleanup_warnings: Vec::new(),
            })?;

        if !outcome.success {
            let created: Vec<PathBuf> = outcome
                .touched
                .iter()
                .filter(|t| t.created)
                .map(|t| t.path.clone())
                .collect();
            let cleanup_warnings = cleanup::remove_paths(&created).failures();
            for warning in &cleanup_warnings {
                tracing::warn!(%package, "{warning}");
            }

            if outcome.timed_out {
                return Err(EngineError::Timeout { stage: "build" });
            }
            tracing::debug!(%package, code = ?outcome.exit_code, "build script failed");
            return Err(EngineError::BuildFailed {
                package,
                output: outcome.output,
                cleanup_warnings,
            });
        }

        let files = outcome
            .touched
            .into_iter()
            .filter_map(|t| {
                t.path
                    .strip_prefix(stage.path())
                    .ok()
                    .map(Path::to_path_buf)
            })
            .collect();

        Ok(BuildOutput {
            stage,
            files,
            package: manifest.package,
            log: outcome.output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::ShellSandbox;
    use crate::source::{DistributionDescriptor, FetchHandle};
    use shelf_schema::{PackageName, SourceKind, Version};

    async fn artifact_for(dir: &Path) -> FetchedArtifact {
        let fetcher = crate::fetch::Fetcher::new(
            Arc::new(crate::source::HttpIndex::with_client(
                reqwest::Client::new(),
                "http://unused",
            )),
            Arc::new(crate::source::GitHubTransport::new("http://unused").unwrap()),
            dir.join("tmp"),
            Arc::new(crate::reporter::NullReporter),
        );
        let dist = DistributionDescriptor {
            name: PackageName::new("pkg"),
            version: Version::parse("1.0").unwrap(),
            source_kind: SourceKind::Local,
            fetch_handle: FetchHandle::Path(dir.join("pkg")),
        };
        fetcher.fetch(&dist, None).await.unwrap()
    }

    fn builder(dir: &Path) -> Builder {
        Builder::new(Arc::new(ShellSandbox::new()), dir.join("tmp"))
    }

    fn write_pkg(dir: &Path, descriptor: Option<&str>) {
        let pkg = dir.join("pkg");
        fs::create_dir_all(&pkg).unwrap();
        fs::write(pkg.join("hello"), "#!/bin/sh\necho hello\n").unwrap();
        if let Some(text) = descriptor {
            fs::write(pkg.join(BUILD_DESCRIPTOR), text).unwrap();
        }
    }

    #[tokio::test]
    async fn test_build_and_promote() {
        let dir = tempfile::tempdir().unwrap();
        write_pkg(
            dir.path(),
            Some("[build]\nscript = 'mkdir -p \"$PREFIX/bin\" && cp hello \"$PREFIX/bin/\"'\n"),
        );
        let artifact = artifact_for(dir.path()).await;
        let output = builder(dir.path()).build(&artifact, None).unwrap();
        assert_eq!(
            output.files(),
            &[PathBuf::from("bin"), PathBuf::from("bin/hello")]
        );

        let dest = dir.path().join("packages");
        assert_eq!(output.claims(&dest).len(), 2);
        let placed = output.promote(&dest).unwrap();
        assert_eq!(placed, vec![dest.join("bin"), dest.join("bin/hello")]);
        assert!(dest.join("bin/hello").is_file());

        // the source directory is never modified
        assert!(dir.path().join("pkg/hello").is_file());
    }

    #[tokio::test]
    async fn test_existing_directories_are_not_claimed() {
        let dir = tempfile::tempdir().unwrap();
        write_pkg(
            dir.path(),
            Some("[build]\nscript = 'mkdir -p \"$PREFIX/bin\" && cp hello \"$PREFIX/bin/\"'\n"),
        );
        let dest = dir.path().join("packages");
        fs::create_dir_all(dest.join("bin")).unwrap();

        let artifact = artifact_for(dir.path()).await;
        let output = builder(dir.path()).build(&artifact, None).unwrap();
        assert_eq!(output.claims(&dest), vec![dest.join("bin/hello")]);
        assert_eq!(output.promote(&dest).unwrap(), vec![dest.join("bin/hello")]);
    }

    #[tokio::test]
    async fn test_missing_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        write_pkg(dir.path(), None);
        let artifact = artifact_for(dir.path()).await;
        let err = builder(dir.path()).build(&artifact, None).unwrap_err();
        assert!(matches!(err, EngineError::NoBuildDescriptor { .. }));
    }

    #[tokio::test]
    async fn test_failed_script_keeps_output_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        write_pkg(
            dir.path(),
            Some("[build]\nscript = 'touch \"$PREFIX/partial\"; echo \"error: no compiler\" >&2; exit 1'\n"),
        );
        let artifact = artifact_for(dir.path()).await;
        let err = builder(dir.path()).build(&artifact, None).unwrap_err();
        match err {
            EngineError::BuildFailed {
                output,
                cleanup_warnings,
                ..
            } => {
                assert_eq!(output, "error: no compiler\n");
                assert!(cleanup_warnings.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
        // scratch areas are gone once the build returns
        assert_eq!(fs::read_dir(dir.path().join("tmp")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_descriptor_is_build_failure() {
        let dir = tempfile::tempdir().unwrap();
        write_pkg(dir.path(), Some("[build]\nscript = \"\"\n"));
        let artifact = artifact_for(dir.path()).await;
        let err = builder(dir.path()).build(&artifact, None).unwrap_err();
        assert!(matches!(err, EngineError::BuildFailed { .. }));
    }
}
