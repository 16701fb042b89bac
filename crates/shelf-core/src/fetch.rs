//! Fetcher: turns a resolved distribution into a file or directory on disk.
//!
//! Downloads land in a scoped temporary directory under `<home>/tmp`. The
//! directory belongs to the returned [`FetchedArtifact`] and is removed
//! when it is dropped, on every exit path.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use shelf_schema::{ArtifactFormat, PackageName, Version};
use tempfile::TempDir;

use crate::error::{EngineError, Result};
use crate::io::download::{self, DownloadError};
use crate::io::extract;
use crate::reporter::Reporter;
use crate::source::{
    ByteStream, DistributionDescriptor, FetchHandle, IndexTransport, RemoteTransport,
    TransportError,
};

/// Run `fut`, failing with [`EngineError::Timeout`] once `deadline` passes.
pub(crate) async fn with_deadline<T, F>(
    deadline: Option<Instant>,
    stage: &'static str,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match deadline {
        Some(deadline) => {
            tokio::time::timeout_at(tokio::time::Instant::from_std(deadline), fut)
                .await
                .map_err(|_| EngineError::Timeout { stage })?
        }
        None => fut.await,
    }
}

/// A distribution available locally, ready for the builder.
#[derive(Debug)]
pub struct FetchedArtifact {
    local_path: PathBuf,
    declared_name: PackageName,
    declared_version: Version,
    format: ArtifactFormat,
    _scratch: Option<TempDir>,
}

impl FetchedArtifact {
    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    pub fn declared_name(&self) -> &PackageName {
        &self.declared_name
    }

    pub fn declared_version(&self) -> &Version {
        &self.declared_version
    }

    pub fn format(&self) -> ArtifactFormat {
        self.format
    }

    /// File name to use when copying the artifact elsewhere.
    pub fn file_name(&self) -> Option<&std::ffi::OsStr> {
        self.local_path.file_name()
    }
}

/// Retrieves distributions through the source transports.
#[derive(Clone)]
pub struct Fetcher {
    index: Arc<dyn IndexTransport>,
    remote: Arc<dyn RemoteTransport>,
    tmp_root: PathBuf,
    reporter: Arc<dyn Reporter>,
}

impl std::fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher")
            .field("tmp_root", &self.tmp_root)
            .finish_non_exhaustive()
    }
}

fn fetch_error(e: TransportError) -> EngineError {
    EngineError::Fetch(e.to_string())
}

/// Keep only the final path component of a server-supplied file name.
fn safe_file_name(name: &str, fallback: &str) -> String {
    Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

impl Fetcher {
    pub fn new(
        index: Arc<dyn IndexTransport>,
        remote: Arc<dyn RemoteTransport>,
        tmp_root: PathBuf,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            index,
            remote,
            tmp_root,
            reporter,
        }
    }

    /// Fetch `dist`. Local paths are used in place; everything else is
    /// streamed into a fresh scratch directory.
    ///
    /// # Errors
    ///
    /// [`EngineError::Fetch`] on transport or disk failure,
    /// [`EngineError::Timeout`] if `deadline` passes first.
    pub async fn fetch(
        &self,
        dist: &DistributionDescriptor,
        deadline: Option<Instant>,
    ) -> Result<FetchedArtifact> {
        tracing::debug!(name = %dist.name, version = %dist.version, "fetching");
        with_deadline(deadline, "fetch", self.fetch_inner(dist)).await
    }

    async fn fetch_inner(&self, dist: &DistributionDescriptor) -> Result<FetchedArtifact> {
        match &dist.fetch_handle {
            FetchHandle::Path(path) => {
                let format = extract::detect_format(path).ok_or_else(|| {
                    EngineError::Fetch(format!("unsupported artifact: {}", path.display()))
                })?;
                Ok(FetchedArtifact {
                    local_path: path.clone(),
                    declared_name: dist.name.clone(),
                    declared_version: dist.version.clone(),
                    format,
                    _scratch: None,
                })
            }
            FetchHandle::Index(release) => {
                let stream = self.index.download(release).await.map_err(fetch_error)?;
                let file_name = safe_file_name(&release.filename, "artifact.tar.gz");
                self.save(dist, stream, &file_name).await
            }
            FetchHandle::Snapshot {
                owner,
                repo,
                reference,
            } => {
                let stream = self
                    .remote
                    .download_snapshot(owner, repo, reference)
                    .await
                    .map_err(fetch_error)?;
                let file_name = format!("{repo}-{}.zip", reference.replace(['/', '\\'], "-"));
                self.save(dist, stream, &file_name).await
            }
        }
    }

    async fn save(
        &self,
        dist: &DistributionDescriptor,
        stream: ByteStream,
        file_name: &str,
    ) -> Result<FetchedArtifact> {
        tokio::fs::create_dir_all(&self.tmp_root).await?;
        let scratch = tempfile::Builder::new()
            .prefix("fetch-")
            .tempdir_in(&self.tmp_root)?;
        let dest = scratch.path().join(file_name);

        let format = extract::detect_format(&dest)
            .ok_or_else(|| EngineError::Fetch(format!("unsupported artifact: {file_name}")))?;

        let reporter = &self.reporter;
        let bytes = download::save_stream(stream, &dest, |current, total| {
            reporter.downloading(&dist.name, &dist.version, current, total);
        })
        .await
        .map_err(|e| match e {
            DownloadError::Transport(e) => fetch_error(e),
            DownloadError::Io(e) => EngineError::Fetch(e.to_string()),
        })?;
        tracing::debug!(path = %dest.display(), bytes, "download complete");

        Ok(FetchedArtifact {
            local_path: dest,
            declared_name: dist.name.clone(),
            declared_version: dist.version.clone(),
            format,
            _scratch: Some(scratch),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::NullReporter;
    use crate::source::{IndexRelease, SearchHit};
    use async_trait::async_trait;
    use futures::StreamExt;
    use shelf_schema::SourceKind;
    use std::time::Duration;

    struct StubIndex {
        body: &'static [u8],
        stall: bool,
    }

    #[async_trait]
    impl IndexTransport for StubIndex {
        async fn search(&self, _: &str) -> std::result::Result<Vec<SearchHit>, TransportError> {
            Ok(vec![])
        }
        async fn fetch_metadata(
            &self,
            _: &PackageName,
        ) -> std::result::Result<Vec<IndexRelease>, TransportError> {
            Ok(vec![])
        }
        async fn download(
            &self,
            _: &IndexRelease,
        ) -> std::result::Result<ByteStream, TransportError> {
            if self.stall {
                let inner = futures::stream::pending::<std::result::Result<bytes::Bytes, TransportError>>()
                    .boxed();
                return Ok(ByteStream { len: None, inner });
            }
            Ok(ByteStream::from_bytes(self.body))
        }
    }

    struct NoRemote;

    #[async_trait]
    impl RemoteTransport for NoRemote {
        async fn default_ref(&self, _: &str, _: &str) -> std::result::Result<String, TransportError> {
            Err(TransportError::NotFound("remote".into()))
        }
        async fn download_snapshot(
            &self,
            _: &str,
            _: &str,
            _: &str,
        ) -> std::result::Result<ByteStream, TransportError> {
            Err(TransportError::NotFound("remote".into()))
        }
    }

    fn dist() -> DistributionDescriptor {
        let name = PackageName::new("rsa");
        let version = Version::parse("3.4.2").unwrap();
        DistributionDescriptor {
            name: name.clone(),
            version: version.clone(),
            source_kind: SourceKind::Index,
            fetch_handle: FetchHandle::Index(IndexRelease {
                name,
                version,
                filename: "../rsa-3.4.2.tar.gz".into(),
                url: "https://files/rsa-3.4.2.tar.gz".into(),
            }),
        }
    }

    fn fetcher(tmp: &Path, stall: bool) -> Fetcher {
        Fetcher::new(
            Arc::new(StubIndex {
                body: b"archive bytes",
                stall,
            }),
            Arc::new(NoRemote),
            tmp.to_path_buf(),
            Arc::new(NullReporter),
        )
    }

    #[tokio::test]
    async fn test_scratch_dir_lives_with_artifact() {
        let home = tempfile::tempdir().unwrap();
        let fetcher = fetcher(home.path(), false);

        let artifact = fetcher.fetch(&dist(), None).await.unwrap();
        let path = artifact.local_path().to_path_buf();
        assert!(path.starts_with(home.path()));
        assert_eq!(path.file_name().unwrap(), "rsa-3.4.2.tar.gz");
        assert_eq!(artifact.format(), ArtifactFormat::TarGz);
        assert_eq!(std::fs::read(&path).unwrap(), b"archive bytes");

        drop(artifact);
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(home.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_deadline_releases_scratch() {
        let home = tempfile::tempdir().unwrap();
        let fetcher = fetcher(home.path(), true);

        let deadline = Instant::now() + Duration::from_millis(50);
        let err = fetcher.fetch(&dist(), Some(deadline)).await.unwrap_err();
        assert!(matches!(err, EngineError::Timeout { stage: "fetch" }));
        assert_eq!(std::fs::read_dir(home.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_remote_failure_is_fetch_error() {
        let home = tempfile::tempdir().unwrap();
        let mut d = dist();
        d.fetch_handle = FetchHandle::Snapshot {
            owner: "bndr".into(),
            repo: "pipreqs".into(),
            reference: "master".into(),
        };
        let err = fetcher(home.path(), false).fetch(&d, None).await.unwrap_err();
        assert!(matches!(err, EngineError::Fetch(_)));
    }
}
