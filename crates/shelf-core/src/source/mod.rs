//! Source providers.
//!
//! Each [`SpecKind`] has exactly one provider. Providers turn a parsed
//! specifier into a [`DistributionDescriptor`] that the fetcher knows how to
//! retrieve. Network access goes through the [`IndexTransport`] and
//! [`RemoteTransport`] collaborators so tests can run against in-memory
//! fakes.

pub mod index;
pub mod local;
pub mod remote;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use shelf_schema::{PackageName, SourceKind, Version};
use thiserror::Error;

use crate::error::Result;
use crate::spec::{PackageSpec, SpecKind};

pub use index::{HttpIndex, IndexProvider, IndexRelease, IndexTransport, SearchHit};
pub use local::LocalProvider;
pub use remote::{GitHubTransport, RemoteProvider, RemoteTransport};

/// Failure talking to a collaborator transport.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A body delivered in chunks, with its length when the server announced it.
pub struct ByteStream {
    pub len: Option<u64>,
    pub inner: BoxStream<'static, std::result::Result<Bytes, TransportError>>,
}

impl ByteStream {
    /// A stream over chunks already in memory.
    pub fn from_chunks(chunks: Vec<Bytes>) -> Self {
        let len = chunks.iter().map(|c| c.len() as u64).sum();
        Self {
            len: Some(len),
            inner: futures::stream::iter(chunks.into_iter().map(Ok)).boxed(),
        }
    }

    pub fn from_bytes(body: impl Into<Bytes>) -> Self {
        Self::from_chunks(vec![body.into()])
    }
}

impl fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteStream")
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

/// How the fetcher retrieves a resolved distribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchHandle {
    /// A release file published on the index.
    Index(IndexRelease),
    /// An archive or directory already on disk.
    Path(PathBuf),
    /// A snapshot of a remote repository at `reference`.
    Snapshot {
        owner: String,
        repo: String,
        reference: String,
    },
}

/// Exactly one concrete, versioned, fetchable distribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionDescriptor {
    pub name: PackageName,
    pub version: Version,
    pub source_kind: SourceKind,
    pub fetch_handle: FetchHandle,
}

/// Capability shared by all source kinds.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Candidate versions for `spec`, ascending.
    ///
    /// Local and remote sources have no version listing and return the
    /// single version `resolve` would pick.
    async fn list_versions(&self, spec: &PackageSpec) -> Result<Vec<Version>>;

    /// Resolve `spec` to one distribution. `version` is the matcher's pick
    /// for index sources and ignored elsewhere.
    async fn resolve(
        &self,
        spec: &PackageSpec,
        version: Option<&Version>,
    ) -> Result<DistributionDescriptor>;
}

/// The three providers, dispatched by specifier kind.
pub struct Sources {
    index: IndexProvider,
    local: LocalProvider,
    remote: RemoteProvider,
}

impl Sources {
    pub fn new(index: Arc<dyn IndexTransport>, remote: Arc<dyn RemoteTransport>) -> Self {
        Self {
            index: IndexProvider::new(index),
            local: LocalProvider,
            remote: RemoteProvider::new(remote),
        }
    }

    pub fn provider_for(&self, kind: SpecKind) -> &dyn SourceProvider {
        match kind {
            SpecKind::Indexed => &self.index,
            SpecKind::Local => &self.local,
            SpecKind::Remote => &self.remote,
        }
    }

    pub fn index(&self) -> &IndexProvider {
        &self.index
    }

    pub fn remote(&self) -> &RemoteProvider {
        &self.remote
    }
}

impl fmt::Debug for Sources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sources").finish_non_exhaustive()
    }
}
