//! Remote repository snapshots (`owner/repo[@ref]`).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use shelf_schema::{SourceKind, Version};

use super::{ByteStream, DistributionDescriptor, FetchHandle, SourceProvider, TransportError};
use crate::error::{EngineError, Result};
use crate::io::download;
use crate::repo::RepoSlug;
use crate::spec::PackageSpec;

/// The remote repository collaborator.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// The repository's primary branch.
    async fn default_ref(&self, owner: &str, repo: &str)
    -> std::result::Result<String, TransportError>;

    /// A zip snapshot of the repository at `reference`.
    async fn download_snapshot(
        &self,
        owner: &str,
        repo: &str,
        reference: &str,
    ) -> std::result::Result<ByteStream, TransportError>;
}

#[derive(Deserialize)]
struct RepoDocument {
    default_branch: String,
}

/// GitHub REST API implementation of [`RemoteTransport`].
#[derive(Debug, Clone)]
pub struct GitHubTransport {
    client: Client,
    api_url: String,
}

impl GitHubTransport {
    /// Build a client for the GitHub REST API at `api_url`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Http`] if the HTTP client cannot be built.
    pub fn new(api_url: &str) -> std::result::Result<Self, TransportError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/vnd.github+json"),
        );
        let client = Client::builder()
            .user_agent(crate::USER_AGENT)
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl RemoteTransport for GitHubTransport {
    async fn default_ref(
        &self,
        owner: &str,
        repo: &str,
    ) -> std::result::Result<String, TransportError> {
        let url = format!("{}/repos/{owner}/{repo}", self.api_url);
        let response = self.client.get(&url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(TransportError::NotFound(format!("{owner}/{repo}"))),
            status if !status.is_success() => Err(TransportError::Status {
                url,
                status: status.as_u16(),
            }),
            _ => {
                let doc: RepoDocument = response
                    .json()
                    .await
                    .map_err(|e| TransportError::Decode(e.to_string()))?;
                Ok(doc.default_branch)
            }
        }
    }

    async fn download_snapshot(
        &self,
        owner: &str,
        repo: &str,
        reference: &str,
    ) -> std::result::Result<ByteStream, TransportError> {
        let url = format!("{}/repos/{owner}/{repo}/zipball/{reference}", self.api_url);
        download::open_stream(&self.client, &url).await
    }
}

/// Resolves `owner/repo` specifiers to a snapshot at a concrete ref.
pub struct RemoteProvider {
    transport: Arc<dyn RemoteTransport>,
}

impl RemoteProvider {
    pub fn new(transport: Arc<dyn RemoteTransport>) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &Arc<dyn RemoteTransport> {
        &self.transport
    }
}

/// Refs like `v1.2` or `1.0.0` double as versions; branch names and
/// anything unparsable are recorded as `0.0.0`.
fn version_from_ref(reference: &str) -> Result<Version> {
    let looks_versioned = reference
        .trim_start_matches(['v', 'V'])
        .starts_with(|c: char| c.is_ascii_digit());
    let parsed = looks_versioned
        .then(|| Version::parse(reference).ok())
        .flatten();
    match parsed {
        Some(version) => Ok(version),
        None => Version::parse("0.0.0").map_err(|e| EngineError::SourceUnavailable(e.to_string())),
    }
}

#[async_trait]
impl SourceProvider for RemoteProvider {
    fn kind(&self) -> SourceKind {
        SourceKind::Remote
    }

    async fn list_versions(&self, spec: &PackageSpec) -> Result<Vec<Version>> {
        Ok(vec![self.resolve(spec, None).await?.version])
    }

    async fn resolve(
        &self,
        spec: &PackageSpec,
        _version: Option<&Version>,
    ) -> Result<DistributionDescriptor> {
        let slug = RepoSlug::new(spec.path_or_ref()).map_err(EngineError::SourceUnavailable)?;

        let reference = match spec.git_ref() {
            Some(reference) => reference.to_string(),
            None => self
                .transport
                .default_ref(slug.owner(), slug.name())
                .await
                .map_err(|e| EngineError::SourceUnavailable(format!("{slug}: {e}")))?,
        };
        tracing::debug!(repo = %slug, %reference, "resolved remote snapshot");

        Ok(DistributionDescriptor {
            name: shelf_schema::PackageName::new(slug.name()),
            version: version_from_ref(&reference)?,
            source_kind: SourceKind::Remote,
            fetch_handle: FetchHandle::Snapshot {
                owner: slug.owner().to_string(),
                repo: slug.name().to_string(),
                reference,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_from_ref() {
        assert_eq!(version_from_ref("v1.2.0").unwrap().as_str(), "v1.2.0");
        assert_eq!(version_from_ref("master").unwrap().as_str(), "0.0.0");
        assert_eq!(version_from_ref("feature/x").unwrap().as_str(), "0.0.0");
    }

    #[tokio::test]
    async fn test_resolve_uses_default_branch() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/repos/bndr/pipreqs")
            .with_status(200)
            .with_body(r#"{"full_name": "bndr/pipreqs", "default_branch": "master"}"#)
            .create_async()
            .await;

        let provider = RemoteProvider::new(Arc::new(GitHubTransport::new(&server.url()).unwrap()));
        let spec = PackageSpec::parse("bndr/pipreqs").unwrap();
        let d = provider.resolve(&spec, None).await.unwrap();

        assert_eq!(d.name.as_str(), "pipreqs");
        assert_eq!(
            d.fetch_handle,
            FetchHandle::Snapshot {
                owner: "bndr".into(),
                repo: "pipreqs".into(),
                reference: "master".into(),
            }
        );
    }

    #[tokio::test]
    async fn test_explicit_ref_skips_lookup() {
        let mut server = mockito::Server::new_async().await;
        let lookup = server
            .mock("GET", "/repos/bndr/pipreqs")
            .expect(0)
            .create_async()
            .await;

        let provider = RemoteProvider::new(Arc::new(GitHubTransport::new(&server.url()).unwrap()));
        let spec = PackageSpec::parse("bndr/pipreqs@v0.4.11").unwrap();
        let d = provider.resolve(&spec, None).await.unwrap();
        assert_eq!(d.version.as_str(), "v0.4.11");
        lookup.assert_async().await;
    }

    #[tokio::test]
    async fn test_missing_repository() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/repos/nobody/nothing")
            .with_status(404)
            .create_async()
            .await;

        let provider = RemoteProvider::new(Arc::new(GitHubTransport::new(&server.url()).unwrap()));
        let spec = PackageSpec::parse("nobody/nothing").unwrap();
        let err = provider.resolve(&spec, None).await.unwrap_err();
        assert!(matches!(err, EngineError::SourceUnavailable(_)));
    }

    #[tokio::test]
    async fn test_snapshot_download() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/repos/bndr/pipreqs/zipball/master")
            .with_status(200)
            .with_body("PK")
            .create_async()
            .await;

        let transport = GitHubTransport::new(&server.url()).unwrap();
        let stream = transport
            .download_snapshot("bndr", "pipreqs", "master")
            .await
            .unwrap();
        assert_eq!(stream.len, Some(2));
    }
}
