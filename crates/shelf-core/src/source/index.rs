//! Package index source.
//!
//! [`HttpIndex`] speaks the PyPI JSON API (`/pypi/<name>/json`) for release
//! metadata and scrapes the `/search/` HTML page for term search.

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use shelf_schema::{PackageName, SourceKind, Version};

use super::{ByteStream, DistributionDescriptor, FetchHandle, SourceProvider, TransportError};
use crate::error::{EngineError, Result};
use crate::io::{download, extract};
use crate::matcher;
use crate::spec::PackageSpec;

/// One published release file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRelease {
    pub name: PackageName,
    pub version: Version,
    pub filename: String,
    pub url: String,
}

/// A search result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub name: String,
    pub description: String,
}

/// The package index collaborator.
#[async_trait]
pub trait IndexTransport: Send + Sync {
    async fn search(&self, term: &str) -> std::result::Result<Vec<SearchHit>, TransportError>;

    /// Every installable release of `name`, in any order. Unknown packages
    /// yield [`TransportError::NotFound`] or an empty list.
    async fn fetch_metadata(
        &self,
        name: &PackageName,
    ) -> std::result::Result<Vec<IndexRelease>, TransportError>;

    async fn download(
        &self,
        release: &IndexRelease,
    ) -> std::result::Result<ByteStream, TransportError>;
}

#[derive(Deserialize)]
struct ProjectDocument {
    info: ProjectInfo,
    #[serde(default)]
    releases: BTreeMap<String, Vec<ReleaseFile>>,
}

#[derive(Deserialize)]
struct ProjectInfo {
    name: String,
}

#[derive(Deserialize)]
struct ReleaseFile {
    filename: String,
    url: String,
    #[serde(default)]
    packagetype: String,
    #[serde(default)]
    yanked: bool,
}

/// Pick the file to install for one release: source distributions first,
/// anything else only if it is an archive we can unpack.
fn pick_file(files: &[ReleaseFile]) -> Option<&ReleaseFile> {
    let usable = |f: &&ReleaseFile| {
        !f.yanked
            && extract::detect_format(std::path::Path::new(&f.filename))
                .is_some_and(|fmt| fmt.is_archive())
    };
    files
        .iter()
        .filter(usable)
        .find(|f| f.packagetype == "sdist")
        .or_else(|| files.iter().find(usable))
}

static SNIPPET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?s)package-snippet__name">([^<]*)</span>.*?package-snippet__description">([^<]*)</p>"#,
    )
    .expect("snippet regex is valid")
});

fn unescape_html(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}

fn parse_search_page(html: &str) -> Vec<SearchHit> {
    SNIPPET_RE
        .captures_iter(html)
        .map(|caps| SearchHit {
            name: unescape_html(caps[1].trim()),
            description: unescape_html(caps[2].trim()),
        })
        .collect()
}

/// HTTP implementation of [`IndexTransport`].
#[derive(Debug, Clone)]
pub struct HttpIndex {
    client: Client,
    base_url: String,
}

impl HttpIndex {
    /// Build an index client rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Http`] if the HTTP client cannot be built.
    pub fn new(base_url: &str) -> std::result::Result<Self, TransportError> {
        let client = Client::builder()
            .user_agent(crate::USER_AGENT)
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl IndexTransport for HttpIndex {
    async fn search(&self, term: &str) -> std::result::Result<Vec<SearchHit>, TransportError> {
        let url = format!("{}/search/", self.base_url);
        let response = self.client.get(&url).query(&[("q", term)]).send().await?;
        if !response.status().is_success() {
            return Err(TransportError::Status {
                url,
                status: response.status().as_u16(),
            });
        }
        let html = response.text().await?;
        Ok(parse_search_page(&html))
    }

    async fn fetch_metadata(
        &self,
        name: &PackageName,
    ) -> std::result::Result<Vec<IndexRelease>, TransportError> {
        let url = format!("{}/pypi/{}/json", self.base_url, name);
        tracing::debug!(%url, "fetching index metadata");

        let response = self.client.get(&url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => return Err(TransportError::NotFound(name.to_string())),
            status if !status.is_success() => {
                return Err(TransportError::Status {
                    url,
                    status: status.as_u16(),
                });
            }
            _ => {}
        }

        let doc: ProjectDocument = response
            .json()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))?;
        let project = PackageName::parse(&doc.info.name)
            .map_err(|e| TransportError::Decode(e.to_string()))?;

        let mut releases = Vec::new();
        for (raw_version, files) in &doc.releases {
            let Ok(version) = Version::parse(raw_version) else {
                tracing::debug!(version = %raw_version, "skipping unparsable version");
                continue;
            };
            let Some(file) = pick_file(files) else {
                continue;
            };
            releases.push(IndexRelease {
                name: project.clone(),
                version,
                filename: file.filename.clone(),
                url: file.url.clone(),
            });
        }
        Ok(releases)
    }

    async fn download(
        &self,
        release: &IndexRelease,
    ) -> std::result::Result<ByteStream, TransportError> {
        download::open_stream(&self.client, &release.url).await
    }
}

/// Resolves `name` / `name==version` specifiers against an index.
pub struct IndexProvider {
    transport: Arc<dyn IndexTransport>,
}

impl IndexProvider {
    pub fn new(transport: Arc<dyn IndexTransport>) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &Arc<dyn IndexTransport> {
        &self.transport
    }

    /// All releases of `name`, ascending by version.
    ///
    /// # Errors
    ///
    /// [`EngineError::PackageNotFound`] when the index has no installable
    /// release, [`EngineError::SourceUnavailable`] on transport failure.
    pub async fn releases(&self, name: &PackageName) -> Result<Vec<IndexRelease>> {
        let mut releases = match self.transport.fetch_metadata(name).await {
            Ok(releases) => releases,
            Err(TransportError::NotFound(_)) => {
                return Err(EngineError::PackageNotFound(name.to_string()));
            }
            Err(e) => return Err(EngineError::SourceUnavailable(e.to_string())),
        };
        if releases.is_empty() {
            return Err(EngineError::PackageNotFound(name.to_string()));
        }
        releases.sort_by(|a, b| a.version.cmp(&b.version));
        Ok(releases)
    }

    /// Search the index by free-text term.
    ///
    /// # Errors
    ///
    /// [`EngineError::SourceUnavailable`] if the index cannot be queried.
    pub async fn search(&self, term: &str) -> Result<Vec<SearchHit>> {
        self.transport
            .search(term)
            .await
            .map_err(|e| EngineError::SourceUnavailable(e.to_string()))
    }
}

fn spec_name(spec: &PackageSpec) -> Result<&PackageName> {
    spec.name()
        .ok_or_else(|| EngineError::PackageNotFound(spec.to_string()))
}

#[async_trait]
impl SourceProvider for IndexProvider {
    fn kind(&self) -> SourceKind {
        SourceKind::Index
    }

    async fn list_versions(&self, spec: &PackageSpec) -> Result<Vec<Version>> {
        let releases = self.releases(spec_name(spec)?).await?;
        Ok(releases.into_iter().map(|r| r.version).collect())
    }

    async fn resolve(
        &self,
        spec: &PackageSpec,
        version: Option<&Version>,
    ) -> Result<DistributionDescriptor> {
        let name = spec_name(spec)?;
        let releases = self.releases(name).await?;
        let versions: Vec<Version> = releases.iter().map(|r| r.version.clone()).collect();
        let wanted = version.or(spec.version_constraint());
        let chosen = matcher::select(name, &versions, wanted)?;

        let release = releases
            .into_iter()
            .find(|r| r.version.as_str() == chosen.as_str())
            .ok_or_else(|| EngineError::VersionNotFound {
                name: name.to_string(),
                version: chosen.to_string(),
            })?;

        Ok(DistributionDescriptor {
            name: release.name.clone(),
            version: release.version.clone(),
            source_kind: SourceKind::Index,
            fetch_handle: FetchHandle::Index(release),
        })
    }
}
