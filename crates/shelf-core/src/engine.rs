//! The package engine.
//!
//! [`Engine`] owns the registry handle and the pipeline collaborators and
//! exposes the operations the CLI dispatches to. It is cheap to clone;
//! clones share one registry actor.
//!
//! Fetches and builds run concurrently, each into its own staging area.
//! Promoting staged files into the packages directory, checking names and
//! path ownership, and committing happen under one lock per engine, so a
//! rejected install never touches files another entry owns.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use shelf_schema::{PackageName, SourceKind, Version};

use crate::builder::{BuildOutput, Builder};
use crate::error::{EngineError, Result};
use crate::fetch::{FetchedArtifact, Fetcher};
use crate::io::cleanup;
use crate::registry::{ConflictError, PathConflict, Registry, RegistryEntry, RegistryError};
use crate::reporter::Reporter;
use crate::sandbox::{Sandbox, ShellSandbox};
use crate::settings::Settings;
use crate::source::{
    DistributionDescriptor, GitHubTransport, HttpIndex, IndexTransport, RemoteTransport,
    SearchHit, Sources,
};
use crate::spec::PackageSpec;

/// Outcome of a successful install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallResult {
    pub name: PackageName,
    pub version: Version,
}

/// One row of `list_installed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPackage {
    pub name: PackageName,
    pub version: Version,
    pub source_kind: SourceKind,
    pub installed_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated { from: Version, to: Version },
    UpToDate { version: Version },
}

/// The collaborators an engine is wired with.
#[derive(Clone)]
pub struct Components {
    pub index: Arc<dyn IndexTransport>,
    pub remote: Arc<dyn RemoteTransport>,
    pub sandbox: Arc<dyn Sandbox>,
    pub reporter: Arc<dyn Reporter>,
}

impl fmt::Debug for Components {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Components").finish_non_exhaustive()
    }
}

impl Components {
    /// Default HTTP transports and the shell sandbox.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SourceUnavailable`] if an HTTP client cannot
    /// be constructed.
    pub fn from_settings(settings: &Settings, reporter: Arc<dyn Reporter>) -> Result<Self> {
        let index = HttpIndex::new(&settings.index_url)
            .map_err(|e| EngineError::SourceUnavailable(e.to_string()))?;
        let remote = GitHubTransport::new(&settings.github_api_url)
            .map_err(|e| EngineError::SourceUnavailable(e.to_string()))?;
        Ok(Self {
            index: Arc::new(index),
            remote: Arc::new(remote),
            sandbox: Arc::new(ShellSandbox::new()),
            reporter,
        })
    }
}

struct Inner {
    settings: Settings,
    registry: Registry,
    sources: Sources,
    fetcher: Fetcher,
    builder: Builder,
    reporter: Arc<dyn Reporter>,
    /// Held from the final name and path checks until the commit, so that
    /// staged files are promoted by one install at a time.
    commit_lock: tokio::sync::Mutex<()>,
}

/// A successful build waiting for the commit lock.
struct Prepared {
    name: PackageName,
    version: Version,
    source_kind: SourceKind,
    output: BuildOutput,
}

#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("home", &self.inner.settings.home)
            .finish_non_exhaustive()
    }
}

fn join_error(e: tokio::task::JoinError) -> EngineError {
    EngineError::Io(std::io::Error::other(e))
}

impl Engine {
    /// Open the registry under `settings.home` and wire default components.
    ///
    /// # Errors
    ///
    /// Fails if the registry cannot be opened or HTTP clients cannot be
    /// built.
    pub fn open(settings: Settings, reporter: Arc<dyn Reporter>) -> Result<Self> {
        let registry = Registry::open(&settings.registry_path())?;
        let components = Components::from_settings(&settings, reporter)?;
        Ok(Self::with_components(settings, registry, components))
    }

    pub fn with_components(settings: Settings, registry: Registry, components: Components) -> Self {
        let Components {
            index,
            remote,
            sandbox,
            reporter,
        } = components;
        let tmp = settings.tmp_path();

        let inner = Inner {
            fetcher: Fetcher::new(index.clone(), remote.clone(), tmp.clone(), reporter.clone()),
            builder: Builder::new(sandbox, tmp),
            sources: Sources::new(index, remote),
            registry,
            reporter,
            settings,
            commit_lock: tokio::sync::Mutex::new(()),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    fn step_deadline(&self) -> Option<Instant> {
        self.inner
            .settings
            .operation_timeout()
            .map(|timeout| Instant::now() + timeout)
    }

    async fn resolve(&self, spec: &PackageSpec) -> Result<DistributionDescriptor> {
        let provider = self.inner.sources.provider_for(spec.kind());
        let dist = provider.resolve(spec, spec.version_constraint()).await?;
        tracing::debug!(
            spec = %spec,
            name = %dist.name,
            version = %dist.version,
            source = %dist.source_kind,
            "resolved"
        );
        Ok(dist)
    }

    /// Install a package from a raw specifier.
    ///
    /// # Errors
    ///
    /// Any stage failure aborts the install with no registry change.
    pub async fn install(&self, raw_spec: &str) -> Result<InstallResult> {
        let spec = PackageSpec::parse(raw_spec)?;
        self.install_spec(&spec).await
    }

    /// Install an already parsed specifier.
    ///
    /// # Errors
    ///
    /// Any stage failure aborts the install with no registry change.
    /// [`ConflictError::NameTaken`] if the name (as resolved, or as declared
    /// by a remote build descriptor) is already installed, and
    /// [`ConflictError::PathsOwned`] if the build produced paths another
    /// package owns.
    pub async fn install_spec(&self, spec: &PackageSpec) -> Result<InstallResult> {
        let dist = self.resolve(spec).await?;
        // Checked again under the commit lock; this only avoids a wasted fetch.
        self.ensure_not_installed(&dist.name).await?;
        let prepared = self.prepare(dist).await?;

        let _guard = self.inner.commit_lock.lock().await;
        self.ensure_not_installed(&prepared.name).await?;
        self.check_claims(&prepared, None).await?;
        self.place(prepared).await
    }

    /// Fetch and build `dist` into a staging area. Nothing outside the
    /// scratch directory is touched.
    async fn prepare(&self, dist: DistributionDescriptor) -> Result<Prepared> {
        let inner = &self.inner;
        inner
            .reporter
            .resolved(&dist.name, &dist.version, dist.source_kind);

        let artifact = inner.fetcher.fetch(&dist, self.step_deadline()).await?;

        inner.reporter.building(&dist.name, &dist.version);
        let output = self.build(artifact).await?;

        let (name, version) = final_identity(&dist, &output);
        Ok(Prepared {
            name,
            version,
            source_kind: dist.source_kind,
            output,
        })
    }

    /// Promote a staged build and commit it. Callers hold the commit lock
    /// and have already checked the name and the claimed paths.
    async fn place(&self, prepared: Prepared) -> Result<InstallResult> {
        let inner = &self.inner;
        let Prepared {
            name,
            version,
            source_kind,
            output,
        } = prepared;

        let packages_root = inner.settings.packages_path();
        let (output, placed) = tokio::task::spawn_blocking(move || {
            let placed = output.promote(&packages_root);
            (output, placed)
        })
        .await
        .map_err(join_error)?;
        let placed = placed?;
        drop(output);

        match inner
            .registry
            .commit(name.clone(), version.clone(), source_kind, placed.clone())
            .await
        {
            Ok(entry) => {
                tracing::info!(%name, %version, files = entry.files.len(), "installed");
                inner.reporter.installed(&name, &version, entry.files.len());
                Ok(InstallResult { name, version })
            }
            Err(err) => {
                self.roll_back(placed).await;
                Err(err.into())
            }
        }
    }

    async fn ensure_not_installed(&self, name: &PackageName) -> Result<()> {
        match self.inner.registry.lookup(name).await {
            Ok(_) => Err(ConflictError::NameTaken(name.to_string()).into()),
            Err(RegistryError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn build(&self, artifact: FetchedArtifact) -> Result<BuildOutput> {
        let builder = self.inner.builder.clone();
        let deadline = self.step_deadline();
        tokio::task::spawn_blocking(move || builder.build(&artifact, deadline))
            .await
            .map_err(join_error)?
    }

    /// Refuse before touching the packages directory if another entry owns
    /// any path this build would claim. Paths owned by `replacing` are
    /// allowed; that entry is about to be removed.
    async fn check_claims(
        &self,
        prepared: &Prepared,
        replacing: Option<&PackageName>,
    ) -> Result<()> {
        let packages_root = self.inner.settings.packages_path();
        let mut conflicts = Vec::new();
        for path in prepared.output.claims(&packages_root) {
            let owner = self.inner.registry.owner_of(&path).await?;
            let foreign = owner.filter(|owner| replacing.is_none_or(|r| r.as_str() != owner.as_str()));
            if let Some(owner) = foreign {
                conflicts.push(PathConflict { path, owner });
            }
        }
        if conflicts.is_empty() {
            Ok(())
        } else {
            Err(ConflictError::PathsOwned(conflicts).into())
        }
    }

    /// Undo a promotion whose commit was rejected.
    async fn roll_back(&self, placed: Vec<PathBuf>) {
        match tokio::task::spawn_blocking(move || cleanup::remove_paths(&placed)).await {
            Ok(report) => {
                for warning in report.failures() {
                    tracing::warn!("{warning}");
                    self.inner.reporter.warning(&warning);
                }
            }
            Err(e) => tracing::warn!(error = %e, "rollback task failed"),
        }
    }

    /// Remove an installed package and every file it owns.
    ///
    /// # Errors
    ///
    /// [`EngineError::NotFound`] if `name` is not installed.
    pub async fn uninstall(&self, name: &str) -> Result<()> {
        let _guard = self.inner.commit_lock.lock().await;
        let entry = self.inner.registry.lookup(name).await?;
        self.remove_installed(&entry).await
    }

    /// Delete `entry`'s files deepest first, then its registry record.
    /// Callers hold the commit lock.
    async fn remove_installed(&self, entry: &RegistryEntry) -> Result<()> {
        let inner = &self.inner;
        inner.reporter.removing(&entry.name, &entry.version);

        let paths: Vec<PathBuf> = entry.files.iter().map(|f| f.path.clone()).collect();
        let report = tokio::task::spawn_blocking(move || cleanup::remove_paths(&paths))
            .await
            .map_err(join_error)?;

        for path in &report.missing {
            tracing::warn!(package = %entry.name, path = %path.display(), "file already missing, skipping");
        }
        for path in &report.kept_dirs {
            tracing::debug!(path = %path.display(), "directory not empty, left in place");
        }
        for warning in report.failures() {
            tracing::warn!(package = %entry.name, "{warning}");
            inner.reporter.warning(&warning);
        }

        inner.registry.remove(entry.name.as_str()).await?;
        tracing::info!(name = %entry.name, version = %entry.version, "removed");
        inner.reporter.removed(&entry.name, &entry.version);
        Ok(())
    }

    /// Installed packages in installation order.
    ///
    /// # Errors
    ///
    /// [`EngineError::Registry`] if the registry cannot be read.
    pub async fn list_installed(&self) -> Result<Vec<InstalledPackage>> {
        let entries = self.inner.registry.list().await?;
        Ok(entries
            .into_iter()
            .map(|e| InstalledPackage {
                name: e.name,
                version: e.version,
                source_kind: e.source_kind,
                installed_at: e.installed_at,
            })
            .collect())
    }

    /// # Errors
    ///
    /// [`EngineError::SourceUnavailable`] if the index cannot be queried.
    pub async fn search(&self, term: &str) -> Result<Vec<SearchHit>> {
        self.inner.sources.index().search(term).await
    }

    /// Versions of `name` published on the index, ascending.
    ///
    /// # Errors
    ///
    /// [`EngineError::MalformedSpec`] for an invalid name,
    /// [`EngineError::PackageNotFound`] if the index has no releases.
    pub async fn list_versions(&self, name: &str) -> Result<Vec<Version>> {
        let name = PackageName::parse(name).map_err(crate::spec::SpecError::from)?;
        let releases = self.inner.sources.index().releases(&name).await?;
        Ok(releases.into_iter().map(|r| r.version).collect())
    }

    /// Resolve and fetch `raw_spec` into `dest_dir` without building or
    /// recording anything. Returns the path of the copied artifact.
    ///
    /// # Errors
    ///
    /// Resolution and fetch errors as for [`Engine::install`], or
    /// [`EngineError::Io`] if the copy fails.
    pub async fn download(&self, raw_spec: &str, dest_dir: &Path) -> Result<PathBuf> {
        let spec = PackageSpec::parse(raw_spec)?;
        let dist = self.resolve(&spec).await?;
        self.inner
            .reporter
            .resolved(&dist.name, &dist.version, dist.source_kind);
        let artifact = self.inner.fetcher.fetch(&dist, self.step_deadline()).await?;

        let dest_dir = dest_dir.to_path_buf();
        tokio::task::spawn_blocking(move || copy_artifact(&artifact, &dest_dir))
            .await
            .map_err(join_error)?
    }

    /// Move an index-installed package to the newest published version.
    ///
    /// The new version is fetched and built before the old one is touched;
    /// the old files are removed only once the new build has succeeded and
    /// its paths are known to be free.
    ///
    /// # Errors
    ///
    /// [`EngineError::NotFound`] if `name` is not installed. Any fetch or
    /// build failure of the new version leaves the old one installed.
    pub async fn update(&self, name: &str) -> Result<UpdateOutcome> {
        let entry = self.inner.registry.lookup(name).await?;
        if entry.source_kind != SourceKind::Index {
            return Ok(UpdateOutcome::UpToDate {
                version: entry.version,
            });
        }

        let releases = self.inner.sources.index().releases(&entry.name).await?;
        let Some(latest) = releases.into_iter().map(|r| r.version).max() else {
            return Err(EngineError::PackageNotFound(entry.name.to_string()));
        };
        if latest <= entry.version || latest.is_equivalent(&entry.version) {
            return Ok(UpdateOutcome::UpToDate {
                version: entry.version,
            });
        }

        tracing::info!(name = %entry.name, from = %entry.version, to = %latest, "updating");
        let spec = PackageSpec::parse(&format!("{}=={}", entry.name, latest))?;
        let dist = self.resolve(&spec).await?;
        let prepared = self.prepare(dist).await?;

        let _guard = self.inner.commit_lock.lock().await;
        // The entry may have changed while the new version was building.
        let current = self.inner.registry.lookup(&entry.name).await?;
        if prepared.name != current.name {
            return Err(ConflictError::NameTaken(prepared.name.to_string()).into());
        }
        self.check_claims(&prepared, Some(&current.name)).await?;
        self.remove_installed(&current).await?;
        let installed = self.place(prepared).await?;
        Ok(UpdateOutcome::Updated {
            from: current.version,
            to: installed.version,
        })
    }

    /// Stop the registry actor. Further operations fail.
    pub fn close(&self) {
        self.inner.registry.close();
    }
}

/// Name and version to record. Remote snapshots may declare their own in
/// the build descriptor; other sources were already resolved from metadata.
fn final_identity(dist: &DistributionDescriptor, output: &BuildOutput) -> (PackageName, Version) {
    output
        .package()
        .filter(|_| dist.source_kind == SourceKind::Remote)
        .and_then(|meta| {
            let name = PackageName::parse(&meta.name).ok()?;
            let version = Version::parse(&meta.version).ok()?;
            Some((name, version))
        })
        .unwrap_or_else(|| (dist.name.clone(), dist.version.clone()))
}

fn copy_artifact(artifact: &FetchedArtifact, dest_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dest_dir)?;
    let file_name = artifact
        .file_name()
        .ok_or_else(|| EngineError::Fetch("artifact has no file name".to_string()))?;
    let dest = dest_dir.join(file_name);

    if artifact.local_path().is_dir() {
        let options = fs_extra::dir::CopyOptions::new().overwrite(true);
        fs_extra::dir::copy(artifact.local_path(), dest_dir, &options)
            .map_err(|e| EngineError::Fetch(e.to_string()))?;
    } else {
        std::fs::copy(artifact.local_path(), &dest)?;
    }
    Ok(dest)
}
