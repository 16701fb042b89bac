//! Registry - the durable record of installed packages and the files they own.
//!
//! SQLite connections are not `Sync`, so the store lives on a dedicated
//! background thread and every request is a message. That thread is the
//! single writer: two racing commits for the same name are applied one after
//! the other and the second one fails the name check.
//!
//! A [`Registry`] is an explicit handle, opened at engine start and closed at
//! shutdown, so several isolated registries can coexist in one process.

mod db;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;

use shelf_schema::{PackageName, SourceKind, Version};
use thiserror::Error;
use tokio::sync::oneshot;

pub use db::RegistryDb;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("registry is closed")]
    ActorDied,

    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error("package not installed: {0}")]
    NotFound(String),

    #[error("corrupt registry record: {0}")]
    Corrupt(String),
}

/// Why a commit was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConflictError {
    #[error("package {0} is already installed; uninstall it first")]
    NameTaken(String),

    #[error("{}", describe_conflicts(.0))]
    PathsOwned(Vec<PathConflict>),
}

/// A path that another package already owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathConflict {
    pub path: PathBuf,
    pub owner: String,
}

fn describe_conflicts(conflicts: &[PathConflict]) -> String {
    match conflicts {
        [] => "path conflict".to_string(),
        [only] => format!("{} is already owned by {}", only.path.display(), only.owner),
        [first, rest @ ..] => format!(
            "{} is already owned by {} (and {} more)",
            first.path.display(),
            first.owner,
            rest.len()
        ),
    }
}

/// A filesystem path written by a build, tagged with its owning package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledFile {
    pub path: PathBuf,
    pub package: PackageName,
}

/// One installed package.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub name: PackageName,
    pub version: Version,
    pub source_kind: SourceKind,
    /// Files in the order the build created them.
    pub files: Vec<InstalledFile>,
    /// Unix timestamp (seconds) of the commit.
    pub installed_at: i64,
}

/// Events that can be sent to the registry actor
enum RegistryEvent {
    Commit {
        name: PackageName,
        version: Version,
        source_kind: SourceKind,
        files: Vec<PathBuf>,
        resp: oneshot::Sender<Result<RegistryEntry, RegistryError>>,
    },
    Lookup {
        name: String,
        resp: oneshot::Sender<Result<RegistryEntry, RegistryError>>,
    },
    Remove {
        name: String,
        resp: oneshot::Sender<Result<(), RegistryError>>,
    },
    List {
        resp: oneshot::Sender<Result<Vec<RegistryEntry>, RegistryError>>,
    },
    OwnerOf {
        path: PathBuf,
        resp: oneshot::Sender<Result<Option<String>, RegistryError>>,
    },
    Shutdown,
}

impl fmt::Debug for RegistryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Commit { name, version, .. } => f
                .debug_struct("Commit")
                .field("name", name)
                .field("version", version)
                .finish_non_exhaustive(),
            Self::Lookup { name, .. } => f
                .debug_struct("Lookup")
                .field("name", name)
                .finish_non_exhaustive(),
            Self::Remove { name, .. } => f
                .debug_struct("Remove")
                .field("name", name)
                .finish_non_exhaustive(),
            Self::List { .. } => write!(f, "List"),
            Self::OwnerOf { path, .. } => f
                .debug_struct("OwnerOf")
                .field("path", path)
                .finish_non_exhaustive(),
            Self::Shutdown => write!(f, "Shutdown"),
        }
    }
}

/// A handle to the registry actor that is Send + Sync and Clone.
#[derive(Clone)]
pub struct Registry {
    sender: mpsc::Sender<RegistryEvent>,
    worker: Arc<Mutex<Option<thread::JoinHandle<()>>>>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry").finish_non_exhaustive()
    }
}

impl Registry {
    /// Open (or create) the registry at `path` and spawn its actor thread.
    ///
    /// # Errors
    ///
    /// Fails if the database cannot be opened or its schema applied, or if
    /// the actor thread cannot be spawned.
    pub fn open(path: &Path) -> Result<Self, RegistryError> {
        let db = RegistryDb::open_at(path)?;
        tracing::debug!(path = %path.display(), "registry opened");
        Self::spawn(db).map_err(RegistryError::from)
    }

    /// Spawn an actor around an already opened store.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the actor thread cannot be started.
    pub fn spawn(db: RegistryDb) -> std::io::Result<Self> {
        let (sender, receiver) = mpsc::channel();
        let worker = thread::Builder::new()
            .name("shelf-registry".into())
            .spawn(move || run_registry_event_loop(db, receiver))?;

        Ok(Self {
            sender,
            worker: Arc::new(Mutex::new(Some(worker))),
        })
    }

    /// Helper to send a request and wait for the response
    async fn request<T, F>(&self, f: F) -> Result<T, RegistryError>
    where
        F: FnOnce(oneshot::Sender<Result<T, RegistryError>>) -> RegistryEvent,
    {
        let (tx, rx) = oneshot::channel();
        self.sender.send(f(tx)).map_err(|_| RegistryError::ActorDied)?;
        rx.await.map_err(|_| RegistryError::ActorDied)?
    }

    /// Persist a new entry.
    ///
    /// # Errors
    ///
    /// [`RegistryError::Conflict`] if the name is already installed or any
    /// path belongs to another package; [`RegistryError::ActorDied`] after
    /// [`Registry::close`].
    pub async fn commit(
        &self,
        name: PackageName,
        version: Version,
        source_kind: SourceKind,
        files: Vec<PathBuf>,
    ) -> Result<RegistryEntry, RegistryError> {
        self.request(|resp| RegistryEvent::Commit {
            name,
            version,
            source_kind,
            files,
            resp,
        })
        .await
    }

    /// Fetch the entry for `name`.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] if `name` is not installed.
    pub async fn lookup(&self, name: &str) -> Result<RegistryEntry, RegistryError> {
        let name = name.to_lowercase();
        self.request(|resp| RegistryEvent::Lookup { name, resp })
            .await
    }

    /// Delete the entry for `name` and its file records.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] if `name` is not installed.
    pub async fn remove(&self, name: &str) -> Result<(), RegistryError> {
        let name = name.to_lowercase();
        self.request(|resp| RegistryEvent::Remove { name, resp })
            .await
    }

    /// All entries in insertion order.
    ///
    /// # Errors
    ///
    /// Store errors, or [`RegistryError::ActorDied`] after [`Registry::close`].
    pub async fn list(&self) -> Result<Vec<RegistryEntry>, RegistryError> {
        self.request(|resp| RegistryEvent::List { resp }).await
    }

    /// Name of the package that owns `path`, if any.
    ///
    /// # Errors
    ///
    /// Store errors, or [`RegistryError::ActorDied`] after [`Registry::close`].
    pub async fn owner_of(&self, path: &Path) -> Result<Option<String>, RegistryError> {
        let path = path.to_path_buf();
        self.request(|resp| RegistryEvent::OwnerOf { path, resp })
            .await
    }

    /// Stop the actor and wait for it to release the database.
    ///
    /// Other clones of this handle fail with [`RegistryError::ActorDied`]
    /// afterwards.
    pub fn close(&self) {
        let _ = self.sender.send(RegistryEvent::Shutdown);
        let handle = self
            .worker
            .lock()
            .map(|mut guard| guard.take())
            .unwrap_or_default();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::warn!("registry thread panicked during shutdown");
            }
        }
    }
}

/// The actual event loop running in the background thread
// The db and receiver are moved into this thread so the actor owns them exclusively.
#[allow(clippy::needless_pass_by_value)]
fn run_registry_event_loop(mut db: RegistryDb, receiver: mpsc::Receiver<RegistryEvent>) {
    while let Ok(event) = receiver.recv() {
        match event {
            RegistryEvent::Commit {
                name,
                version,
                source_kind,
                files,
                resp,
            } => {
                let _ = resp.send(db.commit(&name, &version, source_kind, &files));
            }
            RegistryEvent::Lookup { name, resp } => {
                let _ = resp.send(db.lookup(&name));
            }
            RegistryEvent::Remove { name, resp } => {
                let _ = resp.send(db.remove(&name));
            }
            RegistryEvent::List { resp } => {
                let _ = resp.send(db.list());
            }
            RegistryEvent::OwnerOf { path, resp } => {
                let _ = resp.send(db.owner_of(&path));
            }
            RegistryEvent::Shutdown => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_actor_round_trip() {
        let registry = Registry::spawn(RegistryDb::open_in_memory().unwrap()).unwrap();
        registry
            .commit(
                PackageName::new("rsa"),
                Version::parse("3.4.2").unwrap(),
                SourceKind::Index,
                vec![PathBuf::from("/p/rsa/__init__.py")],
            )
            .await
            .unwrap();

        let entry = registry.lookup("RSA").await.unwrap();
        assert_eq!(entry.version.as_str(), "3.4.2");
        assert_eq!(entry.files[0].package, "rsa");

        registry.remove("rsa").await.unwrap();
        assert!(matches!(
            registry.remove("rsa").await,
            Err(RegistryError::NotFound(_))
        ));
        registry.close();
    }

    #[tokio::test]
    async fn test_racing_commits_have_one_winner() {
        let registry = Registry::spawn(RegistryDb::open_in_memory().unwrap()).unwrap();
        let mut set = tokio::task::JoinSet::new();
        for i in 0..8 {
            let registry = registry.clone();
            set.spawn(async move {
                registry
                    .commit(
                        PackageName::new("racy"),
                        Version::parse(&format!("1.{i}")).unwrap(),
                        SourceKind::Index,
                        vec![PathBuf::from(format!("/p/racy-{i}"))],
                    )
                    .await
            });
        }

        let mut winners = 0;
        while let Some(res) = set.join_next().await {
            match res.unwrap() {
                Ok(_) => winners += 1,
                Err(RegistryError::Conflict(ConflictError::NameTaken(_))) => {}
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(registry.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_spawn_keeps_worker_until_close() {
        let registry = Registry::spawn(RegistryDb::open_in_memory().unwrap()).unwrap();
        assert!(registry.worker.lock().unwrap().is_some());
        assert!(registry.list().await.unwrap().is_empty());

        registry.close();
        assert!(registry.worker.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_closed_registry_reports_actor_died() {
        let tmp = tempdir().unwrap();
        let registry = Registry::open(&tmp.path().join("registry.db")).unwrap();
        registry.close();
        assert!(matches!(
            registry.list().await,
            Err(RegistryError::ActorDied)
        ));
    }
}
