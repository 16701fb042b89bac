//! SQLite registry store
//!
//! Tracks installed packages and the files they own. Every mutation runs in
//! a single transaction, so a crash mid-write leaves either the old or the
//! new state on disk, never a mix.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OptionalExtension, params};
use shelf_schema::{PackageName, SourceKind, Version};

use super::{ConflictError, InstalledFile, PathConflict, RegistryEntry, RegistryError};

/// State database for tracking installations
#[derive(Debug)]
pub struct RegistryDb {
    conn: Connection,
}

impl RegistryDb {
    /// Open database at a specific path, creating it if needed.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be created or the schema cannot be applied.
    pub fn open_at(path: &Path) -> Result<Self, RegistryError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;

        // WAL for concurrent readers, FULL sync so a returned commit is on disk
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=FULL;
             PRAGMA foreign_keys=ON;",
        )?;

        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// Open a throwaway in-memory database (for testing)
    ///
    /// # Errors
    ///
    /// Fails if the schema cannot be applied.
    pub fn open_in_memory() -> Result<Self, RegistryError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<(), RegistryError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS packages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                version TEXT NOT NULL,
                source_kind TEXT NOT NULL,
                installed_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS files (
                path TEXT PRIMARY KEY,
                package TEXT NOT NULL REFERENCES packages(name) ON DELETE CASCADE,
                ordinal INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_files_package ON files(package, ordinal);
            ",
        )?;
        Ok(())
    }

    /// Record a package and its files.
    ///
    /// Rejects the whole entry if the name is already present or if any path
    /// is owned by another package.
    ///
    /// # Errors
    ///
    /// [`RegistryError::Conflict`] for a taken name or owned path; SQLite errors otherwise.
    pub fn commit(
        &mut self,
        name: &PackageName,
        version: &Version,
        source_kind: SourceKind,
        files: &[PathBuf],
    ) -> Result<RegistryEntry, RegistryError> {
        let tx = self.conn.transaction()?;

        let taken: Option<i64> = tx
            .query_row(
                "SELECT seq FROM packages WHERE name = ?1",
                params![name.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        if taken.is_some() {
            return Err(ConflictError::NameTaken(name.to_string()).into());
        }

        let mut seen = HashSet::new();
        let unique: Vec<&PathBuf> = files.iter().filter(|p| seen.insert(*p)).collect();

        let mut conflicts = Vec::new();
        {
            let mut owner_stmt = tx.prepare("SELECT package FROM files WHERE path = ?1")?;
            for path in &unique {
                let owner: Option<String> = owner_stmt
                    .query_row(params![path_key(path)], |row| row.get(0))
                    .optional()?;
                if let Some(owner) = owner {
                    conflicts.push(PathConflict {
                        path: (*path).clone(),
                        owner,
                    });
                }
            }
        }
        if !conflicts.is_empty() {
            return Err(ConflictError::PathsOwned(conflicts).into());
        }

        let installed_at = chrono::Utc::now().timestamp();
        tx.execute(
            "INSERT INTO packages (name, version, source_kind, installed_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                name.as_str(),
                version.as_str(),
                source_kind.as_str(),
                installed_at
            ],
        )?;
        {
            let mut insert =
                tx.prepare("INSERT INTO files (path, package, ordinal) VALUES (?1, ?2, ?3)")?;
            for (ordinal, path) in unique.iter().enumerate() {
                insert.execute(params![path_key(path), name.as_str(), ordinal as i64])?;
            }
        }
        tx.commit()?;

        Ok(RegistryEntry {
            name: name.clone(),
            version: version.clone(),
            source_kind,
            files: unique
                .into_iter()
                .map(|path| InstalledFile {
                    path: path.clone(),
                    package: name.clone(),
                })
                .collect(),
            installed_at,
        })
    }

    /// Remove a package and its file records
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] if `name` has no entry.
    pub fn remove(&mut self, name: &str) -> Result<(), RegistryError> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM files WHERE package = ?1", params![name])?;
        let deleted = tx.execute("DELETE FROM packages WHERE name = ?1", params![name])?;
        if deleted == 0 {
            return Err(RegistryError::NotFound(name.to_string()));
        }
        tx.commit()?;
        Ok(())
    }

    /// Get a package by name
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] if `name` has no entry.
    pub fn lookup(&self, name: &str) -> Result<RegistryEntry, RegistryError> {
        let row = self
            .conn
            .query_row(
                "SELECT name, version, source_kind, installed_at FROM packages WHERE name = ?1",
                params![name],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((name, version, kind, installed_at)) = row else {
            return Err(RegistryError::NotFound(name.to_string()));
        };
        self.hydrate(name, &version, &kind, installed_at)
    }

    /// List all installed packages in insertion order
    ///
    /// # Errors
    ///
    /// SQLite errors, or [`RegistryError::Corrupt`] for an unreadable row.
    pub fn list(&self) -> Result<Vec<RegistryEntry>, RegistryError> {
        let mut stmt = self.conn.prepare(
            "SELECT name, version, source_kind, installed_at FROM packages ORDER BY seq",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(name, version, kind, installed_at)| {
                self.hydrate(name, &version, &kind, installed_at)
            })
            .collect()
    }

    /// Find which package owns a file
    ///
    /// # Errors
    ///
    /// SQLite errors only.
    pub fn owner_of(&self, path: &Path) -> Result<Option<String>, RegistryError> {
        Ok(self
            .conn
            .query_row(
                "SELECT package FROM files WHERE path = ?1",
                params![path_key(path)],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn files_of(&self, package: &PackageName) -> Result<Vec<InstalledFile>, RegistryError> {
        let mut stmt = self
            .conn
            .prepare("SELECT path FROM files WHERE package = ?1 ORDER BY ordinal")?;
        let paths = stmt
            .query_map(params![package.as_str()], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(paths
            .into_iter()
            .map(|path| InstalledFile {
                path: PathBuf::from(path),
                package: package.clone(),
            })
            .collect())
    }

    fn hydrate(
        &self,
        name: String,
        version: &str,
        kind: &str,
        installed_at: i64,
    ) -> Result<RegistryEntry, RegistryError> {
        let name = PackageName::new(&name);
        let version = Version::parse(version)
            .map_err(|e| RegistryError::Corrupt(format!("{name}: {e}")))?;
        let source_kind = kind
            .parse::<SourceKind>()
            .map_err(|e| RegistryError::Corrupt(format!("{name}: {e}")))?;
        let files = self.files_of(&name)?;
        Ok(RegistryEntry {
            name,
            version,
            source_kind,
            files,
            installed_at,
        })
    }
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn name(s: &str) -> PackageName {
        PackageName::new(s)
    }

    fn ver(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_commit_and_lookup() {
        let mut db = RegistryDb::open_in_memory().unwrap();
        let files = vec![PathBuf::from("/p/bin/tool"), PathBuf::from("/p/lib/tool.py")];
        db.commit(&name("tool"), &ver("1.0"), SourceKind::Index, &files)
            .unwrap();

        let entry = db.lookup("tool").unwrap();
        assert_eq!(entry.version, ver("1.0"));
        assert_eq!(entry.source_kind, SourceKind::Index);
        let paths: Vec<_> = entry.files.iter().map(|f| f.path.clone()).collect();
        assert_eq!(paths, files);
        assert_eq!(db.owner_of(Path::new("/p/bin/tool")).unwrap().as_deref(), Some("tool"));
    }

    #[test]
    fn test_duplicate_name_is_rejected() {
        let mut db = RegistryDb::open_in_memory().unwrap();
        db.commit(&name("a"), &ver("1"), SourceKind::Index, &[])
            .unwrap();
        let err = db
            .commit(&name("a"), &ver("2"), SourceKind::Index, &[])
            .unwrap_err();
        assert!(matches!(err, RegistryError::Conflict(ConflictError::NameTaken(_))));
        assert_eq!(db.lookup("a").unwrap().version, ver("1"));
    }

    #[test]
    fn test_path_conflict_rolls_back_everything() {
        let mut db = RegistryDb::open_in_memory().unwrap();
        db.commit(&name("a"), &ver("1"), SourceKind::Local, &[PathBuf::from("/p/shared")])
            .unwrap();

        let err = db
            .commit(
                &name("b"),
                &ver("1"),
                SourceKind::Local,
                &[PathBuf::from("/p/b-only"), PathBuf::from("/p/shared")],
            )
            .unwrap_err();
        match err {
            RegistryError::Conflict(ConflictError::PathsOwned(conflicts)) => {
                assert_eq!(conflicts.len(), 1);
                assert_eq!(conflicts[0].owner, "a");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(matches!(db.lookup("b"), Err(RegistryError::NotFound(_))));
        assert_eq!(db.owner_of(Path::new("/p/b-only")).unwrap(), None);
    }

    #[test]
    fn test_remove_and_list_order() {
        let mut db = RegistryDb::open_in_memory().unwrap();
        for n in ["zeta", "alpha", "mid"] {
            db.commit(&name(n), &ver("1"), SourceKind::Index, &[PathBuf::from(format!("/p/{n}"))])
                .unwrap();
        }
        let names: Vec<String> = db.list().unwrap().into_iter().map(|e| e.name.to_string()).collect();
        assert_eq!(names, ["zeta", "alpha", "mid"]);

        db.remove("alpha").unwrap();
        assert!(matches!(db.remove("alpha"), Err(RegistryError::NotFound(_))));
        assert_eq!(db.owner_of(Path::new("/p/alpha")).unwrap(), None);
        assert_eq!(db.list().unwrap().len(), 2);
    }

    #[test]
    fn test_entries_survive_reopen() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("nested").join("registry.db");
        {
            let mut db = RegistryDb::open_at(&path).unwrap();
            db.commit(&name("keep"), &ver("2.1"), SourceKind::Remote, &[PathBuf::from("/k")])
                .unwrap();
        }
        let db = RegistryDb::open_at(&path).unwrap();
        let entry = db.lookup("keep").unwrap();
        assert_eq!(entry.source_kind, SourceKind::Remote);
        assert_eq!(entry.files.len(), 1);
    }
}
