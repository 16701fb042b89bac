//! Best-effort removal of recorded paths.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// What happened while removing a set of paths.
#[derive(Debug, Default)]
pub struct RemovalReport {
    pub removed: Vec<PathBuf>,
    /// Paths that were already gone.
    pub missing: Vec<PathBuf>,
    /// Directories left in place because something else still lives there.
    pub kept_dirs: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, io::Error)>,
}

impl RemovalReport {
    /// Human-readable lines for everything that could not be removed.
    pub fn failures(&self) -> Vec<String> {
        self.failed
            .iter()
            .map(|(path, e)| format!("could not remove {}: {e}", path.display()))
            .collect()
    }
}

fn depth(path: &Path) -> usize {
    path.components().count()
}

/// Remove `paths`, deepest first. Files and symlinks are unlinked,
/// directories are removed only when empty. Never stops early.
pub fn remove_paths(paths: &[PathBuf]) -> RemovalReport {
    let mut ordered: Vec<&PathBuf> = paths.iter().collect();
    ordered.sort_by_key(|p| std::cmp::Reverse(depth(p)));

    let mut report = RemovalReport::default();
    for path in ordered {
        let meta = match path.symlink_metadata() {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                report.missing.push(path.clone());
                continue;
            }
            Err(e) => {
                report.failed.push((path.clone(), e));
                continue;
            }
        };

        if meta.is_dir() {
            let empty = fs::read_dir(path).map(|mut it| it.next().is_none());
            match empty {
                Ok(true) => match fs::remove_dir(path) {
                    Ok(()) => report.removed.push(path.clone()),
                    Err(e) => report.failed.push((path.clone(), e)),
                },
                Ok(false) => report.kept_dirs.push(path.clone()),
                Err(e) => report.failed.push((path.clone(), e)),
            }
        } else {
            match fs::remove_file(path) {
                Ok(()) => report.removed.push(path.clone()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => report.missing.push(path.clone()),
                Err(e) => report.failed.push((path.clone(), e)),
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_removes_deepest_first_and_tolerates_missing() {
        let dir = tempdir().unwrap();
        let bin = dir.path().join("bin");
        let tool = bin.join("tool");
        fs::create_dir(&bin).unwrap();
        fs::write(&tool, "x").unwrap();
        let ghost = dir.path().join("ghost");

        let report = remove_paths(&[bin.clone(), ghost.clone(), tool.clone()]);
        assert_eq!(report.removed, vec![tool, bin.clone()]);
        assert_eq!(report.missing, vec![ghost]);
        assert!(report.failed.is_empty());
        assert!(!bin.exists());
    }

    #[test]
    fn test_keeps_shared_directories() {
        let dir = tempdir().unwrap();
        let bin = dir.path().join("bin");
        fs::create_dir(&bin).unwrap();
        fs::write(bin.join("other"), "x").unwrap();

        let report = remove_paths(std::slice::from_ref(&bin));
        assert_eq!(report.kept_dirs, vec![bin.clone()]);
        assert!(bin.join("other").exists());
    }
}
