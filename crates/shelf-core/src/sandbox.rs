//! Execution sandbox for build scripts.
//!
//! The [`Sandbox`] contract: run a script with a pinned working directory
//! and writable root, wait at most until a deadline, and report the paths it
//! touched under the writable root. [`ShellSandbox`] is the default
//! implementation.
//!
//! ## Environment contract
//!
//! Scripts run under `sh -c` with a cleared environment and exactly these
//! variables:
//!
//! | Variable | Value |
//! |---|---|
//! | `PATH` | `/usr/local/bin:/usr/bin:/bin:/usr/sbin:/sbin` |
//! | `HOME` | The working directory |
//! | `TERM` | `dumb` |
//! | `LANG` | `C.UTF-8` |
//! | `PREFIX` | The writable root |
//! | `JOBS` | Logical CPU count |
//! | `SOURCE_DATE_EPOCH` | `0` |

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Instant, SystemTime};

use thiserror::Error;
use wait_timeout::ChildExt;

const SYSTEM_PATH: &str = "/usr/local/bin:/usr/bin:/bin:/usr/sbin:/sbin";

/// Captured output beyond this many bytes is cut from the front.
const MAX_OUTPUT: u64 = 4 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("failed to start build shell: {0}")]
    Spawn(io::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// What to run and where.
#[derive(Debug, Clone)]
pub struct SandboxRequest<'a> {
    pub script: &'a str,
    pub working_dir: &'a Path,
    pub write_root: &'a Path,
    pub deadline: Option<Instant>,
}

/// A path under the writable root that the script created or modified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TouchedPath {
    pub path: PathBuf,
    /// `false` if the path existed before and was modified.
    pub created: bool,
}

#[derive(Debug, Clone)]
pub struct SandboxOutcome {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    /// Combined stdout and stderr.
    pub output: String,
    /// Touched paths in creation order.
    pub touched: Vec<TouchedPath>,
}

/// Runs build scripts. Implementations block; callers move them onto a
/// blocking thread.
pub trait Sandbox: Send + Sync {
    fn run(&self, request: &SandboxRequest<'_>) -> Result<SandboxOutcome, SandboxError>;
}

/// Sandbox backed by the host shell with a sanitised environment.
#[derive(Debug, Clone)]
pub struct ShellSandbox {
    shell: PathBuf,
}

impl Default for ShellSandbox {
    fn default() -> Self {
        Self::new()
    }
}

impl ShellSandbox {
    pub fn new() -> Self {
        let shell = which::which("sh").unwrap_or_else(|_| PathBuf::from("/bin/sh"));
        Self { shell }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Stamp {
    is_dir: bool,
    len: u64,
    modified: Option<SystemTime>,
}

fn snapshot(root: &Path) -> HashMap<PathBuf, Stamp> {
    walkdir::WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let meta = entry.path().symlink_metadata().ok()?;
            let stamp = Stamp {
                is_dir: meta.is_dir(),
                len: meta.len(),
                modified: meta.modified().ok(),
            };
            Some((entry.into_path(), stamp))
        })
        .collect()
}

fn creation_time(path: &Path) -> Option<SystemTime> {
    let meta = path.symlink_metadata().ok()?;
    meta.created().or_else(|_| meta.modified()).ok()
}

/// Compare two snapshots of the same root.
///
/// New paths are reported as created; existing files whose size or mtime
/// changed are reported as modified. Existing directories are never
/// reported. Ordered by creation time, parents before children on ties.
fn diff(before: &HashMap<PathBuf, Stamp>, after: HashMap<PathBuf, Stamp>) -> Vec<TouchedPath> {
    let mut touched: Vec<(Option<SystemTime>, usize, TouchedPath)> = after
        .into_iter()
        .filter_map(|(path, stamp)| {
            let created = match before.get(&path) {
                None => true,
                Some(old) if !stamp.is_dir && !old.is_dir && *old != stamp => false,
                Some(_) => return None,
            };
            let depth = path.components().count();
            Some((creation_time(&path), depth, TouchedPath { path, created }))
        })
        .collect();

    touched.sort_by(|a, b| {
        a.0.cmp(&b.0)
            .then(a.1.cmp(&b.1))
            .then_with(|| a.2.path.cmp(&b.2.path))
    });
    touched.into_iter().map(|(_, _, t)| t).collect()
}

/// Read a captured log, keeping the tail if it is very large.
fn read_output(file: &mut File) -> io::Result<String> {
    let len = file.metadata()?.len();
    let start = len.saturating_sub(MAX_OUTPUT);
    file.seek(SeekFrom::Start(start))?;

    let mut buffer = Vec::new();
    file.read_to_end(&mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

impl Sandbox for ShellSandbox {
    fn run(&self, request: &SandboxRequest<'_>) -> Result<SandboxOutcome, SandboxError> {
        fs::create_dir_all(request.write_root)?;
        let before = snapshot(request.write_root);

        let mut log = tempfile::tempfile()?;
        let mut cmd = Command::new(&self.shell);
        cmd.env_clear()
            .arg("-c")
            .arg(request.script)
            .current_dir(request.working_dir)
            .env("PATH", SYSTEM_PATH)
            .env("HOME", request.working_dir)
            .env("TERM", "dumb")
            .env("LANG", "C.UTF-8")
            .env("PREFIX", request.write_root)
            .env("JOBS", num_cpus::get().to_string())
            .env("SOURCE_DATE_EPOCH", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log.try_clone()?));

        tracing::debug!(cwd = %request.working_dir.display(), "running build script");
        let mut child = cmd.spawn().map_err(SandboxError::Spawn)?;

        let (status, timed_out) = match request.deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match child.wait_timeout(remaining)? {
                    Some(status) => (status, false),
                    None => {
                        tracing::debug!(pid = child.id(), "build deadline reached, killing");
                        child.kill().ok();
                        (child.wait()?, true)
                    }
                }
            }
            None => (child.wait()?, false),
        };

        let output = read_output(&mut log)?;
        let touched = diff(&before, snapshot(request.write_root));

        Ok(SandboxOutcome {
            success: status.success() && !timed_out,
            exit_code: status.code(),
            timed_out,
            output,
            touched,
        })
    }
}
