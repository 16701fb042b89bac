//! shelf - a build-from-source package installer
//!
//! Installs packages from a PyPI-style index, local archives or
//! `owner/repo` snapshots by running each distribution's `shelf.toml` build
//! script and recording exactly the files it produced.
//!
//! # Directory Layout
//!
//! ```text
//! ~/.shelf/
//! ├── packages/    # $PREFIX for every build (bin/, lib/, ...)
//! ├── tmp/         # Scoped download and build areas
//! ├── config.toml  # Optional settings
//! └── registry.db  # SQLite registry of installed files
//! ```

#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]

pub mod cmd;
pub mod ui;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use shelf_core::{Engine, Reporter, Settings};

#[derive(Debug, Parser)]
#[command(name = "shelf")]
#[command(author, version, about = "shelf - build-from-source package installer")]
pub struct Cli {
    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress progress output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Root directory for the registry and installed packages
    #[arg(long, global = true, env = "SHELF_HOME")]
    pub home: Option<PathBuf>,

    /// Base URL of the package index
    #[arg(long, global = true, env = "SHELF_INDEX_URL")]
    pub index_url: Option<String>,

    /// Base URL of the GitHub API for owner/repo specifiers
    #[arg(long, global = true, env = "SHELF_GITHUB_API_URL")]
    pub github_api_url: Option<String>,

    /// Per-step deadline in seconds for fetch and build (0 disables)
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Install packages
    Install {
        /// name, name==version, path to an archive or directory, or owner/repo[@ref]
        #[arg(required = true)]
        packages: Vec<String>,
    },
    /// Uninstall packages
    #[command(alias = "remove")]
    Uninstall {
        /// Package name(s)
        #[arg(required = true)]
        packages: Vec<String>,
    },
    /// List installed packages
    List,
    /// Search the package index
    Search {
        /// Search term
        term: String,
    },
    /// List versions published on the index
    Versions {
        /// Package name
        package: String,
    },
    /// Download distributions without installing them
    Download {
        /// Package specifier(s)
        #[arg(required = true)]
        packages: Vec<String>,
        /// Destination directory
        #[arg(short, long, default_value = ".")]
        dest: PathBuf,
    },
    /// Update index-installed packages to their newest version
    Update {
        /// Package name(s); all installed packages when empty
        packages: Vec<String>,
    },
}

impl Cli {
    /// Resolve settings: config file and environment, then flags.
    pub fn settings(&self) -> Result<Settings> {
        let mut settings = match &self.home {
            Some(home) => Settings::load_from(home.clone()),
            None => Settings::load(),
        }
        .context("Failed to load settings")?;

        if let Some(url) = &self.index_url {
            settings.index_url.clone_from(url);
        }
        if let Some(url) = &self.github_api_url {
            settings.github_api_url.clone_from(url);
        }
        if let Some(secs) = self.timeout {
            settings.operation_timeout_secs = secs;
        }
        Ok(settings)
    }

    /// Open an engine wired with the default transports.
    pub fn engine(&self, reporter: std::sync::Arc<dyn Reporter>) -> Result<Engine> {
        let settings = self.settings()?;
        let home = settings.home().display().to_string();
        Engine::open(settings, reporter).with_context(|| format!("Failed to open registry in {home}"))
    }
}
