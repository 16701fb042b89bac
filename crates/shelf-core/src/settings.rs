//! Engine configuration.
//!
//! Resolution order, lowest to highest precedence: built-in defaults,
//! `<home>/config.toml`, environment variables, then whatever the caller
//! (usually CLI flags) sets on the returned struct.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::paths;

/// Default package index (PyPI-compatible JSON API).
pub const DEFAULT_INDEX_URL: &str = "https://pypi.org";

/// Default GitHub REST API endpoint.
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";

/// Default bound on a single fetch or build step.
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 600;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("could not determine home directory; set {} to override", paths::HOME_ENV)]
    NoHome,

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Runtime settings for an [`Engine`](crate::Engine).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Root directory holding the registry, packages and scratch space.
    #[serde(skip)]
    pub home: PathBuf,
    /// Base URL of the package index.
    pub index_url: String,
    /// Base URL of the GitHub API used for `owner/repo` specifiers.
    pub github_api_url: String,
    /// Deadline applied to each fetch and build step; `0` disables it.
    pub operation_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            home: PathBuf::new(),
            index_url: DEFAULT_INDEX_URL.to_string(),
            github_api_url: DEFAULT_GITHUB_API_URL.to_string(),
            operation_timeout_secs: DEFAULT_OPERATION_TIMEOUT_SECS,
        }
    }
}

impl Settings {
    /// Defaults rooted at `home`, ignoring config files and environment.
    pub fn for_home(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            ..Self::default()
        }
    }

    /// Load settings for the default home (`SHELF_HOME` or `~/.shelf`).
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::NoHome`] if no home directory can be
    /// determined, or an error if the config file exists but is unreadable.
    pub fn load() -> Result<Self, SettingsError> {
        let home = paths::try_shelf_home().ok_or(SettingsError::NoHome)?;
        Self::load_from(home)
    }

    /// Load settings rooted at `home`, reading `config.toml` if present and
    /// applying environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be read or
    /// parsed.
    pub fn load_from(home: PathBuf) -> Result<Self, SettingsError> {
        let path = paths::config_path(&home);
        let mut settings = if path.is_file() {
            let text = std::fs::read_to_string(&path).map_err(|source| SettingsError::Io {
                path: path.clone(),
                source,
            })?;
            toml::from_str::<Self>(&text).map_err(|source| SettingsError::Parse {
                path: path.clone(),
                source,
            })?
        } else {
            Self::default()
        };
        settings.home = home;
        settings.apply_env();
        tracing::debug!(home = %settings.home.display(), index = %settings.index_url, "settings loaded");
        Ok(settings)
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("SHELF_INDEX_URL") {
            self.index_url = url;
        }
        if let Ok(url) = std::env::var("SHELF_GITHUB_API_URL") {
            self.github_api_url = url;
        }
    }

    /// Per-step deadline, `None` when disabled.
    pub fn operation_timeout(&self) -> Option<Duration> {
        (self.operation_timeout_secs > 0).then(|| Duration::from_secs(self.operation_timeout_secs))
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn registry_path(&self) -> PathBuf {
        paths::registry_path(&self.home)
    }

    pub fn packages_path(&self) -> PathBuf {
        paths::packages_path(&self.home)
    }

    pub fn tmp_path(&self) -> PathBuf {
        paths::tmp_path(&self.home)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_without_config_file() {
        let tmp = tempdir().unwrap();
        let settings = Settings::for_home(tmp.path());
        assert_eq!(settings.github_api_url, DEFAULT_GITHUB_API_URL);
        assert_eq!(
            settings.operation_timeout(),
            Some(Duration::from_secs(DEFAULT_OPERATION_TIMEOUT_SECS))
        );
        assert_eq!(settings.registry_path(), tmp.path().join("registry.db"));
    }

    #[test]
    fn test_config_file_overrides_defaults() {
        let tmp = tempdir().unwrap();
        std::fs::write(
            tmp.path().join("config.toml"),
            "github_api_url = \"http://127.0.0.1:9\"\noperation_timeout_secs = 0\n",
        )
        .unwrap();

        let settings = Settings::load_from(tmp.path().to_path_buf()).unwrap();
        assert_eq!(settings.github_api_url, "http://127.0.0.1:9");
        assert_eq!(settings.operation_timeout(), None);
        assert_eq!(settings.home(), tmp.path());
    }

    #[test]
    fn test_broken_config_file_is_an_error() {
        let tmp = tempdir().unwrap();
        std::fs::write(tmp.path().join("config.toml"), "index_url = [").unwrap();
        assert!(matches!(
            Settings::load_from(tmp.path().to_path_buf()),
            Err(SettingsError::Parse { .. })
        ));
    }
}
