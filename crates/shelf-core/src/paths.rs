use dirs::home_dir;
use std::path::{Path, PathBuf};

/// Environment variable overriding the shelf home directory.
pub const HOME_ENV: &str = "SHELF_HOME";

/// Returns the primary shelf directory, or None if the user's home cannot be resolved.
pub fn try_shelf_home() -> Option<PathBuf> {
    if let Ok(val) = std::env::var(HOME_ENV) {
        return Some(PathBuf::from(val));
    }
    home_dir().map(|h| h.join(".shelf"))
}

/// Registry database inside a shelf home: `<home>/registry.db`
pub fn registry_path(home: &Path) -> PathBuf {
    home.join("registry.db")
}

/// Build write target inside a shelf home: `<home>/packages`
pub fn packages_path(home: &Path) -> PathBuf {
    home.join("packages")
}

/// Executables installed by build scripts: `<home>/packages/bin`
pub fn bin_path(home: &Path) -> PathBuf {
    packages_path(home).join("bin")
}

/// Scratch space for downloads and unpacking: `<home>/tmp`
pub fn tmp_path(home: &Path) -> PathBuf {
    home.join("tmp")
}

/// Optional configuration file: `<home>/config.toml`
pub fn config_path(home: &Path) -> PathBuf {
    home.join("config.toml")
}

/// Extract the filename from a URL.
pub fn filename_from_url(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.split('/').next_back().unwrap_or("")
}
