//! Console reporter.
//!
//! Progress lines go to stdout, warnings and errors to stderr. Download
//! progress is announced once per package rather than per chunk.

use std::collections::HashSet;
use std::sync::Mutex;

use crossterm::style::Stylize;
use shelf_core::Reporter;
use shelf_schema::{PackageName, SourceKind, Version};

/// Reporter that prints to the terminal.
#[derive(Debug, Default)]
pub struct Output {
    quiet: bool,
    downloads: Mutex<HashSet<String>>,
}

impl Output {
    pub fn new(quiet: bool) -> Self {
        Self {
            quiet,
            downloads: Mutex::new(HashSet::new()),
        }
    }

    pub fn info(&self, msg: &str) {
        if !self.quiet {
            println!("{msg}");
        }
    }

    pub fn success(&self, msg: &str) {
        if !self.quiet {
            println!("{} {msg}", "✓".green());
        }
    }

    /// Errors are printed even in quiet mode.
    pub fn error(&self, msg: &str) {
        eprintln!("{} {msg}", "error:".red().bold());
    }

    /// Announce the first chunk of a download; returns whether it printed.
    fn first_chunk(&self, name: &PackageName, version: &Version) -> bool {
        let key = format!("{name}=={version}");
        self.downloads
            .lock()
            .map(|mut seen| seen.insert(key))
            .unwrap_or(false)
    }
}

impl Reporter for Output {
    fn resolved(&self, name: &PackageName, version: &Version, source: SourceKind) {
        self.info(&format!(
            "Collecting {} {} {}",
            name.as_str().cyan(),
            version.as_str().dark_grey(),
            format!("({source})").dark_grey()
        ));
    }

    fn downloading(&self, name: &PackageName, version: &Version, current: u64, total: Option<u64>) {
        if self.first_chunk(name, version) {
            let size = total.map(|t| format!(" ({})", format_size(t))).unwrap_or_default();
            self.info(&format!("  Downloading package{size}"));
        }
        tracing::trace!(%name, current, ?total, "download progress");
    }

    fn building(&self, _name: &PackageName, _version: &Version) {
        self.info("  Running setup file");
    }

    fn installed(&self, name: &PackageName, version: &Version, files: usize) {
        self.success(&format!(
            "Package installed: {} {} {}",
            name.as_str().cyan(),
            version.as_str(),
            format!("({files} files)").dark_grey()
        ));
    }

    fn removing(&self, name: &PackageName, version: &Version) {
        self.info(&format!("Uninstalling {} {}", name.as_str().cyan(), version));
    }

    fn removed(&self, name: &PackageName, version: &Version) {
        self.success(&format!("Successfully uninstalled {name}-{version}"));
    }

    fn warning(&self, msg: &str) {
        eprintln!("{} {msg}", "warning:".yellow().bold());
    }
}

/// Format bytes for human-readable display
#[allow(clippy::cast_precision_loss)]
pub fn format_size(bytes: u64) -> String {
    let kb = bytes as f64 / 1024.0;
    let mb = kb / 1024.0;
    if mb >= 1024.0 {
        format!("{:.1} GB", mb / 1024.0)
    } else if kb >= 1024.0 {
        format!("{mb:.1} MB")
    } else if kb >= 1.0 {
        format!("{kb:.1} KB")
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_download_announced_once() {
        let output = Output::new(true);
        let name = PackageName::new("rsa");
        let version = Version::parse("3.4.2").unwrap();
        assert!(output.first_chunk(&name, &version));
        assert!(!output.first_chunk(&name, &version));

        let other = Version::parse("3.5.0").unwrap();
        assert!(output.first_chunk(&name, &other));
    }
}
