//! List and search output formatting
//!
//! Provides column-aligned rendering for `shelf list` and `shelf search`.

use crossterm::style::Stylize;
use shelf_core::{InstalledPackage, SearchHit};

const NAME_WIDTH: usize = 24;
const VERSION_WIDTH: usize = 14;

/// Render the rows of `shelf list`, header included.
pub fn installed_rows(packages: &[InstalledPackage]) -> Vec<String> {
    let mut lines = Vec::with_capacity(packages.len() + 1);
    let header = format!(
        "{:<NAME_WIDTH$} {:<VERSION_WIDTH$} {:<8} installed",
        "name", "version", "source"
    );
    lines.push(header.dark_grey().to_string());

    for pkg in packages {
        let date = chrono::DateTime::from_timestamp(pkg.installed_at, 0)
            .unwrap_or_default()
            .format("%Y-%m-%d")
            .to_string();
        let name = format!("{:<NAME_WIDTH$}", pkg.name.as_str());
        let version = format!("{:<VERSION_WIDTH$}", pkg.version.as_str());
        let source = format!("{:<8}", pkg.source_kind.as_str());
        lines.push(format!(
            "{} {} {} {}",
            name.cyan(),
            version,
            source.dark_grey(),
            date.dark_grey()
        ));
    }
    lines
}

/// Render search hits, one per line.
pub fn search_rows(hits: &[SearchHit]) -> Vec<String> {
    hits.iter()
        .map(|hit| {
            let name = format!("{:<NAME_WIDTH$}", hit.name);
            format!("{} - {}", name.cyan(), hit.description)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use shelf_schema::{PackageName, SourceKind, Version};

    #[test]
    fn test_installed_rows_keep_order() {
        let packages = vec![
            InstalledPackage {
                name: PackageName::new("zeta"),
                version: Version::parse("0.1").unwrap(),
                source_kind: SourceKind::Index,
                installed_at: 0,
            },
            InstalledPackage {
                name: PackageName::new("alpha"),
                version: Version::parse("2.0").unwrap(),
                source_kind: SourceKind::Local,
                installed_at: 0,
            },
        ];
        let rows = installed_rows(&packages);
        assert_eq!(rows.len(), 3);
        assert!(rows[1].contains("zeta"));
        assert!(rows[2].contains("alpha"));
        assert!(rows[2].contains("1970-01-01"));
    }

    #[test]
    fn test_search_rows() {
        let rows = search_rows(&[SearchHit {
            name: "rsa".into(),
            description: "Pure-Python RSA".into(),
        }]);
        assert!(rows[0].ends_with("- Pure-Python RSA"));
    }
}
