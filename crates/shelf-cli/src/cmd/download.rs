//! Download command
use std::path::Path;

use anyhow::{Context, Result, bail};
use crossterm::style::Stylize;

use crate::Cli;

pub async fn download(cli: &Cli, packages: &[String], dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create {}", dest.display()))?;
    let (output, engine) = super::session(cli)?;

    let mut failed = Vec::new();
    for spec in packages {
        match engine.download(spec, dest).await {
            Ok(path) => output.success(&format!("Saved {}", path.display().to_string().cyan())),
            Err(err) => {
                super::report_failure(&output, spec, &err);
                failed.push(spec.as_str());
            }
        }
    }
    engine.close();

    if !failed.is_empty() {
        bail!("failed to download: {}", failed.join(", "));
    }
    Ok(())
}
