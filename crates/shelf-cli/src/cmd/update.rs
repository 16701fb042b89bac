//! Update command
use anyhow::{Result, bail};
use shelf_core::UpdateOutcome;

use crate::Cli;

/// Update the named packages, or every installed package when none are given.
pub async fn update(cli: &Cli, packages: &[String]) -> Result<()> {
    let (output, engine) = super::session(cli)?;

    let names: Vec<String> = if packages.is_empty() {
        engine
            .list_installed()
            .await?
            .into_iter()
            .map(|pkg| pkg.name.to_string())
            .collect()
    } else {
        packages.to_vec()
    };

    let mut failed = Vec::new();
    for name in &names {
        match engine.update(name).await {
            Ok(UpdateOutcome::Updated { from, to }) => {
                output.success(&format!("Updated {name} {from} -> {to}"));
            }
            Ok(UpdateOutcome::UpToDate { version }) => {
                output.info(&format!("{name} {version} is up to date"));
            }
            Err(err) => {
                super::report_failure(&output, name, &err);
                failed.push(name.as_str());
            }
        }
    }
    engine.close();

    if !failed.is_empty() {
        bail!("failed to update: {}", failed.join(", "));
    }
    Ok(())
}
