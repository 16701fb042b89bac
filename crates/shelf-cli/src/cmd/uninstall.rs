//! Uninstall command
use anyhow::{Result, bail};

use crate::Cli;

pub async fn uninstall(cli: &Cli, packages: &[String]) -> Result<()> {
    let (output, engine) = super::session(cli)?;

    let mut failed = Vec::new();
    for name in packages {
        if let Err(err) = engine.uninstall(name).await {
            super::report_failure(&output, name, &err);
            failed.push(name.as_str());
        }
    }
    engine.close();

    if !failed.is_empty() {
        bail!("failed to uninstall: {}", failed.join(", "));
    }
    Ok(())
}
