//! Install command
use anyhow::{Result, bail};

use crate::Cli;

/// Install each specifier in order; keep going after a failure.
pub async fn install(cli: &Cli, packages: &[String]) -> Result<()> {
    let (output, engine) = super::session(cli)?;

    let mut failed = Vec::new();
    for spec in packages {
        if let Err(err) = engine.install(spec).await {
            super::report_failure(&output, spec, &err);
            failed.push(spec.as_str());
        }
    }
    engine.close();

    if !failed.is_empty() {
        bail!("failed to install: {}", failed.join(", "));
    }
    Ok(())
}
