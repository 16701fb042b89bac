//! Versions command
use anyhow::Result;

use crate::Cli;

/// Print every version the index publishes for `package`, oldest first.
pub async fn versions(cli: &Cli, package: &str) -> Result<()> {
    let (_output, engine) = super::session(cli)?;
    let versions = engine.list_versions(package).await;
    engine.close();

    for version in versions? {
        println!("{version}");
    }
    Ok(())
}
