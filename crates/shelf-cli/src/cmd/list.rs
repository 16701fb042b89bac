//! List command
use anyhow::Result;

use crate::Cli;
use crate::ui::list::installed_rows;

/// List installed packages in install order.
pub async fn list(cli: &Cli) -> Result<()> {
    let (output, engine) = super::session(cli)?;
    let packages = engine.list_installed().await?;
    engine.close();

    if packages.is_empty() {
        output.info("No packages installed.");
        return Ok(());
    }
    for line in installed_rows(&packages) {
        println!("{line}");
    }
    Ok(())
}
