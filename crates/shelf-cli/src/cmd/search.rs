//! Search command
use anyhow::Result;

use crate::Cli;
use crate::ui::list::search_rows;

pub async fn search(cli: &Cli, term: &str) -> Result<()> {
    let (output, engine) = super::session(cli)?;
    let hits = engine.search(term).await;
    engine.close();

    let hits = hits?;
    if hits.is_empty() {
        output.info(&format!("No packages found matching '{term}'"));
        return Ok(());
    }
    for line in search_rows(&hits) {
        println!("{line}");
    }
    Ok(())
}
