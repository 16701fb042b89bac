//! Subcommand implementations

pub mod download;
pub mod install;
pub mod list;
pub mod search;
pub mod uninstall;
pub mod update;
pub mod versions;

use std::sync::Arc;

use anyhow::Result;
use shelf_core::{Engine, EngineError};

use crate::Cli;
use crate::ui::Output;

/// Open an engine that reports through a console [`Output`].
pub(crate) fn session(cli: &Cli) -> Result<(Arc<Output>, Engine)> {
    let output = Arc::new(Output::new(cli.quiet));
    let engine = cli.engine(output.clone())?;
    Ok((output, engine))
}

/// Print an engine failure for one package.
///
/// Build output is shown verbatim after the headline so the user sees the
/// script's own diagnostics.
pub(crate) fn report_failure(output: &Output, target: &str, err: &EngineError) {
    match err {
        EngineError::BuildFailed {
            package,
            output: log,
            cleanup_warnings,
        } => {
            output.error(&format!("{target}: build of {package} failed"));
            if !log.is_empty() {
                eprintln!("{log}");
            }
            for warning in cleanup_warnings {
                output.error(&format!("could not clean up {warning}"));
            }
        }
        other => output.error(&format!("{target}: {other}")),
    }
    tracing::debug!(kind = err.kind(), %target, "operation failed");
}
