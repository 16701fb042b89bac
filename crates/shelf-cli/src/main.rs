//! shelf - build-from-source package installer

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use shelf_cli::cmd;
use shelf_cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Commands::Install { packages } => cmd::install::install(&cli, packages).await,
        Commands::Uninstall { packages } => cmd::uninstall::uninstall(&cli, packages).await,
        Commands::List => cmd::list::list(&cli).await,
        Commands::Search { term } => cmd::search::search(&cli, term).await,
        Commands::Versions { package } => cmd::versions::versions(&cli, package).await,
        Commands::Download { packages, dest } => {
            cmd::download::download(&cli, packages, dest).await
        }
        Commands::Update { packages } => cmd::update::update(&cli, packages).await,
    }
}
