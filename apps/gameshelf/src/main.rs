//! GameShelf library server entry point.
//!
//! - `gameshelf serve` (default): index the library, then serve the HTTP API
//! - `gameshelf reindex`: run one reindex pass and print the report as JSON

mod app;
mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// GameShelf: index a game library and serve it over HTTP.
#[derive(Parser)]
#[command(name = "gameshelf")]
#[command(version)]
struct Cli {
    /// Configuration file [default: ~/.config/gameshelf/server.toml]
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API
    Serve,

    /// Run a single reindex pass and print its report
    Reindex,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting GameShelf");

    let config = config::Config::load(cli.config.as_deref())?;
    tracing::info!(
        roots = config.roots.len(),
        database = %config.database_path().display(),
        "configuration loaded"
    );

    let rt = tokio::runtime::Runtime::new()?;
    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => rt.block_on(app::serve(config))?,
        Command::Reindex => {
            let summary = rt.block_on(app::reindex_once(config))?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    tracing::info!("shut down cleanly");
    Ok(())
}
