//! porter: tenant snapshot export and import
//!
//! Builds the entity registry once, then hands it to the export or import
//! engine selected on the command line.

mod archive;
mod cli;
mod config;
mod error;
mod export;
mod graph;
mod import;
mod metadata;
mod registry;
mod storage;

use anyhow::Result;
use clap::Parser;
use is_terminal::IsTerminal;

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = format!("{},sqlx=warn", level);
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .format_timestamp(None)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    init_logging(cli.verbose);

    if cli.no_color || !std::io::stdout().is_terminal() {
        colored::control::set_override(false);
    }

    cli::run(cli).await
}
