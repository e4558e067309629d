//! Command line interface

pub mod commands;

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Args, Parser, Subcommand};
use sqlx::SqlitePool;

use crate::config::Config;
use crate::registry::{EntityProvider, EntityRegistry, bootstrap, extensions};
use crate::storage;

#[derive(Parser, Debug)]
#[command(name = "porter")]
#[command(version, about = "Export and import tenant snapshots between databases")]
pub struct Cli {
    /// SQLite database URL (overrides config and PORTER_DATABASE_URL)
    #[arg(long, global = true)]
    pub database: Option<String>,

    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Disable coloured output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Snapshot one tenant into an archive
    Export(ExportArgs),
    /// Import an archive into the configured database
    Import(ImportArgs),
    /// Write header-only units for every entity type and pivot
    Template(TemplateArgs),
    /// Show the computed entity order, pivots and deferred edges
    Registry(RegistryArgs),
    /// Create every registered table in the configured database
    Schema,
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Tenant id to export
    #[arg(long)]
    pub tenant: String,

    /// Output archive: a `.zip` file or a directory
    #[arg(short, long)]
    pub out: PathBuf,

    /// Only export these tables (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub only: Vec<String>,

    /// Write the real tenant id instead of the placeholder
    #[arg(long)]
    pub no_placeholder: bool,
}

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Archive to import: a `.zip` file or a directory
    pub archive: PathBuf,

    /// Import into this existing tenant instead of creating one
    #[arg(long)]
    pub tenant: Option<String>,

    /// Remove existing rows before importing
    #[arg(long)]
    pub cleanup: bool,

    /// Do not ask for confirmation
    #[arg(short, long)]
    pub yes: bool,

    /// Record every id mapping in the import_record table
    #[arg(long)]
    pub persist_remap: bool,
}

#[derive(Args, Debug)]
pub struct TemplateArgs {
    /// Output archive: a `.zip` file or a directory
    #[arg(short, long)]
    pub out: PathBuf,
}

#[derive(Args, Debug)]
pub struct RegistryArgs {
    /// Print as JSON
    #[arg(long)]
    pub json: bool,
}

/// Configuration and registry shared by every command
pub struct Context {
    pub config: Config,
    pub registry: EntityRegistry,
}

impl Context {
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut config = Config::load(cli.config.as_deref())?;
        if let Some(database) = &cli.database {
            config.database_url = Some(database.clone());
        }

        let providers = extensions::load_all(&config.extensions)?;
        let providers: Vec<&dyn EntityProvider> =
            providers.iter().map(|p| p as &dyn EntityProvider).collect();
        let registry = bootstrap(&providers).context("Failed to build the entity registry")?;
        log::debug!(
            "Registry ready: {} entity types, {} pivots",
            registry.len(),
            registry.pivots().len()
        );

        Ok(Self { config, registry })
    }

    pub async fn connect(&self) -> Result<SqlitePool> {
        let url = self.config.database_url();
        log::debug!("Connecting to {}", url);
        storage::connect(url).await
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    let context = Context::load(&cli)?;

    match cli.command {
        Commands::Export(args) => commands::export::handle_export_command(&context, args).await,
        Commands::Import(args) => commands::import::handle_import_command(&context, args).await,
        Commands::Template(args) => commands::template::handle_template_command(&context, args),
        Commands::Registry(args) => commands::registry::handle_registry_command(&context, args),
        Commands::Schema => commands::schema::handle_schema_command(&context).await,
    }
}
