mod commands;

pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use iimodman::{config, ModManConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Program to manage Invisible Inc mods
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Args {
    /// Directory holding downloaded mod versions
    #[arg(long, global = true, env = config::CACHE_PATH_ENV)]
    cache_path: Option<PathBuf>,

    /// The game's mods directory
    #[arg(long, global = true, env = config::INSTALL_PATH_ENV)]
    install_path: Option<PathBuf>,

    /// Answer yes to every confirmation prompt
    #[arg(short = 'y', long, global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage downloaded mod versions
    #[command(subcommand)]
    Cache(CacheCommand),
    /// Manage installed mods
    #[command(subcommand)]
    Mods(ModsCommand),
}

#[derive(Subcommand, Debug)]
pub enum CacheCommand {
    /// Lists cached mods
    List {
        /// Show every cached version
        #[arg(short, long)]
        details: bool,
    },
    /// Adds workshop mods to the cache and downloads their latest version
    Add {
        /// Workshop IDs, with or without the "workshop-" prefix
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Downloads new versions of cached workshop mods
    Update {
        /// Workshop IDs to update. Defaults to every cached workshop mod.
        ids: Vec<String>,

        /// Add mods that are not in the cache yet
        #[arg(short, long)]
        add_missing: bool,

        /// Download even if the latest version is already cached
        #[arg(short, long)]
        force: bool,

        /// Only check for updates without downloading
        #[arg(short, long)]
        check_only: bool,
    },
    /// Copies installed mods that match no cached version into the cache
    AddInstalled,
}

#[derive(Subcommand, Debug)]
pub enum ModsCommand {
    /// Lists installed mods
    List,
    /// Prints the installed mods as a mod spec
    Export {
        /// Include version IDs
        #[arg(short, long)]
        versioned: bool,
    },
    /// Installs mods from spec lines (id:alias:version::)
    Install {
        #[arg(required = true)]
        specs: Vec<String>,
    },
    /// Removes installed mods
    Remove {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Makes the installed mods match one or more spec files
    Sync {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Allow removing mods that are not saved in the cache
        #[arg(short, long)]
        force: bool,

        /// Download workshop mods missing from the cache first
        #[arg(short = 'd', long)]
        fetch: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();
    info!("Starting iimodman version {}", env!("CARGO_PKG_VERSION"));
    let args = Args::parse();
    let config = ModManConfig::resolve(args.cache_path, args.install_path)?;
    let yes = args.yes;

    match args.command {
        Command::Cache(command) => match command {
            CacheCommand::List { details } => commands::cache_list(&config, details),
            CacheCommand::Add { ids } => commands::cache_add(&config, ids, yes).await,
            CacheCommand::Update {
                ids,
                add_missing,
                force,
                check_only,
            } => commands::cache_update(&config, ids, add_missing, force, check_only, yes).await,
            CacheCommand::AddInstalled => commands::cache_add_installed(&config, yes).await,
        },
        Command::Mods(command) => match command {
            ModsCommand::List => commands::mods_list(&config),
            ModsCommand::Export { versioned } => commands::mods_export(&config, versioned),
            ModsCommand::Install { specs } => commands::mods_install(&config, specs),
            ModsCommand::Remove { ids } => commands::mods_remove(&config, ids, yes),
            ModsCommand::Sync { files, force, fetch } => {
                commands::mods_sync(&config, files, force, fetch, yes).await
            }
        },
    }
}
