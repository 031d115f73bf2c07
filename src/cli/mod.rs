use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

use crate::bootstrap;
use crate::config::{AppConfig, ConfigLoader, ConfigPaths};
use crate::storage::{self, NoteRepository};
use crate::store::NoteStore;
use crate::sweeper::{ExpirationSweeper, SweepTrigger};

pub mod commands;
pub mod runtime;

use self::commands::{DeleteArgs, EditArgs, ListArgs, NewArgs, NoteIdArgs, SettingsArgs};

#[derive(Parser, Debug)]
#[command(
    name = "tempnotes",
    version,
    about = "Quick notes that expire on their own"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Override the config file location (takes precedence over TEMPNOTES_CONFIG)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override the data directory (takes precedence over TEMPNOTES_DATA)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Minimum log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List notes, pinned first (default)
    List(ListArgs),
    /// Create a note
    New(NewArgs),
    /// Print one note with its expiry details
    Show(NoteIdArgs),
    /// Change a note's text, title or lifecycle
    Edit(EditArgs),
    /// Toggle a note's pin
    Pin(NoteIdArgs),
    /// Delete a note
    Delete(DeleteArgs),
    /// Remove expired notes now
    Sweep,
    /// Show or change app settings
    Settings(SettingsArgs),
    /// Interactive session driven by commands on stdin
    Watch,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let paths = ConfigPaths::discover_with(cli.config.clone(), cli.data_dir.clone())?;
    let loader = ConfigLoader::from_paths(paths);
    loader.paths().ensure_directories()?;
    init_tracing(&cli.log_level)
        .with_context(|| format!("initialising logging at level {}", cli.log_level))?;
    let config = loader.load_or_init()?;
    let mut store = open_store(loader.paths(), &config)?;

    let command = cli
        .command
        .unwrap_or_else(|| Commands::List(ListArgs::default()));
    let output = match command {
        Commands::List(args) => commands::list_notes(&store, &args)?,
        Commands::New(args) => commands::new_note(&mut store, args)?,
        Commands::Show(args) => commands::show_note(&store, &args)?,
        Commands::Edit(args) => commands::edit_note(&mut store, args)?,
        Commands::Pin(args) => commands::toggle_pin(&mut store, &args)?,
        Commands::Delete(args) => commands::delete_note(&mut store, &args)?,
        Commands::Sweep => {
            let mut sweeper = ExpirationSweeper::new(&config.sweep);
            commands::sweep_notes(&mut store, &mut sweeper)?
        }
        Commands::Settings(args) => commands::handle_settings(&mut store, args)?,
        Commands::Watch => {
            runtime::run_watch(&mut store, &config)?;
            return Ok(());
        }
    };
    if output.ends_with('\n') {
        print!("{output}");
    } else {
        println!("{output}");
    }
    store.flush()
}

/// Loads the store from disk, seeds the welcome note on first launch and
/// optionally drops notes that expired while the app was closed.
pub fn open_store(paths: &ConfigPaths, config: &AppConfig) -> Result<NoteStore> {
    let kv = storage::init(paths, &config.storage)?;
    let clock = config.build_clock()?;
    let mut store = NoteStore::new(NoteRepository::new(kv), clock, config.store_options());
    store.load();

    if let Err(err) = bootstrap::seed_welcome_note(&mut store) {
        tracing::warn!(?err, "first-run seeding failed");
    }
    if config.sweep.on_start {
        let now = store.now_millis();
        ExpirationSweeper::new(&config.sweep).sweep(&mut store, now, SweepTrigger::Startup);
    }
    Ok(store)
}

fn init_tracing(level: &str) -> Result<()> {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_try_init(|| {
        let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"));
        fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
        Ok(())
    })
    .map(|_| ())
}
