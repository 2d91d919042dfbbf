use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::ConfigLoader;
use crate::geo::Position;
use crate::geolocate::parse_coordinates;

pub mod commands;

use self::commands::{FindArgs, NearbyArgs, NewArgs, PathArgs, PlaceArgs, Session};

#[derive(Parser, Debug)]
#[command(
    name = "geonotes",
    version,
    about = "Location-tagged notes: pin a note to where you are or to a place you look up"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Override the config file location (takes precedence over GEONOTES_CONFIG)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override the data directory (takes precedence over GEONOTES_DATA)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Minimum log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Device position to report as LAT,LON (overrides [location] in config)
    #[arg(long, value_parser = parse_coordinates, allow_hyphen_values = true)]
    pub at: Option<Position>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Interactive session (default)
    Shell,
    /// Fetch the device position and make it the target for new notes
    Locate,
    /// Look up a place by name and make it the target for new notes
    Place(PlaceArgs),
    /// Save a note at the selected position
    New(NewArgs),
    /// List notes around the current position, closest first
    Nearby(NearbyArgs),
    /// Filter notes by text and/or distance
    Find(FindArgs),
    /// Delete a note by id
    Delete {
        /// Note identifier
        id: i64,
    },
    /// Write all notes to a JSON file
    Export(PathArgs),
    /// Read notes from a JSON file (existing ids are overwritten)
    Import(PathArgs),
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Some(path) = &cli.config {
        env::set_var("GEONOTES_CONFIG", path);
    }
    if let Some(path) = &cli.data_dir {
        env::set_var("GEONOTES_DATA", path);
    }

    let loader = ConfigLoader::discover()?;
    loader.paths().ensure_directories()?;
    let paths = loader.paths().clone();
    init_tracing(&cli.log_level)
        .with_context(|| format!("initialising logging at level {}", cli.log_level))?;
    let config = loader.load_or_init()?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("starting async runtime")?;
    let mut session = Session::from_config(&config, &paths, cli.at)?;
    let command = cli.command.unwrap_or(Commands::Shell);
    let result = runtime.block_on(commands::dispatch(&mut session, command));
    session.persist_location();
    result
}

fn init_tracing(level: &str) -> Result<()> {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_try_init(|| {
        let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
        fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
        Ok(())
    })
    .map(|_| ())
}
