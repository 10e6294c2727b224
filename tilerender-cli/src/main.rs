//! tilerender CLI - headless frame simulation
//!
//! Drives the tile pipeline against the in-memory backend so budget, fade
//! and wrap-around behavior can be observed without a graphics context.

mod commands;
mod error;
mod simulation;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

use commands::config::ConfigCommands;
use commands::simulate::SimulateArgs;

#[derive(Debug, Parser)]
#[command(name = "tilerender", version, about = "Quad-tree map tile renderer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Render frames against the headless backend while tiles stream in
    Simulate {
        /// Number of frames to render
        #[arg(long, default_value_t = 120)]
        frames: u32,

        /// Tile zoom level
        #[arg(long, default_value_t = 3)]
        zoom: u8,

        /// Column the camera starts centered on
        #[arg(long, default_value_t = 0, conflicts_with_all = ["lat", "lon"])]
        camera_col: i32,

        /// Start latitude in degrees (use with --lon)
        #[arg(long, requires = "lon", allow_hyphen_values = true)]
        lat: Option<f64>,

        /// Start longitude in degrees (use with --lat)
        #[arg(long, requires = "lat", allow_hyphen_values = true)]
        lon: Option<f64>,

        /// Camera movement east per frame, in tiles (negative moves west)
        #[arg(long, default_value_t = 0.05, allow_hyphen_values = true)]
        pan: f64,

        /// Point sprites generated per tile
        #[arg(long, default_value_t = 24)]
        symbols: usize,

        /// Override max_tile_uploads from the config file
        #[arg(long)]
        budget: Option<usize>,

        /// Make every Nth frame's first upload fail (0 disables)
        #[arg(long, default_value_t = 0)]
        fail_every: u32,

        /// Renderer configuration file
        #[arg(long, default_value = "tilerender.ini")]
        config: PathBuf,

        /// Directory for log files
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },

    /// Inspect renderer configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Simulate {
            frames,
            zoom,
            camera_col,
            lat,
            lon,
            pan,
            symbols,
            budget,
            fail_every,
            config,
            log_dir,
        } => commands::simulate::run(SimulateArgs {
            frames,
            zoom,
            camera_col,
            lat,
            lon,
            pan,
            symbols,
            budget,
            fail_every,
            config,
            log_dir,
        }),
        Commands::Config { command } => commands::config::run(command),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
