//! Configuration inspection CLI commands.
//!
//! Provides `config show` and `config check` for the `[renderer]` section of
//! an INI file.

use std::path::{Path, PathBuf};

use clap::Subcommand;
use tilerender::renderer::RendererConfig;

use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Print the effective renderer configuration
    Show {
        /// Configuration file; defaults apply when it does not exist
        #[arg(long, default_value = "tilerender.ini")]
        config: PathBuf,
    },

    /// Validate a configuration file
    Check {
        /// Configuration file to validate
        path: PathBuf,
    },
}

/// Run a config subcommand.
pub fn run(command: ConfigCommands) -> Result<(), CliError> {
    match command {
        ConfigCommands::Show { config } => run_show(&config),
        ConfigCommands::Check { path } => run_check(&path),
    }
}

fn run_show(path: &Path) -> Result<(), CliError> {
    let config = RendererConfig::load(path)?;

    if !path.exists() {
        println!("# {} not found, showing defaults", path.display());
    }
    print!("{}", format_config(&config));
    Ok(())
}

fn run_check(path: &Path) -> Result<(), CliError> {
    if !path.exists() {
        return Err(CliError::InvalidArgument(format!(
            "{} does not exist",
            path.display()
        )));
    }
    RendererConfig::load(path)?;
    println!("{}: OK", path.display());
    Ok(())
}

/// Render a config in the INI layout it is read from.
pub fn format_config(config: &RendererConfig) -> String {
    format!(
        "[renderer]\n\
         max_tile_uploads = {}\n\
         fade_time_ms = {}\n\
         placeholder_headroom = {}\n\
         zoom_above = {}\n\
         zoom_below = {}\n\
         overdraw_color = {:#010x}\n\
         alpha = {}\n",
        config.max_tile_uploads,
        config.fade_time_ms,
        config.placeholder_headroom,
        config.zoom_above,
        config.zoom_below,
        config.settings.overdraw_color,
        config.settings.alpha,
    )
}
