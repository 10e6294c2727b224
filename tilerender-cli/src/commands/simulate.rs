//! Simulate command - render frames headlessly while tiles stream in.

use std::path::PathBuf;

use tilerender::coord::{grid_size, tile_to_lat_lon, to_tile_coords, TileCoord, MAX_ZOOM};
use tilerender::logging::{default_log_dir, default_log_file, init_logging};
use tilerender::renderer::RendererConfig;

use crate::error::CliError;
use crate::simulation::{self, SimulationParams};

/// Arguments for the simulate command.
pub struct SimulateArgs {
    pub frames: u32,
    pub zoom: u8,
    pub camera_col: i32,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub pan: f64,
    pub symbols: usize,
    pub budget: Option<usize>,
    pub fail_every: u32,
    pub config: PathBuf,
    pub log_dir: Option<PathBuf>,
}

/// Run the simulate command.
pub fn run(args: SimulateArgs) -> Result<(), CliError> {
    let log_dir = args
        .log_dir
        .clone()
        .unwrap_or_else(|| default_log_dir().to_path_buf());
    let _guard = init_logging(&log_dir, default_log_file()).map_err(CliError::Logging)?;

    // CLI takes precedence, then config
    let mut config = RendererConfig::load(&args.config)?;
    if let Some(budget) = args.budget {
        if budget == 0 {
            return Err(CliError::InvalidArgument(
                "--budget must be at least 1".to_string(),
            ));
        }
        config = config.with_max_tile_uploads(budget);
    }

    if args.zoom > MAX_ZOOM {
        return Err(CliError::InvalidArgument(format!(
            "--zoom must be at most {}",
            MAX_ZOOM
        )));
    }

    let params = SimulationParams {
        frames: args.frames,
        zoom: args.zoom,
        pan: args.pan,
        symbols_per_tile: args.symbols,
        fail_every: args.fail_every,
        ..SimulationParams::default()
    };
    let params = match (args.lat, args.lon) {
        (Some(lat), Some(lon)) => params.at_lat_lon(lat, lon)?,
        _ => {
            let size = grid_size(args.zoom);
            if !(0..size).contains(&args.camera_col) {
                return Err(CliError::InvalidArgument(format!(
                    "--camera-col must be in 0..{} at zoom {}",
                    size, args.zoom
                )));
            }
            params.at_column(args.camera_col)
        }
    };
    let size = f64::from(grid_size(params.zoom));
    let start = match (args.lat, args.lon) {
        (Some(lat), Some(lon)) => to_tile_coords(lat, lon, params.zoom),
        _ => TileCoord::new(
            (params.start_x * size) as i32,
            (params.start_y * size) as i32,
            params.zoom,
        ),
    }
    .map_err(|e| CliError::InvalidArgument(e.to_string()))?;
    let (start_lat, start_lon) = tile_to_lat_lon(&start);

    println!("tilerender headless simulation v{}", env!("CARGO_PKG_VERSION"));
    println!("=================================");
    println!();
    println!("Config:   {}", args.config.display());
    println!("Zoom:     {}", params.zoom);
    println!(
        "Start:    tile {} (NW corner {:.3}, {:.3})",
        start, start_lat, start_lon
    );
    println!("Frames:   {}", params.frames);
    println!("Budget:   {} uploads/frame", config.max_tile_uploads);
    println!("Log file: {}", log_dir.join(default_log_file()).display());
    println!();

    let summary = simulation::run(config, &params)?;
    println!("{}", summary);
    Ok(())
}
