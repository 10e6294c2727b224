//! Headless frame simulation.
//!
//! A loader thread fills the tile cache with generated content while the
//! main thread pans a camera across the map and renders frames against the
//! [`HeadlessBackend`]. The two threads run in lockstep per frame: requests
//! for frame N are loaded while frame N renders, and frame N+1 waits for
//! them.

use std::collections::HashSet;
use std::fmt;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use image::{Rgba, RgbaImage};
use tracing::{debug, info, warn};

use tilerender::coord::{grid_size, TileCoord};
use tilerender::gpu::HeadlessBackend;
use tilerender::layers::{Bitmap, GeometryLayer, Layer, PointF, RenderLayers, SymbolItem, SymbolLayer};
use tilerender::renderer::{
    begin_fade, fade_alpha, MapPosition, RendererConfig, SkipReason, TileRenderer, Viewport,
    TILE_SIZE,
};
use tilerender::tile::{TileCache, TileId, TileSet, TileState};

use crate::error::CliError;

/// Simulated milliseconds per frame.
pub const FRAME_MS: u64 = 16;

/// Marker colors cycled through when generating symbol bitmaps.
const PALETTE: [[u8; 4]; 4] = [
    [230, 57, 70, 255],
    [42, 157, 143, 255],
    [233, 196, 106, 255],
    [38, 70, 83, 255],
];

/// Inputs of one simulation run.
#[derive(Debug, Clone)]
pub struct SimulationParams {
    pub frames: u32,
    pub zoom: u8,
    /// Camera start, world-relative in `[0, 1)`.
    pub start_x: f64,
    pub start_y: f64,
    /// Camera movement east per frame, in tiles.
    pub pan: f64,
    pub symbols_per_tile: usize,
    /// Inject an upload failure every N frames; 0 disables.
    pub fail_every: u32,
    pub screen_width: f32,
    pub screen_height: f32,
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            frames: 120,
            zoom: 3,
            start_x: 0.0625,
            start_y: 0.5,
            pan: 0.05,
            symbols_per_tile: 24,
            fail_every: 0,
            screen_width: 512.0,
            screen_height: 512.0,
        }
    }
}

/// What happened during a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimulationSummary {
    pub frames: u32,
    pub budget: usize,
    pub uploads: usize,
    pub max_uploads_per_frame: usize,
    pub failed_uploads: u64,
    pub bytes_uploaded: u64,
    pub skipped_frames: u32,
    pub max_placeholders: usize,
    pub tiles_loaded: usize,
    pub tiles_cached: usize,
    pub tiles_evicted: usize,
    pub fades_started: usize,
    /// Active tiles that were ready after the last frame.
    pub ready_at_end: usize,
    pub active_at_end: usize,
    /// Mean fade alpha of the last frame's draw set.
    pub final_alpha: f32,
}

impl SimulationParams {
    /// Start the camera centered on column `col` of the grid, mid-latitude.
    pub fn at_column(mut self, col: i32) -> Self {
        let pos = MapPosition::centered_on(col, 0, self.zoom);
        self.start_x = pos.x;
        self.start_y = 0.5;
        self
    }

    /// Start the camera over a geographic location.
    pub fn at_lat_lon(mut self, lat: f64, lon: f64) -> Result<Self, CliError> {
        let pos = MapPosition::from_lat_lon(lat, lon, self.zoom)
            .map_err(|e| CliError::InvalidArgument(e.to_string()))?;
        self.start_x = pos.x;
        self.start_y = pos.y;
        Ok(self)
    }
}

impl fmt::Display for SimulationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Simulation Summary")?;
        writeln!(f, "──────────────────")?;
        writeln!(f, "  Frames:          {} ({} skipped)", self.frames, self.skipped_frames)?;
        writeln!(
            f,
            "  Uploads:         {} (max {}/frame, budget {})",
            self.uploads, self.max_uploads_per_frame, self.budget
        )?;
        writeln!(f, "  Failed uploads:  {}", self.failed_uploads)?;
        writeln!(f, "  Bytes uploaded:  {}", self.bytes_uploaded)?;
        writeln!(f, "  Placeholders:    {} max", self.max_placeholders)?;
        writeln!(
            f,
            "  Tiles:           {} loaded, {} cached, {} evicted",
            self.tiles_loaded, self.tiles_cached, self.tiles_evicted
        )?;
        writeln!(f, "  Fades started:   {}", self.fades_started)?;
        write!(
            f,
            "  Ready at end:    {}/{} (alpha {:.2})",
            self.ready_at_end, self.active_at_end, self.final_alpha
        )
    }
}

/// Tiles covering the screen around `x`, each column wrapped into the grid.
///
/// `x` is the world-relative camera position. Rows are clamped to the grid.
pub fn covering_tiles(x: f64, y: f64, zoom: u8, width: f32, height: f32) -> Vec<TileCoord> {
    let size = grid_size(zoom);
    let half_w = f64::from(width) / 2.0 / TILE_SIZE;
    let half_h = f64::from(height) / 2.0 / TILE_SIZE;
    let cx = x * f64::from(size);
    let cy = y * f64::from(size);

    let col_start = (cx - half_w).floor() as i32;
    let col_end = ((cx + half_w).ceil() as i32).min(col_start + size);
    let row_start = ((cy - half_h).floor() as i32).max(0);
    let row_end = ((cy + half_h).ceil() as i32).min(size);

    let mut seen = HashSet::new();
    let mut tiles = Vec::new();
    for row in row_start..row_end {
        for col in col_start..col_end {
            let col = col.rem_euclid(size);
            if let Ok(coord) = TileCoord::new(col, row, zoom) {
                if seen.insert(coord) {
                    tiles.push(coord);
                }
            }
        }
    }
    tiles
}

/// Generate the shared marker bitmaps.
pub fn marker_bitmaps() -> Vec<Arc<Bitmap>> {
    PALETTE
        .iter()
        .enumerate()
        .map(|(i, color)| {
            let size = 8 + 4 * i as u32;
            let r = size as f32 / 2.0;
            let image = RgbaImage::from_fn(size, size, |x, y| {
                let dx = x as f32 + 0.5 - r;
                let dy = y as f32 + 0.5 - r;
                if dx * dx + dy * dy <= r * r {
                    Rgba(*color)
                } else {
                    Rgba([0, 0, 0, 0])
                }
            });
            Arc::new(Bitmap::new(image))
        })
        .collect()
}

/// Generated content for one tile: a ground quad and `symbols` markers.
pub fn tile_payload(coord: TileCoord, symbols: usize, bitmaps: &[Arc<Bitmap>]) -> RenderLayers {
    let extent = (TILE_SIZE * 8.0) as i16;
    let ground = GeometryLayer::new(vec![0, 0, extent, 0, 0, extent, extent, extent]);

    let mut layer = SymbolLayer::new();
    if !bitmaps.is_empty() {
        let seed = (coord.col as usize).wrapping_mul(31) ^ (coord.row as usize).wrapping_mul(17);
        for i in 0..symbols {
            let n = seed.wrapping_add(i.wrapping_mul(2654435761));
            let x = (n % 256) as f32;
            let y = ((n >> 8) % 256) as f32;
            let mut item = SymbolItem::bitmap(x, y, bitmaps[n % bitmaps.len()].clone())
                .with_billboard(i % 3 == 0);
            if i % 4 == 0 {
                // pin-style marker anchored at its bottom center
                item = item.with_offset(PointF::new(0.5, 1.0));
            }
            layer.add_symbol(item);
        }
    }

    RenderLayers::new()
        .with_layer(Layer::Geometry(ground))
        .with_layer(Layer::Symbol(layer))
}

fn spawn_loader(
    cache: Arc<TileCache>,
    symbols: usize,
    requests: mpsc::Receiver<Vec<(TileId, TileCoord)>>,
    acks: mpsc::Sender<usize>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let bitmaps = marker_bitmaps();
        for batch in requests {
            let payloads: Vec<_> = batch
                .iter()
                .map(|(id, coord)| (*id, tile_payload(*coord, symbols, &bitmaps)))
                .collect();

            let mut loaded = 0;
            {
                let mut arena = cache.lock();
                for (id, payload) in payloads {
                    if arena.set_layers(id, payload) && arena.set_state(id, TileState::NewData) {
                        loaded += 1;
                    }
                }
            }
            if acks.send(loaded).is_err() {
                break;
            }
        }
        debug!("Loader finished");
    })
}

/// Run the simulation to completion.
pub fn run(config: RendererConfig, params: &SimulationParams) -> Result<SimulationSummary, CliError> {
    if params.zoom > tilerender::coord::MAX_ZOOM {
        return Err(CliError::InvalidArgument(format!(
            "zoom {} exceeds {}",
            params.zoom,
            tilerender::coord::MAX_ZOOM
        )));
    }

    let cache = Arc::new(TileCache::new(config.placeholder_headroom));
    let fade_ms = config.fade_time_ms;
    let mut summary = SimulationSummary {
        frames: params.frames,
        budget: config.max_tile_uploads,
        ..SimulationSummary::default()
    };
    let renderer = TileRenderer::new(cache.clone(), HeadlessBackend::new(), config);

    let (req_tx, req_rx) = mpsc::channel();
    let (ack_tx, ack_rx) = mpsc::channel();
    let loader = spawn_loader(cache.clone(), params.symbols_per_tile, req_rx, ack_tx);

    let size = f64::from(grid_size(params.zoom));
    let y = params.start_y;
    let mut requested: HashSet<TileId> = HashSet::new();
    let mut pending_ack = false;
    let mut draw = TileSet::new();

    info!(
        frames = params.frames,
        zoom = params.zoom,
        budget = summary.budget,
        "Simulation started"
    );

    for frame in 0..params.frames {
        let frame_time = u64::from(frame) * FRAME_MS;
        let x = (params.start_x + f64::from(frame) * params.pan / size).rem_euclid(1.0);

        if pending_ack {
            summary.tiles_loaded += ack_rx.recv().map_err(|_| CliError::LoaderStopped)?;
            pending_ack = false;
        }

        // Queue loads for the tiles now in view; parents first so they can
        // stand in while their children load.
        let wanted = covering_tiles(x, y, params.zoom, params.screen_width, params.screen_height);
        let batch = {
            let mut arena = cache.lock();
            let mut batch = Vec::new();
            let mut active = Vec::with_capacity(wanted.len());
            for coord in &wanted {
                if let Some(parent) = coord.parent() {
                    let pid = arena.get_or_insert(parent);
                    if requested.insert(pid) {
                        batch.push((pid, parent));
                    }
                }
            }
            for coord in &wanted {
                let id = arena.get_or_insert(*coord);
                if requested.insert(id) {
                    batch.push((id, *coord));
                }
                active.push(id);
            }
            arena.set_active(&active);

            let evicted = arena.evict(active.len() * 4);
            summary.tiles_evicted += evicted;
            requested.retain(|id| arena.contains(*id));
            batch
        };
        if !batch.is_empty() {
            req_tx.send(batch).map_err(|_| CliError::LoaderStopped)?;
            pending_ack = true;
        }

        if params.fail_every > 0 && frame % params.fail_every == 0 {
            renderer.with_backend(|b| b.fail_next_uploads(1));
        }

        let pos = MapPosition::new(x, y, params.zoom);
        let viewport = Viewport::screen(pos, params.screen_width, params.screen_height)
            .with_changed(params.pan != 0.0 || frame == 0);
        let report = renderer.update(&viewport, frame_time);

        summary.uploads += report.uploads;
        summary.max_uploads_per_frame = summary.max_uploads_per_frame.max(report.uploads);
        summary.max_placeholders = summary.max_placeholders.max(report.placeholders);
        match report.skipped {
            Some(SkipReason::ZoomWindow { .. }) | Some(SkipReason::Transparent) => {
                summary.skipped_frames += 1
            }
            Some(SkipReason::NoTiles) | None => {}
        }

        renderer.get_draw_tiles(&mut draw);
        {
            let mut arena = cache.lock();
            summary.fades_started += begin_fade(&mut arena, &draw, frame_time);
            if !draw.is_empty() {
                let total: f32 = draw
                    .iter()
                    .filter_map(|e| arena.get(e.id))
                    .map(|t| fade_alpha(t.fade_time(), frame_time, fade_ms))
                    .sum();
                summary.final_alpha = total / draw.len() as f32;
            }
        }
        renderer.release_tiles(&mut draw);
    }

    drop(req_tx);
    if pending_ack {
        summary.tiles_loaded += ack_rx.recv().map_err(|_| CliError::LoaderStopped)?;
    }
    if loader.join().is_err() {
        warn!("Loader thread panicked");
        return Err(CliError::LoaderStopped);
    }

    {
        let arena = cache.lock();
        summary.tiles_cached = arena.len();
        summary.active_at_end = arena.active().len();
        summary.ready_at_end = arena
            .active()
            .iter()
            .filter(|id| arena.state(**id) == Some(TileState::Ready))
            .count();
    }
    renderer.with_backend(|b| {
        summary.failed_uploads = b.stats().failed_uploads;
        summary.bytes_uploaded = b.stats().bytes_uploaded;
    });

    info!(
        uploads = summary.uploads,
        failed = summary.failed_uploads,
        ready = summary.ready_at_end,
        "Simulation finished"
    );
    Ok(summary)
}
