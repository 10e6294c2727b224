//! Frame render coordinator.
//!
//! Once per frame, on the render thread, [`TileRenderer::update`]:
//!
//! 1. snapshots the tiles the loader marked active into the draw set,
//! 2. recomputes which of them intersect the view when the set or the view
//!    changed (adding antimeridian placeholders),
//! 3. uploads new tile content to the GPU, at most `max_tile_uploads` per
//!    frame, substituting a parent or children for tiles not loaded yet.
//!
//! Consumers then take a pinned snapshot of the drawable tiles with
//! [`TileRenderer::get_visible_tiles`] or [`TileRenderer::get_draw_tiles`].
//!
//! # Locking
//!
//! ```text
//! render thread:  frame lock ──► cache lock (released while uploading)
//! consumers:      frame lock ──► cache lock
//! loader thread:                 cache lock
//! setters:        settings lock (never held with the others)
//! ```

pub mod config;
pub mod fade;
pub mod scan;
pub mod viewport;
pub mod visibility;

pub use config::{ConfigError, RenderSettings, RendererConfig};
pub use fade::{begin_fade, fade_alpha, min_fade};
pub use scan::{ScanBox, ScanlineFill};
pub use viewport::{MapPosition, Viewport, TILE_SIZE};
pub use visibility::{Placeholder, ScanOutcome, ZoomWindow};

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, trace};

use crate::coord::TileCoord;
use crate::gpu::{BufferTarget, RenderBackend};
use crate::layers::{upload_layers, RenderLayers};
use crate::tile::{ProxyRelation, TileArena, TileCache, TileId, TileRef, TileSet, TileState};

/// Why part of a frame was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Layer opacity is 0; the draw set was released.
    Transparent,
    /// The loader has no active tiles.
    NoTiles,
    /// Tile zoom too far from the camera zoom; nothing is visible.
    ZoomWindow { tile_zoom: u8, camera_zoom: u8 },
}

/// Summary of one [`TileRenderer::update`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameReport {
    /// Tiles uploaded (or counted as uploaded) this frame.
    pub uploads: usize,
    /// Visible draw-set tiles.
    pub visible: usize,
    /// Active wrap placeholders.
    pub placeholders: usize,
    /// Visibility was recomputed this frame.
    pub visibility_updated: bool,
    /// Part of the frame that was skipped, if any.
    pub skipped: Option<SkipReason>,
}

impl FrameReport {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Self::default()
        }
    }
}

/// State owned by the render thread, guarded by the frame lock.
struct FrameState<B> {
    backend: B,
    scanner: Box<dyn ScanlineFill + Send>,
    draw: TileSet,
    placeholders: Vec<Placeholder>,
    upload_serial: u64,
    settings: RenderSettings,
}

/// Renders the tiles of a [`TileCache`] through a [`RenderBackend`].
pub struct TileRenderer<B: RenderBackend> {
    cache: Arc<TileCache>,
    config: RendererConfig,
    frame: Mutex<FrameState<B>>,
    settings: Mutex<RenderSettings>,
}

impl<B: RenderBackend> TileRenderer<B> {
    pub fn new(cache: Arc<TileCache>, backend: B, config: RendererConfig) -> Self {
        Self::with_scanner(cache, backend, config, Box::new(ScanBox::new()))
    }

    /// Create a renderer with a custom scanline fill.
    pub fn with_scanner(
        cache: Arc<TileCache>,
        backend: B,
        config: RendererConfig,
        scanner: Box<dyn ScanlineFill + Send>,
    ) -> Self {
        let settings = config.settings;
        Self {
            cache,
            frame: Mutex::new(FrameState {
                backend,
                scanner,
                draw: TileSet::new(),
                placeholders: Vec::new(),
                upload_serial: 0,
                settings,
            }),
            settings: Mutex::new(settings),
            config,
        }
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<TileCache> {
        &self.cache
    }

    /// Set the packed ARGB color drawn behind tiles. Callable from any thread.
    pub fn set_overdraw_color(&self, color: u32) {
        self.settings.lock().overdraw_color = color;
    }

    /// Set the tile layer opacity, clamped to `0.0..=1.0`. Callable from any
    /// thread; takes effect at the next [`update`](Self::update).
    pub fn set_bitmap_alpha(&self, alpha: f32) {
        let alpha = if alpha.is_nan() { 0.0 } else { alpha.clamp(0.0, 1.0) };
        self.settings.lock().alpha = alpha;
    }

    /// Latest settings, not necessarily applied yet.
    pub fn settings(&self) -> RenderSettings {
        *self.settings.lock()
    }

    /// Settings in effect for the current frame.
    pub fn frame_settings(&self) -> RenderSettings {
        self.frame.lock().settings
    }

    /// Number of frames that uploaded at least one tile.
    pub fn upload_serial(&self) -> u64 {
        self.frame.lock().upload_serial
    }

    /// Current wrap placeholders.
    pub fn placeholders(&self) -> Vec<Placeholder> {
        self.frame.lock().placeholders.clone()
    }

    /// Run `f` with exclusive access to the backend.
    pub fn with_backend<R>(&self, f: impl FnOnce(&mut B) -> R) -> R {
        f(&mut self.frame.lock().backend)
    }

    /// Prepare one frame. Never fails; upload errors are logged.
    pub fn update(&self, viewport: &Viewport, frame_time: u64) -> FrameReport {
        let settings = *self.settings.lock();

        let mut guard = self.frame.lock();
        let frame = &mut *guard;

        let retired = self.cache.lock().take_retired();
        for mut layers in retired {
            layers.clear(&mut frame.backend);
        }

        let mut arena = self.cache.lock();

        frame.settings = settings;

        if settings.alpha == 0.0 {
            arena.release_tiles(&mut frame.draw);
            frame.placeholders.clear();
            trace!("Layer transparent, draw set released");
            return FrameReport::skipped(SkipReason::Transparent);
        }

        let tiles_changed = arena.get_active_tiles(&mut frame.draw);

        if frame.draw.is_empty() {
            frame.placeholders.clear();
            return FrameReport::skipped(SkipReason::NoTiles);
        }

        let mut report = FrameReport::default();

        if tiles_changed || viewport.changed {
            report.visibility_updated = true;
            let outcome = visibility::update_visibility(
                frame.scanner.as_mut(),
                &mut arena,
                &frame.draw,
                &mut frame.placeholders,
                &viewport.pos,
                &viewport.plane,
                ZoomWindow::new(self.config.zoom_above, self.config.zoom_below),
            );
            if let ScanOutcome::OutOfZoomWindow {
                tile_zoom,
                camera_zoom,
            } = outcome
            {
                report.skipped = Some(SkipReason::ZoomWindow {
                    tile_zoom,
                    camera_zoom,
                });
            }
        }

        report.visible = frame
            .draw
            .iter()
            .filter(|e| arena.get(e.id).is_some_and(|t| t.is_visible()))
            .count();
        report.placeholders = frame.placeholders.len();
        drop(arena);

        report.uploads = compile_tile_layers(
            &self.cache,
            &mut frame.backend,
            &frame.draw,
            &mut frame.placeholders,
            self.config.max_tile_uploads,
        );

        if report.uploads > 0 {
            frame.upload_serial += 1;
            frame.backend.check_usage(false);
            debug!(
                uploads = report.uploads,
                visible = report.visible,
                placeholders = report.placeholders,
                serial = frame.upload_serial,
                frame_time,
                "Frame uploaded tiles"
            );
        }

        report
    }

    /// Replace the contents of `set` with the visible, ready tiles.
    ///
    /// Visible ready placeholders are included with their on-screen
    /// coordinate. Returns whether the set's serial changed, i.e. whether
    /// uploads happened since `set` was last filled.
    pub fn get_visible_tiles(&self, set: &mut TileSet) -> bool {
        let frame = self.frame.lock();
        let mut arena = self.cache.lock();

        let prev_serial = set.serial();
        arena.release_tiles(set);

        for entry in &frame.draw {
            let ready = arena
                .get(entry.id)
                .is_some_and(|t| t.is_visible() && t.state().is_ready());
            if ready {
                arena.lock_tile(entry.id);
                set.push(TileRef::new(entry.id, entry.coord));
            }
        }
        publish_placeholders(&mut arena, &frame.placeholders, set);

        set.set_capacity(frame.draw.capacity());
        set.set_serial(frame.upload_serial);
        prev_serial != set.serial()
    }

    /// Like [`get_visible_tiles`](Self::get_visible_tiles), but a visible tile
    /// that is not ready is replaced by its ready parent or, failing that, by
    /// its ready children.
    pub fn get_draw_tiles(&self, set: &mut TileSet) -> bool {
        let frame = self.frame.lock();
        let mut arena = self.cache.lock();

        let prev_serial = set.serial();
        arena.release_tiles(set);

        for entry in &frame.draw {
            let Some(tile) = arena.get(entry.id) else {
                continue;
            };
            if !tile.is_visible() {
                continue;
            }
            if tile.state().is_ready() {
                arena.lock_tile(entry.id);
                set.push(TileRef::new(entry.id, entry.coord));
                continue;
            }

            if let Some(parent) = arena.proxy(entry.id, ProxyRelation::Parent, TileState::Ready) {
                if !set.contains(parent) {
                    push_proxy(&mut arena, set, parent, -1);
                }
                continue;
            }
            for c in 0..4 {
                if let Some(child) = arena.proxy_child(entry.id, c, TileState::Ready) {
                    if !set.contains(child) {
                        push_proxy(&mut arena, set, child, 1);
                    }
                }
            }
        }
        publish_placeholders(&mut arena, &frame.placeholders, set);

        set.set_capacity(frame.draw.capacity());
        set.set_serial(frame.upload_serial);
        prev_serial != set.serial()
    }

    /// Unpin and empty a set filled by this renderer.
    pub fn release_tiles(&self, set: &mut TileSet) {
        let _frame = self.frame.lock();
        self.cache.lock().release_tiles(set);
    }

    /// Forget the draw set without unpinning its tiles.
    ///
    /// Only valid together with [`TileArena::clear`], which drops the tiles
    /// and their pins.
    pub fn clear_tiles(&self) {
        let mut frame = self.frame.lock();
        frame.draw = TileSet::new();
        frame.placeholders.clear();
    }
}

impl<B: RenderBackend> Drop for TileRenderer<B> {
    fn drop(&mut self) {
        let frame = self.frame.get_mut();
        let mut arena = self.cache.lock();
        arena.release_tiles(&mut frame.draw);
        for mut layers in arena.take_retired() {
            layers.clear(&mut frame.backend);
        }
    }
}

fn push_proxy(arena: &mut TileArena, set: &mut TileSet, id: TileId, proxy_level: i8) {
    let Some(coord) = arena.get(id).map(|t| t.coord()) else {
        return;
    };
    arena.lock_tile(id);
    set.push(TileRef::proxy(id, coord, proxy_level));
}

fn publish_placeholders(arena: &mut TileArena, placeholders: &[Placeholder], set: &mut TileSet) {
    for p in placeholders {
        if p.is_visible && p.state.is_ready() && arena.lock_tile(p.holder) {
            set.push(TileRef::new(p.holder, p.coord));
        }
    }
}

/// A tile claimed for upload, with its payload detached from the cache.
struct UploadJob {
    id: TileId,
    coord: TileCoord,
    layers: Option<RenderLayers>,
    /// Placeholder whose holder this is.
    placeholder: Option<usize>,
}

/// Upload new content for visible tiles, their stand-ins and placeholder
/// holders. Stops once `max_uploads` is reached; the rest waits for the next
/// frame.
///
/// Candidates are claimed under the cache lock, compiled and uploaded without
/// it, then reattached. Failed uploads count 0, so another round claims more
/// tiles while budget remains.
fn compile_tile_layers<B: RenderBackend>(
    cache: &TileCache,
    backend: &mut B,
    draw: &TileSet,
    placeholders: &mut [Placeholder],
    max_uploads: usize,
) -> usize {
    let mut uploads = 0;

    while uploads < max_uploads {
        let mut jobs = claim_uploads(
            &mut cache.lock(),
            draw,
            placeholders,
            max_uploads - uploads,
        );
        if jobs.is_empty() {
            break;
        }

        for job in &mut jobs {
            uploads += upload_tile_data(backend, job);
        }

        let stale = restore_uploads(&mut cache.lock(), placeholders, jobs);
        for mut layers in stale {
            layers.clear(backend);
        }
    }

    uploads
}

/// Pick at most `budget` tiles to upload, in draw order: the tile itself,
/// else its parent, else its children, then placeholder holders.
fn claim_uploads(
    arena: &mut TileArena,
    draw: &TileSet,
    placeholders: &mut [Placeholder],
    budget: usize,
) -> Vec<UploadJob> {
    let mut jobs = Vec::new();

    for entry in draw {
        if jobs.len() >= budget {
            return jobs;
        }
        let Some(tile) = arena.get(entry.id) else {
            continue;
        };
        if !tile.is_visible() {
            continue;
        }
        match tile.state() {
            TileState::Ready => continue,
            TileState::NewData => {
                jobs.extend(claim(arena, entry.id));
                continue;
            }
            TileState::Loading | TileState::Cancel => {}
        }

        if let Some(parent) = arena.proxy(entry.id, ProxyRelation::Parent, TileState::NewData) {
            jobs.extend(claim(arena, parent));
            continue;
        }

        for c in 0..4 {
            if jobs.len() >= budget {
                return jobs;
            }
            if let Some(child) = arena.proxy_child(entry.id, c, TileState::NewData) {
                jobs.extend(claim(arena, child));
            }
        }
    }

    for (i, placeholder) in placeholders.iter_mut().enumerate() {
        if jobs.len() >= budget {
            break;
        }
        if !placeholder.is_visible || placeholder.state.is_ready() {
            continue;
        }
        match arena.state(placeholder.holder) {
            Some(TileState::NewData) => {
                if let Some(mut job) = claim(arena, placeholder.holder) {
                    job.placeholder = Some(i);
                    jobs.push(job);
                }
            }
            Some(state) => placeholder.state = state,
            None => placeholder.is_visible = false,
        }
    }

    jobs
}

/// Mark a tile `Ready` and detach its payload.
fn claim(arena: &mut TileArena, id: TileId) -> Option<UploadJob> {
    arena.set_state(id, TileState::Ready);
    let tile = arena.get_mut(id)?;
    Some(UploadJob {
        id,
        coord: tile.coord(),
        layers: tile.take_layers(),
        placeholder: None,
    })
}

/// Reattach uploaded payloads and sync placeholder states. Returns payloads
/// whose tile was removed or reloaded meanwhile.
fn restore_uploads(
    arena: &mut TileArena,
    placeholders: &mut [Placeholder],
    jobs: Vec<UploadJob>,
) -> Vec<RenderLayers> {
    let mut stale = Vec::new();
    for job in jobs {
        if let Some(layers) = job.layers {
            stale.extend(arena.restore_layers(job.id, layers));
        }
        let Some(placeholder) = job.placeholder else {
            continue;
        };
        if let Some(placeholder) = placeholders.get_mut(placeholder) {
            match arena.state(job.id) {
                Some(state) => placeholder.state = state,
                None => placeholder.is_visible = false,
            }
        }
    }
    if !stale.is_empty() {
        debug!(count = stale.len(), "Uploaded payloads outdated before reattach");
    }
    stale
}

/// Upload one claimed tile. Returns the number of uploads to count.
///
/// When the upload fails the payload and its buffer are dropped but the tile
/// stays `Ready`, so it draws empty until it is reloaded.
fn upload_tile_data<B: RenderBackend>(backend: &mut B, job: &mut UploadJob) -> usize {
    let coord = job.coord;
    let Some(layers) = job.layers.as_mut() else {
        return 1;
    };
    let size = layers.size();
    if size == 0 {
        return 1;
    }

    if layers.vbo.is_none() {
        layers.vbo = Some(backend.acquire(BufferTarget::Array, size));
    }

    match upload_layers(layers, size, backend) {
        Ok(()) => {
            trace!(tile = %coord, bytes = size, "Tile uploaded");
            1
        }
        Err(e) => {
            error!(tile = %coord, bytes = size, error = %e, "Tile upload failed");
            if let Some(mut layers) = job.layers.take() {
                layers.clear(backend);
            }
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{
        BufferBackend, BufferHandle, HeadlessBackend, TextureBackend, TextureHandle, UploadError,
    };
    use crate::layers::{Bitmap, GeometryLayer, Layer, TextureAtlas};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;
    use proptest::prelude::*;

    fn payload() -> RenderLayers {
        RenderLayers::new().with_layer(Layer::Geometry(GeometryLayer::new(vec![1; 8])))
    }

    fn coord(col: i32, row: i32, zoom: u8) -> TileCoord {
        TileCoord::new(col, row, zoom).unwrap()
    }

    /// Insert a tile with content waiting for upload.
    fn load(arena: &mut TileArena, coord: TileCoord) -> TileId {
        let id = arena.get_or_insert(coord);
        arena.set_layers(id, payload());
        arena.set_state(id, TileState::NewData);
        id
    }

    /// View covering the whole grid at `zoom`.
    fn world_view(zoom: u8) -> Viewport {
        let size = (TILE_SIZE as f32) * (1 << zoom) as f32;
        Viewport::screen(MapPosition::new(0.5, 0.5, zoom), size, size)
    }

    fn renderer(cache: &Arc<TileCache>, budget: usize) -> TileRenderer<HeadlessBackend> {
        TileRenderer::new(
            cache.clone(),
            HeadlessBackend::new(),
            RendererConfig::default().with_max_tile_uploads(budget),
        )
    }

    fn full_grid(cache: &TileCache, zoom: u8) -> Vec<TileId> {
        let mut arena = cache.lock();
        let size = 1 << zoom;
        let ids: Vec<TileId> = (0..size)
            .flat_map(|row| (0..size).map(move |col| (col, row)))
            .map(|(col, row)| load(&mut arena, coord(col, row, zoom)))
            .collect();
        arena.set_active(&ids);
        ids
    }

    fn count_state(cache: &TileCache, ids: &[TileId], state: TileState) -> usize {
        let arena = cache.lock();
        ids.iter().filter(|id| arena.state(**id) == Some(state)).count()
    }

    // =========================================================================
    // Upload budget
    // =========================================================================

    #[test]
    fn test_budget_bounds_uploads_per_frame() {
        let cache = Arc::new(TileCache::default());
        let ids = full_grid(&cache, 2);
        let renderer = renderer(&cache, 8);

        let report = renderer.update(&world_view(2), 1000);
        assert_eq!(report.uploads, 8);
        assert_eq!(report.visible, 16);
        assert_eq!(count_state(&cache, &ids, TileState::NewData), 8);

        let report = renderer.update(&world_view(2).with_changed(false), 1016);
        assert!(!report.visibility_updated);
        assert_eq!(report.uploads, 8);
        assert_eq!(count_state(&cache, &ids, TileState::Ready), 16);

        let report = renderer.update(&world_view(2).with_changed(false), 1032);
        assert_eq!(report.uploads, 0);
        assert_eq!(renderer.upload_serial(), 2);
        assert_eq!(renderer.with_backend(|b| b.stats().usage_checks), 2);
    }

    #[test]
    fn test_invisible_tiles_not_uploaded() {
        let cache = Arc::new(TileCache::default());
        let ids = full_grid(&cache, 2);
        let renderer = renderer(&cache, 32);

        // view covering tile (2, 1) only
        let view = Viewport::screen(MapPosition::centered_on(2, 1, 2), 64.0, 64.0);
        let report = renderer.update(&view, 0);

        assert_eq!(report.visible, 1);
        assert_eq!(report.uploads, 1);
        assert_eq!(cache.lock().state(ids[6]), Some(TileState::Ready));
    }

    // =========================================================================
    // Proxy selection
    // =========================================================================

    #[test]
    fn test_parent_proxy_preferred_over_children() {
        let cache = Arc::new(TileCache::default());
        let (target, parent, child) = {
            let mut arena = cache.lock();
            let target = arena.get_or_insert(coord(1, 1, 2));
            let parent = load(&mut arena, coord(0, 0, 1));
            let child = load(&mut arena, coord(2, 2, 3));
            arena.set_active(&[target]);
            (target, parent, child)
        };
        let renderer = renderer(&cache, 8);

        let report = renderer.update(&world_view(2), 0);
        assert_eq!(report.uploads, 1);

        let arena = cache.lock();
        assert_eq!(arena.state(parent), Some(TileState::Ready));
        assert_eq!(arena.state(child), Some(TileState::NewData), "no child proxies");
        assert_eq!(arena.state(target), Some(TileState::Loading));
    }

    #[test]
    fn test_children_uploaded_without_parent() {
        let cache = Arc::new(TileCache::default());
        let children = {
            let mut arena = cache.lock();
            let target = arena.get_or_insert(coord(1, 1, 2));
            let a = load(&mut arena, coord(2, 2, 3));
            let b = load(&mut arena, coord(3, 3, 3));
            arena.set_active(&[target]);
            [a, b]
        };
        let renderer = renderer(&cache, 8);

        let report = renderer.update(&world_view(2), 0);
        assert_eq!(report.uploads, 2);
        assert_eq!(count_state(&cache, &children, TileState::Ready), 2);
    }

    #[test]
    fn test_budget_checked_before_each_child() {
        let cache = Arc::new(TileCache::default());
        let children: Vec<TileId> = {
            let mut arena = cache.lock();
            let target = arena.get_or_insert(coord(1, 1, 2));
            let ids = (0..4).map(|i| load(&mut arena, coord(1, 1, 2).child(i))).collect();
            arena.set_active(&[target]);
            ids
        };
        let renderer = renderer(&cache, 3);

        assert_eq!(renderer.update(&world_view(2), 0).uploads, 3);
        assert_eq!(count_state(&cache, &children, TileState::NewData), 1);
    }

    #[test]
    fn test_draw_tiles_substitute_ready_parent() {
        let cache = Arc::new(TileCache::default());
        let (target, parent) = {
            let mut arena = cache.lock();
            let target = arena.get_or_insert(coord(1, 1, 2));
            let sibling = arena.get_or_insert(coord(0, 1, 2));
            let parent = load(&mut arena, coord(0, 0, 1));
            arena.set_active(&[target, sibling]);
            (target, parent)
        };
        let renderer = renderer(&cache, 8);
        renderer.update(&world_view(2), 0);

        let mut visible = TileSet::new();
        renderer.get_visible_tiles(&mut visible);
        assert!(visible.is_empty(), "target itself is not ready");

        let mut draw = TileSet::new();
        renderer.get_draw_tiles(&mut draw);
        assert_eq!(draw.len(), 1, "shared parent published once");
        assert_eq!(draw.entries()[0], TileRef::proxy(parent, coord(0, 0, 1), -1));
        assert!(!draw.contains(target));

        renderer.release_tiles(&mut draw);
        assert!(!cache.lock().is_locked(parent));
    }

    // =========================================================================
    // Upload failure
    // =========================================================================

    #[test]
    fn test_upload_failure_leaves_tile_ready_and_empty() {
        let cache = Arc::new(TileCache::default());
        let id = {
            let mut arena = cache.lock();
            let id = load(&mut arena, coord(0, 0, 0));
            arena.set_active(&[id]);
            id
        };
        let mut backend = HeadlessBackend::new();
        backend.fail_next_uploads(1);
        let renderer = TileRenderer::new(cache.clone(), backend, RendererConfig::default());

        let report = renderer.update(&world_view(0), 0);
        assert_eq!(report.uploads, 0);
        assert_eq!(renderer.upload_serial(), 0);

        {
            let arena = cache.lock();
            let tile = arena.get(id).unwrap();
            assert_eq!(tile.state(), TileState::Ready);
            assert!(tile.layers().is_none());
        }
        assert_eq!(renderer.with_backend(|b| b.live_buffers()), 0);

        // drawn empty, no retry
        let report = renderer.update(&world_view(0), 16);
        assert_eq!(report.uploads, 0);
    }

    #[test]
    fn test_tile_without_payload_counts_as_upload() {
        let cache = Arc::new(TileCache::default());
        {
            let mut arena = cache.lock();
            let id = arena.get_or_insert(coord(0, 0, 0));
            arena.set_state(id, TileState::NewData);
            arena.set_active(&[id]);
        }
        let renderer = renderer(&cache, 8);
        assert_eq!(renderer.update(&world_view(0), 0).uploads, 1);
        assert_eq!(renderer.with_backend(|b| b.stats().uploads), 0);
    }

    // =========================================================================
    // Published sets
    // =========================================================================

    #[test]
    fn test_visible_tiles_serial_changes_with_uploads() {
        let cache = Arc::new(TileCache::default());
        let ids = full_grid(&cache, 1);
        let renderer = renderer(&cache, 8);
        let mut set = TileSet::new();

        renderer.update(&world_view(1), 0);
        assert!(renderer.get_visible_tiles(&mut set));
        assert_eq!(set.len(), 4);
        assert_eq!(set.serial(), 1);
        assert!(ids.iter().all(|id| cache.lock().get(*id).unwrap().lock_count() == 2));

        renderer.update(&world_view(1).with_changed(false), 16);
        assert!(!renderer.get_visible_tiles(&mut set), "no uploads since");
        assert_eq!(set.len(), 4);

        {
            let mut arena = cache.lock();
            arena.reset(ids[0]);
            arena.set_layers(ids[0], payload());
            arena.set_state(ids[0], TileState::NewData);
        }
        let report = renderer.update(&world_view(1).with_changed(false), 32);
        assert_eq!(report.uploads, 1);
        assert!(renderer.get_visible_tiles(&mut set));

        renderer.release_tiles(&mut set);
        assert!(ids.iter().all(|id| cache.lock().get(*id).unwrap().lock_count() == 1));
    }

    #[test]
    fn test_visible_tiles_exclude_not_ready() {
        let cache = Arc::new(TileCache::default());
        let ids = full_grid(&cache, 2);
        let renderer = renderer(&cache, 5);
        renderer.update(&world_view(2), 0);

        let mut set = TileSet::new();
        renderer.get_visible_tiles(&mut set);
        assert_eq!(set.len(), 5);
        let arena = cache.lock();
        assert!(set.iter().all(|e| arena.state(e.id) == Some(TileState::Ready)));
        assert_eq!(ids.len(), 16);
    }

    #[test]
    fn test_placeholder_published_with_wrapped_coord() {
        let cache = Arc::new(TileCache::default());
        let holder = {
            let mut arena = cache.lock();
            let id = load(&mut arena, coord(0, 0, 1));
            arena.set_active(&[id]);
            id
        };
        let renderer = renderer(&cache, 8);

        // camera on tile (1, 0) looking past the east edge
        let view = Viewport::new(
            MapPosition::centered_on(1, 0, 1),
            [-64.0, -64.0, 192.0, -64.0, 192.0, 64.0, -64.0, 64.0],
            true,
        );
        let report = renderer.update(&view, 0);
        assert_eq!(report.placeholders, 1);
        assert_eq!(report.uploads, 1, "holder uploaded once");
        assert_eq!(renderer.placeholders()[0].state, TileState::Ready);

        let mut set = TileSet::new();
        renderer.get_visible_tiles(&mut set);
        let coords: Vec<TileCoord> = set.iter().map(|e| e.coord).collect();
        assert_eq!(coords, vec![coord(0, 0, 1), TileCoord::wrapped(2, 0, 1)]);
        assert!(set.iter().all(|e| e.id == holder));
        assert_eq!(cache.lock().get(holder).unwrap().lock_count(), 3);

        renderer.release_tiles(&mut set);
        assert_eq!(cache.lock().get(holder).unwrap().lock_count(), 1);
    }

    // =========================================================================
    // Skips
    // =========================================================================

    #[test]
    fn test_zero_opacity_releases_and_is_idempotent() {
        let cache = Arc::new(TileCache::default());
        let ids = full_grid(&cache, 1);
        let renderer = renderer(&cache, 8);
        renderer.update(&world_view(1), 0);
        assert!(cache.lock().is_locked(ids[0]));

        // new content waiting while the layer is hidden
        {
            let mut arena = cache.lock();
            arena.reset(ids[0]);
            arena.set_layers(ids[0], payload());
            arena.set_state(ids[0], TileState::NewData);
        }
        let uploads_before = renderer.with_backend(|b| b.stats().uploads);

        renderer.set_bitmap_alpha(0.0);
        for frame in 0..2 {
            let report = renderer.update(&world_view(1), 16 + frame);
            assert_eq!(report.skipped, Some(SkipReason::Transparent));
            assert_eq!(report.uploads, 0);
            assert!(ids.iter().all(|id| !cache.lock().is_locked(*id)));
            assert_eq!(cache.lock().state(ids[0]), Some(TileState::NewData));
        }
        assert_eq!(renderer.with_backend(|b| b.stats().uploads), uploads_before);

        renderer.set_bitmap_alpha(1.0);
        let report = renderer.update(&world_view(1).with_changed(false), 48);
        assert!(report.visibility_updated, "draw set repopulated");
        assert_eq!(report.uploads, 1);
        assert!(cache.lock().is_locked(ids[0]));
    }

    #[test]
    fn test_settings_copied_at_frame_start() {
        let cache = Arc::new(TileCache::default());
        full_grid(&cache, 0);
        let renderer = renderer(&cache, 8);

        renderer.set_overdraw_color(0xff00_ff00);
        renderer.set_bitmap_alpha(3.0);
        assert_eq!(renderer.settings().alpha, 1.0);
        assert_eq!(renderer.frame_settings().overdraw_color, 0);

        renderer.update(&world_view(0), 0);
        assert_eq!(renderer.frame_settings().overdraw_color, 0xff00_ff00);
    }

    #[test]
    fn test_no_active_tiles() {
        let cache = Arc::new(TileCache::default());
        let renderer = renderer(&cache, 8);
        let report = renderer.update(&world_view(0), 0);
        assert_eq!(report.skipped, Some(SkipReason::NoTiles));
    }

    #[test]
    fn test_zoom_window_skip_reported() {
        let cache = Arc::new(TileCache::default());
        let ids = full_grid(&cache, 5);
        let renderer = renderer(&cache, 8);

        let report = renderer.update(&world_view(2), 0);
        assert_eq!(
            report.skipped,
            Some(SkipReason::ZoomWindow {
                tile_zoom: 5,
                camera_zoom: 2
            })
        );
        assert_eq!(report.uploads, 0);
        assert_eq!(report.visible, 0);
        assert_eq!(count_state(&cache, &ids, TileState::NewData), ids.len());
    }

    // =========================================================================
    // Resource lifetime
    // =========================================================================

    #[test]
    fn test_retired_payloads_released_on_update() {
        let cache = Arc::new(TileCache::default());
        let ids = full_grid(&cache, 0);
        let renderer = renderer(&cache, 8);
        renderer.update(&world_view(0), 0);
        assert_eq!(renderer.with_backend(|b| b.live_buffers()), 1);

        cache.lock().set_layers(ids[0], payload());
        renderer.update(&world_view(0).with_changed(false), 16);
        assert_eq!(renderer.with_backend(|b| b.stats().buffers_released), 1);
    }

    #[test]
    fn test_clear_tiles_with_cache_clear() {
        let cache = Arc::new(TileCache::default());
        full_grid(&cache, 1);
        let renderer = renderer(&cache, 8);
        renderer.update(&world_view(1), 0);

        renderer.clear_tiles();
        cache.lock().clear();

        let report = renderer.update(&world_view(1), 16);
        assert_eq!(report.skipped, Some(SkipReason::NoTiles));
        assert_eq!(renderer.with_backend(|b| b.live_buffers()), 0);
    }

    #[test]
    fn test_drop_unpins_draw_set() {
        let cache = Arc::new(TileCache::default());
        let ids = full_grid(&cache, 1);
        {
            let renderer = renderer(&cache, 8);
            renderer.update(&world_view(1), 0);
            assert!(cache.lock().is_locked(ids[0]));
        }
        assert!(ids.iter().all(|id| !cache.lock().is_locked(*id)));
    }

    /// Backend whose uploads check that another thread can take the cache
    /// lock while the upload is in progress.
    struct ContendedBackend {
        inner: HeadlessBackend,
        cache: Arc<TileCache>,
        cache_available: Vec<bool>,
    }

    impl BufferBackend for ContendedBackend {
        fn acquire(&mut self, target: BufferTarget, size: usize) -> BufferHandle {
            self.inner.acquire(target, size)
        }

        fn upload(&mut self, buffer: &mut BufferHandle, data: &[u8]) -> Result<(), UploadError> {
            let (tx, rx) = mpsc::channel();
            let cache = self.cache.clone();
            thread::spawn(move || {
                let _arena = cache.lock();
                let _ = tx.send(());
            });
            self.cache_available
                .push(rx.recv_timeout(Duration::from_millis(500)).is_ok());
            self.inner.upload(buffer, data)
        }

        fn release(&mut self, buffer: BufferHandle) {
            self.inner.release(buffer)
        }

        fn check_usage(&mut self, force: bool) {
            self.inner.check_usage(force)
        }
    }

    impl TextureBackend for ContendedBackend {
        fn upload_bitmap(&mut self, bitmap: &Bitmap) -> TextureHandle {
            self.inner.upload_bitmap(bitmap)
        }

        fn load_atlas(&mut self, atlas: &TextureAtlas) -> TextureHandle {
            self.inner.load_atlas(atlas)
        }

        fn clone_texture(&mut self, texture: &TextureHandle) -> TextureHandle {
            self.inner.clone_texture(texture)
        }

        fn release_texture(&mut self, texture: TextureHandle) {
            self.inner.release_texture(texture)
        }
    }

    #[test]
    fn test_cache_unlocked_during_upload() {
        let cache = Arc::new(TileCache::default());
        let ids = full_grid(&cache, 1);
        let backend = ContendedBackend {
            inner: HeadlessBackend::new(),
            cache: cache.clone(),
            cache_available: Vec::new(),
        };
        let renderer = TileRenderer::new(cache.clone(), backend, RendererConfig::default());

        let report = renderer.update(&world_view(1), 0);
        assert_eq!(report.uploads, 4);

        let available = renderer.with_backend(|b| b.cache_available.clone());
        assert_eq!(available, vec![true; 4]);

        assert_eq!(count_state(&cache, &ids, TileState::Ready), 4);
        let arena = cache.lock();
        assert!(ids.iter().all(|id| arena.get(*id).unwrap().layers().is_some()));
    }

    #[test]
    fn test_payload_replaced_during_upload_is_freed() {
        let cache = Arc::new(TileCache::default());
        let id = {
            let mut arena = cache.lock();
            let id = load(&mut arena, coord(0, 0, 0));
            arena.set_active(&[id]);
            id
        };
        let renderer = renderer(&cache, 8);

        // same steps a loader takes between claim and reattach
        let mut job = claim(&mut cache.lock(), id).unwrap();
        {
            let mut arena = cache.lock();
            arena.reset(id);
            arena.set_layers(id, payload());
            arena.set_state(id, TileState::NewData);
        }
        renderer.with_backend(|b| {
            assert_eq!(upload_tile_data(b, &mut job), 1);
            let stale = restore_uploads(&mut cache.lock(), &mut [], vec![job]);
            assert_eq!(stale.len(), 1);
            for mut layers in stale {
                layers.clear(b);
            }
            assert_eq!(b.live_buffers(), 0);
        });

        let report = renderer.update(&world_view(0), 16);
        assert_eq!(report.uploads, 1, "new content uploaded next frame");
        assert_eq!(renderer.with_backend(|b| b.live_buffers()), 1);
    }

    proptest! {
        #[test]
        fn prop_budget_bound(tiles in 1usize..=16, budget in 1usize..12) {
            let cache = Arc::new(TileCache::default());
            let all = full_grid(&cache, 2);
            {
                let mut arena = cache.lock();
                arena.set_active(&all[..tiles]);
            }
            let renderer = renderer(&cache, budget);

            let report = renderer.update(&world_view(2), 0);
            prop_assert_eq!(report.uploads, tiles.min(budget));
            prop_assert_eq!(
                count_state(&cache, &all[..tiles], TileState::NewData),
                tiles - tiles.min(budget)
            );
        }
    }
}
