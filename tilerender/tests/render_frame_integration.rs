//! Integration tests for the frame pipeline.
//!
//! These tests run a real loader thread against the render coordinator:
//! - loader fills the tile cache while frames are rendered
//! - upload budget holds across frames
//! - published tile sets keep tiles pinned against eviction
//! - symbol layers end up in the uploaded buffers
//! - settings can change while frames render
//!
//! Run with: `cargo test --test render_frame_integration`

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tilerender::coord::TileCoord;
use tilerender::gpu::HeadlessBackend;
use tilerender::layers::{Bitmap, GeometryLayer, Layer, RenderLayers, SymbolItem, SymbolLayer};
use tilerender::renderer::{MapPosition, RendererConfig, TileRenderer, Viewport, TILE_SIZE};
use tilerender::tile::{TileCache, TileId, TileSet, TileState};

// ============================================================================
// Helper Functions
// ============================================================================

/// Build a tile payload with a geometry layer and `symbols` point sprites
/// drawn with one of `bitmaps`.
fn make_payload(coord: TileCoord, symbols: usize, bitmaps: &[Arc<Bitmap>]) -> RenderLayers {
    let mut layer = SymbolLayer::new();
    for i in 0..symbols {
        let bitmap = bitmaps[i % bitmaps.len()].clone();
        let x = (i * 16 % 256) as f32;
        let y = (coord.row as usize * 7 + i * 3) as f32 % 256.0;
        layer.add_symbol(SymbolItem::bitmap(x, y, bitmap).with_billboard(i % 2 == 0));
    }

    RenderLayers::new()
        .with_layer(Layer::Geometry(GeometryLayer::new(vec![coord.col as i16; 12])))
        .with_layer(Layer::Symbol(layer))
}

/// All tiles of the grid at `zoom`, row by row.
fn grid(zoom: u8) -> Vec<TileCoord> {
    let size = 1 << zoom;
    (0..size)
        .flat_map(|row| (0..size).map(move |col| TileCoord::new(col, row, zoom).unwrap()))
        .collect()
}

/// View covering the whole grid at `zoom`.
fn world_view(zoom: u8) -> Viewport {
    let size = TILE_SIZE as f32 * (1 << zoom) as f32;
    Viewport::screen(MapPosition::new(0.5, 0.5, zoom), size, size)
}

/// Load `coords` in batches on a background thread, marking each batch
/// active as soon as it is queued.
fn spawn_loader(
    cache: Arc<TileCache>,
    coords: Vec<TileCoord>,
    batch: usize,
    done: mpsc::Sender<Vec<TileId>>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let bitmaps: Vec<Arc<Bitmap>> = (0..3)
            .map(|i| Arc::new(Bitmap::solid(8 + i * 4, 8 + i * 4, [255, 128, 0, 255])))
            .collect();
        let mut loaded = Vec::new();

        for chunk in coords.chunks(batch) {
            let ids: Vec<TileId> = {
                let mut arena = cache.lock();
                chunk.iter().map(|c| arena.get_or_insert(*c)).collect()
            };
            {
                let mut arena = cache.lock();
                let mut active = loaded.clone();
                active.extend_from_slice(&ids);
                arena.set_active(&active);
            }

            // "decode" outside the lock
            let payloads: Vec<RenderLayers> =
                chunk.iter().map(|c| make_payload(*c, 20, &bitmaps)).collect();
            thread::sleep(Duration::from_millis(1));

            let mut arena = cache.lock();
            for (id, payload) in ids.iter().zip(payloads) {
                arena.set_layers(*id, payload);
                arena.set_state(*id, TileState::NewData);
            }
            loaded.extend_from_slice(&ids);
        }

        let _ = done.send(loaded);
    })
}

// ============================================================================
// Integration Tests
// ============================================================================

/// Frames rendered while the loader streams tiles in never exceed the
/// upload budget, and every tile eventually becomes drawable.
#[test]
fn test_streaming_load_respects_budget() {
    let cache = Arc::new(TileCache::default());
    let renderer = TileRenderer::new(
        cache.clone(),
        HeadlessBackend::new(),
        RendererConfig::default().with_max_tile_uploads(5),
    );

    let mut coords = grid(3);
    coords.shuffle(&mut StdRng::seed_from_u64(0x7117));
    let total = coords.len();
    let (tx, rx) = mpsc::channel();
    let loader = spawn_loader(cache.clone(), coords, 7, tx);

    let mut frame_time = 1_000;
    let mut uploaded = 0;
    let mut loaded: Option<Vec<TileId>> = None;

    for _ in 0..10_000 {
        let report = renderer.update(&world_view(3), frame_time);
        assert!(report.uploads <= 5, "frame uploaded {}", report.uploads);
        uploaded += report.uploads;
        frame_time += 16;

        if loaded.is_none() {
            loaded = rx.try_recv().ok();
            if loaded.is_none() {
                thread::sleep(Duration::from_micros(200));
            }
        }
        if let Some(ids) = &loaded {
            let arena = cache.lock();
            if ids.iter().all(|id| arena.state(*id) == Some(TileState::Ready)) {
                break;
            }
        }
        thread::yield_now();
    }
    loader.join().unwrap();

    assert_eq!(uploaded, total);

    let mut set = TileSet::new();
    assert!(renderer.get_visible_tiles(&mut set));
    assert_eq!(set.len(), total);

    let distinct_buffers = renderer.with_backend(|b| b.live_buffers());
    assert_eq!(distinct_buffers, total);

    renderer.release_tiles(&mut set);
}

/// Uploaded buffers contain the geometry followed by four vertices per
/// symbol, and each tile binds one texture per bitmap it uses.
#[test]
fn test_symbols_packed_into_tile_buffer() {
    let cache = Arc::new(TileCache::default());
    let bitmaps: Vec<Arc<Bitmap>> = (0..2)
        .map(|_| Arc::new(Bitmap::solid(16, 16, [0, 0, 0, 255])))
        .collect();
    let coord = TileCoord::new(0, 0, 0).unwrap();
    let id = {
        let mut arena = cache.lock();
        let id = arena.get_or_insert(coord);
        arena.set_layers(id, make_payload(coord, 9, &bitmaps));
        arena.set_state(id, TileState::NewData);
        arena.set_active(&[id]);
        id
    };

    let renderer = TileRenderer::new(cache.clone(), HeadlessBackend::new(), RendererConfig::default());
    assert_eq!(renderer.update(&world_view(0), 0).uploads, 1);

    assert_eq!(renderer.with_backend(|b| b.live_textures()), 2);

    let arena = cache.lock();
    let layers = arena.get(id).unwrap().layers().unwrap();
    let vbo = layers.vbo.as_ref().unwrap().id();

    let Layer::Symbol(symbols) = &layers.layers[1] else {
        panic!("expected symbol layer");
    };
    assert_eq!(symbols.offset(), 24);
    assert_eq!(symbols.textures().len(), 2);
    let indices: u32 = symbols.textures().iter().map(|t| t.indices).sum();
    assert_eq!(indices, 9 * 6);
    drop(arena);

    let bytes = renderer.with_backend(|b| b.buffer_data(vbo).map(<[u8]>::len));
    assert_eq!(bytes, Some(12 * 2 + 9 * 4 * 12));
}

/// Tiles held by a published set can not be evicted by the loader until
/// the set is released.
#[test]
fn test_published_set_pins_tiles_against_eviction() {
    let cache = Arc::new(TileCache::default());
    let coords = grid(1);
    let ids: Vec<TileId> = {
        let mut arena = cache.lock();
        let bitmaps = vec![Arc::new(Bitmap::solid(4, 4, [1, 2, 3, 4]))];
        let ids: Vec<TileId> = coords
            .iter()
            .map(|c| {
                let id = arena.get_or_insert(*c);
                arena.set_layers(id, make_payload(*c, 2, &bitmaps));
                arena.set_state(id, TileState::NewData);
                id
            })
            .collect();
        arena.set_active(&ids);
        ids
    };

    let renderer = TileRenderer::new(cache.clone(), HeadlessBackend::new(), RendererConfig::default());
    renderer.update(&world_view(1), 0);

    let mut set = TileSet::new();
    renderer.get_visible_tiles(&mut set);

    // loader moves on: nothing active, tries to evict everything
    let evicted = thread::spawn({
        let cache = cache.clone();
        move || {
            let mut arena = cache.lock();
            arena.set_active(&[]);
            arena.evict(0)
        }
    })
    .join()
    .unwrap();
    assert_eq!(evicted, 0, "draw set and published set still pin the tiles");

    // next frame drops the draw set, the published set still pins
    renderer.update(&world_view(1), 16);
    assert_eq!(cache.lock().evict(0), 0);

    renderer.release_tiles(&mut set);
    assert_eq!(cache.lock().evict(0), ids.len());

    // GPU resources of evicted tiles are freed by the next frame
    renderer.update(&world_view(1), 32);
    assert_eq!(renderer.with_backend(|b| b.live_buffers()), 0);
    assert_eq!(renderer.with_backend(|b| b.live_textures()), 0);
}

/// Settings can be changed from another thread while frames are rendered.
#[test]
fn test_settings_changed_concurrently() {
    let cache = Arc::new(TileCache::default());
    {
        let mut arena = cache.lock();
        let bitmaps = vec![Arc::new(Bitmap::solid(4, 4, [9, 9, 9, 255]))];
        let ids: Vec<TileId> = grid(2)
            .into_iter()
            .map(|c| {
                let id = arena.get_or_insert(c);
                arena.set_layers(id, make_payload(c, 1, &bitmaps));
                arena.set_state(id, TileState::NewData);
                id
            })
            .collect();
        arena.set_active(&ids);
    }
    let renderer = Arc::new(TileRenderer::new(
        cache.clone(),
        HeadlessBackend::new(),
        RendererConfig::default(),
    ));
    let stop = Arc::new(AtomicBool::new(false));

    let toggler = thread::spawn({
        let renderer = renderer.clone();
        let stop = stop.clone();
        move || {
            let mut n = 0u32;
            while !stop.load(Ordering::Relaxed) {
                renderer.set_bitmap_alpha(if n % 2 == 0 { 0.0 } else { 1.0 });
                renderer.set_overdraw_color(n);
                n = n.wrapping_add(1);
                thread::yield_now();
            }
        }
    });

    for frame in 0..200u64 {
        let report = renderer.update(&world_view(2), frame * 16);
        assert!(report.uploads <= 8);
    }
    stop.store(true, Ordering::Relaxed);
    toggler.join().unwrap();

    renderer.set_bitmap_alpha(1.0);
    for frame in 200..210u64 {
        renderer.update(&world_view(2), frame * 16);
    }
    let arena = cache.lock();
    assert!(arena
        .active()
        .iter()
        .all(|id| arena.state(*id) == Some(TileState::Ready)));
}
