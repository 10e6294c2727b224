//! Fade-in timing for tiles and their stand-ins.
//!
//! A tile fades in from the moment it is first drawn. When a parent or child
//! stands in for a missing tile, the stand-in should not restart the fade of
//! content already on screen, so its effective fade start is the earliest
//! fade start among the close relatives involved.

use crate::tile::{TileArena, TileId, TileSet};

/// Grace period subtracted from the frame time for tiles without relatives
/// already fading, in milliseconds.
const FADE_GRACE_MS: u64 = 50;

/// Earliest fade start (ms) among `id` and the relatives relevant at
/// `proxy_level`.
///
/// `proxy_level` is the zoom of `id` relative to the tile set being drawn:
/// `-1` parent, `0` current, `1` child. Children are checked for the current
/// level and above (one more level down when drawing a parent); ancestors are
/// walked `proxy_level + 2` levels up.
pub fn min_fade(arena: &TileArena, id: TileId, proxy_level: i32, frame_time: u64) -> u64 {
    let mut earliest = frame_time.saturating_sub(FADE_GRACE_MS);

    if proxy_level <= 0 {
        for c in 0..4 {
            let Some(child_id) = arena.child(id, c) else {
                continue;
            };
            let Some(child) = arena.get(child_id) else {
                continue;
            };

            if child.fade_time() > 0 && child.fade_time() < earliest {
                earliest = child.fade_time();
            }

            if proxy_level >= -1 {
                earliest = earliest.min(min_fade(arena, child_id, proxy_level - 1, frame_time));
            }
        }
    }

    let mut parent = arena.parent(id);
    for _ in (-1..=proxy_level).rev() {
        let Some(parent_id) = parent else {
            break;
        };
        if let Some(tile) = arena.get(parent_id) {
            if tile.fade_time() > 0 && tile.fade_time() < earliest {
                earliest = tile.fade_time();
            }
        }
        parent = arena.parent(parent_id);
    }

    earliest
}

/// Opacity of a tile `fade_start` ms into a fade lasting `fade_time_ms`.
pub fn fade_alpha(fade_start: u64, frame_time: u64, fade_time_ms: u64) -> f32 {
    if fade_time_ms == 0 || frame_time <= fade_start {
        return if fade_time_ms == 0 { 1.0 } else { 0.0 };
    }
    let elapsed = (frame_time - fade_start) as f32;
    (elapsed / fade_time_ms as f32).clamp(0.0, 1.0)
}

/// Stamp a fade start on every tile of `set` that has none yet.
///
/// Returns the number of tiles stamped.
pub fn begin_fade(arena: &mut TileArena, set: &TileSet, frame_time: u64) -> usize {
    let mut stamped = 0;
    for entry in set {
        let start = min_fade(arena, entry.id, i32::from(entry.proxy_level), frame_time);
        if let Some(tile) = arena.get_mut(entry.id) {
            if tile.fade_time() == 0 {
                tile.set_fade_time(start.max(1));
                stamped += 1;
            }
        }
    }
    stamped
}
