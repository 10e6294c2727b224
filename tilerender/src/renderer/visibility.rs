//! Visibility scanner.
//!
//! Marks the draw-set tiles intersecting the view and synthesizes wrap
//! placeholders for spans reaching past the antimeridian, so content near
//! the date line shows up on both sides of the screen.

use tracing::trace;

use super::scan::ScanlineFill;
use super::viewport::MapPosition;
use crate::coord::{grid_size, wrap_col, TileCoord};
use crate::tile::{TileArena, TileId, TileSet, TileState};

/// A tile drawn one world width away from its holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placeholder {
    /// On-screen position, column outside the grid.
    pub coord: TileCoord,
    /// Cached tile whose content is drawn.
    pub holder: TileId,
    /// Mirrors the holder's state.
    pub state: TileState,
    pub is_visible: bool,
}

/// Range of tile zooms scanned around the camera zoom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoomWindow {
    pub above: u8,
    pub below: u8,
}

impl ZoomWindow {
    pub fn new(above: u8, below: u8) -> Self {
        Self { above, below }
    }

    /// Whether tiles at `tile_zoom` are scanned for a camera at
    /// `camera_zoom`. The window bounds are inclusive.
    pub fn contains(&self, tile_zoom: u8, camera_zoom: u8) -> bool {
        let tile = i32::from(tile_zoom);
        let camera = i32::from(camera_zoom);
        tile <= camera + i32::from(self.above) && tile >= camera - i32::from(self.below)
    }
}

/// Result of a visibility pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    Scanned { visible: usize, placeholders: usize },
    /// Tile zoom outside the window; nothing is visible.
    OutOfZoomWindow { tile_zoom: u8, camera_zoom: u8 },
}

/// Recompute `is_visible` for the tiles of `draw` and rebuild `placeholders`.
///
/// The scan runs at the zoom of the first draw-set entry. At most
/// `draw.capacity() - draw.len()` placeholders are created.
pub fn update_visibility(
    scanner: &mut dyn ScanlineFill,
    arena: &mut TileArena,
    draw: &TileSet,
    placeholders: &mut Vec<Placeholder>,
    pos: &MapPosition,
    plane: &[f32; 8],
    window: ZoomWindow,
) -> ScanOutcome {
    placeholders.clear();
    for entry in draw {
        if let Some(tile) = arena.get_mut(entry.id) {
            tile.set_visible(false);
        }
    }

    let Some(first) = draw.entries().first() else {
        return ScanOutcome::Scanned {
            visible: 0,
            placeholders: 0,
        };
    };
    let zoom = first.coord.zoom;

    if !window.contains(zoom, pos.zoom) {
        trace!(tile_zoom = zoom, camera_zoom = pos.zoom, "Skipping visibility scan");
        return ScanOutcome::OutOfZoomWindow {
            tile_zoom: zoom,
            camera_zoom: pos.zoom,
        };
    }

    let max_placeholders = draw.capacity().saturating_sub(draw.len());
    let xmax = grid_size(zoom);

    scanner.scan(pos, plane, zoom, &mut |row, x1, x2| {
        for entry in draw {
            let c = entry.coord;
            if c.zoom == zoom && c.row == row && c.col >= x1 && c.col < x2 {
                if let Some(tile) = arena.get_mut(entry.id) {
                    tile.set_visible(true);
                }
            }
        }

        if x1 >= 0 && x2 <= xmax {
            return;
        }

        for x in x1..x2 {
            let Some(wrapped) = wrap_col(x, zoom) else {
                continue;
            };
            if placeholders
                .iter()
                .any(|p| p.coord.col == x && p.coord.row == row)
            {
                continue;
            }

            let holder = draw.iter().find(|e| {
                e.coord.zoom == zoom && e.coord.col == wrapped && e.coord.row == row
            });
            let Some(holder) = holder else {
                continue;
            };

            if placeholders.len() >= max_placeholders {
                break;
            }

            let Some(tile) = arena.get_mut(holder.id) else {
                continue;
            };
            tile.set_visible(true);
            placeholders.push(Placeholder {
                coord: TileCoord::wrapped(x, row, zoom),
                holder: holder.id,
                state: tile.state(),
                is_visible: true,
            });
        }
    });

    let visible = draw
        .iter()
        .filter(|e| arena.get(e.id).is_some_and(|t| t.is_visible()))
        .count();

    ScanOutcome::Scanned {
        visible,
        placeholders: placeholders.len(),
    }
}
