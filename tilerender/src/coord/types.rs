//! Tile coordinate types.

use std::fmt;

use thiserror::Error;

/// Minimum latitude representable in Web Mercator.
pub const MIN_LAT: f64 = -85.05112878;
/// Maximum latitude representable in Web Mercator.
pub const MAX_LAT: f64 = 85.05112878;
/// Minimum longitude.
pub const MIN_LON: f64 = -180.0;
/// Minimum supported zoom level.
pub const MIN_ZOOM: u8 = 0;
/// Maximum supported zoom level.
pub const MAX_ZOOM: u8 = 22;

/// Errors produced when building coordinates from untrusted input.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoordError {
    #[error("Invalid latitude: {0} (must be between -85.05112878 and 85.05112878)")]
    InvalidLatitude(f64),

    #[error("Invalid longitude: {0} (must be between -180 and 180)")]
    InvalidLongitude(f64),

    #[error("Invalid zoom level: {0} (must be between 0 and 22)")]
    InvalidZoom(u8),

    #[error("Tile {col}/{row} is outside the {size}x{size} grid")]
    OutOfGrid { col: i32, row: i32, size: i32 },
}

/// Grid address of a map tile: column (tileX), row (tileY) and zoom level.
///
/// Cached tiles always lie inside `[0, 2^zoom)` on both axes. Placeholder
/// tiles that duplicate content across the antimeridian carry a column one
/// world-width outside that range; they are built with [`TileCoord::wrapped`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoord {
    /// Column, 0 = west edge.
    pub col: i32,
    /// Row, 0 = north edge.
    pub row: i32,
    /// Zoom level.
    pub zoom: u8,
}

impl TileCoord {
    /// Create a validated tile coordinate.
    pub fn new(col: i32, row: i32, zoom: u8) -> Result<Self, CoordError> {
        if zoom > MAX_ZOOM {
            return Err(CoordError::InvalidZoom(zoom));
        }
        let size = grid_size(zoom);
        if !(0..size).contains(&col) || !(0..size).contains(&row) {
            return Err(CoordError::OutOfGrid { col, row, size });
        }
        Ok(Self { col, row, zoom })
    }

    /// Coordinate of a wrap-around duplicate. The column is not validated.
    pub fn wrapped(col: i32, row: i32, zoom: u8) -> Self {
        Self { col, row, zoom }
    }

    /// Whether the column lies within the grid at this zoom.
    pub fn is_in_grid(&self) -> bool {
        let size = grid_size(self.zoom);
        (0..size).contains(&self.col) && (0..size).contains(&self.row)
    }

    /// The tile one level up that covers this one.
    pub fn parent(&self) -> Option<TileCoord> {
        if self.zoom == 0 {
            return None;
        }
        Some(TileCoord {
            col: self.col >> 1,
            row: self.row >> 1,
            zoom: self.zoom - 1,
        })
    }

    /// One of the four tiles one level down.
    ///
    /// Index layout: `0` north-west, `1` north-east, `2` south-west,
    /// `3` south-east.
    pub fn child(&self, index: usize) -> TileCoord {
        debug_assert!(index < 4, "child index {} out of range", index);
        TileCoord {
            col: (self.col << 1) + (index & 1) as i32,
            row: (self.row << 1) + (index >> 1) as i32,
            zoom: self.zoom + 1,
        }
    }

    /// Position of this tile within its parent (see [`TileCoord::child`]).
    pub fn child_index(&self) -> usize {
        ((self.col & 1) | ((self.row & 1) << 1)) as usize
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.col, self.row)
    }
}

/// Number of tiles along one axis at `zoom`.
#[inline]
pub fn grid_size(zoom: u8) -> i32 {
    1 << zoom
}

/// Map a column that lies outside the grid back into it by one world width.
///
/// Returns `None` for columns already inside the grid and for columns more
/// than one world width away.
pub fn wrap_col(col: i32, zoom: u8) -> Option<i32> {
    let size = grid_size(zoom);
    if (0..size).contains(&col) {
        return None;
    }
    let wrapped = if col < 0 { col + size } else { col - size };
    (0..size).contains(&wrapped).then_some(wrapped)
}
