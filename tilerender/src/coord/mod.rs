//! Tile coordinates
//!
//! Tile grid addressing for the quad-tree (column, row, zoom), parent/child
//! navigation, antimeridian wrap helpers and conversions between geographic
//! coordinates and Web Mercator tile space.

mod types;

pub use types::{
    grid_size, wrap_col, CoordError, TileCoord, MAX_LAT, MAX_ZOOM, MIN_LAT, MIN_LON, MIN_ZOOM,
};

use std::f64::consts::PI;

/// Converts geographic coordinates to normalized Web Mercator coordinates.
///
/// Both axes are in `[0, 1)`: `x` grows eastwards from the antimeridian,
/// `y` grows southwards from the northern mercator limit.
#[inline]
pub fn to_mercator(lat: f64, lon: f64) -> Result<(f64, f64), CoordError> {
    if !(MIN_LAT..=MAX_LAT).contains(&lat) {
        return Err(CoordError::InvalidLatitude(lat));
    }
    if !(MIN_LON..=180.0).contains(&lon) {
        return Err(CoordError::InvalidLongitude(lon));
    }

    let x = (lon + 180.0) / 360.0;
    let lat_rad = lat * PI / 180.0;
    let y = (1.0 - lat_rad.tan().asinh() / PI) / 2.0;

    Ok((x.min(1.0 - f64::EPSILON), y.clamp(0.0, 1.0 - f64::EPSILON)))
}

/// Tile containing a geographic location at `zoom`.
#[inline]
pub fn to_tile_coords(lat: f64, lon: f64, zoom: u8) -> Result<TileCoord, CoordError> {
    if zoom > MAX_ZOOM {
        return Err(CoordError::InvalidZoom(zoom));
    }
    let (x, y) = to_mercator(lat, lon)?;
    let n = grid_size(zoom) as f64;

    TileCoord::new((x * n) as i32, (y * n) as i32, zoom)
}

/// Latitude and longitude of the tile's northwest corner.
#[inline]
pub fn tile_to_lat_lon(tile: &TileCoord) -> (f64, f64) {
    let n = grid_size(tile.zoom) as f64;

    let lon = tile.col as f64 / n * 360.0 - 180.0;

    let y = tile.row as f64 / n;
    let lat_rad = (PI * (1.0 - 2.0 * y)).sinh().atan();
    let lat = lat_rad * 180.0 / PI;

    (lat, lon)
}
