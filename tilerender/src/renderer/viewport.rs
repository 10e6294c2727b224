use crate::coord::{grid_size, to_mercator, CoordError};

/// Tile edge length in pixels at scale 1.
pub const TILE_SIZE: f64 = 256.0;

/// Camera position on the map.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapPosition {
    /// Map center, world-relative in `[0, 1)`, 0 = west edge.
    pub x: f64,
    /// Map center, world-relative in `[0, 1)`, 0 = north edge.
    pub y: f64,
    /// World size in tiles; `2^zoom` at integral zoom.
    pub scale: f64,
    /// Integral zoom level of the camera.
    pub zoom: u8,
}

impl MapPosition {
    /// Position at `(x, y)` with the scale of integral `zoom`.
    pub fn new(x: f64, y: f64, zoom: u8) -> Self {
        Self {
            x,
            y,
            scale: f64::from(grid_size(zoom)),
            zoom,
        }
    }

    /// Position over a geographic location.
    pub fn from_lat_lon(lat: f64, lon: f64, zoom: u8) -> Result<Self, CoordError> {
        let (x, y) = to_mercator(lat, lon)?;
        Ok(Self::new(x, y, zoom))
    }

    /// Position centered on tile `(col, row)` at `zoom`.
    pub fn centered_on(col: i32, row: i32, zoom: u8) -> Self {
        let size = f64::from(grid_size(zoom));
        Self::new(
            (f64::from(col) + 0.5) / size,
            (f64::from(row) + 0.5) / size,
            zoom,
        )
    }
}

/// What the camera sees in one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Viewport {
    pub pos: MapPosition,
    /// View frustum corners projected onto the map plane, in pixels relative
    /// to the map center: `[x0, y0, x1, y1, x2, y2, x3, y3]`.
    pub plane: [f32; 8],
    /// The camera moved since the previous frame.
    pub changed: bool,
}

impl Viewport {
    pub fn new(pos: MapPosition, plane: [f32; 8], changed: bool) -> Self {
        Self {
            pos,
            plane,
            changed,
        }
    }

    /// Unrotated, untilted screen of `width` x `height` pixels.
    pub fn screen(pos: MapPosition, width: f32, height: f32) -> Self {
        let w = width / 2.0;
        let h = height / 2.0;
        Self::new(pos, [-w, -h, w, -h, w, h, -w, h], true)
    }

    pub fn with_changed(mut self, changed: bool) -> Self {
        self.changed = changed;
        self
    }
}
