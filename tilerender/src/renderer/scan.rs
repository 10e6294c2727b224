//! Scanline fill of the view quad over the tile grid.

use super::viewport::{MapPosition, TILE_SIZE};
use crate::coord::grid_size;

/// Rasterizes the visible map area into tile rows.
pub trait ScanlineFill {
    /// Call `visit(row, x_start, x_end)` for every tile row intersecting the
    /// view quad `plane` at `zoom`. Columns `[x_start, x_end)` are not
    /// clamped to the grid.
    fn scan(
        &mut self,
        pos: &MapPosition,
        plane: &[f32; 8],
        zoom: u8,
        visit: &mut dyn FnMut(i32, i32, i32),
    );
}

/// Conservative scanline fill for convex view quads.
///
/// For each row the reported span covers every column the quad touches
/// within that row.
#[derive(Debug, Default, Clone)]
pub struct ScanBox {
    corners: [(f64, f64); 4],
}

impl ScanBox {
    pub fn new() -> Self {
        Self::default()
    }

    fn to_tile_space(&mut self, pos: &MapPosition, plane: &[f32; 8], zoom: u8) {
        let size = f64::from(grid_size(zoom));
        let div = pos.scale * TILE_SIZE;
        for (i, corner) in self.corners.iter_mut().enumerate() {
            let px = f64::from(plane[i * 2]);
            let py = f64::from(plane[i * 2 + 1]);
            *corner = ((pos.x + px / div) * size, (pos.y + py / div) * size);
        }
    }

    /// Horizontal extent of the quad within `[y0, y1]`.
    fn row_extent(&self, y0: f64, y1: f64) -> Option<(f64, f64)> {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut include = |x: f64| {
            min = min.min(x);
            max = max.max(x);
        };

        for i in 0..4 {
            let (ax, ay) = self.corners[i];
            let (bx, by) = self.corners[(i + 1) % 4];

            if ay == by {
                if ay >= y0 && ay <= y1 {
                    include(ax);
                    include(bx);
                }
                continue;
            }

            let t0 = (y0 - ay) / (by - ay);
            let t1 = (y1 - ay) / (by - ay);
            let tmin = t0.min(t1).max(0.0);
            let tmax = t0.max(t1).min(1.0);
            if tmin <= tmax {
                include(ax + (bx - ax) * tmin);
                include(ax + (bx - ax) * tmax);
            }
        }

        (min <= max).then_some((min, max))
    }
}

impl ScanlineFill for ScanBox {
    fn scan(
        &mut self,
        pos: &MapPosition,
        plane: &[f32; 8],
        zoom: u8,
        visit: &mut dyn FnMut(i32, i32, i32),
    ) {
        self.to_tile_space(pos, plane, zoom);

        let (min_y, max_y) = self
            .corners
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &(_, y)| {
                (lo.min(y), hi.max(y))
            });
        if !min_y.is_finite() || !max_y.is_finite() {
            return;
        }

        let rows = grid_size(zoom);
        let first = (min_y.floor() as i32).max(0);
        let last = (max_y.ceil() as i32).min(rows);

        for row in first..last {
            let y0 = f64::from(row).max(min_y);
            let y1 = f64::from(row + 1).min(max_y);
            if let Some((x_min, x_max)) = self.row_extent(y0, y1) {
                let x_start = x_min.floor() as i32;
                let x_end = x_max.ceil() as i32;
                if x_start < x_end {
                    visit(row, x_start, x_end);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(pos: MapPosition, plane: [f32; 8], zoom: u8) -> Vec<(i32, i32, i32)> {
        let mut spans = Vec::new();
        ScanBox::new().scan(&pos, &plane, zoom, &mut |row, x1, x2| spans.push((row, x1, x2)));
        spans
    }

    fn rect(w: f32, h: f32) -> [f32; 8] {
        [-w, -h, w, -h, w, h, -w, h]
    }

    #[test]
    fn test_single_tile_view() {
        // center of tile (2, 1) at zoom 2, view smaller than one tile
        let pos = MapPosition::centered_on(2, 1, 2);
        let spans = collect(pos, rect(64.0, 64.0), 2);
        assert_eq!(spans, vec![(1, 2, 3)]);
    }

    #[test]
    fn test_view_spanning_tiles() {
        let pos = MapPosition::centered_on(2, 1, 2);
        // 1.5 tiles each way
        let spans = collect(pos, rect(384.0, 384.0), 2);
        assert_eq!(spans, vec![(0, 1, 4), (1, 1, 4), (2, 1, 4)]);
    }

    #[test]
    fn test_columns_not_clamped_at_antimeridian() {
        let pos = MapPosition::centered_on(0, 0, 1);
        let spans = collect(pos, rect(256.0, 64.0), 1);
        assert_eq!(spans, vec![(0, -1, 2)]);
    }

    #[test]
    fn test_rows_clamped_to_grid() {
        let pos = MapPosition::centered_on(0, 0, 1);
        let spans = collect(pos, rect(64.0, 512.0), 1);
        assert!(spans.iter().all(|(row, _, _)| (0..2).contains(row)));
        assert_eq!(spans.len(), 2);
    }

    #[test]
    fn test_scan_at_deeper_zoom_than_camera() {
        let pos = MapPosition::centered_on(0, 0, 1);
        // same view at zoom 2: each zoom-1 tile covers 2x2 tiles
        let spans = collect(pos, rect(64.0, 64.0), 2);
        assert_eq!(spans, vec![(0, 0, 2), (1, 0, 2)]);
    }

    #[test]
    fn test_rotated_quad_spans_follow_shape() {
        let pos = MapPosition::centered_on(4, 4, 3);
        // diamond with radius 2 tiles
        let plane = [0.0, -512.0, 512.0, 0.0, 0.0, 512.0, -512.0, 0.0];
        let spans = collect(pos, plane, 3);
        assert_eq!(spans.first(), Some(&(2, 4, 5)));
        assert!(spans.iter().any(|&(row, x1, x2)| row == 4 && x1 == 2 && x2 == 7));
    }
}
