//! Vertex formats and scratch storage shared by the layer compilers.

use bytemuck::{Pod, Zeroable};
use parking_lot::Mutex;

/// Vertices emitted per sprite quad.
pub const VERTICES_PER_SPRITE: usize = 4;
/// Indices used to draw one sprite quad (two triangles).
pub const INDICES_PER_SPRITE: u32 = 6;
/// Sprites held by one scratch chunk before it is flushed.
pub const SCRATCH_SPRITES: usize = 15;

const SCRATCH_VERTICES: usize = SCRATCH_SPRITES * VERTICES_PER_SPRITE;

/// One corner of a sprite quad, six `i16` components.
///
/// * `pos` - fixed-point anchor; the low bit of `pos[0]` is the billboard flag
/// * `extent` - fixed-point offset of this corner from the anchor
/// * `tex` - fixed-point texture coordinate in pixels
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SpriteVertex {
    pub pos: [i16; 2],
    pub extent: [i16; 2],
    pub tex: [i16; 2],
}

/// Fixed-point corner and texture bounds of a sprite.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpriteQuad {
    pub x1: i16,
    pub y1: i16,
    pub x2: i16,
    pub y2: i16,
    pub u1: i16,
    pub v1: i16,
    pub u2: i16,
    pub v2: i16,
}

/// Write the four corners of a sprite anchored at `(tx, ty)`.
///
/// Order: top-left, bottom-left, top-right, bottom-right.
pub fn put_sprite(buf: &mut [SpriteVertex], tx: i16, ty: i16, quad: &SpriteQuad) {
    let pos = [tx, ty];
    buf[0] = SpriteVertex {
        pos,
        extent: [quad.x1, quad.y1],
        tex: [quad.u1, quad.v2],
    };
    buf[1] = SpriteVertex {
        pos,
        extent: [quad.x1, quad.y2],
        tex: [quad.u1, quad.v1],
    };
    buf[2] = SpriteVertex {
        pos,
        extent: [quad.x2, quad.y1],
        tex: [quad.u2, quad.v2],
    };
    buf[3] = SpriteVertex {
        pos,
        extent: [quad.x2, quad.y2],
        tex: [quad.u2, quad.v1],
    };
}

/// Growable destination for compiled layer data, in `i16` units.
#[derive(Debug, Default, Clone)]
pub struct VertexBuffer {
    data: Vec<i16>,
}

impl VertexBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity_bytes(bytes: usize) -> Self {
        Self {
            data: Vec::with_capacity(bytes / 2),
        }
    }

    /// Current write position in bytes.
    pub fn position_bytes(&self) -> usize {
        self.data.len() * 2
    }

    pub fn put(&mut self, shorts: &[i16]) {
        self.data.extend_from_slice(shorts);
    }

    pub fn put_vertices(&mut self, vertices: &[SpriteVertex]) {
        self.data
            .extend_from_slice(bytemuck::cast_slice::<SpriteVertex, i16>(vertices));
    }

    pub fn as_shorts(&self) -> &[i16] {
        &self.data
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.data)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

static SCRATCH_POOL: Mutex<Vec<Vec<SpriteVertex>>> = parking_lot::const_mutex(Vec::new());

/// Borrow a scratch chunk of [`SCRATCH_SPRITES`] sprites from the pool.
pub fn take_scratch() -> Vec<SpriteVertex> {
    SCRATCH_POOL
        .lock()
        .pop()
        .unwrap_or_else(|| vec![SpriteVertex::default(); SCRATCH_VERTICES])
}

/// Return a chunk obtained from [`take_scratch`].
pub fn release_scratch(chunk: Vec<SpriteVertex>) {
    if chunk.len() == SCRATCH_VERTICES {
        SCRATCH_POOL.lock().push(chunk);
    }
}
