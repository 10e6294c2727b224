//! Texture sources and per-batch texture binding records.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use image::{Rgba, RgbaImage};

use crate::gpu::TextureHandle;

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);

fn next_source_id() -> u64 {
    NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed)
}

/// A standalone symbol image.
///
/// Bitmaps are compared by identity (`id`), not by pixel content: two
/// bitmaps with equal pixels still get separate textures.
#[derive(Debug)]
pub struct Bitmap {
    id: u64,
    image: RgbaImage,
}

impl Bitmap {
    pub fn new(image: RgbaImage) -> Self {
        Self {
            id: next_source_id(),
            image,
        }
    }

    /// Bitmap filled with a single color.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        Self::new(RgbaImage::from_pixel(width, height, Rgba(rgba)))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }
}

/// A packed texture holding many symbol images.
#[derive(Debug)]
pub struct TextureAtlas {
    id: u64,
    image: RgbaImage,
}

impl TextureAtlas {
    pub fn new(image: RgbaImage) -> Self {
        Self {
            id: next_source_id(),
            image,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }
}

/// Pixel rectangle inside an atlas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AtlasRect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl AtlasRect {
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }
}

/// One image inside a [`TextureAtlas`].
#[derive(Debug, Clone)]
pub struct TextureRegion {
    pub atlas: Arc<TextureAtlas>,
    pub rect: AtlasRect,
}

impl TextureRegion {
    pub fn new(atlas: Arc<TextureAtlas>, rect: AtlasRect) -> Self {
        Self { atlas, rect }
    }
}

/// Where the pixels of a bound texture came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureSource {
    Bitmap(u64),
    Atlas(u64),
}

/// A texture bound for one batch of sprites.
///
/// `offset` is the index of the first element drawn with this texture and
/// `indices` the number of elements, so the draw stage can issue one call
/// per record without rescanning the vertex data.
#[derive(Debug)]
pub struct TextureItem {
    pub handle: TextureHandle,
    pub source: TextureSource,
    pub offset: u32,
    pub indices: u32,
}

impl TextureItem {
    pub fn new(handle: TextureHandle, source: TextureSource) -> Self {
        Self {
            handle,
            source,
            offset: 0,
            indices: 0,
        }
    }

    pub fn width(&self) -> u32 {
        self.handle.width()
    }

    pub fn height(&self) -> u32 {
        self.handle.height()
    }
}
