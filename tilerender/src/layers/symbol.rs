//! Point-symbol batch compiler.
//!
//! A [`SymbolLayer`] collects sprite placement requests for one tile and
//! compiles them into interleaved [`SpriteVertex`] data plus one
//! [`TextureItem`] per run of items sharing a texture, so the draw stage binds
//! each texture once and issues one call per record.
//!
//! Items are kept grouped by texture as they are added (each new item goes
//! right after the first item with the same bitmap or atlas region), which
//! makes every texture a single contiguous run without a sort pass.
//!
//! # Fixed-point format
//!
//! Positions, corner extents and texture coordinates are multiplied by
//! [`SCALE`] and stored as `i16`. The anchor x coordinate is forced even and
//! its low bit carries the billboard flag.

use std::sync::Arc;

use tracing::debug;

use super::texture::{AtlasRect, Bitmap, TextureItem, TextureRegion, TextureSource};
use super::vertex::{
    put_sprite, release_scratch, take_scratch, SpriteQuad, SpriteVertex, VertexBuffer,
    INDICES_PER_SPRITE, VERTICES_PER_SPRITE,
};
use crate::gpu::{TextureBackend, TextureHandle};

/// Fixed-point scale applied to coordinates and pixel sizes.
pub const SCALE: f32 = 8.0;

/// Clears the bit that carries the billboard flag.
const LBIT_MASK: i32 = !1;

const SHORTS_PER_VERTEX: usize = std::mem::size_of::<SpriteVertex>() / 2;

/// Normalized pivot inside a symbol image, `(0, 0)` top-left.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointF {
    pub x: f32,
    pub y: f32,
}

impl PointF {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Image drawn for a symbol.
#[derive(Debug, Clone)]
pub enum SymbolTexture {
    Bitmap(Arc<Bitmap>),
    Region(TextureRegion),
}

/// Grouping key: items with equal keys are drawn with the same texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolKey {
    Bitmap(u64),
    Region { atlas: u64, rect: AtlasRect },
}

/// One requested point sprite.
#[derive(Debug, Clone)]
pub struct SymbolItem {
    /// Anchor in tile-local coordinates.
    pub x: f32,
    pub y: f32,
    /// Keep the sprite facing the viewer regardless of map rotation.
    pub billboard: bool,
    /// Pivot; `None` centers the image on the anchor.
    pub offset: Option<PointF>,
    /// `None` marks an invalid item that compilation skips.
    pub texture: Option<SymbolTexture>,
}

impl SymbolItem {
    pub fn bitmap(x: f32, y: f32, bitmap: Arc<Bitmap>) -> Self {
        Self {
            x,
            y,
            billboard: false,
            offset: None,
            texture: Some(SymbolTexture::Bitmap(bitmap)),
        }
    }

    pub fn region(x: f32, y: f32, region: TextureRegion) -> Self {
        Self {
            x,
            y,
            billboard: false,
            offset: None,
            texture: Some(SymbolTexture::Region(region)),
        }
    }

    pub fn with_billboard(mut self, billboard: bool) -> Self {
        self.billboard = billboard;
        self
    }

    pub fn with_offset(mut self, offset: PointF) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn key(&self) -> Option<SymbolKey> {
        match self.texture.as_ref()? {
            SymbolTexture::Bitmap(bitmap) => Some(SymbolKey::Bitmap(bitmap.id())),
            SymbolTexture::Region(region) => Some(SymbolKey::Region {
                atlas: region.atlas.id(),
                rect: region.rect,
            }),
        }
    }
}

/// Sprite layer of one tile.
#[derive(Debug, Default)]
pub struct SymbolLayer {
    items: Vec<SymbolItem>,
    textures: Vec<TextureItem>,
    num_vertices: usize,
    offset: usize,
}

impl SymbolLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an item, keeping items with the same texture adjacent.
    pub fn add_symbol(&mut self, item: SymbolItem) {
        self.num_vertices += VERTICES_PER_SPRITE;

        let key = item.key();
        match self.items.iter().position(|it| it.key() == key) {
            Some(pos) => self.items.insert(pos + 1, item),
            None => self.items.insert(0, item),
        }
    }

    /// Items in compile order.
    pub fn items(&self) -> &[SymbolItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Vertices reserved for the items added so far.
    pub fn num_vertices(&self) -> usize {
        self.num_vertices
    }

    /// Bytes this layer occupies in the vertex buffer.
    pub fn size_bytes(&self) -> usize {
        self.num_vertices * SHORTS_PER_VERTEX * 2
    }

    /// Byte offset of this layer in the tile buffer after the last compile.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Texture binding records from the last compile, in draw order.
    pub fn textures(&self) -> &[TextureItem] {
        &self.textures
    }

    /// Compile all items into `sbuf`.
    ///
    /// Bitmap textures from the previous compile are reused when the same
    /// bitmap appears again; records that are not reused are released.
    pub fn compile(&mut self, sbuf: &mut VertexBuffer, backend: &mut dyn TextureBackend) {
        self.offset = sbuf.position_bytes();

        let mut prev_textures = std::mem::take(&mut self.textures);
        let mut atlases: Vec<(u64, TextureHandle)> = Vec::new();
        let mut num_indices: u32 = 0;

        let mut scratch = take_scratch();
        let mut pos = 0;

        let items = &self.items;
        let mut i = 0;
        while i < items.len() {
            let first = &items[i];
            let (Some(texture), Some(key)) = (first.texture.as_ref(), first.key()) else {
                debug!(x = first.x, y = first.y, "Skipping symbol without texture");
                i += 1;
                continue;
            };

            let (mut item, rect) = match texture {
                SymbolTexture::Region(region) => {
                    let atlas_id = region.atlas.id();
                    let handle = match atlases.iter().find(|(id, _)| *id == atlas_id) {
                        Some((_, loaded)) => backend.clone_texture(loaded),
                        None => {
                            let loaded = backend.load_atlas(&region.atlas);
                            let handle = backend.clone_texture(&loaded);
                            atlases.push((atlas_id, loaded));
                            handle
                        }
                    };
                    (
                        TextureItem::new(handle, TextureSource::Atlas(atlas_id)),
                        region.rect,
                    )
                }
                SymbolTexture::Bitmap(bitmap) => {
                    let source = TextureSource::Bitmap(bitmap.id());
                    let item = match prev_textures.iter().position(|t| t.source == source) {
                        Some(reuse) => prev_textures.swap_remove(reuse),
                        None => TextureItem::new(backend.upload_bitmap(bitmap), source),
                    };
                    let rect = AtlasRect::new(0, 0, bitmap.width(), bitmap.height());
                    (item, rect)
                }
            };

            item.offset = num_indices;
            item.indices = 0;

            let width = rect.w as f32;
            let height = rect.h as f32;
            let mut quad = SpriteQuad {
                u1: (SCALE * rect.x as f32) as i16,
                v1: (SCALE * rect.y as f32) as i16,
                u2: (SCALE * (rect.x + rect.w) as f32) as i16,
                v2: (SCALE * (rect.y + rect.h) as f32) as i16,
                ..SpriteQuad::default()
            };

            let mut prev_offset: Option<Option<PointF>> = None;

            while i < items.len() && items[i].key() == Some(key) {
                let it = &items[i];

                if prev_offset != Some(it.offset) {
                    prev_offset = Some(it.offset);
                    let (hw, hh, rw, rh) = match it.offset {
                        None => (width / 2.0, height / 2.0, width / 2.0, height / 2.0),
                        Some(pivot) => {
                            let hw = pivot.x * width;
                            let hh = pivot.y * height;
                            (hw, hh, width - hw, height - hh)
                        }
                    };
                    quad.x1 = (SCALE * -hw) as i16;
                    quad.x2 = (SCALE * rw) as i16;
                    quad.y1 = (SCALE * rh) as i16;
                    quad.y2 = (SCALE * -hh) as i16;
                }

                let tx = (((SCALE * it.x) as i32 & LBIT_MASK) | it.billboard as i32) as i16;
                let ty = (SCALE * it.y) as i16;

                if pos == scratch.len() {
                    sbuf.put_vertices(&scratch[..pos]);
                    pos = 0;
                }

                put_sprite(&mut scratch[pos..pos + VERTICES_PER_SPRITE], tx, ty, &quad);
                pos += VERTICES_PER_SPRITE;

                item.indices += INDICES_PER_SPRITE;
                i += 1;
            }

            num_indices += item.indices;
            self.textures.push(item);
        }

        if pos > 0 {
            sbuf.put_vertices(&scratch[..pos]);
        }
        release_scratch(scratch);

        for (_, loaded) in atlases {
            backend.release_texture(loaded);
        }
        for unused in prev_textures {
            backend.release_texture(unused.handle);
        }
    }

    /// Drop all items; textures stay bound until the next compile or
    /// [`SymbolLayer::clear`].
    pub fn clear_items(&mut self) {
        self.items.clear();
        self.num_vertices = 0;
    }

    /// Drop all items and release every texture.
    pub fn clear(&mut self, backend: &mut dyn TextureBackend) {
        self.clear_items();
        for texture in self.textures.drain(..) {
            backend.release_texture(texture.handle);
        }
    }
}
