//! Renderable tile payload.
//!
//! A tile's [`RenderLayers`] hold the layers produced by the loader and, once
//! uploaded, the buffer object they were packed into. All layers of a tile
//! share one vertex buffer; each layer remembers its byte offset in it.

mod symbol;
mod texture;
mod vertex;

pub use symbol::{PointF, SymbolItem, SymbolKey, SymbolLayer, SymbolTexture, SCALE};
pub use texture::{AtlasRect, Bitmap, TextureAtlas, TextureItem, TextureRegion, TextureSource};
pub use vertex::{
    put_sprite, SpriteQuad, SpriteVertex, VertexBuffer, INDICES_PER_SPRITE, SCRATCH_SPRITES,
    VERTICES_PER_SPRITE,
};

use crate::gpu::{BufferBackend, BufferHandle, TextureBackend, UploadError};

/// Pre-tessellated line and polygon data.
#[derive(Debug, Clone, Default)]
pub struct GeometryLayer {
    vertices: Vec<i16>,
    offset: usize,
}

impl GeometryLayer {
    pub fn new(vertices: Vec<i16>) -> Self {
        Self {
            vertices,
            offset: 0,
        }
    }

    pub fn vertices(&self) -> &[i16] {
        &self.vertices
    }

    /// Byte offset in the tile buffer after the last compile.
    pub fn offset(&self) -> usize {
        self.offset
    }

    fn compile(&mut self, sbuf: &mut VertexBuffer) {
        self.offset = sbuf.position_bytes();
        sbuf.put(&self.vertices);
    }
}

/// One drawable layer of a tile.
#[derive(Debug)]
pub enum Layer {
    Geometry(GeometryLayer),
    Symbol(SymbolLayer),
}

impl Layer {
    /// Bytes this layer adds to the tile buffer.
    pub fn size_bytes(&self) -> usize {
        match self {
            Layer::Geometry(layer) => layer.vertices.len() * 2,
            Layer::Symbol(layer) => layer.size_bytes(),
        }
    }

    fn compile(&mut self, sbuf: &mut VertexBuffer, textures: &mut dyn TextureBackend) {
        match self {
            Layer::Geometry(layer) => layer.compile(sbuf),
            Layer::Symbol(layer) => layer.compile(sbuf, textures),
        }
    }

    fn clear(&mut self, textures: &mut dyn TextureBackend) {
        if let Layer::Symbol(layer) = self {
            layer.clear(textures);
        }
    }
}

/// Payload of a tile: its layers and the buffer they are uploaded to.
#[derive(Debug, Default)]
pub struct RenderLayers {
    pub layers: Vec<Layer>,
    pub vbo: Option<BufferHandle>,
}

impl RenderLayers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_layer(mut self, layer: Layer) -> Self {
        self.layers.push(layer);
        self
    }

    /// Total payload size in bytes.
    pub fn size(&self) -> usize {
        self.layers.iter().map(Layer::size_bytes).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Release the buffer object and every texture held by the layers.
    pub fn clear<B>(&mut self, backend: &mut B)
    where
        B: BufferBackend + TextureBackend,
    {
        for layer in &mut self.layers {
            layer.clear(&mut *backend);
        }
        self.layers.clear();
        if let Some(vbo) = self.vbo.take() {
            backend.release(vbo);
        }
    }
}

/// Compile all layers into one vertex buffer and submit it to `layers.vbo`.
///
/// `size` is the payload size the caller allocated the buffer for; it only
/// presizes the staging buffer.
pub fn upload_layers<B>(
    layers: &mut RenderLayers,
    size: usize,
    backend: &mut B,
) -> Result<(), UploadError>
where
    B: BufferBackend + TextureBackend,
{
    let mut sbuf = VertexBuffer::with_capacity_bytes(size);
    for layer in &mut layers.layers {
        layer.compile(&mut sbuf, &mut *backend);
    }

    let vbo = layers.vbo.as_mut().ok_or(UploadError::NoBuffer)?;
    backend.upload(vbo, sbuf.as_bytes())
}
