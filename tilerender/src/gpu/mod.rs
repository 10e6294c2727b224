//! Graphics collaborators used by the tile pipeline.
//!
//! The frame coordinator never talks to a graphics API directly. Buffer
//! objects and textures are reached through two small traits so that the
//! scheduling and batching logic can run against a real context or against
//! the in-memory [`HeadlessBackend`].
//!
//! ```text
//! ┌──────────────────┐      ┌──────────────────┐
//! │   TileRenderer   │      │   SymbolLayer    │
//! └────────┬─────────┘      └────────┬─────────┘
//!          │ BufferBackend           │ TextureBackend
//!          ▼                         ▼
//!        ┌──────────────────────────────┐
//!        │  RenderBackend (both traits) │
//!        └──────────────┬───────────────┘
//!                  ┌────┴─────┐
//!                  ▼          ▼
//!            HeadlessBackend  GL/wgpu adapters
//! ```

mod headless;

pub use headless::{BackendStats, HeadlessBackend};

use thiserror::Error;

use crate::layers::{Bitmap, TextureAtlas};

/// Kind of buffer object to allocate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferTarget {
    /// Interleaved vertex data.
    Array,
    /// Index data.
    ElementArray,
}

/// A buffer object owned by the backend.
///
/// Handles are move-only: releasing one consumes it, so a buffer cannot be
/// released twice.
#[derive(Debug, PartialEq, Eq)]
pub struct BufferHandle {
    id: u64,
    target: BufferTarget,
    size: usize,
}

impl BufferHandle {
    /// Create a handle. Only backends should call this.
    pub fn new(id: u64, target: BufferTarget, size: usize) -> Self {
        Self { id, target, size }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn target(&self) -> BufferTarget {
        self.target
    }

    /// Currently allocated size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Record a reallocation performed by the backend.
    pub fn set_size(&mut self, size: usize) {
        self.size = size;
    }
}

/// A reference to a texture owned by the backend.
///
/// Each handle holds one reference. Use [`TextureBackend::clone_texture`] to
/// obtain another reference to the same texture and
/// [`TextureBackend::release_texture`] to drop one.
#[derive(Debug, PartialEq, Eq)]
pub struct TextureHandle {
    id: u64,
    width: u32,
    height: u32,
}

impl TextureHandle {
    /// Create a handle. Only backends should call this.
    pub fn new(id: u64, width: u32, height: u32) -> Self {
        Self { id, width, height }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

/// Errors reported when submitting data to a buffer object.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadError {
    /// The backend refused the submission (out of memory, lost context, ...).
    #[error("Buffer {buffer} rejected upload of {bytes} bytes: {reason}")]
    Rejected {
        buffer: u64,
        bytes: usize,
        reason: String,
    },

    /// The handle does not name a live buffer.
    #[error("Buffer {0} is not allocated")]
    Released(u64),

    /// Nothing to upload into; the layer set owns no buffer.
    #[error("No buffer bound for upload")]
    NoBuffer,
}

/// Buffer object allocator.
pub trait BufferBackend {
    /// Allocate a buffer of at least `size` bytes.
    fn acquire(&mut self, target: BufferTarget, size: usize) -> BufferHandle;

    /// Replace the buffer contents with `data`, growing it when needed.
    fn upload(&mut self, buffer: &mut BufferHandle, data: &[u8]) -> Result<(), UploadError>;

    /// Return a buffer to the backend.
    fn release(&mut self, buffer: BufferHandle);

    /// Host-side bookkeeping pass over buffer usage, run after frames that
    /// uploaded something. `force` requests a full pass.
    fn check_usage(&mut self, force: bool);
}

/// Texture loader with reference-counted handles.
pub trait TextureBackend {
    /// Upload a bitmap as a new texture.
    fn upload_bitmap(&mut self, bitmap: &Bitmap) -> TextureHandle;

    /// Obtain a reference to the texture backing an atlas, uploading it on
    /// first use.
    fn load_atlas(&mut self, atlas: &TextureAtlas) -> TextureHandle;

    /// Take another reference to an existing texture.
    fn clone_texture(&mut self, texture: &TextureHandle) -> TextureHandle;

    /// Drop one reference; the texture is freed with its last reference.
    fn release_texture(&mut self, texture: TextureHandle);
}

/// Everything the render thread needs from the graphics context.
pub trait RenderBackend: BufferBackend + TextureBackend + Send {}

impl<T: BufferBackend + TextureBackend + Send> RenderBackend for T {}
