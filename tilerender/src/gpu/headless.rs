//! In-memory render backend.
//!
//! Keeps buffer contents and texture reference counts in host memory. Used by
//! the CLI simulation and by tests, which can inject upload failures and
//! inspect what was submitted.

use std::collections::HashMap;

use tracing::{debug, trace, warn};

use super::{BufferBackend, BufferHandle, BufferTarget, TextureBackend, TextureHandle, UploadError};
use crate::layers::{Bitmap, TextureAtlas};

/// Counters describing backend activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendStats {
    pub buffers_acquired: u64,
    pub buffers_released: u64,
    pub uploads: u64,
    pub failed_uploads: u64,
    pub bytes_uploaded: u64,
    pub textures_created: u64,
    pub textures_freed: u64,
    pub usage_checks: u64,
}

#[derive(Debug)]
struct TextureEntry {
    refs: u32,
    width: u32,
    height: u32,
}

/// Backend that stores everything in host memory.
#[derive(Debug, Default)]
pub struct HeadlessBackend {
    next_id: u64,
    buffers: HashMap<u64, Vec<u8>>,
    textures: HashMap<u64, TextureEntry>,
    atlas_textures: HashMap<u64, u64>,
    fail_uploads: u32,
    stats: BackendStats,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` uploads fail with [`UploadError::Rejected`].
    pub fn fail_next_uploads(&mut self, count: u32) {
        self.fail_uploads = count;
    }

    pub fn stats(&self) -> &BackendStats {
        &self.stats
    }

    /// Number of buffers currently allocated.
    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// Number of textures with at least one reference.
    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    /// Reference count of a texture, 0 when freed.
    pub fn texture_refs(&self, id: u64) -> u32 {
        self.textures.get(&id).map_or(0, |t| t.refs)
    }

    /// Last data uploaded into a buffer.
    pub fn buffer_data(&self, id: u64) -> Option<&[u8]> {
        self.buffers.get(&id).map(Vec::as_slice)
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn create_texture(&mut self, width: u32, height: u32) -> TextureHandle {
        let id = self.next_id();
        self.textures.insert(
            id,
            TextureEntry {
                refs: 1,
                width,
                height,
            },
        );
        self.stats.textures_created += 1;
        TextureHandle::new(id, width, height)
    }
}

impl BufferBackend for HeadlessBackend {
    fn acquire(&mut self, target: BufferTarget, size: usize) -> BufferHandle {
        let id = self.next_id();
        self.buffers.insert(id, Vec::with_capacity(size));
        self.stats.buffers_acquired += 1;
        trace!(buffer = id, size, ?target, "Buffer acquired");
        BufferHandle::new(id, target, size)
    }

    fn upload(&mut self, buffer: &mut BufferHandle, data: &[u8]) -> Result<(), UploadError> {
        if self.fail_uploads > 0 {
            self.fail_uploads -= 1;
            self.stats.failed_uploads += 1;
            return Err(UploadError::Rejected {
                buffer: buffer.id(),
                bytes: data.len(),
                reason: "injected failure".to_string(),
            });
        }

        let storage = self
            .buffers
            .get_mut(&buffer.id())
            .ok_or(UploadError::Released(buffer.id()))?;

        storage.clear();
        storage.extend_from_slice(data);
        if data.len() > buffer.size() {
            buffer.set_size(data.len());
        }

        self.stats.uploads += 1;
        self.stats.bytes_uploaded += data.len() as u64;
        Ok(())
    }

    fn release(&mut self, buffer: BufferHandle) {
        if self.buffers.remove(&buffer.id()).is_some() {
            self.stats.buffers_released += 1;
        } else {
            warn!(buffer = buffer.id(), "Released unknown buffer");
        }
    }

    fn check_usage(&mut self, force: bool) {
        self.stats.usage_checks += 1;
        if force {
            let bytes: usize = self.buffers.values().map(Vec::len).sum();
            debug!(
                buffers = self.buffers.len(),
                bytes,
                textures = self.textures.len(),
                "Buffer usage"
            );
        }
    }
}

impl TextureBackend for HeadlessBackend {
    fn upload_bitmap(&mut self, bitmap: &Bitmap) -> TextureHandle {
        self.create_texture(bitmap.width(), bitmap.height())
    }

    fn load_atlas(&mut self, atlas: &TextureAtlas) -> TextureHandle {
        if let Some(&id) = self.atlas_textures.get(&atlas.id()) {
            if let Some(entry) = self.textures.get_mut(&id) {
                entry.refs += 1;
                return TextureHandle::new(id, entry.width, entry.height);
            }
        }
        let handle = self.create_texture(atlas.width(), atlas.height());
        self.atlas_textures.insert(atlas.id(), handle.id());
        handle
    }

    fn clone_texture(&mut self, texture: &TextureHandle) -> TextureHandle {
        match self.textures.get_mut(&texture.id()) {
            Some(entry) => entry.refs += 1,
            None => warn!(texture = texture.id(), "Cloned freed texture"),
        }
        TextureHandle::new(texture.id(), texture.width(), texture.height())
    }

    fn release_texture(&mut self, texture: TextureHandle) {
        let id = texture.id();
        let Some(entry) = self.textures.get_mut(&id) else {
            warn!(texture = id, "Released unknown texture");
            return;
        };
        entry.refs -= 1;
        if entry.refs == 0 {
            self.textures.remove(&id);
            self.atlas_textures.retain(|_, tex| *tex != id);
            self.stats.textures_freed += 1;
        }
    }
}
