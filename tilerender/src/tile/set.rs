use super::TileId;
use crate::coord::TileCoord;

/// A tile published in a [`TileSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRef {
    /// Tile whose content is drawn. For a wrap placeholder this is the
    /// holder tile on the other side of the antimeridian.
    pub id: TileId,
    /// Where the content is drawn. Differs from the tile's own coordinate
    /// only for wrap placeholders.
    pub coord: TileCoord,
    /// Zoom offset of a stand-in relative to the tile it replaces:
    /// `-1` parent, `+1` child, `0` the tile itself.
    pub proxy_level: i8,
}

impl TileRef {
    pub fn new(id: TileId, coord: TileCoord) -> Self {
        Self {
            id,
            coord,
            proxy_level: 0,
        }
    }

    pub fn proxy(id: TileId, coord: TileCoord, proxy_level: i8) -> Self {
        Self {
            id,
            coord,
            proxy_level,
        }
    }
}

/// A set of pinned tiles plus a serial identifying its content.
///
/// Every entry holds one pin on its tile. Entries are only added and removed
/// by the cache and the renderer, which pin and unpin them, so a set can not
/// be released twice.
#[derive(Debug, Default)]
pub struct TileSet {
    entries: Vec<TileRef>,
    capacity: usize,
    serial: u64,
}

impl TileSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Slots available to this set; entries beyond `len()` are used for
    /// wrap placeholders.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn entries(&self) -> &[TileRef] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TileRef> {
        self.entries.iter()
    }

    pub fn contains(&self, id: TileId) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    pub(crate) fn push(&mut self, entry: TileRef) {
        self.entries.push(entry);
    }

    pub(crate) fn take_entries(&mut self) -> Vec<TileRef> {
        std::mem::take(&mut self.entries)
    }

    pub(crate) fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
    }

    pub(crate) fn set_serial(&mut self, serial: u64) {
        self.serial = serial;
    }
}

impl<'a> IntoIterator for &'a TileSet {
    type Item = &'a TileRef;
    type IntoIter = std::slice::Iter<'a, TileRef>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
