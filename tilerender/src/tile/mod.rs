//! Tile records and the shared tile cache index.
//!
//! Tiles live in an arena owned by [`TileArena`] and are addressed by
//! [`TileId`] handles. Quad-tree links (parent and four children) are stored
//! as ids, so a tile can be evicted without dangling references: a stale id
//! simply stops resolving.
//!
//! The arena sits behind one coarse mutex ([`TileCache`]) shared by the
//! loader thread and the render thread.

mod cache;
mod set;
mod state;

pub use cache::{TileArena, TileCache, DEFAULT_PLACEHOLDER_HEADROOM};
pub use set::{TileRef, TileSet};
pub use state::TileState;

use std::fmt;

use crate::coord::TileCoord;
use crate::layers::RenderLayers;

/// Generation-checked handle to a tile in a [`TileArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileId {
    index: u32,
    generation: u32,
}

impl TileId {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

/// Relative of a tile that may stand in for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyRelation {
    Parent,
    Grandparent,
    /// Child at the given index (see [`TileCoord::child`]).
    Child(usize),
}

/// One cached map tile.
#[derive(Debug)]
pub struct Tile {
    coord: TileCoord,
    state: TileState,
    is_visible: bool,
    fade_time: u64,
    parent: Option<TileId>,
    children: [Option<TileId>; 4],
    locks: u32,
    layers: Option<RenderLayers>,
}

impl Tile {
    fn new(coord: TileCoord) -> Self {
        Self {
            coord,
            state: TileState::Loading,
            is_visible: false,
            fade_time: 0,
            parent: None,
            children: [None; 4],
            locks: 0,
            layers: None,
        }
    }

    pub fn coord(&self) -> TileCoord {
        self.coord
    }

    pub fn state(&self) -> TileState {
        self.state
    }

    pub fn is_visible(&self) -> bool {
        self.is_visible
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.is_visible = visible;
    }

    /// Frame time (ms) at which this tile started fading in, 0 if unset.
    pub fn fade_time(&self) -> u64 {
        self.fade_time
    }

    pub fn set_fade_time(&mut self, fade_time: u64) {
        self.fade_time = fade_time;
    }

    pub fn parent(&self) -> Option<TileId> {
        self.parent
    }

    pub fn children(&self) -> &[Option<TileId>; 4] {
        &self.children
    }

    /// Number of outstanding pins held by tile sets.
    pub fn lock_count(&self) -> u32 {
        self.locks
    }

    pub fn is_locked(&self) -> bool {
        self.locks > 0
    }

    pub fn layers(&self) -> Option<&RenderLayers> {
        self.layers.as_ref()
    }

    pub fn layers_mut(&mut self) -> Option<&mut RenderLayers> {
        self.layers.as_mut()
    }

    /// Detach the payload. The caller becomes responsible for releasing its
    /// GPU resources.
    pub fn take_layers(&mut self) -> Option<RenderLayers> {
        self.layers.take()
    }
}
