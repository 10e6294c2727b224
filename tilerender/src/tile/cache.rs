//! Tile cache index.
//!
//! [`TileArena`] owns every cached tile, the coordinate index, the quad-tree
//! links and the active tile list maintained by the loader. [`TileCache`]
//! wraps it in the cache-wide mutex shared with the render thread.
//!
//! # Pinning
//!
//! Tiles referenced by a [`TileSet`] are pinned (`lock_tile`) and can not be
//! removed until every set holding them released them (`unlock_tile`).

use std::collections::HashMap;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, trace, warn};

use super::{ProxyRelation, Tile, TileId, TileRef, TileSet, TileState};
use crate::coord::TileCoord;
use crate::layers::RenderLayers;

/// Extra slots reserved in the draw set for wrap placeholders.
pub const DEFAULT_PLACEHOLDER_HEADROOM: usize = 16;

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    tile: Option<Tile>,
}

/// Arena of cached tiles.
#[derive(Debug)]
pub struct TileArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    index: HashMap<TileCoord, TileId>,
    active: Vec<TileId>,
    active_generation: u64,
    placeholder_headroom: usize,
    retired: Vec<RenderLayers>,
}

impl Default for TileArena {
    fn default() -> Self {
        Self::new(DEFAULT_PLACEHOLDER_HEADROOM)
    }
}

impl TileArena {
    pub fn new(placeholder_headroom: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            active: Vec::new(),
            active_generation: 0,
            placeholder_headroom,
            retired: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn get(&self, id: TileId) -> Option<&Tile> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.tile.as_ref()
    }

    pub fn get_mut(&mut self, id: TileId) -> Option<&mut Tile> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.tile.as_mut()
    }

    pub fn contains(&self, id: TileId) -> bool {
        self.get(id).is_some()
    }

    pub fn find(&self, coord: TileCoord) -> Option<TileId> {
        self.index.get(&coord).copied()
    }

    /// Look up a tile, creating it in `Loading` state when missing.
    ///
    /// A new tile is linked to its parent and children if those are cached.
    pub fn get_or_insert(&mut self, coord: TileCoord) -> TileId {
        if let Some(id) = self.find(coord) {
            return id;
        }

        let id = match self.free.pop() {
            Some(index) => TileId::new(index, self.slots[index as usize].generation),
            None => {
                self.slots.push(Slot::default());
                TileId::new((self.slots.len() - 1) as u32, 0)
            }
        };

        let mut tile = Tile::new(coord);

        if let Some(parent_id) = coord.parent().and_then(|p| self.find(p)) {
            tile.parent = Some(parent_id);
            if let Some(parent) = self.get_mut(parent_id) {
                parent.children[coord.child_index()] = Some(id);
            }
        }
        for (i, slot) in tile.children.iter_mut().enumerate() {
            if let Some(child_id) = self.index.get(&coord.child(i)).copied() {
                *slot = Some(child_id);
                if let Some(child) = self.get_mut(child_id) {
                    child.parent = Some(id);
                }
            }
        }

        self.slots[id.index as usize].tile = Some(tile);
        self.index.insert(coord, id);
        trace!(tile = %coord, id = %id, "Tile added");
        id
    }

    pub fn state(&self, id: TileId) -> Option<TileState> {
        self.get(id).map(Tile::state)
    }

    pub fn parent(&self, id: TileId) -> Option<TileId> {
        self.get(id)?.parent.filter(|p| self.contains(*p))
    }

    pub fn child(&self, id: TileId, index: usize) -> Option<TileId> {
        self.get(id)?
            .children
            .get(index)
            .copied()
            .flatten()
            .filter(|c| self.contains(*c))
    }

    /// Relative of `id` in `state`, if cached.
    pub fn proxy(&self, id: TileId, relation: ProxyRelation, state: TileState) -> Option<TileId> {
        let candidate = match relation {
            ProxyRelation::Parent => self.parent(id),
            ProxyRelation::Grandparent => self.parent(id).and_then(|p| self.parent(p)),
            ProxyRelation::Child(index) => self.child(id, index),
        }?;
        (self.state(candidate) == Some(state)).then_some(candidate)
    }

    /// Child `index` of `id` in `state`, if cached.
    pub fn proxy_child(&self, id: TileId, index: usize, state: TileState) -> Option<TileId> {
        self.proxy(id, ProxyRelation::Child(index), state)
    }

    /// Advance a tile's state. Backward transitions are rejected and logged.
    pub fn set_state(&mut self, id: TileId, state: TileState) -> bool {
        let Some(tile) = self.get_mut(id) else {
            return false;
        };
        if !tile.state.can_advance_to(state) {
            debug!(
                tile = %tile.coord,
                from = %tile.state,
                to = %state,
                "Rejected tile state transition"
            );
            return false;
        }
        tile.state = state;
        true
    }

    /// Force a tile back to `Loading`, e.g. before reloading its content.
    pub fn reset(&mut self, id: TileId) -> bool {
        match self.get_mut(id) {
            Some(tile) => {
                tile.state = TileState::Loading;
                tile.fade_time = 0;
                true
            }
            None => false,
        }
    }

    /// Attach a payload to a tile. A replaced payload is retired.
    pub fn set_layers(&mut self, id: TileId, layers: RenderLayers) -> bool {
        let Some(tile) = self.get_mut(id) else {
            return false;
        };
        let old = tile.layers.replace(layers);
        if let Some(old) = old {
            self.retired.push(old);
        }
        true
    }

    /// Payloads detached from removed or reloaded tiles, waiting for the
    /// render thread to free their GPU resources.
    pub fn take_retired(&mut self) -> Vec<RenderLayers> {
        std::mem::take(&mut self.retired)
    }

    /// Reattach a payload detached with [`Tile::take_layers`] for upload.
    ///
    /// The payload is handed back when the tile was removed, reset or given
    /// new content in the meantime; the caller then frees it.
    pub fn restore_layers(&mut self, id: TileId, layers: RenderLayers) -> Option<RenderLayers> {
        match self.get_mut(id) {
            Some(tile) if tile.layers.is_none() && tile.state == TileState::Ready => {
                tile.layers = Some(layers);
                None
            }
            _ => Some(layers),
        }
    }

    /// Remove an unpinned tile from the cache.
    ///
    /// Returns false when the tile is pinned or already gone.
    pub fn remove(&mut self, id: TileId) -> bool {
        match self.get(id) {
            Some(tile) if tile.is_locked() => {
                trace!(tile = %tile.coord, locks = tile.locks, "Not removing pinned tile");
                return false;
            }
            Some(_) => {}
            None => return false,
        }

        let slot = &mut self.slots[id.index as usize];
        let Some(mut tile) = slot.tile.take() else {
            return false;
        };
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.index.remove(&tile.coord);

        if let Some(parent) = tile.parent.and_then(|p| self.get_mut(p)) {
            parent.children[tile.coord.child_index()] = None;
        }
        for child_id in tile.children.iter().flatten() {
            if let Some(child) = self.get_mut(*child_id) {
                child.parent = None;
            }
        }
        if let Some(layers) = tile.layers.take() {
            self.retired.push(layers);
        }

        let before = self.active.len();
        self.active.retain(|a| *a != id);
        if self.active.len() != before {
            self.active_generation += 1;
        }

        trace!(tile = %tile.coord, "Tile removed");
        true
    }

    /// Remove unpinned, inactive tiles until at most `limit` remain.
    ///
    /// Higher zoom levels are evicted first. Returns the number removed.
    pub fn evict(&mut self, limit: usize) -> usize {
        if self.len() <= limit {
            return 0;
        }
        let mut candidates: Vec<(TileCoord, TileId)> = self
            .index
            .iter()
            .filter(|(_, id)| !self.active.contains(*id))
            .filter(|(_, id)| self.get(**id).is_some_and(|t| !t.is_locked()))
            .map(|(coord, id)| (*coord, *id))
            .collect();
        candidates.sort_by(|a, b| b.0.zoom.cmp(&a.0.zoom).then(a.0.cmp(&b.0)));

        let excess = self.len() - limit;
        let mut removed = 0;
        for (_, id) in candidates.into_iter().take(excess) {
            if self.remove(id) {
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, remaining = self.len(), "Evicted tiles");
        }
        removed
    }

    pub fn lock_tile(&mut self, id: TileId) -> bool {
        match self.get_mut(id) {
            Some(tile) => {
                tile.locks += 1;
                true
            }
            None => false,
        }
    }

    pub fn unlock_tile(&mut self, id: TileId) {
        match self.get_mut(id) {
            Some(tile) if tile.locks > 0 => tile.locks -= 1,
            Some(tile) => warn!(tile = %tile.coord, "Unlocking tile that is not locked"),
            None => trace!(id = %id, "Unlocking evicted tile"),
        }
    }

    pub fn is_locked(&self, id: TileId) -> bool {
        self.get(id).is_some_and(Tile::is_locked)
    }

    /// Replace the list of tiles the map currently wants drawn.
    pub fn set_active(&mut self, tiles: &[TileId]) {
        let tiles: Vec<TileId> = tiles.iter().copied().filter(|id| self.contains(*id)).collect();
        if tiles != self.active {
            self.active = tiles;
            self.active_generation += 1;
            trace!(
                active = self.active.len(),
                generation = self.active_generation,
                "Active tiles changed"
            );
        }
    }

    pub fn active(&self) -> &[TileId] {
        &self.active
    }

    pub fn active_generation(&self) -> u64 {
        self.active_generation
    }

    /// Snapshot the active tiles into `set`.
    ///
    /// Returns false and leaves `set` untouched when it already holds the
    /// current generation. Otherwise the new tiles are pinned, the previous
    /// entries unpinned, and the set capacity sized for placeholders.
    pub fn get_active_tiles(&mut self, set: &mut TileSet) -> bool {
        if set.serial() == self.active_generation {
            return false;
        }

        let active = self.active.clone();
        let mut entries = Vec::with_capacity(active.len());
        for id in active {
            let Some(coord) = self.get(id).map(Tile::coord) else {
                continue;
            };
            self.lock_tile(id);
            entries.push(TileRef::new(id, coord));
        }

        for old in set.take_entries() {
            self.unlock_tile(old.id);
        }
        set.set_capacity(entries.len() + self.placeholder_headroom);
        for entry in entries {
            set.push(entry);
        }
        set.set_serial(self.active_generation);
        true
    }

    /// Unpin every entry of `set` and empty it.
    pub fn release_tiles(&mut self, set: &mut TileSet) {
        for entry in set.take_entries() {
            self.unlock_tile(entry.id);
        }
        set.set_serial(0);
    }

    /// Drop every tile regardless of pins.
    ///
    /// Sets still holding ids of dropped tiles must be discarded without
    /// release.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            if let Some(mut tile) = slot.tile.take() {
                if let Some(layers) = tile.layers.take() {
                    self.retired.push(layers);
                }
                slot.generation = slot.generation.wrapping_add(1);
            }
        }
        self.free = (0..self.slots.len() as u32).rev().collect();
        self.index.clear();
        if !self.active.is_empty() {
            self.active.clear();
            self.active_generation += 1;
        }
        debug!("Tile cache cleared");
    }
}

/// The tile cache shared between the loader and the renderer.
#[derive(Debug, Default)]
pub struct TileCache {
    inner: Mutex<TileArena>,
}

impl TileCache {
    pub fn new(placeholder_headroom: usize) -> Self {
        Self {
            inner: Mutex::new(TileArena::new(placeholder_headroom)),
        }
    }

    /// Take the cache-wide lock.
    pub fn lock(&self) -> MutexGuard<'_, TileArena> {
        self.inner.lock()
    }
}
