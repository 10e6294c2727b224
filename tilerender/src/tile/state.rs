use std::fmt;

/// Lifecycle state of a cached tile.
///
/// ```text
///   Loading ──► NewData ──► Ready
///      ▲                      │
///      └──── reset (reload) ──┘        any ──► Cancel
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TileState {
    /// Queued or being loaded; no content yet.
    #[default]
    Loading,
    /// Content produced by the loader, not yet uploaded.
    NewData,
    /// Content uploaded and drawable.
    Ready,
    /// Load abandoned.
    Cancel,
}

impl TileState {
    /// Whether `next` is a forward step from this state.
    ///
    /// Going back to `Loading` is not an advance; it goes through
    /// [`TileArena::reset`](super::TileArena::reset).
    pub fn can_advance_to(self, next: TileState) -> bool {
        matches!(
            (self, next),
            (TileState::Loading, TileState::NewData)
                | (TileState::NewData, TileState::Ready)
                | (_, TileState::Cancel)
        ) || self == next
    }

    pub fn is_ready(self) -> bool {
        self == TileState::Ready
    }
}

impl fmt::Display for TileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TileState::Loading => "loading",
            TileState::NewData => "new-data",
            TileState::Ready => "ready",
            TileState::Cancel => "cancel",
        };
        f.write_str(name)
    }
}
