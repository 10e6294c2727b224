//! tilerender - quad-tree map tile rendering pipeline
//!
//! A background loader fills a shared [`tile::TileCache`] with tile content;
//! once per frame the render thread runs a [`renderer::TileRenderer`] that
//! decides which tiles are visible, uploads new content to the GPU within a
//! per-frame budget, and publishes pinned snapshots of drawable tiles.
//!
//! ```text
//!   loader thread                       render thread
//! ┌───────────────┐                ┌────────────────────────┐
//! │ get_or_insert │                │ TileRenderer::update   │
//! │ set_layers    │──► TileCache ◄─│  ├─ get_active_tiles   │
//! │ set_state     │   (arena +     │  ├─ update_visibility  │
//! │ set_active    │    mutex)      │  └─ compile + upload ──┼──► RenderBackend
//! └───────────────┘                └────────────────────────┘
//!                                        │ get_visible_tiles
//!                                        ▼
//!                                   TileSet (pinned)
//! ```
//!
//! Symbol layers are compiled by [`layers::SymbolLayer`], which batches
//! point sprites by texture into one vertex stream per tile.

pub mod coord;
pub mod gpu;
pub mod layers;
pub mod logging;
pub mod renderer;
pub mod tile;

pub use coord::TileCoord;
pub use gpu::{HeadlessBackend, RenderBackend};
pub use renderer::{FrameReport, RendererConfig, TileRenderer, Viewport};
pub use tile::{TileCache, TileId, TileSet, TileState};
