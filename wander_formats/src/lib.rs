//! Declarative asset definitions for the wander engine.
//!
//! Everything here is plain data loaded from JSON under a data root: tile
//! maps, world graphs, and entity placement records. The engine consumes
//! these read-only; live state never flows back into this crate.

pub mod entities;
pub mod library;
pub mod map;
pub mod world;

pub use entities::{
    CooldownDef, InteractionDef, MovementDef, NpcPlacement, RouteStepDef, TriggerDef, WarpPlacement,
};
pub use library::{AssetLibrary, FormatError, LoadIssue};
pub use map::{Cardinal, MapData, TileDef, TileLayerDef};
pub use world::{StartDef, WorldGraph, WorldMapEntry};
