use serde::{Deserialize, Serialize};

use crate::entities::{NpcPlacement, WarpPlacement};

/// One of the four tile edges, as spelled in map JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinal {
    Down,
    Right,
    Up,
    Left,
}

/// A single terrain layer stacked on a tile.
///
/// Tiles without an override carry one implicit layer at z 0 with nothing
/// blocked; a listed tile replaces that default entirely, so an empty
/// `layers` list means the position has no terrain at all.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TileLayerDef {
    #[serde(default)]
    pub z: u8,
    /// Edges an entity cannot cross when leaving or entering this tile.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocked: Vec<Cardinal>,
    /// Ledge tiles fling the mover one extra tile in this direction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledge: Option<Cardinal>,
}

/// Sparse per-tile override keyed by local coordinates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TileDef {
    pub x: u32,
    pub y: u32,
    #[serde(default)]
    pub layers: Vec<TileLayerDef>,
    /// Entering this tile moves the entity onto the given logical layer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z_warp: Option<u8>,
}

/// A complete tile map as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapData {
    pub id: String,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub tiles: Vec<TileDef>,
    #[serde(default)]
    pub npcs: Vec<NpcPlacement>,
    #[serde(default)]
    pub warps: Vec<WarpPlacement>,
}

impl MapData {
    pub fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && (x as u32) < self.width && (y as u32) < self.height
    }

    /// Tile override at local coordinates, if the map lists one.
    pub fn tile_override(&self, x: u32, y: u32) -> Option<&TileDef> {
        self.tiles.iter().find(|tile| tile.x == x && tile.y == y)
    }

    /// Placement records whose coordinates fall outside the map, in listing
    /// order. The engine logs and omits these rather than failing the load.
    pub fn out_of_bounds_placements(&self) -> Vec<String> {
        let mut bad = Vec::new();
        for npc in &self.npcs {
            if !self.in_bounds(npc.x as i32, npc.y as i32) {
                bad.push(format!("npc {}", npc.index));
            }
        }
        for warp in &self.warps {
            if !self.in_bounds(warp.x as i32, warp.y as i32) {
                bad.push(format!("warp {}", warp.index));
            }
        }
        bad
    }
}
