use serde::{Deserialize, Serialize};

/// Placement of a member map inside a world's shared coordinate space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldMapEntry {
    pub map: String,
    pub offset_x: i32,
    pub offset_y: i32,
}

/// Where the player appears when the world is first entered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartDef {
    pub map: String,
    pub x: u32,
    pub y: u32,
}

/// A world graph: the set of maps stitched into one streaming space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldGraph {
    pub id: String,
    pub start: StartDef,
    pub maps: Vec<WorldMapEntry>,
}

impl WorldGraph {
    pub fn entry(&self, map_id: &str) -> Option<&WorldMapEntry> {
        self.maps.iter().find(|entry| entry.map == map_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_lookup_by_map_id() {
        let graph = WorldGraph {
            id: "overworld".to_string(),
            start: StartDef {
                map: "a".to_string(),
                x: 0,
                y: 0,
            },
            maps: vec![
                WorldMapEntry {
                    map: "a".to_string(),
                    offset_x: 0,
                    offset_y: 0,
                },
                WorldMapEntry {
                    map: "b".to_string(),
                    offset_x: 16,
                    offset_y: -4,
                },
            ],
        };
        assert_eq!(graph.entry("b").expect("entry present").offset_x, 16);
        assert!(graph.entry("c").is_none());
    }
}
