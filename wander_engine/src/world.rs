use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use log::warn;
use serde::Serialize;
use wander_formats::{AssetLibrary, InteractionDef, MapData, TriggerDef};

use crate::character::{self, Character, MovementConfig};
use crate::grid::{Direction, DirectionMask, Position};

/// Stable composite identity of a streamed entity: owning map plus the
/// placement's local index. Recreated fresh every time the map streams in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct EntityKey {
    pub map: String,
    pub index: u16,
}

impl EntityKey {
    pub fn new(map: impl Into<String>, index: u16) -> Self {
        EntityKey {
            map: map.into(),
            index,
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.map, self.index)
    }
}

/// How an interaction is triggered, resolved from the placement record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Interact,
    Touch,
}

impl From<TriggerDef> for Trigger {
    fn from(def: TriggerDef) -> Self {
        match def {
            TriggerDef::Interact => Trigger::Interact,
            TriggerDef::Touch => Trigger::Touch,
        }
    }
}

/// The closed set of interactions an NPC can carry.
#[derive(Debug, Clone, PartialEq)]
pub enum Interaction {
    Script {
        asset: String,
        trigger: Trigger,
    },
    Message {
        text: String,
        trigger: Trigger,
    },
    Door {
        target_map: String,
        target: Position,
        trigger: Trigger,
    },
}

impl Interaction {
    pub fn trigger(&self) -> Trigger {
        match self {
            Interaction::Script { trigger, .. }
            | Interaction::Message { trigger, .. }
            | Interaction::Door { trigger, .. } => *trigger,
        }
    }

    fn from_def(def: &InteractionDef) -> Self {
        match def {
            InteractionDef::Script { asset, trigger } => Interaction::Script {
                asset: asset.clone(),
                trigger: (*trigger).into(),
            },
            InteractionDef::Message { text, trigger } => Interaction::Message {
                text: text.clone(),
                trigger: (*trigger).into(),
            },
            InteractionDef::Door {
                target_map,
                target_x,
                target_y,
                trigger,
            } => Interaction::Door {
                target_map: target_map.clone(),
                target: Position::new(*target_x as i32, *target_y as i32),
                trigger: (*trigger).into(),
            },
        }
    }
}

/// A live NPC owned by the world's arena.
#[derive(Debug)]
pub struct Npc {
    pub key: EntityKey,
    pub sprite: String,
    pub character: Character,
    pub interaction: Option<Interaction>,
    /// Set while a primary/touch interaction involving this NPC runs;
    /// suppresses autonomous movement.
    pub interacting: bool,
}

/// A live warp tile: stepping onto it relocates the player.
#[derive(Debug, Clone)]
pub struct Warp {
    pub key: EntityKey,
    pub position: Position,
    pub target_map: String,
    pub target: Position,
}

/// One resolved terrain layer at a queried position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    pub z: u8,
    pub blocked: DirectionMask,
    pub ledge: Option<Direction>,
}

/// First occupant of a tile, in query precedence order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Occupant {
    Player,
    Npc(EntityKey),
    Warp(EntityKey),
}

/// A map currently inside the streaming window, with its live mutable state.
#[derive(Debug)]
pub struct LoadedMap {
    data: Rc<MapData>,
    origin: Position,
    /// Ticks while the map stays loaded; resets when it streams back in.
    pub animation_tick: u64,
}

impl LoadedMap {
    fn new(data: Rc<MapData>, origin: Position) -> Self {
        LoadedMap {
            data,
            origin,
            animation_tick: 0,
        }
    }

    fn contains(&self, pos: Position) -> bool {
        self.data
            .in_bounds(pos.x - self.origin.x, pos.y - self.origin.y)
    }

    fn local(&self, pos: Position) -> (u32, u32) {
        ((pos.x - self.origin.x) as u32, (pos.y - self.origin.y) as u32)
    }
}

/// Streamed world: map membership follows a focus point, and the NPC/warp
/// arenas follow map membership. The two are never updated independently.
pub struct World {
    library: Rc<AssetLibrary>,
    current_world: Option<String>,
    maps: BTreeMap<String, LoadedMap>,
    npcs: BTreeMap<EntityKey, Npc>,
    warps: BTreeMap<EntityKey, Warp>,
    load_distance: (i32, i32),
}

impl World {
    pub fn new(library: Rc<AssetLibrary>, load_distance: (i32, i32)) -> Self {
        World {
            library,
            current_world: None,
            maps: BTreeMap::new(),
            npcs: BTreeMap::new(),
            warps: BTreeMap::new(),
            load_distance,
        }
    }

    /// Switch worlds. Clears all streamed state and returns the start
    /// position in world coordinates; the caller places the player there and
    /// calls `set_focus`.
    pub fn select_world(
        &mut self,
        world_id: &str,
        events: &mut Vec<String>,
    ) -> Option<Position> {
        let graph = self.library.world(world_id)?;
        let start_entry = graph.entry(&graph.start.map)?;
        let start = Position::new(
            start_entry.offset_x + graph.start.x as i32,
            start_entry.offset_y + graph.start.y as i32,
        );
        self.current_world = Some(world_id.to_string());
        self.maps.clear();
        self.npcs.clear();
        self.warps.clear();
        events.push(format!("world.select {world_id}"));
        Some(start)
    }

    pub fn current_world(&self) -> Option<&str> {
        self.current_world.as_deref()
    }

    pub fn loaded_map_ids(&self) -> Vec<String> {
        self.maps.keys().cloned().collect()
    }

    pub fn is_loaded(&self, map_id: &str) -> bool {
        self.maps.contains_key(map_id)
    }

    pub fn npc(&self, key: &EntityKey) -> Option<&Npc> {
        self.npcs.get(key)
    }

    pub fn npc_mut(&mut self, key: &EntityKey) -> Option<&mut Npc> {
        self.npcs.get_mut(key)
    }

    /// Remove an NPC from the arena so its character can attempt moves
    /// against the rest of the world; pair with `put_npc`.
    pub fn take_npc(&mut self, key: &EntityKey) -> Option<Npc> {
        self.npcs.remove(key)
    }

    pub fn put_npc(&mut self, npc: Npc) {
        self.npcs.insert(npc.key.clone(), npc);
    }

    pub fn warp_at(&self, pos: Position) -> Option<&Warp> {
        self.warps.values().find(|warp| warp.position == pos)
    }

    pub fn npc_keys(&self) -> Vec<EntityKey> {
        self.npcs.keys().cloned().collect()
    }

    /// World-space position of a local coordinate of a member map, resolved
    /// through the world graph whether or not the map is loaded.
    pub fn world_position(&self, map_id: &str, local: Position) -> Option<Position> {
        let world_id = self.current_world.as_deref()?;
        let entry = self.library.world(world_id)?.entry(map_id)?;
        Some(Position::new(
            entry.offset_x + local.x,
            entry.offset_y + local.y,
        ))
    }

    /// Recompute map membership around the focus point, then immediately
    /// reconcile the entity arenas. Idempotent: calling twice with the same
    /// focus changes nothing, and maps already inside the window keep their
    /// live state untouched.
    pub fn set_focus(&mut self, focus: Position, events: &mut Vec<String>) {
        let Some(world_id) = self.current_world.clone() else {
            return;
        };
        let Some(graph) = self.library.world(&world_id) else {
            return;
        };

        let (load_x, load_y) = self.load_distance;
        let mut keep: Vec<(String, Position)> = Vec::new();
        for entry in &graph.maps {
            let Some(data) = self.library.map(&entry.map) else {
                warn!("world graph {world_id} references unknown map {}", entry.map);
                continue;
            };
            let origin = Position::new(entry.offset_x, entry.offset_y);
            let in_window = focus.x >= origin.x - load_x
                && focus.x < origin.x + data.width as i32 + load_x
                && focus.y >= origin.y - load_y
                && focus.y < origin.y + data.height as i32 + load_y;
            if in_window {
                keep.push((entry.map.clone(), origin));
            }
        }

        let keep_ids: Vec<&String> = keep.iter().map(|(id, _)| id).collect();
        let dropped: Vec<String> = self
            .maps
            .keys()
            .filter(|id| !keep_ids.contains(id))
            .cloned()
            .collect();
        for id in dropped {
            self.maps.remove(&id);
            events.push(format!("map.unload {id}"));
        }
        for (id, origin) in keep {
            if self.maps.contains_key(&id) {
                continue;
            }
            let data = Rc::new(
                self.library
                    .map(&id)
                    .expect("membership computed from existing map")
                    .clone(),
            );
            self.maps.insert(id.clone(), LoadedMap::new(data, origin));
            events.push(format!("map.load {id}"));
        }

        self.refresh_entities(focus, events);
        debug_assert!(self.entity_liveness_holds(focus));
    }

    #[cfg(test)]
    pub(crate) fn map_animation_tick(&self, map_id: &str) -> Option<u64> {
        self.maps.get(map_id).map(|map| map.animation_tick)
    }

    /// Cull entities that are neither on a loaded map nor near the player,
    /// then (re)spawn placements for every loaded map. Runs after every
    /// membership change; spawning is idempotent so NPCs that moved keep
    /// their state while their map stays loaded.
    fn refresh_entities(&mut self, player: Position, events: &mut Vec<String>) {
        let (load_x, load_y) = self.load_distance;
        let near = |pos: Position| {
            let (dx, dy) = pos.axis_distance(player);
            dx < load_x && dy < load_y
        };

        let culled_npcs: Vec<EntityKey> = self
            .npcs
            .iter()
            .filter(|(key, npc)| {
                !self.maps.contains_key(&key.map) && !near(npc.character.position)
            })
            .map(|(key, _)| key.clone())
            .collect();
        for key in culled_npcs {
            self.npcs.remove(&key);
            events.push(format!("npc.cull {key}"));
        }
        let culled_warps: Vec<EntityKey> = self
            .warps
            .iter()
            .filter(|(key, warp)| !self.maps.contains_key(&key.map) && !near(warp.position))
            .map(|(key, _)| key.clone())
            .collect();
        for key in culled_warps {
            self.warps.remove(&key);
        }

        let mut spawned: Vec<(EntityKey, Npc)> = Vec::new();
        let mut spawned_warps: Vec<(EntityKey, Warp)> = Vec::new();
        for (map_id, loaded) in &self.maps {
            for placement in &loaded.data.npcs {
                let key = EntityKey::new(map_id.clone(), placement.index);
                if self.npcs.contains_key(&key) {
                    continue;
                }
                if !loaded.data.in_bounds(placement.x as i32, placement.y as i32) {
                    warn!("map {map_id}: npc {} placed out of bounds, omitted", placement.index);
                    continue;
                }
                let position = Position::new(
                    loaded.origin.x + placement.x as i32,
                    loaded.origin.y + placement.y as i32,
                );
                let mut ch = Character::at(position, placement.z);
                if let Some(facing) = placement.facing {
                    ch.direction = facing.into();
                }
                ch.movement = placement
                    .movement
                    .as_ref()
                    .map(|def| character::AutonomousMovement::from_def(def, position));
                spawned.push((
                    key.clone(),
                    Npc {
                        key: key.clone(),
                        sprite: placement.sprite.clone(),
                        character: ch,
                        interaction: placement.interaction.as_ref().map(Interaction::from_def),
                        interacting: false,
                    },
                ));
            }
            for placement in &loaded.data.warps {
                let key = EntityKey::new(map_id.clone(), placement.index);
                if self.warps.contains_key(&key) {
                    continue;
                }
                if !loaded.data.in_bounds(placement.x as i32, placement.y as i32) {
                    warn!("map {map_id}: warp {} placed out of bounds, omitted", placement.index);
                    continue;
                }
                spawned_warps.push((
                    key.clone(),
                    Warp {
                        key: key.clone(),
                        position: Position::new(
                            loaded.origin.x + placement.x as i32,
                            loaded.origin.y + placement.y as i32,
                        ),
                        target_map: placement.target_map.clone(),
                        target: Position::new(placement.target_x as i32, placement.target_y as i32),
                    },
                ));
            }
        }
        for (key, npc) in spawned {
            events.push(format!("npc.spawn {key}"));
            self.npcs.insert(key, npc);
        }
        for (key, warp) in spawned_warps {
            events.push(format!("warp.spawn {key}"));
            self.warps.insert(key, warp);
        }
    }

    fn map_at(&self, pos: Position) -> Option<&LoadedMap> {
        self.maps.values().find(|map| map.contains(pos))
    }

    /// Stacked terrain layers at a world position. Positions outside every
    /// loaded map yield an empty stack; that is an expected streaming miss,
    /// not an error.
    pub fn tiles_at(&self, pos: Position) -> Vec<Tile> {
        let Some(map) = self.map_at(pos) else {
            return Vec::new();
        };
        let (x, y) = map.local(pos);
        match map.data.tile_override(x, y) {
            Some(tile) => tile
                .layers
                .iter()
                .map(|layer| Tile {
                    z: layer.z,
                    blocked: DirectionMask::from_cardinals(&layer.blocked),
                    ledge: layer.ledge.map(Direction::from),
                })
                .collect(),
            None => vec![Tile {
                z: 0,
                blocked: DirectionMask::default(),
                ledge: None,
            }],
        }
    }

    /// Layers reachable from logical layer `z`: the layer itself, any layer
    /// the position warps into, and the layer directly above a warp target.
    pub fn tiles_at_z(&self, pos: Position, z: u8) -> Vec<Tile> {
        let warp = self.z_warp_at(pos);
        self.tiles_at(pos)
            .into_iter()
            .filter(|tile| {
                tile.z == z
                    || warp == Some(tile.z)
                    || (tile.z > 0 && warp == Some(tile.z - 1) && tile.z == z + 1)
            })
            .collect()
    }

    pub fn z_warp_at(&self, pos: Position) -> Option<u8> {
        let map = self.map_at(pos)?;
        let (x, y) = map.local(pos);
        map.data.tile_override(x, y).and_then(|tile| tile.z_warp)
    }

    /// First occupant of a tile: player, then NPCs, then warps.
    pub fn entity_at(&self, pos: Position, player: Option<Position>) -> Option<Occupant> {
        if player == Some(pos) {
            return Some(Occupant::Player);
        }
        if let Some(npc) = self
            .npcs
            .values()
            .find(|npc| npc.character.position == pos)
        {
            return Some(Occupant::Npc(npc.key.clone()));
        }
        self.warp_at(pos).map(|warp| Occupant::Warp(warp.key.clone()))
    }

    /// True when the NPC at `key` intercepts walk attempts onto its tile.
    pub fn npc_touch_interception(&self, key: &EntityKey) -> bool {
        self.npcs
            .get(key)
            .and_then(|npc| npc.interaction.as_ref())
            .map(|interaction| interaction.trigger() == Trigger::Touch)
            .unwrap_or(false)
    }

    /// Advance per-map live state (tile animation counters).
    pub fn tick_animations(&mut self) {
        for map in self.maps.values_mut() {
            map.animation_tick = map.animation_tick.wrapping_add(1);
        }
    }

    /// Per-frame NPC update: movement interpolation always, autonomous
    /// strategies only while the NPC is not interacting. Each NPC is taken
    /// out of the arena while it moves so occupancy queries naturally
    /// exclude it.
    pub fn tick_npcs(
        &mut self,
        delta: f32,
        player: Position,
        config: &MovementConfig,
        rng: &mut impl rand::Rng,
    ) {
        let keys = self.npc_keys();
        for key in keys {
            let Some(mut npc) = self.npcs.remove(&key) else {
                continue;
            };
            npc.character.begin_frame();
            npc.character.tick_movement(delta, config);
            if !npc.interacting {
                character::drive_autonomous(&mut npc.character, self, player, delta, rng);
            }
            self.npcs.insert(key, npc);
        }
    }

    /// Liveness check backing the streaming invariant; used by tests and
    /// debug assertions.
    pub fn entity_liveness_holds(&self, player: Position) -> bool {
        let (load_x, load_y) = self.load_distance;
        self.npcs.iter().all(|(key, npc)| {
            let (dx, dy) = npc.character.position.axis_distance(player);
            self.maps.contains_key(&key.map) || (dx < load_x && dy < load_y)
        })
    }
}
