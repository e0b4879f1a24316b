use rand::Rng;
use serde::{Deserialize, Serialize};
use wander_formats::{CooldownDef, MovementDef, RouteStepDef};

use crate::grid::{Direction, Position, Subposition};
use crate::world::{EntityKey, Occupant, World};

/// Progress-per-second rates for the four movement modes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MovementRates {
    pub walk: f32,
    pub run: f32,
    pub ledge_jump: f32,
    pub jump_in_place: f32,
}

impl Default for MovementRates {
    fn default() -> Self {
        MovementRates {
            walk: 4.0,
            run: 8.0,
            ledge_jump: 5.0,
            jump_in_place: 2.5,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MovementConfig {
    pub rates: MovementRates,
    /// Primary-action interactions are ignored once a move's progress passes
    /// this threshold, so sliding into a tile cannot double-trigger.
    pub interaction_commit: f32,
}

impl Default for MovementConfig {
    fn default() -> Self {
        MovementConfig {
            rates: MovementRates::default(),
            interaction_commit: 0.5,
        }
    }
}

/// Outcome of a move attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    /// A single-tile step began.
    Started,
    /// The destination was a ledge; a 2-tile jump began.
    Jumped,
    /// The destination occupant intercepted the attempt; no move happened.
    Intercepted(EntityKey),
    /// Collision; direction updated, `collided` pulsed.
    Blocked,
    /// Already mid-move; the attempt was ignored entirely.
    Busy,
}

/// Randomized rearming timer: `base` seconds plus or minus a uniform jitter
/// so clusters of NPCs drift apart visually.
#[derive(Debug, Clone)]
pub struct Cooldown {
    base: f32,
    jitter: f32,
    remaining: f32,
}

impl Cooldown {
    pub fn new(base: f32, jitter: f32) -> Self {
        Cooldown {
            base,
            jitter,
            remaining: base,
        }
    }

    fn from_def(def: &CooldownDef) -> Self {
        Cooldown::new(def.base, def.jitter)
    }

    /// Counts down; true once elapsed. The caller rearms after acting.
    fn ready(&mut self, delta: f32) -> bool {
        self.remaining -= delta;
        self.remaining <= 0.0
    }

    fn rearm(&mut self, rng: &mut impl Rng) {
        let jitter = if self.jitter > 0.0 {
            rng.gen_range(-self.jitter..=self.jitter)
        } else {
            0.0
        };
        self.remaining = (self.base + jitter).max(0.05);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteStep {
    Step(Direction),
    Look(Direction),
}

/// The closed set of autonomous movement strategies.
#[derive(Debug, Clone)]
pub enum AutonomousMovement {
    /// Fixed looping list of steps and facing changes.
    Route {
        steps: Vec<RouteStep>,
        cursor: usize,
        cooldown: Cooldown,
    },
    /// Random steps capped to a per-axis distance from the spawn origin;
    /// a step that would exceed the cap is reversed instead.
    RandomWalk {
        origin: Position,
        max_distance: i32,
        cooldown: Cooldown,
    },
    /// Periodic random facing changes, no movement.
    LookAround { cooldown: Cooldown },
}

impl AutonomousMovement {
    pub fn from_def(def: &MovementDef, origin: Position) -> Self {
        match def {
            MovementDef::Route { steps, cooldown } => AutonomousMovement::Route {
                steps: steps
                    .iter()
                    .map(|step| match step {
                        RouteStepDef::Step { dir } => RouteStep::Step((*dir).into()),
                        RouteStepDef::Look { dir } => RouteStep::Look((*dir).into()),
                    })
                    .collect(),
                cursor: 0,
                cooldown: Cooldown::from_def(cooldown),
            },
            MovementDef::RandomWalk {
                max_distance,
                cooldown,
            } => AutonomousMovement::RandomWalk {
                origin,
                max_distance: *max_distance as i32,
                cooldown: Cooldown::from_def(cooldown),
            },
            MovementDef::LookAround { cooldown } => AutonomousMovement::LookAround {
                cooldown: Cooldown::from_def(cooldown),
            },
        }
    }

    #[allow(dead_code)]
    pub fn route_cursor(&self) -> Option<usize> {
        match self {
            AutonomousMovement::Route { cursor, .. } => Some(*cursor),
            _ => None,
        }
    }
}

/// A tile-grid mover: the player or an NPC.
#[derive(Debug)]
pub struct Character {
    pub position: Position,
    pub previous_position: Position,
    pub direction: Direction,
    /// Logical layer, updated at move start from the destination's z-warp.
    pub z: u8,
    /// Visually-settled layer; catches up when the move completes.
    pub visual_z: u8,
    pub moving: bool,
    pub move_progress: f32,
    pub running: bool,
    pub jumping: bool,
    pub jumping_in_place: bool,
    /// One-frame pulse raised by a failed move attempt.
    pub collided: bool,
    pub movement: Option<AutonomousMovement>,
}

impl Character {
    pub fn at(position: Position, z: u8) -> Self {
        Character {
            position,
            previous_position: position,
            direction: Direction::Down,
            z,
            visual_z: z,
            moving: false,
            move_progress: 0.0,
            running: false,
            jumping: false,
            jumping_in_place: false,
            collided: false,
            movement: None,
        }
    }

    /// Clears the one-frame collision pulse; call before any move attempts.
    pub fn begin_frame(&mut self) {
        self.collided = false;
    }

    /// Where rendering should draw this character right now.
    pub fn subposition(&self) -> Subposition {
        if self.moving {
            Subposition::lerp(self.previous_position, self.position, self.move_progress)
        } else {
            self.position.into()
        }
    }

    /// True while a primary-action interaction may still fire.
    pub fn can_interact(&self, config: &MovementConfig) -> bool {
        !self.moving || self.move_progress < config.interaction_commit
    }

    /// Stationary reaction hop; no position change.
    pub fn jump_in_place(&mut self) {
        if self.moving {
            return;
        }
        self.previous_position = self.position;
        self.moving = true;
        self.jumping_in_place = true;
        self.move_progress = 0.0;
    }

    /// Advance the active move; returns true on the frame it completes.
    pub fn tick_movement(&mut self, delta: f32, config: &MovementConfig) -> bool {
        if !self.moving {
            return false;
        }
        let rate = if self.jumping_in_place {
            config.rates.jump_in_place
        } else if self.jumping {
            config.rates.ledge_jump
        } else if self.running {
            config.rates.run
        } else {
            config.rates.walk
        };
        self.move_progress += delta * rate;
        if self.move_progress < 1.0 {
            return false;
        }
        self.moving = false;
        self.jumping = false;
        self.jumping_in_place = false;
        self.move_progress = 0.0;
        self.previous_position = self.position;
        self.visual_z = self.z;
        true
    }

    /// Attempt a step. Order: occupant interception, origin edge, destination
    /// terrain, destination edge, occupancy, ledge promotion. The position
    /// commits atomically here; `tick_movement` only drives the visual
    /// interpolation afterwards.
    ///
    /// `player` is the player's tile for occupancy purposes; pass `None`
    /// when the mover is the player itself.
    pub fn try_move(
        &mut self,
        world: &World,
        player: Option<Position>,
        direction: Direction,
        ignore_entities: bool,
    ) -> MoveOutcome {
        if self.moving {
            return MoveOutcome::Busy;
        }
        if direction == Direction::None {
            return MoveOutcome::Busy;
        }

        // The facing change is unconditional from here on.
        self.direction = direction;
        let destination = self.position.offset(direction);

        if !ignore_entities {
            if let Some(Occupant::Npc(key)) = world.entity_at(destination, player) {
                if world.npc_touch_interception(&key) {
                    return MoveOutcome::Intercepted(key);
                }
            }
        }

        let origin_tiles = world.tiles_at_z(self.position, self.z);
        if origin_tiles.iter().any(|tile| tile.blocked.blocks(direction)) {
            self.collided = true;
            return MoveOutcome::Blocked;
        }

        let destination_tiles = world.tiles_at_z(destination, self.z);
        if destination_tiles.is_empty() {
            self.collided = true;
            return MoveOutcome::Blocked;
        }
        if destination_tiles
            .iter()
            .any(|tile| tile.blocked.blocks(direction.opposite()))
        {
            self.collided = true;
            return MoveOutcome::Blocked;
        }
        if !ignore_entities && world.entity_at(destination, player).is_some() {
            self.collided = true;
            return MoveOutcome::Blocked;
        }

        if let Some(jump_direction) = destination_tiles.iter().find_map(|tile| tile.ledge) {
            let landing = destination.offset(jump_direction);
            self.commit_move(world, landing);
            self.jumping = true;
            return MoveOutcome::Jumped;
        }

        self.commit_move(world, destination);
        MoveOutcome::Started
    }

    fn commit_move(&mut self, world: &World, destination: Position) {
        self.previous_position = self.position;
        self.position = destination;
        self.moving = true;
        self.move_progress = 0.0;
        if let Some(z) = world.z_warp_at(destination) {
            self.z = z;
        }
    }
}

/// Evaluate the character's autonomous strategy for one frame. The strategy
/// is taken out of the character while it runs so move attempts can borrow
/// the character freely.
pub fn drive_autonomous(
    ch: &mut Character,
    world: &World,
    player: Position,
    delta: f32,
    rng: &mut impl Rng,
) {
    if ch.moving {
        return;
    }
    let Some(mut strategy) = ch.movement.take() else {
        return;
    };
    match &mut strategy {
        AutonomousMovement::Route {
            steps,
            cursor,
            cooldown,
        } => {
            if !steps.is_empty() && cooldown.ready(delta) {
                match steps[*cursor] {
                    RouteStep::Step(direction) => {
                        match ch.try_move(world, Some(player), direction, false) {
                            MoveOutcome::Started | MoveOutcome::Jumped => {
                                *cursor = (*cursor + 1) % steps.len();
                            }
                            // Blocked or intercepted: stay on this step and
                            // retry after the next cooldown.
                            _ => {}
                        }
                    }
                    RouteStep::Look(direction) => {
                        ch.direction = direction;
                        *cursor = (*cursor + 1) % steps.len();
                    }
                }
                cooldown.rearm(rng);
            }
        }
        AutonomousMovement::RandomWalk {
            origin,
            max_distance,
            cooldown,
        } => {
            if cooldown.ready(delta) {
                let mut direction = Direction::CARDINALS[rng.gen_range(0..4)];
                let ahead = ch.position.offset(direction);
                let (dx, dy) = ahead.axis_distance(*origin);
                if dx > *max_distance || dy > *max_distance {
                    direction = direction.opposite();
                }
                let _ = ch.try_move(world, Some(player), direction, false);
                cooldown.rearm(rng);
            }
        }
        AutonomousMovement::LookAround { cooldown } => {
            if cooldown.ready(delta) {
                ch.direction = Direction::CARDINALS[rng.gen_range(0..4)];
                cooldown.rearm(rng);
            }
        }
    }
    ch.movement = Some(strategy);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::rc::Rc;
    use wander_formats::{
        AssetLibrary, Cardinal, MapData, StartDef, TileDef, TileLayerDef, WorldGraph, WorldMapEntry,
    };

    fn fixture_world(tiles: Vec<TileDef>) -> World {
        let map = MapData {
            id: "field".to_string(),
            width: 10,
            height: 10,
            tiles,
            npcs: Vec::new(),
            warps: Vec::new(),
        };
        let graph = WorldGraph {
            id: "test".to_string(),
            start: StartDef {
                map: "field".to_string(),
                x: 5,
                y: 5,
            },
            maps: vec![WorldMapEntry {
                map: "field".to_string(),
                offset_x: 0,
                offset_y: 0,
            }],
        };
        let library = Rc::new(AssetLibrary::from_parts(vec![graph], vec![map]));
        let mut world = World::new(library, (9, 9));
        let mut events = Vec::new();
        world.select_world("test", &mut events).expect("world selected");
        world.set_focus(Position::new(5, 5), &mut events);
        world
    }

    fn settle(ch: &mut Character, config: &MovementConfig) {
        for _ in 0..120 {
            ch.begin_frame();
            if ch.tick_movement(1.0 / 60.0, config) {
                return;
            }
        }
        panic!("move never completed");
    }

    #[test]
    fn round_trip_returns_to_origin() {
        let world = fixture_world(Vec::new());
        let config = MovementConfig::default();
        let mut ch = Character::at(Position::new(5, 5), 0);

        assert_eq!(
            ch.try_move(&world, None, Direction::Right, false),
            MoveOutcome::Started
        );
        assert_eq!(ch.position, Position::new(6, 5), "position commits at start");
        settle(&mut ch, &config);

        assert_eq!(
            ch.try_move(&world, None, Direction::Left, false),
            MoveOutcome::Started
        );
        settle(&mut ch, &config);
        assert_eq!(ch.position, Position::new(5, 5));
        let sub = ch.subposition();
        assert_eq!((sub.x, sub.y), (5.0, 5.0), "subposition converged");
    }

    #[test]
    fn blocked_edge_pulses_collided_and_updates_direction() {
        let world = fixture_world(vec![TileDef {
            x: 5,
            y: 5,
            layers: vec![TileLayerDef {
                z: 0,
                blocked: vec![Cardinal::Up],
                ledge: None,
            }],
            z_warp: None,
        }]);
        let mut ch = Character::at(Position::new(5, 5), 0);
        ch.direction = Direction::Down;

        let outcome = ch.try_move(&world, None, Direction::Up, false);
        assert_eq!(outcome, MoveOutcome::Blocked);
        assert_eq!(ch.position, Position::new(5, 5));
        assert_eq!(ch.direction, Direction::Up, "facing still updates");
        assert!(ch.collided);

        ch.begin_frame();
        assert!(!ch.collided, "pulse lasts exactly one frame");
    }

    #[test]
    fn missing_terrain_is_impassable() {
        let world = fixture_world(vec![TileDef {
            x: 6,
            y: 5,
            layers: Vec::new(),
            z_warp: None,
        }]);
        let mut ch = Character::at(Position::new(5, 5), 0);
        assert_eq!(
            ch.try_move(&world, None, Direction::Right, false),
            MoveOutcome::Blocked
        );
    }

    #[test]
    fn entering_edge_blocks_from_the_destination_side() {
        let world = fixture_world(vec![TileDef {
            x: 6,
            y: 5,
            layers: vec![TileLayerDef {
                z: 0,
                blocked: vec![Cardinal::Left],
                ledge: None,
            }],
            z_warp: None,
        }]);
        let mut ch = Character::at(Position::new(5, 5), 0);
        assert_eq!(
            ch.try_move(&world, None, Direction::Right, false),
            MoveOutcome::Blocked,
            "destination blocks entry from its left edge"
        );
    }

    #[test]
    fn ledge_tile_becomes_atomic_two_tile_jump() {
        let world = fixture_world(vec![TileDef {
            x: 5,
            y: 6,
            layers: vec![TileLayerDef {
                z: 0,
                blocked: Vec::new(),
                ledge: Some(Cardinal::Down),
            }],
            z_warp: None,
        }]);
        let config = MovementConfig::default();
        let mut ch = Character::at(Position::new(5, 5), 0);

        assert_eq!(
            ch.try_move(&world, None, Direction::Down, false),
            MoveOutcome::Jumped
        );
        assert_eq!(
            ch.position,
            Position::new(5, 7),
            "destination plus one further in the jump direction"
        );
        assert!(ch.jumping);
        settle(&mut ch, &config);
        assert!(!ch.jumping, "jump flag drops once progress reaches 1");
    }

    #[test]
    fn z_warp_applies_logical_layer_at_move_start() {
        let world = fixture_world(vec![
            TileDef {
                x: 6,
                y: 5,
                layers: vec![TileLayerDef {
                    z: 0,
                    blocked: Vec::new(),
                    ledge: None,
                }],
                z_warp: Some(1),
            },
            TileDef {
                x: 7,
                y: 5,
                layers: vec![TileLayerDef {
                    z: 1,
                    blocked: Vec::new(),
                    ledge: None,
                }],
                z_warp: None,
            },
        ]);
        let config = MovementConfig::default();
        let mut ch = Character::at(Position::new(5, 5), 0);

        ch.try_move(&world, None, Direction::Right, false);
        assert_eq!(ch.z, 1, "logical layer switches immediately");
        assert_eq!(ch.visual_z, 0, "visual layer lags until the move lands");
        settle(&mut ch, &config);
        assert_eq!(ch.visual_z, 1);

        // The upper layer is now walkable from z 1.
        assert_eq!(
            ch.try_move(&world, None, Direction::Right, false),
            MoveOutcome::Started
        );
    }

    #[test]
    fn running_finishes_a_step_faster_than_walking() {
        let world = fixture_world(Vec::new());
        let config = MovementConfig::default();

        let frames = |running: bool| {
            let mut ch = Character::at(Position::new(5, 5), 0);
            ch.running = running;
            ch.try_move(&world, None, Direction::Right, false);
            let mut count = 0;
            loop {
                ch.begin_frame();
                count += 1;
                if ch.tick_movement(1.0 / 60.0, &config) {
                    return count;
                }
            }
        };

        assert!(frames(true) < frames(false));
    }

    #[test]
    fn interaction_window_closes_past_commit_threshold() {
        let world = fixture_world(Vec::new());
        let config = MovementConfig::default();
        let mut ch = Character::at(Position::new(5, 5), 0);

        assert!(ch.can_interact(&config), "idle characters can interact");
        ch.try_move(&world, None, Direction::Right, false);
        ch.move_progress = config.interaction_commit - 0.01;
        assert!(ch.can_interact(&config));
        ch.move_progress = config.interaction_commit + 0.01;
        assert!(!ch.can_interact(&config));
    }

    #[test]
    fn route_cursor_wraps_after_full_loop() {
        // Scenario: [step right, step right, look up] returns to index 0
        // after exactly three completed actions.
        let world = fixture_world(Vec::new());
        let config = MovementConfig::default();
        let mut rng = StdRng::seed_from_u64(7);
        let mut ch = Character::at(Position::new(2, 2), 0);
        ch.movement = Some(AutonomousMovement::Route {
            steps: vec![
                RouteStep::Step(Direction::Right),
                RouteStep::Step(Direction::Right),
                RouteStep::Look(Direction::Up),
            ],
            cursor: 0,
            cooldown: Cooldown::new(0.0, 0.0),
        });

        let mut completed = 0;
        for _ in 0..600 {
            ch.begin_frame();
            ch.tick_movement(1.0 / 60.0, &config);
            let before = ch.movement.as_ref().and_then(|m| m.route_cursor());
            drive_autonomous(&mut ch, &world, Position::new(9, 9), 1.0 / 60.0, &mut rng);
            let after = ch.movement.as_ref().and_then(|m| m.route_cursor());
            if before != after {
                completed += 1;
            }
            if completed == 3 {
                break;
            }
        }
        assert_eq!(completed, 3, "route executed three actions");
        assert_eq!(
            ch.movement.as_ref().and_then(|m| m.route_cursor()),
            Some(0),
            "cursor wrapped to the start"
        );
        assert_eq!(ch.position, Position::new(4, 2));
        assert_eq!(ch.direction, Direction::Up);
    }

    #[test]
    fn random_walk_reverses_at_the_distance_cap() {
        let world = fixture_world(Vec::new());
        let config = MovementConfig::default();
        let mut rng = StdRng::seed_from_u64(42);
        let origin = Position::new(5, 5);
        let mut ch = Character::at(origin, 0);
        ch.movement = Some(AutonomousMovement::RandomWalk {
            origin,
            max_distance: 2,
            cooldown: Cooldown::new(0.0, 0.0),
        });

        for _ in 0..2000 {
            ch.begin_frame();
            ch.tick_movement(1.0 / 60.0, &config);
            drive_autonomous(&mut ch, &world, Position::new(0, 0), 1.0 / 60.0, &mut rng);
            let (dx, dy) = ch.position.axis_distance(origin);
            assert!(dx <= 2 && dy <= 2, "walk stayed inside the cap");
        }
    }

    #[test]
    fn jump_in_place_never_changes_position() {
        let config = MovementConfig::default();
        let mut ch = Character::at(Position::new(3, 3), 0);
        ch.jump_in_place();
        assert!(ch.moving && ch.jumping_in_place);
        settle(&mut ch, &config);
        assert_eq!(ch.position, Position::new(3, 3));
        assert!(!ch.jumping_in_place);
    }
}
