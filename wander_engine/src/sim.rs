use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use anyhow::Result;
use log::warn;
use serde::Serialize;
use wander_formats::AssetLibrary;

use crate::context::{EngineConfig, GameContext};
use crate::coroutine::update_routines;
use crate::grid::{Position, Subposition};
use crate::input::InputAction;
use crate::presenter::Presenter;
use crate::script::ScriptHost;

/// One recorded frame of player state, written to the movement log.
#[derive(Debug, Clone, Serialize)]
pub struct MovementSample {
    pub frame: u64,
    pub position: Position,
    pub subposition: Subposition,
    pub direction: String,
    pub moving: bool,
    pub z: u8,
}

/// A stretch of frames with a fixed set of held actions.
#[derive(Debug, Clone)]
pub struct InputSegment {
    pub frames: u64,
    pub actions: Vec<InputAction>,
}

/// Scripted input feed for headless runs; the segments play back in order
/// and the tape reads empty once exhausted.
#[derive(Debug, Clone, Default)]
pub struct InputTape {
    segments: Vec<InputSegment>,
}

impl InputTape {
    pub fn new(segments: Vec<InputSegment>) -> Self {
        InputTape { segments }
    }

    /// The built-in demo walk: read the sign, talk to the elder, then step
    /// onto the east warp. Paced for the bundled demo data root at 60 Hz.
    pub fn demo() -> Self {
        use InputAction::*;
        let seg = |frames, actions: &[InputAction]| InputSegment {
            frames,
            actions: actions.to_vec(),
        };
        InputTape::new(vec![
            seg(50, &[Right]),
            seg(5, &[]),
            seg(1, &[Primary]),
            seg(70, &[]),
            seg(10, &[Down]),
            seg(10, &[]),
            seg(55, &[Right]),
            seg(10, &[]),
            seg(10, &[Up]),
            seg(5, &[]),
            seg(1, &[Primary]),
            seg(200, &[]),
            seg(25, &[Down]),
            seg(10, &[]),
            seg(55, &[Right]),
            seg(130, &[]),
        ])
    }

    pub fn actions_at(&self, frame: u64) -> BTreeSet<InputAction> {
        let mut cursor = 0;
        for segment in &self.segments {
            if frame < cursor + segment.frames {
                return segment.actions.iter().copied().collect();
            }
            cursor += segment.frames;
        }
        BTreeSet::new()
    }

    pub fn len_frames(&self) -> u64 {
        self.segments.iter().map(|segment| segment.frames).sum()
    }
}

/// Owns the context and the script host and steps them in the fixed frame
/// order: deferred wakeups and input, world entity logic, coroutines, the
/// scripted-event queue, then the script drive pass.
pub struct Simulation {
    context: Rc<RefCell<GameContext>>,
    host: ScriptHost,
}

impl Simulation {
    pub fn new(
        library: Rc<AssetLibrary>,
        presenter: Rc<dyn Presenter>,
        config: EngineConfig,
    ) -> Result<Self> {
        for issue in library.issues() {
            warn!("asset definition skipped: {}", issue.error);
        }
        let context = Rc::new(RefCell::new(GameContext::new(library, presenter, config)));
        let host = ScriptHost::new(context.clone())?;
        Ok(Simulation { context, host })
    }

    pub fn context(&self) -> &Rc<RefCell<GameContext>> {
        &self.context
    }

    pub fn enter_world(&self, world_id: &str) -> Result<()> {
        self.context.borrow_mut().enter_world(world_id)
    }

    pub fn tick(&self, actions: &BTreeSet<InputAction>, delta: f32) {
        {
            let mut ctx = self.context.borrow_mut();
            ctx.begin_frame(actions, delta);
            ctx.tick_world();
            ctx.process_player_input();
        }
        update_routines(&self.context);
        self.context.borrow_mut().update_queue();
        self.host.drive();
    }

    pub fn sample(&self) -> MovementSample {
        let ctx = self.context.borrow();
        MovementSample {
            frame: ctx.frame,
            position: ctx.player.position,
            subposition: ctx.player.subposition(),
            direction: ctx.player.direction.label().to_string(),
            moving: ctx.player.moving,
            z: ctx.player.visual_z,
        }
    }

    /// Run a tape for a fixed number of frames, sampling the player each
    /// frame. The simulation keeps ticking on an empty tape so trailing
    /// cutscenes can drain.
    pub fn run(&self, tape: &InputTape, frames: u64, delta: f32) -> Vec<MovementSample> {
        let mut samples = Vec::with_capacity(frames as usize);
        for frame in 0..frames {
            let actions = tape.actions_at(frame);
            self.tick(&actions, delta);
            samples.push(self.sample());
        }
        samples
    }

    pub fn events(&self) -> Vec<String> {
        self.context.borrow().events().to_vec()
    }

    pub fn has_active_runs(&self) -> bool {
        self.host.has_active_runs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::EngineConfig;
    use crate::presenter::RecordingPresenter;
    use crate::world::EntityKey;
    use wander_formats::{
        InteractionDef, MapData, NpcPlacement, StartDef, TriggerDef, WarpPlacement, WorldGraph,
        WorldMapEntry,
    };

    const DELTA: f32 = 1.0 / 60.0;

    fn two_map_library() -> AssetLibrary {
        let mut west = MapData {
            id: "west".to_string(),
            width: 8,
            height: 8,
            tiles: Vec::new(),
            npcs: Vec::new(),
            warps: Vec::new(),
        };
        west.warps.push(WarpPlacement {
            index: 0,
            x: 6,
            y: 2,
            target_map: "east".to_string(),
            target_x: 1,
            target_y: 1,
        });
        let east = MapData {
            id: "east".to_string(),
            width: 8,
            height: 8,
            tiles: Vec::new(),
            npcs: Vec::new(),
            warps: Vec::new(),
        };
        let graph = WorldGraph {
            id: "pair".to_string(),
            start: StartDef {
                map: "west".to_string(),
                x: 2,
                y: 2,
            },
            maps: vec![
                WorldMapEntry {
                    map: "west".to_string(),
                    offset_x: 0,
                    offset_y: 0,
                },
                WorldMapEntry {
                    map: "east".to_string(),
                    offset_x: 40,
                    offset_y: 0,
                },
            ],
        };
        AssetLibrary::from_parts(vec![graph], vec![west, east])
    }

    fn simulation(library: AssetLibrary, latency: u32) -> Simulation {
        let presenter = Rc::new(RecordingPresenter::new(latency));
        let sim = Simulation::new(Rc::new(library), presenter, EngineConfig::default())
            .expect("simulation builds");
        let world_id = {
            let ctx = sim.context().borrow();
            let world_id = ctx
                .library
                .world_ids()
                .next()
                .map(str::to_string)
                .expect("library has a world");
            world_id
        };
        sim.enter_world(&world_id).expect("world enters");
        sim
    }

    fn hold(action: InputAction) -> BTreeSet<InputAction> {
        [action].into_iter().collect()
    }

    #[test]
    fn stepping_onto_a_warp_relocates_and_restreams() {
        let sim = simulation(two_map_library(), 1);
        // Walk east until the warp tile at (6,2) triggers the transition.
        for _ in 0..600 {
            sim.tick(&hold(InputAction::Right), DELTA);
            let ctx = sim.context().borrow();
            if ctx.player.position.x >= 41 {
                break;
            }
        }
        // Let the fade-in and the cleanup entry drain.
        for _ in 0..120 {
            sim.tick(&BTreeSet::new(), DELTA);
        }
        let ctx = sim.context().borrow();
        assert_eq!(
            ctx.player.position,
            crate::grid::Position::new(41, 1),
            "teleport landed on east's local (1,1)"
        );
        assert!(ctx.world.is_loaded("east"));
        assert!(!ctx.world.is_loaded("west"), "west streamed out");
        assert!(!ctx.locks.locked(), "transition released its lock");
        assert!(ctx.world.entity_liveness_holds(ctx.player.position));
    }

    #[test]
    fn script_interaction_fault_releases_the_input_lock() {
        let mut west = MapData {
            id: "west".to_string(),
            width: 8,
            height: 8,
            tiles: Vec::new(),
            npcs: Vec::new(),
            warps: Vec::new(),
        };
        west.npcs.push(NpcPlacement {
            index: 0,
            x: 3,
            y: 2,
            z: 0,
            sprite: "hermit".to_string(),
            facing: None,
            movement: None,
            interaction: Some(InteractionDef::Script {
                asset: "broken".to_string(),
                trigger: TriggerDef::Interact,
            }),
        });
        let graph = WorldGraph {
            id: "solo".to_string(),
            start: StartDef {
                map: "west".to_string(),
                x: 2,
                y: 2,
            },
            maps: vec![WorldMapEntry {
                map: "west".to_string(),
                offset_x: 0,
                offset_y: 0,
            }],
        };
        let mut library = AssetLibrary::from_parts(vec![graph], vec![west]);
        library.insert_script("broken", "wait_frame()\nerror('snapped')");
        let sim = simulation(library, 1);

        // Face the hermit and press the primary action.
        sim.tick(&hold(InputAction::Right), DELTA);
        for _ in 0..30 {
            sim.tick(&BTreeSet::new(), DELTA);
        }
        sim.tick(&hold(InputAction::Primary), DELTA);
        assert!(sim.context().borrow().locks.locked(), "interaction locked input");

        for _ in 0..10 {
            sim.tick(&BTreeSet::new(), DELTA);
        }
        let ctx = sim.context().borrow();
        assert!(!ctx.locks.locked(), "fault path popped the lock");
        let key = EntityKey::new("west", 0);
        assert!(
            !ctx.world.npc(&key).expect("npc live").interacting,
            "fault path cleared the interacting flag"
        );
        assert!(ctx
            .events()
            .iter()
            .any(|event| event.starts_with("script.error broken")));
    }

    #[test]
    fn touch_door_intercepts_the_walk_and_takes_over() {
        let mut west = MapData {
            id: "west".to_string(),
            width: 8,
            height: 8,
            tiles: Vec::new(),
            npcs: Vec::new(),
            warps: Vec::new(),
        };
        west.npcs.push(NpcPlacement {
            index: 0,
            x: 4,
            y: 2,
            z: 0,
            sprite: "door".to_string(),
            facing: None,
            movement: None,
            interaction: Some(InteractionDef::Door {
                target_map: "east".to_string(),
                target_x: 2,
                target_y: 2,
                trigger: TriggerDef::Touch,
            }),
        });
        let east = MapData {
            id: "east".to_string(),
            width: 8,
            height: 8,
            tiles: Vec::new(),
            npcs: Vec::new(),
            warps: Vec::new(),
        };
        let graph = WorldGraph {
            id: "pair".to_string(),
            start: StartDef {
                map: "west".to_string(),
                x: 2,
                y: 2,
            },
            maps: vec![
                WorldMapEntry {
                    map: "west".to_string(),
                    offset_x: 0,
                    offset_y: 0,
                },
                WorldMapEntry {
                    map: "east".to_string(),
                    offset_x: 40,
                    offset_y: 0,
                },
            ],
        };
        let sim = simulation(AssetLibrary::from_parts(vec![graph], vec![east, west]), 1);

        for _ in 0..400 {
            sim.tick(&hold(InputAction::Right), DELTA);
            if sim.context().borrow().player.position.x >= 40 {
                break;
            }
        }
        for _ in 0..120 {
            sim.tick(&BTreeSet::new(), DELTA);
        }
        let ctx = sim.context().borrow();
        assert_eq!(
            ctx.player.position,
            crate::grid::Position::new(42, 2),
            "door took over and relocated the player"
        );
        assert!(
            ctx.events().iter().any(|e| e.starts_with("interact.begin west_0")),
            "walk converted into a touch interaction"
        );
        assert!(!ctx.locks.locked());
    }
}
