use std::collections::BTreeMap;
use std::rc::Rc;

use anyhow::{bail, Result};
use log::warn;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use wander_formats::AssetLibrary;

use crate::character::{Character, MovementConfig, MoveOutcome};
use crate::coroutine::CoroutineRuntime;
use crate::events::{EventQueue, Mover, QueuedAction, ScriptedEvent};
use crate::grid::{Direction, Position};
use crate::input::{InputAction, InputLocks, InputState};
use crate::presenter::Presenter;
use crate::script::{RunId, ScriptRuntime};
use crate::world::{EntityKey, Interaction, Occupant, Trigger, Warp, World};

/// Tunables for a session, deserializable from a config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub movement: MovementConfig,
    pub load_distance_x: i32,
    pub load_distance_y: i32,
    pub rng_seed: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            movement: MovementConfig::default(),
            load_distance_x: 9,
            load_distance_y: 9,
            rng_seed: 0x57414e44,
        }
    }
}

/// A script asset waiting to be started by the host on the next drive pass.
#[derive(Debug)]
pub struct PendingRun {
    pub asset: String,
    pub owner: Option<EntityKey>,
}

/// All mutable engine state for one session, owned by the frame loop and
/// threaded explicitly through every update. There are no globals; isolated
/// tests build one of these and tick it directly.
pub struct GameContext {
    pub config: EngineConfig,
    pub frame: u64,
    pub frame_delta: f32,
    pub library: Rc<AssetLibrary>,
    pub world: World,
    pub player: Character,
    pub input: InputState,
    pub locks: InputLocks,
    pub queue: EventQueue,
    pub routines: CoroutineRuntime,
    pub scripts: ScriptRuntime,
    pub flags: BTreeMap<String, bool>,
    pub presenter: Rc<dyn Presenter>,
    pub rng: StdRng,
    pub pending_runs: Vec<PendingRun>,
    /// Wakeups arriving outside the tick (the audio boundary); drained at
    /// the start of the next frame, never applied re-entrantly.
    pub deferred_wakeups: Vec<RunId>,
    events: Vec<String>,
}

impl GameContext {
    pub fn new(
        library: Rc<AssetLibrary>,
        presenter: Rc<dyn Presenter>,
        config: EngineConfig,
    ) -> Self {
        let world = World::new(
            library.clone(),
            (config.load_distance_x, config.load_distance_y),
        );
        let rng = StdRng::seed_from_u64(config.rng_seed);
        GameContext {
            config,
            frame: 0,
            frame_delta: 0.0,
            library,
            world,
            player: Character::at(Position::new(0, 0), 0),
            input: InputState::default(),
            locks: InputLocks::default(),
            queue: EventQueue::new(),
            routines: CoroutineRuntime::new(),
            scripts: ScriptRuntime::new(),
            flags: BTreeMap::new(),
            presenter,
            rng,
            pending_runs: Vec::new(),
            deferred_wakeups: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn log_event(&mut self, event: impl Into<String>) {
        self.events.push(event.into());
    }

    pub fn events(&self) -> &[String] {
        &self.events
    }

    pub fn wake_script(&mut self, run: RunId) {
        self.scripts.wake(run);
    }

    /// Entry point for completion callbacks that may arrive off the tick
    /// (the audio backend boundary).
    #[allow(dead_code)]
    pub fn defer_wake(&mut self, run: RunId) {
        self.deferred_wakeups.push(run);
    }

    pub fn flag(&self, name: &str) -> bool {
        self.flags.get(name).copied().unwrap_or(false)
    }

    pub fn set_flag(&mut self, name: &str, value: bool) {
        self.flags.insert(name.to_string(), value);
    }

    /// Select a world and drop the player at its start position.
    pub fn enter_world(&mut self, world_id: &str) -> Result<()> {
        let GameContext { world, events, .. } = self;
        let Some(start) = world.select_world(world_id, events) else {
            bail!("unknown world {world_id:?}");
        };
        self.player = Character::at(start, 0);
        self.log_event(format!("player.place {},{}", start.x, start.y));
        let GameContext { world, events, .. } = self;
        world.set_focus(start, events);
        Ok(())
    }

    /// Frame prologue: advance the input edge state and promote any
    /// off-tick wakeups into the script runtime.
    pub fn begin_frame(&mut self, actions: &std::collections::BTreeSet<InputAction>, delta: f32) {
        self.frame += 1;
        self.frame_delta = delta;
        self.input.advance(actions);
        for run in std::mem::take(&mut self.deferred_wakeups) {
            self.scripts.wake(run);
        }
    }

    /// World phase: entity logic first, per the frame order. Player movement
    /// interpolation, warp tiles, map animation, then NPC strategies.
    pub fn tick_world(&mut self) {
        let delta = self.frame_delta;
        self.player.begin_frame();
        let landed = self.player.tick_movement(delta, &self.config.movement);
        self.world.tick_animations();

        let player_pos = self.player.position;
        let GameContext {
            world, config, rng, ..
        } = self;
        world.tick_npcs(delta, player_pos, &config.movement, rng);

        if landed {
            if let Some(warp) = self.world.warp_at(self.player.position).cloned() {
                self.begin_warp(warp);
            }
        }
    }

    /// Poll the player's input; a non-empty lock stack freezes all of it.
    pub fn process_player_input(&mut self) {
        if self.locks.locked() {
            return;
        }

        if self.input.pressed(InputAction::Primary)
            && self.player.can_interact(&self.config.movement)
        {
            let ahead = self.player.position.offset(self.player.direction);
            if let Some(Occupant::Npc(key)) = self.world.entity_at(ahead, None) {
                let triggers = self
                    .world
                    .npc(&key)
                    .and_then(|npc| npc.interaction.as_ref())
                    .map(|interaction| interaction.trigger() == Trigger::Interact)
                    .unwrap_or(false);
                if triggers {
                    self.begin_interaction(key);
                    return;
                }
            }
        }

        let direction = if self.input.held(InputAction::Up) {
            Direction::Up
        } else if self.input.held(InputAction::Down) {
            Direction::Down
        } else if self.input.held(InputAction::Left) {
            Direction::Left
        } else if self.input.held(InputAction::Right) {
            Direction::Right
        } else {
            Direction::None
        };
        if direction == Direction::None {
            return;
        }
        self.player.running = self.input.held(InputAction::Run);
        let outcome = {
            let GameContext { world, player, .. } = self;
            player.try_move(world, None, direction, false)
        };
        match outcome {
            MoveOutcome::Started | MoveOutcome::Jumped => {
                let focus = self.player.position;
                let GameContext { world, events, .. } = self;
                world.set_focus(focus, events);
            }
            MoveOutcome::Intercepted(key) => self.begin_interaction(key),
            MoveOutcome::Blocked | MoveOutcome::Busy => {}
        }
    }

    /// Convert an NPC's interaction into queued actions or a script run.
    /// Every path out of the interaction pops the lock pushed here.
    pub fn begin_interaction(&mut self, key: EntityKey) {
        let Some(interaction) = self
            .world
            .npc(&key)
            .and_then(|npc| npc.interaction.clone())
        else {
            return;
        };

        let player_facing = self.player.direction;
        if let Some(npc) = self.world.npc_mut(&key) {
            npc.interacting = true;
            npc.character.direction = player_facing.opposite();
        }
        self.log_event(format!("interact.begin {key}"));
        self.push_lock(format!("interact {key}"));

        match interaction {
            Interaction::Message { text, .. } => {
                self.queue
                    .enqueue(ScriptedEvent::new(QueuedAction::Message { text, ticket: None }));
                self.queue.enqueue(ScriptedEvent::new(QueuedAction::End {
                    pop_lock: true,
                    clear_interacting: Some(key),
                }));
            }
            Interaction::Script { asset, .. } => {
                self.pending_runs.push(PendingRun {
                    asset,
                    owner: Some(key),
                });
            }
            Interaction::Door {
                target_map, target, ..
            } => {
                self.enqueue_door_sequence(target_map, target, Some(key));
            }
        }
    }

    /// Player landed on a warp tile: fade out, relocate, fade in.
    fn begin_warp(&mut self, warp: Warp) {
        self.log_event(format!("warp.enter {}", warp.key));
        self.push_lock(format!("warp {}", warp.key));
        self.enqueue_door_sequence(warp.target_map, warp.target, None);
    }

    fn enqueue_door_sequence(
        &mut self,
        target_map: String,
        target: Position,
        clear_interacting: Option<EntityKey>,
    ) {
        use crate::presenter::FadeKind;
        self.queue.enqueue(ScriptedEvent::new(QueuedAction::ScreenFade {
            kind: FadeKind::Out,
            ticket: None,
        }));
        self.queue.enqueue(ScriptedEvent::new(QueuedAction::Teleport {
            map: target_map,
            target,
        }));
        self.queue.enqueue(ScriptedEvent::new(QueuedAction::ScreenFade {
            kind: FadeKind::In,
            ticket: None,
        }));
        self.queue.enqueue(ScriptedEvent::new(QueuedAction::End {
            pop_lock: true,
            clear_interacting,
        }));
    }

    pub fn push_lock(&mut self, label: String) {
        self.log_event(format!("input.lock {label}"));
        self.locks.push(label);
    }

    pub fn pop_lock(&mut self) {
        match self.locks.pop() {
            Some(label) => self.log_event(format!("input.unlock {label}")),
            None => warn!("input lock pop with empty stack"),
        }
    }

    /// Teardown shared by scripted-interaction exits, success or fault: the
    /// owning NPC stops interacting and the interaction's lock pops.
    pub fn end_interaction(&mut self, owner: Option<EntityKey>, pop_lock: bool) {
        if pop_lock {
            self.pop_lock();
        }
        if let Some(key) = owner {
            if let Some(npc) = self.world.npc_mut(&key) {
                npc.interacting = false;
            }
            self.log_event(format!("interact.end {key}"));
        }
    }

    /// Advance the scripted-event queue: only the current entry updates, and
    /// a completion promotes the next entry within the same call so
    /// zero-duration actions add no visible delay.
    pub fn update_queue(&mut self) {
        loop {
            if !self.queue.has_current() {
                if !self.queue.promote() {
                    break;
                }
                let mut event = self.queue.take_current().expect("entry just promoted");
                self.start_action(&mut event);
                if event.complete {
                    self.finish_event(event);
                    continue;
                }
                self.queue.restore(event);
            }
            let mut event = self.queue.take_current().expect("current entry checked");
            self.step_action(&mut event);
            if event.complete {
                self.finish_event(event);
                continue;
            }
            self.queue.restore(event);
            break;
        }
    }

    fn finish_event(&mut self, event: ScriptedEvent) {
        self.log_event(format!("queue.end {}", event.action.label()));
        if let Some(run) = event.notify {
            self.wake_script(run);
        }
    }

    /// Side effects that fire once, the moment an entry becomes current.
    fn start_action(&mut self, event: &mut ScriptedEvent) {
        match &mut event.action {
            QueuedAction::Message { text, ticket } => {
                let issued = self.presenter.show_message(text);
                *ticket = Some(issued);
                let text = text.clone();
                self.log_event(format!("dialog.show {text}"));
            }
            QueuedAction::ScreenFade { kind, ticket } => {
                let issued = self.presenter.begin_fade(*kind);
                *ticket = Some(issued);
                let label = kind.label();
                self.log_event(format!("fade.{label}"));
            }
            QueuedAction::End {
                pop_lock,
                clear_interacting,
            } => {
                let pop = *pop_lock;
                let owner = clear_interacting.take();
                self.end_interaction(owner, pop);
                event.complete = true;
            }
            QueuedAction::Move { .. }
            | QueuedAction::Face { .. }
            | QueuedAction::Wait { .. }
            | QueuedAction::Teleport { .. } => {}
        }
    }

    /// One per-frame step of the current entry.
    fn step_action(&mut self, event: &mut ScriptedEvent) {
        if event.complete {
            return;
        }
        match &mut event.action {
            QueuedAction::Move {
                target,
                direction,
                remaining,
            } => match target {
                Mover::Player => {
                    if self.player.moving {
                        return;
                    }
                    if *remaining == 0 {
                        event.complete = true;
                        return;
                    }
                    let outcome = {
                        let GameContext { world, player, .. } = self;
                        player.try_move(world, None, *direction, true)
                    };
                    match outcome {
                        MoveOutcome::Started | MoveOutcome::Jumped => {
                            *remaining -= 1;
                            let focus = self.player.position;
                            let GameContext { world, events, .. } = self;
                            world.set_focus(focus, events);
                        }
                        _ => {
                            self.log_event("queue.move blocked player".to_string());
                            event.complete = true;
                        }
                    }
                }
                Mover::Npc(key) => {
                    let Some(mut npc) = self.world.take_npc(key) else {
                        // The map streamed out from under the cutscene.
                        event.complete = true;
                        return;
                    };
                    if npc.character.moving {
                        self.world.put_npc(npc);
                        return;
                    }
                    if *remaining == 0 {
                        self.world.put_npc(npc);
                        event.complete = true;
                        return;
                    }
                    let outcome = npc.character.try_move(
                        &self.world,
                        Some(self.player.position),
                        *direction,
                        true,
                    );
                    match outcome {
                        MoveOutcome::Started | MoveOutcome::Jumped => *remaining -= 1,
                        _ => {
                            self.log_event(format!("queue.move blocked {key}"));
                            event.complete = true;
                        }
                    }
                    self.world.put_npc(npc);
                }
            },
            QueuedAction::Face { target, direction } => {
                match target {
                    Mover::Player => self.player.direction = *direction,
                    Mover::Npc(key) => {
                        if let Some(npc) = self.world.npc_mut(key) {
                            npc.character.direction = *direction;
                        }
                    }
                }
                event.complete = true;
            }
            QueuedAction::Message { ticket, .. } => {
                if ticket.map(|t| self.presenter.poll(t)).unwrap_or(true) {
                    self.log_event("dialog.done".to_string());
                    event.complete = true;
                }
            }
            QueuedAction::Wait { frames } => {
                if *frames > 0 {
                    *frames -= 1;
                }
                if *frames == 0 {
                    event.complete = true;
                }
            }
            QueuedAction::ScreenFade { ticket, .. } => {
                if ticket.map(|t| self.presenter.poll(t)).unwrap_or(true) {
                    event.complete = true;
                }
            }
            QueuedAction::Teleport { map, target } => {
                match self.world.world_position(map, *target) {
                    Some(position) => {
                        self.player.position = position;
                        self.player.previous_position = position;
                        self.player.moving = false;
                        self.player.move_progress = 0.0;
                        self.log_event(format!("teleport {map} {},{}", position.x, position.y));
                        let GameContext { world, events, .. } = self;
                        world.set_focus(position, events);
                    }
                    None => {
                        // Misconfigured doors fail silently; the session
                        // keeps running.
                        warn!("teleport target {map:?} is not in the current world");
                        self.log_event(format!("teleport.unknown {map}"));
                    }
                }
                event.complete = true;
            }
            QueuedAction::End { .. } => {}
        }
    }
}

#[cfg(test)]
pub mod test_support {
    use std::cell::RefCell;
    use std::rc::Rc;

    use wander_formats::{AssetLibrary, MapData, StartDef, WorldGraph, WorldMapEntry};

    use super::{EngineConfig, GameContext};
    use crate::presenter::RecordingPresenter;

    pub fn single_map_library(width: u32, height: u32) -> AssetLibrary {
        let map = MapData {
            id: "field".to_string(),
            width,
            height,
            tiles: Vec::new(),
            npcs: Vec::new(),
            warps: Vec::new(),
        };
        let graph = WorldGraph {
            id: "test".to_string(),
            start: StartDef {
                map: "field".to_string(),
                x: 2,
                y: 2,
            },
            maps: vec![WorldMapEntry {
                map: "field".to_string(),
                offset_x: 0,
                offset_y: 0,
            }],
        };
        AssetLibrary::from_parts(vec![graph], vec![map])
    }

    pub fn bare_context() -> Rc<RefCell<GameContext>> {
        context_with(single_map_library(10, 10), 1)
    }

    pub fn context_with(
        library: AssetLibrary,
        message_latency: u32,
    ) -> Rc<RefCell<GameContext>> {
        let presenter = Rc::new(RecordingPresenter::new(message_latency));
        let mut context = GameContext::new(
            Rc::new(library),
            presenter,
            EngineConfig::default(),
        );
        context.frame_delta = 1.0 / 60.0;
        let _ = context.enter_world("test");
        Rc::new(RefCell::new(context))
    }
}
