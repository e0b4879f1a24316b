use std::collections::VecDeque;

use crate::grid::{Direction, Position};
use crate::presenter::{FadeKind, Ticket};
use crate::script::RunId;
use crate::world::EntityKey;

/// Whose movement a queued action drives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mover {
    Player,
    Npc(EntityKey),
}

impl Mover {
    pub fn label(&self) -> String {
        match self {
            Mover::Player => "player".to_string(),
            Mover::Npc(key) => key.to_string(),
        }
    }
}

/// The closed set of serialized scripted actions.
#[derive(Debug)]
pub enum QueuedAction {
    /// Step the target `remaining` tiles; entities never block scripted moves.
    Move {
        target: Mover,
        direction: Direction,
        remaining: u32,
    },
    Face {
        target: Mover,
        direction: Direction,
    },
    /// Show a message and hold until the presenter reports dismissal.
    Message {
        text: String,
        ticket: Option<Ticket>,
    },
    Wait {
        frames: u32,
    },
    ScreenFade {
        kind: FadeKind,
        ticket: Option<Ticket>,
    },
    /// Relocate the player to a local coordinate of a member map. A target
    /// outside the current world completes without moving anyone.
    Teleport {
        map: String,
        target: Position,
    },
    /// Cleanup marker: runs exactly once when it becomes current, then
    /// completes immediately, guaranteeing the cleanup happens only after
    /// every previously queued action has finished.
    End {
        pop_lock: bool,
        clear_interacting: Option<EntityKey>,
    },
}

impl QueuedAction {
    pub fn label(&self) -> &'static str {
        match self {
            QueuedAction::Move { .. } => "move",
            QueuedAction::Face { .. } => "face",
            QueuedAction::Message { .. } => "message",
            QueuedAction::Wait { .. } => "wait",
            QueuedAction::ScreenFade { .. } => "fade",
            QueuedAction::Teleport { .. } => "teleport",
            QueuedAction::End { .. } => "end",
        }
    }
}

/// One queue entry: the action, its completion flag, and the script run to
/// wake once it finishes.
#[derive(Debug)]
pub struct ScriptedEvent {
    pub action: QueuedAction,
    pub notify: Option<RunId>,
    pub complete: bool,
}

impl ScriptedEvent {
    pub fn new(action: QueuedAction) -> Self {
        ScriptedEvent {
            action,
            notify: None,
            complete: false,
        }
    }

    pub fn notifying(action: QueuedAction, run: RunId) -> Self {
        ScriptedEvent {
            action,
            notify: Some(run),
            complete: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Idle,
    Active,
}

/// Strictly-serial action queue: FIFO order, exactly one current entry. The
/// advance protocol itself lives on the game context, which owns the world
/// state the actions mutate; this type only guards the ordering invariant.
#[derive(Default)]
pub struct EventQueue {
    pending: VecDeque<ScriptedEvent>,
    current: Option<ScriptedEvent>,
}

impl EventQueue {
    pub fn new() -> Self {
        EventQueue::default()
    }

    pub fn enqueue(&mut self, event: ScriptedEvent) {
        self.pending.push_back(event);
    }

    pub fn state(&self) -> QueueState {
        if self.is_empty() {
            QueueState::Idle
        } else {
            QueueState::Active
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len() + usize::from(self.current.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_current(&self) -> bool {
        self.current.is_some()
    }

    /// Promote the next pending entry to current. Callers must have retired
    /// the previous current entry first.
    pub fn promote(&mut self) -> bool {
        debug_assert!(self.current.is_none(), "current entry not retired");
        match self.pending.pop_front() {
            Some(event) => {
                self.current = Some(event);
                true
            }
            None => false,
        }
    }

    /// Take the current entry out for one update step; pair with `restore`
    /// unless the entry completed.
    pub fn take_current(&mut self) -> Option<ScriptedEvent> {
        self.current.take()
    }

    pub fn restore(&mut self, event: ScriptedEvent) {
        debug_assert!(self.current.is_none(), "restore over a live entry");
        self.current = Some(event);
    }
}
