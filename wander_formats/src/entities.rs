use serde::{Deserialize, Serialize};

use crate::map::Cardinal;

/// How an interaction is triggered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerDef {
    /// The player faces the entity and presses the primary action.
    #[default]
    Interact,
    /// The player attempts to walk onto the entity's tile.
    Touch,
}

/// Interaction attached to an NPC placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InteractionDef {
    Script {
        asset: String,
        #[serde(default)]
        trigger: TriggerDef,
    },
    Message {
        text: String,
        #[serde(default)]
        trigger: TriggerDef,
    },
    Door {
        target_map: String,
        target_x: u32,
        target_y: u32,
        #[serde(default)]
        trigger: TriggerDef,
    },
}

impl InteractionDef {
    pub fn trigger(&self) -> TriggerDef {
        match self {
            InteractionDef::Script { trigger, .. }
            | InteractionDef::Message { trigger, .. }
            | InteractionDef::Door { trigger, .. } => *trigger,
        }
    }
}

/// One entry of a fixed looping route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RouteStepDef {
    Step { dir: Cardinal },
    Look { dir: Cardinal },
}

/// Cooldown between autonomous actions: `base` seconds plus or minus a
/// uniform `jitter`, so groups of NPCs drift out of phase.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CooldownDef {
    pub base: f32,
    #[serde(default)]
    pub jitter: f32,
}

impl Default for CooldownDef {
    fn default() -> Self {
        CooldownDef {
            base: 1.5,
            jitter: 0.5,
        }
    }
}

/// Autonomous movement strategy for an NPC placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MovementDef {
    Route {
        steps: Vec<RouteStepDef>,
        #[serde(default)]
        cooldown: CooldownDef,
    },
    RandomWalk {
        max_distance: u32,
        #[serde(default)]
        cooldown: CooldownDef,
    },
    LookAround {
        #[serde(default)]
        cooldown: CooldownDef,
    },
}

/// Declarative NPC record consumed once when its map streams in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NpcPlacement {
    pub index: u16,
    pub x: u32,
    pub y: u32,
    #[serde(default)]
    pub z: u8,
    pub sprite: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facing: Option<Cardinal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub movement: Option<MovementDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interaction: Option<InteractionDef>,
}

/// Declarative warp record: stepping here relocates the player to a local
/// coordinate of another map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarpPlacement {
    pub index: u16,
    pub x: u32,
    pub y: u32,
    pub target_map: String,
    pub target_x: u32,
    pub target_y: u32,
}
