use std::cell::RefCell;
use std::rc::Rc;

use mlua::{Error as LuaError, Lua, Result as LuaResult, Value, Variadic};

use crate::context::{GameContext, PendingRun};
use crate::events::Mover;
use crate::grid::Direction;
use crate::presenter::FadeKind;
use crate::script::runtime::BlockRequest;

/// Lua-side wrappers pairing each blocking binding with the yield that
/// suspends the calling thread. The raw `__wander_*` functions only record
/// the request; nothing happens until the thread actually suspends.
const PRELUDE: &str = r#"
function wait(seconds) __wander_wait(seconds) return coroutine.yield() end
function wait_frame() __wander_wait_frame() return coroutine.yield() end
function message(text) __wander_message(text) return coroutine.yield() end
function walk(dir, steps) __wander_walk("self", dir, steps or 1) return coroutine.yield() end
function walk_player(dir, steps) __wander_walk("player", dir, steps or 1) return coroutine.yield() end
function fade_out() __wander_fade("out") return coroutine.yield() end
function fade_in() __wander_fade("in") return coroutine.yield() end
"#;

fn parse_direction(name: &str) -> LuaResult<Direction> {
    Direction::parse(name)
        .ok_or_else(|| LuaError::external(format!("unknown direction {name:?}")))
}

fn resolve_mover(ctx: &GameContext, target: &str) -> Mover {
    match target {
        "player" => Mover::Player,
        _ => match ctx.scripts.current_owner() {
            Some(key) => Mover::Npc(key),
            None => Mover::Player,
        },
    }
}

/// Install the script-facing API. Every closure captures the shared context
/// handle; none of them may hold a borrow across a yield.
pub(super) fn install_api(lua: &Lua, context: Rc<RefCell<GameContext>>) -> LuaResult<()> {
    let globals = lua.globals();

    let wait_ctx = context.clone();
    globals.set(
        "__wander_wait",
        lua.create_function(move |_, seconds: f32| {
            wait_ctx
                .borrow_mut()
                .scripts
                .set_pending(BlockRequest::Wait(seconds.max(0.0)));
            Ok(())
        })?,
    )?;

    let frame_ctx = context.clone();
    globals.set(
        "__wander_wait_frame",
        lua.create_function(move |_, ()| {
            frame_ctx
                .borrow_mut()
                .scripts
                .set_pending(BlockRequest::WaitFrame);
            Ok(())
        })?,
    )?;

    let message_ctx = context.clone();
    globals.set(
        "__wander_message",
        lua.create_function(move |_, text: String| {
            message_ctx
                .borrow_mut()
                .scripts
                .set_pending(BlockRequest::Message(text));
            Ok(())
        })?,
    )?;

    let walk_ctx = context.clone();
    globals.set(
        "__wander_walk",
        lua.create_function(move |_, (target, dir, steps): (String, String, u32)| {
            let direction = parse_direction(&dir)?;
            let mut ctx = walk_ctx.borrow_mut();
            let mover = resolve_mover(&ctx, &target);
            ctx.scripts.set_pending(BlockRequest::Walk {
                target: mover,
                direction,
                steps,
            });
            Ok(())
        })?,
    )?;

    let fade_ctx = context.clone();
    globals.set(
        "__wander_fade",
        lua.create_function(move |_, kind: String| {
            let kind = match kind.as_str() {
                "out" => FadeKind::Out,
                "in" => FadeKind::In,
                other => {
                    return Err(LuaError::external(format!("unknown fade {other:?}")));
                }
            };
            fade_ctx
                .borrow_mut()
                .scripts
                .set_pending(BlockRequest::Fade(kind));
            Ok(())
        })?,
    )?;

    let face_ctx = context.clone();
    globals.set(
        "face",
        lua.create_function(move |_, (target, dir): (String, String)| {
            let direction = parse_direction(&dir)?;
            let mut ctx = face_ctx.borrow_mut();
            match resolve_mover(&ctx, &target) {
                Mover::Player => ctx.player.direction = direction,
                Mover::Npc(key) => {
                    if let Some(npc) = ctx.world.npc_mut(&key) {
                        npc.character.direction = direction;
                    }
                }
            }
            Ok(())
        })?,
    )?;

    let face_player_ctx = context.clone();
    globals.set(
        "face_player",
        lua.create_function(move |_, ()| {
            let mut ctx = face_player_ctx.borrow_mut();
            if let Some(key) = ctx.scripts.current_owner() {
                let player_pos = ctx.player.position;
                if let Some(npc) = ctx.world.npc_mut(&key) {
                    npc.character.direction =
                        Direction::toward(npc.character.position, player_pos);
                }
            }
            Ok(())
        })?,
    )?;

    let hop_ctx = context.clone();
    globals.set(
        "hop",
        lua.create_function(move |_, ()| {
            let mut ctx = hop_ctx.borrow_mut();
            match ctx.scripts.current_owner() {
                Some(key) => {
                    if let Some(npc) = ctx.world.npc_mut(&key) {
                        npc.character.jump_in_place();
                    }
                }
                None => ctx.player.jump_in_place(),
            }
            Ok(())
        })?,
    )?;

    let lock_ctx = context.clone();
    globals.set(
        "lock_input",
        lua.create_function(move |_, label: Option<String>| {
            lock_ctx
                .borrow_mut()
                .push_lock(label.unwrap_or_else(|| "script".to_string()));
            Ok(())
        })?,
    )?;

    let unlock_ctx = context.clone();
    globals.set(
        "unlock_input",
        lua.create_function(move |_, ()| {
            unlock_ctx.borrow_mut().pop_lock();
            Ok(())
        })?,
    )?;

    let cue_ctx = context.clone();
    globals.set(
        "play_cue",
        lua.create_function(move |_, cue: String| {
            let mut ctx = cue_ctx.borrow_mut();
            ctx.presenter.clone().play_cue(&cue);
            ctx.log_event(format!("audio.cue {cue}"));
            Ok(())
        })?,
    )?;

    let set_flag_ctx = context.clone();
    globals.set(
        "set_flag",
        lua.create_function(move |_, (name, value): (String, bool)| {
            set_flag_ctx.borrow_mut().set_flag(&name, value);
            Ok(())
        })?,
    )?;

    let get_flag_ctx = context.clone();
    globals.set(
        "get_flag",
        lua.create_function(move |_, name: String| Ok(get_flag_ctx.borrow().flag(&name)))?,
    )?;

    let start_ctx = context.clone();
    globals.set(
        "start_script",
        lua.create_function(move |_, asset: String| {
            start_ctx.borrow_mut().pending_runs.push(PendingRun {
                asset,
                owner: None,
            });
            Ok(())
        })?,
    )?;

    let log_ctx = context;
    globals.set(
        "engine_log",
        lua.create_function(move |_, args: Variadic<Value>| {
            let parts: Vec<String> = args
                .iter()
                .map(|value| match value {
                    Value::String(text) => text.to_str().map(|s| s.to_string()),
                    other => Ok(format!("{other:?}")),
                })
                .collect::<LuaResult<_>>()?;
            log_ctx
                .borrow_mut()
                .log_event(format!("script.log {}", parts.join(" ")));
            Ok(())
        })?,
    )?;

    lua.load(PRELUDE).exec()?;
    Ok(())
}
