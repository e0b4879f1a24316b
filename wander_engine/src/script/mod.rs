mod bindings;
mod runtime;

pub use runtime::{BlockRequest, RunId, ScriptRuntime};

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::{Context, Result};
use mlua::{Lua, LuaOptions, MultiValue, StdLib, Thread, ThreadStatus};

use crate::context::{GameContext, PendingRun};
use crate::coroutine::{start_routine, Step, Wait};
use crate::events::{QueuedAction, ScriptedEvent};

/// The embedded-interpreter side of the bridge: owns the Lua state and
/// adapts Lua coroutine suspension onto engine coroutines and queued
/// actions. Engine-side bookkeeping lives in `ScriptRuntime` on the game
/// context; this host touches it only through the resume-by-run-id channel.
pub struct ScriptHost {
    lua: Lua,
    context: Rc<RefCell<GameContext>>,
}

impl ScriptHost {
    pub fn new(context: Rc<RefCell<GameContext>>) -> Result<Self> {
        let lua = Lua::new_with(StdLib::ALL_SAFE, LuaOptions::default())
            .context("initialising Lua runtime with standard libraries")?;
        bindings::install_api(&lua, context.clone()).context("installing script bindings")?;
        Ok(ScriptHost { lua, context })
    }

    /// Start a named script asset. The run executes immediately up to its
    /// first blocking call; a missing or broken asset releases the owning
    /// interaction instead of leaving it dangling.
    pub fn start_named(&self, asset: &str, owner: Option<crate::world::EntityKey>) -> Option<RunId> {
        let source = {
            let ctx = self.context.borrow();
            ctx.library.script_source(asset).map(str::to_string)
        };
        match source {
            Ok(source) => match self.start_run(asset, &source, owner.clone()) {
                Ok(run) => Some(run),
                Err(err) => {
                    let mut ctx = self.context.borrow_mut();
                    ctx.log_event(format!("script.error {asset}: {err}"));
                    let pop_lock = owner.is_some();
                    ctx.end_interaction(owner, pop_lock);
                    None
                }
            },
            Err(err) => {
                let mut ctx = self.context.borrow_mut();
                ctx.log_event(format!("script.error {asset}: {err}"));
                let pop_lock = owner.is_some();
                ctx.end_interaction(owner, pop_lock);
                None
            }
        }
    }

    /// Compile a chunk, spin a Lua thread for it, and resume it once.
    pub fn start_run(
        &self,
        label: &str,
        source: &str,
        owner: Option<crate::world::EntityKey>,
    ) -> Result<RunId> {
        let func = self
            .lua
            .load(source)
            .into_function()
            .with_context(|| format!("compiling script {label}"))?;
        let thread = self
            .lua
            .create_thread(func)
            .with_context(|| format!("creating thread for script {label}"))?;
        let key = self
            .lua
            .create_registry_value(thread.clone())
            .context("pinning script thread")?;
        let run = {
            let mut ctx = self.context.borrow_mut();
            let (run, event) = ctx.scripts.register(label.to_string(), owner);
            ctx.log_event(event);
            ctx.scripts.attach_thread(run, key);
            run
        };
        self.resume_run(run, Some(thread));
        Ok(run)
    }

    /// Per-frame drive: start any scripts requested this frame, apply the
    /// queued wakeups, and resume exactly the runs those wakeups targeted.
    pub fn drive(&self) {
        let pending: Vec<PendingRun> = {
            let mut ctx = self.context.borrow_mut();
            ctx.pending_runs.drain(..).collect()
        };
        for request in pending {
            self.start_named(&request.asset, request.owner);
        }

        let runnable = {
            let mut ctx = self.context.borrow_mut();
            ctx.scripts.drain_wakeups();
            ctx.scripts.runnable()
        };
        for run in runnable {
            self.resume_run(run, None);
        }
    }

    /// True while any script run is live; the CLI uses this to drain
    /// cutscenes before exiting.
    pub fn has_active_runs(&self) -> bool {
        self.context.borrow().scripts.active_count() > 0
    }

    fn recover_thread(&self, run: RunId) -> Option<Thread> {
        let ctx = self.context.borrow();
        let key = ctx.scripts.thread_key(run)?;
        self.lua.registry_value::<Thread>(key).ok()
    }

    fn resume_run(&self, run: RunId, thread_override: Option<Thread>) {
        let thread = match thread_override.or_else(|| self.recover_thread(run)) {
            Some(thread) => thread,
            None => {
                self.complete_run(run, None);
                return;
            }
        };
        if !matches!(thread.status(), ThreadStatus::Resumable) {
            self.complete_run(run, None);
            return;
        }

        self.context.borrow_mut().scripts.begin_resume(run);
        let result = thread.resume::<_, MultiValue>(());
        self.context.borrow_mut().scripts.end_resume();

        match result {
            Ok(_) => match thread.status() {
                ThreadStatus::Resumable => {
                    let request = self.context.borrow_mut().scripts.take_pending();
                    self.block_on(run, request);
                }
                ThreadStatus::Unresumable | ThreadStatus::Error => {
                    self.complete_run(run, None);
                }
            },
            Err(mlua::Error::CoroutineInactive) => self.complete_run(run, None),
            Err(err) => self.complete_run(run, Some(err.to_string())),
        }
    }

    /// Convert the yielded run's request into the engine effect that will
    /// wake it, strictly after the effect's observable completion.
    fn block_on(&self, run: RunId, request: Option<BlockRequest>) {
        self.context.borrow_mut().scripts.mark_blocked(run);
        match request.unwrap_or(BlockRequest::WaitFrame) {
            BlockRequest::Wait(seconds) => {
                let mut armed = false;
                start_routine(
                    &self.context,
                    format!("script.wait #{run}"),
                    Some(run),
                    Box::new(move |_| {
                        if armed {
                            Ok(Step::Done)
                        } else {
                            armed = true;
                            Ok(Step::Yield(Wait::Seconds(seconds)))
                        }
                    }),
                );
            }
            BlockRequest::WaitFrame => {
                let mut armed = false;
                start_routine(
                    &self.context,
                    format!("script.frame #{run}"),
                    Some(run),
                    Box::new(move |_| {
                        if armed {
                            Ok(Step::Done)
                        } else {
                            armed = true;
                            Ok(Step::Yield(Wait::NextFrame))
                        }
                    }),
                );
            }
            BlockRequest::Message(text) => {
                self.context
                    .borrow_mut()
                    .queue
                    .enqueue(ScriptedEvent::notifying(
                        QueuedAction::Message { text, ticket: None },
                        run,
                    ));
            }
            BlockRequest::Walk {
                target,
                direction,
                steps,
            } => {
                self.context
                    .borrow_mut()
                    .queue
                    .enqueue(ScriptedEvent::notifying(
                        QueuedAction::Move {
                            target,
                            direction,
                            remaining: steps,
                        },
                        run,
                    ));
            }
            BlockRequest::Fade(kind) => {
                self.context
                    .borrow_mut()
                    .queue
                    .enqueue(ScriptedEvent::notifying(
                        QueuedAction::ScreenFade { kind, ticket: None },
                        run,
                    ));
            }
        }
    }

    /// Shared success/fault exit: drop the record, free the pinned thread,
    /// and release the owning interaction so no lock ever leaks.
    fn complete_run(&self, run: RunId, error: Option<String>) {
        let cleanup = {
            let mut ctx = self.context.borrow_mut();
            if let Some(message) = &error {
                let label = ctx
                    .scripts
                    .label(run)
                    .unwrap_or_else(|| format!("#{run}"));
                ctx.log_event(format!("script.error {label}: {message}"));
            }
            let (cleanup, event) = ctx.scripts.complete(run);
            if let Some(event) = event {
                ctx.log_event(event);
            }
            cleanup
        };
        if let Some(key) = cleanup.thread {
            let _ = self.lua.remove_registry_value(key);
        }
        if cleanup.owner.is_some() {
            self.context
                .borrow_mut()
                .end_interaction(cleanup.owner, true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::bare_context;
    use crate::coroutine::update_routines;

    fn tick(host: &ScriptHost, context: &Rc<RefCell<GameContext>>) {
        {
            let mut ctx = context.borrow_mut();
            ctx.frame += 1;
        }
        update_routines(context);
        context.borrow_mut().update_queue();
        host.drive();
    }

    #[test]
    fn a_run_executes_to_its_first_blocking_call_immediately() {
        let context = bare_context();
        let host = ScriptHost::new(context.clone()).expect("host builds");
        host.start_run("probe", "set_flag('started', true)\nwait(1.0)\nset_flag('finished', true)", None)
            .expect("run starts");
        assert!(context.borrow().flag("started"), "ran up to the wait");
        assert!(!context.borrow().flag("finished"));
    }

    #[test]
    fn wait_resumes_only_after_the_time_elapses() {
        let context = bare_context();
        context.borrow_mut().frame_delta = 0.1;
        let host = ScriptHost::new(context.clone()).expect("host builds");
        host.start_run("timer", "wait(0.25)\nset_flag('done', true)", None)
            .expect("run starts");

        tick(&host, &context);
        tick(&host, &context);
        assert!(!context.borrow().flag("done"), "0.2s of 0.25 elapsed");
        tick(&host, &context);
        // The routine completed this frame; its wakeup resumes the run on
        // the same drive pass, strictly after the timer's completion.
        assert!(context.borrow().flag("done"));
        assert!(!host.has_active_runs());
    }

    #[test]
    fn message_blocks_until_the_presenter_reports_dismissal() {
        let context = bare_context();
        let host = ScriptHost::new(context.clone()).expect("host builds");
        host.start_run("talker", "message('hello')\nset_flag('after', true)", None)
            .expect("run starts");

        assert!(!context.borrow().flag("after"));
        for _ in 0..10 {
            tick(&host, &context);
            if context.borrow().flag("after") {
                break;
            }
        }
        assert!(context.borrow().flag("after"), "resumed after dismissal");
        let events = context.borrow().events().to_vec();
        let shown = events.iter().position(|e| e.starts_with("dialog.show"));
        let done = events.iter().position(|e| e == "dialog.done");
        assert!(shown.expect("dialog shown") < done.expect("dialog dismissed"));
    }

    #[test]
    fn overlapping_runs_of_one_asset_never_cross_resume() {
        let context = bare_context();
        let host = ScriptHost::new(context.clone()).expect("host builds");
        context.borrow_mut().frame_delta = 0.1;
        // Same source, two runs; the short wait must not wake the long one.
        let source_a = "wait(0.1)\nset_flag('a', true)";
        let source_b = "wait(0.6)\nset_flag('b', true)";
        host.start_run("shared", source_a, None).expect("run a");
        host.start_run("shared", source_b, None).expect("run b");

        tick(&host, &context);
        tick(&host, &context);
        assert!(context.borrow().flag("a"));
        assert!(
            !context.borrow().flag("b"),
            "the second run stayed suspended past the first's wakeup"
        );
        for _ in 0..6 {
            tick(&host, &context);
        }
        assert!(context.borrow().flag("b"));
    }

    #[test]
    fn a_lua_fault_terminates_one_run_and_leaves_the_rest() {
        let context = bare_context();
        let host = ScriptHost::new(context.clone()).expect("host builds");
        context.borrow_mut().frame_delta = 0.1;
        host.start_run("doomed", "wait_frame()\nerror('kaput')", None)
            .expect("doomed run starts");
        host.start_run("steady", "wait(0.15)\nset_flag('steady', true)", None)
            .expect("steady run starts");

        for _ in 0..4 {
            tick(&host, &context);
        }
        assert!(context.borrow().flag("steady"), "healthy run unaffected");
        assert!(!host.has_active_runs());
        assert!(context
            .borrow()
            .events()
            .iter()
            .any(|event| event.starts_with("script.error doomed")));
    }

    #[test]
    fn yield_without_a_request_acts_as_a_frame_wait() {
        let context = bare_context();
        let host = ScriptHost::new(context.clone()).expect("host builds");
        host.start_run("bare", "coroutine.yield()\nset_flag('resumed', true)", None)
            .expect("run starts");
        assert!(!context.borrow().flag("resumed"));
        tick(&host, &context);
        assert!(context.borrow().flag("resumed"));
    }
}
