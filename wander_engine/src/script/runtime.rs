use std::collections::BTreeMap;

use mlua::RegistryKey;

use crate::events::Mover;
use crate::grid::Direction;
use crate::presenter::FadeKind;
use crate::world::EntityKey;

/// Monotonically increasing identity of one script execution. Ids are never
/// reused, so a wakeup aimed at a finished run falls on the floor instead of
/// resuming a newer run of the same asset.
pub type RunId = u64;

/// What a blocking script call asked the engine to do before resuming it.
#[derive(Debug)]
pub enum BlockRequest {
    Wait(f32),
    WaitFrame,
    Message(String),
    Walk {
        target: Mover,
        direction: Direction,
        steps: u32,
    },
    Fade(FadeKind),
}

/// Registry entries released when a run completes.
#[derive(Debug, Default)]
pub struct ScriptCleanup {
    pub thread: Option<RegistryKey>,
    pub owner: Option<EntityKey>,
}

#[derive(Debug)]
struct ScriptRecord {
    label: String,
    owner: Option<EntityKey>,
    thread: Option<RegistryKey>,
    /// Suspended on an engine effect; resumed only after a wakeup.
    blocked: bool,
    woken: bool,
}

/// Bookkeeping for live script runs. The Lua state itself lives with the
/// host; this table is the only thing the rest of the engine sees.
#[derive(Debug, Default)]
pub struct ScriptRuntime {
    next_run: RunId,
    records: BTreeMap<RunId, ScriptRecord>,
    current_run: Option<RunId>,
    pending: Option<BlockRequest>,
    wakeups: Vec<RunId>,
}

impl ScriptRuntime {
    pub fn new() -> Self {
        ScriptRuntime {
            next_run: 1,
            ..ScriptRuntime::default()
        }
    }

    pub fn register(&mut self, label: String, owner: Option<EntityKey>) -> (RunId, String) {
        let run = self.next_run;
        self.next_run += 1;
        self.records.insert(
            run,
            ScriptRecord {
                label: label.clone(),
                owner,
                thread: None,
                blocked: false,
                woken: false,
            },
        );
        (run, format!("script.start {label} (#{run})"))
    }

    pub fn attach_thread(&mut self, run: RunId, key: RegistryKey) {
        if let Some(record) = self.records.get_mut(&run) {
            record.thread = Some(key);
        }
    }

    pub fn thread_key(&self, run: RunId) -> Option<&RegistryKey> {
        self.records.get(&run).and_then(|record| record.thread.as_ref())
    }

    pub fn active_count(&self) -> usize {
        self.records.len()
    }

    pub fn label(&self, run: RunId) -> Option<String> {
        self.records.get(&run).map(|record| record.label.clone())
    }

    /// Owner of the run whose thread is being resumed right now; bindings
    /// acting on "self" resolve through this.
    pub fn current_owner(&self) -> Option<EntityKey> {
        self.current_run
            .and_then(|run| self.records.get(&run))
            .and_then(|record| record.owner.clone())
    }

    pub fn begin_resume(&mut self, run: RunId) {
        self.current_run = Some(run);
        if let Some(record) = self.records.get_mut(&run) {
            record.woken = false;
            record.blocked = false;
        }
    }

    pub fn end_resume(&mut self) {
        self.current_run = None;
    }

    /// Record the blocking request of the currently resuming run. A second
    /// request before the yield overwrites the first; only the last call
    /// before suspension takes effect.
    pub fn set_pending(&mut self, request: BlockRequest) {
        if self.current_run.is_some() {
            self.pending = Some(request);
        }
    }

    pub fn take_pending(&mut self) -> Option<BlockRequest> {
        self.pending.take()
    }

    pub fn mark_blocked(&mut self, run: RunId) {
        if let Some(record) = self.records.get_mut(&run) {
            record.blocked = true;
        }
    }

    /// Queue a wakeup for a run. Ids of finished runs are dropped at drain
    /// time, so completions can never cross-resume a different run.
    pub fn wake(&mut self, run: RunId) {
        self.wakeups.push(run);
    }

    pub fn drain_wakeups(&mut self) {
        for run in std::mem::take(&mut self.wakeups) {
            if let Some(record) = self.records.get_mut(&run) {
                record.woken = true;
            }
        }
    }

    /// Runs that should be resumed this frame.
    pub fn runnable(&self) -> Vec<RunId> {
        self.records
            .iter()
            .filter(|(_, record)| !record.blocked || record.woken)
            .map(|(run, _)| *run)
            .collect()
    }

    pub fn complete(&mut self, run: RunId) -> (ScriptCleanup, Option<String>) {
        match self.records.remove(&run) {
            Some(record) => (
                ScriptCleanup {
                    thread: record.thread,
                    owner: record.owner,
                },
                Some(format!("script.complete {} (#{run})", record.label)),
            ),
            None => (ScriptCleanup::default(), None),
        }
    }
}
