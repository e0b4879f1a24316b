use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use anyhow::Result;

use crate::context::GameContext;
use crate::script::RunId;

pub type RoutineHandle = u32;

/// The closed set of suspension conditions a routine can yield.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Wait {
    /// Resume on the next frame tick.
    NextFrame,
    /// Resume after this many further frames.
    Frames(u32),
    /// Resume once this much simulated time has elapsed.
    Seconds(f32),
    /// Resume once the given routine has finished.
    Routine(RoutineHandle),
}

/// What a stepper call produced: the next suspension, or exhaustion.
pub enum Step {
    Yield(Wait),
    Done,
}

/// One segment of a suspendable routine. Each call runs to the routine's
/// next suspension point; an `Err` terminates the routine alone.
pub type Stepper = Box<dyn FnMut(&mut GameContext) -> Result<Step>>;

struct RoutineRecord {
    label: String,
    stepper: Stepper,
    wait: Option<Wait>,
    notify: Option<RunId>,
}

/// Handle-keyed registry of suspended routines. Advancement happens through
/// the free functions below, which take records out of the registry while
/// their steppers run so the steppers can borrow the context freely.
#[derive(Default)]
pub struct CoroutineRuntime {
    next_handle: RoutineHandle,
    records: BTreeMap<RoutineHandle, RoutineRecord>,
    taken: BTreeSet<RoutineHandle>,
}

impl CoroutineRuntime {
    pub fn new() -> Self {
        CoroutineRuntime {
            next_handle: 1,
            records: BTreeMap::new(),
            taken: BTreeSet::new(),
        }
    }

    pub fn is_running(&self, handle: RoutineHandle) -> bool {
        self.records.contains_key(&handle) || self.taken.contains(&handle)
    }

    pub fn active_handles(&self) -> Vec<RoutineHandle> {
        self.records.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len() + self.taken.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn register(&mut self, label: String, notify: Option<RunId>, stepper: Stepper) -> RoutineHandle {
        let handle = self.next_handle;
        self.next_handle = self.next_handle.wrapping_add(1);
        self.records.insert(
            handle,
            RoutineRecord {
                label,
                stepper,
                wait: None,
                notify,
            },
        );
        handle
    }

    /// Evaluate the routine's wait condition for this frame. True means the
    /// routine should resume now.
    fn advance_wait(&mut self, handle: RoutineHandle, delta: f32) -> bool {
        let waiting_on = match self.records.get(&handle) {
            Some(record) => record.wait,
            None => return false,
        };
        match waiting_on {
            None | Some(Wait::NextFrame) => true,
            Some(Wait::Frames(frames)) => {
                if frames <= 1 {
                    true
                } else {
                    if let Some(record) = self.records.get_mut(&handle) {
                        record.wait = Some(Wait::Frames(frames - 1));
                    }
                    false
                }
            }
            Some(Wait::Seconds(remaining)) => {
                let left = remaining - delta;
                if left <= 0.0 {
                    true
                } else {
                    if let Some(record) = self.records.get_mut(&handle) {
                        record.wait = Some(Wait::Seconds(left));
                    }
                    false
                }
            }
            Some(Wait::Routine(other)) => !self.is_running(other),
        }
    }

    fn take(&mut self, handle: RoutineHandle) -> Option<RoutineRecord> {
        let record = self.records.remove(&handle)?;
        self.taken.insert(handle);
        Some(record)
    }

    fn restore(&mut self, handle: RoutineHandle, record: RoutineRecord) {
        self.taken.remove(&handle);
        self.records.insert(handle, record);
    }

    fn finish(&mut self, handle: RoutineHandle) {
        self.taken.remove(&handle);
        self.records.remove(&handle);
    }
}

/// Register a routine and run it immediately to its first suspension point.
/// Returns a handle other routines can wait on via `Wait::Routine`.
pub fn start_routine(
    context: &Rc<RefCell<GameContext>>,
    label: impl Into<String>,
    notify: Option<RunId>,
    stepper: Stepper,
) -> RoutineHandle {
    let label = label.into();
    let handle = {
        let mut ctx = context.borrow_mut();
        let handle = ctx.routines.register(label.clone(), notify, stepper);
        ctx.log_event(format!("routine.start {label} (#{handle})"));
        handle
    };
    advance_routine(context, handle);
    handle
}

/// Per-frame update: poll every wait condition once and resume the routines
/// whose condition passed. Independent routines have no relative ordering
/// guarantee beyond the handle order used here.
pub fn update_routines(context: &Rc<RefCell<GameContext>>) {
    let (handles, delta) = {
        let ctx = context.borrow();
        (ctx.routines.active_handles(), ctx.frame_delta)
    };
    for handle in handles {
        let ready = context.borrow_mut().routines.advance_wait(handle, delta);
        if ready {
            advance_routine(context, handle);
        }
    }
}

fn advance_routine(context: &Rc<RefCell<GameContext>>, handle: RoutineHandle) {
    let Some(mut record) = context.borrow_mut().routines.take(handle) else {
        return;
    };
    let step = (record.stepper)(&mut context.borrow_mut());
    let mut ctx = context.borrow_mut();
    match step {
        Ok(Step::Yield(wait)) => {
            record.wait = Some(wait);
            ctx.routines.restore(handle, record);
        }
        Ok(Step::Done) => {
            ctx.routines.finish(handle);
            ctx.log_event(format!("routine.complete {} (#{handle})", record.label));
            if let Some(run) = record.notify {
                ctx.wake_script(run);
            }
        }
        Err(err) => {
            ctx.routines.finish(handle);
            ctx.log_event(format!("routine.error {}: {err}", record.label));
            if let Some(run) = record.notify {
                ctx.wake_script(run);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::bare_context;
    use anyhow::bail;

    fn log_of(context: &Rc<RefCell<GameContext>>) -> Vec<String> {
        context.borrow().events().to_vec()
    }

    #[test]
    fn start_runs_to_the_first_suspension_immediately() {
        let context = bare_context();
        let mut trace = Vec::new();
        let probe = Rc::new(RefCell::new(Vec::new()));
        let probe_inner = probe.clone();
        let mut stage = 0;
        start_routine(
            &context,
            "probe",
            None,
            Box::new(move |_| {
                stage += 1;
                probe_inner.borrow_mut().push(stage);
                if stage == 1 {
                    Ok(Step::Yield(Wait::NextFrame))
                } else {
                    Ok(Step::Done)
                }
            }),
        );
        trace.extend(probe.borrow().iter().copied());
        assert_eq!(trace, vec![1], "first segment ran before any update");
        assert_eq!(context.borrow().routines.len(), 1);

        update_routines(&context);
        assert_eq!(*probe.borrow(), vec![1, 2]);
        assert!(context.borrow().routines.is_empty());
    }

    #[test]
    fn timed_wait_counts_simulated_seconds() {
        let context = bare_context();
        context.borrow_mut().frame_delta = 0.1;
        let done = Rc::new(RefCell::new(false));
        let done_inner = done.clone();
        let mut yielded = false;
        start_routine(
            &context,
            "timer",
            None,
            Box::new(move |_| {
                if !yielded {
                    yielded = true;
                    Ok(Step::Yield(Wait::Seconds(0.25)))
                } else {
                    *done_inner.borrow_mut() = true;
                    Ok(Step::Done)
                }
            }),
        );

        update_routines(&context);
        update_routines(&context);
        assert!(!*done.borrow(), "0.2s elapsed of 0.25");
        update_routines(&context);
        assert!(*done.borrow());
    }

    #[test]
    fn waiting_on_another_routine_orders_completion() {
        let context = bare_context();
        let order = Rc::new(RefCell::new(Vec::new()));

        let order_a = order.clone();
        let mut ticks = 0;
        let slow = start_routine(
            &context,
            "slow",
            None,
            Box::new(move |_| {
                ticks += 1;
                if ticks < 3 {
                    Ok(Step::Yield(Wait::NextFrame))
                } else {
                    order_a.borrow_mut().push("slow");
                    Ok(Step::Done)
                }
            }),
        );

        let order_b = order.clone();
        let mut yielded = false;
        start_routine(
            &context,
            "waiter",
            None,
            Box::new(move |_| {
                if !yielded {
                    yielded = true;
                    Ok(Step::Yield(Wait::Routine(slow)))
                } else {
                    order_b.borrow_mut().push("waiter");
                    Ok(Step::Done)
                }
            }),
        );

        for _ in 0..5 {
            update_routines(&context);
        }
        assert_eq!(*order.borrow(), vec!["slow", "waiter"]);
    }

    #[test]
    fn a_fault_terminates_only_the_faulting_routine() {
        let context = bare_context();
        let survivor_ran = Rc::new(RefCell::new(false));

        let mut yielded = false;
        start_routine(
            &context,
            "doomed",
            None,
            Box::new(move |_| {
                if !yielded {
                    yielded = true;
                    Ok(Step::Yield(Wait::NextFrame))
                } else {
                    bail!("boom")
                }
            }),
        );
        let survivor = survivor_ran.clone();
        let mut survivor_yielded = false;
        start_routine(
            &context,
            "survivor",
            None,
            Box::new(move |_| {
                if !survivor_yielded {
                    survivor_yielded = true;
                    Ok(Step::Yield(Wait::Frames(2)))
                } else {
                    *survivor.borrow_mut() = true;
                    Ok(Step::Done)
                }
            }),
        );

        update_routines(&context);
        update_routines(&context);
        assert!(*survivor_ran.borrow(), "survivor kept running");
        assert!(context.borrow().routines.is_empty());
        assert!(
            log_of(&context)
                .iter()
                .any(|event| event.starts_with("routine.error doomed")),
            "fault was logged"
        );
    }
}
