use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use serde::Serialize;

/// Completion handle returned by presentation calls.
pub type Ticket = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FadeKind {
    Out,
    In,
}

impl FadeKind {
    pub fn label(self) -> &'static str {
        match self {
            FadeKind::Out => "out",
            FadeKind::In => "in",
        }
    }
}

/// Fire-and-report-completion presentation surface: message window, screen
/// fade, audio cue. The scripted layer polls the returned ticket and never
/// inspects how anything renders.
pub trait Presenter {
    fn show_message(&self, text: &str) -> Ticket;
    fn begin_fade(&self, kind: FadeKind) -> Ticket;
    fn play_cue(&self, cue: &str);
    /// True once the ticket's effect has finished (message dismissed, fade
    /// done). Unknown tickets count as finished.
    fn poll(&self, ticket: Ticket) -> bool;
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PresentationEvent {
    Message { ticket: Ticket, text: String },
    Fade { ticket: Ticket, direction: String },
    Cue { cue: String },
}

/// Headless presenter: records every call and completes each ticket after a
/// fixed number of polls, standing in for a player reading and dismissing.
#[derive(Clone)]
pub struct RecordingPresenter {
    events: Rc<RefCell<Vec<PresentationEvent>>>,
    pending: Rc<RefCell<BTreeMap<Ticket, u32>>>,
    next_ticket: Rc<RefCell<Ticket>>,
    latency: u32,
}

impl RecordingPresenter {
    pub fn new(latency: u32) -> Self {
        RecordingPresenter {
            events: Rc::new(RefCell::new(Vec::new())),
            pending: Rc::new(RefCell::new(BTreeMap::new())),
            next_ticket: Rc::new(RefCell::new(1)),
            latency,
        }
    }

    pub fn events(&self) -> Vec<PresentationEvent> {
        self.events.borrow().clone()
    }

    fn issue(&self) -> Ticket {
        let mut next = self.next_ticket.borrow_mut();
        let ticket = *next;
        *next += 1;
        self.pending.borrow_mut().insert(ticket, self.latency);
        ticket
    }
}

impl Presenter for RecordingPresenter {
    fn show_message(&self, text: &str) -> Ticket {
        let ticket = self.issue();
        self.events.borrow_mut().push(PresentationEvent::Message {
            ticket,
            text: text.to_string(),
        });
        ticket
    }

    fn begin_fade(&self, kind: FadeKind) -> Ticket {
        let ticket = self.issue();
        self.events.borrow_mut().push(PresentationEvent::Fade {
            ticket,
            direction: kind.label().to_string(),
        });
        ticket
    }

    fn play_cue(&self, cue: &str) {
        self.events.borrow_mut().push(PresentationEvent::Cue {
            cue: cue.to_string(),
        });
    }

    fn poll(&self, ticket: Ticket) -> bool {
        let mut pending = self.pending.borrow_mut();
        match pending.get_mut(&ticket) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                false
            }
            Some(_) => {
                pending.remove(&ticket);
                true
            }
            None => true,
        }
    }
}
