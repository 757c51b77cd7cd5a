// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Typed publish/subscribe event bus (C1).
//!
//! Owned by a [`crate::pipeline`]-style component and shared between stages.
//! Emission is synchronous and single-threaded: every handler subscribed to
//! an event runs to completion before `emit` returns. Subscriber sets are
//! iterated from a snapshot so a handler may unsubscribe itself or another
//! handler mid-dispatch without borrow-mutation hazards.
//!
//! The defined core event set mirrors §4.1: `vad`, `speechStart`,
//! `speechEnd`, `segment`, `meter`, `error`. The bus itself does not know
//! anything beyond that enumeration — stages only ever emit/subscribe to
//! these six kinds.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use crate::error::SaraudioError;
use crate::types::{Segment, VADScore};

/// Discriminant used to key subscriptions, independent of the event payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Vad,
    SpeechStart,
    SpeechEnd,
    Segment,
    Meter,
    Error,
}

/// A value published on the bus.
#[derive(Debug, Clone)]
pub enum Event {
    Vad(VADScore),
    SpeechStart { ts_ms: u64 },
    SpeechEnd { ts_ms: u64 },
    Segment(Segment),
    Meter { ts_ms: u64, level: f32 },
    Error(SaraudioError),
}

impl Event {
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Vad(_) => EventKind::Vad,
            Self::SpeechStart { .. } => EventKind::SpeechStart,
            Self::SpeechEnd { .. } => EventKind::SpeechEnd,
            Self::Segment(_) => EventKind::Segment,
            Self::Meter { .. } => EventKind::Meter,
            Self::Error(_) => EventKind::Error,
        }
    }
}

type Handler = Rc<RefCell<dyn FnMut(&Event)>>;

/// Process-local (single-threaded) event bus.
pub struct EventBus {
    next_id: Cell<u64>,
    handlers: RefCell<HashMap<EventKind, Vec<(u64, Handler)>>>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Rc<Self> {
        Rc::new(Self { next_id: Cell::new(0), handlers: RefCell::new(HashMap::new()) })
    }

    /// Subscribes `handler` to `kind`, returning a token that detaches it.
    pub fn on(
        self: &Rc<Self>,
        kind: EventKind,
        handler: impl FnMut(&Event) + 'static,
    ) -> Unsubscribe {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.handlers
            .borrow_mut()
            .entry(kind)
            .or_default()
            .push((id, Rc::new(RefCell::new(handler))));
        Unsubscribe { bus: Rc::downgrade(self), kind, id }
    }

    /// Publishes `event` to every current subscriber of its kind, in
    /// subscription order, from a snapshot taken before dispatch begins.
    pub fn emit(self: &Rc<Self>, event: Event) {
        let kind = event.kind();
        let snapshot: Vec<Handler> = self
            .handlers
            .borrow()
            .get(&kind)
            .map(|subs| subs.iter().map(|(_, h)| Rc::clone(h)).collect())
            .unwrap_or_default();
        for handler in snapshot {
            handler.borrow_mut()(&event);
        }
    }

    fn remove(&self, kind: EventKind, id: u64) {
        if let Some(subs) = self.handlers.borrow_mut().get_mut(&kind) {
            subs.retain(|(sub_id, _)| *sub_id != id);
        }
    }

    /// Number of live subscriptions across all kinds. Exposed for tests and
    /// for the controller's single-subscription invariant (§8.9).
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.handlers.borrow().values().map(Vec::len).sum()
    }
}

/// Detaches a handler registered via [`EventBus::on`] when dropped explicitly
/// invoked, or left to live for the subscription's lifetime if held.
pub struct Unsubscribe {
    bus: Weak<EventBus>,
    kind: EventKind,
    id: u64,
}

impl Unsubscribe {
    pub fn unsubscribe(self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.kind, self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;

    #[test]
    fn emit_runs_handlers_in_subscription_order() {
        let bus = EventBus::new();
        let order = Rc::new(StdRefCell::new(Vec::new()));

        let o1 = Rc::clone(&order);
        bus.on(EventKind::Vad, move |_| o1.borrow_mut().push(1));
        let o2 = Rc::clone(&order);
        bus.on(EventKind::Vad, move |_| o2.borrow_mut().push(2));

        bus.emit(Event::Vad(VADScore { ts_ms: 0, score: 1.0, speech: true }));
        assert_eq!(*order.borrow(), vec![1, 2]);
    }

    #[test]
    fn unsubscribe_detaches_handler() {
        let bus = EventBus::new();
        let count = Rc::new(Cell::new(0));
        let c = Rc::clone(&count);
        let sub = bus.on(EventKind::Error, move |_| c.set(c.get() + 1));
        bus.emit(Event::Error(SaraudioError::Aborted));
        sub.unsubscribe();
        bus.emit(Event::Error(SaraudioError::Aborted));
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn handler_may_unsubscribe_itself_mid_dispatch() {
        let bus = EventBus::new();
        let sub_cell: Rc<RefCell<Option<Unsubscribe>>> = Rc::new(RefCell::new(None));
        let sub_cell_inner = Rc::clone(&sub_cell);
        let fired = Rc::new(Cell::new(0));
        let fired_inner = Rc::clone(&fired);
        let sub = bus.on(EventKind::Meter, move |_| {
            fired_inner.set(fired_inner.get() + 1);
            if let Some(s) = sub_cell_inner.borrow_mut().take() {
                s.unsubscribe();
            }
        });
        *sub_cell.borrow_mut() = Some(sub);
        bus.emit(Event::Meter { ts_ms: 0, level: 0.1 });
        bus.emit(Event::Meter { ts_ms: 1, level: 0.2 });
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn subscriber_count_reflects_live_subscriptions() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        let sub = bus.on(EventKind::SpeechStart, |_| {});
        assert_eq!(bus.subscriber_count(), 1);
        sub.unsubscribe();
        assert_eq!(bus.subscriber_count(), 0);
    }
}
