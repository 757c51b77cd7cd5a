// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Stage/StageContext/StageController/StageInput data model (§3, §4.1).
//!
//! A [`Stage`] is a configurable audio processor with a setup hook, a
//! per-frame handle, an optional flush and an optional teardown. The
//! [`Pipeline`](../../saraudio_engine/pipeline/struct.Pipeline.html) in
//! `saraudio-engine` owns stage instances exclusively; a [`StageController`]
//! is a value descriptor that lets a new configuration reuse an existing
//! instance instead of tearing it down and recreating it.

use std::rc::Rc;

use crate::event_bus::{Event, EventBus, EventKind, Unsubscribe};
use crate::types::Frame;

/// Handed to a stage on setup/handle/flush/teardown. Wraps the pipeline's
/// shared event bus plus a couple of convenience primitives every stage in
/// this workspace needs: a monotonic clock and id minting.
pub struct StageContext {
    bus: Rc<EventBus>,
    clock: Rc<dyn Fn() -> u64>,
    id_factory: Rc<dyn Fn() -> String>,
}

impl StageContext {
    #[must_use]
    pub fn new(
        bus: Rc<EventBus>,
        clock: impl Fn() -> u64 + 'static,
        id_factory: impl Fn() -> String + 'static,
    ) -> Self {
        Self { bus, clock: Rc::new(clock), id_factory: Rc::new(id_factory) }
    }

    pub fn emit(&self, event: Event) {
        self.bus.emit(event);
    }

    pub fn on(&self, kind: EventKind, handler: impl FnMut(&Event) + 'static) -> Unsubscribe {
        self.bus.on(kind, handler)
    }

    #[must_use]
    pub fn now(&self) -> u64 {
        (self.clock)()
    }

    #[must_use]
    pub fn create_id(&self) -> String {
        (self.id_factory)()
    }

    /// A cheaply-cloneable handle to the shared bus, for stages that need to
    /// emit from inside a subscription callback registered during `setup`
    /// (e.g. the segmenter reacting to `vad` events).
    #[must_use]
    pub fn bus_handle(&self) -> Rc<EventBus> {
        Rc::clone(&self.bus)
    }

    /// A cheaply-cloneable handle to the id factory, for the same reason.
    #[must_use]
    pub fn id_factory_handle(&self) -> Rc<dyn Fn() -> String> {
        Rc::clone(&self.id_factory)
    }

    /// A cheaply-cloneable handle to the monotonic clock, for the same
    /// reason.
    #[must_use]
    pub fn clock_handle(&self) -> Rc<dyn Fn() -> u64> {
        Rc::clone(&self.clock)
    }
}

/// A configurable audio processor inserted into a `Pipeline`.
pub trait Stage {
    fn setup(&mut self, ctx: &StageContext);
    fn handle(&mut self, frame: &Frame, ctx: &StageContext);
    fn flush(&mut self, _ctx: &StageContext) {}
    fn teardown(&mut self, _ctx: &StageContext) {}
}

/// Identity + factory descriptor around a `Stage`, enabling hot reconfigure
/// without losing the underlying instance across a matching `configure`.
pub struct StageController {
    pub id: String,
    pub key: Option<String>,
    pub metadata: Option<serde_json::Value>,
    create: Box<dyn Fn() -> Box<dyn Stage>>,
    configure: Option<Box<dyn Fn(&mut dyn Stage)>>,
    is_equal: Option<Box<dyn Fn(&StageController) -> bool>>,
}

impl StageController {
    #[must_use]
    pub fn new(id: impl Into<String>, create: impl Fn() -> Box<dyn Stage> + 'static) -> Self {
        Self {
            id: id.into(),
            key: None,
            metadata: None,
            create: Box::new(create),
            configure: None,
            is_equal: None,
        }
    }

    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    #[must_use]
    pub fn with_configure(mut self, configure: impl Fn(&mut dyn Stage) + 'static) -> Self {
        self.configure = Some(Box::new(configure));
        self
    }

    #[must_use]
    pub fn with_is_equal(mut self, is_equal: impl Fn(&StageController) -> bool + 'static) -> Self {
        self.is_equal = Some(Box::new(is_equal));
        self
    }

    #[must_use]
    pub fn create(&self) -> Box<dyn Stage> {
        (self.create)()
    }

    pub fn configure_existing(&self, stage: &mut dyn Stage) {
        if let Some(configure) = &self.configure {
            configure(stage);
        }
    }
}

/// The four-way match rule from §3: a previous controller and a new
/// controller describe the same logical stage when (a) they are the same
/// instance, (b) ids match and both keys are present and equal, (c) ids
/// match and either side's `is_equal` says so, or (d) ids match, neither has
/// a key, and metadata is identical.
#[must_use]
pub fn controllers_match(prev: &Rc<StageController>, next: &Rc<StageController>) -> bool {
    if Rc::ptr_eq(prev, next) {
        return true;
    }
    if prev.id != next.id {
        return false;
    }
    if let (Some(pk), Some(nk)) = (&prev.key, &next.key) {
        if pk == nk {
            return true;
        }
    }
    if let Some(is_equal) = &prev.is_equal {
        if is_equal(next) {
            return true;
        }
    }
    if let Some(is_equal) = &next.is_equal {
        if is_equal(prev) {
            return true;
        }
    }
    prev.key.is_none() && next.key.is_none() && prev.metadata == next.metadata
}

/// A tagged variant distinguishing a raw, already-constructed `Stage` from a
/// `StageController` descriptor, per the design note in §9.
pub enum StageInput {
    Raw(Box<dyn Stage>),
    Controlled(Rc<StageController>),
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopStage;
    impl Stage for NoopStage {
        fn setup(&mut self, _ctx: &StageContext) {}
        fn handle(&mut self, _frame: &Frame, _ctx: &StageContext) {}
    }

    fn make_controller(id: &str) -> Rc<StageController> {
        Rc::new(StageController::new(id.to_string(), || Box::new(NoopStage)))
    }

    #[test]
    fn same_instance_matches() {
        let c = make_controller("a");
        assert!(controllers_match(&c, &c));
    }

    #[test]
    fn matching_keys_match() {
        let a = Rc::new(make_controller_with_key("a", "k1"));
        let b = Rc::new(make_controller_with_key("a", "k1"));
        assert!(controllers_match(&a, &b));
    }

    #[test]
    fn mismatched_keys_do_not_match() {
        let a = Rc::new(make_controller_with_key("a", "k1"));
        let b = Rc::new(make_controller_with_key("a", "k2"));
        assert!(!controllers_match(&a, &b));
    }

    #[test]
    fn mismatched_keys_still_match_via_is_equal() {
        let a = Rc::new(make_controller_with_key("a", "k1"));
        let b = Rc::new(
            StageController::new("a".to_string(), || Box::new(NoopStage) as Box<dyn Stage>)
                .with_key("k2".to_string())
                .with_is_equal(|_| true),
        );
        assert!(controllers_match(&a, &b), "rule (c) must win over a key mismatch");
    }

    #[test]
    fn different_ids_never_match() {
        let a = make_controller("a");
        let b = make_controller("b");
        assert!(!controllers_match(&a, &b));
    }

    #[test]
    fn no_key_but_identical_metadata_matches() {
        let a = Rc::new(
            StageController::new("a".to_string(), || Box::new(NoopStage) as Box<dyn Stage>)
                .with_metadata(serde_json::json!({"gain": 1.0})),
        );
        let b = Rc::new(
            StageController::new("a".to_string(), || Box::new(NoopStage) as Box<dyn Stage>)
                .with_metadata(serde_json::json!({"gain": 1.0})),
        );
        assert!(controllers_match(&a, &b));
    }

    fn make_controller_with_key(id: &str, key: &str) -> StageController {
        StageController::new(id.to_string(), || Box::new(NoopStage)).with_key(key.to_string())
    }
}
