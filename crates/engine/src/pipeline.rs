// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Pipeline (C4): owns the ordered list of stages, dispatches each admitted
//! frame to every stage in order, owns the event bus shared between stages,
//! and supports hot reconfiguration without losing frames.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::rc::Rc;

use saraudio_core::constants::PRE_READY_QUEUE_CAPACITY;
use saraudio_core::types::Frame;
use saraudio_core::{EventBus, Stage, StageContext, StageController, StageInput};

struct Record {
    controller: Option<Rc<StageController>>,
    stage: Box<dyn Stage>,
}

/// Staged, event-emitting frame router with hot reconfiguration.
///
/// Single-threaded and synchronous per §5: `push`/`configure`/`flush` never
/// suspend. A `Pipeline`'s records are not `Send`/`Sync` since `Stage`
/// trait objects capture `Rc`-based shared state (the event bus).
pub struct Pipeline {
    bus: Rc<EventBus>,
    ctx: StageContext,
    records: Vec<Record>,
    pre_ready: VecDeque<Frame>,
}

impl Pipeline {
    /// Builds a pipeline whose stage context uses `clock` for `StageContext::now`
    /// and `id_factory` for `StageContext::create_id`.
    #[must_use]
    pub fn new(
        clock: impl Fn() -> u64 + 'static,
        id_factory: impl Fn() -> String + 'static,
    ) -> Self {
        let bus = EventBus::new();
        let ctx = StageContext::new(Rc::clone(&bus), clock, id_factory);
        Self { bus, ctx, records: Vec::new(), pre_ready: VecDeque::new() }
    }

    #[must_use]
    pub fn event_bus(&self) -> &Rc<EventBus> {
        &self.bus
    }

    /// Admits a frame. If no stages are configured yet, the frame is
    /// buffered in a bounded pre-ready queue (cap 64); overflow silently
    /// drops the newest frame (§4.1, §9 open question — the source's
    /// drop-newest behavior is preserved here, not flipped to drop-oldest).
    /// Otherwise every stage is called, in declared order, never suspending.
    pub fn push(&mut self, frame: Frame) {
        if self.records.is_empty() {
            if self.pre_ready.len() < PRE_READY_QUEUE_CAPACITY {
                self.pre_ready.push_back(frame);
            } else {
                tracing::warn!("pre-ready queue full, dropping newest frame");
            }
            return;
        }
        for record in &mut self.records {
            record.stage.handle(&frame, &self.ctx);
        }
    }

    /// Performs a positional diff against the previous stage list, reusing
    /// instances whose controller "matches" (§3) the prior slot's
    /// controller, tearing down and recreating everything else, tearing
    /// down trailing records the new list does not cover, then replaying
    /// the pre-ready queue in admission order.
    pub fn configure(&mut self, stages: Vec<StageInput>) {
        let mut previous: Vec<Option<Record>> = self.records.drain(..).map(Some).collect();
        let mut new_records = Vec::with_capacity(stages.len());

        for (i, input) in stages.into_iter().enumerate() {
            let prev_slot = previous.get_mut(i).and_then(Option::take);
            let record = match (input, prev_slot) {
                (StageInput::Controlled(controller), Some(prev))
                    if prev
                        .controller
                        .as_ref()
                        .is_some_and(|pc| saraudio_core::controllers_match(pc, &controller)) =>
                {
                    controller.configure_existing(prev.stage.as_mut());
                    Record { controller: Some(controller), stage: prev.stage }
                }
                (StageInput::Controlled(controller), prev_slot) => {
                    if let Some(prev) = prev_slot {
                        teardown(prev.stage.as_mut(), &self.ctx);
                    }
                    let mut stage = controller.create();
                    stage.setup(&self.ctx);
                    Record { controller: Some(controller), stage }
                }
                (StageInput::Raw(mut stage), prev_slot) => {
                    if let Some(prev) = prev_slot {
                        teardown(prev.stage.as_mut(), &self.ctx);
                    }
                    stage.setup(&self.ctx);
                    Record { controller: None, stage }
                }
            };
            new_records.push(record);
        }

        // Tear down any trailing previous records the new list does not cover.
        for prev in previous.into_iter().flatten() {
            let mut prev = prev;
            teardown(prev.stage.as_mut(), &self.ctx);
        }

        self.records = new_records;

        let pending: Vec<Frame> = self.pre_ready.drain(..).collect();
        for frame in pending {
            self.push(frame);
        }
    }

    /// Invokes `flush` on every current stage, in order.
    pub fn flush(&mut self) {
        for record in &mut self.records {
            record.stage.flush(&self.ctx);
        }
    }

    /// Tears down every stage and clears the list.
    pub fn dispose(&mut self) {
        for record in &mut self.records {
            teardown(record.stage.as_mut(), &self.ctx);
        }
        self.records.clear();
    }

    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn pre_ready_len(&self) -> usize {
        self.pre_ready.len()
    }
}

/// Best-effort teardown: a panic is caught and logged at `warn`, never
/// propagated, matching §4.1's "exceptions in teardown are logged via the
/// warn hook but never propagate".
fn teardown(stage: &mut dyn Stage, ctx: &StageContext) {
    let result = std::panic::catch_unwind(AssertUnwindSafe(|| stage.teardown(ctx)));
    if let Err(panic) = result {
        let msg = panic
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        tracing::warn!(error = %msg, "stage teardown panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use saraudio_core::types::Samples;
    use std::cell::RefCell;
    use std::sync::Arc;

    struct RecordingStage {
        log: Rc<RefCell<Vec<&'static str>>>,
        ts_log: Rc<RefCell<Vec<u64>>>,
    }

    impl Stage for RecordingStage {
        fn setup(&mut self, _ctx: &StageContext) {
            self.log.borrow_mut().push("setup");
        }
        fn handle(&mut self, frame: &Frame, _ctx: &StageContext) {
            self.ts_log.borrow_mut().push(frame.ts_ms);
        }
        fn teardown(&mut self, _ctx: &StageContext) {
            self.log.borrow_mut().push("teardown");
        }
    }

    fn frame(ts_ms: u64) -> Frame {
        Frame::new(Samples::I16(Arc::new(vec![0])), ts_ms, 16000, 1)
    }

    fn test_pipeline() -> Pipeline {
        let counter = Rc::new(RefCell::new(0u64));
        Pipeline::new(
            || 0,
            move || {
                let mut c = counter.borrow_mut();
                *c += 1;
                format!("id-{c}")
            },
        )
    }

    #[test]
    fn scenario_s1_pre_ready_replay() {
        let mut pipeline = test_pipeline();
        pipeline.push(frame(0));
        pipeline.push(frame(5));

        let ts_log = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::new(RefCell::new(Vec::new()));
        let stage: Box<dyn Stage> =
            Box::new(RecordingStage { log: Rc::clone(&log), ts_log: Rc::clone(&ts_log) });
        pipeline.configure(vec![StageInput::Raw(stage)]);

        assert_eq!(*ts_log.borrow(), vec![0, 5]);
    }

    #[test]
    fn invariant_3_pre_ready_cap_drops_newest() {
        let mut pipeline = test_pipeline();
        for i in 0..(PRE_READY_QUEUE_CAPACITY as u64 + 10) {
            pipeline.push(frame(i));
        }
        assert_eq!(pipeline.pre_ready_len(), PRE_READY_QUEUE_CAPACITY);
    }

    fn controller_with_configs(
        id: &str,
        key: Option<&str>,
        log: Rc<RefCell<Vec<&'static str>>>,
        ts_log: Rc<RefCell<Vec<u64>>>,
        configure_count: Rc<RefCell<u32>>,
    ) -> StageController {
        let id_owned = id.to_string();
        let log_for_create = Rc::clone(&log);
        let ts_log_for_create = Rc::clone(&ts_log);
        let mut controller = StageController::new(id_owned, move || {
            Box::new(RecordingStage {
                log: Rc::clone(&log_for_create),
                ts_log: Rc::clone(&ts_log_for_create),
            }) as Box<dyn Stage>
        });
        if let Some(k) = key {
            controller = controller.with_key(k.to_string());
        }
        controller = controller.with_configure(move |_stage| {
            *configure_count.borrow_mut() += 1;
        });
        controller
    }

    #[test]
    fn invariant_1_matching_controller_reuses_instance() {
        let mut pipeline = test_pipeline();
        let log = Rc::new(RefCell::new(Vec::new()));
        let ts_log = Rc::new(RefCell::new(Vec::new()));
        let configure_count = Rc::new(RefCell::new(0u32));

        let c1 = controller_with_configs(
            "a",
            Some("k1"),
            Rc::clone(&log),
            Rc::clone(&ts_log),
            Rc::clone(&configure_count),
        );
        pipeline.configure(vec![StageInput::Controlled(Rc::new(c1))]);
        assert_eq!(*log.borrow(), vec!["setup"]);

        let c2 = controller_with_configs(
            "a",
            Some("k1"),
            Rc::clone(&log),
            Rc::clone(&ts_log),
            Rc::clone(&configure_count),
        );
        pipeline.configure(vec![StageInput::Controlled(Rc::new(c2))]);

        assert_eq!(*log.borrow(), vec!["setup"], "no new setup/teardown on a matching reconfigure");
        assert_eq!(*configure_count.borrow(), 1, "configure called exactly once per configure() call");
    }

    #[test]
    fn invariant_2_mismatched_controller_tears_down_and_recreates() {
        let mut pipeline = test_pipeline();
        let log = Rc::new(RefCell::new(Vec::new()));
        let ts_log = Rc::new(RefCell::new(Vec::new()));
        let configure_count = Rc::new(RefCell::new(0u32));

        let c1 = controller_with_configs(
            "a",
            Some("k1"),
            Rc::clone(&log),
            Rc::clone(&ts_log),
            Rc::clone(&configure_count),
        );
        pipeline.configure(vec![StageInput::Controlled(Rc::new(c1))]);

        let c2 = controller_with_configs(
            "a",
            Some("k2"),
            Rc::clone(&log),
            Rc::clone(&ts_log),
            Rc::clone(&configure_count),
        );
        pipeline.configure(vec![StageInput::Controlled(Rc::new(c2))]);

        assert_eq!(*log.borrow(), vec!["setup", "teardown", "setup"]);
    }

    #[test]
    fn trailing_previous_records_are_torn_down() {
        let mut pipeline = test_pipeline();
        let log = Rc::new(RefCell::new(Vec::new()));
        let ts_log = Rc::new(RefCell::new(Vec::new()));
        let configure_count = Rc::new(RefCell::new(0u32));

        let a = controller_with_configs(
            "a",
            None,
            Rc::clone(&log),
            Rc::clone(&ts_log),
            Rc::clone(&configure_count),
        );
        let b = controller_with_configs(
            "b",
            None,
            Rc::clone(&log),
            Rc::clone(&ts_log),
            Rc::clone(&configure_count),
        );
        pipeline.configure(vec![
            StageInput::Controlled(Rc::new(a)),
            StageInput::Controlled(Rc::new(b)),
        ]);
        assert_eq!(pipeline.stage_count(), 2);

        let a2 = controller_with_configs(
            "a",
            None,
            Rc::clone(&log),
            Rc::clone(&ts_log),
            Rc::clone(&configure_count),
        );
        pipeline.configure(vec![StageInput::Controlled(Rc::new(a2))]);
        assert_eq!(pipeline.stage_count(), 1);
    }
}
