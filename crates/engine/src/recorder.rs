// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Recorder façade (C7): owns a [`Pipeline`] and a recording assembler,
//! fans each inbound capture frame out to raw/speech/normalized subscribers
//! in the declared order, and exposes the cleaned/full/masked recordings.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use saraudio_core::constants::LATE_SUBSCRIBER_BUFFER_FRAMES;
use saraudio_core::event_bus::{Event, EventKind};
use saraudio_core::types::{Frame, NormalizedFrame, PcmSnapshot, Segment};
use saraudio_core::{FrameSource, SaraudioError, Stage, StageController, StageInput};
use saraudio_nodes::assembler::AssemblerOptions;
use saraudio_nodes::normalizer::TargetFormat;
use saraudio_nodes::{Normalizer, RecordingAssembler, Segmenter, SegmenterConfig};

use crate::pipeline::Pipeline;

/// How the Recorder's built-in segmenter stage should be configured. A
/// custom controller opts out of the built-in [`Segmenter`] entirely —
/// the caller's stage is responsible for emitting `speechStart`/`speechEnd`/
/// `segment` in its place.
pub enum SegmenterInput {
    Enabled(SegmenterConfig),
    Disabled,
    Custom(Rc<StageController>),
}

enum ActiveSegmenter {
    Builtin(SegmenterConfig),
    Disabled,
    Custom(Rc<StageController>),
}

/// Options accepted by [`Recorder::configure`] (full replace) and
/// [`Recorder::update`] (merge — an absent field means "leave unchanged").
///
/// `stages` always describes the *complete* custom stage list for the call
/// that supplies it; a raw one-shot stage in that list is not retained past
/// that call. A `StageController`-wrapped stage is cheaply re-suppliable by
/// the caller since controllers are `Rc`-cloneable, but the Recorder itself
/// does not retain a previous call's `stages` — see `DESIGN.md` for why this
/// is a deliberate simplification rather than an oversight.
#[derive(Default)]
pub struct RecorderOptions {
    pub stages: Option<Vec<StageInput>>,
    pub segmenter: Option<SegmenterInput>,
    pub target_format: Option<TargetFormat>,
    pub produce: Option<AssemblerOptions>,
}

struct Hub<T> {
    next_id: Cell<u64>,
    handlers: RefCell<Vec<(u64, Rc<RefCell<dyn FnMut(&T)>>)>>,
}

impl<T> Hub<T> {
    fn new() -> Self {
        Self { next_id: Cell::new(0), handlers: RefCell::new(Vec::new()) }
    }

    fn subscribe(&self, handler: impl FnMut(&T) + 'static) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.handlers.borrow_mut().push((id, Rc::new(RefCell::new(handler))));
        id
    }

    fn unsubscribe(&self, id: u64) {
        self.handlers.borrow_mut().retain(|(hid, _)| *hid != id);
    }

    fn notify(&self, value: &T) {
        let snapshot: Vec<_> = self.handlers.borrow().iter().map(|(_, h)| Rc::clone(h)).collect();
        for handler in snapshot {
            handler.borrow_mut()(value);
        }
    }

    fn len(&self) -> usize {
        self.handlers.borrow().len()
    }
}

/// Owns a [`Pipeline`] + a [`RecordingAssembler`], fans raw capture frames
/// out per §4.4's nine-step per-frame order, and exposes the cleaned/full/
/// masked recordings as WAV-ready snapshots.
pub struct Recorder {
    pipeline: Pipeline,
    assembler: Rc<RefCell<RecordingAssembler>>,
    segment_active: Rc<Cell<bool>>,
    normalizer: Option<Normalizer>,
    active_segmenter: ActiveSegmenter,
    raw_subs: Hub<Frame>,
    speech_subs: Hub<Frame>,
    normalized_subs: Hub<NormalizedFrame>,
    late_buffer: VecDeque<NormalizedFrame>,
    ready_fired: bool,
    ready_handlers: Vec<Box<dyn FnOnce()>>,
    active: bool,
    disposed: bool,
}

impl Recorder {
    #[must_use]
    pub fn new(clock: impl Fn() -> u64 + 'static, id_factory: impl Fn() -> String + 'static) -> Self {
        let pipeline = Pipeline::new(clock, id_factory);
        let segment_active = Rc::new(Cell::new(false));
        let assembler = Rc::new(RefCell::new(RecordingAssembler::new(AssemblerOptions::default())));

        let bus = pipeline.event_bus();
        let sa = Rc::clone(&segment_active);
        let asm = Rc::clone(&assembler);
        bus.on(EventKind::SpeechStart, move |_| {
            sa.set(true);
            asm.borrow_mut().set_speech_active(true);
        });
        let sa = Rc::clone(&segment_active);
        let asm = Rc::clone(&assembler);
        bus.on(EventKind::SpeechEnd, move |_| {
            sa.set(false);
            asm.borrow_mut().set_speech_active(false);
        });
        let asm = Rc::clone(&assembler);
        bus.on(EventKind::Segment, move |event| {
            if let Event::Segment(segment) = event {
                asm.borrow_mut().on_segment(segment);
            }
        });

        Self {
            pipeline,
            assembler,
            segment_active,
            normalizer: None,
            active_segmenter: ActiveSegmenter::Builtin(SegmenterConfig::default()),
            raw_subs: Hub::new(),
            speech_subs: Hub::new(),
            normalized_subs: Hub::new(),
            late_buffer: VecDeque::with_capacity(LATE_SUBSCRIBER_BUFFER_FRAMES),
            ready_fired: false,
            ready_handlers: Vec::new(),
            active: true,
            disposed: false,
        }
    }

    fn segmenter_stage_input(&self) -> Option<StageInput> {
        match &self.active_segmenter {
            ActiveSegmenter::Builtin(cfg) => {
                Some(StageInput::Raw(Box::new(Segmenter::new(*cfg)) as Box<dyn Stage>))
            }
            ActiveSegmenter::Disabled => None,
            ActiveSegmenter::Custom(ctrl) => Some(StageInput::Controlled(Rc::clone(ctrl))),
        }
    }

    fn rebuild_pipeline(&mut self, mut stages: Vec<StageInput>) {
        if let Some(seg) = self.segmenter_stage_input() {
            stages.push(seg);
        }
        self.pipeline.configure(stages);
    }

    /// Full replace: every field is applied, defaulting per §4.4 ("default
    /// segmenter is produced by the runtime when the input is undefined").
    /// Always refreshes the pipeline.
    pub fn configure(&mut self, options: RecorderOptions) {
        self.active_segmenter = match options.segmenter {
            Some(SegmenterInput::Enabled(cfg)) => ActiveSegmenter::Builtin(cfg),
            Some(SegmenterInput::Disabled) => ActiveSegmenter::Disabled,
            Some(SegmenterInput::Custom(ctrl)) => ActiveSegmenter::Custom(ctrl),
            None => ActiveSegmenter::Builtin(SegmenterConfig::default()),
        };
        self.normalizer = options.target_format.map(Normalizer::new);
        self.assembler = Rc::new(RefCell::new(RecordingAssembler::new(options.produce.unwrap_or_default())));
        self.rewire_assembler_subscription();
        let stages = options.stages.unwrap_or_default();
        self.rebuild_pipeline(stages);
    }

    /// Merge: an absent field leaves the corresponding state untouched. The
    /// pipeline is only reconfigured when `stages` or `segmenter` is present.
    pub fn update(&mut self, options: RecorderOptions) {
        let mut refresh = options.stages.is_some();

        if let Some(seg) = options.segmenter {
            self.active_segmenter = match seg {
                SegmenterInput::Enabled(cfg) => ActiveSegmenter::Builtin(cfg),
                SegmenterInput::Disabled => ActiveSegmenter::Disabled,
                SegmenterInput::Custom(ctrl) => ActiveSegmenter::Custom(ctrl),
            };
            refresh = true;
        }
        if let Some(fmt) = options.target_format {
            self.normalizer = Some(Normalizer::new(fmt));
        }
        if let Some(produce) = options.produce {
            self.assembler = Rc::new(RefCell::new(RecordingAssembler::new(produce)));
            self.rewire_assembler_subscription();
        }
        if refresh {
            let stages = options.stages.unwrap_or_default();
            self.rebuild_pipeline(stages);
        }
    }

    /// Re-subscribes the internal `speechStart`/`speechEnd` -> assembler
    /// bridge to a freshly swapped-in assembler instance.
    fn rewire_assembler_subscription(&self) {
        let bus = self.pipeline.event_bus();
        let asm = Rc::clone(&self.assembler);
        let sa = Rc::clone(&self.segment_active);
        bus.on(EventKind::SpeechStart, move |_| {
            sa.set(true);
            asm.borrow_mut().set_speech_active(true);
        });
        let asm = Rc::clone(&self.assembler);
        let sa = Rc::clone(&self.segment_active);
        bus.on(EventKind::SpeechEnd, move |_| {
            sa.set(false);
            asm.borrow_mut().set_speech_active(false);
        });
        let asm = Rc::clone(&self.assembler);
        bus.on(EventKind::Segment, move |event| {
            if let Event::Segment(segment) = event {
                asm.borrow_mut().on_segment(segment);
            }
        });
    }

    /// Handles one inbound capture frame, per §4.4's nine-step order.
    pub fn push(&mut self, frame: Frame) {
        if self.disposed || !self.active {
            return;
        }

        self.assembler.borrow_mut().begin(frame.ts_ms);
        self.assembler.borrow_mut().on_frame(&frame);

        self.raw_subs.notify(&frame);

        if self.segment_active.get() {
            self.speech_subs.notify(&frame);
        }

        if let Some(normalizer) = &self.normalizer {
            let normalized = normalizer.normalize(&frame);
            self.late_buffer.push_back(normalized.clone());
            if self.late_buffer.len() > LATE_SUBSCRIBER_BUFFER_FRAMES {
                self.late_buffer.pop_front();
            }
            self.normalized_subs.notify(&normalized);
            self.fire_ready();
        }

        self.pipeline.push(frame);
    }

    fn fire_ready(&mut self) {
        if self.ready_fired {
            return;
        }
        self.ready_fired = true;
        for handler in self.ready_handlers.drain(..) {
            handler();
        }
    }

    /// Registers `handler` to run exactly once, on the first normalized
    /// frame — immediately, if that has already happened.
    pub fn on_ready(&mut self, handler: impl FnOnce() + 'static) {
        if self.ready_fired {
            handler();
        } else {
            self.ready_handlers.push(Box::new(handler));
        }
    }

    #[must_use]
    pub fn on_raw(&self, handler: impl FnMut(&Frame) + 'static) -> u64 {
        self.raw_subs.subscribe(handler)
    }

    pub fn off_raw(&self, id: u64) {
        self.raw_subs.unsubscribe(id);
    }

    #[must_use]
    pub fn on_speech(&self, handler: impl FnMut(&Frame) + 'static) -> u64 {
        self.speech_subs.subscribe(handler)
    }

    pub fn off_speech(&self, id: u64) {
        self.speech_subs.unsubscribe(id);
    }

    #[must_use]
    pub fn on_normalized(&self, handler: impl FnMut(&NormalizedFrame) + 'static) -> u64 {
        self.normalized_subs.subscribe(handler)
    }

    pub fn off_normalized(&self, id: u64) {
        self.normalized_subs.unsubscribe(id);
    }

    pub fn on_segment(&self, mut handler: impl FnMut(&Segment) + 'static) -> saraudio_core::Unsubscribe {
        self.pipeline.event_bus().on(EventKind::Segment, move |event| {
            if let Event::Segment(segment) = event {
                handler(segment);
            }
        })
    }

    pub fn on_error(&self, mut handler: impl FnMut(&SaraudioError) + 'static) -> saraudio_core::Unsubscribe {
        self.pipeline.event_bus().on(EventKind::Error, move |event| {
            if let Event::Error(error) = event {
                handler(error);
            }
        })
    }

    #[must_use]
    pub fn late_normalized_frames(&self) -> &VecDeque<NormalizedFrame> {
        &self.late_buffer
    }

    pub const fn start(&mut self) {
        self.active = true;
    }

    pub const fn stop(&mut self) {
        self.active = false;
    }

    /// Clears accumulated recordings and ready/segment-active state, keeping
    /// the current configuration (stages, segmenter, target format).
    pub fn reset(&mut self) {
        let produce_options = {
            let asm = self.assembler.borrow();
            AssemblerOptions {
                full: asm.full().is_some(),
                masked: asm.masked().is_some(),
                cleaned: asm.cleaned().is_some(),
            }
        };
        self.assembler = Rc::new(RefCell::new(RecordingAssembler::new(produce_options)));
        self.rewire_assembler_subscription();
        self.segment_active.set(false);
        self.late_buffer.clear();
        self.ready_fired = false;
    }

    /// Tears down every stage and clears subscriptions. A disposed Recorder
    /// ignores subsequent `push` calls.
    pub fn dispose(&mut self) {
        self.pipeline.dispose();
        self.disposed = true;
    }

    #[must_use]
    pub fn full_recording(&self) -> Option<PcmSnapshot> {
        self.assembler.borrow().full()
    }

    #[must_use]
    pub fn masked_recording(&self) -> Option<PcmSnapshot> {
        self.assembler.borrow().masked()
    }

    #[must_use]
    pub fn cleaned_recording(&self) -> Option<PcmSnapshot> {
        self.assembler.borrow().cleaned()
    }

    #[must_use]
    pub fn raw_subscriber_count(&self) -> usize {
        self.raw_subs.len()
    }
}

/// Lets a [`crate::recorder::Recorder`] feed a transcription controller
/// (`saraudio-provider::controller::TranscriptionController`) without that
/// crate depending on `saraudio-engine` directly (§9).
impl FrameSource for Recorder {
    fn on_normalized(&self, handler: Box<dyn FnMut(&NormalizedFrame)>) -> u64 {
        Recorder::on_normalized(self, handler)
    }

    fn off_normalized(&self, id: u64) {
        Recorder::off_normalized(self, id);
    }

    fn on_segment(&self, handler: Box<dyn FnMut(&Segment)>) -> saraudio_core::Unsubscribe {
        Recorder::on_segment(self, handler)
    }
}
