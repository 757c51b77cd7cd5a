// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Segmenter stage (C5): turns a continuous frame stream plus a `vad` event
//! stream into bounded speech segments with pre-roll and hangover.

use std::cell::RefCell;
use std::rc::Rc;

use saraudio_core::event_bus::{Event, EventKind};
use saraudio_core::ring_buffer::{pre_roll_capacity, RingBuffer};
use saraudio_core::types::{f32_to_i16, Frame, Samples, Segment};
use saraudio_core::{Stage, StageContext};
use schemars::JsonSchema;
use serde::Deserialize;

/// Hot-reconfigurable segmenter parameters. Both values clamp to `>= 0`; a
/// change to `pre_roll_ms` invalidates the pre-roll ring buffer, which is
/// rebuilt lazily on the next frame.
#[derive(Debug, Clone, Copy, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SegmenterConfig {
    pub pre_roll_ms: u32,
    pub hangover_ms: u32,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            pre_roll_ms: saraudio_core::constants::DEFAULT_PRE_ROLL_MS,
            hangover_ms: saraudio_core::constants::DEFAULT_HANGOVER_MS,
        }
    }
}

struct ActiveSegment {
    id: String,
    start_ms: u64,
    sample_rate: u32,
    channels: u16,
    pcm: Vec<f32>,
    pending_silence_since: Option<u64>,
}

struct State {
    config: SegmenterConfig,
    pre_roll: Option<RingBuffer>,
    pre_roll_format: Option<(u32, u16)>,
    active: Option<ActiveSegment>,
}

impl State {
    fn finalize(&mut self, end_ms: u64, bus: &Rc<saraudio_core::EventBus>) {
        let Some(active) = self.active.take() else { return };
        let pcm: Vec<i16> = active.pcm.iter().map(|&s| f32_to_i16(s)).collect();
        bus.emit(Event::SpeechEnd { ts_ms: end_ms });
        bus.emit(Event::Segment(Segment {
            id: active.id,
            start_ms: active.start_ms,
            end_ms,
            sample_rate: active.sample_rate,
            channels: active.channels,
            pcm: Some(std::sync::Arc::new(pcm)),
        }));
    }
}

/// VAD-driven speech segmenter. Subscribes to `vad` events on the pipeline's
/// shared bus during `setup` and emits `speechStart`/`speechEnd`/`segment`.
pub struct Segmenter {
    state: Rc<RefCell<State>>,
    vad_sub: Option<saraudio_core::Unsubscribe>,
}

impl Segmenter {
    #[must_use]
    pub fn new(config: SegmenterConfig) -> Self {
        Self {
            state: Rc::new(RefCell::new(State {
                config,
                pre_roll: None,
                pre_roll_format: None,
                active: None,
            })),
            vad_sub: None,
        }
    }

    /// Applies new configuration; matches the controller's `configure`
    /// behavior used by `Pipeline::configure` on a matching reconfigure.
    pub fn reconfigure(&self, config: SegmenterConfig) {
        let mut state = self.state.borrow_mut();
        let pre_roll_changed = state.config.pre_roll_ms != config.pre_roll_ms;
        state.config = config;
        if pre_roll_changed {
            state.pre_roll = None;
        }
    }
}

impl Stage for Segmenter {
    fn setup(&mut self, ctx: &StageContext) {
        let state = Rc::clone(&self.state);
        let bus = ctx.bus_handle();
        let id_factory = ctx.id_factory_handle();
        let bus_for_handler = Rc::clone(&bus);
        let sub = ctx.on(EventKind::Vad, move |event| {
            let Event::Vad(vad) = event else { return };
            let mut st = state.borrow_mut();
            if vad.speech {
                if let Some(active) = st.active.as_mut() {
                    active.pending_silence_since = None;
                } else {
                    let pre_roll_snapshot =
                        st.pre_roll.as_ref().map(RingBuffer::snapshot).unwrap_or_default();
                    let (sample_rate, channels) = st.pre_roll_format.unwrap_or((0, 1));
                    let id = id_factory();
                    st.active = Some(ActiveSegment {
                        id,
                        start_ms: vad.ts_ms,
                        sample_rate,
                        channels,
                        pcm: pre_roll_snapshot,
                        pending_silence_since: None,
                    });
                    bus_for_handler.emit(Event::SpeechStart { ts_ms: vad.ts_ms });
                }
            } else if let Some(active) = st.active.as_mut() {
                if active.pending_silence_since.is_none() {
                    active.pending_silence_since = Some(vad.ts_ms);
                }
            }
        });
        self.vad_sub = Some(sub);
    }

    fn handle(&mut self, frame: &Frame, ctx: &StageContext) {
        let mut state = self.state.borrow_mut();

        let capacity =
            pre_roll_capacity(frame.sample_rate, frame.channels, state.config.pre_roll_ms);
        if state.pre_roll.is_none() {
            state.pre_roll = Some(RingBuffer::new(capacity));
        }
        state.pre_roll_format = Some((frame.sample_rate, frame.channels));

        let as_f32: Vec<f32> = match &frame.samples {
            Samples::F32(s) => s.as_ref().clone(),
            Samples::I16(s) => s.iter().map(|&x| f32::from(x) / 32768.0).collect(),
        };
        if let Some(pre_roll) = state.pre_roll.as_mut() {
            pre_roll.write(&as_f32);
        }

        let hangover_ms = u64::from(state.config.hangover_ms);
        let mut should_finalize = false;
        let mut finalize_end_ms = frame.ts_ms;

        if let Some(active) = state.active.as_mut() {
            active.pcm.extend_from_slice(&as_f32);
            if let Some(since) = active.pending_silence_since {
                if frame.ts_ms.saturating_sub(since) >= hangover_ms {
                    should_finalize = true;
                    finalize_end_ms = since + hangover_ms;
                }
            }
        }

        if should_finalize {
            let bus = ctx.bus_handle();
            state.finalize(finalize_end_ms, &bus);
        }
    }

    fn flush(&mut self, ctx: &StageContext) {
        let mut state = self.state.borrow_mut();
        if state.active.is_some() {
            let now = ctx.now();
            let end_ms = {
                let active = state.active.as_ref().expect("checked is_some above");
                active.pending_silence_since.unwrap_or(now)
            };
            let bus = ctx.bus_handle();
            state.finalize(end_ms, &bus);
        }
    }

    fn teardown(&mut self, _ctx: &StageContext) {
        if let Some(sub) = self.vad_sub.take() {
            sub.unsubscribe();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use saraudio_core::types::VADScore;
    use saraudio_core::EventBus;
    use std::cell::Cell;
    use std::sync::Arc;

    fn vad(ts_ms: u64, speech: bool) -> Event {
        Event::Vad(VADScore { ts_ms, score: if speech { 1.0 } else { 0.0 }, speech })
    }

    fn ctx_with_clock(bus: Rc<EventBus>, ts: Rc<Cell<u64>>) -> StageContext {
        let ts_for_clock = Rc::clone(&ts);
        let counter = Rc::new(Cell::new(0u64));
        StageContext::new(
            bus,
            move || ts_for_clock.get(),
            move || {
                counter.set(counter.get() + 1);
                format!("seg-{}", counter.get())
            },
        )
    }

    fn frame_at(ts_ms: u64, sample_rate: u32) -> Frame {
        Frame::new(Samples::I16(Arc::new(vec![0i16; (sample_rate / 100) as usize])), ts_ms, sample_rate, 1)
    }

    #[test]
    fn end_to_end_scenario_s2() {
        let bus = EventBus::new();
        let events: Rc<RefCell<Vec<Event>>> = Rc::new(RefCell::new(Vec::new()));
        for kind in [EventKind::SpeechStart, EventKind::SpeechEnd, EventKind::Segment] {
            let events = Rc::clone(&events);
            bus.on(kind, move |e| events.borrow_mut().push(e.clone()));
        }

        let mut segmenter = Segmenter::new(SegmenterConfig { pre_roll_ms: 250, hangover_ms: 400 });
        let clock = Rc::new(Cell::new(0u64));
        let ctx = ctx_with_clock(Rc::clone(&bus), Rc::clone(&clock));
        segmenter.setup(&ctx);

        bus.emit(vad(1000, true));
        for ts in (1000..=1500).step_by(100) {
            segmenter.handle(&frame_at(ts, 16000), &ctx);
        }
        bus.emit(vad(1500, false));
        for ts in [1600, 1700, 1800, 1899] {
            segmenter.handle(&frame_at(ts, 16000), &ctx);
        }
        assert_eq!(events.borrow().len(), 0, "hangover not elapsed yet at t=1899");
        segmenter.handle(&frame_at(1900, 16000), &ctx);

        let recorded = events.borrow();
        assert_eq!(recorded.len(), 3);
        assert!(matches!(recorded[0], Event::SpeechStart { ts_ms: 1000 }));
        assert!(matches!(recorded[1], Event::SpeechEnd { ts_ms: 1900 }));
        match &recorded[2] {
            Event::Segment(seg) => {
                assert_eq!(seg.start_ms, 1000);
                assert_eq!(seg.end_ms, 1900);
            }
            _ => panic!("expected segment event"),
        }
    }

    #[test]
    fn invariant_5_segmenter_monotonicity() {
        let bus = EventBus::new();
        let ids: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
        let ids_for_segment = Rc::clone(&ids);
        bus.on(EventKind::Segment, move |e| {
            if let Event::Segment(seg) = e {
                ids_for_segment.borrow_mut().push(seg.id.clone());
            }
        });
        let order: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));
        let o1 = Rc::clone(&order);
        bus.on(EventKind::SpeechStart, move |_| o1.borrow_mut().push("start"));
        let o2 = Rc::clone(&order);
        bus.on(EventKind::SpeechEnd, move |_| o2.borrow_mut().push("end"));
        let o3 = Rc::clone(&order);
        bus.on(EventKind::Segment, move |_| o3.borrow_mut().push("segment"));

        let mut segmenter = Segmenter::new(SegmenterConfig { pre_roll_ms: 100, hangover_ms: 200 });
        let clock = Rc::new(Cell::new(0u64));
        let ctx = ctx_with_clock(Rc::clone(&bus), clock);
        segmenter.setup(&ctx);

        for (speech_start, speech_end) in [(0u64, 300u64), (1000, 1300)] {
            bus.emit(vad(speech_start, true));
            segmenter.handle(&frame_at(speech_start, 16000), &ctx);
            bus.emit(vad(speech_end, false));
            segmenter.handle(&frame_at(speech_end + 200, 16000), &ctx);
        }

        assert_eq!(order.borrow().as_slice(), ["start", "end", "segment", "start", "end", "segment"]);
        let unique: std::collections::HashSet<_> = ids.borrow().iter().cloned().collect();
        assert_eq!(unique.len(), 2, "segment ids must be unique within a session");
    }

    #[test]
    fn flush_finalizes_active_segment() {
        let bus = EventBus::new();
        let segments = Rc::new(RefCell::new(Vec::new()));
        let segments_clone = Rc::clone(&segments);
        bus.on(EventKind::Segment, move |e| {
            if let Event::Segment(seg) = e {
                segments_clone.borrow_mut().push(seg.clone());
            }
        });

        let mut segmenter = Segmenter::new(SegmenterConfig::default());
        let clock = Rc::new(Cell::new(500u64));
        let ctx = ctx_with_clock(Rc::clone(&bus), Rc::clone(&clock));
        segmenter.setup(&ctx);

        bus.emit(vad(100, true));
        segmenter.handle(&frame_at(100, 16000), &ctx);
        segmenter.flush(&ctx);

        let segs = segments.borrow();
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].end_ms, 500);
    }
}
