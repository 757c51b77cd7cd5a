// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Recording assembler (C6): three independent PCM16 accumulators (cleaned,
//! full, masked) with bounded-format discipline, fronted by session-bound
//! start/end timestamps.

use saraudio_core::types::{f32_to_i16, Frame, PcmSnapshot, Samples, Segment};

/// Which accumulators a [`RecordingAssembler`] maintains. All default to
/// off; a caller enables only the streams it exports.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssemblerOptions {
    pub full: bool,
    pub masked: bool,
    pub cleaned: bool,
}

#[derive(Debug, Clone, Copy)]
struct FrozenFormat {
    sample_rate: u32,
    channels: u16,
}

/// Accumulates a recording session's cleaned/full/masked PCM16 streams.
///
/// Format policy (§4.3): the sample rate/channel count of the first non-zero
/// frame observed is frozen for the session; later frames in a different
/// format still contribute samples to the enabled accumulators, but never
/// change the reported format. This is a deliberate source behavior, not an
/// oversight — mid-session format changes silently mis-report.
#[derive(Debug, Default)]
pub struct RecordingAssembler {
    options: AssemblerOptions,
    full_pcm: Vec<i16>,
    masked_pcm: Vec<i16>,
    cleaned_pcm: Vec<i16>,
    format: Option<FrozenFormat>,
    speech_active: bool,
    start_ms: Option<u64>,
    end_ms: Option<u64>,
}

impl RecordingAssembler {
    #[must_use]
    pub fn new(options: AssemblerOptions) -> Self {
        Self {
            options,
            full_pcm: Vec::new(),
            masked_pcm: Vec::new(),
            cleaned_pcm: Vec::new(),
            format: None,
            speech_active: false,
            start_ms: None,
            end_ms: None,
        }
    }

    /// Sets the session start iff unset. Later calls never overwrite it.
    pub fn begin(&mut self, ts_ms: u64) {
        if self.start_ms.is_none() {
            self.start_ms = Some(ts_ms);
        }
    }

    /// Sets the session end explicitly.
    pub fn end(&mut self, ts_ms: u64) {
        self.end_ms = Some(ts_ms);
    }

    /// Tells the assembler whether a speech section is currently active, so
    /// the masked accumulator knows whether to append real samples or a
    /// zero-filled block of the same length.
    pub const fn set_speech_active(&mut self, active: bool) {
        self.speech_active = active;
    }

    fn freeze_format(&mut self, sample_rate: u32, channels: u16) {
        if self.format.is_none() && sample_rate != 0 && channels != 0 {
            self.format = Some(FrozenFormat { sample_rate, channels });
        }
    }

    /// Appends one observed frame's contribution to every enabled
    /// accumulator, and advances the session's end timestamp.
    pub fn on_frame(&mut self, frame: &Frame) {
        self.end_ms = Some(frame.ts_ms);
        self.freeze_format(frame.sample_rate, frame.channels);

        let pcm16: Vec<i16> = match &frame.samples {
            Samples::I16(s) => s.as_ref().clone(),
            Samples::F32(s) => s.iter().map(|&x| f32_to_i16(x)).collect(),
        };

        if self.options.full {
            self.full_pcm.extend_from_slice(&pcm16);
        }
        if self.options.masked {
            if self.speech_active {
                self.masked_pcm.extend_from_slice(&pcm16);
            } else {
                self.masked_pcm.resize(self.masked_pcm.len() + pcm16.len(), 0);
            }
        }
    }

    /// Concatenates one completed segment's PCM16 into the cleaned
    /// accumulator. Segments are assumed non-overlapping and are appended in
    /// whatever order the producer emitted them.
    pub fn on_segment(&mut self, segment: &Segment) {
        if !self.options.cleaned {
            return;
        }
        self.freeze_format(segment.sample_rate, segment.channels);
        if let Some(pcm) = &segment.pcm {
            self.cleaned_pcm.extend_from_slice(pcm);
        }
    }

    fn snapshot(&self, enabled: bool, pcm: &[i16]) -> Option<PcmSnapshot> {
        if !enabled {
            return None;
        }
        let format = self.format.unwrap_or(FrozenFormat { sample_rate: 0, channels: 0 });
        Some(PcmSnapshot { pcm: pcm.to_vec(), sample_rate: format.sample_rate, channels: format.channels })
    }

    #[must_use]
    pub fn full(&self) -> Option<PcmSnapshot> {
        self.snapshot(self.options.full, &self.full_pcm)
    }

    #[must_use]
    pub fn masked(&self) -> Option<PcmSnapshot> {
        self.snapshot(self.options.masked, &self.masked_pcm)
    }

    #[must_use]
    pub fn cleaned(&self) -> Option<PcmSnapshot> {
        self.snapshot(self.options.cleaned, &self.cleaned_pcm)
    }

    #[must_use]
    pub const fn start_ms(&self) -> Option<u64> {
        self.start_ms
    }

    #[must_use]
    pub const fn end_ms(&self) -> Option<u64> {
        self.end_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn i16_frame(ts_ms: u64, samples: Vec<i16>, sample_rate: u32, channels: u16) -> Frame {
        Frame::new(Samples::I16(Arc::new(samples)), ts_ms, sample_rate, channels)
    }

    #[test]
    fn begin_never_overwrites_first_start() {
        let mut asm = RecordingAssembler::new(AssemblerOptions::default());
        asm.begin(100);
        asm.begin(50);
        assert_eq!(asm.start_ms(), Some(100));
    }

    #[test]
    fn invariant_6_masked_stays_aligned_with_full() {
        let mut asm =
            RecordingAssembler::new(AssemblerOptions { full: true, masked: true, cleaned: false });

        asm.set_speech_active(true);
        asm.on_frame(&i16_frame(0, vec![1, 2, 3], 16000, 1));
        assert_eq!(asm.full().unwrap().pcm.len(), asm.masked().unwrap().pcm.len());

        asm.set_speech_active(false);
        asm.on_frame(&i16_frame(10, vec![4, 5], 16000, 1));
        let full = asm.full().unwrap();
        let masked = asm.masked().unwrap();
        assert_eq!(full.pcm.len(), masked.pcm.len());
        assert_eq!(&masked.pcm[3..5], &[0, 0]);
        assert_eq!(&full.pcm[3..5], &[4, 5]);
    }

    #[test]
    fn format_freezes_from_first_frame() {
        let mut asm = RecordingAssembler::new(AssemblerOptions { full: true, ..Default::default() });
        asm.on_frame(&i16_frame(0, vec![1], 16000, 1));
        asm.on_frame(&i16_frame(1, vec![2], 8000, 2));
        let snapshot = asm.full().unwrap();
        assert_eq!(snapshot.sample_rate, 16000);
        assert_eq!(snapshot.channels, 1);
        assert_eq!(snapshot.pcm, vec![1, 2], "later-format frame still contributes samples");
    }

    #[test]
    fn disabled_accumulators_return_none() {
        let asm = RecordingAssembler::new(AssemblerOptions::default());
        assert!(asm.full().is_none());
        assert!(asm.masked().is_none());
        assert!(asm.cleaned().is_none());
    }

    #[test]
    fn cleaned_concatenates_segments_in_order() {
        let mut asm = RecordingAssembler::new(AssemblerOptions { cleaned: true, ..Default::default() });
        let seg1 = Segment {
            id: "a".into(),
            start_ms: 0,
            end_ms: 100,
            sample_rate: 16000,
            channels: 1,
            pcm: Some(Arc::new(vec![1, 2])),
        };
        let seg2 = Segment {
            id: "b".into(),
            start_ms: 200,
            end_ms: 300,
            sample_rate: 16000,
            channels: 1,
            pcm: Some(Arc::new(vec![3, 4])),
        };
        asm.on_segment(&seg1);
        asm.on_segment(&seg2);
        assert_eq!(asm.cleaned().unwrap().pcm, vec![1, 2, 3, 4]);
    }
}
