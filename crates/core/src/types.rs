// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Core data types shared across the pipeline, segmenter, assembler and
//! transcription stack: [`Frame`], [`NormalizedFrame`], [`Segment`],
//! [`VADScore`], [`TranscriptToken`]/[`TranscriptUpdate`], and the
//! [`Recording`] accumulator snapshot.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Raw sample encoding carried by a [`Frame`].
///
/// A frame is either signed 16-bit PCM or 32-bit float in `[-1, 1]`. Both
/// variants wrap an `Arc` so that fanning a frame out to many subscribers
/// (the Recorder's raw/speech/normalized subscriber sets) is a refcount bump,
/// never a copy. A consumer that needs to mutate a buffer in place should go
/// through [`Samples::make_mut`], which clones only if the `Arc` is shared.
#[derive(Debug, Clone)]
pub enum Samples {
    I16(Arc<Vec<i16>>),
    F32(Arc<Vec<f32>>),
}

impl Samples {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::I16(s) => s.len(),
            Self::F32(s) => s.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a mutable view, cloning the underlying buffer only if it is
    /// currently shared with another owner (copy-on-write).
    pub fn make_mut(&mut self) -> SamplesMut<'_> {
        match self {
            Self::I16(s) => SamplesMut::I16(Arc::make_mut(s)),
            Self::F32(s) => SamplesMut::F32(Arc::make_mut(s)),
        }
    }

    /// Converts to PCM16, applying the float round-trip rule (§4.3) when the
    /// source is floating point. A buffer already in PCM16 is cloned cheaply.
    #[must_use]
    pub fn to_pcm16(&self) -> Arc<Vec<i16>> {
        match self {
            Self::I16(s) => Arc::clone(s),
            Self::F32(s) => Arc::new(s.iter().copied().map(f32_to_i16).collect()),
        }
    }
}

pub enum SamplesMut<'a> {
    I16(&'a mut Vec<i16>),
    F32(&'a mut Vec<f32>),
}

/// Float-to-PCM16 conversion rule from §4.3: clamp to `[-1, 1]`, then
/// negatives scale by `32768`, non-negatives scale by `32767`.
///
/// At the exact half-sample boundary (`0.5`) the invariant table in §8 calls
/// for `16383`, not `16384` — i.e. truncation toward zero rather than
/// round-half-away-from-zero. A truncating cast satisfies both that boundary
/// and every interior value, so no separate rounding step is applied.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn f32_to_i16(x: f32) -> i16 {
    let clamped = x.clamp(-1.0, 1.0);
    let scaled = if clamped < 0.0 { clamped * 32768.0 } else { clamped * 32767.0 };
    scaled.clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16
}

/// The unit of audio flowing through the pipeline.
///
/// Produced by the capture source; once emitted, a `Frame` is never mutated
/// in place again — every consumer observes a logically independent view.
/// Cloning a `Frame` only bumps the `Arc` refcount on its sample buffer.
#[derive(Debug, Clone)]
pub struct Frame {
    pub samples: Samples,
    /// Monotonically non-decreasing timestamp, in milliseconds.
    pub ts_ms: u64,
    pub sample_rate: u32,
    /// 1 (mono) or 2 (stereo).
    pub channels: u16,
}

impl Frame {
    #[must_use]
    pub fn new(samples: Samples, ts_ms: u64, sample_rate: u32, channels: u16) -> Self {
        Self { samples, ts_ms, sample_rate, channels }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Frame duration in milliseconds: `samples / channels / sampleRate * 1000`.
    #[must_use]
    pub fn duration_ms(&self) -> f64 {
        duration_ms(self.samples.len(), self.channels, self.sample_rate)
    }
}

/// Shared frame-duration formula used by the segmenter, assembler, provider
/// session and HTTP aggregator (`samples / channels / sampleRate * 1000`).
#[must_use]
pub fn duration_ms(num_samples: usize, channels: u16, sample_rate: u32) -> f64 {
    if channels == 0 || sample_rate == 0 {
        return 0.0;
    }
    (num_samples as f64 / f64::from(channels) / f64::from(sample_rate)) * 1000.0
}

/// A [`Frame`] guaranteed to be PCM16, at the controller's declared target
/// sample rate and channel count. Produced by the frame normalizer (C3).
#[derive(Debug, Clone)]
pub struct NormalizedFrame {
    pub pcm: Arc<Vec<i16>>,
    pub ts_ms: u64,
    pub sample_rate: u32,
    pub channels: u16,
}

impl NormalizedFrame {
    #[must_use]
    pub fn new(pcm: Arc<Vec<i16>>, ts_ms: u64, sample_rate: u32, channels: u16) -> Self {
        Self { pcm, ts_ms, sample_rate, channels }
    }

    #[must_use]
    pub fn duration_ms(&self) -> f64 {
        duration_ms(self.pcm.len(), self.channels, self.sample_rate)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pcm.is_empty()
    }
}

/// A bounded speech region produced by the segmenter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub id: String,
    pub start_ms: u64,
    pub end_ms: u64,
    pub sample_rate: u32,
    pub channels: u16,
    #[serde(skip)]
    pub pcm: Option<Arc<Vec<i16>>>,
}

impl Segment {
    #[must_use]
    pub const fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }
}

/// A voice-activity score fed into the segmenter by an external VAD stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VADScore {
    pub ts_ms: u64,
    pub score: f32,
    pub speech: bool,
}

/// One recognized word or span within a [`TranscriptUpdate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptToken {
    pub text: String,
    pub is_final: bool,
    pub start_ms: Option<u64>,
    pub end_ms: Option<u64>,
    pub confidence: Option<f32>,
    pub speaker: Option<i64>,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

/// A batch of recognized tokens reported by a provider session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptUpdate {
    pub provider_id: String,
    pub tokens: Vec<TranscriptToken>,
    pub finalize: Option<bool>,
    pub span: Option<(u64, u64)>,
    pub language: Option<String>,
    pub turn_id: Option<String>,
    pub provider_metadata: Option<HashMap<String, serde_json::Value>>,
    pub raw: Option<serde_json::Value>,
}

/// A `{pcm, sampleRate, channels}` snapshot returned by the recording
/// assembler's getters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PcmSnapshot {
    pub pcm: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmSnapshot {
    #[must_use]
    pub const fn duration_ms(&self) -> u64 {
        if self.channels == 0 || self.sample_rate == 0 {
            return 0;
        }
        (self.pcm.len() as u64 * 1000) / (self.channels as u64 * self.sample_rate as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_to_int_matches_spec_table() {
        // §8 invariant 7: f in {-1,-0.5,0,0.5,1} -> {-32768,-16384,0,16383,32767}
        assert_eq!(f32_to_i16(-1.0), -32768);
        assert_eq!(f32_to_i16(-0.5), -16384);
        assert_eq!(f32_to_i16(0.0), 0);
        assert_eq!(f32_to_i16(0.5), 16383);
        assert_eq!(f32_to_i16(1.0), 32767);
    }

    #[test]
    fn float_to_int_clamps_out_of_range() {
        assert_eq!(f32_to_i16(-2.0), -32768);
        assert_eq!(f32_to_i16(2.0), 32767);
    }

    #[test]
    fn frame_duration_ms() {
        let samples = Samples::I16(Arc::new(vec![0i16; 1600]));
        let frame = Frame::new(samples, 0, 16000, 1);
        assert!((frame.duration_ms() - 100.0).abs() < 1e-6);
    }
}
