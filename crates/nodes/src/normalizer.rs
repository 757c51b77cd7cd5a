// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Frame normalizer (C3): resamples, downmixes/upmixes and re-encodes one
//! [`Frame`] to a declared target format, producing a [`NormalizedFrame`].
//!
//! This is a from-scratch, dependency-free implementation (linear
//! interpolation for resampling, averaging/duplication for channel
//! conversion) rather than a production DSP pipeline — `spec.md` treats
//! "resampling/mixing implementations" as an external collaborator's
//! concern and only specifies the normalizer's contract: the output is
//! always PCM16 at the declared rate and channel count.

use std::sync::Arc;

use saraudio_core::types::{f32_to_i16, Frame, NormalizedFrame, Samples};

/// The target format a [`Normalizer`] converts every frame to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Stateless frame-to-frame converter. Cheap to construct; holds no buffers
/// between calls since each `Frame` is self-contained.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    target: TargetFormat,
}

impl Normalizer {
    #[must_use]
    pub const fn new(target: TargetFormat) -> Self {
        Self { target }
    }

    #[must_use]
    pub const fn target(&self) -> TargetFormat {
        self.target
    }

    /// Converts `frame` to the target format. An empty input produces a
    /// `NormalizedFrame` with an empty `pcm` buffer rather than `None`.
    #[must_use]
    pub fn normalize(&self, frame: &Frame) -> NormalizedFrame {
        let mono_or_stereo_f32 = to_f32(&frame.samples);
        let channel_converted =
            convert_channels(&mono_or_stereo_f32, frame.channels, self.target.channels);
        let resampled = resample_linear(
            &channel_converted,
            frame.sample_rate,
            self.target.sample_rate,
            self.target.channels,
        );
        let pcm: Vec<i16> = resampled.iter().map(|&s| f32_to_i16(s)).collect();
        NormalizedFrame::new(Arc::new(pcm), frame.ts_ms, self.target.sample_rate, self.target.channels)
    }
}

fn to_f32(samples: &Samples) -> Vec<f32> {
    match samples {
        Samples::F32(s) => s.as_ref().clone(),
        Samples::I16(s) => s.iter().map(|&x| f32::from(x) / 32768.0).collect(),
    }
}

/// Converts interleaved `input` from `src_channels` to `dst_channels`.
/// Only mono/stereo conversions are meaningful per the data model (§3).
fn convert_channels(input: &[f32], src_channels: u16, dst_channels: u16) -> Vec<f32> {
    if src_channels == dst_channels || src_channels == 0 || dst_channels == 0 {
        return input.to_vec();
    }
    let frames = input.len() / src_channels as usize;
    let mut out = Vec::with_capacity(frames * dst_channels as usize);
    match (src_channels, dst_channels) {
        (1, 2) => {
            for &s in input {
                out.push(s);
                out.push(s);
            }
        }
        (2, 1) => {
            for chunk in input.chunks_exact(2) {
                out.push((chunk[0] + chunk[1]) / 2.0);
            }
        }
        _ => return input.to_vec(),
    }
    out
}

/// Linear-interpolation resample of interleaved `input` from `src_rate` to
/// `dst_rate`, for `channels`-interleaved audio.
fn resample_linear(input: &[f32], src_rate: u32, dst_rate: u32, channels: u16) -> Vec<f32> {
    if src_rate == dst_rate || src_rate == 0 || dst_rate == 0 || channels == 0 {
        return input.to_vec();
    }
    let channels = channels as usize;
    let src_frames = input.len() / channels;
    if src_frames == 0 {
        return Vec::new();
    }
    let ratio = f64::from(src_rate) / f64::from(dst_rate);
    let dst_frames = ((src_frames as f64) / ratio).round() as usize;
    let mut out = Vec::with_capacity(dst_frames * channels);
    for i in 0..dst_frames {
        let src_pos = i as f64 * ratio;
        let idx0 = src_pos.floor() as usize;
        let idx1 = (idx0 + 1).min(src_frames - 1);
        let frac = (src_pos - idx0 as f64) as f32;
        for ch in 0..channels {
            let a = input[idx0.min(src_frames - 1) * channels + ch];
            let b = input[idx1 * channels + ch];
            out.push(a + (b - a) * frac);
        }
    }
    out
}
