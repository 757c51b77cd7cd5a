// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Frame normalizer, segmenter and recording assembler building blocks for
//! saraudio.
//!
//! - [`normalizer`]: resample/downmix/re-encode a `Frame` to a target format
//!   (C3).
//! - [`segmenter`]: VAD-driven bounded speech segment construction (C5).
//! - [`assembler`]: cleaned/full/masked PCM16 accumulators (C6).

pub mod assembler;
pub mod normalizer;
pub mod segmenter;

pub use assembler::{AssemblerOptions, RecordingAssembler};
pub use normalizer::{Normalizer, TargetFormat};
pub use segmenter::{Segmenter, SegmenterConfig};
