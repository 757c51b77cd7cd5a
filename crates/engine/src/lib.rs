// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Hot-reconfigurable frame pipeline ([`pipeline::Pipeline`], C4) and
//! recorder façade ([`recorder::Recorder`], C7) for saraudio.

pub mod pipeline;
pub mod recorder;

pub use pipeline::Pipeline;
pub use recorder::{Recorder, RecorderOptions, SegmenterInput};
