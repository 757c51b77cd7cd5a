// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Core data types, event bus and error taxonomy for the saraudio pipeline.
//!
//! ## Modules
//!
//! - [`types`]: `Frame`, `NormalizedFrame`, `Segment`, `VADScore`,
//!   `TranscriptToken`/`TranscriptUpdate`, `PcmSnapshot`.
//! - [`event_bus`]: the typed publish/subscribe bus shared between pipeline
//!   stages (C1).
//! - [`ring_buffer`]: the bounded sample FIFO backing the segmenter's
//!   pre-roll window (C2).
//! - [`wav`]: WAV byte-layout encoding (C11).
//! - [`error`]: the [`SaraudioError`] taxonomy.
//! - [`constants`]: named defaults and clamp ranges used across the crates
//!   in this workspace.
//! - [`telemetry`]: ambient, best-effort observability sink, distinct from
//!   the domain event bus.

pub mod constants;
pub mod error;
pub mod event_bus;
pub mod ring_buffer;
pub mod source;
pub mod stage;
pub mod telemetry;
pub mod types;
pub mod wav;

pub use error::{ErrorKind, Result, SaraudioError};
pub use event_bus::{Event, EventBus, EventKind, Unsubscribe};
pub use ring_buffer::RingBuffer;
pub use source::FrameSource;
pub use stage::{controllers_match, Stage, StageContext, StageController, StageInput};
pub use telemetry::{TelemetryEmitter, TelemetryEvent};
pub use types::{
    duration_ms, f32_to_i16, Frame, NormalizedFrame, PcmSnapshot, Samples, SamplesMut, Segment,
    TranscriptToken, TranscriptUpdate, VADScore,
};
