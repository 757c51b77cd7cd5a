// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! [`FrameSource`]: the subscription surface the transcription controller
//! (C10, in `saraudio-provider`) needs from whatever feeds it normalized
//! frames and segments — normally a [`crate::types::NormalizedFrame`]
//! producer + segment emitter such as the Recorder façade (C7, in
//! `saraudio-engine`).
//!
//! Kept in `saraudio-core` rather than having the controller depend directly
//! on `saraudio-engine`'s `Recorder` type, the same way `StageContext`
//! decouples a `Stage` from the concrete `Pipeline` that drives it (§9):
//! the controller is agnostic to what kind of thing hands it frames, so long
//! as it can subscribe/unsubscribe.

use crate::types::{NormalizedFrame, Segment};
use crate::Unsubscribe;

/// Subscription surface a transcription controller needs from its frame
/// producer: normalized frames (to forward to a provider transport) and
/// segment completions (to drive segment-end endpointing, §4.7).
pub trait FrameSource {
    /// Subscribes to normalized frames, returning a token `off_normalized`
    /// can later use to detach it.
    fn on_normalized(&self, handler: Box<dyn FnMut(&NormalizedFrame)>) -> u64;

    /// Detaches a subscription previously returned by `on_normalized`.
    fn off_normalized(&self, id: u64);

    /// Subscribes to segment completions.
    fn on_segment(&self, handler: Box<dyn FnMut(&Segment)>) -> Unsubscribe;
}
