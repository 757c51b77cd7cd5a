// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Named defaults and clamp ranges for the pipeline, segmenter, provider
//! session and transcription controller. Centralized here (rather than
//! scattered as magic numbers in each module) so the numeric contract in
//! `spec.md` has one home, mirroring how `streamkit-engine::constants`
//! centralizes its own channel-capacity defaults.

// === Pipeline (C4) ===

/// Size of the pre-ready frame queue a `Pipeline` buffers before its first
/// successful `configure`. Overflow drops the newest frame (§4.1, §9 open
/// question — the source's behavior is preserved rather than flipped to
/// drop-oldest).
pub const PRE_READY_QUEUE_CAPACITY: usize = 64;

// === Segmenter (C5) ===

/// Default pre-roll window copied into a new segment on speech start.
pub const DEFAULT_PRE_ROLL_MS: u32 = 250;

/// Default silence window required after the last voiced frame before a
/// segment is finalized.
pub const DEFAULT_HANGOVER_MS: u32 = 400;

// === Recorder façade (C7) ===

/// Number of recent normalized frames buffered so late normalized-frame
/// subscribers can observe a short backlog instead of starting from silence.
pub const LATE_SUBSCRIBER_BUFFER_FRAMES: usize = 5;

// === Provider streaming session (C8) ===

/// Default keepalive tick interval.
pub const DEFAULT_KEEPALIVE_INTERVAL_MS: u64 = 8_000;
pub const KEEPALIVE_INTERVAL_MIN_MS: u64 = 1_000;
pub const KEEPALIVE_INTERVAL_MAX_MS: u64 = 30_000;

/// Default duration budget for the outbound send queue.
pub const DEFAULT_QUEUE_BUDGET_MS: u64 = 200;
pub const QUEUE_BUDGET_MIN_MS: u64 = 100;
pub const QUEUE_BUDGET_MAX_MS: u64 = 500;

// === Transcription controller (C10) ===

/// Default preconnect buffer cap, hard-clamped to `[0, 250]`.
pub const DEFAULT_PRECONNECT_BUFFER_MS: u64 = 120;
pub const PRECONNECT_BUFFER_MIN_MS: u64 = 0;
pub const PRECONNECT_BUFFER_MAX_MS: u64 = 250;

/// Minimum time between two forced endpoint requests triggered by `segment`
/// events.
pub const FORCE_ENDPOINT_COOLDOWN_MS: u64 = 200;

/// Retry backoff defaults: `base * factor^(attempt-1)`, clipped to
/// `max_delay`, with multiplicative jitter `[1-jitter, 1+jitter]`.
pub const DEFAULT_RETRY_ENABLED: bool = true;
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 300;
pub const DEFAULT_RETRY_FACTOR: f64 = 2.0;
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 10_000;
pub const DEFAULT_RETRY_JITTER_RATIO: f64 = 0.0;

// === HTTP chunking aggregator (C9) ===

pub const DEFAULT_CHUNK_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_CHUNK_MIN_DURATION_MS: u64 = 1_000;
pub const DEFAULT_CHUNK_OVERLAP_MS: u64 = 200;
pub const DEFAULT_CHUNK_MAX_IN_FLIGHT: usize = 2;
pub const DEFAULT_CHUNK_TIMEOUT_MS: u64 = 10_000;

/// Clamps `value` into `[min, max]`, the pattern used for every clamped
/// configuration knob in this crate.
#[must_use]
pub const fn clamp_u64(value: u64, min: u64, max: u64) -> u64 {
    if value < min {
        min
    } else if value > max {
        max
    } else {
        value
    }
}
