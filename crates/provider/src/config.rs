// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Configuration surfaces for the provider session, HTTP aggregator and
//! transcription controller (§6.3). Each struct derives `Deserialize` +
//! `JsonSchema` with `#[serde(default)]`, following the teacher's
//! `streamkit_core::config` convention of centralizing defaults as named
//! constants (`saraudio_core::constants`) rather than inlining magic numbers.

use schemars::JsonSchema;
use serde::Deserialize;

use saraudio_core::constants::{
    clamp_u64, DEFAULT_CHUNK_INTERVAL_MS, DEFAULT_CHUNK_MAX_IN_FLIGHT, DEFAULT_CHUNK_MIN_DURATION_MS,
    DEFAULT_CHUNK_OVERLAP_MS, DEFAULT_CHUNK_TIMEOUT_MS, DEFAULT_KEEPALIVE_INTERVAL_MS,
    DEFAULT_PRECONNECT_BUFFER_MS, DEFAULT_QUEUE_BUDGET_MS, DEFAULT_RETRY_BASE_DELAY_MS,
    DEFAULT_RETRY_ENABLED, DEFAULT_RETRY_FACTOR, DEFAULT_RETRY_JITTER_RATIO, DEFAULT_RETRY_MAX_ATTEMPTS,
    DEFAULT_RETRY_MAX_DELAY_MS, FORCE_ENDPOINT_COOLDOWN_MS, KEEPALIVE_INTERVAL_MAX_MS,
    KEEPALIVE_INTERVAL_MIN_MS, PRECONNECT_BUFFER_MAX_MS, PRECONNECT_BUFFER_MIN_MS, QUEUE_BUDGET_MAX_MS,
    QUEUE_BUDGET_MIN_MS,
};

/// [`crate::session::ProviderSession`] configuration (§4.5).
#[derive(Debug, Clone, Copy, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SessionConfig {
    pub keepalive_interval_ms: u64,
    pub queue_budget_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            keepalive_interval_ms: DEFAULT_KEEPALIVE_INTERVAL_MS,
            queue_budget_ms: DEFAULT_QUEUE_BUDGET_MS,
        }
    }
}

impl SessionConfig {
    /// Clamps both fields to their documented ranges, warning on the fields
    /// that were out of range (§4.5: keepalive `[1000, 30000]`, queue budget
    /// `[100, 500]`).
    #[must_use]
    pub fn clamped(self) -> Self {
        Self {
            keepalive_interval_ms: crate::messages::clamp_with_warn(
                self.keepalive_interval_ms,
                KEEPALIVE_INTERVAL_MIN_MS,
                KEEPALIVE_INTERVAL_MAX_MS,
                "keepalive_interval_ms",
            ),
            queue_budget_ms: crate::messages::clamp_with_warn(
                self.queue_budget_ms,
                QUEUE_BUDGET_MIN_MS,
                QUEUE_BUDGET_MAX_MS,
                "queue_budget_ms",
            ),
        }
    }
}

/// [`crate::aggregator::HttpAggregator`] configuration (§4.6).
#[derive(Debug, Clone, Copy, Deserialize, JsonSchema)]
#[serde(default)]
pub struct AggregatorConfig {
    pub interval_ms: u64,
    pub min_duration_ms: u64,
    pub overlap_ms: u64,
    pub max_in_flight: usize,
    pub timeout_ms: u64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_CHUNK_INTERVAL_MS,
            min_duration_ms: DEFAULT_CHUNK_MIN_DURATION_MS,
            overlap_ms: DEFAULT_CHUNK_OVERLAP_MS,
            max_in_flight: DEFAULT_CHUNK_MAX_IN_FLIGHT,
            timeout_ms: DEFAULT_CHUNK_TIMEOUT_MS,
        }
    }
}

/// Retry/backoff block of the controller's configuration surface (§6.3).
#[derive(Debug, Clone, Copy, Deserialize, JsonSchema)]
#[serde(default)]
pub struct RetryConfig {
    pub enabled: bool,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub factor: f64,
    pub max_delay_ms: u64,
    pub jitter_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: DEFAULT_RETRY_ENABLED,
            max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            factor: DEFAULT_RETRY_FACTOR,
            max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
            jitter_ratio: DEFAULT_RETRY_JITTER_RATIO,
        }
    }
}

impl RetryConfig {
    /// Computes the backoff delay for `attempt` (1-based), per §4.7:
    /// `base * factor^(attempt-1)`, clipped to `max_delay_ms`, with
    /// multiplicative jitter in `[1-jitter_ratio, 1+jitter_ratio]`.
    ///
    /// `jitter_sample` is a caller-supplied value in `[0, 1]` (rather than
    /// reaching for a RNG crate here) so the arithmetic stays deterministic
    /// and testable; callers wire in `rand` at the call site.
    #[must_use]
    pub fn delay_ms(&self, attempt: u32, jitter_sample: f64) -> u64 {
        let attempt = attempt.max(1);
        #[allow(clippy::cast_precision_loss)]
        let raw = self.base_delay_ms as f64 * self.factor.powi(attempt as i32 - 1);
        let clipped = raw.min(self.max_delay_ms as f64);
        let jitter_range = 2.0 * self.jitter_ratio;
        let factor = (1.0 - self.jitter_ratio) + jitter_sample.clamp(0.0, 1.0) * jitter_range;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let delayed = (clipped * factor).round().max(0.0) as u64;
        delayed
    }
}

/// Which transport the controller should prefer. `Auto` resolves against
/// the provider's declared capabilities at connect time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum LiveTransport {
    #[default]
    Auto,
    Stream,
    Http,
}

/// Full controller configuration surface (§6.3).
#[derive(Debug, Clone, Copy, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ControllerConfig {
    pub preconnect_buffer_ms: u64,
    pub flush_on_segment_end: bool,
    pub live_transport: LiveTransport,
    pub chunking: AggregatorConfig,
    pub retry: RetryConfig,
    pub session: SessionConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            preconnect_buffer_ms: DEFAULT_PRECONNECT_BUFFER_MS,
            flush_on_segment_end: true,
            live_transport: LiveTransport::Auto,
            chunking: AggregatorConfig::default(),
            retry: RetryConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl ControllerConfig {
    /// Clamps the preconnect buffer cap to `[0, 250]`, warning on an
    /// out-of-range request (§4.7).
    #[must_use]
    pub fn clamped(mut self) -> Self {
        self.preconnect_buffer_ms = crate::messages::clamp_with_warn(
            self.preconnect_buffer_ms,
            PRECONNECT_BUFFER_MIN_MS,
            PRECONNECT_BUFFER_MAX_MS,
            "preconnect_buffer_ms",
        );
        self.session = self.session.clamped();
        self
    }
}

/// The minimum time between two forced endpoint requests (§4.7 cooldown).
#[must_use]
pub const fn force_endpoint_cooldown_ms() -> u64 {
    FORCE_ENDPOINT_COOLDOWN_MS
}

#[must_use]
pub const fn clamp(value: u64, min: u64, max: u64) -> u64 {
    clamp_u64(value, min, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invariant_10_retry_arithmetic_without_jitter() {
        let retry = RetryConfig {
            enabled: true,
            max_attempts: 5,
            base_delay_ms: 300,
            factor: 2.0,
            max_delay_ms: 10_000,
            jitter_ratio: 0.0,
        };
        let expected = [300, 600, 1200, 2400, 4800];
        for (attempt, expected_ms) in (1..=5).zip(expected) {
            assert_eq!(retry.delay_ms(attempt, 0.5), expected_ms);
        }
    }

    #[test]
    fn retry_delay_clips_to_max() {
        let retry = RetryConfig {
            enabled: true,
            max_attempts: 10,
            base_delay_ms: 300,
            factor: 2.0,
            max_delay_ms: 1000,
            jitter_ratio: 0.0,
        };
        assert_eq!(retry.delay_ms(10, 0.5), 1000);
    }

    #[test]
    fn retry_delay_jitter_stays_in_bounds() {
        let retry = RetryConfig {
            enabled: true,
            max_attempts: 3,
            base_delay_ms: 1000,
            factor: 1.0,
            max_delay_ms: 10_000,
            jitter_ratio: 0.2,
        };
        assert_eq!(retry.delay_ms(1, 0.0), 800);
        assert_eq!(retry.delay_ms(1, 1.0), 1200);
    }
}
