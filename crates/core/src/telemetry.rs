// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Best-effort, ambient observability sink — distinct from the synchronous
//! domain event bus (C1). Where the event bus carries `vad`/`segment`/`error`
//! values that callers *must* observe to build segments and recordings,
//! `TelemetryEmitter` carries cross-cutting counters (dropped frames, retry
//! attempts, queue trims) that observability tooling may or may not be
//! listening to. Emission never blocks: a full channel just increments the
//! drop counter, the same trade-off `streamkit_core::telemetry` makes for
//! node-level telemetry.

use serde::Serialize;
use tokio::sync::mpsc;

/// One telemetry record. `component` names the emitting subsystem (e.g.
/// `"provider_session"`, `"controller"`); `event` is a short machine-stable
/// tag; `detail` carries whatever structured context is useful for that
/// event, serialized to JSON by the subscriber.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryEvent {
    pub component: &'static str,
    pub event: &'static str,
    pub detail: serde_json::Value,
}

/// Emits [`TelemetryEvent`]s onto a bounded channel without ever suspending
/// the caller. A full channel (no subscriber draining it fast enough) simply
/// increments [`TelemetryEmitter::dropped`] rather than applying
/// backpressure — telemetry must never slow down the audio hot path.
#[derive(Clone)]
pub struct TelemetryEmitter {
    component: &'static str,
    tx: Option<mpsc::Sender<TelemetryEvent>>,
    dropped: std::sync::Arc<std::sync::atomic::AtomicU64>,
}

impl TelemetryEmitter {
    /// Default channel capacity when a caller wants a sink without tuning it.
    pub const DEFAULT_CAPACITY: usize = 256;

    #[must_use]
    pub fn new(component: &'static str, tx: Option<mpsc::Sender<TelemetryEvent>>) -> Self {
        Self { component, tx, dropped: std::sync::Arc::new(std::sync::atomic::AtomicU64::new(0)) }
    }

    /// A no-op emitter for call sites that have not wired telemetry. Every
    /// `emit` becomes a silent drop.
    #[must_use]
    pub fn disabled(component: &'static str) -> Self {
        Self::new(component, None)
    }

    /// Creates a bounded channel pair with [`Self::DEFAULT_CAPACITY`] and an
    /// emitter attached to the sender half.
    #[must_use]
    pub fn channel(component: &'static str) -> (Self, mpsc::Receiver<TelemetryEvent>) {
        let (tx, rx) = mpsc::channel(Self::DEFAULT_CAPACITY);
        (Self::new(component, Some(tx)), rx)
    }

    pub fn emit(&self, event: &'static str, detail: serde_json::Value) {
        let Some(tx) = &self.tx else { return };
        if tx.try_send(TelemetryEvent { component: self.component, event, detail }).is_err() {
            self.dropped.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
    }

    /// Total events dropped due to a full channel since construction.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(std::sync::atomic::Ordering::Relaxed)
    }
}
