// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Transcription controller (C10): wires a frame producer (normally the
//! Recorder façade, via [`saraudio_core::FrameSource`]) to a provider
//! transport, managing connect/retry, preconnect buffering, backpressure
//! and segment-driven endpointing (§4.7).
//!
//! Like the Recorder (`saraudio-engine::recorder`), this is a single-
//! threaded, `Rc`-based component (§5: "single-threaded cooperative ... per
//! Controller"). Its background work — draining provider session events,
//! pushing into the HTTP aggregator — runs via `tokio::task::spawn_local`
//! rather than `tokio::spawn`, so a [`TranscriptionController`] must be
//! driven from within a `tokio::task::LocalSet`, exactly as a single-
//! threaded JS runtime would drive the source this toolkit was distilled
//! from.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use saraudio_core::types::{NormalizedFrame, Segment, TranscriptUpdate};
use saraudio_core::{FrameSource, Result, SaraudioError};

use crate::aggregator::HttpAggregator;
use crate::config::{ControllerConfig, LiveTransport};
use crate::session::{ConnectionFactory, ProviderSession, SessionEvent};

/// Lifecycle state of a [`TranscriptionController`] (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Connecting,
    Connected,
    Ready,
    Retrying,
    Disconnected,
    Error,
}

/// Which transport a connect attempt is driving. Tagged variant per §9's
/// design note rather than dynamic dispatch on "is this streaming or
/// chunked" at every frame.
#[derive(Clone)]
pub enum Transport {
    Streaming(Arc<ProviderSession>),
    Chunked(Arc<AsyncMutex<HttpAggregator>>),
}

/// Declares what a provider supports, so the controller knows whether a
/// `live_transport: Auto` config can use the streaming transport and
/// whether segment-driven endpointing (§4.7) is meaningful for it.
#[derive(Clone, Default)]
pub struct ProviderCapabilities {
    pub supports_streaming: bool,
    pub supports_http: bool,
    pub supports_force_endpoint: bool,
    /// The provider-specific control text sent to force endpointing, when
    /// `supports_force_endpoint` is set. Wire contract §6.2: "force-endpoint
    /// is provider-specific when supported".
    pub force_endpoint_message: Option<String>,
}

/// Builds a fresh streaming session for a connect attempt. A new instance is
/// always constructed rather than reusing a prior one (§4.7's "exactly one
/// new session is created on the subsequent connect" provider-update rule).
pub trait StreamingTransportFactory {
    fn build(&self) -> Arc<ProviderSession>;
}

/// Builds a fresh HTTP aggregator for a connect attempt.
pub trait ChunkedTransportFactory {
    fn build(&self) -> Arc<AsyncMutex<HttpAggregator>>;
}

/// A duration-bounded FIFO of normalized frames buffered while the
/// controller is not connected (§4.7 preconnect buffer).
struct PreconnectBuffer {
    frames: VecDeque<NormalizedFrame>,
    total_ms: f64,
}

impl PreconnectBuffer {
    const fn new() -> Self {
        Self { frames: VecDeque::new(), total_ms: 0.0 }
    }

    /// Appends `frame`, then drops oldest frames until `total_ms <= cap_ms`
    /// or only one frame remains (the most recent frame is never dropped
    /// while more than one is queued).
    fn push(&mut self, frame: NormalizedFrame, cap_ms: u64) {
        self.total_ms += frame.duration_ms();
        self.frames.push_back(frame);
        #[allow(clippy::cast_precision_loss)]
        let cap = cap_ms as f64;
        while self.total_ms > cap && self.frames.len() > 1 {
            if let Some(dropped) = self.frames.pop_front() {
                self.total_ms -= dropped.duration_ms();
            }
        }
    }

    fn drain(&mut self) -> Vec<NormalizedFrame> {
        self.total_ms = 0.0;
        self.frames.drain(..).collect()
    }
}

/// Shared mutable state touched both by the controller's public methods and
/// by its `spawn_local`-ed event pump.
struct Shared {
    state: Cell<ControllerState>,
    last_error: RefCell<Option<SaraudioError>>,
    last_force_endpoint_ms: Cell<Option<u64>>,
    transcript_handlers: RefCell<Vec<Box<dyn FnMut(&TranscriptUpdate)>>>,
    error_handlers: RefCell<Vec<Box<dyn FnMut(&SaraudioError)>>>,
}

/// Token returned by [`TranscriptionController::on_normalized`]-style
/// subscription to the upstream frame source.
struct SourceSubscription {
    normalized_id: u64,
    segment: saraudio_core::Unsubscribe,
}

/// Orchestrates provider lifecycle, preconnect buffering, backpressure,
/// retry/backoff and segment-driven endpointing (§4.7).
pub struct TranscriptionController {
    config: RefCell<ControllerConfig>,
    descriptor: RefCell<ProviderCapabilities>,
    source: Rc<dyn FrameSource>,
    streaming_factory: Option<Rc<dyn StreamingTransportFactory>>,
    chunked_factory: Option<Rc<dyn ChunkedTransportFactory>>,
    connection_factory: Option<Arc<dyn ConnectionFactory>>,
    clock: Rc<dyn Fn() -> u64>,
    shared: Rc<Shared>,
    transport: Rc<RefCell<Option<Transport>>>,
    preconnect: Rc<RefCell<PreconnectBuffer>>,
    subscription: RefCell<Option<SourceSubscription>>,
    connect_lock: Rc<tokio::sync::Mutex<()>>,
    lifecycle_cancel: RefCell<CancellationToken>,
}

impl TranscriptionController {
    /// Builds a controller. `source` is subscribed immediately per §4.7
    /// ("attached on construction").
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ControllerConfig,
        capabilities: ProviderCapabilities,
        source: Rc<dyn FrameSource>,
        streaming_factory: Option<Rc<dyn StreamingTransportFactory>>,
        chunked_factory: Option<Rc<dyn ChunkedTransportFactory>>,
        connection_factory: Option<Arc<dyn ConnectionFactory>>,
        clock: impl Fn() -> u64 + 'static,
    ) -> Self {
        let controller = Self {
            config: RefCell::new(config.clamped()),
            descriptor: RefCell::new(capabilities),
            source,
            streaming_factory,
            chunked_factory,
            connection_factory,
            clock: Rc::new(clock),
            shared: Rc::new(Shared {
                state: Cell::new(ControllerState::Idle),
                last_error: RefCell::new(None),
                last_force_endpoint_ms: Cell::new(None),
                transcript_handlers: RefCell::new(Vec::new()),
                error_handlers: RefCell::new(Vec::new()),
            }),
            transport: Rc::new(RefCell::new(None)),
            preconnect: Rc::new(RefCell::new(PreconnectBuffer::new())),
            subscription: RefCell::new(None),
            connect_lock: Rc::new(tokio::sync::Mutex::new(())),
            lifecycle_cancel: RefCell::new(CancellationToken::new()),
        };
        controller.ensure_subscribed();
        controller
    }

    #[must_use]
    pub fn state(&self) -> ControllerState {
        self.shared.state.get()
    }

    #[must_use]
    pub fn last_error(&self) -> Option<SaraudioError> {
        self.shared.last_error.borrow().clone()
    }

    pub fn on_transcript(&self, handler: impl FnMut(&TranscriptUpdate) + 'static) {
        self.shared.transcript_handlers.borrow_mut().push(Box::new(handler));
    }

    pub fn on_error(&self, handler: impl FnMut(&SaraudioError) + 'static) {
        self.shared.error_handlers.borrow_mut().push(Box::new(handler));
    }

    /// Applies new provider configuration without recreating an active
    /// transport session. The new config takes effect at the next
    /// `connect()` (§4.7 provider-update policy).
    pub fn update_provider(&self, capabilities: ProviderCapabilities) {
        *self.descriptor.borrow_mut() = capabilities;
    }

    /// Exactly one active subscription per controller: a no-op if already
    /// subscribed (§4.7, §8 invariant 9).
    fn ensure_subscribed(&self) {
        if self.subscription.borrow().is_some() {
            return;
        }
        let shared = Rc::clone(&self.shared);
        let transport = Rc::clone(&self.transport);
        let preconnect = Rc::clone(&self.preconnect);
        let cap_ms = self.config.borrow().preconnect_buffer_ms;
        let normalized_id = self.source.on_normalized(Box::new(move |frame: &NormalizedFrame| {
            route_frame(&shared, &transport, &preconnect, cap_ms, frame.clone());
        }));

        let shared = Rc::clone(&self.shared);
        let transport = Rc::clone(&self.transport);
        let clock = Rc::clone(&self.clock);
        let descriptor = self.descriptor.borrow().clone();
        let flush_on_segment_end = self.config.borrow().flush_on_segment_end;
        let segment = self.source.on_segment(Box::new(move |_segment: &Segment| {
            on_segment_boundary(&shared, &transport, &clock, &descriptor, flush_on_segment_end);
        }));

        *self.subscription.borrow_mut() = Some(SourceSubscription { normalized_id, segment });
    }

    /// Connects (or awaits an already in-flight connect) using the
    /// controller's configured transport preference and retry policy.
    /// Redundant concurrent calls coalesce on `connect_lock` (§4.7, §5).
    pub async fn connect(&self, cancel: CancellationToken) -> Result<()> {
        let _guard = self.connect_lock.lock().await;

        if matches!(self.shared.state.get(), ControllerState::Connected | ControllerState::Ready) {
            return Ok(());
        }
        if cancel.is_cancelled() {
            return Err(SaraudioError::Aborted);
        }

        self.ensure_subscribed();
        if self.transport.borrow().is_none() {
            let built = self.build_transport()?;
            *self.transport.borrow_mut() = Some(built);
        }

        let effective_cancel = merge_tokens(cancel, self.lifecycle_cancel.borrow().clone());
        let retry = self.config.borrow().retry;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.shared.state.set(ControllerState::Connecting);

            match self.attempt_connect(effective_cancel.clone()).await {
                Ok(()) => {
                    *self.shared.last_error.borrow_mut() = None;
                    self.on_connected();
                    return Ok(());
                }
                Err(err) => {
                    *self.shared.last_error.borrow_mut() = Some(err.clone());
                    for handler in self.shared.error_handlers.borrow_mut().iter_mut() {
                        handler(&err);
                    }
                    let can_retry = retry.enabled && err.is_retryable() && attempt < retry.max_attempts;
                    if !can_retry {
                        self.shared.state.set(ControllerState::Disconnected);
                        return Err(err);
                    }
                    self.shared.state.set(ControllerState::Retrying);
                    let delay_ms = retry_delay_ms(&retry, attempt, &err);
                    tokio::select! {
                        () = effective_cancel.cancelled() => {
                            self.shared.state.set(ControllerState::Disconnected);
                            return Err(SaraudioError::Aborted);
                        }
                        () = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
                    }
                }
            }
        }
    }

    fn build_transport(&self) -> Result<Transport> {
        let descriptor = self.descriptor.borrow();
        match self.config.borrow().live_transport {
            LiveTransport::Stream => {
                let factory = self.streaming_factory.as_ref().ok_or(SaraudioError::Configuration(
                    "live_transport=stream requires a streaming transport factory".to_string(),
                ))?;
                Ok(Transport::Streaming(factory.build()))
            }
            LiveTransport::Http => {
                let factory = self.chunked_factory.as_ref().ok_or(SaraudioError::Configuration(
                    "live_transport=http requires a chunked transport factory".to_string(),
                ))?;
                Ok(Transport::Chunked(factory.build()))
            }
            LiveTransport::Auto => {
                if descriptor.supports_streaming {
                    if let Some(factory) = &self.streaming_factory {
                        return Ok(Transport::Streaming(factory.build()));
                    }
                }
                if descriptor.supports_http {
                    if let Some(factory) = &self.chunked_factory {
                        return Ok(Transport::Chunked(factory.build()));
                    }
                }
                Err(SaraudioError::Configuration(
                    "no transport factory available for this provider's capabilities".to_string(),
                ))
            }
        }
    }

    async fn attempt_connect(&self, cancel: CancellationToken) -> Result<()> {
        let transport = self.transport.borrow().clone();
        match transport {
            Some(Transport::Streaming(session)) => {
                let factory = self
                    .connection_factory
                    .clone()
                    .ok_or_else(|| SaraudioError::Configuration("no connection factory configured".to_string()))?;
                session.connect(factory, cancel).await
            }
            Some(Transport::Chunked(_)) => Ok(()),
            None => Err(SaraudioError::Aborted),
        }
    }

    /// Marks the controller connected, drains the preconnect buffer into the
    /// transport, and starts the background event pump.
    fn on_connected(&self) {
        self.shared.state.set(ControllerState::Connected);

        let drained = self.preconnect.borrow_mut().drain();
        let transport = self.transport.borrow().clone();
        match &transport {
            Some(Transport::Streaming(session)) => {
                for frame in drained {
                    session.send(frame);
                }
            }
            Some(Transport::Chunked(agg)) => {
                let agg = Arc::clone(agg);
                tokio::task::spawn_local(async move {
                    let mut agg = agg.lock().await;
                    for frame in drained {
                        let _ = agg.push(&frame).await;
                    }
                });
            }
            None => {}
        }

        match transport {
            Some(Transport::Streaming(session)) => self.spawn_session_pump(&session),
            Some(Transport::Chunked(agg)) => self.spawn_aggregator_pump(&agg),
            None => {}
        }
    }

    fn spawn_session_pump(&self, session: &Arc<ProviderSession>) {
        let Some(mut events) = session.take_events() else {
            // Events already taken (shouldn't happen for a freshly built
            // session, but treat it as immediately ready rather than panic).
            self.shared.state.set(ControllerState::Ready);
            return;
        };
        let shared = Rc::clone(&self.shared);
        tokio::task::spawn_local(async move {
            while let Some(event) = events.recv().await {
                match event {
                    SessionEvent::Ready => shared.state.set(ControllerState::Ready),
                    SessionEvent::Transcript(update) => {
                        for handler in shared.transcript_handlers.borrow_mut().iter_mut() {
                            handler(&update);
                        }
                    }
                    SessionEvent::Error(err) => {
                        *shared.last_error.borrow_mut() = Some(err.clone());
                        for handler in shared.error_handlers.borrow_mut().iter_mut() {
                            handler(&err);
                        }
                        if err.is_terminal() {
                            shared.state.set(ControllerState::Error);
                            break;
                        }
                    }
                    SessionEvent::Closed => {
                        shared.state.set(ControllerState::Disconnected);
                        break;
                    }
                }
            }
        });
    }

    fn spawn_aggregator_pump(&self, agg: &Arc<AsyncMutex<HttpAggregator>>) {
        self.shared.state.set(ControllerState::Ready);
        let Some(mut events) = agg.try_lock().ok().and_then(|mut a| a.take_events()) else { return };
        let shared = Rc::clone(&self.shared);
        tokio::task::spawn_local(async move {
            while let Some(event) = events.recv().await {
                match event {
                    crate::aggregator::AggregatorEvent::Transcript(update) => {
                        for handler in shared.transcript_handlers.borrow_mut().iter_mut() {
                            handler(&update);
                        }
                    }
                    crate::aggregator::AggregatorEvent::Error(err) => {
                        *shared.last_error.borrow_mut() = Some(err.clone());
                        for handler in shared.error_handlers.borrow_mut().iter_mut() {
                            handler(&err);
                        }
                    }
                }
            }
        });
    }

    /// Client-initiated disconnect: cancels any pending retry backoff or
    /// in-flight connect attempt, tears down the current transport
    /// (closing the aggregator if one is active), then awaits any connect
    /// in progress to observe the cancellation and exit (§5, §4.7).
    pub async fn disconnect(&self) -> Result<()> {
        self.lifecycle_cancel.borrow().cancel();
        let _guard = self.connect_lock.lock().await;

        if matches!(self.shared.state.get(), ControllerState::Idle | ControllerState::Disconnected) {
            *self.lifecycle_cancel.borrow_mut() = CancellationToken::new();
            return Ok(());
        }

        if let Some(transport) = self.transport.borrow_mut().take() {
            match transport {
                Transport::Streaming(session) => {
                    session.disconnect().await?;
                }
                Transport::Chunked(agg) => {
                    let mut agg = agg.lock().await;
                    agg.close(true).await?;
                }
            }
        }

        self.shared.state.set(ControllerState::Disconnected);
        *self.lifecycle_cancel.borrow_mut() = CancellationToken::new();
        Ok(())
    }

    /// Tears down the upstream subscription. A subsequent `connect()`
    /// re-attaches it (§4.7: "re-attached on each connect() if previously
    /// detached").
    pub fn dispose(&self) {
        if let Some(sub) = self.subscription.borrow_mut().take() {
            self.source.off_normalized(sub.normalized_id);
            sub.segment.unsubscribe();
        }
    }
}

/// Routes one normalized frame per the current controller state (§4.7):
/// buffered while not connected, forwarded to whichever transport is active
/// otherwise.
fn route_frame(
    shared: &Rc<Shared>,
    transport: &Rc<RefCell<Option<Transport>>>,
    preconnect: &Rc<RefCell<PreconnectBuffer>>,
    cap_ms: u64,
    frame: NormalizedFrame,
) {
    match shared.state.get() {
        ControllerState::Connected | ControllerState::Ready => match transport.borrow().as_ref() {
            Some(Transport::Streaming(session)) => session.send(frame),
            Some(Transport::Chunked(agg)) => {
                let agg = Arc::clone(agg);
                tokio::task::spawn_local(async move {
                    let mut agg = agg.lock().await;
                    let _ = agg.push(&frame).await;
                });
            }
            None => preconnect.borrow_mut().push(frame, cap_ms),
        },
        _ => preconnect.borrow_mut().push(frame, cap_ms),
    }
}

/// Handles a `segment` completion: forces endpointing on the active
/// streaming transport if the provider supports it and the cooldown has
/// elapsed (§4.7).
fn on_segment_boundary(
    shared: &Rc<Shared>,
    transport: &Rc<RefCell<Option<Transport>>>,
    clock: &Rc<dyn Fn() -> u64>,
    descriptor: &ProviderCapabilities,
    flush_on_segment_end: bool,
) {
    if !flush_on_segment_end {
        return;
    }
    if !descriptor.supports_force_endpoint {
        tracing::debug!("provider does not support forceEndpoint; ignoring segment-driven endpoint request");
        return;
    }
    let now = (clock)();
    if let Some(last) = shared.last_force_endpoint_ms.get() {
        if now.saturating_sub(last) < crate::config::force_endpoint_cooldown_ms() {
            return;
        }
    }

    if let Some(Transport::Streaming(session)) = transport.borrow().as_ref() {
        shared.last_force_endpoint_ms.set(Some(now));
        let session = Arc::clone(session);
        let message = descriptor.force_endpoint_message.clone().unwrap_or_default();
        tokio::task::spawn_local(async move {
            let _ = session.send_control_text(message).await;
        });
    }
}

/// Backoff delay for `attempt` per the controller's retry config, with a
/// `RateLimit`'s `retry_after_ms` overriding the computed delay when present
/// (§4.7).
fn retry_delay_ms(retry: &crate::config::RetryConfig, attempt: u32, err: &SaraudioError) -> u64 {
    if let SaraudioError::RateLimit { retry_after_ms: Some(ms) } = err {
        return *ms;
    }
    // §8 invariant 10 pins the zero-jitter arithmetic exactly, which only
    // holds if the sample is irrelevant whenever `jitter_ratio == 0.0` —
    // `RetryConfig::delay_ms` multiplies the sample's contribution by
    // `jitter_ratio`, so any sample is safe to draw unconditionally here.
    let jitter_sample = rand::random::<f64>();
    retry.delay_ms(attempt, jitter_sample)
}

/// Combines two cancellation tokens into one that fires when either does.
/// `tokio_util::sync::CancellationToken` only propagates parent->child, so
/// two independently-owned tokens (the caller's `connect()` signal and the
/// controller's internal disconnect-during-backoff signal) need this small
/// watcher task to OR them together. The watcher only touches `Send` types
/// (`CancellationToken`), so a real `tokio::spawn` is fine even though the
/// controller itself is `!Send`.
fn merge_tokens(a: CancellationToken, b: CancellationToken) -> CancellationToken {
    let combined = CancellationToken::new();
    let out = combined.clone();
    tokio::spawn(async move {
        tokio::select! {
            () = a.cancelled() => {}
            () = b.cancelled() => {}
        }
        out.cancel();
    });
    combined
}

#[cfg(test)]
mod tests {
    use super::*;
    use saraudio_core::types::Segment;
    use std::cell::RefCell as StdRefCell;
    use tokio::task::LocalSet;

    /// A trivial in-memory [`FrameSource`] for controller tests: exposes
    /// `emit_normalized`/`emit_segment` so a test can drive the controller's
    /// subscriptions directly without a real Recorder.
    #[derive(Default)]
    struct FakeSource {
        normalized: StdRefCell<Vec<(u64, Box<dyn FnMut(&NormalizedFrame)>)>>,
        segment: StdRefCell<Vec<Box<dyn FnMut(&Segment)>>>,
        next_id: Cell<u64>,
    }

    impl FrameSource for FakeSource {
        fn on_normalized(&self, handler: Box<dyn FnMut(&NormalizedFrame)>) -> u64 {
            let id = self.next_id.get();
            self.next_id.set(id + 1);
            self.normalized.borrow_mut().push((id, handler));
            id
        }

        fn off_normalized(&self, id: u64) {
            self.normalized.borrow_mut().retain(|(hid, _)| *hid != id);
        }

        fn on_segment(&self, handler: Box<dyn FnMut(&Segment)>) -> saraudio_core::Unsubscribe {
            self.segment.borrow_mut().push(handler);
            // No live bus backing this fake; tests don't need to unsubscribe
            // segment handlers, so a no-op-on-drop token is fine here.
            let bus = saraudio_core::EventBus::new();
            bus.on(saraudio_core::EventKind::Error, |_| {})
        }
    }

    impl FakeSource {
        fn emit_normalized(&self, frame: &NormalizedFrame) {
            for (_, handler) in self.normalized.borrow_mut().iter_mut() {
                handler(frame);
            }
        }

        fn emit_segment(&self, segment: &Segment) {
            for handler in self.segment.borrow_mut().iter_mut() {
                handler(segment);
            }
        }

        fn normalized_subscriber_count(&self) -> usize {
            self.normalized.borrow().len()
        }
    }

    fn frame(ts_ms: u64, samples: usize) -> NormalizedFrame {
        NormalizedFrame::new(Arc::new(vec![1i16; samples]), ts_ms, 16000, 1)
    }

    fn segment(id: &str) -> Segment {
        Segment { id: id.to_string(), start_ms: 0, end_ms: 100, sample_rate: 16000, channels: 1, pcm: None }
    }

    #[test]
    fn invariant_9_single_subscription_across_connect_disconnect_cycles() {
        let source = Rc::new(FakeSource::default());
        let controller = TranscriptionController::new(
            ControllerConfig::default(),
            ProviderCapabilities::default(),
            Rc::clone(&source) as Rc<dyn FrameSource>,
            None,
            None,
            None,
            || 0,
        );
        assert_eq!(source.normalized_subscriber_count(), 1);
        controller.dispose();
        controller.ensure_subscribed();
        assert_eq!(source.normalized_subscriber_count(), 1);
    }

    #[test]
    fn scenario_s5_preconnect_buffer_bounds_and_orders_frames() {
        let source = Rc::new(FakeSource::default());
        let config =
            ControllerConfig { preconnect_buffer_ms: 60, ..ControllerConfig::default() };
        let controller = TranscriptionController::new(
            config,
            ProviderCapabilities::default(),
            Rc::clone(&source) as Rc<dyn FrameSource>,
            None,
            None,
            None,
            || 0,
        );

        source.emit_normalized(&frame(0, 320)); // 20ms @16kHz mono
        source.emit_normalized(&frame(20, 320));
        source.emit_normalized(&frame(40, 320));

        let received: Vec<u64> =
            controller.preconnect.borrow().frames.iter().map(|f| f.ts_ms).collect();
        assert_eq!(received, vec![0, 20, 40]);
    }

    #[test]
    fn preconnect_buffer_drops_oldest_above_cap() {
        let mut buf = PreconnectBuffer::new();
        buf.push(frame(0, 320), 30); // 20ms, total 20 <= 30
        buf.push(frame(20, 320), 30); // total 40 > 30, drop nothing yet since len==2... drop oldest
        let remaining: Vec<u64> = buf.frames.iter().map(|f| f.ts_ms).collect();
        assert_eq!(remaining, vec![20]);
    }

    #[tokio::test]
    async fn scenario_s6_segment_endpoint_cooldown() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let source = Rc::new(FakeSource::default());
                let capabilities = ProviderCapabilities {
                    supports_streaming: true,
                    supports_force_endpoint: true,
                    force_endpoint_message: Some("endpoint".to_string()),
                    ..ProviderCapabilities::default()
                };
                let clock = Rc::new(Cell::new(1_000u64));
                let clock_for_ctrl = Rc::clone(&clock);
                let controller = TranscriptionController::new(
                    ControllerConfig::default(),
                    capabilities,
                    Rc::clone(&source) as Rc<dyn FrameSource>,
                    None,
                    None,
                    None,
                    move || clock_for_ctrl.get(),
                );

                // A streaming transport must be attached for forceEndpoint to
                // actually send; attach one directly so the cooldown clock
                // only starts once a request is actually issued.
                let session = Arc::new(ProviderSession::new(
                    "dg",
                    crate::config::SessionConfig::default(),
                ));
                *controller.transport.borrow_mut() = Some(Transport::Streaming(session));

                source.emit_segment(&segment("a"));
                assert!(controller.shared.last_force_endpoint_ms.get().is_some());

                clock.set(1_050);
                let before = controller.shared.last_force_endpoint_ms.get();
                source.emit_segment(&segment("b"));
                assert_eq!(controller.shared.last_force_endpoint_ms.get(), before, "within cooldown");

                clock.set(1_300);
                source.emit_segment(&segment("c"));
                assert_eq!(controller.shared.last_force_endpoint_ms.get(), Some(1_300));
            })
            .await;
    }

    #[tokio::test]
    async fn segment_without_attached_transport_does_not_arm_cooldown() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let source = Rc::new(FakeSource::default());
                let capabilities = ProviderCapabilities {
                    supports_streaming: true,
                    supports_force_endpoint: true,
                    force_endpoint_message: Some("endpoint".to_string()),
                    ..ProviderCapabilities::default()
                };
                let clock = Rc::new(Cell::new(1_000u64));
                let clock_for_ctrl = Rc::clone(&clock);
                let controller = TranscriptionController::new(
                    ControllerConfig::default(),
                    capabilities,
                    Rc::clone(&source) as Rc<dyn FrameSource>,
                    None,
                    None,
                    None,
                    move || clock_for_ctrl.get(),
                );

                // No transport attached: nothing can actually be sent, so
                // the cooldown clock must not be armed by this segment —
                // otherwise a legitimate request shortly after reconnecting
                // would be silently dropped by a cooldown that never fired.
                source.emit_segment(&segment("a"));
                assert!(controller.shared.last_force_endpoint_ms.get().is_none());
            })
            .await;
    }

    #[test]
    fn invariant_10_retry_delay_rate_limit_override() {
        let retry = crate::config::RetryConfig {
            enabled: true,
            max_attempts: 5,
            base_delay_ms: 300,
            factor: 2.0,
            max_delay_ms: 10_000,
            jitter_ratio: 0.0,
        };
        let err = SaraudioError::RateLimit { retry_after_ms: Some(1500) };
        for attempt in 1..=5 {
            assert_eq!(retry_delay_ms(&retry, attempt, &err), 1500);
        }
        let network_err = SaraudioError::Network { transient: true };
        assert_eq!(retry_delay_ms(&retry, 1, &network_err), 300);
        assert_eq!(retry_delay_ms(&retry, 2, &network_err), 600);
    }

    #[tokio::test]
    async fn connect_fails_immediately_when_already_cancelled() {
        let source = Rc::new(FakeSource::default());
        let controller = TranscriptionController::new(
            ControllerConfig::default(),
            ProviderCapabilities::default(),
            Rc::clone(&source) as Rc<dyn FrameSource>,
            None,
            None,
            None,
            || 0,
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = controller.connect(cancel).await;
        assert!(matches!(result, Err(SaraudioError::Aborted)));
    }

    #[tokio::test]
    async fn connect_without_any_transport_factory_is_a_configuration_error() {
        let source = Rc::new(FakeSource::default());
        let controller = TranscriptionController::new(
            ControllerConfig::default(),
            ProviderCapabilities::default(),
            Rc::clone(&source) as Rc<dyn FrameSource>,
            None,
            None,
            None,
            || 0,
        );
        let result = controller.connect(CancellationToken::new()).await;
        assert!(matches!(result, Err(SaraudioError::Configuration(_))));
    }

    #[tokio::test]
    async fn disconnect_while_idle_is_a_noop() {
        let source = Rc::new(FakeSource::default());
        let controller = TranscriptionController::new(
            ControllerConfig::default(),
            ProviderCapabilities::default(),
            Rc::clone(&source) as Rc<dyn FrameSource>,
            None,
            None,
            None,
            || 0,
        );
        controller.disconnect().await.unwrap();
        assert_eq!(controller.state(), ControllerState::Idle);
    }
}
