// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Provider streaming session (C8): socket lifecycle, inbound message
//! parsing, keepalive, a duration-bounded outbound send queue, and
//! close-code/error-shape mapping.
//!
//! The socket itself is abstracted behind [`Socket`]/[`ConnectionFactory`]
//! so the session can be driven in tests without a live network peer;
//! [`TungsteniteSocket`] is the production transport, built on
//! `tokio-tungstenite` the way the wider toolkit's realtime STT adapters
//! drive `connect_async`. Every method takes `&self`: a [`ProviderSession`]
//! is meant to live behind an `Arc` and be shared with whatever owns its
//! lifecycle (the transcription controller).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use url::Url;

use saraudio_core::types::NormalizedFrame;
use saraudio_core::{Result, SaraudioError};

use crate::config::SessionConfig;
use crate::messages::{
    map_close, parse_server_message, results_to_update, utterance_end_to_update, ServerMessage,
};

/// One inbound socket event, abstracted away from the underlying transport.
pub enum SocketEvent {
    Text(String),
    Binary(Vec<u8>),
    Close { code: u16, reason: String, was_clean: bool },
}

/// Transport abstraction a [`ProviderSession`] drives. Exactly one `Socket`
/// is owned by a session at a time.
#[async_trait]
pub trait Socket: Send {
    async fn send_binary(&mut self, data: Vec<u8>) -> Result<()>;
    async fn send_text(&mut self, text: String) -> Result<()>;
    async fn close(&mut self, code: u16, reason: String) -> Result<()>;
    /// Awaits the next event; `None` once the peer has gone away without a
    /// close frame (e.g. the TCP connection dropped).
    async fn recv(&mut self) -> Option<SocketEvent>;
}

/// Builds a [`Socket`] for a connect attempt. Returns the URL and the
/// subprotocol list the handshake should advertise (§4.5): auth, model
/// selection etc. are the caller's concern via whatever URL/headers it
/// builds here.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(&self, cancel: &CancellationToken) -> Result<Box<dyn Socket>>;
}

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Production [`Socket`] backed by `tokio-tungstenite`.
pub struct TungsteniteSocket {
    inner: WsStream,
}

impl TungsteniteSocket {
    /// Connects to `url` with the given subprotocols and wraps the stream.
    pub async fn connect(url: &Url, subprotocols: &[String]) -> Result<Self> {
        use tokio_tungstenite::tungstenite::client::IntoClientRequest;
        let mut request = url.as_str().into_client_request().map_err(|e| {
            tracing::debug!(error = %e, "malformed provider url");
            SaraudioError::Network { transient: false }
        })?;
        if !subprotocols.is_empty() {
            let value = subprotocols.join(", ");
            request.headers_mut().insert(
                "Sec-WebSocket-Protocol",
                value.parse().map_err(|_| SaraudioError::Network { transient: false })?,
            );
        }
        let (stream, _response) = tokio_tungstenite::connect_async(request).await.map_err(|e| {
            tracing::debug!(error = %e, "websocket handshake failed");
            SaraudioError::Network { transient: true }
        })?;
        Ok(Self { inner: stream })
    }
}

#[async_trait]
impl Socket for TungsteniteSocket {
    async fn send_binary(&mut self, data: Vec<u8>) -> Result<()> {
        self.inner.send(WsMessage::Binary(data.into())).await.map_err(transport_error)
    }

    async fn send_text(&mut self, text: String) -> Result<()> {
        self.inner.send(WsMessage::Text(text.into())).await.map_err(transport_error)
    }

    async fn close(&mut self, code: u16, reason: String) -> Result<()> {
        let frame = tokio_tungstenite::tungstenite::protocol::CloseFrame {
            code: tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode::from(code),
            reason: reason.into(),
        };
        self.inner.send(WsMessage::Close(Some(frame))).await.map_err(transport_error)
    }

    async fn recv(&mut self) -> Option<SocketEvent> {
        loop {
            let message = self.inner.next().await?.ok()?;
            return Some(match message {
                WsMessage::Text(text) => SocketEvent::Text(text.to_string()),
                WsMessage::Binary(data) => SocketEvent::Binary(data.to_vec()),
                WsMessage::Close(frame) => {
                    let (code, reason) = frame.map_or((1005, String::new()), |f| {
                        (u16::from(f.code), f.reason.to_string())
                    });
                    SocketEvent::Close { code, reason, was_clean: true }
                }
                WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => continue,
            });
        }
    }
}

fn transport_error(cause: tokio_tungstenite::tungstenite::Error) -> SaraudioError {
    tracing::debug!(error = %cause, "socket transport error");
    SaraudioError::Network { transient: true }
}

/// Lifecycle states of a [`ProviderSession`] (§4.5 state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Ready,
    Disconnected,
    Error,
}

/// One pending outbound frame plus its precomputed duration.
struct QueuedFrame {
    frame: NormalizedFrame,
    duration_ms: f64,
}

/// Events a [`ProviderSession`] surfaces to its owner (the transcription
/// controller), in wire arrival order (§5).
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Ready,
    Transcript(saraudio_core::types::TranscriptUpdate),
    Error(SaraudioError),
    Closed,
}

const KEEPALIVE_TEXT: &str = r#"{"type":"KeepAlive"}"#;
const CLOSE_STREAM_TEXT: &str = r#"{"type":"CloseStream"}"#;

enum WriterCommand {
    FlushQueue,
    SendText(String),
    Close { code: u16, farewell_text: Option<String> },
}

/// Mutable runtime state owned by the currently active connection attempt:
/// the command channel into the writer task and its join handles. Held
/// behind a `tokio::sync::Mutex` so `connect`/`disconnect` can take `&self`.
#[derive(Default)]
struct Runtime {
    socket_tx: Option<mpsc::UnboundedSender<WriterCommand>>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

struct Shared {
    state: Mutex<SessionState>,
    queue: std::sync::Mutex<VecDeque<QueuedFrame>>,
    queue_total_ms: std::sync::Mutex<f64>,
    generation: AtomicU64,
}

/// One live (or about-to-be-live) socket-based transcription session.
///
/// Outbound `send` never suspends: it enqueues into a duration-bounded
/// queue and wakes the writer task, which performs the actual socket I/O.
/// Every method takes `&self`, so a session is meant to be wrapped in an
/// `Arc` and shared freely; `connect`/`disconnect` serialize via an internal
/// lock rather than requiring exclusive ownership.
pub struct ProviderSession {
    provider_id: String,
    config: SessionConfig,
    shared: Arc<Shared>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<SessionEvent>>>,
    runtime: Mutex<Runtime>,
    connect_lock: Mutex<()>,
}

impl ProviderSession {
    #[must_use]
    pub fn new(provider_id: impl Into<String>, config: SessionConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            provider_id: provider_id.into(),
            config: config.clamped(),
            shared: Arc::new(Shared {
                state: Mutex::new(SessionState::Idle),
                queue: std::sync::Mutex::new(VecDeque::new()),
                queue_total_ms: std::sync::Mutex::new(0.0),
                generation: AtomicU64::new(0),
            }),
            events_tx,
            events_rx: std::sync::Mutex::new(Some(events_rx)),
            runtime: Mutex::new(Runtime::default()),
            connect_lock: Mutex::new(()),
        }
    }

    /// Takes the event receiver. Callable once; subsequent calls return
    /// `None`. The transcription controller drains this to receive
    /// `ready`/transcript/`error` notifications in wire arrival order.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        self.events_rx.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take()
    }

    #[must_use]
    pub async fn state(&self) -> SessionState {
        *self.shared.state.lock().await
    }

    /// Connects using `factory`. Redundant concurrent calls coalesce: if a
    /// connect is already in flight, this awaits it rather than starting a
    /// second socket (§4.5, §5).
    pub async fn connect(&self, factory: Arc<dyn ConnectionFactory>, cancel: CancellationToken) -> Result<()> {
        let _connect_guard = self.connect_lock.lock().await;

        if cancel.is_cancelled() {
            return Err(SaraudioError::Aborted);
        }
        {
            let state = *self.shared.state.lock().await;
            if matches!(state, SessionState::Connected | SessionState::Ready) {
                return Ok(());
            }
        }

        *self.shared.state.lock().await = SessionState::Connecting;
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let socket = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                *self.shared.state.lock().await = SessionState::Error;
                return Err(SaraudioError::Aborted);
            }
            result = factory.connect(&cancel) => result?,
        };

        *self.shared.state.lock().await = SessionState::Connected;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<WriterCommand>();
        let handle = spawn_session_task(
            socket,
            Arc::clone(&self.shared),
            generation,
            self.provider_id.clone(),
            self.config,
            self.events_tx.clone(),
            cmd_rx,
            cancel,
        );

        let mut runtime = self.runtime.lock().await;
        runtime.socket_tx = Some(cmd_tx);
        runtime.tasks.push(handle);

        // Kick an initial flush in case frames were enqueued before connect.
        if let Some(tx) = &runtime.socket_tx {
            let _ = tx.send(WriterCommand::FlushQueue);
        }

        Ok(())
    }

    /// Client-initiated close: sends a best-effort `CloseStream` text
    /// message, then closes with code 1000. Redundant calls while already
    /// disconnected/disconnecting are no-ops.
    pub async fn disconnect(&self) -> Result<()> {
        let _connect_guard = self.connect_lock.lock().await;
        let state = *self.shared.state.lock().await;
        if matches!(state, SessionState::Idle | SessionState::Disconnected) {
            return Ok(());
        }
        self.shared.generation.fetch_add(1, Ordering::SeqCst);

        let mut runtime = self.runtime.lock().await;
        if let Some(tx) = runtime.socket_tx.take() {
            let _ = tx.send(WriterCommand::Close {
                code: 1000,
                farewell_text: Some(CLOSE_STREAM_TEXT.to_string()),
            });
        }
        *self.shared.state.lock().await = SessionState::Disconnected;
        for task in runtime.tasks.drain(..) {
            task.abort();
        }
        Ok(())
    }

    /// Enqueues `frame` for transmission. Never suspends (§5): the actual
    /// socket write happens on the writer task, woken after this returns.
    ///
    /// Rejects zero-length frames silently. Applies the send-queue budget
    /// (§4.5 step 4): while the tracked total exceeds `queue_budget_ms` and
    /// more than one frame remains queued, the oldest frame is dropped.
    pub fn send(&self, frame: NormalizedFrame) {
        if frame.is_empty() {
            return;
        }
        let duration_ms = frame.duration_ms();
        let shared = &self.shared;
        #[allow(clippy::cast_precision_loss)]
        let budget = self.config.queue_budget_ms as f64;

        let mut queue = shared.queue.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut total = shared.queue_total_ms.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        queue.push_back(QueuedFrame { frame, duration_ms });
        *total += duration_ms;

        while *total > budget && queue.len() > 1 {
            if let Some(dropped) = queue.pop_front() {
                *total -= dropped.duration_ms;
                tracing::warn!(
                    queued_ms = *total,
                    budget_ms = budget,
                    "send-queue budget exceeded, dropping oldest frame"
                );
            }
        }
        drop(total);
        drop(queue);

        if let Ok(runtime) = self.runtime.try_lock() {
            if let Some(tx) = &runtime.socket_tx {
                let _ = tx.send(WriterCommand::FlushQueue);
            }
        }
        // If the runtime lock is contended (a connect/disconnect is in
        // flight), the in-progress `connect` already schedules an initial
        // flush once it installs the new `socket_tx`, so no wake is lost.
    }

    /// Sends a raw text control message (e.g. a provider-specific
    /// force-endpoint request) outside the audio send queue. Fails with
    /// [`SaraudioError::Aborted`] if no socket is currently attached.
    pub async fn send_control_text(&self, text: String) -> Result<()> {
        let runtime = self.runtime.lock().await;
        match &runtime.socket_tx {
            Some(tx) => tx.send(WriterCommand::SendText(text)).map_err(|_| SaraudioError::Aborted),
            None => Err(SaraudioError::Aborted),
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn spawn_session_task(
    mut socket: Box<dyn Socket>,
    shared: Arc<Shared>,
    generation: u64,
    provider_id: String,
    config: SessionConfig,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    mut cmd_rx: mpsc::UnboundedReceiver<WriterCommand>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ready_sent = false;
        let mut keepalive =
            tokio::time::interval(std::time::Duration::from_millis(config.keepalive_interval_ms));
        keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            if shared.generation.load(Ordering::SeqCst) != generation {
                return;
            }
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    let _ = socket.close(1000, String::new()).await;
                    return;
                }
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(WriterCommand::FlushQueue) => {
                            flush_queue(&mut socket, &shared).await;
                        }
                        Some(WriterCommand::SendText(text)) => {
                            let _ = socket.send_text(text).await;
                        }
                        Some(WriterCommand::Close { code, farewell_text }) => {
                            if let Some(text) = farewell_text {
                                let _ = socket.send_text(text).await;
                            }
                            let _ = socket.close(code, String::new()).await;
                            return;
                        }
                        None => return,
                    }
                }
                _ = keepalive.tick() => {
                    let state = *shared.state.lock().await;
                    if matches!(state, SessionState::Connected | SessionState::Ready) {
                        let _ = socket.send_text(KEEPALIVE_TEXT.to_string()).await;
                    }
                }
                inbound = socket.recv() => {
                    match inbound {
                        Some(SocketEvent::Binary(_)) => {
                            // Non-text (binary) messages are ignored (§4.5).
                        }
                        Some(SocketEvent::Text(text)) => {
                            if shared.generation.load(Ordering::SeqCst) != generation {
                                return;
                            }
                            handle_text_message(&provider_id, &text, &mut ready_sent, &events_tx);
                        }
                        Some(SocketEvent::Close { code, reason, was_clean }) => {
                            *shared.state.lock().await = SessionState::Disconnected;
                            if let Some(err) = map_close(&provider_id, code, &reason, was_clean) {
                                let _ = events_tx.send(SessionEvent::Error(err));
                            }
                            let _ = events_tx.send(SessionEvent::Closed);
                            return;
                        }
                        None => {
                            *shared.state.lock().await = SessionState::Disconnected;
                            let _ = events_tx.send(SessionEvent::Closed);
                            return;
                        }
                    }
                }
            }
        }
    })
}

fn handle_text_message(
    provider_id: &str,
    text: &str,
    ready_sent: &mut bool,
    events_tx: &mpsc::UnboundedSender<SessionEvent>,
) {
    let Some(message) = parse_server_message(provider_id, text) else {
        tracing::warn!(provider_id, "failed to parse inbound provider message");
        return;
    };
    match message {
        ServerMessage::Error(err) => {
            let _ = events_tx.send(SessionEvent::Error(err));
        }
        ServerMessage::Ready => {
            if !*ready_sent {
                *ready_sent = true;
                let _ = events_tx.send(SessionEvent::Ready);
            }
        }
        ServerMessage::Results(payload) => {
            if !*ready_sent {
                *ready_sent = true;
                let _ = events_tx.send(SessionEvent::Ready);
            }
            if let Some(update) = results_to_update(provider_id, &payload) {
                let _ = events_tx.send(SessionEvent::Transcript(update));
            }
        }
        ServerMessage::UtteranceEnd { channel, last_word_end_ms } => {
            let update = utterance_end_to_update(provider_id, channel, last_word_end_ms);
            let _ = events_tx.send(SessionEvent::Transcript(update));
        }
    }
}

/// Drains the send queue while the socket is open, transmitting each
/// frame's PCM buffer as a binary message in pop order (oldest first). On
/// send failure, logs and aborts this flushing pass (§4.5 step 5).
async fn flush_queue(socket: &mut Box<dyn Socket>, shared: &Arc<Shared>) {
    loop {
        let next = {
            let mut queue = shared.queue.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            queue.pop_front()
        };
        let Some(queued) = next else { break };
        {
            let mut total =
                shared.queue_total_ms.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            *total -= queued.duration_ms;
        }
        let bytes: Vec<u8> = queued.frame.pcm.iter().flat_map(|s| s.to_le_bytes()).collect();
        if let Err(err) = socket.send_binary(bytes).await {
            tracing::warn!(?err, "failed to send audio frame, aborting flush pass");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc as StdArc;

    struct FakeSocket {
        inbound: VecDeque<SocketEvent>,
        sent_binary: StdArc<Mutex<Vec<Vec<u8>>>>,
        sent_text: StdArc<Mutex<Vec<String>>>,
        open: StdArc<AtomicUsize>,
    }

    #[async_trait]
    impl Socket for FakeSocket {
        async fn send_binary(&mut self, data: Vec<u8>) -> Result<()> {
            self.sent_binary.lock().await.push(data);
            Ok(())
        }
        async fn send_text(&mut self, text: String) -> Result<()> {
            self.sent_text.lock().await.push(text);
            Ok(())
        }
        async fn close(&mut self, _code: u16, _reason: String) -> Result<()> {
            self.open.store(0, Ordering::SeqCst);
            Ok(())
        }
        async fn recv(&mut self) -> Option<SocketEvent> {
            if let Some(event) = self.inbound.pop_front() {
                return Some(event);
            }
            std::future::pending::<()>().await;
            None
        }
    }

    struct FakeFactory {
        sent_binary: StdArc<Mutex<Vec<Vec<u8>>>>,
        sent_text: StdArc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ConnectionFactory for FakeFactory {
        async fn connect(&self, _cancel: &CancellationToken) -> Result<Box<dyn Socket>> {
            Ok(Box::new(FakeSocket {
                inbound: VecDeque::new(),
                sent_binary: StdArc::clone(&self.sent_binary),
                sent_text: StdArc::clone(&self.sent_text),
                open: StdArc::new(AtomicUsize::new(1)),
            }))
        }
    }

    fn normalized_frame(duration_samples: usize) -> NormalizedFrame {
        NormalizedFrame::new(Arc::new(vec![100i16; duration_samples]), 0, 16000, 1)
    }

    #[tokio::test]
    async fn scenario_s3_send_queue_drops_oldest() {
        let sent_binary = StdArc::new(Mutex::new(Vec::new()));
        let sent_text = StdArc::new(Mutex::new(Vec::new()));
        let factory: Arc<dyn ConnectionFactory> = Arc::new(FakeFactory {
            sent_binary: StdArc::clone(&sent_binary),
            sent_text: StdArc::clone(&sent_text),
        });

        let session = ProviderSession::new("dg", SessionConfig { keepalive_interval_ms: 8000, queue_budget_ms: 200 });

        // 100ms frames at 16kHz mono = 1600 samples.
        session.send(normalized_frame(1600));
        session.send(normalized_frame(1600));
        session.send(normalized_frame(1600));

        session.connect(factory, CancellationToken::new()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let sent = sent_binary.lock().await;
        assert_eq!(sent.len(), 2, "exactly two of the three 100ms frames should have been transmitted");
    }

    #[tokio::test]
    async fn zero_length_frame_is_rejected_silently() {
        let session = ProviderSession::new("dg", SessionConfig::default());
        session.send(normalized_frame(0));
        assert_eq!(session.shared.queue.lock().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn cancelled_signal_aborts_connect_with_aborted() {
        let factory: Arc<dyn ConnectionFactory> = Arc::new(FakeFactory {
            sent_binary: StdArc::new(Mutex::new(Vec::new())),
            sent_text: StdArc::new(Mutex::new(Vec::new())),
        });
        let cancel = CancellationToken::new();
        cancel.cancel();
        let session = ProviderSession::new("dg", SessionConfig::default());
        let result = session.connect(factory, cancel).await;
        assert!(matches!(result, Err(SaraudioError::Aborted)));
    }

    #[tokio::test]
    async fn redundant_connect_while_connected_is_a_noop() {
        let factory: Arc<dyn ConnectionFactory> = Arc::new(FakeFactory {
            sent_binary: StdArc::new(Mutex::new(Vec::new())),
            sent_text: StdArc::new(Mutex::new(Vec::new())),
        });
        let session = ProviderSession::new("dg", SessionConfig::default());
        session.connect(Arc::clone(&factory), CancellationToken::new()).await.unwrap();
        session.connect(factory, CancellationToken::new()).await.unwrap();
        assert_eq!(session.runtime.lock().await.tasks.len(), 1);
    }
}
