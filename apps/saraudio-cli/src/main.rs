// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Minimal demo binary: streams a local WAV file through a
//! [`saraudio_engine::Recorder`] into a
//! [`saraudio_provider::TranscriptionController`] and prints transcript
//! updates as they arrive. Contains no domain logic of its own — it only
//! exercises the four library crates' public surface against a live
//! provider endpoint.

mod config;
mod logging;
mod wav_input;

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use saraudio_core::types::{Frame, NormalizedFrame, Samples, Segment};
use saraudio_core::{FrameSource, Unsubscribe};
use saraudio_engine::{Recorder, RecorderOptions, SegmenterInput};
use saraudio_nodes::TargetFormat;
use saraudio_provider::aggregator::{HttpAggregator, ReqwestHttpTransport};
use saraudio_provider::session::{ConnectionFactory, ProviderSession, Socket, TungsteniteSocket};
use saraudio_provider::{
    ChunkedTransportFactory, ProviderCapabilities, StreamingTransportFactory, TranscriptionController,
};

#[derive(Parser, Debug)]
#[command(name = "saraudio-cli", about = "Stream a WAV file through saraudio and print transcripts")]
struct Cli {
    /// Path to a TOML config file (see `config.rs` for the schema).
    #[arg(long, default_value = "saraudio-cli.toml")]
    config: String,

    /// Overrides `input` from the config file.
    #[arg(long)]
    input: Option<String>,

    /// Sleeps between pushed frames to mimic real-time microphone capture.
    #[arg(long)]
    realtime: bool,
}

/// Adapts a shared [`Recorder`] to [`FrameSource`]: the controller only
/// needs `&self` subscription methods, which `Recorder` already exposes, so
/// this just forwards through the `RefCell` borrow used for the `&mut self`
/// methods (`push`/`configure`) the rest of `main` calls directly.
struct RecorderSource(Rc<RefCell<Recorder>>);

impl FrameSource for RecorderSource {
    fn on_normalized(&self, handler: Box<dyn FnMut(&NormalizedFrame)>) -> u64 {
        self.0.borrow().on_normalized(handler)
    }

    fn off_normalized(&self, id: u64) {
        self.0.borrow().off_normalized(id);
    }

    fn on_segment(&self, handler: Box<dyn FnMut(&Segment)>) -> Unsubscribe {
        self.0.borrow().on_segment(handler)
    }
}

struct WsConnectionFactory {
    url: url::Url,
    subprotocols: Vec<String>,
}

#[async_trait::async_trait]
impl ConnectionFactory for WsConnectionFactory {
    async fn connect(&self, _cancel: &CancellationToken) -> saraudio_core::Result<Box<dyn Socket>> {
        let socket = TungsteniteSocket::connect(&self.url, &self.subprotocols).await?;
        Ok(Box::new(socket))
    }
}

struct StreamFactory {
    provider_id: String,
    session: saraudio_provider::config::SessionConfig,
}

impl StreamingTransportFactory for StreamFactory {
    fn build(&self) -> Arc<ProviderSession> {
        Arc::new(ProviderSession::new(self.provider_id.clone(), self.session))
    }
}

struct HttpFactory {
    provider_id: String,
    aggregator: saraudio_provider::config::AggregatorConfig,
    client: reqwest::Client,
    endpoint: url::Url,
}

impl ChunkedTransportFactory for HttpFactory {
    fn build(&self) -> Arc<AsyncMutex<HttpAggregator>> {
        let transport = Arc::new(ReqwestHttpTransport::new(self.client.clone(), self.endpoint.clone()));
        Arc::new(AsyncMutex::new(HttpAggregator::new(self.provider_id.clone(), self.aggregator, transport)))
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut cfg = config::load(&cli.config).map_err(|e| anyhow::anyhow!("failed to load config: {e}"))?;
    if let Some(input) = cli.input {
        cfg.input = input;
    }

    let _guard = logging::init_logging(&cfg.log)?;

    tracing::info!(input = %cfg.input, provider = %cfg.provider.url, "starting saraudio-cli demo");

    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, run(cfg, cli.realtime))
}

async fn run(cfg: config::Config, realtime: bool) -> anyhow::Result<()> {
    let wav = wav_input::read(&cfg.input)?;
    tracing::info!(
        sample_rate = wav.sample_rate,
        channels = wav.channels,
        samples = wav.samples.len(),
        "loaded WAV input"
    );

    let recorder = Rc::new(RefCell::new(Recorder::new(now_ms, uuid_like_id)));

    recorder.borrow_mut().configure(RecorderOptions {
        target_format: Some(TargetFormat { sample_rate: cfg.provider.sample_rate, channels: cfg.provider.channels }),
        segmenter: Some(SegmenterInput::Disabled),
        ..RecorderOptions::default()
    });

    let capabilities = ProviderCapabilities {
        supports_streaming: matches!(cfg.provider.kind, config::ProviderKind::Stream),
        supports_http: matches!(cfg.provider.kind, config::ProviderKind::Http),
        supports_force_endpoint: cfg.provider.supports_force_endpoint,
        force_endpoint_message: cfg.provider.force_endpoint_message.clone(),
    };

    let url = url::Url::parse(&cfg.provider.url)?;

    let (streaming_factory, chunked_factory, connection_factory): (
        Option<Rc<dyn StreamingTransportFactory>>,
        Option<Rc<dyn ChunkedTransportFactory>>,
        Option<Arc<dyn ConnectionFactory>>,
    ) = match cfg.provider.kind {
        config::ProviderKind::Stream => (
            Some(Rc::new(StreamFactory {
                provider_id: cfg.provider.id.clone(),
                session: cfg.provider.controller.session,
            })),
            None,
            Some(Arc::new(WsConnectionFactory { url, subprotocols: cfg.provider.subprotocols.clone() })),
        ),
        config::ProviderKind::Http => (
            None,
            Some(Rc::new(HttpFactory {
                provider_id: cfg.provider.id.clone(),
                aggregator: cfg.provider.controller.chunking,
                client: reqwest::Client::new(),
                endpoint: url,
            })),
            None,
        ),
    };

    let controller = Rc::new(TranscriptionController::new(
        cfg.provider.controller,
        capabilities,
        Rc::new(RecorderSource(Rc::clone(&recorder))) as Rc<dyn FrameSource>,
        streaming_factory,
        chunked_factory,
        connection_factory,
        now_ms,
    ));

    controller.on_transcript(|update| {
        for token in &update.tokens {
            if token.is_final {
                println!("{}", token.text);
            } else {
                tracing::debug!(text = %token.text, "partial transcript");
            }
        }
    });
    controller.on_error(|err| {
        tracing::warn!(error = ?err, "provider error");
    });

    controller.connect(CancellationToken::new()).await?;
    tracing::info!(state = ?controller.state(), "connected to provider");

    let frame_samples_per_channel = (wav.sample_rate as usize * 20) / 1000;
    let frame_len = frame_samples_per_channel * wav.channels as usize;
    let mut ts_ms: u64 = 0;

    for chunk in wav.samples.chunks(frame_len.max(1)) {
        let frame = Frame::new(Samples::I16(Arc::new(chunk.to_vec())), ts_ms, wav.sample_rate, wav.channels);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let advance_ms = frame.duration_ms() as u64;
        ts_ms += advance_ms;
        recorder.borrow_mut().push(frame);

        if realtime {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    // Let any final in-flight provider responses arrive before tearing down.
    tokio::time::sleep(Duration::from_millis(500)).await;

    controller.disconnect().await?;
    tracing::info!(state = ?controller.state(), "disconnected");

    Ok(())
}

#[allow(clippy::cast_possible_truncation)]
fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn uuid_like_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("seg-{n:016x}")
}
