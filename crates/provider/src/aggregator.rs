// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! HTTP chunking aggregator (C9): accumulates normalized PCM16 frames and
//! flushes WAV-wrapped batches to a provider's batch endpoint on an
//! interval/size trigger, carrying an overlap window across flushes for
//! context continuity.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{mpsc, Semaphore};

use saraudio_core::types::{duration_ms, NormalizedFrame, TranscriptUpdate};
use saraudio_core::{wav, Result, SaraudioError};

use crate::config::AggregatorConfig;
use crate::messages::{results_to_update, ResultsPayload};

/// Submits a flush body to the provider's batch transcription endpoint.
/// Abstracted so [`HttpAggregator`] can be driven in tests without real
/// network I/O; [`ReqwestHttpTransport`] is the production implementation.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn submit(&self, wav_body: Vec<u8>, timeout_ms: u64) -> Result<serde_json::Value>;
}

/// Production [`HttpTransport`] backed by `reqwest`.
pub struct ReqwestHttpTransport {
    client: reqwest::Client,
    endpoint: url::Url,
}

impl ReqwestHttpTransport {
    #[must_use]
    pub fn new(client: reqwest::Client, endpoint: url::Url) -> Self {
        Self { client, endpoint }
    }
}

#[async_trait]
impl HttpTransport for ReqwestHttpTransport {
    async fn submit(&self, wav_body: Vec<u8>, timeout_ms: u64) -> Result<serde_json::Value> {
        let request = self
            .client
            .post(self.endpoint.clone())
            .header(reqwest::header::CONTENT_TYPE, "audio/wav")
            .timeout(Duration::from_millis(timeout_ms))
            .body(wav_body);

        let response = request.send().await.map_err(|e| {
            tracing::debug!(error = %e, "chunk submission failed");
            if e.is_timeout() {
                SaraudioError::Timeout { operation: "aggregator_submit".to_string(), ms: timeout_ms }
            } else {
                SaraudioError::Network { transient: true }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SaraudioError::Provider {
                provider_id: "http".to_string(),
                code: None,
                status: Some(status.as_u16()),
                raw: response.text().await.ok(),
            });
        }

        response.json::<serde_json::Value>().await.map_err(|e| {
            tracing::debug!(error = %e, "failed to decode provider response");
            SaraudioError::Provider { provider_id: "http".to_string(), code: None, status: None, raw: None }
        })
    }
}

/// Events surfaced by [`HttpAggregator`] as batch responses resolve
/// out-of-band from `push`/`force_flush` (flushes run as detached tasks so
/// `maxInFlight` backpressure doesn't serialize on a single response).
#[derive(Debug, Clone)]
pub enum AggregatorEvent {
    Transcript(TranscriptUpdate),
    Error(SaraudioError),
}

struct Format {
    sample_rate: u32,
    channels: u16,
}

/// Accumulates normalized frames and periodically flushes WAV-wrapped
/// batches to a provider's HTTP endpoint (§4.6).
pub struct HttpAggregator {
    provider_id: String,
    config: AggregatorConfig,
    transport: Arc<dyn HttpTransport>,
    format: Option<Format>,
    buffer: Vec<i16>,
    overlap_tail: Vec<i16>,
    last_flush_at: Option<Instant>,
    in_flight: Arc<Semaphore>,
    events_tx: mpsc::UnboundedSender<AggregatorEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<AggregatorEvent>>,
    closed: bool,
}

impl HttpAggregator {
    #[must_use]
    pub fn new(provider_id: impl Into<String>, config: AggregatorConfig, transport: Arc<dyn HttpTransport>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            provider_id: provider_id.into(),
            config,
            transport,
            format: None,
            buffer: Vec::new(),
            overlap_tail: Vec::new(),
            last_flush_at: None,
            in_flight: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
            events_tx,
            events_rx: Some(events_rx),
            closed: false,
        }
    }

    /// Takes the event receiver. Callable once.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<AggregatorEvent>> {
        self.events_rx.take()
    }

    /// Appends `frame` and flushes if the interval/size trigger has been
    /// reached. May suspend while acquiring an in-flight permit (§5).
    pub async fn push(&mut self, frame: &NormalizedFrame) -> Result<()> {
        if self.closed || frame.is_empty() {
            return Ok(());
        }
        if self.format.is_none() {
            self.format = Some(Format { sample_rate: frame.sample_rate, channels: frame.channels });
        }
        self.buffer.extend_from_slice(&frame.pcm);

        if self.should_flush() {
            self.flush().await?;
        }
        Ok(())
    }

    fn should_flush(&self) -> bool {
        let Some(format) = &self.format else { return false };
        let buffered_ms = duration_ms(self.buffer.len(), format.channels, format.sample_rate);
        if buffered_ms < self.config.min_duration_ms as f64 {
            return false;
        }
        let since_last = self.last_flush_at.map_or(f64::INFINITY, |t| t.elapsed().as_secs_f64() * 1000.0);
        buffered_ms >= self.config.interval_ms as f64 || since_last >= self.config.interval_ms as f64
    }

    /// Flushes unconditionally regardless of the interval trigger, as long
    /// as there is buffered audio.
    pub async fn force_flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.flush().await
    }

    /// Closes the aggregator. When `drain_if_possible` is true, performs one
    /// final flush of any buffered audio regardless of trigger state; an
    /// in-flight flush already running is not waited on (§5).
    pub async fn close(&mut self, drain_if_possible: bool) -> Result<()> {
        if drain_if_possible && !self.buffer.is_empty() {
            self.flush().await?;
        }
        self.closed = true;
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        let Some(format) = &self.format else { return Ok(()) };
        let overlap_samples =
            overlap_sample_count(self.config.overlap_ms, format.sample_rate, format.channels);

        let mut body = std::mem::take(&mut self.overlap_tail);
        body.extend_from_slice(&self.buffer);
        self.buffer.clear();
        self.last_flush_at = Some(Instant::now());

        self.overlap_tail = body[body.len().saturating_sub(overlap_samples)..].to_vec();

        let wav_body = wav::encode(&body, format.sample_rate, format.channels);
        let timeout_ms = self.config.timeout_ms;
        let provider_id = self.provider_id.clone();
        let transport = Arc::clone(&self.transport);
        let events_tx = self.events_tx.clone();

        // §5: push may backpressure on maxInFlight — awaiting the permit
        // here is that backpressure point.
        let permit = Arc::clone(&self.in_flight)
            .acquire_owned()
            .await
            .map_err(|_| SaraudioError::Aborted)?;

        tokio::spawn(async move {
            let _permit = permit;
            match transport.submit(wav_body, timeout_ms).await {
                Ok(value) => {
                    let update = match serde_json::from_value::<ResultsPayload>(value) {
                        Ok(payload) => results_to_update(&provider_id, &payload),
                        Err(_) => None,
                    };
                    let update = update.unwrap_or(TranscriptUpdate {
                        provider_id: provider_id.clone(),
                        tokens: Vec::new(),
                        finalize: Some(true),
                        span: None,
                        language: None,
                        turn_id: None,
                        provider_metadata: None,
                        raw: None,
                    });
                    let finalized = TranscriptUpdate { finalize: Some(true), ..update };
                    let _ = events_tx.send(AggregatorEvent::Transcript(finalized));
                }
                Err(err) => {
                    let _ = events_tx.send(AggregatorEvent::Error(err));
                }
            }
        });

        Ok(())
    }
}

/// Number of interleaved samples corresponding to `overlap_ms` at the given
/// format.
fn overlap_sample_count(overlap_ms: u64, sample_rate: u32, channels: u16) -> usize {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let samples = (overlap_ms as f64 / 1000.0 * f64::from(sample_rate) * f64::from(channels)).round() as usize;
    samples
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct FakeTransport {
        calls: StdMutex<Vec<Vec<u8>>>,
        response: serde_json::Value,
    }

    #[async_trait]
    impl HttpTransport for FakeTransport {
        async fn submit(&self, wav_body: Vec<u8>, _timeout_ms: u64) -> Result<serde_json::Value> {
            self.calls.lock().unwrap().push(wav_body);
            Ok(self.response.clone())
        }
    }

    fn frame(samples: usize, sample_rate: u32) -> NormalizedFrame {
        NormalizedFrame::new(Arc::new(vec![42i16; samples]), 0, sample_rate, 1)
    }

    fn config(interval_ms: u64, min_duration_ms: u64, overlap_ms: u64) -> AggregatorConfig {
        AggregatorConfig { interval_ms, min_duration_ms, overlap_ms, max_in_flight: 2, timeout_ms: 5000 }
    }

    #[tokio::test]
    async fn push_below_min_duration_does_not_flush() {
        let transport = Arc::new(FakeTransport {
            calls: StdMutex::new(Vec::new()),
            response: serde_json::json!({}),
        });
        let mut aggregator = HttpAggregator::new("batch", config(5000, 1000, 0), Arc::clone(&transport) as _);
        // 100ms at 16kHz mono: below the 1000ms minimum.
        aggregator.push(&frame(1600, 16000)).await.unwrap();
        tokio::task::yield_now().await;
        assert!(transport.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn force_flush_submits_buffered_audio() {
        let transport = Arc::new(FakeTransport {
            calls: StdMutex::new(Vec::new()),
            response: serde_json::json!({"is_final": true, "speech_final": true}),
        });
        let mut aggregator =
            HttpAggregator::new("batch", config(5000, 1000, 0), Arc::clone(&transport) as _);
        aggregator.push(&frame(1600, 16000)).await.unwrap();
        aggregator.force_flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(transport.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn overlap_window_is_carried_into_next_flush() {
        let transport = Arc::new(FakeTransport {
            calls: StdMutex::new(Vec::new()),
            response: serde_json::json!({}),
        });
        // 100ms overlap at 16kHz mono = 1600 samples.
        let mut aggregator =
            HttpAggregator::new("batch", config(100, 0, 100), Arc::clone(&transport) as _);
        aggregator.push(&frame(1600, 16000)).await.unwrap();
        aggregator.force_flush().await.unwrap();
        aggregator.push(&frame(1600, 16000)).await.unwrap();
        aggregator.force_flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let calls = transport.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        // Second body = 1600 overlap samples + 1600 new samples, plus header.
        assert_eq!(calls[1].len(), wav::HEADER_LEN + 3200 * 2);
    }

    #[tokio::test]
    async fn close_without_drain_does_not_flush_remaining_buffer() {
        let transport = Arc::new(FakeTransport {
            calls: StdMutex::new(Vec::new()),
            response: serde_json::json!({}),
        });
        let mut aggregator =
            HttpAggregator::new("batch", config(5000, 1000, 0), Arc::clone(&transport) as _);
        aggregator.push(&frame(1600, 16000)).await.unwrap();
        aggregator.close(false).await.unwrap();
        assert!(transport.calls.lock().unwrap().is_empty());
    }
}
