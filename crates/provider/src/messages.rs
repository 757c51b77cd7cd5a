// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Inbound wire message parsing (§4.5.1/§6.2) and close-code/error-shape
//! mapping (§4.5.2) for the provider streaming session.
//!
//! The wire contract is provider-agnostic by design: messages are dispatched
//! by *shape* (which fields are present), not by a single discriminating
//! `type` string, since different providers spell "ready" and "results"
//! differently.

use std::collections::HashMap;

use saraudio_core::constants::clamp_u64;
use saraudio_core::types::{TranscriptToken, TranscriptUpdate};
use saraudio_core::SaraudioError;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
struct RawWord {
    word: String,
    #[serde(default)]
    punctuated_word: Option<String>,
    start: f64,
    end: f64,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    speaker: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawAlternative {
    #[serde(default)]
    transcript: Option<String>,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    words: Option<Vec<RawWord>>,
    #[serde(default)]
    languages: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawChannel {
    alternatives: Vec<RawAlternative>,
}

/// A results-shaped server message, after shape dispatch has identified it
/// as such.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultsPayload {
    #[serde(default)]
    channel: Option<RawChannel>,
    #[serde(default)]
    is_final: bool,
    #[serde(default)]
    speech_final: bool,
    #[serde(default)]
    channel_index: Option<Vec<u32>>,
    #[serde(default)]
    request_id: Option<String>,
}

/// A dispatched server message, after shape inspection.
#[derive(Debug, Clone)]
pub enum ServerMessage {
    /// Error/status-shaped payload, already mapped to an error kind.
    Error(SaraudioError),
    /// Metadata/handshake message marking the stream ready.
    Ready,
    Results(ResultsPayload),
    UtteranceEnd { channel: Option<u32>, last_word_end_ms: Option<u64> },
}

/// Parses one inbound text message, dispatching by shape. Returns `None` on
/// malformed JSON — the caller logs at warn and otherwise ignores it, per
/// §7's parse-error policy.
#[must_use]
pub fn parse_server_message(provider_id: &str, raw: &str) -> Option<ServerMessage> {
    let value: Value = serde_json::from_str(raw).ok()?;

    if looks_like_error(&value) {
        return Some(ServerMessage::Error(map_error_shape(provider_id, &value)));
    }

    let msg_type = value.get("type").and_then(Value::as_str);
    match msg_type {
        Some("UtteranceEnd") => Some(ServerMessage::UtteranceEnd {
            channel: value.get("channel").and_then(Value::as_u64).map(|c| c as u32),
            last_word_end_ms: value
                .get("last_word_end")
                .and_then(Value::as_f64)
                .map(|secs| (secs * 1000.0).round() as u64),
        }),
        Some("Metadata") => Some(ServerMessage::Ready),
        _ => {
            if value.get("channel").is_some() || value.get("is_final").is_some() {
                serde_json::from_value::<ResultsPayload>(value).ok().map(ServerMessage::Results)
            } else {
                // Anything else unrecognized is treated as a ready/metadata
                // handshake per §4.5 — providers vary widely in their
                // opening message shape.
                Some(ServerMessage::Ready)
            }
        }
    }
}

fn looks_like_error(value: &Value) -> bool {
    let has_status_or_code = value.get("status").is_some() || value.get("code").is_some();
    let type_is_error =
        value.get("type").and_then(Value::as_str).is_some_and(|t| t.eq_ignore_ascii_case("error"));
    (has_status_or_code && value.get("channel").is_none()) || type_is_error
}

/// Maps an error-shaped JSON value to a [`SaraudioError`], per §4.5.2's
/// status-based rules (shared between inline error messages and a close
/// frame's JSON reason).
#[must_use]
pub fn map_error_shape(provider_id: &str, value: &Value) -> SaraudioError {
    let status = value.get("status").and_then(status_as_u16);
    let code = value.get("code").and_then(Value::as_str).map(ToString::to_string);
    let message = value.get("message").and_then(Value::as_str).map(ToString::to_string);

    match status {
        Some(401 | 402 | 403) => SaraudioError::Authentication,
        Some(429) => {
            let retry_after_ms = value
                .get("retry_after")
                .and_then(parse_seconds_field)
                .map(|secs| (secs * 1000.0).round() as u64);
            SaraudioError::RateLimit { retry_after_ms }
        }
        Some(status) if status >= 500 => {
            SaraudioError::Provider { provider_id: provider_id.to_string(), code, status: Some(status), raw: message }
        }
        other => SaraudioError::Provider { provider_id: provider_id.to_string(), code, status: other, raw: message },
    }
}

fn status_as_u16(value: &Value) -> Option<u16> {
    value.as_u64().and_then(|v| u16::try_from(v).ok()).or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

fn parse_seconds_field(value: &Value) -> Option<f64> {
    value.as_f64().or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

/// Close-code / close-reason mapping (§4.5.2). Returns `None` for a clean,
/// explicit client-initiated close (code 1000) — no error.
#[must_use]
pub fn map_close(provider_id: &str, code: u16, reason: &str, was_clean: bool) -> Option<SaraudioError> {
    if code == 1000 {
        return None;
    }
    if let Some(rest) = reason.trim_start().strip_prefix('{') {
        let candidate = format!("{{{rest}");
        if let Ok(value) = serde_json::from_str::<Value>(&candidate) {
            return Some(map_error_shape(provider_id, &value));
        }
    }
    if !was_clean || code == 1006 {
        return Some(SaraudioError::Network { transient: true });
    }
    Some(SaraudioError::Provider {
        provider_id: provider_id.to_string(),
        code: Some(code.to_string()),
        status: None,
        raw: if reason.is_empty() { None } else { Some(reason.to_string()) },
    })
}

/// Results → TranscriptUpdate mapping (§4.5.1). Returns `None` when the
/// token list is empty and the message carries no terminal signal — the
/// update is dropped entirely in that case.
#[must_use]
pub fn results_to_update(provider_id: &str, msg: &ResultsPayload) -> Option<TranscriptUpdate> {
    let alternative = msg.channel.as_ref().and_then(|c| c.alternatives.first());

    let tokens = alternative.map_or_else(Vec::new, |alt| match &alt.words {
        Some(words) if !words.is_empty() => words
            .iter()
            .map(|w| {
                let text = format!("{} ", w.punctuated_word.as_deref().unwrap_or(&w.word));
                TranscriptToken {
                    text,
                    is_final: msg.is_final,
                    start_ms: Some((w.start * 1000.0).round() as u64),
                    end_ms: Some((w.end * 1000.0).round() as u64),
                    confidence: w.confidence,
                    speaker: w.speaker,
                    metadata: None,
                }
            })
            .collect(),
        _ => match alt.transcript.as_deref() {
            Some(text) if !text.is_empty() => vec![TranscriptToken {
                text: text.to_string(),
                is_final: msg.is_final,
                start_ms: None,
                end_ms: None,
                confidence: alt.confidence,
                speaker: None,
                metadata: None,
            }],
            _ => Vec::new(),
        },
    });

    if tokens.is_empty() && !msg.is_final && !msg.speech_final {
        return None;
    }

    let mut metadata = HashMap::new();
    metadata.insert("type".to_string(), Value::String("Results".to_string()));
    if let Some(idx) = &msg.channel_index {
        metadata.insert("channelIndex".to_string(), serde_json::json!(idx));
    }
    metadata.insert("isFinal".to_string(), Value::Bool(msg.is_final));
    metadata.insert("speechFinal".to_string(), Value::Bool(msg.speech_final));
    if let Some(request_id) = &msg.request_id {
        metadata.insert("requestId".to_string(), Value::String(request_id.clone()));
    }

    Some(TranscriptUpdate {
        provider_id: provider_id.to_string(),
        tokens,
        finalize: msg.speech_final.then_some(true),
        span: None,
        language: alternative.and_then(|a| a.languages.as_ref()).and_then(|l| l.first()).cloned(),
        turn_id: None,
        provider_metadata: Some(metadata),
        raw: None,
    })
}

/// Builds the fixed `{tokens:[], finalize:true}` update for an
/// `UtteranceEnd` message.
#[must_use]
pub fn utterance_end_to_update(
    provider_id: &str,
    channel: Option<u32>,
    last_word_end_ms: Option<u64>,
) -> TranscriptUpdate {
    let mut metadata = HashMap::new();
    metadata.insert("type".to_string(), Value::String("UtteranceEnd".to_string()));
    if let Some(channel) = channel {
        metadata.insert("channel".to_string(), serde_json::json!(channel));
    }
    if let Some(end_ms) = last_word_end_ms {
        metadata.insert("lastWordEndMs".to_string(), serde_json::json!(end_ms));
    }
    TranscriptUpdate {
        provider_id: provider_id.to_string(),
        tokens: Vec::new(),
        finalize: Some(true),
        span: None,
        language: None,
        turn_id: None,
        provider_metadata: Some(metadata),
        raw: None,
    }
}

/// Clamps a caller-supplied keepalive interval to `[min, max]`, warning if
/// the input was out of range.
#[must_use]
pub fn clamp_with_warn(value: u64, min: u64, max: u64, field: &str) -> u64 {
    let clamped = clamp_u64(value, min, max);
    if clamped != value {
        tracing::warn!(field, requested = value, clamped, "clamped out-of-range configuration value");
    }
    clamped
}
