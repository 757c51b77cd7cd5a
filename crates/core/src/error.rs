// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Error taxonomy shared across the saraudio crates.
//!
//! Every fallible boundary in this workspace returns [`SaraudioError`]. The
//! variants mirror the kinds a live transcription provider can realistically
//! surface; [`SaraudioError::kind`] and [`SaraudioError::is_retryable`] let
//! callers (chiefly the transcription controller) dispatch on retryability
//! without re-deriving the rule at each call site.

use thiserror::Error;

/// The error kind, independent of the payload each variant carries.
///
/// Useful when a caller wants to match on "what kind of failure is this"
/// without destructuring the full [`SaraudioError`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Authentication,
    Network,
    RateLimit,
    Timeout,
    FormatMismatch,
    Provider,
    Aborted,
    Configuration,
    Io,
}

/// Unified error type for the saraudio pipeline and transcription stack.
#[derive(Error, Debug, Clone)]
pub enum SaraudioError {
    /// Credentials rejected by a provider. Terminal: never retried.
    #[error("authentication failed")]
    Authentication,

    /// A network-level failure. `transient` distinguishes a connection that
    /// is expected to recover (closed socket, reset) from one that isn't.
    #[error("network error (transient={transient})")]
    Network { transient: bool },

    /// The provider asked the caller to slow down.
    #[error("rate limited{}", retry_after_ms.map(|ms| format!(", retry after {ms}ms")).unwrap_or_default())]
    RateLimit { retry_after_ms: Option<u64> },

    /// An operation did not complete within its allotted time.
    #[error("timeout during {operation} after {ms}ms")]
    Timeout { operation: String, ms: u64 },

    /// A frame or segment arrived in a format the receiver did not expect.
    #[error("format mismatch: expected {expected}, received {received}")]
    FormatMismatch { expected: String, received: String },

    /// An opaque provider-reported failure: status/code/raw payload.
    #[error("provider {provider_id} error (code={code:?}, status={status:?})")]
    Provider {
        provider_id: String,
        code: Option<String>,
        status: Option<u16>,
        raw: Option<String>,
    },

    /// Cancelled via an explicit cancellation signal. Terminal.
    #[error("operation aborted")]
    Aborted,

    /// A configuration value was invalid (out of range, missing, etc).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Wraps a filesystem/I-O failure, e.g. while encoding a WAV recording.
    #[error("I/O error: {0}")]
    Io(String),
}

impl SaraudioError {
    /// The kind of this error, for dispatch without destructuring.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Authentication => ErrorKind::Authentication,
            Self::Network { .. } => ErrorKind::Network,
            Self::RateLimit { .. } => ErrorKind::RateLimit,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::FormatMismatch { .. } => ErrorKind::FormatMismatch,
            Self::Provider { .. } => ErrorKind::Provider,
            Self::Aborted => ErrorKind::Aborted,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Whether the transcription controller should schedule a retry for
    /// this error. Network, RateLimit and Timeout are retryable; everything
    /// else (including provider errors, which may be permanent) is not.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Network | ErrorKind::RateLimit | ErrorKind::Timeout)
    }

    /// Whether this error should terminate the controller immediately with
    /// no retry attempt, per the propagation policy in §7.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Authentication | ErrorKind::FormatMismatch | ErrorKind::Aborted)
    }
}

impl From<std::io::Error> for SaraudioError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Convenience alias used throughout the saraudio crates.
pub type Result<T> = std::result::Result<T, SaraudioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(SaraudioError::Network { transient: true }.is_retryable());
        assert!(SaraudioError::RateLimit { retry_after_ms: None }.is_retryable());
        assert!(SaraudioError::Timeout { operation: "connect".into(), ms: 5000 }.is_retryable());
        assert!(!SaraudioError::Authentication.is_retryable());
        assert!(!SaraudioError::Aborted.is_retryable());
    }

    #[test]
    fn terminal_kinds() {
        assert!(SaraudioError::Authentication.is_terminal());
        assert!(SaraudioError::FormatMismatch { expected: "pcm16".into(), received: "pcm8".into() }
            .is_terminal());
        assert!(SaraudioError::Aborted.is_terminal());
        assert!(!SaraudioError::Network { transient: false }.is_terminal());
    }

    #[test]
    fn io_conversion() {
        let io_err = std::io::Error::other("disk full");
        let err: SaraudioError = io_err.into();
        assert_eq!(err.kind(), ErrorKind::Io);
    }
}
