// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Provider streaming transport (C8), HTTP chunking aggregator (C9), inbound
//! message mapping, and the transcription controller (C10) that ties a
//! frame producer to one of those two transports.
//!
//! ## Modules
//!
//! - [`session`]: [`session::ProviderSession`], the socket-backed realtime
//!   transport.
//! - [`aggregator`]: [`aggregator::HttpAggregator`], the batch/HTTP
//!   transport.
//! - [`messages`]: inbound wire-message parsing shared by both transports.
//! - [`config`]: configuration surfaces for all of the above.
//! - [`controller`]: [`controller::TranscriptionController`], orchestrating
//!   connect/retry, preconnect buffering and segment-driven endpointing.

pub mod aggregator;
pub mod config;
pub mod controller;
pub mod messages;
pub mod session;

pub use aggregator::{AggregatorEvent, HttpAggregator, HttpTransport, ReqwestHttpTransport};
pub use config::{AggregatorConfig, ControllerConfig, LiveTransport, RetryConfig, SessionConfig};
pub use controller::{
    ChunkedTransportFactory, ControllerState, ProviderCapabilities, StreamingTransportFactory,
    TranscriptionController, Transport,
};
pub use session::{ConnectionFactory, ProviderSession, SessionEvent, SessionState, Socket, TungsteniteSocket};
