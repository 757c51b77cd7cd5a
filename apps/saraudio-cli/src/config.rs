// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Demo configuration surface: defaults merged with an optional TOML file
//! and environment overrides, via `Figment` layering (`Toml::file` ->
//! `Env`, with missing keys falling back to each struct's
//! `#[serde(default)]`).

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::Level;

use saraudio_provider::ControllerConfig;

/// Which recognized-word streaming transport the demo talks to.
#[derive(Debug, Clone, Copy, Default, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// WebSocket realtime transport ([`saraudio_provider::session`]).
    #[default]
    Stream,
    /// HTTP chunked-batch transport ([`saraudio_provider::aggregator`]).
    Http,
}

/// Provider connection details. There is deliberately no credential
/// abstraction here: the demo passes whatever URL/subprotocols the operator
/// configures straight through to the transport factories.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub id: String,
    pub url: String,
    pub subprotocols: Vec<String>,
    pub supports_force_endpoint: bool,
    pub force_endpoint_message: Option<String>,
    pub sample_rate: u32,
    pub channels: u16,
    #[serde(flatten)]
    pub controller: ControllerConfig,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            id: "demo".to_string(),
            url: "ws://127.0.0.1:9000/v1/listen".to_string(),
            subprotocols: Vec::new(),
            supports_force_endpoint: false,
            force_endpoint_message: None,
            sample_rate: 16000,
            channels: 1,
            controller: ControllerConfig::default(),
        }
    }
}

/// Log levels accepted in configuration, converted to `tracing::Level`.
#[derive(Debug, Clone, Copy, Default, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

/// Log file format.
#[derive(Debug, Clone, Copy, Default, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Console/file logging configuration (composed into a
/// `tracing_subscriber::registry()` by `logging::init_logging`).
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(default)]
pub struct LogConfig {
    pub console_enable: bool,
    pub file_enable: bool,
    pub console_level: LogLevel,
    pub file_level: LogLevel,
    pub file_path: String,
    pub file_format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            console_enable: true,
            file_enable: false,
            console_level: LogLevel::default(),
            file_level: LogLevel::Info,
            file_path: "./saraudio-cli.log".to_string(),
            file_format: LogFormat::default(),
        }
    }
}

/// Top-level demo configuration: which WAV file to stream and which
/// provider to send it to.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Config {
    pub input: String,
    pub provider: ProviderConfig,
    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self { input: "sample.wav".to_string(), provider: ProviderConfig::default(), log: LogConfig::default() }
    }
}

/// Loads configuration from built-in defaults, an optional TOML file at
/// `config_path`, then `SARAUDIO_`-prefixed environment variables, in that
/// precedence order (lowest to highest).
///
/// # Errors
///
/// Returns an error if the config file contains invalid TOML, or if any
/// layer's values fail to deserialize into [`Config`].
pub fn load(config_path: &str) -> Result<Config, Box<figment::Error>> {
    let mut figment = Figment::new();

    if std::path::Path::new(config_path).exists() {
        figment = figment.merge(Toml::file(config_path));
    }

    figment.merge(Env::prefixed("SARAUDIO_").split("__")).extract().map_err(Box::new)
}
