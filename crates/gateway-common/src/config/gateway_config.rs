//! Gateway configuration structs
//!
//! Loads configuration from environment variables.

use gateway_core::ShardInfo;
use serde::Deserialize;
use std::env;

/// Transport compression negotiated with the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Compression {
    /// Plain JSON text frames
    None,
    /// One zlib stream spanning the whole connection
    #[default]
    ZlibStream,
}

impl Compression {
    /// Query-string value for the `compress` parameter, if any
    #[must_use]
    pub const fn key(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::ZlibStream => Some("zlib-stream"),
        }
    }
}

/// Gateway client configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Bot or user token used in IDENTIFY and RESUME
    pub token: String,

    /// Base gateway URL (scheme + host, no query string)
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,

    /// Transport compression
    #[serde(default)]
    pub compression: Compression,

    /// Reconnect automatically after recoverable disconnects
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,

    /// Upper bound for the exponential reconnect backoff, in seconds
    #[serde(default = "default_max_reconnect_delay_s")]
    pub max_reconnect_delay_s: u64,

    /// `large_threshold` sent with IDENTIFY
    #[serde(default = "default_large_threshold")]
    pub large_threshold: u16,

    /// Emit a raw event for every DISPATCH after cache mutation
    #[serde(default)]
    pub raw_events: bool,

    /// Capacity of the lifecycle event broadcast channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Close and resume after this many consecutive unacknowledged
    /// heartbeats. `None` disables the watchdog.
    #[serde(default)]
    pub missed_heartbeat_limit: Option<u32>,

    /// Shard coordinates, when the event stream is partitioned
    #[serde(default)]
    pub shard: Option<ShardInfo>,
}

fn default_gateway_url() -> String {
    "wss://gateway.discord.gg".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_reconnect_delay_s() -> u64 {
    900
}

fn default_large_threshold() -> u16 {
    250
}

fn default_event_buffer() -> usize {
    64
}

impl GatewayConfig {
    /// Create a configuration with defaults for everything but the token
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            gateway_url: default_gateway_url(),
            compression: Compression::default(),
            auto_reconnect: true,
            max_reconnect_delay_s: default_max_reconnect_delay_s(),
            large_threshold: default_large_threshold(),
            raw_events: false,
            event_buffer: default_event_buffer(),
            missed_heartbeat_limit: None,
            shard: None,
        }
    }

    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if required environment variables are missing.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let shard = match (
            env::var("GATEWAY_SHARD_ID").ok(),
            env::var("GATEWAY_SHARD_TOTAL").ok(),
        ) {
            (Some(id), Some(total)) => {
                let shard_id = id
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("GATEWAY_SHARD_ID", id.clone()))?;
                let shard_total = total
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("GATEWAY_SHARD_TOTAL", total.clone()))?;
                Some(ShardInfo::new(shard_id, shard_total))
            }
            (None, None) => None,
            _ => return Err(ConfigError::MissingVar("GATEWAY_SHARD_ID/GATEWAY_SHARD_TOTAL")),
        };

        Ok(Self {
            token: env::var("GATEWAY_TOKEN").map_err(|_| ConfigError::MissingVar("GATEWAY_TOKEN"))?,
            gateway_url: env::var("GATEWAY_URL").unwrap_or_else(|_| default_gateway_url()),
            compression: match env::var("GATEWAY_COMPRESSION").ok().as_deref() {
                Some("none") => Compression::None,
                Some("zlib-stream") | None => Compression::ZlibStream,
                Some(other) => {
                    return Err(ConfigError::InvalidValue("GATEWAY_COMPRESSION", other.to_string()))
                }
            },
            auto_reconnect: env::var("GATEWAY_AUTO_RECONNECT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(true),
            max_reconnect_delay_s: env::var("GATEWAY_MAX_RECONNECT_DELAY_S")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_max_reconnect_delay_s),
            large_threshold: env::var("GATEWAY_LARGE_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_large_threshold),
            raw_events: env::var("GATEWAY_RAW_EVENTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(false),
            event_buffer: env::var("GATEWAY_EVENT_BUFFER")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_event_buffer),
            missed_heartbeat_limit: env::var("GATEWAY_MISSED_HEARTBEAT_LIMIT")
                .ok()
                .and_then(|s| s.parse().ok()),
            shard,
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}
