//! Payload definitions
//!
//! Typed `d` bodies for the messages the client sends, plus the HELLO body
//! it receives.

use crate::{CLIENT_NAME, GATEWAY_VERSION};
use gateway_core::{ShardInfo, Snowflake, VoicePrefs};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Payload for op 10 (Hello)
///
/// Sent by the server immediately after connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloPayload {
    /// Heartbeat interval in milliseconds
    pub heartbeat_interval: u64,
}

/// Connection properties sent with IDENTIFY
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyProperties {
    #[serde(rename = "$os")]
    pub os: String,
    #[serde(rename = "$browser")]
    pub browser: String,
    #[serde(rename = "$device")]
    pub device: String,
    #[serde(rename = "$referring_domain")]
    pub referring_domain: String,
    #[serde(rename = "$referrer")]
    pub referrer: String,
}

impl Default for IdentifyProperties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: CLIENT_NAME.to_string(),
            device: CLIENT_NAME.to_string(),
            referring_domain: String::new(),
            referrer: String::new(),
        }
    }
}

/// Payload for op 2 (Identify)
///
/// Authenticates a new session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyPayload {
    /// Authentication token
    pub token: String,

    /// Client connection properties
    pub properties: IdentifyProperties,

    /// Gateway protocol version
    pub v: u8,

    /// Member count above which guilds deliver only online members
    pub large_threshold: u16,

    /// Initial presence object
    pub presence: Value,

    /// `[shard_id, shard_total]` when the event stream is partitioned
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shard: Option<[u32; 2]>,
}

impl IdentifyPayload {
    /// Build an IDENTIFY payload for this client
    #[must_use]
    pub fn new(
        token: impl Into<String>,
        large_threshold: u16,
        presence: Value,
        shard: Option<ShardInfo>,
    ) -> Self {
        Self {
            token: token.into(),
            properties: IdentifyProperties::default(),
            v: GATEWAY_VERSION,
            large_threshold,
            presence,
            shard: shard.map(|s| s.as_array()),
        }
    }
}

/// Payload for op 6 (Resume)
///
/// Re-attaches to an existing session, replaying from `seq`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumePayload {
    /// Session ID to resume
    pub session_id: String,

    /// Authentication token
    pub token: String,

    /// Last received sequence number
    pub seq: u64,
}

/// Payload for op 4 (Voice State Update)
///
/// `channel_id` is `null` to disconnect from voice in the guild.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceStateUpdatePayload {
    pub guild_id: Snowflake,
    pub channel_id: Option<Snowflake>,
    pub self_mute: bool,
    pub self_deaf: bool,
}

impl VoiceStateUpdatePayload {
    /// Build a voice state update targeting `channel_id` (or a disconnect
    /// when `None`) with the audio manager's mute/deafen flags.
    #[must_use]
    pub fn new(guild_id: Snowflake, channel_id: Option<Snowflake>, prefs: VoicePrefs) -> Self {
        Self {
            guild_id,
            channel_id,
            self_mute: prefs.self_mute,
            self_deaf: prefs.self_deaf,
        }
    }
}
