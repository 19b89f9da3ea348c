//! Queued voice connection requests

use gateway_core::Snowflake;

/// What a queued request wants to happen to the guild's voice connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStage {
    /// Join the target channel
    Connect,
    /// Leave the current channel, then join the target channel
    Reconnect,
    /// Leave voice in the guild
    Disconnect,
}

/// One pending voice connection request, keyed by guild
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceRequest {
    pub guild_id: Snowflake,
    /// Target channel; `None` for pure disconnects
    pub channel_id: Option<Snowflake>,
    pub stage: ConnectionStage,
    /// Epoch millis before which the sender must not pick this request up
    pub next_attempt_ms: u64,
}

impl VoiceRequest {
    pub(crate) fn new(
        guild_id: Snowflake,
        channel_id: Option<Snowflake>,
        stage: ConnectionStage,
        now: u64,
    ) -> Self {
        Self {
            guild_id,
            channel_id,
            stage,
            next_attempt_ms: now,
        }
    }
}
