//! Voice connection status reporting
//!
//! The gateway client schedules voice connection requests but never carries
//! audio itself; audio managers learn about scheduling outcomes through
//! [`VoiceStatus`] values delivered to the [`AudioHook`](crate::AudioHook).

use serde::{Deserialize, Serialize};

/// Why a queued voice connection request was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoiceStatus {
    /// The guild the request targeted no longer exists
    DisconnectedRemovedFromGuild,
    /// The voice channel the request targeted was deleted
    DisconnectedChannelDeleted,
    /// The bot lost the permission required to connect to the channel
    DisconnectedLostPermission,
    /// The guild vanished while the session was reconnecting
    DisconnectedRemovedDuringReconnect,
}

impl VoiceStatus {
    /// Name used in log lines
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::DisconnectedRemovedFromGuild => "DISCONNECTED_REMOVED_FROM_GUILD",
            Self::DisconnectedChannelDeleted => "DISCONNECTED_CHANNEL_DELETED",
            Self::DisconnectedLostPermission => "DISCONNECTED_LOST_PERMISSION",
            Self::DisconnectedRemovedDuringReconnect => "DISCONNECTED_REMOVED_DURING_RECONNECT",
        }
    }
}

impl std::fmt::Display for VoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Self mute/deafen flags sent with VOICE_STATE_UPDATE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VoicePrefs {
    pub self_mute: bool,
    pub self_deaf: bool,
}
