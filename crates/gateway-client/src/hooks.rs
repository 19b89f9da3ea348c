//! Default collaborator implementations
//!
//! Stand-ins for the external caches, audio managers and presence manager.
//! Useful for embedding the client before those subsystems exist, and for
//! tests.

use gateway_core::{AudioHook, EntityCache, PresenceProvider, Snowflake, VoiceStatus};
use serde_json::{json, Value};

/// Cache stub that answers every existence and permission query with `true`
///
/// With this cache no queued voice request is ever evicted.
#[derive(Debug, Default)]
pub struct PermissiveCache;

impl EntityCache for PermissiveCache {
    fn guild_exists(&self, _guild_id: Snowflake) -> bool {
        true
    }

    fn voice_channel_exists(&self, _guild_id: Snowflake, _channel_id: Snowflake) -> bool {
        true
    }

    fn can_voice_connect(&self, _guild_id: Snowflake, _channel_id: Snowflake) -> bool {
        true
    }

    fn clear(&self) {}

    fn timeout(&self, _last_sequence: u64) {}
}

/// Audio hook that owns no audio managers and logs status changes
#[derive(Debug, Default)]
pub struct NullAudioHook;

impl AudioHook for NullAudioHook {
    fn connected_guilds(&self) -> Vec<Snowflake> {
        Vec::new()
    }

    fn on_status_change(&self, guild_id: Snowflake, status: VoiceStatus) {
        tracing::debug!(guild = %guild_id, status = %status, "voice status change");
    }

    fn close_connection(&self, guild_id: Snowflake, status: VoiceStatus) {
        tracing::debug!(guild = %guild_id, status = %status, "audio connection closed");
    }
}

/// Presence provider that always reports the same presence object
#[derive(Debug, Clone)]
pub struct StaticPresence(Value);

impl StaticPresence {
    /// A plain online presence with no activity
    #[must_use]
    pub fn online() -> Self {
        Self(json!({
            "status": "online",
            "since": Value::Null,
            "game": Value::Null,
            "afk": false,
        }))
    }

    /// Use an explicit presence object
    #[must_use]
    pub fn new(presence: Value) -> Self {
        Self(presence)
    }
}

impl PresenceProvider for StaticPresence {
    fn full_presence(&self) -> Value {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permissive_cache() {
        let cache = PermissiveCache;
        assert!(cache.guild_exists(Snowflake::new(1)));
        assert!(cache.voice_channel_exists(Snowflake::new(1), Snowflake::new(2)));
        assert!(cache.can_voice_connect(Snowflake::new(1), Snowflake::new(2)));
    }

    #[test]
    fn test_static_presence() {
        let presence = StaticPresence::online().full_presence();
        assert_eq!(presence["status"], "online");
        assert_eq!(presence["afk"], false);
    }
}
