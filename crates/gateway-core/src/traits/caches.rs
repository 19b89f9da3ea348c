//! Entity cache port
//!
//! The gateway client never owns entities; handlers mutate caches they
//! borrow. The core itself only needs existence and permission queries for
//! voice request eligibility, plus the clear/timeout lifecycle hooks.

use crate::value_objects::Snowflake;

/// Read and lifecycle access to the application's entity caches
pub trait EntityCache: Send + Sync {
    /// Whether a guild is currently present in the cache
    fn guild_exists(&self, guild_id: Snowflake) -> bool;

    /// Whether a voice channel is currently present in a guild
    fn voice_channel_exists(&self, guild_id: Snowflake, channel_id: Snowflake) -> bool;

    /// Whether the logged-in account may connect to the voice channel
    fn can_voice_connect(&self, guild_id: Snowflake, channel_id: Snowflake) -> bool;

    /// Drop every cached entity. Called when the session is invalidated.
    fn clear(&self);

    /// Expire deferred cache lookups up to `last_sequence`.
    ///
    /// Invoked every [`timeout_interval`](Self::timeout_interval) dispatches.
    fn timeout(&self, last_sequence: u64);

    /// Number of dispatches between [`timeout`](Self::timeout) invocations.
    fn timeout_interval(&self) -> u64 {
        100
    }
}
