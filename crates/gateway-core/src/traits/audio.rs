//! Audio manager port

use crate::value_objects::Snowflake;
use crate::voice::{VoicePrefs, VoiceStatus};

/// Access to the application's audio managers
///
/// The gateway core schedules voice connection requests and reports their
/// fate; the audio transport itself lives on the other side of this trait.
pub trait AudioHook: Send + Sync {
    /// Guilds that currently hold an audio manager
    fn connected_guilds(&self) -> Vec<Snowflake>;

    /// Self mute/deafen flags to send with a VOICE_STATE_UPDATE
    fn voice_prefs(&self, _guild_id: Snowflake) -> VoicePrefs {
        VoicePrefs::default()
    }

    /// A queued voice request for `guild_id` was dropped before it could be
    /// sent (guild gone, channel deleted, permission lost).
    fn on_status_change(&self, guild_id: Snowflake, status: VoiceStatus);

    /// Close the audio connection for `guild_id`, reporting `status`.
    ///
    /// Called after a reconnect when the guild is no longer known.
    fn close_connection(&self, guild_id: Snowflake, status: VoiceStatus);
}
