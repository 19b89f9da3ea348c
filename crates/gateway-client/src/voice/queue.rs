//! Per-guild voice request table
//!
//! Coalescing rules (old stage x new request -> resulting stage):
//!
//! | old \ new  | connect            | reconnect | disconnect |
//! |------------|--------------------|-----------|------------|
//! | absent     | CONNECT            | RECONNECT | DISCONNECT |
//! | CONNECT    | CONNECT (new chan) | RECONNECT | DISCONNECT |
//! | RECONNECT  | RECONNECT          | RECONNECT | DISCONNECT |
//! | DISCONNECT | RECONNECT          | RECONNECT | DISCONNECT |
//!
//! Connect and reconnect always update the stored channel.

use super::{ConnectionStage, VoiceRequest};
use gateway_core::{EntityCache, Snowflake, VoiceStatus};
use std::collections::HashMap;

/// Table of pending voice connection requests, at most one per guild
#[derive(Debug, Default)]
pub struct VoiceQueue {
    table: HashMap<Snowflake, VoiceRequest>,
}

impl VoiceQueue {
    #[must_use]
    pub fn new() -> Self {
        Self { table: HashMap::new() }
    }

    /// Ask to join `channel_id` in `guild_id`
    pub fn queue_connect(&mut self, guild_id: Snowflake, channel_id: Snowflake, now: u64) {
        match self.table.get_mut(&guild_id) {
            None => {
                self.table.insert(
                    guild_id,
                    VoiceRequest::new(guild_id, Some(channel_id), ConnectionStage::Connect, now),
                );
            }
            Some(request) => {
                if request.stage == ConnectionStage::Disconnect {
                    // A planned disconnect plus a new connect is a reconnect
                    request.stage = ConnectionStage::Reconnect;
                }
                request.channel_id = Some(channel_id);
            }
        }
    }

    /// Ask to drop and re-establish voice in `guild_id`, landing on `channel_id`
    pub fn queue_reconnect(&mut self, guild_id: Snowflake, channel_id: Snowflake, now: u64) {
        match self.table.get_mut(&guild_id) {
            None => {
                self.table.insert(
                    guild_id,
                    VoiceRequest::new(guild_id, Some(channel_id), ConnectionStage::Reconnect, now),
                );
            }
            Some(request) => {
                request.stage = ConnectionStage::Reconnect;
                request.channel_id = Some(channel_id);
            }
        }
    }

    /// Ask to leave voice in `guild_id`
    pub fn queue_disconnect(&mut self, guild_id: Snowflake, now: u64) {
        match self.table.get_mut(&guild_id) {
            None => {
                self.table.insert(
                    guild_id,
                    VoiceRequest::new(guild_id, None, ConnectionStage::Disconnect, now),
                );
            }
            Some(request) => {
                request.stage = ConnectionStage::Disconnect;
            }
        }
    }

    /// Drop any pending request for `guild_id`.
    ///
    /// Used when the guild itself disappears, so no further voice state
    /// updates are sent for it.
    pub fn remove(&mut self, guild_id: Snowflake) -> Option<VoiceRequest> {
        self.table.remove(&guild_id)
    }

    /// Ingest the server's VOICE_STATE_UPDATE response for our own user.
    ///
    /// `connected_channel` is the channel the server says we are in now
    /// (`None` once a disconnect is confirmed). Returns the request that
    /// this update completes, if any.
    pub fn update(
        &mut self,
        guild_id: Snowflake,
        connected_channel: Option<Snowflake>,
        now: u64,
    ) -> Option<VoiceRequest> {
        let request = self.table.get_mut(&guild_id)?;

        match connected_channel {
            None => match request.stage {
                ConnectionStage::Disconnect => self.table.remove(&guild_id),
                ConnectionStage::Reconnect => {
                    // Disconnect half done; connect half goes out next pass
                    request.stage = ConnectionStage::Connect;
                    request.next_attempt_ms = now;
                    None
                }
                ConnectionStage::Connect => None,
            },
            Some(channel) => {
                if request.stage == ConnectionStage::Connect && request.channel_id == Some(channel) {
                    self.table.remove(&guild_id)
                } else {
                    // An update for some other channel than the queued one
                    None
                }
            }
        }
    }

    /// Push a request's next attempt into the future.
    ///
    /// The sender calls this after putting a VOICE_STATE_UPDATE on the wire
    /// so the request is not re-sent before the server answers.
    pub fn defer(&mut self, guild_id: Snowflake, until_ms: u64) {
        if let Some(request) = self.table.get_mut(&guild_id) {
            request.next_attempt_ms = until_ms;
        }
    }

    /// Select the next request that is due and still actionable.
    ///
    /// Requests whose guild vanished are evicted; non-disconnect requests
    /// are additionally evicted when their channel is gone or the
    /// VOICE_CONNECT permission was lost. Evictions are returned as
    /// `(guild, status)` pairs for the audio hook — the caller delivers
    /// them after releasing the queue lock.
    pub fn next_ready(
        &mut self,
        now: u64,
        caches: &dyn EntityCache,
    ) -> (Option<VoiceRequest>, Vec<(Snowflake, VoiceStatus)>) {
        let mut evicted = Vec::new();
        let mut selected = None;

        let due: Vec<Snowflake> = self
            .table
            .values()
            .filter(|r| r.next_attempt_ms <= now)
            .map(|r| r.guild_id)
            .collect();

        for guild_id in due {
            let Some(request) = self.table.get(&guild_id) else {
                continue;
            };
            let (stage, channel) = (request.stage, request.channel_id);

            if !caches.guild_exists(guild_id) {
                self.table.remove(&guild_id);
                evicted.push((guild_id, VoiceStatus::DisconnectedRemovedFromGuild));
                continue;
            }

            if stage != ConnectionStage::Disconnect {
                if !channel.is_some_and(|c| caches.voice_channel_exists(guild_id, c)) {
                    self.table.remove(&guild_id);
                    evicted.push((guild_id, VoiceStatus::DisconnectedChannelDeleted));
                    continue;
                }
                if !channel.is_some_and(|c| caches.can_voice_connect(guild_id, c)) {
                    self.table.remove(&guild_id);
                    evicted.push((guild_id, VoiceStatus::DisconnectedLostPermission));
                    continue;
                }
            }

            selected = self.table.get(&guild_id).cloned();
            break;
        }

        (selected, evicted)
    }

    /// Number of pending requests
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Stage of the pending request for `guild_id`, if any
    #[must_use]
    pub fn stage(&self, guild_id: Snowflake) -> Option<ConnectionStage> {
        self.table.get(&guild_id).map(|r| r.stage)
    }

    /// The pending request for `guild_id`, if any
    #[must_use]
    pub fn get(&self, guild_id: Snowflake) -> Option<&VoiceRequest> {
        self.table.get(&guild_id)
    }
}
