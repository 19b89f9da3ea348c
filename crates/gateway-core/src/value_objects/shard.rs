//! Shard identification
//!
//! A shard is one of N logical partitions of the event stream. The pair
//! `(shard_id, shard_total)` is sent in the IDENTIFY payload and carried by
//! connect nodes so the session arbiter can log which shard it is serving.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Shard coordinates for a sharded gateway session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShardInfo {
    /// Zero-based index of this shard
    pub shard_id: u32,
    /// Total number of shards the bot runs with
    pub shard_total: u32,
}

impl ShardInfo {
    /// Create a new shard descriptor
    #[must_use]
    pub const fn new(shard_id: u32, shard_total: u32) -> Self {
        Self { shard_id, shard_total }
    }

    /// Format used in log lines, e.g. `[2 / 16]`
    #[must_use]
    pub fn shard_string(&self) -> String {
        format!("[{} / {}]", self.shard_id, self.shard_total)
    }

    /// The `[id, total]` array form used by the IDENTIFY payload
    #[must_use]
    pub const fn as_array(&self) -> [u32; 2] {
        [self.shard_id, self.shard_total]
    }
}

impl fmt::Display for ShardInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.shard_string())
    }
}
