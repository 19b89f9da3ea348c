//! The three outbound priority queues
//!
//! All three live behind one mutex; see the queue-lock discipline on
//! [`ClientInner`](crate::client::ClientInner).

use crate::voice::VoiceQueue;
use std::collections::VecDeque;

/// Outbound queues, drained in declaration order
#[derive(Debug, Default)]
pub(crate) struct OutboundQueues {
    /// REQUEST_GUILD_MEMBERS / sync requests, already serialised
    pub chunk_sync: VecDeque<String>,

    /// General messages (presence updates and everything else), already
    /// serialised
    pub general: VecDeque<String>,

    /// Voice connection requests, materialised at send time
    pub voice: VoiceQueue,
}

impl OutboundQueues {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queue depths for the rate-limit warning: (chunk, voice, general)
    pub(crate) fn depths(&self) -> (usize, usize, usize) {
        (self.chunk_sync.len(), self.voice.len(), self.general.len())
    }
}
