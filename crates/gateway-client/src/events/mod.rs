//! Lifecycle events
//!
//! The client broadcasts coarse lifecycle transitions over a
//! `tokio::sync::broadcast` channel; entity-level events go through the
//! handler registry instead.

use chrono::{DateTime, Utc};
use serde_json::Value;

/// One side's close frame, as observed on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
}

impl CloseInfo {
    #[must_use]
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self { code, reason: reason.into() }
    }
}

/// Coarse lifecycle events emitted by the gateway client
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// First complete load of a fresh session
    Ready { sequence: u64 },

    /// A re-identify after a disconnect finished loading
    Reconnected { sequence: u64 },

    /// An existing session was resumed
    Resumed { sequence: u64 },

    /// The connection dropped but will be recovered
    Disconnected {
        server_close: Option<CloseInfo>,
        client_close: Option<CloseInfo>,
        closed_by_server: bool,
        at: DateTime<Utc>,
    },

    /// The client is done for good; `code` is the raw close code
    Shutdown { code: u16, at: DateTime<Utc> },

    /// A non-fatal error was absorbed (handler failure, socket error,
    /// malformed frame)
    Exception { context: String },

    /// Raw DISPATCH frame, emitted after cache mutation when raw events
    /// are enabled
    Raw { sequence: u64, frame: Value },
}
