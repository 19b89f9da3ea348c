//! Gateway message format
//!
//! Defines the `{op, t, s, d}` envelope carried by every WebSocket message
//! and builders for the messages this client sends.

use super::{IdentifyPayload, OpCode, ResumePayload, VoiceStateUpdatePayload};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Gateway message envelope
///
/// All messages sent over the WebSocket connection follow this format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayMessage {
    /// Operation code
    pub op: OpCode,

    /// Event type (only for op=0 Dispatch)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,

    /// Sequence number (only for op=0 Dispatch)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,

    /// Event data payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub d: Option<Value>,
}

impl GatewayMessage {
    /// Create a Heartbeat message (op=1) carrying the last sequence
    #[must_use]
    pub fn heartbeat(last_sequence: u64) -> Self {
        Self {
            op: OpCode::Heartbeat,
            t: None,
            s: None,
            d: Some(Value::Number(last_sequence.into())),
        }
    }

    /// Create an Identify message (op=2)
    #[must_use]
    pub fn identify(payload: &IdentifyPayload) -> Self {
        Self {
            op: OpCode::Identify,
            t: None,
            s: None,
            d: serde_json::to_value(payload).ok(),
        }
    }

    /// Create a Resume message (op=6)
    #[must_use]
    pub fn resume(payload: &ResumePayload) -> Self {
        Self {
            op: OpCode::Resume,
            t: None,
            s: None,
            d: serde_json::to_value(payload).ok(),
        }
    }

    /// Create a Voice State Update message (op=4)
    #[must_use]
    pub fn voice_state_update(payload: &VoiceStateUpdatePayload) -> Self {
        Self {
            op: OpCode::VoiceStateUpdate,
            t: None,
            s: None,
            d: serde_json::to_value(payload).ok(),
        }
    }

    /// Create a Request Guild Members message (op=8) with an opaque body
    #[must_use]
    pub fn request_guild_members(body: Value) -> Self {
        Self {
            op: OpCode::RequestGuildMembers,
            t: None,
            s: None,
            d: Some(body),
        }
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl std::fmt::Display for GatewayMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(t) = &self.t {
            write!(f, "GatewayMessage(op={}, t={}", self.op, t)?;
            if let Some(s) = self.s {
                write!(f, ", s={s}")?;
            }
            write!(f, ")")
        } else {
            write!(f, "GatewayMessage(op={})", self.op)
        }
    }
}
