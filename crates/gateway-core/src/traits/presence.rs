//! Presence manager port

use serde_json::Value;

/// Supplies the presence object embedded in the IDENTIFY payload
pub trait PresenceProvider: Send + Sync {
    /// The full presence as the gateway expects it, e.g.
    /// `{"status": "online", "since": null, "game": null, "afk": false}`
    fn full_presence(&self) -> Value;
}
