//! Voice connection request scheduling
//!
//! Audio managers ask the gateway to connect, reconnect or disconnect
//! voice in a guild. Requests coalesce per guild — at most one lives in the
//! table at a time — and the sender loop materialises them into
//! VOICE_STATE_UPDATE messages once the session is ready.

mod queue;
mod request;

pub use queue::VoiceQueue;
pub use request::{ConnectionStage, VoiceRequest};
