//! Collaborator traits (ports) - the seams between the gateway core and the
//! rest of the application
//!
//! The gateway core defines what it needs from its surroundings; entity
//! caches, audio managers, the presence manager and the session arbiter
//! provide the implementations.

mod arbiter;
mod audio;
mod caches;
mod presence;

pub use arbiter::{ArbiterError, SessionArbiter, SessionConnectNode, IDENTIFY_DELAY};
pub use audio::AudioHook;
pub use caches::EntityCache;
pub use presence::PresenceProvider;
