//! # gateway-client
//!
//! Durable bidirectional WebSocket session manager for the gateway protocol
//! (version 6).
//!
//! The client opens a WebSocket to the remote gateway, authenticates with
//! IDENTIFY or re-attaches with RESUME, keeps the session alive with
//! heartbeats, decodes the inbound event stream, dispatches typed events to
//! registered handlers, enforces the outbound rate limit across three
//! priority queues, schedules per-guild voice connection requests, and
//! recovers from disconnects under the direction of a session arbiter.
//!
//! ```no_run
//! use gateway_client::GatewayClient;
//! use gateway_common::GatewayConfig;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = GatewayClient::builder(GatewayConfig::from_env()?).build();
//! client.login()?;
//! let mut events = client.subscribe();
//! while let Ok(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod arbiter;
pub mod client;
pub mod compress;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod hooks;
pub mod protocol;
pub mod ratelimit;
pub mod voice;

mod heartbeat;
mod outbound;

pub use arbiter::SerialArbiter;
pub use client::{GatewayClient, GatewayClientBuilder};
pub use connection::Status;
pub use dispatch::{HandlerError, SocketHandler};
pub use error::GatewayError;
pub use events::{CloseInfo, GatewayEvent};

/// Gateway protocol version spoken by this client
pub const GATEWAY_VERSION: u8 = 6;

/// Name reported in the IDENTIFY connection properties
pub(crate) const CLIENT_NAME: &str = "gateway-client";

pub(crate) mod clock {
    use std::time::{SystemTime, UNIX_EPOCH};

    /// Current time in milliseconds since the Unix epoch
    pub fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}
