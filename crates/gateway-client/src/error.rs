//! Client error types

use gateway_core::ArbiterError;

/// Errors surfaced by the gateway client's public API and connect path
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The session arbiter refused the connect node
    #[error("session arbiter rejected the connect node: {0}")]
    Arbiter(#[from] ArbiterError),

    /// The WebSocket handshake failed
    #[error("gateway handshake failed: {0}")]
    Handshake(#[from] tokio_tungstenite::tungstenite::Error),

    /// The client was shut down
    #[error("client is shut down")]
    Shutdown,
}
