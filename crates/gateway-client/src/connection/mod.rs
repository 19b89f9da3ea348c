//! Connection lifecycle
//!
//! Connecting, authenticating (IDENTIFY vs RESUME), close-code
//! interpretation, invalidation and the reconnect policy.

pub(crate) mod lifecycle;
pub(crate) mod reconnect;
mod state;
mod status;

pub use status::Status;

pub(crate) use state::SessionState;
pub(crate) use status::StatusCell;

use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Gateway IDENTIFY is limited to once per five seconds per token
pub(crate) const IDENTIFY_BACKOFF_MS: u64 = 5_000;

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub(crate) type WsSink = futures_util::stream::SplitSink<WsStream, Message>;
pub(crate) type WsSource = futures_util::stream::SplitStream<WsStream>;
