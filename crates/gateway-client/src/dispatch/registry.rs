//! Dispatch handler registry types
//!
//! The gateway routes DISPATCH frames by event name to registered
//! handlers. Handlers decode the entity payload and mutate the caches they
//! borrow; the gateway itself never interprets entity data.

use serde_json::Value;

/// A typed event handler, keyed by event name (`MESSAGE_CREATE`, ...)
///
/// `frame` is the raw envelope including `t`, `s` and `d`. Handlers run on
/// the socket reader task and must not block.
pub trait SocketHandler: Send + Sync {
    fn handle(&self, sequence: u64, frame: &Value) -> Result<(), HandlerError>;
}

/// Errors a handler may surface to the dispatcher
///
/// `Parse` failures are logged at warn and the frame skipped; anything
/// else is logged at error and emitted as an exception event. Neither
/// terminates the gateway.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The frame did not have the JSON shape the handler expected
    #[error("unexpected JSON shape: {0}")]
    Parse(String),

    /// The handler failed for any other reason
    #[error("{0}")]
    Internal(String),
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}

/// Blanket impl so plain closures can be registered as handlers
impl<F> SocketHandler for F
where
    F: Fn(u64, &Value) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, sequence: u64, frame: &Value) -> Result<(), HandlerError> {
        self(sequence, frame)
    }
}
