//! Connection status cell
//!
//! A `watch` channel holds the current [`Status`]; every transition wakes
//! waiters, which is how `await_status`-style coordination (most notably
//! the arbiter waiting for `AwaitingLoginConfirmation`) is implemented.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Connection lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// Opening the WebSocket
    Connecting,
    /// Socket open, about to authenticate
    Identifying,
    /// IDENTIFY or RESUME sent, waiting for READY/RESUMED
    AwaitingLoginConfirmation,
    /// READY received, entity setup still running
    LoadingSubsystems,
    /// Fully operational
    Connected,
    /// Socket lost
    Disconnected,
    /// Sleeping out the reconnect backoff
    WaitingToReconnect,
    /// Waiting in the session arbiter's queue
    ReconnectQueued,
    /// Reconnect attempt in flight
    AttemptingToReconnect,
    /// Terminal
    Shutdown,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Connecting => "CONNECTING",
            Self::Identifying => "IDENTIFYING",
            Self::AwaitingLoginConfirmation => "AWAITING_LOGIN_CONFIRMATION",
            Self::LoadingSubsystems => "LOADING_SUBSYSTEMS",
            Self::Connected => "CONNECTED",
            Self::Disconnected => "DISCONNECTED",
            Self::WaitingToReconnect => "WAITING_TO_RECONNECT",
            Self::ReconnectQueued => "RECONNECT_QUEUED",
            Self::AttemptingToReconnect => "ATTEMPTING_TO_RECONNECT",
            Self::Shutdown => "SHUTDOWN",
        };
        f.write_str(name)
    }
}

/// Shared status cell with wakeup on every transition
#[derive(Debug)]
pub(crate) struct StatusCell {
    tx: watch::Sender<Status>,
}

impl StatusCell {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(Status::Disconnected);
        Self { tx }
    }

    pub(crate) fn get(&self) -> Status {
        *self.tx.borrow()
    }

    pub(crate) fn set(&self, status: Status) {
        let previous = self.tx.send_replace(status);
        if previous != status {
            tracing::trace!(from = %previous, to = %status, "status change");
        }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Status> {
        self.tx.subscribe()
    }

    /// Wait until the status satisfies `pred`; the current value counts.
    pub(crate) async fn wait_for(&self, pred: impl FnMut(&Status) -> bool) -> Status {
        let mut rx = self.subscribe();
        let result = match rx.wait_for(pred).await {
            Ok(status) => *status,
            // Sender gone, which cannot outlive the cell; report the latest.
            Err(_) => self.get(),
        };
        result
    }

    /// Wait until the login handshake is underway (or the session died).
    ///
    /// Returns the status that ended the wait.
    pub(crate) async fn await_login_confirmation(&self) -> Status {
        self.wait_for(|s| {
            matches!(
                s,
                Status::AwaitingLoginConfirmation
                    | Status::LoadingSubsystems
                    | Status::Connected
                    | Status::Disconnected
                    | Status::Shutdown
            )
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names() {
        assert_eq!(Status::AwaitingLoginConfirmation.to_string(), "AWAITING_LOGIN_CONFIRMATION");
        assert_eq!(Status::Shutdown.to_string(), "SHUTDOWN");
    }

    #[tokio::test]
    async fn test_wait_for_sees_current_value() {
        let cell = StatusCell::new();
        cell.set(Status::Connected);
        let status = cell.wait_for(|s| *s == Status::Connected).await;
        assert_eq!(status, Status::Connected);
    }

    #[tokio::test]
    async fn test_wait_for_wakes_on_transition() {
        let cell = std::sync::Arc::new(StatusCell::new());
        let waiter = {
            let cell = cell.clone();
            tokio::spawn(async move { cell.await_login_confirmation().await })
        };
        cell.set(Status::Connecting);
        cell.set(Status::Identifying);
        cell.set(Status::AwaitingLoginConfirmation);
        assert_eq!(waiter.await.unwrap(), Status::AwaitingLoginConfirmation);
    }
}
