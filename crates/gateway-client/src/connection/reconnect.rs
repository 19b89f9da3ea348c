//! Reconnect controller
//!
//! Exponential backoff starting at two seconds, doubling per failed
//! attempt up to the configured maximum, reset on every successful
//! connect. Only the resume path loops here; a dead session goes back
//! through the arbiter queue instead.

use super::lifecycle;
use crate::client::ClientInner;
use crate::error::GatewayError;
use crate::events::GatewayEvent;
use crate::Status;
use chrono::Utc;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// First backoff step, in seconds
pub(crate) const INITIAL_RECONNECT_DELAY_S: u64 = 2;

/// Next backoff step after a failed attempt
pub(crate) fn next_delay(current_s: u64, max_s: u64) -> u64 {
    current_s.saturating_mul(2).min(max_s).max(INITIAL_RECONNECT_DELAY_S)
}

/// Sleep-and-retry until a connect succeeds, reconnects are disabled, or
/// the client shuts down.
pub(crate) async fn run(inner: &Arc<ClientInner>, from_queue: bool) {
    if inner.is_shutdown() {
        inner.status.set(Status::Shutdown);
        inner.emit(GatewayEvent::Shutdown { code: 1000, at: Utc::now() });
        return;
    }

    if from_queue {
        let shard = inner
            .config
            .shard
            .map(|s| s.shard_string())
            .unwrap_or_default();
        tracing::debug!(shard = %shard, "queue is attempting to reconnect a shard");
    }
    tracing::debug!(
        delay_s = inner.reconnect_delay_s.load(Ordering::SeqCst),
        "attempting to reconnect"
    );

    while inner.should_reconnect() {
        inner.status.set(Status::WaitingToReconnect);
        let delay_s = inner.reconnect_delay_s.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(delay_s)).await;

        inner.handle_identify_rate_limit.store(false, Ordering::SeqCst);
        inner.status.set(Status::AttemptingToReconnect);
        tracing::debug!("attempting to reconnect!");

        match lifecycle::connect(inner).await {
            Ok(()) => break,
            Err(GatewayError::Shutdown) => {
                inner.status.set(Status::Shutdown);
                inner.emit(GatewayEvent::Shutdown { code: 1000, at: Utc::now() });
                return;
            }
            Err(e) => {
                let next = next_delay(delay_s, inner.config.max_reconnect_delay_s);
                inner.reconnect_delay_s.store(next, Ordering::SeqCst);
                tracing::warn!(error = %e, next_delay_s = next, "reconnect failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_up_to_max() {
        assert_eq!(next_delay(2, 900), 4);
        assert_eq!(next_delay(4, 900), 8);
        assert_eq!(next_delay(512, 900), 900);
        assert_eq!(next_delay(900, 900), 900);
    }

    #[test]
    fn test_backoff_never_drops_below_initial() {
        assert_eq!(next_delay(0, 900), INITIAL_RECONNECT_DELAY_S);
        assert_eq!(next_delay(1, 1), INITIAL_RECONNECT_DELAY_S);
    }
}
