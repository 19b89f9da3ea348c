//! Heartbeat scheduler
//!
//! HELLO supplies the interval; the scheduler fires immediately and then
//! every interval, sending HEARTBEAT with the last seen sequence through
//! the priority send path. HEARTBEAT_ACK latency is published as the
//! session ping. The task is aborted on every disconnect and recreated on
//! every HELLO.

use crate::client::ClientInner;
use crate::clock::now_ms;
use crate::outbound::SendResult;
use crate::protocol::GatewayMessage;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub(crate) fn spawn_heartbeat(inner: Arc<ClientInner>, interval_ms: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if inner.is_shutdown() {
                break;
            }
            if !inner.is_connected() {
                continue;
            }
            beat(&inner).await;
        }
    })
}

/// Send one heartbeat now.
///
/// Also the response to a server-sent HEARTBEAT (op 1).
pub(crate) async fn beat(inner: &Arc<ClientInner>) {
    if let Some(limit) = inner.config.missed_heartbeat_limit {
        let pending = inner.acks_pending.load(Ordering::SeqCst);
        if pending >= limit {
            tracing::warn!(
                pending,
                "heartbeats are not being acknowledged; closing to force a resume"
            );
            inner.close(4000, "MISSED_HEARTBEAT_ACK").await;
            return;
        }
    }

    let message = GatewayMessage::heartbeat(inner.last_sequence.load(Ordering::SeqCst));
    match message.to_json() {
        Ok(text) => {
            if inner.send_text(&text, true).await == SendResult::Sent {
                inner.acks_pending.fetch_add(1, Ordering::SeqCst);
            }
            inner.heartbeat_sent_at_ms.store(now_ms(), Ordering::SeqCst);
        }
        Err(e) => tracing::error!(error = %e, "failed to serialise heartbeat"),
    }
}
