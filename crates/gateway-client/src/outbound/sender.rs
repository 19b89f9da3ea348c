//! The single-writer sender task
//!
//! Drains the priority queues in order (chunk/sync, voice, general) under
//! the rate bucket. Parks while disconnected or unauthenticated, on an
//! empty pass, and for the remainder of the window after a denied permit.

use super::SendResult;
use crate::client::ClientInner;
use crate::clock::now_ms;
use crate::protocol::{GatewayMessage, VoiceStateUpdatePayload};
use crate::voice::{ConnectionStage, VoiceRequest};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// How long a sent voice request waits for the server's confirmation
/// before the sender re-sends it
const VOICE_RESEND_BACKOFF_MS: u64 = 2_000;

/// Upper bound on idle parking, so flag changes are always noticed
const IDLE_PARK: Duration = Duration::from_millis(500);

pub(crate) fn spawn_sender(inner: Arc<ClientInner>) -> JoinHandle<()> {
    tokio::spawn(run(inner))
}

async fn run(inner: Arc<ClientInner>) {
    tracing::debug!("sender loop started");
    let mut status_rx = inner.status.subscribe();

    loop {
        if inner.is_shutdown() {
            break;
        }

        // No sends before the socket is up and our auth was acknowledged
        if !inner.is_connected() || !inner.auth_sent() {
            tokio::select! {
                changed = status_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                () = tokio::time::sleep(IDLE_PARK) => {}
            }
            continue;
        }

        match attempt_next(&inner).await {
            Outcome::Sent => {}
            Outcome::RateLimited => {
                let wait = inner.bucket.window_remaining().max(Duration::from_millis(10));
                tokio::time::sleep(wait).await;
            }
            Outcome::Idle => {
                tokio::select! {
                    () = inner.queue_signal.notified() => {}
                    () = tokio::time::sleep(IDLE_PARK) => {}
                }
            }
        }
    }
    tracing::debug!("sender loop exited");
}

enum Outcome {
    Sent,
    RateLimited,
    Idle,
}

/// Try to put exactly one queued message on the wire
async fn attempt_next(inner: &Arc<ClientInner>) -> Outcome {
    // 1. Chunk/sync requests
    if let Some(message) = inner
        .locked("reading the chunk queue", |q| q.chunk_sync.front().cloned())
        .flatten()
    {
        return match inner.send_text(&message, false).await {
            SendResult::Sent => {
                inner.locked("popping the chunk queue", |q| {
                    q.chunk_sync.pop_front();
                });
                Outcome::Sent
            }
            SendResult::RateLimited => Outcome::RateLimited,
            SendResult::NotConnected => Outcome::Idle,
        };
    }

    // 2. A due voice request; only once the session finished loading
    if inner.is_ready() {
        if let Some(request) = select_voice_request(inner) {
            return send_voice_request(inner, request).await;
        }
    }

    // 3. General messages
    if let Some(message) = inner
        .locked("reading the general queue", |q| q.general.front().cloned())
        .flatten()
    {
        return match inner.send_text(&message, false).await {
            SendResult::Sent => {
                inner.locked("popping the general queue", |q| {
                    q.general.pop_front();
                });
                Outcome::Sent
            }
            SendResult::RateLimited => Outcome::RateLimited,
            SendResult::NotConnected => Outcome::Idle,
        };
    }

    Outcome::Idle
}

/// Pick the next actionable voice request and deliver eviction
/// notifications outside the queue lock.
fn select_voice_request(inner: &Arc<ClientInner>) -> Option<VoiceRequest> {
    let now = now_ms();
    let (selected, evicted) = inner
        .locked("selecting a voice request", |q| {
            q.voice.next_ready(now, inner.caches.as_ref())
        })?;

    for (guild_id, status) in evicted {
        tracing::debug!(guild = %guild_id, status = %status, "dropping queued voice request");
        inner.audio.on_status_change(guild_id, status);
    }
    selected
}

async fn send_voice_request(inner: &Arc<ClientInner>, request: VoiceRequest) -> Outcome {
    let channel_id = match request.stage {
        ConnectionStage::Disconnect => None,
        ConnectionStage::Connect | ConnectionStage::Reconnect => request.channel_id,
    };
    let prefs = inner.audio.voice_prefs(request.guild_id);
    let payload = VoiceStateUpdatePayload::new(request.guild_id, channel_id, prefs);
    let message = match GatewayMessage::voice_state_update(&payload).to_json() {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(error = %e, "failed to serialise voice state update");
            return Outcome::Idle;
        }
    };

    match inner.send_text(&message, false).await {
        SendResult::Sent => {
            // Keep the request queued until the server confirms, but do not
            // re-send it before the confirmation window passes.
            inner.locked("deferring a sent voice request", |q| {
                q.voice.defer(request.guild_id, now_ms() + VOICE_RESEND_BACKOFF_MS);
            });
            Outcome::Sent
        }
        SendResult::RateLimited => Outcome::RateLimited,
        SendResult::NotConnected => Outcome::Idle,
    }
}
