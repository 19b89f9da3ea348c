//! Connect, authenticate, disconnect
//!
//! The connect path opens the socket, chooses IDENTIFY vs RESUME and
//! spawns the reader task. The disconnect path interprets both close
//! frames, cancels the heartbeat and decides between resume, re-identify
//! and shutdown.

use super::{Status, WsSource, IDENTIFY_BACKOFF_MS};
use crate::arbiter::ConnectNode;
use crate::client::ClientInner;
use crate::clock::now_ms;
use crate::connection::reconnect::{self, INITIAL_RECONNECT_DELAY_S};
use crate::dispatch::dispatcher;
use crate::error::GatewayError;
use crate::events::{CloseInfo, GatewayEvent};
use crate::protocol::{
    CloseCode, GatewayMessage, IdentifyPayload, ResumePayload, INVALIDATE_REASON, MALFORMED_REASON,
};
use crate::GATEWAY_VERSION;
use chrono::Utc;
use futures_util::StreamExt;
use gateway_common::GatewayConfig;
use gateway_core::{SessionConnectNode, VoiceStatus};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

/// Build the gateway URL: `<base>/?encoding=json&v=6[&compress=zlib-stream]`
pub(crate) fn gateway_url(config: &GatewayConfig) -> String {
    let mut url = format!(
        "{}/?encoding=json&v={}",
        config.gateway_url.trim_end_matches('/'),
        GATEWAY_VERSION
    );
    if let Some(key) = config.compression.key() {
        url.push_str("&compress=");
        url.push_str(key);
    }
    url
}

/// Open the WebSocket and authenticate.
///
/// On success the reader task owns the read half and the write half is
/// installed for the sender; IDENTIFY or RESUME is already on the wire.
pub(crate) fn connect(
    inner: &Arc<ClientInner>,
) -> Pin<Box<dyn Future<Output = Result<(), GatewayError>> + Send + '_>> {
    Box::pin(async move {
        if inner.status.get() != Status::AttemptingToReconnect {
            inner.status.set(Status::Connecting);
        }
        if inner.is_shutdown() {
            return Err(GatewayError::Shutdown);
        }
        inner.session().initiating = true;

        // The server starts a fresh zlib stream per connection
        inner.reset_decompressor();

        let url = gateway_url(&inner.config);
        let (socket, _response) = connect_async(url.as_str()).await?;
        let (sink, stream) = socket.split();

        inner.install_socket(sink).await;
        inner.connected.store(true, Ordering::SeqCst);
        inner.reconnect_delay_s.store(INITIAL_RECONNECT_DELAY_S, Ordering::SeqCst);
        inner.bucket.reset();
        inner.status.set(Status::Identifying);

        let session_id = inner.session().session_id.clone();
        match session_id {
            None => {
                tracing::info!("connected to WebSocket");
                send_identify(inner).await;
            }
            Some(session_id) => {
                tracing::debug!("connected to WebSocket");
                send_resume(inner, session_id).await;
            }
        }

        tokio::spawn(run_reader(inner.clone(), stream));
        Ok(())
    })
}

async fn send_identify(inner: &Arc<ClientInner>) {
    tracing::debug!("sending Identify packet");
    let payload = IdentifyPayload::new(
        &inner.config.token,
        inner.config.large_threshold,
        inner.presence.full_presence(),
        inner.config.shard,
    );
    match GatewayMessage::identify(&payload).to_json() {
        Ok(text) => {
            let _ = inner.send_text(&text, true).await;
            inner.handle_identify_rate_limit.store(true, Ordering::SeqCst);
            inner.identify_time_ms.store(now_ms(), Ordering::SeqCst);
            inner.session().auth_sent = true;
            inner.status.set(Status::AwaitingLoginConfirmation);
        }
        Err(e) => tracing::error!(error = %e, "failed to serialise IDENTIFY"),
    }
}

async fn send_resume(inner: &Arc<ClientInner>, session_id: String) {
    tracing::debug!("sending Resume packet");
    let payload = ResumePayload {
        session_id,
        token: inner.config.token.clone(),
        seq: inner.last_sequence.load(Ordering::SeqCst),
    };
    match GatewayMessage::resume(&payload).to_json() {
        Ok(text) => {
            let _ = inner.send_text(&text, true).await;
            // auth_sent is only set on the RESUMED response; the resume
            // may still be rejected.
            inner.status.set(Status::AwaitingLoginConfirmation);
        }
        Err(e) => tracing::error!(error = %e, "failed to serialise RESUME"),
    }
}

/// Read frames until the connection dies, then run the disconnect path.
pub(crate) async fn run_reader(inner: Arc<ClientInner>, mut stream: WsSource) {
    let mut server_close: Option<CloseInfo> = None;

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => dispatcher::handle_text(&inner, text.as_str()).await,
            Ok(Message::Binary(data)) => match inner.decompress(&data) {
                Ok(Some(text)) => dispatcher::handle_text(&inner, &text).await,
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(error = %e, "failed to decompress gateway frame");
                    inner.emit(GatewayEvent::Exception {
                        context: format!("failed to decompress gateway frame: {e}"),
                    });
                    inner.close(4000, MALFORMED_REASON).await;
                }
            },
            Ok(Message::Close(frame)) => {
                server_close =
                    frame.map(|f| CloseInfo::new(f.code.into(), f.reason.to_string()));
                break;
            }
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
            Err(e) => {
                tracing::warn!(error = %e, "error in the WebSocket connection");
                inner.emit(GatewayEvent::Exception {
                    context: format!("error in the WebSocket connection: {e}"),
                });
                break;
            }
        }
    }

    on_disconnected(&inner, server_close).await;
}

/// The socket is gone: interpret the close frames and decide what happens
/// next.
pub(crate) async fn on_disconnected(inner: &Arc<ClientInner>, server_close: Option<CloseInfo>) {
    inner.session().auth_sent = false;
    inner.connected.store(false, Ordering::SeqCst);
    inner.status.set(Status::Disconnected);
    inner.stop_heartbeat();
    inner.drop_socket().await;

    let client_close = inner.take_client_close();
    let closed_by_server = client_close.is_none();

    let raw_close_code = server_close.as_ref().map_or(1000, |c| c.code);
    let close_code = CloseCode::from_u16(raw_close_code);
    match close_code {
        Some(CloseCode::RateLimited) => tracing::error!(
            "WebSocket connection closed due to ratelimit! Sent more than 120 websocket \
             messages in under 60 seconds!"
        ),
        Some(code) => tracing::debug!(%code, "WebSocket connection closed"),
        None if server_close.is_some() => tracing::warn!(
            code = raw_close_code,
            "WebSocket connection closed with unknown meaning for close-code"
        ),
        None => {}
    }

    // Closing 1000 with this reason is how the op-9 path drops a dead
    // session; resume is impossible afterwards.
    let is_invalidate = client_close
        .as_ref()
        .is_some_and(|c| c.code == 1000 && c.reason == INVALIDATE_REASON);

    // Unknown close codes are reconnectable
    let close_code_is_reconnect = close_code.is_none_or(CloseCode::should_reconnect);

    if !inner.should_reconnect() || !close_code_is_reconnect || inner.is_shutdown() {
        inner.stop_sender();
        if !close_code_is_reconnect {
            tracing::error!(
                code = raw_close_code,
                "WebSocket connection was closed and cannot be recovered due to \
                 identification issues"
            );
        }
        inner.shutdown_decompressor();
        inner.status.set(Status::Shutdown);
        inner.emit(GatewayEvent::Shutdown { code: raw_close_code, at: Utc::now() });
    } else {
        inner.reset_decompressor();
        if is_invalidate {
            inner.invalidate();
        }
        inner.emit(GatewayEvent::Disconnected {
            server_close,
            client_close,
            closed_by_server,
            at: Utc::now(),
        });
        handle_reconnect(inner).await;
    }
}

/// Decide between the local resume loop and the arbiter queue.
async fn handle_reconnect(inner: &Arc<ClientInner>) {
    let can_resume = inner.session().session_id.is_some();
    if can_resume {
        tracing::warn!("got disconnected from WebSocket, attempting to resume session");
        reconnect::run(inner, false).await;
    } else {
        if inner.handle_identify_rate_limit.load(Ordering::SeqCst) {
            let backoff = identify_backoff_remaining(inner, now_ms());
            if backoff > 0 {
                tracing::error!(
                    backoff_ms = backoff,
                    "encountered IDENTIFY rate limit, waiting before trying again"
                );
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            } else {
                tracing::error!("encountered IDENTIFY rate limit");
            }
        }
        tracing::warn!("got disconnected from WebSocket, appending to reconnect queue");
        queue_reconnect(inner);
    }
}

/// Milliseconds left of the 5-second IDENTIFY spacing
pub(crate) fn identify_backoff_remaining(inner: &ClientInner, now: u64) -> u64 {
    let elapsed = now.saturating_sub(inner.identify_time_ms.load(Ordering::SeqCst));
    IDENTIFY_BACKOFF_MS.saturating_sub(elapsed)
}

/// Hand a RECONNECT node to the arbiter.
pub(crate) fn queue_reconnect(inner: &Arc<ClientInner>) {
    inner.status.set(Status::ReconnectQueued);
    let node: Arc<dyn SessionConnectNode> = Arc::new(ConnectNode::reconnect(inner));
    inner.set_connect_node(node.clone());
    if let Err(e) = inner.arbiter.append_session(node) {
        tracing::error!(error = %e, "reconnect queue rejected session, shutting down");
        inner.status.set(Status::Shutdown);
        inner.emit(GatewayEvent::Shutdown { code: 1006, at: Utc::now() });
    }
}

impl ClientInner {
    /// Drop the dead session: id, auth flag, chunk queue and all entity
    /// caches. Safe to call more than once.
    pub(crate) fn invalidate(&self) {
        {
            let mut session = self.session();
            session.session_id = None;
            session.auth_sent = false;
        }
        self.locked("clearing the chunk queue on invalidate", |q| q.chunk_sync.clear());
        self.caches.clear();
    }

    /// The READY flow finished (or a resume came back). Emits the matching
    /// lifecycle event and moves to CONNECTED.
    pub(crate) fn ready_internal(&self) {
        enum Path {
            FirstReady,
            Reconnected,
            Resumed,
        }

        let sequence = self.last_sequence.load(Ordering::SeqCst);
        let path = {
            let mut session = self.session();
            if session.initiating {
                session.initiating = false;
                session.processing_ready = false;
                if session.first_init {
                    session.first_init = false;
                    Path::FirstReady
                } else {
                    Path::Reconnected
                }
            } else {
                Path::Resumed
            }
        };

        match path {
            Path::FirstReady => {
                tracing::info!("finished loading");
                self.emit(GatewayEvent::Ready { sequence });
            }
            Path::Reconnected => {
                self.update_audio_references();
                tracing::info!("finished (re)loading");
                self.emit(GatewayEvent::Reconnected { sequence });
            }
            Path::Resumed => {
                tracing::info!("successfully resumed session");
                self.emit(GatewayEvent::Resumed { sequence });
            }
        }
        self.status.set(Status::Connected);
    }

    /// After a re-identify, audio managers may point at guilds we no
    /// longer have access to; close those and drop their queued requests.
    fn update_audio_references(&self) {
        for guild_id in self.audio.connected_guilds() {
            if !self.caches.guild_exists(guild_id) {
                tracing::trace!(guild = %guild_id, "audio manager lost its guild during reconnect");
                self.locked("removing voice requests for a lost guild", |q| {
                    q.voice.remove(guild_id);
                });
                self.audio
                    .close_connection(guild_id, VoiceStatus::DisconnectedRemovedDuringReconnect);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::GatewayClient;
    use gateway_common::{Compression, GatewayConfig};
    use gateway_core::{
        ArbiterError, AudioHook, EntityCache, SessionArbiter, Snowflake,
    };
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex;

    struct RecordingArbiter {
        appended: AtomicBool,
    }
    impl RecordingArbiter {
        fn new() -> Arc<Self> {
            Arc::new(Self { appended: AtomicBool::new(false) })
        }
    }
    impl SessionArbiter for RecordingArbiter {
        fn append_session(&self, _node: Arc<dyn SessionConnectNode>) -> Result<(), ArbiterError> {
            self.appended.store(true, Ordering::SeqCst);
            Ok(())
        }
        fn remove_session(&self, _node: &Arc<dyn SessionConnectNode>) -> bool {
            false
        }
    }

    struct RejectingArbiter;
    impl SessionArbiter for RejectingArbiter {
        fn append_session(&self, _node: Arc<dyn SessionConnectNode>) -> Result<(), ArbiterError> {
            Err(ArbiterError::Closed)
        }
        fn remove_session(&self, _node: &Arc<dyn SessionConnectNode>) -> bool {
            false
        }
    }

    struct GoneGuildCache;
    impl EntityCache for GoneGuildCache {
        fn guild_exists(&self, _: Snowflake) -> bool {
            false
        }
        fn voice_channel_exists(&self, _: Snowflake, _: Snowflake) -> bool {
            false
        }
        fn can_voice_connect(&self, _: Snowflake, _: Snowflake) -> bool {
            false
        }
        fn clear(&self) {}
        fn timeout(&self, _: u64) {}
    }

    #[derive(Default)]
    struct RecordingAudio {
        closed: Mutex<Vec<(Snowflake, VoiceStatus)>>,
    }
    impl AudioHook for RecordingAudio {
        fn connected_guilds(&self) -> Vec<Snowflake> {
            vec![Snowflake::new(5)]
        }
        fn on_status_change(&self, _: Snowflake, _: VoiceStatus) {}
        fn close_connection(&self, guild_id: Snowflake, status: VoiceStatus) {
            self.closed.lock().unwrap().push((guild_id, status));
        }
    }

    fn client_with_arbiter(arbiter: Arc<dyn SessionArbiter>) -> GatewayClient {
        GatewayClient::builder(GatewayConfig::new("test-token"))
            .arbiter(arbiter)
            .build()
    }

    #[test]
    fn test_gateway_url_with_compression() {
        let config = GatewayConfig::new("t");
        assert_eq!(
            gateway_url(&config),
            "wss://gateway.discord.gg/?encoding=json&v=6&compress=zlib-stream"
        );
    }

    #[test]
    fn test_gateway_url_without_compression() {
        let mut config = GatewayConfig::new("t");
        config.compression = Compression::None;
        config.gateway_url = "wss://example.test/".to_string();
        assert_eq!(gateway_url(&config), "wss://example.test/?encoding=json&v=6");
    }

    #[test]
    fn test_identify_backoff_remaining() {
        let client = client_with_arbiter(RecordingArbiter::new());
        let inner = client.inner();

        inner.identify_time_ms.store(10_000, Ordering::SeqCst);
        assert_eq!(identify_backoff_remaining(inner, 12_000), 3_000);
        assert_eq!(identify_backoff_remaining(inner, 15_000), 0);
        assert_eq!(identify_backoff_remaining(inner, 20_000), 0);
    }

    #[tokio::test]
    async fn test_fatal_close_shuts_down_without_reconnect() {
        let arbiter = RecordingArbiter::new();
        let client = client_with_arbiter(arbiter.clone());
        let inner = client.inner();
        let mut events = client.subscribe();

        on_disconnected(inner, Some(CloseInfo::new(4004, "Authentication failed"))).await;

        assert_eq!(client.status(), Status::Shutdown);
        assert!(!arbiter.appended.load(Ordering::SeqCst));
        match events.try_recv() {
            Ok(GatewayEvent::Shutdown { code, .. }) => assert_eq!(code, 4004),
            other => panic!("expected shutdown event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_recoverable_close_without_session_queues_reconnect() {
        let arbiter = RecordingArbiter::new();
        let client = client_with_arbiter(arbiter.clone());
        let inner = client.inner();
        let mut events = client.subscribe();

        on_disconnected(inner, Some(CloseInfo::new(4000, ""))).await;

        assert_eq!(client.status(), Status::ReconnectQueued);
        assert!(arbiter.appended.load(Ordering::SeqCst));
        match events.try_recv() {
            Ok(GatewayEvent::Disconnected { server_close, closed_by_server, .. }) => {
                assert_eq!(server_close.unwrap().code, 4000);
                assert!(closed_by_server);
            }
            other => panic!("expected disconnect event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_client_invalidate_close_clears_session_before_reconnect() {
        let arbiter = RecordingArbiter::new();
        let client = client_with_arbiter(arbiter.clone());
        let inner = client.inner();
        inner.session().session_id = Some("abc".to_string());

        // As if op 9 (d=false) had closed the socket from our side
        inner.close(1000, INVALIDATE_REASON).await;
        on_disconnected(inner, Some(CloseInfo::new(1000, INVALIDATE_REASON))).await;

        assert!(inner.session().session_id.is_none());
        assert_eq!(client.status(), Status::ReconnectQueued);
        assert!(arbiter.appended.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_arbiter_rejection_shuts_down_with_1006() {
        let client = client_with_arbiter(Arc::new(RejectingArbiter));
        let inner = client.inner();
        let mut events = client.subscribe();

        on_disconnected(inner, Some(CloseInfo::new(4000, ""))).await;

        assert_eq!(client.status(), Status::Shutdown);
        // First event is the disconnect, second the shutdown
        let mut saw_shutdown = false;
        while let Ok(event) = events.try_recv() {
            if let GatewayEvent::Shutdown { code, .. } = event {
                assert_eq!(code, 1006);
                saw_shutdown = true;
            }
        }
        assert!(saw_shutdown);
    }

    #[tokio::test]
    async fn test_ready_first_time_emits_ready() {
        let client = client_with_arbiter(RecordingArbiter::new());
        let inner = client.inner();
        let mut events = client.subscribe();

        inner.last_sequence.store(7, Ordering::SeqCst);
        inner.ready_internal();

        assert_eq!(client.status(), Status::Connected);
        assert!(client.is_ready());
        assert!(!inner.session().first_init);
        assert!(matches!(events.try_recv(), Ok(GatewayEvent::Ready { sequence: 7 })));
    }

    #[tokio::test]
    async fn test_ready_after_reidentify_closes_lost_audio() {
        let audio = Arc::new(RecordingAudio::default());
        let client = GatewayClient::builder(GatewayConfig::new("t"))
            .arbiter(RecordingArbiter::new())
            .caches(Arc::new(GoneGuildCache))
            .audio(audio.clone())
            .build();
        let inner = client.inner();
        let mut events = client.subscribe();

        // First ready consumed first_init
        inner.ready_internal();
        let _ = events.try_recv();

        // Re-identify: initiating is set again by the READY dispatch
        {
            let mut session = inner.session();
            session.initiating = true;
            session.processing_ready = true;
        }
        client.queue_audio_connect(Snowflake::new(5), Snowflake::new(50));
        inner.ready_internal();

        assert!(matches!(events.try_recv(), Ok(GatewayEvent::Reconnected { .. })));
        assert_eq!(
            *audio.closed.lock().unwrap(),
            vec![(Snowflake::new(5), VoiceStatus::DisconnectedRemovedDuringReconnect)]
        );
        // The queued request for the lost guild is gone too
        assert!(client.remove_audio_connection(Snowflake::new(5)).is_none());
    }

    #[tokio::test]
    async fn test_shutdown_flag_makes_any_close_final() {
        let client = client_with_arbiter(RecordingArbiter::new());
        let inner = client.inner();
        inner.request_shutdown();

        on_disconnected(inner, Some(CloseInfo::new(1000, ""))).await;
        assert_eq!(client.status(), Status::Shutdown);
    }
}
