//! Opcode demultiplexer and DISPATCH router

use crate::client::ClientInner;
use crate::clock::now_ms;
use crate::connection::{Status, IDENTIFY_BACKOFF_MS};
use crate::dispatch::HandlerError;
use crate::events::GatewayEvent;
use crate::heartbeat;
use crate::protocol::{HelloPayload, OpCode, INVALIDATE_REASON, MALFORMED_REASON};
use serde_json::Value;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Parse one inbound JSON text and feed it to the opcode demux.
///
/// A text that does not parse is a malformed frame: close 4000 and rely on
/// the resume path.
pub(crate) async fn handle_text(inner: &Arc<ClientInner>, text: &str) {
    match serde_json::from_str::<Value>(text) {
        Ok(frame) => handle_frame(inner, frame).await,
        Err(e) => {
            tracing::error!(error = %e, "failed to parse gateway frame");
            inner.emit(GatewayEvent::Exception {
                context: format!("failed to parse gateway frame: {e}"),
            });
            inner.close(4000, MALFORMED_REASON).await;
        }
    }
}

/// Demultiplex one inbound frame by opcode
pub(crate) async fn handle_frame(inner: &Arc<ClientInner>, frame: Value) {
    if !frame.is_object() {
        tracing::debug!("dropping non-object gateway payload");
        return;
    }

    if let Some(s) = frame.get("s").and_then(Value::as_u64) {
        inner.last_sequence.fetch_max(s, Ordering::SeqCst);
    }

    let raw_op = frame.get("op").and_then(Value::as_u64);
    let op = raw_op
        .and_then(|v| u8::try_from(v).ok())
        .and_then(OpCode::from_u8);
    let Some(op) = op else {
        tracing::debug!(op = ?raw_op, "got unknown op-code");
        return;
    };

    match op {
        OpCode::Dispatch => on_dispatch(inner, frame),
        OpCode::Heartbeat => {
            tracing::debug!("got keep-alive request (OP 1), sending response");
            heartbeat::beat(inner).await;
        }
        OpCode::Reconnect => {
            tracing::debug!("got reconnect request (OP 7), closing connection");
            inner.close(4000, "OP 7: RECONNECT").await;
        }
        OpCode::InvalidateSession => on_invalidate(inner, &frame).await,
        OpCode::Hello => {
            tracing::debug!("got HELLO packet (OP 10), initializing keep-alive");
            let hello = frame
                .get("d")
                .cloned()
                .and_then(|d| serde_json::from_value::<HelloPayload>(d).ok());
            match hello {
                Some(hello) => inner.start_heartbeat(hello.heartbeat_interval),
                None => tracing::warn!("HELLO without heartbeat_interval"),
            }
        }
        OpCode::HeartbeatAck => {
            tracing::trace!("got heartbeat ACK (OP 11)");
            let sent_at = inner.heartbeat_sent_at_ms.load(Ordering::SeqCst);
            inner.record_ping(now_ms().saturating_sub(sent_at));
            inner.acks_pending.store(0, Ordering::SeqCst);
        }
        other => tracing::debug!(op = %other, "got unexpected op-code"),
    }
}

/// Op 9: the server declared the session invalid.
///
/// `d == true` means the session survives; close 4000 and resume. `d ==
/// false` drops the session; close 1000 so the disconnect handler
/// invalidates and re-identifies.
async fn on_invalidate(inner: &Arc<ClientInner>, frame: &Value) {
    tracing::debug!("got invalidate request (OP 9), invalidating...");

    let elapsed = now_ms().saturating_sub(inner.identify_time_ms.load(Ordering::SeqCst));
    if elapsed >= IDENTIFY_BACKOFF_MS {
        inner.handle_identify_rate_limit.store(false, Ordering::SeqCst);
    }

    inner.session().auth_sent = false;

    let can_resume = frame.get("d").and_then(Value::as_bool).unwrap_or(false);
    let close_code = if can_resume { 4000 } else { 1000 };
    if can_resume {
        tracing::debug!("session can be recovered, closing and sending new RESUME request");
    } else {
        inner.invalidate();
    }
    inner.close(close_code, INVALIDATE_REASON).await;
}

/// Op 0: route by event name
fn on_dispatch(inner: &Arc<ClientInner>, raw: Value) {
    let sequence = inner.last_sequence.load(Ordering::SeqCst);
    let event_type = raw
        .get("t")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();

    let body_is_object = raw.get("d").is_some_and(Value::is_object);
    if !body_is_object {
        match raw.get("d") {
            Some(Value::Array(presences)) if event_type == "PRESENCES_REPLACE" => {
                dispatch_presences_replace(inner, sequence, presences);
            }
            _ => tracing::debug!(%event_type, "received event with unhandled body type"),
        }
        return;
    }

    tracing::trace!(%event_type, s = sequence, "-> dispatch");

    match event_type.as_str() {
        "READY" => {
            inner.status.set(Status::LoadingSubsystems);
            {
                let mut session = inner.session();
                session.processing_ready = true;
                session.session_id = raw
                    .pointer("/d/session_id")
                    .and_then(Value::as_str)
                    .map(str::to_owned);
                session.initiating = true;
            }
            inner.handle_identify_rate_limit.store(false, Ordering::SeqCst);
            run_handler(inner, "READY", sequence, &raw);
        }
        "RESUMED" => {
            let processing_ready = {
                let mut session = inner.session();
                session.auth_sent = true;
                session.processing_ready
            };
            if processing_ready {
                tracing::debug!("resumed while still processing initial ready");
                inner.status.set(Status::LoadingSubsystems);
            } else {
                inner.session().initiating = false;
                inner.ready_internal();
            }
        }
        _ => run_handler(inner, &event_type, sequence, &raw),
    }

    // Raw event after the handler has mutated caches
    if inner.config.raw_events {
        inner.emit(GatewayEvent::Raw { sequence, frame: raw });
    }

    let interval = inner.caches.timeout_interval();
    if interval > 0 && sequence > 0 && sequence % interval == 0 {
        inner.caches.timeout(sequence);
    }
}

/// `PRESENCES_REPLACE` carries an array; synthesise one PRESENCE_UPDATE
/// frame per element.
fn dispatch_presences_replace(inner: &Arc<ClientInner>, sequence: u64, presences: &[Value]) {
    tracing::trace!(count = presences.len(), "PRESENCES_REPLACE");
    for presence in presences {
        let synthetic = serde_json::json!({
            "comment": "constructed from a PRESENCES_REPLACE payload",
            "op": 0,
            "s": sequence,
            "t": "PRESENCE_UPDATE",
            "d": presence,
        });
        run_handler(inner, "PRESENCE_UPDATE", sequence, &synthetic);
        if inner.config.raw_events {
            inner.emit(GatewayEvent::Raw { sequence, frame: synthetic });
        }
    }
}

/// Invoke a registered handler, absorbing its failures.
fn run_handler(inner: &Arc<ClientInner>, event_type: &str, sequence: u64, frame: &Value) {
    let Some(handler) = inner.handler(event_type) else {
        tracing::debug!(%event_type, "unrecognized event");
        return;
    };
    if let Err(e) = handler.handle(sequence, frame) {
        match e {
            HandlerError::Parse(message) => {
                tracing::warn!(%event_type, error = %message, "unexpected JSON shape in dispatch");
            }
            other => {
                tracing::error!(%event_type, error = %other, "handler failed");
                inner.emit(GatewayEvent::Exception {
                    context: format!("{event_type} handler failed: {other}"),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::GatewayClient;
    use crate::dispatch::SocketHandler;
    use gateway_core::{ArbiterError, EntityCache, SessionArbiter, SessionConnectNode, Snowflake};
    use gateway_common::GatewayConfig;
    use serde_json::json;
    use std::sync::atomic::AtomicU64;
    use std::sync::Mutex;
    use std::time::Duration;

    struct InertArbiter;
    impl SessionArbiter for InertArbiter {
        fn append_session(&self, _node: Arc<dyn SessionConnectNode>) -> Result<(), ArbiterError> {
            Ok(())
        }
        fn remove_session(&self, _node: &Arc<dyn SessionConnectNode>) -> bool {
            true
        }
    }

    #[derive(Default)]
    struct CountingCache {
        timeouts: Mutex<Vec<u64>>,
        cleared: AtomicU64,
    }
    impl EntityCache for CountingCache {
        fn guild_exists(&self, _: Snowflake) -> bool {
            true
        }
        fn voice_channel_exists(&self, _: Snowflake, _: Snowflake) -> bool {
            true
        }
        fn can_voice_connect(&self, _: Snowflake, _: Snowflake) -> bool {
            true
        }
        fn clear(&self) {
            self.cleared.fetch_add(1, Ordering::SeqCst);
        }
        fn timeout(&self, last_sequence: u64) {
            self.timeouts.lock().unwrap().push(last_sequence);
        }
        fn timeout_interval(&self) -> u64 {
            3
        }
    }

    fn client_with(caches: Arc<dyn EntityCache>) -> GatewayClient {
        GatewayClient::builder(GatewayConfig::new("test-token"))
            .arbiter(Arc::new(InertArbiter))
            .caches(caches)
            .build()
    }

    fn client() -> GatewayClient {
        client_with(Arc::new(CountingCache::default()))
    }

    #[tokio::test]
    async fn test_sequence_is_max_of_old_and_new() {
        let client = client();
        let inner = client.inner();

        handle_frame(inner, json!({"op": 0, "t": "X", "s": 5, "d": {}})).await;
        assert_eq!(client.last_sequence(), 5);

        // A smaller sequence never rolls it back
        handle_frame(inner, json!({"op": 0, "t": "X", "s": 2, "d": {}})).await;
        assert_eq!(client.last_sequence(), 5);

        handle_frame(inner, json!({"op": 0, "t": "X", "s": 9, "d": {}})).await;
        assert_eq!(client.last_sequence(), 9);
    }

    #[tokio::test]
    async fn test_non_object_payload_is_dropped() {
        let client = client();
        handle_frame(client.inner(), json!([1, 2, 3])).await;
        handle_frame(client.inner(), json!("nope")).await;
        assert_eq!(client.last_sequence(), 0);
    }

    #[tokio::test]
    async fn test_ready_sets_session_and_runs_handler() {
        let calls = Arc::new(AtomicU64::new(0));
        let seen = calls.clone();
        let handler: Arc<dyn SocketHandler> =
            Arc::new(move |_seq: u64, frame: &Value| -> Result<(), HandlerError> {
                assert_eq!(frame["d"]["session_id"], "abc");
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });

        let client = GatewayClient::builder(GatewayConfig::new("t"))
            .arbiter(Arc::new(InertArbiter))
            .handler("READY", handler)
            .build();

        handle_frame(
            client.inner(),
            json!({"op": 0, "t": "READY", "s": 1, "d": {"session_id": "abc"}}),
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(client.session_id().as_deref(), Some("abc"));
        assert_eq!(client.status(), Status::LoadingSubsystems);
        assert!(client.inner().session().processing_ready);
    }

    #[tokio::test]
    async fn test_resumed_after_ready_processing_signals_ready() {
        let client = client();
        let inner = client.inner();
        {
            let mut session = inner.session();
            session.processing_ready = false;
            session.initiating = true;
            session.first_init = false;
        }

        let mut events = client.subscribe();
        handle_frame(inner, json!({"op": 0, "t": "RESUMED", "s": 3, "d": {}})).await;

        assert!(inner.session().auth_sent);
        assert!(!inner.session().initiating);
        assert_eq!(client.status(), Status::Connected);
        assert!(matches!(events.try_recv(), Ok(GatewayEvent::Resumed { sequence: 3 })));
    }

    #[tokio::test]
    async fn test_op7_reconnect_closes_4000() {
        let client = client();
        handle_frame(client.inner(), json!({"op": 7})).await;

        let close = client.inner().take_client_close().unwrap();
        assert_eq!(close.code, 4000);
        assert_eq!(close.reason, "OP 7: RECONNECT");
    }

    #[tokio::test]
    async fn test_op9_not_resumable_invalidates_and_closes_1000() {
        let caches = Arc::new(CountingCache::default());
        let client = client_with(caches.clone());
        let inner = client.inner();
        inner.session().session_id = Some("abc".to_string());

        handle_frame(inner, json!({"op": 9, "d": false})).await;

        let close = inner.take_client_close().unwrap();
        assert_eq!(close.code, 1000);
        assert_eq!(close.reason, INVALIDATE_REASON);
        assert!(inner.session().session_id.is_none());
        assert_eq!(caches.cleared.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_op9_resumable_closes_4000_and_keeps_session() {
        let client = client();
        let inner = client.inner();
        inner.session().session_id = Some("abc".to_string());
        inner.session().auth_sent = true;

        handle_frame(inner, json!({"op": 9, "d": true})).await;

        let close = inner.take_client_close().unwrap();
        assert_eq!(close.code, 4000);
        assert_eq!(close.reason, INVALIDATE_REASON);
        assert_eq!(inner.session().session_id.as_deref(), Some("abc"));
        assert!(!inner.session().auth_sent);
    }

    #[tokio::test]
    async fn test_hello_starts_keepalive() {
        let client = client();
        handle_frame(
            client.inner(),
            json!({"op": 10, "d": {"heartbeat_interval": 41250}}),
        )
        .await;
        // Scheduler exists until a disconnect cancels it
        client.inner().stop_heartbeat();
    }

    #[tokio::test]
    async fn test_heartbeat_ack_publishes_ping() {
        let client = client();
        let inner = client.inner();
        inner.heartbeat_sent_at_ms.store(now_ms() - 25, Ordering::SeqCst);
        inner.acks_pending.store(1, Ordering::SeqCst);

        handle_frame(inner, json!({"op": 11})).await;

        assert!(client.ping().is_some());
        assert!(client.ping().unwrap() >= Duration::from_millis(25));
        assert_eq!(inner.acks_pending.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_presences_replace_synthesises_updates() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let seen = calls.clone();
        let handler: Arc<dyn SocketHandler> =
            Arc::new(move |_seq: u64, frame: &Value| -> Result<(), HandlerError> {
                seen.lock().unwrap().push(frame["d"]["user"].clone());
                assert_eq!(frame["t"], "PRESENCE_UPDATE");
                Ok(())
            });

        let client = GatewayClient::builder(GatewayConfig::new("t"))
            .arbiter(Arc::new(InertArbiter))
            .handler("PRESENCE_UPDATE", handler)
            .build();

        handle_frame(
            client.inner(),
            json!({"op": 0, "t": "PRESENCES_REPLACE", "s": 4,
                   "d": [{"user": "a"}, {"user": "b"}]}),
        )
        .await;

        assert_eq!(calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_cache_timeout_fires_on_interval() {
        let caches = Arc::new(CountingCache::default());
        let client = client_with(caches.clone());
        let inner = client.inner();

        for s in 1..=7u64 {
            handle_frame(inner, json!({"op": 0, "t": "X", "s": s, "d": {}})).await;
        }

        // interval is 3 in the stub
        assert_eq!(*caches.timeouts.lock().unwrap(), vec![3, 6]);
    }

    #[tokio::test]
    async fn test_handler_failure_is_absorbed_and_emitted() {
        let handler: Arc<dyn SocketHandler> = Arc::new(|_seq: u64, _frame: &Value| {
            Err(HandlerError::Internal("boom".to_string()))
        });
        let client = GatewayClient::builder(GatewayConfig::new("t"))
            .arbiter(Arc::new(InertArbiter))
            .handler("MESSAGE_CREATE", handler)
            .build();

        let mut events = client.subscribe();
        handle_frame(
            client.inner(),
            json!({"op": 0, "t": "MESSAGE_CREATE", "s": 1, "d": {}}),
        )
        .await;

        match events.try_recv() {
            Ok(GatewayEvent::Exception { context }) => assert!(context.contains("boom")),
            other => panic!("expected exception event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_parse_error_in_handler_skips_frame_quietly() {
        let handler: Arc<dyn SocketHandler> =
            Arc::new(|_seq: u64, _frame: &Value| Err(HandlerError::Parse("bad".to_string())));
        let client = GatewayClient::builder(GatewayConfig::new("t"))
            .arbiter(Arc::new(InertArbiter))
            .handler("MESSAGE_CREATE", handler)
            .build();

        let mut events = client.subscribe();
        handle_frame(
            client.inner(),
            json!({"op": 0, "t": "MESSAGE_CREATE", "s": 1, "d": {}}),
        )
        .await;

        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_malformed_text_closes_4000() {
        let client = client();
        handle_text(client.inner(), "{not json").await;

        let close = client.inner().take_client_close().unwrap();
        assert_eq!(close.code, 4000);
        assert_eq!(close.reason, MALFORMED_REASON);
    }

    #[tokio::test]
    async fn test_raw_events_follow_handler() {
        let mut config = GatewayConfig::new("t");
        config.raw_events = true;
        let client = GatewayClient::builder(config)
            .arbiter(Arc::new(InertArbiter))
            .build();

        let mut events = client.subscribe();
        handle_frame(
            client.inner(),
            json!({"op": 0, "t": "TYPING_START", "s": 2, "d": {"user_id": "1"}}),
        )
        .await;

        match events.try_recv() {
            Ok(GatewayEvent::Raw { sequence, frame }) => {
                assert_eq!(sequence, 2);
                assert_eq!(frame["t"], "TYPING_START");
            }
            other => panic!("expected raw event, got {other:?}"),
        }
    }
}
