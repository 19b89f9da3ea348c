//! Gateway client
//!
//! [`GatewayClient`] is the public handle; [`ClientInner`] is the owning
//! context shared by the sender, heartbeat, reader and connect tasks.
//!
//! Locking discipline:
//! - `queues` (one mutex for all three priority queues and the voice
//!   table): held only for queue mutations, never across `.await`.
//! - `decompressor` (the read lock): held only for the duration of one
//!   `decompress` call, released before dispatch.
//! - `socket` (tokio mutex over the write half): every text send and
//!   close frame goes through it, so writes never interleave.

use crate::arbiter::ConnectNode;
use crate::compress::{DecompressError, Decompressor};
use crate::connection::{SessionState, Status, StatusCell, WsSink};
use crate::dispatch::SocketHandler;
use crate::error::GatewayError;
use crate::events::{CloseInfo, GatewayEvent};
use crate::hooks::{NullAudioHook, PermissiveCache, StaticPresence};
use crate::outbound::{OutboundQueues, SendResult};
use crate::ratelimit::{Permit, RateLimitBucket};
use crate::voice::VoiceRequest;
use crate::{arbiter::SerialArbiter, clock::now_ms, heartbeat, outbound};

use futures_util::SinkExt;
use gateway_common::GatewayConfig;
use gateway_core::{
    AudioHook, EntityCache, PresenceProvider, SessionArbiter, SessionConnectNode, Snowflake,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

/// The owning context behind a [`GatewayClient`]
pub(crate) struct ClientInner {
    pub(crate) config: GatewayConfig,

    pub(crate) status: StatusCell,
    pub(crate) session: Mutex<SessionState>,
    pub(crate) last_sequence: AtomicU64,
    /// Round-trip time of the latest acknowledged heartbeat; `u64::MAX`
    /// until the first ACK arrives
    ping_ms: AtomicU64,

    pub(crate) bucket: RateLimitBucket,
    queues: Mutex<OutboundQueues>,
    pub(crate) queue_signal: Notify,

    socket: AsyncMutex<Option<WsSink>>,
    client_close: Mutex<Option<CloseInfo>>,
    decompressor: Mutex<Decompressor>,

    handlers: RwLock<HashMap<String, Arc<dyn SocketHandler>>>,
    events: broadcast::Sender<GatewayEvent>,

    pub(crate) caches: Arc<dyn EntityCache>,
    pub(crate) audio: Arc<dyn AudioHook>,
    pub(crate) presence: Arc<dyn PresenceProvider>,
    pub(crate) arbiter: Arc<dyn SessionArbiter>,
    connect_node: Mutex<Option<Arc<dyn SessionConnectNode>>>,

    shutdown: AtomicBool,
    should_reconnect: AtomicBool,
    pub(crate) handle_identify_rate_limit: AtomicBool,
    pub(crate) identify_time_ms: AtomicU64,
    pub(crate) connected: AtomicBool,
    pub(crate) reconnect_delay_s: AtomicU64,

    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
    pub(crate) heartbeat_sent_at_ms: AtomicU64,
    pub(crate) acks_pending: AtomicU32,
    sender_task: Mutex<Option<JoinHandle<()>>>,
}

impl ClientInner {
    pub(crate) fn session(&self) -> MutexGuard<'_, SessionState> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` under the queue lock; a poisoned lock drops the mutation.
    pub(crate) fn locked<T>(
        &self,
        what: &str,
        f: impl FnOnce(&mut OutboundQueues) -> T,
    ) -> Option<T> {
        match self.queues.lock() {
            Ok(mut queues) => Some(f(&mut queues)),
            Err(_) => {
                tracing::error!("queue lock poisoned while {what}");
                None
            }
        }
    }

    pub(crate) fn emit(&self, event: GatewayEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub(crate) fn should_reconnect(&self) -> bool {
        self.should_reconnect.load(Ordering::SeqCst)
    }

    pub(crate) fn is_ready(&self) -> bool {
        !self.session().initiating
    }

    pub(crate) fn auth_sent(&self) -> bool {
        self.session().auth_sent
    }

    pub(crate) fn ping(&self) -> Option<Duration> {
        match self.ping_ms.load(Ordering::SeqCst) {
            u64::MAX => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub(crate) fn record_ping(&self, ms: u64) {
        self.ping_ms.store(ms, Ordering::SeqCst);
    }

    pub(crate) fn handler(&self, event_type: &str) -> Option<Arc<dyn SocketHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event_type)
            .cloned()
    }

    pub(crate) fn register_handler(&self, event_type: String, handler: Arc<dyn SocketHandler>) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(event_type, handler);
    }

    pub(crate) fn remove_handler(&self, event_type: &str) -> Option<Arc<dyn SocketHandler>> {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(event_type)
    }

    /// Push one text message at the socket, consuming a bucket permit.
    ///
    /// The single primitive shared by the sender loop and the priority
    /// path (heartbeat, IDENTIFY, RESUME).
    pub(crate) async fn send_text(&self, message: &str, priority: bool) -> SendResult {
        if !self.is_connected() {
            return SendResult::NotConnected;
        }

        match self.bucket.try_acquire(priority) {
            Permit::Granted => {}
            Permit::Denied { first_denial } => {
                if first_denial {
                    let (chunk, voice, general) = self.queue_depths();
                    tracing::warn!(
                        general,
                        voice,
                        chunk,
                        "hit the WebSocket rate limit; this can be caused by too many \
                         presence or voice status updates (connect/disconnect/mute/deaf)"
                    );
                }
                return SendResult::RateLimited;
            }
        }

        let mut socket = self.socket.lock().await;
        match socket.as_mut() {
            Some(sink) => {
                tracing::trace!("<- {message}");
                match sink.send(Message::Text(message.to_owned().into())).await {
                    Ok(()) => SendResult::Sent,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to write to the WebSocket");
                        SendResult::NotConnected
                    }
                }
            }
            None => SendResult::NotConnected,
        }
    }

    /// Send a close frame, recording it as our close for the disconnect
    /// handler. Control frames share the socket lock but are not counted
    /// by the rate bucket.
    pub(crate) async fn close(&self, code: u16, reason: &str) {
        {
            let mut slot = self.client_close.lock().unwrap_or_else(PoisonError::into_inner);
            *slot = Some(CloseInfo::new(code, reason));
        }
        let mut socket = self.socket.lock().await;
        if let Some(sink) = socket.as_mut() {
            let frame = CloseFrame {
                code: WsCloseCode::from(code),
                reason: reason.to_owned().into(),
            };
            if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                tracing::debug!(error = %e, "failed to send close frame");
            }
        }
    }

    pub(crate) async fn install_socket(&self, sink: WsSink) {
        *self.socket.lock().await = Some(sink);
    }

    pub(crate) async fn drop_socket(&self) {
        *self.socket.lock().await = None;
    }

    pub(crate) fn take_client_close(&self) -> Option<CloseInfo> {
        self.client_close
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn queue_depths(&self) -> (usize, usize, usize) {
        self.locked("reading queue depths", |queues: &mut OutboundQueues| queues.depths())
            .unwrap_or((0, 0, 0))
    }

    /// Decompress one binary frame under the read lock
    pub(crate) fn decompress(&self, data: &[u8]) -> Result<Option<String>, DecompressError> {
        self.decompressor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .decompress(data)
    }

    pub(crate) fn reset_decompressor(&self) {
        self.decompressor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reset();
    }

    pub(crate) fn shutdown_decompressor(&self) {
        self.decompressor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .shutdown();
    }

    pub(crate) fn start_heartbeat(self: &Arc<Self>, interval_ms: u64) {
        let mut guard = self.heartbeat_task.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(old) = guard.take() {
            old.abort();
        }
        self.acks_pending.store(0, Ordering::SeqCst);
        *guard = Some(heartbeat::spawn_heartbeat(self.clone(), interval_ms));
    }

    pub(crate) fn stop_heartbeat(&self) {
        let mut guard = self.heartbeat_task.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = guard.take() {
            task.abort();
        }
    }

    pub(crate) fn start_sender(self: &Arc<Self>) {
        let mut guard = self.sender_task.lock().unwrap_or_else(PoisonError::into_inner);
        let running = guard.as_ref().is_some_and(|task| !task.is_finished());
        if !running {
            *guard = Some(outbound::spawn_sender(self.clone()));
        }
    }

    pub(crate) fn stop_sender(&self) {
        let mut guard = self.sender_task.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = guard.take() {
            task.abort();
        }
    }

    pub(crate) fn set_connect_node(&self, node: Arc<dyn SessionConnectNode>) {
        let mut guard = self.connect_node.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = Some(node);
    }

    pub(crate) fn take_connect_node(&self) -> Option<Arc<dyn SessionConnectNode>> {
        self.connect_node
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub(crate) fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.should_reconnect.store(false, Ordering::SeqCst);
    }

    pub(crate) fn set_auto_reconnect(&self, reconnect: bool) {
        self.should_reconnect.store(reconnect, Ordering::SeqCst);
    }
}

/// Durable gateway session handle
///
/// Cloning is cheap; all clones drive the same session.
#[derive(Clone)]
pub struct GatewayClient {
    inner: Arc<ClientInner>,
}

impl GatewayClient {
    /// Start building a client
    #[must_use]
    pub fn builder(config: GatewayConfig) -> GatewayClientBuilder {
        GatewayClientBuilder::new(config)
    }

    /// Hand the initial connect node to the session arbiter.
    ///
    /// The arbiter decides when the node actually runs; watch for
    /// [`GatewayEvent::Ready`] or await [`Status::Connected`].
    pub fn login(&self) -> Result<(), GatewayError> {
        let node: Arc<dyn SessionConnectNode> = Arc::new(ConnectNode::starting(&self.inner));
        self.inner.set_connect_node(node.clone());
        self.inner.arbiter.append_session(node).map_err(|e| {
            tracing::error!(error = %e, "failed to append session to the arbiter, shutting down");
            self.inner.status.set(Status::Shutdown);
            self.inner.emit(GatewayEvent::Shutdown { code: 1006, at: chrono::Utc::now() });
            GatewayError::Arbiter(e)
        })
    }

    /// Current lifecycle status
    #[must_use]
    pub fn status(&self) -> Status {
        self.inner.status.get()
    }

    /// Wait until the client reaches `target` (or shuts down); returns the
    /// status that ended the wait.
    pub async fn await_status(&self, target: Status) -> Status {
        self.inner
            .status
            .wait_for(|s| *s == target || *s == Status::Shutdown)
            .await
    }

    /// Subscribe to lifecycle events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.events.subscribe()
    }

    /// Whether the WebSocket is currently open
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    /// Whether the initial load has finished
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.inner.is_ready()
    }

    /// Session id of the current session, if identified
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.inner.session().session_id.clone()
    }

    /// Highest sequence number seen this session
    #[must_use]
    pub fn last_sequence(&self) -> u64 {
        self.inner.last_sequence.load(Ordering::SeqCst)
    }

    /// Round-trip time of the latest acknowledged heartbeat
    #[must_use]
    pub fn ping(&self) -> Option<Duration> {
        self.inner.ping()
    }

    /// Enable or disable automatic reconnects
    pub fn set_auto_reconnect(&self, reconnect: bool) {
        self.inner.set_auto_reconnect(reconnect);
    }

    /// Queue an already-serialised message on the general queue
    pub fn send(&self, message: String) {
        if self
            .inner
            .locked("queueing a message", |q| q.general.push_back(message))
            .is_some()
        {
            self.inner.queue_signal.notify_one();
        }
    }

    /// Queue a REQUEST_GUILD_MEMBERS / sync body on the chunk queue
    pub fn chunk_or_sync_request(&self, request: Value) {
        let message = crate::protocol::GatewayMessage::request_guild_members(request);
        match message.to_json() {
            Ok(text) => {
                if self
                    .inner
                    .locked("queueing a chunk request", |q| q.chunk_sync.push_back(text))
                    .is_some()
                {
                    self.inner.queue_signal.notify_one();
                }
            }
            Err(e) => tracing::error!(error = %e, "failed to serialise chunk request"),
        }
    }

    /// Ask to join a voice channel
    pub fn queue_audio_connect(&self, guild_id: Snowflake, channel_id: Snowflake) {
        let now = now_ms();
        if self
            .inner
            .locked("queueing an audio connect", |q| {
                q.voice.queue_connect(guild_id, channel_id, now);
            })
            .is_some()
        {
            self.inner.queue_signal.notify_one();
        }
    }

    /// Ask to drop and re-establish the voice connection in a guild
    pub fn queue_audio_reconnect(&self, guild_id: Snowflake, channel_id: Snowflake) {
        let now = now_ms();
        if self
            .inner
            .locked("queueing an audio reconnect", |q| {
                q.voice.queue_reconnect(guild_id, channel_id, now);
            })
            .is_some()
        {
            self.inner.queue_signal.notify_one();
        }
    }

    /// Ask to leave voice in a guild
    pub fn queue_audio_disconnect(&self, guild_id: Snowflake) {
        let now = now_ms();
        if self
            .inner
            .locked("queueing an audio disconnect", |q| {
                q.voice.queue_disconnect(guild_id, now);
            })
            .is_some()
        {
            self.inner.queue_signal.notify_one();
        }
    }

    /// Drop any pending voice request for a deleted guild
    pub fn remove_audio_connection(&self, guild_id: Snowflake) -> Option<VoiceRequest> {
        self.inner
            .locked("removing an audio connection", |q| q.voice.remove(guild_id))
            .flatten()
    }

    /// Ingest the server's voice state for our own user.
    ///
    /// Called by the VOICE_STATE_UPDATE handler; returns the queued
    /// request this update completes, if any.
    pub fn update_audio_connection(
        &self,
        guild_id: Snowflake,
        connected_channel: Option<Snowflake>,
    ) -> Option<VoiceRequest> {
        let now = now_ms();
        let completed = self
            .inner
            .locked("updating an audio connection", |q| {
                q.voice.update(guild_id, connected_channel, now)
            })
            .flatten();
        // A RECONNECT may have flipped to CONNECT; give the sender a poke
        self.inner.queue_signal.notify_one();
        completed
    }

    /// Signal that the READY flow finished populating caches.
    ///
    /// Called by the READY handler once entity setup is complete; emits
    /// the Ready/Reconnected/Resumed event and moves to `CONNECTED`.
    pub fn ready(&self) {
        self.inner.ready_internal();
    }

    /// Register a dispatch handler for `event_type`
    pub fn register_handler(&self, event_type: impl Into<String>, handler: Arc<dyn SocketHandler>) {
        self.inner.register_handler(event_type.into(), handler);
    }

    /// Remove the dispatch handler for `event_type`
    pub fn remove_handler(&self, event_type: &str) -> Option<Arc<dyn SocketHandler>> {
        self.inner.remove_handler(event_type)
    }

    /// Cooperative shutdown: removes any pending arbiter node and closes
    /// with `1000 "Shutting down"`.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        inner.request_shutdown();
        if let Some(node) = inner.take_connect_node() {
            inner.arbiter.remove_session(&node);
        }
        if inner.is_connected() {
            inner.close(1000, "Shutting down").await;
        } else {
            // Nothing on the wire; finish locally.
            inner.stop_heartbeat();
            inner.stop_sender();
            inner.shutdown_decompressor();
            if inner.status.get() != Status::Shutdown {
                inner.status.set(Status::Shutdown);
                inner.emit(GatewayEvent::Shutdown { code: 1000, at: chrono::Utc::now() });
            }
        }
    }

    pub(crate) fn inner(&self) -> &Arc<ClientInner> {
        &self.inner
    }
}

/// Builder for [`GatewayClient`]
pub struct GatewayClientBuilder {
    config: GatewayConfig,
    caches: Arc<dyn EntityCache>,
    audio: Arc<dyn AudioHook>,
    presence: Arc<dyn PresenceProvider>,
    arbiter: Option<Arc<dyn SessionArbiter>>,
    handlers: HashMap<String, Arc<dyn SocketHandler>>,
}

impl GatewayClientBuilder {
    #[must_use]
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            caches: Arc::new(PermissiveCache),
            audio: Arc::new(NullAudioHook),
            presence: Arc::new(StaticPresence::online()),
            arbiter: None,
            handlers: HashMap::new(),
        }
    }

    /// Entity caches backing voice eligibility checks and invalidation
    #[must_use]
    pub fn caches(mut self, caches: Arc<dyn EntityCache>) -> Self {
        self.caches = caches;
        self
    }

    /// Audio managers notified of voice scheduling outcomes
    #[must_use]
    pub fn audio(mut self, audio: Arc<dyn AudioHook>) -> Self {
        self.audio = audio;
        self
    }

    /// Presence embedded in IDENTIFY
    #[must_use]
    pub fn presence(mut self, presence: Arc<dyn PresenceProvider>) -> Self {
        self.presence = presence;
        self
    }

    /// Session arbiter serialising identifies across shards.
    ///
    /// Defaults to a process-local [`SerialArbiter`].
    #[must_use]
    pub fn arbiter(mut self, arbiter: Arc<dyn SessionArbiter>) -> Self {
        self.arbiter = Some(arbiter);
        self
    }

    /// Register a dispatch handler
    #[must_use]
    pub fn handler(mut self, event_type: impl Into<String>, handler: Arc<dyn SocketHandler>) -> Self {
        self.handlers.insert(event_type.into(), handler);
        self
    }

    /// Build the client.
    ///
    /// Must run inside a Tokio runtime when no arbiter was supplied: the
    /// default [`SerialArbiter`] spawns its worker task here.
    #[must_use]
    pub fn build(self) -> GatewayClient {
        let arbiter: Arc<dyn SessionArbiter> = match self.arbiter {
            Some(arbiter) => arbiter,
            None => SerialArbiter::new(),
        };
        let (events, _) = broadcast::channel(self.config.event_buffer.max(1));
        let auto_reconnect = self.config.auto_reconnect;
        let decompressor = Decompressor::new(self.config.compression);

        let inner = Arc::new(ClientInner {
            config: self.config,
            status: StatusCell::new(),
            session: Mutex::new(SessionState::new()),
            last_sequence: AtomicU64::new(0),
            ping_ms: AtomicU64::new(u64::MAX),
            bucket: RateLimitBucket::new(),
            queues: Mutex::new(OutboundQueues::new()),
            queue_signal: Notify::new(),
            socket: AsyncMutex::new(None),
            client_close: Mutex::new(None),
            decompressor: Mutex::new(decompressor),
            handlers: RwLock::new(self.handlers),
            events,
            caches: self.caches,
            audio: self.audio,
            presence: self.presence,
            arbiter,
            connect_node: Mutex::new(None),
            shutdown: AtomicBool::new(false),
            should_reconnect: AtomicBool::new(auto_reconnect),
            handle_identify_rate_limit: AtomicBool::new(false),
            identify_time_ms: AtomicU64::new(0),
            connected: AtomicBool::new(false),
            reconnect_delay_s: AtomicU64::new(crate::connection::reconnect::INITIAL_RECONNECT_DELAY_S),
            heartbeat_task: Mutex::new(None),
            heartbeat_sent_at_ms: AtomicU64::new(0),
            acks_pending: AtomicU32::new(0),
            sender_task: Mutex::new(None),
        });

        GatewayClient { inner }
    }
}
