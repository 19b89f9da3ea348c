//! Session arbiter adapter
//!
//! [`ConnectNode`] is the opaque lifecycle token handed to the arbiter: a
//! START node at login, a RECONNECT node after a disconnect that cannot
//! resume. [`SerialArbiter`] is the in-process reference arbiter: strict
//! FIFO, one node at a time, five seconds between nodes so the global
//! IDENTIFY rate is respected.

use crate::client::ClientInner;
use crate::connection::{lifecycle, reconnect, Status};
use async_trait::async_trait;
use gateway_core::{
    ArbiterError, SessionArbiter, SessionConnectNode, ShardInfo, IDENTIFY_DELAY,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeKind {
    Start,
    Reconnect,
}

/// A pending connect for one gateway client, runnable exactly once
///
/// Holds the client weakly so an abandoned node cannot keep a dead client
/// alive from inside an arbiter queue.
pub(crate) struct ConnectNode {
    inner: Weak<ClientInner>,
    kind: NodeKind,
}

impl ConnectNode {
    pub(crate) fn starting(inner: &Arc<ClientInner>) -> Self {
        Self { inner: Arc::downgrade(inner), kind: NodeKind::Start }
    }

    pub(crate) fn reconnect(inner: &Arc<ClientInner>) -> Self {
        Self { inner: Arc::downgrade(inner), kind: NodeKind::Reconnect }
    }
}

#[async_trait]
impl SessionConnectNode for ConnectNode {
    fn shard(&self) -> Option<ShardInfo> {
        self.inner.upgrade().and_then(|inner| inner.config.shard)
    }

    fn is_reconnect(&self) -> bool {
        self.kind == NodeKind::Reconnect
    }

    async fn run(&self, is_last: bool) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        if inner.is_shutdown() {
            return;
        }

        match self.kind {
            NodeKind::Start => {
                inner.start_sender();
                if let Err(e) = lifecycle::connect(&inner).await {
                    if matches!(e, crate::GatewayError::Shutdown) {
                        return;
                    }
                    tracing::warn!(error = %e, "initial connect failed, entering reconnect loop");
                    reconnect::run(&inner, false).await;
                }
            }
            NodeKind::Reconnect => reconnect::run(&inner, true).await,
        }

        if is_last {
            return;
        }
        // Hold the queue until our IDENTIFY/RESUME is on the wire, so the
        // next shard cannot identify too early.
        let status = inner.status.await_login_confirmation().await;
        if status == Status::Shutdown {
            inner.close(1000, "").await;
            tracing::debug!("shutdown while trying to connect");
        }
    }
}

/// Process-local FIFO arbiter with the five-second IDENTIFY spacing
///
/// The worker task exits once every external handle to the arbiter is
/// dropped.
pub struct SerialArbiter {
    queue: Mutex<VecDeque<Arc<dyn SessionConnectNode>>>,
    signal: Notify,
    closed: AtomicBool,
}

impl SerialArbiter {
    /// Create the arbiter and spawn its worker.
    ///
    /// Must be called inside a Tokio runtime.
    #[must_use]
    pub fn new() -> Arc<Self> {
        let arbiter = Arc::new(Self {
            queue: Mutex::new(VecDeque::new()),
            signal: Notify::new(),
            closed: AtomicBool::new(false),
        });
        tokio::spawn(Self::worker(Arc::downgrade(&arbiter)));
        arbiter
    }

    /// Stop accepting nodes; queued nodes still run.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn pop(&self) -> (Option<Arc<dyn SessionConnectNode>>, bool) {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let node = queue.pop_front();
        let is_last = queue.is_empty();
        (node, is_last)
    }

    async fn worker(weak: Weak<Self>) {
        loop {
            let Some(this) = weak.upgrade() else {
                return;
            };
            let (node, is_last) = this.pop();
            match node {
                Some(node) => {
                    if let Some(shard) = node.shard() {
                        tracing::debug!(
                            shard = %shard,
                            reconnect = node.is_reconnect(),
                            "running connect node"
                        );
                    }
                    node.run(is_last).await;
                    if !is_last {
                        tokio::time::sleep(IDENTIFY_DELAY).await;
                    }
                }
                None => {
                    // Park briefly so `this` is dropped and the worker can
                    // exit when the arbiter itself is gone.
                    tokio::select! {
                        () = this.signal.notified() => {}
                        () = tokio::time::sleep(std::time::Duration::from_millis(500)) => {}
                    }
                }
            }
        }
    }
}

impl SessionArbiter for SerialArbiter {
    fn append_session(&self, node: Arc<dyn SessionConnectNode>) -> Result<(), ArbiterError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ArbiterError::Closed);
        }
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(node);
        self.signal.notify_one();
        Ok(())
    }

    fn remove_session(&self, node: &Arc<dyn SessionConnectNode>) -> bool {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let before = queue.len();
        queue.retain(|queued| !Arc::ptr_eq(queued, node));
        before != queue.len()
    }
}
