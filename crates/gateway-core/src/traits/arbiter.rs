//! Session arbiter port
//!
//! The gateway allows one IDENTIFY per token every five seconds. When a
//! process runs several shards, something has to serialise their identifies;
//! that something is the session arbiter. Each shard hands the arbiter an
//! opaque connect node, and the arbiter invokes the nodes one at a time.

use crate::value_objects::ShardInfo;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Minimum spacing between two IDENTIFY attempts on the same token
pub const IDENTIFY_DELAY: Duration = Duration::from_secs(5);

/// A pending connect or reconnect, runnable exactly once
#[async_trait]
pub trait SessionConnectNode: Send + Sync {
    /// Shard coordinates of the session this node belongs to, if sharded
    fn shard(&self) -> Option<ShardInfo>;

    /// `false` for the initial connect, `true` for a reconnect
    fn is_reconnect(&self) -> bool;

    /// Establish the connection.
    ///
    /// When `is_last` is `false` the node must not return before the session
    /// has reached `AWAITING_LOGIN_CONFIRMATION` (or shut down), so the next
    /// node cannot identify too early.
    async fn run(&self, is_last: bool);
}

/// Serialises connect nodes across shards
pub trait SessionArbiter: Send + Sync {
    /// Enqueue a node for execution.
    fn append_session(&self, node: Arc<dyn SessionConnectNode>) -> Result<(), ArbiterError>;

    /// Remove a node that has not run yet. Returns `true` if it was found.
    fn remove_session(&self, node: &Arc<dyn SessionConnectNode>) -> bool;
}

/// Errors surfaced by a session arbiter
#[derive(Debug, thiserror::Error)]
pub enum ArbiterError {
    /// The arbiter refused the node
    #[error("session arbiter rejected the node: {0}")]
    Rejected(String),

    /// The arbiter is no longer accepting nodes
    #[error("session arbiter is shut down")]
    Closed,
}
