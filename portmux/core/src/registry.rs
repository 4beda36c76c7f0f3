//! Port Registry
//!
//! Runner-side table mapping each [`PortId`] to its live [`PortSession`].
//! Entries are added when connections arrive, removed on disconnect, and
//! drained wholesale when the runner's root scope finalizes.
//!
//! # Identity
//!
//! Port ids are monotonically increasing and never reused for the lifetime
//! of one runner instance, so a stale message for a just-closed port can
//! never be confused with a freshly assigned one.
//!
//! # Thread Safety
//!
//! The map is wrapped in `Arc<RwLock<>>` so that `send` paths can read
//! concurrently, but it is only ever written from the runner's own
//! dispatch loop: single-writer discipline, enforced by keeping the
//! mutating methods crate-private.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::channel::{Channel, ChannelKind};
use crate::error::TransportError;
use crate::frame::{Frame, WireMessage};
use crate::scope::Scope;
use crate::session::{spawn_session_pump, HandlerFuture, PortSession, SessionEvent};

/// Unique identifier for one logical connection
///
/// Process-local, strictly increasing, and never reused while the issuing
/// runner lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortId(u64);

impl PortId {
    /// Get the raw numeric value
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Reconstruct a port id from its raw value
    ///
    /// For layers that carry port ids inside their own message envelopes.
    /// Ids are only meaningful to the runner instance that issued them.
    #[must_use]
    pub fn from_u64(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port-{}", self.0)
    }
}

/// Registry of live port sessions for one runner
#[derive(Debug, Clone)]
pub struct PortRegistry {
    inner: Arc<RwLock<HashMap<PortId, PortSession>>>,
    next_id: Arc<AtomicU64>,
}

impl Default for PortRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PortRegistry {
    /// Create a new empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Register an inbound connection as a new port
    ///
    /// Allocates the next port id, forks a child scope from `root`, sends
    /// the ready handshake on the channel before any inbound frame of that
    /// port is processed, and spawns the session pump.
    pub(crate) fn register<I, F>(
        &self,
        mut channel: Channel,
        root: &Scope,
        handler: Arc<F>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<PortId, TransportError>
    where
        I: serde::de::DeserializeOwned + Send + 'static,
        F: Fn(PortId, I) -> Option<HandlerFuture> + Send + Sync + 'static,
    {
        let port_id = PortId(self.next_id.fetch_add(1, Ordering::SeqCst));

        // Fixed per-kind initialization; nothing is probed at runtime.
        match channel.kind() {
            ChannelKind::Dedicated => {}
            ChannelKind::MultiplexedPort => channel.start(),
        }
        let (sender, rx) = channel.into_parts()?;

        // Ready handshake: tells the remote side traffic may now flow.
        // Best-effort, like every send on this transport.
        match crate::frame::encode(&Frame::ready()) {
            Ok(bytes) => {
                if sender.try_send(bytes).is_err() {
                    tracing::warn!(port_id = %port_id, "Ready handshake could not be posted");
                }
            }
            Err(e) => {
                tracing::warn!(port_id = %port_id, error = %e, "Ready handshake encode failed");
            }
        }

        let scope = root.child();
        let pump = spawn_session_pump::<I, F>(
            port_id,
            sender.clone(),
            rx,
            scope.clone(),
            handler,
            events,
        );

        let session = PortSession::new(port_id, sender, scope, pump);
        self.inner.write().insert(port_id, session);
        tracing::info!(port_id = %port_id, "Port registered");

        Ok(port_id)
    }

    /// Remove a port's session; removing an absent id is a no-op
    pub(crate) fn remove(&self, port_id: PortId) -> Option<PortSession> {
        let session = self.inner.write().remove(&port_id);
        if session.is_some() {
            tracing::info!(port_id = %port_id, "Port removed");
        }
        session
    }

    /// Take every remaining session, emptying the registry
    pub(crate) fn drain(&self) -> Vec<PortSession> {
        let mut inner = self.inner.write();
        inner.drain().map(|(_, session)| session).collect()
    }

    /// A send handle for the given port's channel, if it is live
    pub(crate) fn sender(&self, port_id: PortId) -> Option<mpsc::Sender<WireMessage>> {
        self.inner.read().get(&port_id).map(PortSession::sender)
    }

    /// The given port's scope, if it is live
    pub(crate) fn scope(&self, port_id: PortId) -> Option<Scope> {
        self.inner.read().get(&port_id).map(|s| s.scope().clone())
    }

    /// Number of live ports
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether no port is live
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Whether the given port has a live session
    #[must_use]
    pub fn contains(&self, port_id: PortId) -> bool {
        self.inner.read().contains_key(&port_id)
    }

    /// Ids of all live ports
    #[must_use]
    pub fn port_ids(&self) -> Vec<PortId> {
        self.inner.read().keys().copied().collect()
    }
}
