//! Worker Runner
//!
//! The runner is the worker-side orchestrator. It owns the root scope and
//! the port registry, turns inbound connections into registered port
//! sessions, dispatches DATA frames to the user handler, and decides when
//! the whole process should shut down: when the last live port closes, the
//! run ends.
//!
//! # Lifecycle
//!
//! ```text
//! NotStarted → Running → ShuttingDown → Stopped
//! ```
//!
//! `run` performs the `NotStarted → Running` transition: it attaches the
//! live acceptor (replaying any connections buffered before start, in
//! arrival order) or, in dedicated mode, synthesizes the single implicit
//! connection for the process's own channel. It then suspends until the
//! runner reaches `Stopped`. No transition skips a state, `Stopped` is
//! terminal, and a runner cannot be restarted.
//!
//! # Shutdown decision
//!
//! When a session reports closure (peer CLOSE, transport error, or a
//! runner-side `close_port`), the registry size is checked *before*
//! removal: if the closing port is the sole survivor, the root scope is
//! finalized and the run ends; otherwise only that port is removed and the
//! runner keeps serving the rest.

use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::acceptor::ConnectionAcceptor;
use crate::channel::Channel;
use crate::error::TransportError;
use crate::frame::{self, Frame};
use crate::registry::{PortId, PortRegistry};
use crate::scope::Scope;
use crate::session::{HandlerFuture, SessionEvent};

/// Lifecycle state of a [`WorkerRunner`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    /// Constructed; `run` has not been called
    NotStarted,
    /// The dispatch loop is serving ports
    Running,
    /// The root scope is finalizing; sessions are being torn down
    ShuttingDown,
    /// Terminal; no further frames are dispatched to any handler
    Stopped,
}

impl RunnerState {
    fn name(self) -> &'static str {
        match self {
            Self::NotStarted => "not-started",
            Self::Running => "running",
            Self::ShuttingDown => "shutting-down",
            Self::Stopped => "stopped",
        }
    }
}

/// How a runner receives its connections
#[derive(Debug)]
pub enum RunnerMode {
    /// One dedicated worker: the process's own channel is the single
    /// implicit connection, registered when `run` starts
    Dedicated(Channel),
    /// A shared worker: connections arrive through the acceptor, possibly
    /// before `run` attaches
    Shared(ConnectionAcceptor),
}

impl RunnerMode {
    /// Dedicated-worker mode over the process's own channel
    #[must_use]
    pub fn dedicated(channel: Channel) -> Self {
        Self::Dedicated(channel)
    }

    /// Shared-worker mode; returns the handle the transport bootstrap uses
    /// to deliver inbound connections
    #[must_use]
    pub fn shared(config: &crate::config::MuxConfig) -> (Self, crate::acceptor::AcceptorHandle) {
        let acceptor = ConnectionAcceptor::new(config.pending_connection_limit);
        let handle = acceptor.handle();
        (Self::Shared(acceptor), handle)
    }
}

/// Cloneable handle for talking to a runner's ports from handler fibers or
/// sibling tasks
#[derive(Debug)]
pub struct RunnerHandle<O> {
    registry: PortRegistry,
    state: Arc<RwLock<RunnerState>>,
    _outbound: PhantomData<fn(&O)>,
}

impl<O> Clone for RunnerHandle<O> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            state: Arc::clone(&self.state),
            _outbound: PhantomData,
        }
    }
}

impl<O: Serialize> RunnerHandle<O> {
    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> RunnerState {
        *self.state.read()
    }

    /// Post a DATA frame to the given port, waiting for buffer space
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::UnknownPort`] if no session is live for
    /// `port_id`, [`TransportError::Serialization`] if the message cannot
    /// be encoded, or [`TransportError::SendFailed`] if the peer is gone.
    pub async fn send(&self, port_id: PortId, message: &O) -> Result<(), TransportError> {
        self.send_with_transfer(port_id, message, None).await
    }

    /// Post a DATA frame carrying a transfer list
    ///
    /// # Errors
    ///
    /// As [`RunnerHandle::send`].
    pub async fn send_with_transfer(
        &self,
        port_id: PortId,
        message: &O,
        transfer: Option<Vec<Value>>,
    ) -> Result<(), TransportError> {
        let sender = self
            .registry
            .sender(port_id)
            .ok_or(TransportError::UnknownPort(port_id))?;

        let payload =
            serde_json::to_value(message).map_err(|e| TransportError::Serialization(e.to_string()))?;
        let bytes = frame::encode(&Frame::Data {
            payload: Some(payload),
            transfer,
        })?;

        sender
            .send(bytes)
            .await
            .map_err(|_| TransportError::SendFailed("Channel closed".to_string()))
    }

    /// Post a DATA frame without waiting; failures are logged and swallowed
    pub fn send_unsafe(&self, port_id: PortId, message: &O) {
        let Some(sender) = self.registry.sender(port_id) else {
            tracing::warn!(port_id = %port_id, "Send to unknown port dropped");
            return;
        };

        let result = serde_json::to_value(message)
            .map_err(|e| TransportError::Serialization(e.to_string()))
            .and_then(|payload| frame::encode(&Frame::data(payload)))
            .and_then(|bytes| {
                sender
                    .try_send(bytes)
                    .map_err(|e| TransportError::SendFailed(e.to_string()))
            });

        if let Err(e) = result {
            tracing::warn!(port_id = %port_id, error = %e, "Fire-and-forget send failed");
        }
    }

    /// Close one port from the runner side
    ///
    /// The peer is sent a best-effort CLOSE frame and the session's scope
    /// is closed, interrupting its fibers. If this was the last live port,
    /// the whole runner shuts down, exactly as for a peer-initiated close.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::UnknownPort`] if no session is live for
    /// `port_id`.
    pub fn close_port(&self, port_id: PortId) -> Result<(), TransportError> {
        let scope = self
            .registry
            .scope(port_id)
            .ok_or(TransportError::UnknownPort(port_id))?;
        scope.close();
        Ok(())
    }
}

/// The worker-side orchestrator
///
/// `O` is the message type posted to peers, `I` the message type expected
/// from them; payloads are carried as opaque JSON on the wire and only
/// (de)serialized at this typed seam.
#[derive(Debug)]
pub struct WorkerRunner<O, I> {
    mode: Option<RunnerMode>,
    registry: PortRegistry,
    root: Scope,
    state: Arc<RwLock<RunnerState>>,
    disconnects_tx: mpsc::UnboundedSender<PortId>,
    disconnects_rx: Option<mpsc::UnboundedReceiver<PortId>>,
    _inbound: PhantomData<fn(I) -> O>,
}

impl<O, I> WorkerRunner<O, I>
where
    O: Serialize,
    I: DeserializeOwned + Send + 'static,
{
    /// Create a runner in the given mode, in state `NotStarted`
    #[must_use]
    pub fn start(mode: RunnerMode) -> Self {
        let (disconnects_tx, disconnects_rx) = mpsc::unbounded_channel();
        Self {
            mode: Some(mode),
            registry: PortRegistry::new(),
            root: Scope::new(),
            state: Arc::new(RwLock::new(RunnerState::NotStarted)),
            disconnects_tx,
            disconnects_rx: Some(disconnects_rx),
            _inbound: PhantomData,
        }
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> RunnerState {
        *self.state.read()
    }

    /// The root scope; closing it from outside shuts the whole runner down
    #[must_use]
    pub fn root_scope(&self) -> &Scope {
        &self.root
    }

    /// A cloneable handle for sends and port closes
    #[must_use]
    pub fn handle(&self) -> RunnerHandle<O> {
        RunnerHandle {
            registry: self.registry.clone(),
            state: Arc::clone(&self.state),
            _outbound: PhantomData,
        }
    }

    /// Take the queue of ports whose sessions have closed
    ///
    /// Yields each disconnected `PortId` once. Returns `None` if already
    /// taken.
    pub fn take_disconnects(&mut self) -> Option<mpsc::UnboundedReceiver<PortId>> {
        self.disconnects_rx.take()
    }

    /// Post a DATA frame to the given port
    ///
    /// # Errors
    ///
    /// As [`RunnerHandle::send`].
    pub async fn send(&self, port_id: PortId, message: &O) -> Result<(), TransportError> {
        self.handle().send(port_id, message).await
    }

    /// Post a DATA frame without waiting; failures are logged and swallowed
    pub fn send_unsafe(&self, port_id: PortId, message: &O) {
        self.handle().send_unsafe(port_id, message);
    }

    /// Serve ports until the runner stops
    ///
    /// Dispatches every inbound DATA frame to `handler`; a returned future
    /// is forked onto that port's scope. Suspends until the last port
    /// closes or the root scope is closed externally, then tears down every
    /// session and returns with the runner `Stopped`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidState`] if called on a runner that
    /// has already run.
    pub async fn run<F>(&mut self, handler: F) -> Result<(), TransportError>
    where
        F: Fn(PortId, I) -> Option<HandlerFuture> + Send + Sync + 'static,
    {
        let mode = self.mode.take().ok_or_else(|| {
            TransportError::InvalidState("Runner already started".to_string())
        })?;

        self.transition(RunnerState::Running);

        let handler = Arc::new(handler);
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();

        let mut acceptor_rx = match mode {
            RunnerMode::Dedicated(channel) => {
                // The process's own channel is the one implicit connection.
                self.registry.register::<I, F>(
                    channel,
                    &self.root,
                    Arc::clone(&handler),
                    events_tx.clone(),
                )?;
                None
            }
            RunnerMode::Shared(acceptor) => Some(acceptor.into_receiver()),
        };

        loop {
            tokio::select! {
                () = self.root.wait_closed() => {
                    tracing::info!("Root scope closed externally");
                    break;
                }

                connection = next_connection(&mut acceptor_rx) => {
                    match connection {
                        Some(channel) => {
                            if let Err(e) = self.registry.register::<I, F>(
                                channel,
                                &self.root,
                                Arc::clone(&handler),
                                events_tx.clone(),
                            ) {
                                tracing::warn!(error = %e, "Inbound connection rejected");
                            }
                        }
                        None => {
                            // All acceptor handles dropped; existing ports
                            // keep running.
                            tracing::debug!("Connection acceptor closed");
                            acceptor_rx = None;
                        }
                    }
                }

                Some(event) = events_rx.recv() => {
                    let SessionEvent::Closed { port_id, cause } = event;
                    if let Some(e) = &cause {
                        tracing::warn!(port_id = %port_id, error = %e, "Port session failed");
                    }

                    // Size is checked before removal: the sole remaining
                    // port closing ends the whole run.
                    let last = self.registry.contains(port_id) && self.registry.len() == 1;
                    if last {
                        let _ = self.disconnects_tx.send(port_id);
                        tracing::info!(port_id = %port_id, "Last port closed");
                        break;
                    }

                    if let Some(session) = self.registry.remove(port_id) {
                        session.close();
                        session.join().await;
                        let _ = self.disconnects_tx.send(port_id);
                    }
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Finalize the root scope and every remaining session
    async fn shutdown(&self) {
        self.transition(RunnerState::ShuttingDown);

        self.root.close();
        for session in self.registry.drain() {
            session.close();
            session.join().await;
        }

        self.transition(RunnerState::Stopped);
    }

    fn transition(&self, to: RunnerState) {
        let mut state = self.state.write();
        tracing::info!(from = state.name(), to = to.name(), "Runner state change");
        *state = to;
    }
}

/// Next inbound connection, or pending forever in dedicated mode
async fn next_connection(rx: &mut Option<mpsc::Receiver<Channel>>) -> Option<Channel> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
