//! Port Sessions
//!
//! A [`PortSession`] is the unit of lifecycle: one channel, one
//! cancellation scope forked from the runner's root, and the fibers spawned
//! while handling that port's inbound frames. The session pump translates
//! channel events into handler calls:
//!
//! - DATA frames fork the handler's returned future onto the session's
//!   fiber set, so closing the scope interrupts all in-flight work for
//!   exactly this port.
//! - A CLOSE frame, a transport error, or a protocol violation ends the
//!   pump; the runner is notified and decides whether this was the last
//!   live port.
//!
//! Handler failures that are not cancellation are reported and logged; they
//! never crash the runner.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

use crate::error::TransportError;
use crate::frame::{self, Frame, WireMessage};
use crate::registry::PortId;
use crate::scope::Scope;

/// Future returned by a handler for work to be forked onto the port's scope
pub type HandlerFuture = BoxFuture<'static, anyhow::Result<()>>;

/// Notification from a session pump to the runner's dispatch loop
#[derive(Debug)]
pub(crate) enum SessionEvent {
    /// The session ended; `cause` is `None` for a clean close
    Closed {
        /// Which port ended
        port_id: PortId,
        /// The terminal transport error, if the close was not clean
        cause: Option<TransportError>,
    },
}

/// One live logical connection multiplexed over the transport
#[derive(Debug)]
pub struct PortSession {
    port_id: PortId,
    sender: mpsc::Sender<WireMessage>,
    scope: Scope,
    pump: Option<JoinHandle<()>>,
}

impl PortSession {
    pub(crate) fn new(
        port_id: PortId,
        sender: mpsc::Sender<WireMessage>,
        scope: Scope,
        pump: JoinHandle<()>,
    ) -> Self {
        Self {
            port_id,
            sender,
            scope,
            pump: Some(pump),
        }
    }

    /// The port this session serves
    #[must_use]
    pub fn port_id(&self) -> PortId {
        self.port_id
    }

    /// This session's cancellation scope
    #[must_use]
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// A handle for posting wire messages to this port's peer
    pub(crate) fn sender(&self) -> mpsc::Sender<WireMessage> {
        self.sender.clone()
    }

    /// Close the session's scope, interrupting its pump and fibers
    pub(crate) fn close(&self) {
        self.scope.close();
    }

    /// Wait for the pump task to finish after the scope was closed
    pub(crate) async fn join(mut self) {
        if let Some(pump) = self.pump.take() {
            let _ = pump.await;
        }
    }
}

/// How a session pump ended
enum PumpExit {
    /// The remote peer sent a CLOSE frame
    RemoteClose,
    /// The session's scope was closed on this side
    ScopeClosed,
    /// The transport failed or the peer violated the protocol
    Failed(TransportError),
}

/// Spawn the pump task for one registered port
///
/// The pump owns the channel's receiving half and the port's fiber set.
/// It runs until the scope closes, the peer disconnects, or the transport
/// fails, then reports the outcome on `events`.
pub(crate) fn spawn_session_pump<I, F>(
    port_id: PortId,
    sender: mpsc::Sender<WireMessage>,
    mut rx: mpsc::Receiver<WireMessage>,
    scope: Scope,
    handler: Arc<F>,
    events: mpsc::UnboundedSender<SessionEvent>,
) -> JoinHandle<()>
where
    I: DeserializeOwned + Send + 'static,
    F: Fn(PortId, I) -> Option<HandlerFuture> + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let mut fibers: JoinSet<anyhow::Result<()>> = JoinSet::new();

        let exit = loop {
            tokio::select! {
                // Checked first so that a closed scope stops frame
                // processing even when inbound messages are queued.
                biased;

                () = scope.wait_closed() => break PumpExit::ScopeClosed,

                message = rx.recv() => match message {
                    None => {
                        break PumpExit::Failed(TransportError::Receive(
                            "Channel closed without CLOSE frame".to_string(),
                        ));
                    }
                    Some(bytes) => match frame::decode(&bytes) {
                        Ok(Frame::Close) => break PumpExit::RemoteClose,
                        Ok(Frame::Data { payload: None, .. }) => {
                            tracing::trace!(port_id = %port_id, "Payload-less DATA frame consumed");
                        }
                        Ok(Frame::Data { payload: Some(value), .. }) => {
                            match serde_json::from_value::<I>(value) {
                                Ok(message) => {
                                    if let Some(work) = handler(port_id, message) {
                                        fibers.spawn(work);
                                    }
                                }
                                Err(e) => {
                                    tracing::warn!(
                                        port_id = %port_id,
                                        error = %e,
                                        "Inbound payload failed to deserialize"
                                    );
                                }
                            }
                        }
                        Err(e) => break PumpExit::Failed(e),
                    }
                },

                Some(finished) = fibers.join_next(), if !fibers.is_empty() => {
                    match finished {
                        Ok(Ok(())) => {}
                        Ok(Err(defect)) => {
                            tracing::warn!(port_id = %port_id, defect = %defect, "Handler defect");
                        }
                        Err(join_err) if join_err.is_cancelled() => {}
                        Err(join_err) => {
                            tracing::warn!(
                                port_id = %port_id,
                                error = %join_err,
                                "Handler fiber panicked"
                            );
                        }
                    }
                }
            }
        };

        // Best-effort disconnect notice when this side initiated the close
        // or detected the violation; a peer that closed or vanished is not
        // notified.
        match &exit {
            PumpExit::ScopeClosed | PumpExit::Failed(TransportError::Protocol(_)) => {
                if let Ok(bytes) = frame::encode(&Frame::Close) {
                    let _ = sender.try_send(bytes);
                }
            }
            PumpExit::RemoteClose | PumpExit::Failed(_) => {}
        }

        // Interrupt every in-flight handler fiber for this port.
        fibers.shutdown().await;

        let cause = match exit {
            PumpExit::RemoteClose => {
                tracing::debug!(port_id = %port_id, "Port closed by peer");
                None
            }
            PumpExit::ScopeClosed => {
                tracing::debug!(port_id = %port_id, "Port scope closed");
                None
            }
            PumpExit::Failed(e) => {
                tracing::warn!(port_id = %port_id, error = %e, "Port failed");
                Some(e)
            }
        };

        let _ = events.send(SessionEvent::Closed { port_id, cause });
    })
}
