//! Host Adapter
//!
//! Client-side counterpart of the runner: presents a worker handle (a
//! dedicated worker or one multiplexed shared-worker port) as a uniform
//! channel to a calling layer that is agnostic to which. Inbound DATA
//! payloads are forwarded to an external sink; the `[0]` ready handshake
//! resolves [`HostChannel::ready`]. Closing the host channel posts a
//! best-effort CLOSE frame so the runner tears that connection down.
//!
//! Transport failures surface as [`TransportError::Receive`], never as
//! panics, and are terminal for this one channel only.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::channel::{Channel, ChannelKind};
use crate::error::TransportError;
use crate::frame::{self, Frame, WireMessage};
use crate::scope::Scope;

/// A spawned worker, as handed to the host by the platform bootstrap
///
/// Spawning itself is outside this layer; whatever does it yields one of
/// these per worker (or per shared-worker port).
#[derive(Debug)]
pub struct WorkerHandle {
    /// Identifier assigned by the spawner
    pub id: u64,
    /// The host's end of the worker's duplex transport
    pub channel: Channel,
}

/// Destination for payloads received from the worker
#[async_trait]
pub trait PayloadSink<O>: Send + Sync {
    /// Deliver one inbound payload
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::SendFailed`] if the consumer is gone; the
    /// host channel treats that as terminal.
    async fn deliver(&self, payload: O) -> Result<(), TransportError>;
}

#[async_trait]
impl<O: Send + 'static> PayloadSink<O> for mpsc::Sender<O> {
    async fn deliver(&self, payload: O) -> Result<(), TransportError> {
        self.send(payload)
            .await
            .map_err(|_| TransportError::SendFailed("Sink closed".to_string()))
    }
}

/// Host-side view of one worker connection
///
/// `O` is the message type received from the runner, `I` the message type
/// posted to it; the mirror image of the runner's parameters.
#[derive(Debug)]
pub struct HostChannel<O, I> {
    worker_id: u64,
    sender: mpsc::Sender<WireMessage>,
    scope: Scope,
    ready: watch::Receiver<bool>,
    fault: Arc<RwLock<Option<TransportError>>>,
    pump: Option<JoinHandle<()>>,
    _types: PhantomData<fn(O) -> I>,
}

impl<O, I> HostChannel<O, I>
where
    O: DeserializeOwned + Send + 'static,
    I: Serialize,
{
    /// Attach to a worker handle and start forwarding inbound payloads to
    /// `sink`
    ///
    /// Performs the kind-specific initialization (multiplexed ports are
    /// started; dedicated channels already deliver) and spawns the inbound
    /// pump.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidState`] if the handle's channel was
    /// already consumed.
    pub fn open(
        handle: WorkerHandle,
        sink: Arc<dyn PayloadSink<O>>,
    ) -> Result<Self, TransportError> {
        let WorkerHandle { id, mut channel } = handle;

        match channel.kind() {
            ChannelKind::Dedicated => {}
            ChannelKind::MultiplexedPort => channel.start(),
        }
        let (sender, rx) = channel.into_parts()?;

        let scope = Scope::new();
        let (ready_tx, ready_rx) = watch::channel(false);
        let fault = Arc::new(RwLock::new(None));

        let pump = spawn_host_pump(
            id,
            sender.clone(),
            rx,
            scope.clone(),
            sink,
            ready_tx,
            Arc::clone(&fault),
        );

        tracing::info!(worker_id = id, "Host channel opened");

        Ok(Self {
            worker_id: id,
            sender,
            scope,
            ready: ready_rx,
            fault,
            pump: Some(pump),
            _types: PhantomData,
        })
    }

    /// The spawner-assigned worker identifier
    #[must_use]
    pub fn worker_id(&self) -> u64 {
        self.worker_id
    }

    /// This channel's scope; closing it tears the connection down
    #[must_use]
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// The terminal transport failure, if one has occurred
    #[must_use]
    pub fn fault(&self) -> Option<TransportError> {
        self.fault.read().as_ref().map(redescribe)
    }

    /// Resolve once the runner's ready handshake has been observed
    ///
    /// Callers must not post payload data before this resolves.
    ///
    /// # Errors
    ///
    /// Returns the channel's fault if the transport fails before the
    /// handshake arrives.
    pub async fn ready(&self) -> Result<(), TransportError> {
        let mut ready = self.ready.clone();
        let result = match ready.wait_for(|observed| *observed).await {
            Ok(_) => Ok(()),
            Err(_) => Err(self.fault().unwrap_or(TransportError::ConnectionClosed)),
        };
        result
    }

    /// Post a DATA frame to the runner, waiting for buffer space
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Serialization`] if the message cannot be
    /// encoded, or [`TransportError::SendFailed`] if the worker is gone.
    pub async fn send(&self, message: &I) -> Result<(), TransportError> {
        let payload =
            serde_json::to_value(message).map_err(|e| TransportError::Serialization(e.to_string()))?;
        let bytes = frame::encode(&Frame::data(payload))?;
        self.sender
            .send(bytes)
            .await
            .map_err(|_| TransportError::SendFailed("Channel closed".to_string()))
    }

    /// Post a DATA frame without waiting; failures are logged and swallowed
    pub fn send_unsafe(&self, message: &I) {
        let result = serde_json::to_value(message)
            .map_err(|e| TransportError::Serialization(e.to_string()))
            .and_then(|payload| frame::encode(&Frame::data(payload)))
            .and_then(|bytes| {
                self.sender
                    .try_send(bytes)
                    .map_err(|e| TransportError::SendFailed(e.to_string()))
            });

        if let Err(e) = result {
            tracing::warn!(worker_id = self.worker_id, error = %e, "Fire-and-forget send failed");
        }
    }

    /// Close this connection
    ///
    /// Finalizes the channel's scope, which posts a best-effort CLOSE frame
    /// to the runner before listeners detach, and waits for the pump to
    /// finish.
    pub async fn close(mut self) {
        self.scope.close();
        if let Some(pump) = self.pump.take() {
            let _ = pump.await;
        }
        tracing::info!(worker_id = self.worker_id, "Host channel closed");
    }
}

impl<O, I> Drop for HostChannel<O, I> {
    fn drop(&mut self) {
        // Dropping without close(): the pump observes the scope closing and
        // still posts the CLOSE notice.
        self.scope.close();
    }
}

/// Clone-by-description; `TransportError` carries only message payloads
fn redescribe(e: &TransportError) -> TransportError {
    match e {
        TransportError::Receive(m) => TransportError::Receive(m.clone()),
        TransportError::Protocol(m) => TransportError::Protocol(m.clone()),
        TransportError::Serialization(m) => TransportError::Serialization(m.clone()),
        TransportError::SendFailed(m) => TransportError::SendFailed(m.clone()),
        TransportError::InvalidState(m) => TransportError::InvalidState(m.clone()),
        TransportError::UnknownPort(p) => TransportError::UnknownPort(*p),
        TransportError::ConnectionClosed => TransportError::ConnectionClosed,
    }
}

/// Spawn the inbound pump for one host channel
fn spawn_host_pump<O>(
    worker_id: u64,
    sender: mpsc::Sender<WireMessage>,
    mut rx: mpsc::Receiver<WireMessage>,
    scope: Scope,
    sink: Arc<dyn PayloadSink<O>>,
    ready: watch::Sender<bool>,
    fault: Arc<RwLock<Option<TransportError>>>,
) -> JoinHandle<()>
where
    O: DeserializeOwned + Send + 'static,
{
    tokio::spawn(async move {
        let exit = loop {
            tokio::select! {
                biased;

                () = scope.wait_closed() => break HostPumpExit::ScopeClosed,

                message = rx.recv() => match message {
                    None => {
                        break HostPumpExit::Failed(TransportError::Receive(
                            "Worker channel closed without CLOSE frame".to_string(),
                        ));
                    }
                    Some(bytes) => match frame::decode(&bytes) {
                        Ok(Frame::Data { payload: None, .. }) => {
                            tracing::debug!(worker_id, "Ready handshake observed");
                            ready.send_replace(true);
                        }
                        Ok(Frame::Data { payload: Some(value), .. }) => {
                            match serde_json::from_value::<O>(value) {
                                Ok(payload) => {
                                    if let Err(e) = sink.deliver(payload).await {
                                        tracing::debug!(
                                            worker_id,
                                            error = %e,
                                            "Payload sink gone"
                                        );
                                        break HostPumpExit::SinkGone;
                                    }
                                }
                                Err(e) => {
                                    tracing::warn!(
                                        worker_id,
                                        error = %e,
                                        "Inbound payload failed to deserialize"
                                    );
                                }
                            }
                        }
                        Ok(Frame::Close) => break HostPumpExit::RemoteClose,
                        Err(e) => break HostPumpExit::Failed(e),
                    }
                },
            }
        };

        match exit {
            HostPumpExit::ScopeClosed | HostPumpExit::SinkGone => {
                // Scope finalization: best-effort disconnect notice so the
                // runner tears this connection down.
                if let Ok(bytes) = frame::encode(&Frame::Close) {
                    let _ = sender.try_send(bytes);
                }
            }
            HostPumpExit::RemoteClose => {
                tracing::debug!(worker_id, "Connection closed by runner");
            }
            HostPumpExit::Failed(e) => {
                tracing::warn!(worker_id, error = %e, "Host channel failed");
                *fault.write() = Some(e);
            }
        }

        // Unblocks ready() waiters with the recorded fault.
        drop(ready);
        scope.close();
    })
}

/// How a host pump ended
enum HostPumpExit {
    ScopeClosed,
    RemoteClose,
    SinkGone,
    Failed(TransportError),
}

/// Connection factory for the layer above
///
/// Wraps the platform's spawn function; each [`HostFactory::open`] call
/// spawns (or adopts) one worker and wires it up as a [`HostChannel`].
pub struct HostFactory<O, I> {
    spawn: Box<dyn Fn(u64) -> WorkerHandle + Send + Sync>,
    next_worker_id: AtomicU64,
    _types: PhantomData<fn(O) -> I>,
}

impl<O, I> HostFactory<O, I>
where
    O: DeserializeOwned + Send + 'static,
    I: Serialize,
{
    /// Create a factory over the platform's spawn function
    ///
    /// The function receives the sequential id of the worker to produce.
    #[must_use]
    pub fn new<F>(spawn: F) -> Self
    where
        F: Fn(u64) -> WorkerHandle + Send + Sync + 'static,
    {
        Self {
            spawn: Box::new(spawn),
            next_worker_id: AtomicU64::new(0),
            _types: PhantomData,
        }
    }

    /// Spawn the next worker and open a channel to it
    ///
    /// # Errors
    ///
    /// As [`HostChannel::open`].
    pub fn open(&self, sink: Arc<dyn PayloadSink<O>>) -> Result<HostChannel<O, I>, TransportError> {
        let id = self.next_worker_id.fetch_add(1, Ordering::SeqCst);
        let handle = (self.spawn)(id);
        HostChannel::open(handle, sink)
    }
}

impl<O, I> std::fmt::Debug for HostFactory<O, I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostFactory")
            .field("next_worker_id", &self.next_worker_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::channel::channel_pair;
    use crate::config::MuxConfig;

    #[tokio::test]
    async fn test_ready_resolves_on_handshake() {
        let config = MuxConfig::default();
        let (host_half, runner_half) = channel_pair(ChannelKind::Dedicated, &config);

        let (sink_tx, _sink_rx) = mpsc::channel::<u64>(8);
        let host = HostChannel::<u64, u64>::open(
            WorkerHandle {
                id: 0,
                channel: host_half,
            },
            Arc::new(sink_tx),
        )
        .unwrap();

        runner_half.send_frame(&Frame::ready()).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), host.ready())
            .await
            .expect("ready should resolve")
            .unwrap();
    }

    #[tokio::test]
    async fn test_inbound_payloads_reach_sink() {
        let config = MuxConfig::default();
        let (host_half, runner_half) = channel_pair(ChannelKind::Dedicated, &config);

        let (sink_tx, mut sink_rx) = mpsc::channel::<u64>(8);
        let _host = HostChannel::<u64, u64>::open(
            WorkerHandle {
                id: 0,
                channel: host_half,
            },
            Arc::new(sink_tx),
        )
        .unwrap();

        runner_half.send_frame(&Frame::ready()).await.unwrap();
        runner_half.send_frame(&Frame::data(json!(42))).await.unwrap();

        let payload = tokio::time::timeout(Duration::from_secs(1), sink_rx.recv())
            .await
            .expect("payload should be forwarded")
            .unwrap();
        assert_eq!(payload, 42);
    }

    #[tokio::test]
    async fn test_close_posts_close_frame() {
        let config = MuxConfig::default();
        let (host_half, runner_half) = channel_pair(ChannelKind::Dedicated, &config);

        let (sink_tx, _sink_rx) = mpsc::channel::<u64>(8);
        let host = HostChannel::<u64, u64>::open(
            WorkerHandle {
                id: 3,
                channel: host_half,
            },
            Arc::new(sink_tx),
        )
        .unwrap();

        host.close().await;

        let (_tx, mut rx) = runner_half.into_parts().unwrap();
        let bytes = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("CLOSE notice should arrive")
            .unwrap();
        assert_eq!(frame::decode(&bytes).unwrap(), Frame::Close);
    }

    #[tokio::test]
    async fn test_transport_failure_is_typed() {
        let config = MuxConfig::default();
        let (host_half, runner_half) = channel_pair(ChannelKind::Dedicated, &config);

        let (sink_tx, _sink_rx) = mpsc::channel::<u64>(8);
        let host = HostChannel::<u64, u64>::open(
            WorkerHandle {
                id: 0,
                channel: host_half,
            },
            Arc::new(sink_tx),
        )
        .unwrap();

        // Worker vanishes without sending CLOSE.
        drop(runner_half);

        let result = tokio::time::timeout(Duration::from_secs(1), host.ready())
            .await
            .expect("ready should fail fast");
        assert!(matches!(result, Err(TransportError::Receive(_))));
        assert!(matches!(host.fault(), Some(TransportError::Receive(_))));
    }

    #[tokio::test]
    async fn test_factory_assigns_sequential_worker_ids() {
        let config = MuxConfig::default();
        let factory = HostFactory::<u64, u64>::new(move |id| {
            let (host_half, _runner_half) = channel_pair(ChannelKind::Dedicated, &config);
            // The runner half leaks here; these channels are never used.
            WorkerHandle {
                id,
                channel: host_half,
            }
        });

        let (sink_tx, _sink_rx) = mpsc::channel::<u64>(8);
        let sink: Arc<dyn PayloadSink<u64>> = Arc::new(sink_tx);

        let first = factory.open(Arc::clone(&sink)).unwrap();
        let second = factory.open(sink).unwrap();
        assert_eq!(first.worker_id(), 0);
        assert_eq!(second.worker_id(), 1);
    }
}
