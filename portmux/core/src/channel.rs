//! Duplex Channels
//!
//! A [`Channel`] is one physical bidirectional transport: a dedicated
//! worker's own message pipe, or one multiplexed port on a shared worker.
//! Sends are fire-and-forget framed messages; inbound messages are pumped
//! from the owned receiver in transport order. The layer above is agnostic
//! to which kind it holds.
//!
//! The two kinds differ only in their fixed initialization routine: a
//! dedicated channel delivers from the moment it exists, while a
//! multiplexed port must be started before its receiver can be taken,
//! mirroring transports where port delivery requires an explicit start
//! call. The kind is chosen at construction; nothing is probed at use
//! sites.

use tokio::sync::mpsc;

use crate::config::MuxConfig;
use crate::error::TransportError;
use crate::frame::{self, Frame, WireMessage};

/// Which physical transport a channel wraps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// A dedicated worker's own pipe; delivery begins at construction
    Dedicated,
    /// One port multiplexed on a shared worker; must be started first
    MultiplexedPort,
}

/// One end of a physical duplex transport
#[derive(Debug)]
pub struct Channel {
    kind: ChannelKind,
    tx: mpsc::Sender<WireMessage>,
    rx: Option<mpsc::Receiver<WireMessage>>,
    started: bool,
}

impl Channel {
    /// Wrap a dedicated-worker pipe; delivery is live immediately
    #[must_use]
    pub fn dedicated(tx: mpsc::Sender<WireMessage>, rx: mpsc::Receiver<WireMessage>) -> Self {
        Self {
            kind: ChannelKind::Dedicated,
            tx,
            rx: Some(rx),
            started: true,
        }
    }

    /// Wrap one multiplexed shared-worker port; [`Channel::start`] must be
    /// called before the receiving half can be taken
    #[must_use]
    pub fn multiplexed(tx: mpsc::Sender<WireMessage>, rx: mpsc::Receiver<WireMessage>) -> Self {
        Self {
            kind: ChannelKind::MultiplexedPort,
            tx,
            rx: Some(rx),
            started: false,
        }
    }

    /// The kind of transport this channel wraps
    #[must_use]
    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Begin delivery on a multiplexed port
    ///
    /// Messages posted before `start` are retained and delivered in order
    /// once the receiver is pumped. A no-op on dedicated channels and on
    /// ports already started.
    pub fn start(&mut self) {
        self.started = true;
    }

    /// A cloneable handle for posting messages on this channel
    #[must_use]
    pub fn sender(&self) -> mpsc::Sender<WireMessage> {
        self.tx.clone()
    }

    /// Encode and post a frame, waiting for buffer space
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::SendFailed`] if the remote half is gone,
    /// or [`TransportError::Serialization`] if encoding fails.
    pub async fn send_frame(&self, frame: &Frame) -> Result<(), TransportError> {
        let bytes = frame::encode(frame)?;
        self.tx
            .send(bytes)
            .await
            .map_err(|_| TransportError::SendFailed("Channel closed".to_string()))
    }

    /// Encode and post a frame without waiting; failures are reported but
    /// the message is simply dropped on a full buffer
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::SendFailed`] if the buffer is full or the
    /// remote half is gone.
    pub fn try_send_frame(&self, frame: &Frame) -> Result<(), TransportError> {
        let bytes = frame::encode(frame)?;
        self.tx
            .try_send(bytes)
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    /// Split into raw sending and receiving halves
    ///
    /// Consumes the channel; the receiving half is handed to exactly one
    /// pump.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidState`] if this is a multiplexed
    /// port that was never started, or if the receiver was already taken.
    pub fn into_parts(
        mut self,
    ) -> Result<(mpsc::Sender<WireMessage>, mpsc::Receiver<WireMessage>), TransportError> {
        if !self.started {
            return Err(TransportError::InvalidState(
                "Multiplexed port not started".to_string(),
            ));
        }
        let rx = self.rx.take().ok_or_else(|| {
            TransportError::InvalidState("Channel receiver already taken".to_string())
        })?;
        Ok((self.tx, rx))
    }
}

/// Create a cross-wired pair of channels of the given kind
///
/// Everything posted on one end arrives on the other, in order. Used for
/// in-process wiring and tests; real worker transports construct their two
/// ends in their own processes.
#[must_use]
pub fn channel_pair(kind: ChannelKind, config: &MuxConfig) -> (Channel, Channel) {
    let (a_tx, a_rx) = mpsc::channel(config.channel_capacity);
    let (b_tx, b_rx) = mpsc::channel(config.channel_capacity);

    let make = |tx, rx| match kind {
        ChannelKind::Dedicated => Channel::dedicated(tx, rx),
        ChannelKind::MultiplexedPort => Channel::multiplexed(tx, rx),
    };

    (make(a_tx, b_rx), make(b_tx, a_rx))
}
