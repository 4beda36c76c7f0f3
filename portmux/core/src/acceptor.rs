//! Connection Acceptor
//!
//! New-connection events can fire before the runner's main loop has
//! attached its live listener. The [`ConnectionAcceptor`] owns an explicit
//! bounded queue that captures those early events in arrival order; the
//! runner drains and replays them, in order, once `run` attaches. No
//! connection is silently dropped during startup.
//!
//! The queue is owned by the acceptor instance and passed into the runner
//! at construction; there is no process-wide buffer.

use tokio::sync::mpsc;

use crate::channel::Channel;
use crate::error::TransportError;

/// Buffer for inbound connection events, created before the runner starts
#[derive(Debug)]
pub struct ConnectionAcceptor {
    tx: mpsc::Sender<Channel>,
    rx: mpsc::Receiver<Channel>,
}

/// Cloneable handle for offering inbound connections to the runner
#[derive(Debug, Clone)]
pub struct AcceptorHandle {
    tx: mpsc::Sender<Channel>,
}

impl ConnectionAcceptor {
    /// Create an acceptor buffering at most `capacity` pending connections
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self { tx, rx }
    }

    /// A handle the transport bootstrap uses to deliver connections
    #[must_use]
    pub fn handle(&self) -> AcceptorHandle {
        AcceptorHandle {
            tx: self.tx.clone(),
        }
    }

    /// Hand the buffered queue to the runner's main loop
    pub(crate) fn into_receiver(self) -> mpsc::Receiver<Channel> {
        // Dropping our own sender here would end the stream once external
        // handles are gone; the runner treats that as "no more connections".
        drop(self.tx);
        self.rx
    }
}

impl AcceptorHandle {
    /// Offer an inbound connection, waiting for buffer space
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] if the runner is gone.
    pub async fn offer(&self, channel: Channel) -> Result<(), TransportError> {
        self.tx
            .send(channel)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Offer an inbound connection without waiting
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::SendFailed`] if the pending-connection
    /// buffer is full, or [`TransportError::ConnectionClosed`] if the
    /// runner is gone.
    pub fn try_offer(&self, channel: Channel) -> Result<(), TransportError> {
        self.tx.try_send(channel).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                TransportError::SendFailed("Pending connection buffer full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => TransportError::ConnectionClosed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{channel_pair, ChannelKind};
    use crate::config::MuxConfig;

    #[tokio::test]
    async fn test_offers_are_buffered_in_order() {
        let config = MuxConfig::default();
        let acceptor = ConnectionAcceptor::new(4);
        let handle = acceptor.handle();

        let mut remotes = Vec::new();
        for _ in 0..3 {
            let (local, remote) = channel_pair(ChannelKind::Dedicated, &config);
            handle.offer(local).await.unwrap();
            remotes.push(remote);
        }

        // Drain after the fact, as the runner does on start. A frame sent on
        // the i-th buffered channel must arrive on the i-th remote end; if
        // ordering were violated, the recv below would hang.
        let mut rx = acceptor.into_receiver();
        for remote in remotes {
            let buffered = rx.recv().await.unwrap();
            buffered
                .send_frame(&crate::frame::Frame::ready())
                .await
                .unwrap();

            let (_tx, mut remote_rx) = remote.into_parts().unwrap();
            let bytes = tokio::time::timeout(
                std::time::Duration::from_secs(1),
                remote_rx.recv(),
            )
            .await
            .expect("buffered connection should pair with its remote end")
            .unwrap();
            assert!(crate::frame::decode(&bytes).unwrap().is_ready());
        }
    }

    #[tokio::test]
    async fn test_try_offer_reports_full_buffer() {
        let config = MuxConfig::default();
        let acceptor = ConnectionAcceptor::new(1);
        let handle = acceptor.handle();

        let (first, _keep_a) = channel_pair(ChannelKind::Dedicated, &config);
        handle.try_offer(first).unwrap();

        let (second, _keep_b) = channel_pair(ChannelKind::Dedicated, &config);
        let result = handle.try_offer(second);
        assert!(matches!(result, Err(TransportError::SendFailed(_))));
    }

    #[tokio::test]
    async fn test_offer_after_runner_gone() {
        let config = MuxConfig::default();
        let acceptor = ConnectionAcceptor::new(1);
        let handle = acceptor.handle();

        drop(acceptor.into_receiver());

        let (channel, _keep) = channel_pair(ChannelKind::Dedicated, &config);
        let result = handle.offer(channel).await;
        assert!(matches!(result, Err(TransportError::ConnectionClosed)));
    }
}
