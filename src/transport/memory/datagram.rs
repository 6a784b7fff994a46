//! Bounded, lossy in-process datagram queues.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::trace;

use super::Link;
use crate::core::TransportError;
use crate::transport::{CloseOutcome, DatagramSink, DatagramSource};

/// Outbound datagrams on the in-memory transport.
///
/// A full queue or a simulated loss drops the datagram and still reports
/// success, as a real unreliable channel would.
#[derive(Debug)]
pub struct MemoryDatagramSink {
    pub(super) tx: mpsc::Sender<Bytes>,
    pub(super) link: Link,
    pub(super) loss: f64,
    pub(super) max_size: usize,
}

impl MemoryDatagramSink {
    /// Send one datagram.
    pub async fn send(&mut self, data: Bytes) -> Result<(), TransportError> {
        match self.link.outcome() {
            None => {}
            Some(CloseOutcome::Normal) => return Err(TransportError::Closed),
            Some(CloseOutcome::Abrupt) => {
                return Err(TransportError::ConnectionLost("session aborted".into()));
            }
        }

        if data.len() > self.max_size {
            return Err(TransportError::TooLarge {
                size: data.len(),
                limit: self.max_size,
            });
        }

        if self.loss > 0.0 && rand::random::<f64>() < self.loss {
            trace!("dropping datagram of {} bytes (simulated loss)", data.len());
            return Ok(());
        }

        match self.tx.try_send(data) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(data)) => {
                trace!("dropping datagram of {} bytes (queue full)", data.len());
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(TransportError::Closed),
        }
    }
}

/// Inbound datagrams on the in-memory transport.
#[derive(Debug)]
pub struct MemoryDatagramSource {
    pub(super) rx: mpsc::Receiver<Bytes>,
    pub(super) link: Link,
}

impl MemoryDatagramSource {
    /// Receive the next datagram; `Ok(None)` after a normal close.
    pub async fn recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        tokio::select! {
            biased;

            data = self.rx.recv() => Ok(data),
            outcome = self.link.closed() => match outcome {
                CloseOutcome::Normal => Ok(None),
                CloseOutcome::Abrupt => Err(TransportError::ConnectionLost("session aborted".into())),
            },
        }
    }
}

#[async_trait]
impl DatagramSink for MemoryDatagramSink {
    async fn send(&mut self, data: Bytes) -> Result<(), TransportError> {
        MemoryDatagramSink::send(self, data).await
    }
}

#[async_trait]
impl DatagramSource for MemoryDatagramSource {
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        MemoryDatagramSource::recv(self).await
    }
}
