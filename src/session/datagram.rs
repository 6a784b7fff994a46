//! The session's datagram channel.
//!
//! One writer and one reader exist per session. [`DatagramWriter`] handles
//! are clones sharing the single transport writer behind an async lock, so
//! each datagram is written whole. Inbound datagrams are decoded once by the
//! read loop and fanned out to every [`DatagramReader`].

use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, warn};

use super::events::{Events, SessionEvent};
use super::lifecycle::LifecycleWatch;
use crate::core::{DatagramPayload, SessionError};
use crate::transport::{DatagramSink, DatagramSource};

/// Sends datagrams on the session.
#[derive(Clone)]
pub struct DatagramWriter {
    sink: Arc<Mutex<Box<dyn DatagramSink>>>,
    lifecycle: LifecycleWatch,
}

impl DatagramWriter {
    pub(crate) fn new(sink: Box<dyn DatagramSink>, lifecycle: LifecycleWatch) -> Self {
        Self {
            sink: Arc::new(Mutex::new(sink)),
            lifecycle,
        }
    }

    /// Write one datagram. Delivery is best-effort.
    ///
    /// Waits behind any concurrent writer; fails with
    /// [`SessionError::SessionClosed`] if the session ends first.
    pub async fn write(&self, data: impl Into<Bytes>) -> Result<(), SessionError> {
        self.lifecycle.ensure_open()?;
        let data = data.into();
        let mut lifecycle = self.lifecycle.clone();

        tokio::select! {
            biased;

            _ = lifecycle.terminated() => Err(SessionError::SessionClosed),
            result = async {
                let mut sink = self.sink.lock().await;
                sink.send(data).await
            } => result.map_err(SessionError::from),
        }
    }
}

impl std::fmt::Debug for DatagramWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatagramWriter")
            .field("state", &self.lifecycle.state())
            .finish_non_exhaustive()
    }
}

/// Receives decoded datagrams.
///
/// A reader that falls behind by more than the configured buffer skips the
/// oldest datagrams.
#[derive(Debug)]
pub struct DatagramReader {
    rx: broadcast::Receiver<DatagramPayload>,
}

impl DatagramReader {
    pub(crate) fn new(rx: broadcast::Receiver<DatagramPayload>) -> Self {
        Self { rx }
    }

    /// Next datagram; `None` once the read loop stopped.
    pub async fn recv(&mut self) -> Option<DatagramPayload> {
        loop {
            match self.rx.recv().await {
                Ok(payload) => return Some(payload),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("datagram reader lagged, skipped {} datagrams", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// The remaining datagrams as a stream.
    pub fn into_stream(self) -> BoxStream<'static, DatagramPayload> {
        stream::unfold(self, |mut reader| async move {
            let payload = reader.recv().await?;
            Some((payload, reader))
        })
        .boxed()
    }
}

/// Counters returned by the datagram read loop when it stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DatagramLoopStats {
    /// Datagrams decoded and handed to readers.
    pub delivered: u64,
    /// Datagrams skipped as malformed.
    pub malformed: u64,
}

/// Decode inbound datagrams until EOF, a transport error or session end.
pub(crate) async fn read_datagrams(
    mut source: Box<dyn DatagramSource>,
    tx: broadcast::Sender<DatagramPayload>,
    mut lifecycle: LifecycleWatch,
    events: Events,
) -> DatagramLoopStats {
    let mut stats = DatagramLoopStats::default();
    events.emit(SessionEvent::DatagramReaderReady);

    loop {
        let received = tokio::select! {
            biased;

            state = lifecycle.terminated() => {
                debug!("datagram reader stopping, session {}", state);
                break;
            }
            received = source.recv() => received,
        };

        let data = match received {
            Ok(Some(data)) => data,
            Ok(None) => {
                events.emit(SessionEvent::DatagramStreamClosed);
                break;
            }
            Err(e) => {
                events.emit(SessionEvent::DatagramReadFailed(e));
                break;
            }
        };

        match DatagramPayload::decode(&data) {
            Ok(payload) => {
                stats.delivered += 1;
                events.emit(SessionEvent::DatagramReceived(payload.clone()));
                // No subscribers is fine; datagrams are best-effort.
                let _ = tx.send(payload);
            }
            Err(e) => {
                warn!("skipping malformed datagram of {} bytes: {}", data.len(), e);
                stats.malformed += 1;
                events.emit(SessionEvent::DatagramMalformed(e));
            }
        }
    }

    stats
}
