//! In-process transport.
//!
//! [`endpoint`] returns a connector for the client side and a listener for
//! the server side. Every `connect` call produces a [`PendingSession`] on the
//! listener; accepting it makes the client's `connect` resolve, rejecting it
//! makes `connect` fail with [`ConnectError::Rejected`].
//!
//! ```ignore
//! let (connector, mut listener) = memory::endpoint(MemoryConfig::default());
//! tokio::spawn(async move {
//!     while let Some(pending) = listener.accept().await {
//!         echo::spawn_echo(pending.accept(), EchoMode::Echo);
//!     }
//! });
//! let session = SessionHandle::connect(&connector, "memory://echo", config, sink).await?;
//! ```

mod datagram;
pub mod echo;
mod pipe;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

pub use datagram::{MemoryDatagramSink, MemoryDatagramSource};
pub use pipe::{MemoryRecvStream, MemorySendStream};

use crate::core::{
    Capability, ConnectError, DEFAULT_DATAGRAM_QUEUE, DEFAULT_MAX_DATAGRAM_SIZE, StreamIoError,
    TransportError,
};
use crate::transport::{
    CloseOutcome, Connector, DatagramSink, DatagramSource, RecvStream, SendStream,
    TransportSession,
};

/// Shared close state of one in-memory session.
#[derive(Debug, Clone)]
pub(crate) struct Link {
    state: Arc<watch::Sender<Option<CloseOutcome>>>,
}

impl Link {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            state: Arc::new(tx),
        }
    }

    /// Record the close outcome. Only the first call has an effect.
    pub(crate) fn close(&self, outcome: CloseOutcome) -> bool {
        self.state.send_if_modified(|state| {
            if state.is_some() {
                return false;
            }
            *state = Some(outcome);
            true
        })
    }

    pub(crate) fn outcome(&self) -> Option<CloseOutcome> {
        *self.state.borrow()
    }

    pub(crate) async fn closed(&self) -> CloseOutcome {
        let mut rx = self.state.subscribe();
        match rx.wait_for(Option::is_some).await {
            Ok(state) => state.unwrap_or(CloseOutcome::Abrupt),
            Err(_) => CloseOutcome::Abrupt,
        }
    }

    pub(crate) fn stream_error(outcome: CloseOutcome) -> StreamIoError {
        match outcome {
            CloseOutcome::Normal => StreamIoError::SessionClosed,
            CloseOutcome::Abrupt => StreamIoError::ConnectionLost,
        }
    }

    pub(crate) fn check_open(&self) -> Result<(), StreamIoError> {
        match self.outcome() {
            None => Ok(()),
            Some(outcome) => Err(Self::stream_error(outcome)),
        }
    }
}

/// In-memory transport configuration.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Whether sessions offer a datagram channel.
    pub datagrams: bool,

    /// Depth of each datagram queue; overflow is dropped.
    pub datagram_queue: usize,

    /// Probability in `[0, 1]` that a datagram is silently dropped.
    pub datagram_loss: f64,

    /// Largest datagram accepted.
    pub max_datagram_size: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            datagrams: true,
            datagram_queue: DEFAULT_DATAGRAM_QUEUE,
            datagram_loss: 0.0,
            max_datagram_size: DEFAULT_MAX_DATAGRAM_SIZE,
        }
    }
}

impl MemoryConfig {
    /// Sessions without datagram support.
    pub fn without_datagrams(mut self) -> Self {
        self.datagrams = false;
        self
    }

    /// Set the datagram queue depth.
    pub fn datagram_queue(mut self, depth: usize) -> Self {
        self.datagram_queue = depth.max(1);
        self
    }

    /// Set the simulated loss probability.
    pub fn datagram_loss(mut self, probability: f64) -> Self {
        self.datagram_loss = probability.clamp(0.0, 1.0);
        self
    }
}

/// Create a connected connector/listener pair.
pub fn endpoint(config: MemoryConfig) -> (MemoryConnector, MemoryListener) {
    let (tx, rx) = mpsc::channel(16);
    (
        MemoryConnector {
            incoming: tx,
            config,
        },
        MemoryListener { incoming: rx },
    )
}

/// Client side of the in-memory transport.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    incoming: mpsc::Sender<PendingSession>,
    config: MemoryConfig,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn TransportSession>, ConnectError> {
        let (client, peer) = session_pair(&self.config, url);
        let (ready_tx, ready_rx) = oneshot::channel();

        let pending = PendingSession {
            url: url.to_owned(),
            ready: ready_tx,
            peer,
        };
        self.incoming
            .send(pending)
            .await
            .map_err(|_| ConnectError::Unreachable(url.to_owned()))?;

        match ready_rx.await {
            Ok(Ok(())) => Ok(Box::new(client)),
            Ok(Err(reason)) => Err(ConnectError::Rejected(reason)),
            Err(_) => Err(ConnectError::Rejected(
                "listener dropped the session".to_owned(),
            )),
        }
    }
}

/// Server side of the in-memory transport.
#[derive(Debug)]
pub struct MemoryListener {
    incoming: mpsc::Receiver<PendingSession>,
}

impl MemoryListener {
    /// Wait for the next connection attempt; `None` once every connector is gone.
    pub async fn accept(&mut self) -> Option<PendingSession> {
        self.incoming.recv().await
    }
}

/// A connection attempt awaiting a readiness decision.
#[derive(Debug)]
pub struct PendingSession {
    url: String,
    ready: oneshot::Sender<Result<(), String>>,
    peer: PeerSession,
}

impl PendingSession {
    /// URL the client asked for.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Report readiness and take the server side of the session.
    pub fn accept(self) -> PeerSession {
        if self.ready.send(Ok(())).is_err() {
            debug!("client gave up on {} before it was accepted", self.url);
        }
        self.peer
    }

    /// Refuse the session.
    pub fn reject(self, reason: impl Into<String>) {
        let _ = self.ready.send(Err(reason.into()));
        self.peer.abort();
    }
}

type BiPair = (MemorySendStream, MemoryRecvStream);

fn session_pair(config: &MemoryConfig, url: &str) -> (MemorySession, PeerSession) {
    let link = Link::new();
    let (to_peer_uni, from_client_uni) = mpsc::unbounded_channel();
    let (to_client_uni, from_peer_uni) = mpsc::unbounded_channel();
    let (to_peer_bi, from_client_bi) = mpsc::unbounded_channel();

    let (client_datagrams, peer_datagrams) = if config.datagrams {
        let (up_tx, up_rx) = mpsc::channel(config.datagram_queue.max(1));
        let (down_tx, down_rx) = mpsc::channel(config.datagram_queue.max(1));
        let sink = |tx: mpsc::Sender<Bytes>| MemoryDatagramSink {
            tx,
            link: link.clone(),
            loss: config.datagram_loss,
            max_size: config.max_datagram_size,
        };
        let source = |rx: mpsc::Receiver<Bytes>| MemoryDatagramSource {
            rx,
            link: link.clone(),
        };
        (
            Some((sink(up_tx), source(down_rx))),
            Some((sink(down_tx), source(up_rx))),
        )
    } else {
        (None, None)
    };

    let supports_datagrams = client_datagrams.is_some();
    let (peer_sink, peer_source) = match peer_datagrams {
        Some((sink, source)) => (Some(sink), Some(source)),
        None => (None, None),
    };

    let client = MemorySession {
        link: link.clone(),
        supports_datagrams,
        datagrams: Mutex::new(client_datagrams),
        incoming_uni: tokio::sync::Mutex::new(from_peer_uni),
        outgoing_uni: to_peer_uni,
        outgoing_bi: to_peer_bi,
    };

    let peer = PeerSession {
        url: url.to_owned(),
        link,
        datagram_tx: peer_sink.map(tokio::sync::Mutex::new),
        datagram_rx: peer_source.map(tokio::sync::Mutex::new),
        uni_tx: Mutex::new(Some(to_client_uni)),
        uni_rx: tokio::sync::Mutex::new(from_client_uni),
        bi_rx: tokio::sync::Mutex::new(from_client_bi),
    };

    (client, peer)
}

/// Client side of an in-memory session.
#[derive(Debug)]
pub struct MemorySession {
    link: Link,
    supports_datagrams: bool,
    datagrams: Mutex<Option<(MemoryDatagramSink, MemoryDatagramSource)>>,
    incoming_uni: tokio::sync::Mutex<mpsc::UnboundedReceiver<MemoryRecvStream>>,
    outgoing_uni: mpsc::UnboundedSender<MemoryRecvStream>,
    outgoing_bi: mpsc::UnboundedSender<BiPair>,
}

#[async_trait]
impl TransportSession for MemorySession {
    fn take_datagrams(
        &self,
    ) -> Result<(Box<dyn DatagramSink>, Box<dyn DatagramSource>), TransportError> {
        if !self.supports_datagrams {
            return Err(TransportError::Unsupported(Capability::Datagrams));
        }
        let mut slot = self.datagrams.lock().unwrap_or_else(|e| e.into_inner());
        let (sink, source) = slot.take().ok_or(TransportError::Closed)?;
        Ok((Box::new(sink), Box::new(source)))
    }

    async fn open_uni(&self) -> Result<Box<dyn SendStream>, StreamIoError> {
        self.link.check_open()?;
        let (writer, reader) = pipe::pipe(&self.link);
        self.outgoing_uni
            .send(reader)
            .map_err(|_| StreamIoError::ConnectionLost)?;
        Ok(Box::new(writer))
    }

    async fn open_bi(&self) -> Result<(Box<dyn SendStream>, Box<dyn RecvStream>), StreamIoError> {
        self.link.check_open()?;
        let (client_tx, peer_rx) = pipe::pipe(&self.link);
        let (peer_tx, client_rx) = pipe::pipe(&self.link);
        self.outgoing_bi
            .send((peer_tx, peer_rx))
            .map_err(|_| StreamIoError::ConnectionLost)?;
        Ok((Box::new(client_tx), Box::new(client_rx)))
    }

    async fn accept_uni(&self) -> Result<Option<Box<dyn RecvStream>>, StreamIoError> {
        let mut incoming = self.incoming_uni.lock().await;
        tokio::select! {
            biased;

            stream = incoming.recv() => {
                Ok(stream.map(|s| Box::new(s) as Box<dyn RecvStream>))
            }
            outcome = self.link.closed() => match outcome {
                CloseOutcome::Normal => Ok(None),
                CloseOutcome::Abrupt => Err(StreamIoError::ConnectionLost),
            },
        }
    }

    async fn closed(&self) -> CloseOutcome {
        self.link.closed().await
    }

    fn close(&self) {
        self.link.close(CloseOutcome::Normal);
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.link.close(CloseOutcome::Normal);
    }
}

/// Server side of an in-memory session.
///
/// All methods take `&self`, so the session can be shared between the tasks
/// serving its datagrams and streams.
#[derive(Debug)]
pub struct PeerSession {
    url: String,
    link: Link,
    datagram_tx: Option<tokio::sync::Mutex<MemoryDatagramSink>>,
    datagram_rx: Option<tokio::sync::Mutex<MemoryDatagramSource>>,
    uni_tx: Mutex<Option<mpsc::UnboundedSender<MemoryRecvStream>>>,
    uni_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<MemoryRecvStream>>,
    bi_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<BiPair>>,
}

impl PeerSession {
    /// URL the client connected to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send a datagram to the client.
    pub async fn send_datagram(&self, data: impl Into<Bytes>) -> Result<(), TransportError> {
        let sink = self
            .datagram_tx
            .as_ref()
            .ok_or(TransportError::Unsupported(Capability::Datagrams))?;
        sink.lock().await.send(data.into()).await
    }

    /// Receive the next datagram from the client.
    pub async fn recv_datagram(&self) -> Result<Option<Bytes>, TransportError> {
        let source = self
            .datagram_rx
            .as_ref()
            .ok_or(TransportError::Unsupported(Capability::Datagrams))?;
        source.lock().await.recv().await
    }

    /// Open a unidirectional stream toward the client.
    pub fn open_uni(&self) -> Result<MemorySendStream, StreamIoError> {
        self.link.check_open()?;
        let guard = self.uni_tx.lock().unwrap_or_else(|e| e.into_inner());
        let tx = guard.as_ref().ok_or(StreamIoError::SessionClosed)?;
        let (writer, reader) = pipe::pipe(&self.link);
        tx.send(reader).map_err(|_| StreamIoError::ConnectionLost)?;
        Ok(writer)
    }

    /// Signal the client that no further unidirectional streams will be opened.
    pub fn end_incoming_streams(&self) {
        self.uni_tx.lock().unwrap_or_else(|e| e.into_inner()).take();
    }

    /// Next bidirectional stream opened by the client; `None` once closed.
    pub async fn accept_bi(&self) -> Option<(MemorySendStream, MemoryRecvStream)> {
        let mut incoming = self.bi_rx.lock().await;
        tokio::select! {
            biased;

            pair = incoming.recv() => pair,
            _ = self.link.closed() => None,
        }
    }

    /// Next unidirectional stream opened by the client; `None` once closed.
    pub async fn accept_uni(&self) -> Option<MemoryRecvStream> {
        let mut incoming = self.uni_rx.lock().await;
        tokio::select! {
            biased;

            stream = incoming.recv() => stream,
            _ = self.link.closed() => None,
        }
    }

    /// Close the session cleanly.
    pub fn close(&self) {
        self.link.close(CloseOutcome::Normal);
    }

    /// Drop the session without a clean close.
    pub fn abort(&self) {
        self.link.close(CloseOutcome::Abrupt);
    }

    /// Resolve once the session is closed by either side.
    pub async fn closed(&self) -> CloseOutcome {
        self.link.closed().await
    }
}

impl Drop for PeerSession {
    fn drop(&mut self) {
        self.link.close(CloseOutcome::Normal);
    }
}
