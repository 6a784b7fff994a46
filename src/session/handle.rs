//! The session handle.
//!
//! [`SessionHandle::connect`] drives the lifecycle to `Ready` and then starts
//! three background tasks bound to the session:
//!
//! - a close watcher that turns a transport close into a terminal state,
//! - the datagram read loop, when the transport offers datagrams,
//! - the incoming stream acceptor.
//!
//! All of them, and every stream reader spawned afterwards, unwind once the
//! lifecycle is terminal. Dropping the last handle closes the session.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::acceptor::{AcceptorOutcome, IncomingStreamAcceptor};
use super::datagram::{DatagramLoopStats, DatagramReader, DatagramWriter, read_datagrams};
use super::events::{Events, SessionEvent};
use super::lifecycle::{Lifecycle, SessionState};
use super::reader::{StreamMessage, StreamOutcome, StreamReader, StreamSource, StreamWriter};
use super::registry::{Direction, StreamId, StreamRegistry};
use crate::config::ClientConfig;
use crate::core::{
    Capability, ConnectError, DatagramPayload, EventSink, SessionError, StreamIoError,
};
use crate::transport::{CloseOutcome, Connector, TransportSession};

/// Channel selected by [`SessionHandle::send_text`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SendKind {
    /// One datagram.
    Datagram,
    /// A new unidirectional stream, finished after the text.
    Unidirectional,
    /// A new bidirectional stream; the reply is read by a spawned reader.
    Bidirectional,
}

/// A client-initiated stream.
#[derive(Debug)]
pub struct OutgoingStream {
    /// Identifier drawn from the session's registry.
    pub id: StreamId,
    /// Writable half.
    pub writer: StreamWriter,
    /// Readable half, for bidirectional streams.
    pub reader: Option<StreamSource>,
}

struct DatagramChannel {
    writer: DatagramWriter,
    // Template receiver; every reader is a fresh subscription.
    rx: broadcast::Receiver<DatagramPayload>,
    read_loop: Mutex<Option<JoinHandle<DatagramLoopStats>>>,
}

struct Inner {
    url: String,
    transport: Arc<dyn TransportSession>,
    lifecycle: Lifecycle,
    registry: Arc<StreamRegistry>,
    events: Events,
    datagrams: Option<DatagramChannel>,
    reader: StreamReader,
    messages: broadcast::Sender<StreamMessage>,
    acceptor: Mutex<Option<JoinHandle<AcceptorOutcome>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.transport.close();
        terminate(&self.lifecycle, &self.events, CloseOutcome::Normal);
    }
}

/// A connected session. Cheap to clone; all clones share one session.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<Inner>,
}

impl SessionHandle {
    /// Connect to `url` and start the session's background tasks.
    ///
    /// Resolves once the transport reports readiness. On rejection or
    /// timeout nothing is started and the error is returned.
    pub async fn connect<C>(
        connector: &C,
        url: &str,
        config: ClientConfig,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, ConnectError>
    where
        C: Connector + ?Sized,
    {
        let events = Events::new(sink);
        let lifecycle = Lifecycle::new();
        lifecycle.transition(SessionState::Connecting);
        events.emit(SessionEvent::Connecting);
        info!("connecting to {}", url);

        let connected = tokio::time::timeout(config.connect_timeout, connector.connect(url)).await;
        let transport: Arc<dyn TransportSession> = match connected {
            Ok(Ok(transport)) => Arc::from(transport),
            Ok(Err(e)) => return Err(fail(&lifecycle, &events, e)),
            Err(_) => {
                let e = ConnectError::Timeout(config.connect_timeout);
                return Err(fail(&lifecycle, &events, e));
            }
        };

        lifecycle.transition(SessionState::Ready);
        events.emit(SessionEvent::Ready);
        info!("session to {} ready", url);

        tokio::spawn(watch_transport(
            Arc::clone(&transport),
            lifecycle.clone(),
            events.clone(),
        ));

        let registry = Arc::new(StreamRegistry::new());
        let (messages, _) = broadcast::channel(config.stream_buffer.max(1));
        let reader = StreamReader::new(events.clone(), messages.clone());

        let datagrams = match transport.take_datagrams() {
            Ok((sink, source)) => {
                let (tx, rx) = broadcast::channel(config.datagram_buffer.max(1));
                events.emit(SessionEvent::DatagramWriterReady);
                let read_loop = tokio::spawn(read_datagrams(
                    source,
                    tx,
                    lifecycle.watch(),
                    events.clone(),
                ));
                Some(DatagramChannel {
                    writer: DatagramWriter::new(sink, lifecycle.watch()),
                    rx,
                    read_loop: Mutex::new(Some(read_loop)),
                })
            }
            Err(e) => {
                warn!("session to {} has no datagram channel: {}", url, e);
                events.emit(SessionEvent::DatagramsUnavailable(e));
                None
            }
        };

        let acceptor = IncomingStreamAcceptor::new(
            Arc::clone(&transport),
            Arc::clone(&registry),
            reader.clone(),
            lifecycle.watch(),
            events.clone(),
        );
        let acceptor = tokio::spawn(acceptor.run());

        Ok(Self {
            inner: Arc::new(Inner {
                url: url.to_owned(),
                transport,
                lifecycle,
                registry,
                events,
                datagrams,
                reader,
                messages,
                acceptor: Mutex::new(Some(acceptor)),
            }),
        })
    }

    /// URL this session was opened with.
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.inner.lifecycle.state()
    }

    /// Resolve with the close outcome.
    ///
    /// May be called at any time; after the session ended it resolves with
    /// the recorded outcome right away.
    pub fn on_closed(&self) -> impl Future<Output = CloseOutcome> + Send + 'static {
        self.inner.lifecycle.watch().closed()
    }

    /// Close the session normally. Idempotent.
    pub fn close(&self) {
        self.inner.transport.close();
        terminate(&self.inner.lifecycle, &self.inner.events, CloseOutcome::Normal);
    }

    /// Whether the transport offers a datagram channel.
    pub fn supports_datagrams(&self) -> bool {
        self.inner.datagrams.is_some()
    }

    /// A handle to the session's datagram writer.
    pub fn datagram_writer(&self) -> Result<DatagramWriter, SessionError> {
        let channel = self.datagram_channel()?;
        Ok(channel.writer.clone())
    }

    /// A new subscription to decoded inbound datagrams.
    ///
    /// Only datagrams that arrive after this call are seen.
    pub fn datagram_reader(&self) -> Result<DatagramReader, SessionError> {
        let channel = self.datagram_channel()?;
        Ok(DatagramReader::new(channel.rx.resubscribe()))
    }

    fn datagram_channel(&self) -> Result<&DatagramChannel, SessionError> {
        let channel = self
            .inner
            .datagrams
            .as_ref()
            .ok_or(SessionError::UnsupportedCapability(Capability::Datagrams))?;
        self.inner.lifecycle.watch().ensure_open()?;
        Ok(channel)
    }

    /// Open a client-initiated stream.
    ///
    /// The identifier is drawn only once the transport opened the stream.
    pub async fn create_outgoing_stream(
        &self,
        direction: Direction,
    ) -> Result<OutgoingStream, SessionError> {
        match direction {
            Direction::Uni => {
                let writer = self.open_uni().await?;
                Ok(OutgoingStream {
                    id: writer.id(),
                    writer,
                    reader: None,
                })
            }
            Direction::Bi => {
                let (writer, reader) = self.open_bi().await?;
                Ok(OutgoingStream {
                    id: writer.id(),
                    writer,
                    reader: Some(reader),
                })
            }
        }
    }

    async fn open_uni(&self) -> Result<StreamWriter, SessionError> {
        let watch = self.inner.lifecycle.watch();
        watch.ensure_open()?;
        let send = self
            .inner
            .transport
            .open_uni()
            .await
            .map_err(session_error)?;
        let id = self.inner.registry.next_stream_id();
        debug!("opened unidirectional stream {}", id);
        self.inner.events.emit(SessionEvent::StreamOpened {
            id,
            direction: Direction::Uni,
        });
        Ok(StreamWriter::new(id, send, watch))
    }

    pub(crate) async fn open_bi(&self) -> Result<(StreamWriter, StreamSource), SessionError> {
        let watch = self.inner.lifecycle.watch();
        watch.ensure_open()?;
        let (send, recv) = self
            .inner
            .transport
            .open_bi()
            .await
            .map_err(session_error)?;
        let id = self.inner.registry.next_stream_id();
        debug!("opened bidirectional stream {}", id);
        self.inner.events.emit(SessionEvent::StreamOpened {
            id,
            direction: Direction::Bi,
        });
        Ok((
            StreamWriter::new(id, send, watch.clone()),
            StreamSource::new(id, recv, watch),
        ))
    }

    /// Run a stream reader for `source` as its own task.
    ///
    /// Its output goes to the session's event sink and to
    /// [`stream_messages`](Self::stream_messages) subscribers.
    pub fn spawn_reader(&self, source: StreamSource) -> JoinHandle<StreamOutcome> {
        self.inner.reader.spawn(source)
    }

    /// Subscribe to the output of every stream reader of this session.
    pub fn stream_messages(&self) -> broadcast::Receiver<StreamMessage> {
        self.inner.messages.subscribe()
    }

    /// Send `text` on the selected channel.
    ///
    /// Returns the identifier of the stream used, if any. Success and failure
    /// are both reported to the event sink.
    pub async fn send_text(
        &self,
        kind: SendKind,
        text: &str,
    ) -> Result<Option<StreamId>, SessionError> {
        let result = self.try_send_text(kind, text).await;
        if let Err(e) = &result {
            self.inner.events.emit(SessionEvent::SendFailed(e.clone()));
        }
        result
    }

    async fn try_send_text(
        &self,
        kind: SendKind,
        text: &str,
    ) -> Result<Option<StreamId>, SessionError> {
        match kind {
            SendKind::Datagram => {
                let writer = self.datagram_writer()?;
                writer.write(Bytes::copy_from_slice(text.as_bytes())).await?;
                self.inner
                    .events
                    .emit(SessionEvent::DatagramSent(text.to_owned()));
                Ok(None)
            }
            SendKind::Unidirectional => {
                let mut writer = self.open_uni().await?;
                writer.write_text(text).await?;
                writer.finish().await?;
                self.inner
                    .events
                    .emit(SessionEvent::UniStreamSent(text.to_owned()));
                Ok(Some(writer.id()))
            }
            SendKind::Bidirectional => {
                let (mut writer, reader) = self.open_bi().await?;
                let id = writer.id();
                self.spawn_reader(reader);
                writer.write_text(text).await?;
                writer.finish().await?;
                self.inner.events.emit(SessionEvent::BiStreamOpened {
                    id,
                    data: text.to_owned(),
                });
                Ok(Some(id))
            }
        }
    }

    /// Write `payload` on a fresh bidirectional stream, finish it and read
    /// the reply to EOF.
    pub async fn round_trip(&self, payload: &str) -> Result<String, SessionError> {
        let (mut writer, mut reader) = self.open_bi().await?;
        writer.write_text(payload).await?;
        writer.finish().await?;
        reader.read_to_string().await.map_err(session_error)
    }

    /// Wait for the incoming stream acceptor to stop and report how it ended.
    ///
    /// `None` once another caller collected the outcome.
    pub async fn join_acceptor(&self) -> Option<AcceptorOutcome> {
        let task = self.inner.acceptor.lock().await.take()?;
        match task.await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!("acceptor task ended abnormally: {}", e);
                None
            }
        }
    }

    /// Wait for the datagram read loop to stop and return its counters.
    ///
    /// `None` without a datagram channel, or once another caller collected
    /// the counters.
    pub async fn join_datagram_loop(&self) -> Option<DatagramLoopStats> {
        let channel = self.inner.datagrams.as_ref()?;
        let task = channel.read_loop.lock().await.take()?;
        match task.await {
            Ok(stats) => Some(stats),
            Err(e) => {
                warn!("datagram read loop ended abnormally: {}", e);
                None
            }
        }
    }

    pub(crate) fn events(&self) -> &Events {
        &self.inner.events
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("url", &self.inner.url)
            .field("state", &self.state())
            .field("datagrams", &self.supports_datagrams())
            .finish()
    }
}

/// Map a stream fault to the session-level error callers see.
pub(crate) fn session_error(e: StreamIoError) -> SessionError {
    match e {
        StreamIoError::SessionClosed | StreamIoError::ConnectionLost => SessionError::SessionClosed,
        other => SessionError::Stream(other),
    }
}

fn fail(lifecycle: &Lifecycle, events: &Events, e: ConnectError) -> ConnectError {
    warn!("connection failed: {}", e);
    lifecycle.transition(SessionState::Failed);
    events.emit(SessionEvent::ConnectFailed(e.clone()));
    e
}

fn terminate(lifecycle: &Lifecycle, events: &Events, outcome: CloseOutcome) {
    if !lifecycle.transition(SessionState::Closed(outcome)) {
        return;
    }
    match outcome {
        CloseOutcome::Normal => events.emit(SessionEvent::ClosedNormally),
        CloseOutcome::Abrupt => events.emit(SessionEvent::ClosedAbruptly),
    }
}

async fn watch_transport(
    transport: Arc<dyn TransportSession>,
    lifecycle: Lifecycle,
    events: Events,
) {
    let mut watch = lifecycle.watch();
    tokio::select! {
        biased;

        _ = watch.terminated() => {}
        outcome = transport.closed() => {
            debug!("transport closed: {:?}", outcome);
            terminate(&lifecycle, &events, outcome);
        }
    }
}
