//! Session events and their delivery to an [`EventSink`].
//!
//! Every event has a fixed human-readable rendering and a severity. The
//! session never inspects what the sink does with them.

use std::sync::{Arc, Mutex};

use tracing::{error, info};

use super::registry::{Direction, StreamId};
use crate::core::{
    ConnectError, DatagramPayload, DecodeError, EventSink, SessionError, Severity,
    StreamIoError, TransportError,
};

/// Something worth telling the user about.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// `connect` started.
    Connecting,
    /// The transport reported readiness.
    Ready,
    /// The session never became ready.
    ConnectFailed(ConnectError),
    /// The session closed cleanly.
    ClosedNormally,
    /// The session was lost.
    ClosedAbruptly,
    /// The datagram writer is usable.
    DatagramWriterReady,
    /// The transport offers no datagram channel.
    DatagramsUnavailable(TransportError),
    /// The datagram read loop started.
    DatagramReaderReady,
    /// A datagram was decoded.
    DatagramReceived(DatagramPayload),
    /// A datagram could not be decoded and was skipped.
    DatagramMalformed(DecodeError),
    /// The inbound datagram channel reached EOF.
    DatagramStreamClosed,
    /// The datagram read loop hit a transport error.
    DatagramReadFailed(TransportError),
    /// A text datagram was sent.
    DatagramSent(String),
    /// A unidirectional stream carrying `data` was sent and finished.
    UniStreamSent(String),
    /// A bidirectional stream was opened and `data` written to it.
    BiStreamOpened {
        /// Stream identifier.
        id: StreamId,
        /// Text written.
        data: String,
    },
    /// A client-initiated stream was opened.
    StreamOpened {
        /// Stream identifier.
        id: StreamId,
        /// Uni or bi.
        direction: Direction,
    },
    /// A send operation failed.
    SendFailed(SessionError),
    /// The accept loop for peer-initiated streams started.
    AcceptorStarted,
    /// A peer-initiated unidirectional stream was accepted.
    IncomingStream(StreamId),
    /// The peer will open no further unidirectional streams.
    AcceptorDone,
    /// Accepting peer streams failed; no further streams are accepted.
    AcceptFailed(StreamIoError),
    /// Text decoded from a stream.
    StreamData {
        /// Stream identifier.
        id: StreamId,
        /// Decoded text.
        text: String,
    },
    /// A stream reached EOF.
    StreamClosed(StreamId),
    /// A stream failed.
    StreamFailed {
        /// Stream identifier.
        id: StreamId,
        /// The stream-local fault.
        error: StreamIoError,
    },
    /// A signaling offer was written to the peer.
    OfferSent,
    /// A signaling answer arrived.
    AnswerReceived,
}

impl SessionEvent {
    /// Severity reported with the event.
    pub fn severity(&self) -> Severity {
        match self {
            SessionEvent::ConnectFailed(_)
            | SessionEvent::ClosedAbruptly
            | SessionEvent::DatagramsUnavailable(_)
            | SessionEvent::DatagramMalformed(_)
            | SessionEvent::DatagramReadFailed(_)
            | SessionEvent::SendFailed(_)
            | SessionEvent::AcceptFailed(_)
            | SessionEvent::StreamFailed { .. } => Severity::Error,
            _ => Severity::Info,
        }
    }
}

impl std::fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionEvent::Connecting => f.write_str("Initiating connection..."),
            SessionEvent::Ready => f.write_str("Connection ready."),
            SessionEvent::ConnectFailed(e) => write!(f, "Connection failed. {e}"),
            SessionEvent::ClosedNormally => f.write_str("Connection closed normally."),
            SessionEvent::ClosedAbruptly => f.write_str("Connection closed abruptly."),
            SessionEvent::DatagramWriterReady => f.write_str("Datagram writer ready."),
            SessionEvent::DatagramsUnavailable(e) => {
                write!(f, "Sending datagrams not supported: {e}")
            }
            SessionEvent::DatagramReaderReady => f.write_str("Datagram reader ready."),
            SessionEvent::DatagramReceived(payload) => write!(f, "Datagram received: {payload}"),
            SessionEvent::DatagramMalformed(e) => write!(f, "Ignoring malformed datagram: {e}"),
            SessionEvent::DatagramStreamClosed => f.write_str("Datagram stream closed."),
            SessionEvent::DatagramReadFailed(e) => {
                write!(f, "Error while reading datagrams: {e}")
            }
            SessionEvent::DatagramSent(data) => write!(f, "Sent datagram: {data}"),
            SessionEvent::UniStreamSent(data) => {
                write!(f, "Sent a unidirectional stream with data: {data}")
            }
            SessionEvent::BiStreamOpened { id, data } => {
                write!(f, "Opened bidirectional stream {id} with data: {data}")
            }
            SessionEvent::StreamOpened { id, direction } => match direction {
                Direction::Uni => write!(f, "Opened unidirectional stream {id}"),
                Direction::Bi => write!(f, "Opened bidirectional stream {id}"),
            },
            SessionEvent::SendFailed(e) => write!(f, "Error while sending data: {e}"),
            SessionEvent::AcceptorStarted => f.write_str("Accepting unidirectional streams."),
            SessionEvent::IncomingStream(id) => {
                write!(f, "New incoming unidirectional stream {id}")
            }
            SessionEvent::AcceptorDone => f.write_str("Done accepting unidirectional streams!"),
            SessionEvent::AcceptFailed(e) => write!(f, "Error while accepting streams: {e}"),
            SessionEvent::StreamData { id, text } => {
                write!(f, "Received data on stream {id}: {text}")
            }
            SessionEvent::StreamClosed(id) => write!(f, "Stream {id} closed"),
            SessionEvent::StreamFailed { id, error } => {
                write!(f, "Error while reading from stream {id}: {error}")
            }
            SessionEvent::OfferSent => f.write_str("Offer sent to peer."),
            SessionEvent::AnswerReceived => f.write_str("Received answer from peer."),
        }
    }
}

/// Event fan-out shared by every task of one session.
#[derive(Clone)]
pub(crate) struct Events {
    sink: Arc<dyn EventSink>,
}

impl Events {
    pub(crate) fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        self.sink.record(&event.to_string(), event.severity());
    }
}

impl std::fmt::Debug for Events {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Events").finish_non_exhaustive()
    }
}

/// Forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, message: &str, severity: Severity) {
        match severity {
            Severity::Info => info!(target: "wtmux::events", "{}", message),
            Severity::Error => error!(target: "wtmux::events", "{}", message),
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    entries: Mutex<Vec<(String, Severity)>>,
}

impl RecordingSink {
    /// An empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event recorded so far, oldest first.
    pub fn entries(&self) -> Vec<(String, Severity)> {
        self.lock().clone()
    }

    /// Messages recorded so far, oldest first.
    pub fn messages(&self) -> Vec<String> {
        self.lock().iter().map(|(m, _)| m.clone()).collect()
    }

    /// Whether any recorded message contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.lock().iter().any(|(m, _)| m.contains(needle))
    }

    /// Number of recorded messages containing `needle`.
    pub fn count(&self, needle: &str) -> usize {
        self.lock().iter().filter(|(m, _)| m.contains(needle)).count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(String, Severity)>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl EventSink for RecordingSink {
    fn record(&self, message: &str, severity: Severity) {
        self.lock().push((message.to_owned(), severity));
    }
}
