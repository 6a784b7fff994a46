//! Transport abstraction below the session layer.
//!
//! The session core only needs a handful of primitives from the underlying
//! transport: readiness, a datagram pair, outbound streams, inbound
//! unidirectional streams and a closed notification. Everything below that
//! (framing, congestion control, retransmission) belongs to the transport.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  SessionHandle / readers / sampler      │
//! ├─────────────────────────────────────────┤
//! │  Connector + TransportSession           │  ← This module
//! ├─────────────────────────────────────────┤
//! │  memory (in-process) | real transports  │
//! └─────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use bytes::Bytes;

use crate::core::{ConnectError, StreamIoError, TransportError};

#[cfg(feature = "memory")]
#[cfg_attr(docsrs, doc(cfg(feature = "memory")))]
pub mod memory;

/// How a transport session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseOutcome {
    /// Closed cleanly by either side.
    Normal,
    /// Lost without a clean close.
    Abrupt,
}

/// Establishes transport sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a session to `url`, resolving once the transport reports
    /// readiness or rejection.
    async fn connect(&self, url: &str) -> Result<Box<dyn TransportSession>, ConnectError>;
}

/// An established transport session.
#[async_trait]
pub trait TransportSession: Send + Sync {
    /// Take the session's datagram pair.
    ///
    /// There is exactly one pair per session; subsequent calls fail with
    /// [`TransportError::Closed`]. Transports without datagram support fail
    /// with [`TransportError::Unsupported`].
    fn take_datagrams(
        &self,
    ) -> Result<(Box<dyn DatagramSink>, Box<dyn DatagramSource>), TransportError>;

    /// Open a unidirectional stream toward the peer.
    async fn open_uni(&self) -> Result<Box<dyn SendStream>, StreamIoError>;

    /// Open a bidirectional stream.
    async fn open_bi(&self) -> Result<(Box<dyn SendStream>, Box<dyn RecvStream>), StreamIoError>;

    /// Wait for the next peer-initiated unidirectional stream.
    ///
    /// `Ok(None)` means no further streams will arrive.
    async fn accept_uni(&self) -> Result<Option<Box<dyn RecvStream>>, StreamIoError>;

    /// Resolve once the session is closed.
    async fn closed(&self) -> CloseOutcome;

    /// Close the session normally. Idempotent.
    fn close(&self);
}

/// Sending half of a stream.
#[async_trait]
pub trait SendStream: Send {
    /// Write bytes in order.
    async fn write(&mut self, data: &[u8]) -> Result<(), StreamIoError>;

    /// Finish the stream; the peer reads EOF after the last byte.
    async fn finish(&mut self) -> Result<(), StreamIoError>;
}

/// Receiving half of a stream.
#[async_trait]
pub trait RecvStream: Send {
    /// Read the next chunk; `Ok(None)` at EOF.
    async fn read_chunk(&mut self) -> Result<Option<Bytes>, StreamIoError>;
}

/// Outbound datagrams.
#[async_trait]
pub trait DatagramSink: Send {
    /// Send one datagram. Delivery is not guaranteed.
    async fn send(&mut self, data: Bytes) -> Result<(), TransportError>;
}

/// Inbound datagrams.
#[async_trait]
pub trait DatagramSource: Send {
    /// Receive the next datagram; `Ok(None)` once the channel is closed.
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError>;
}
