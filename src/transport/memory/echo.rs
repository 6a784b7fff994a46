//! Reference peer behaviours for the in-memory transport.
//!
//! - Bidirectional streams are read to EOF and answered on the same stream.
//! - Unidirectional streams are read to EOF and answered on a new
//!   unidirectional stream.
//! - Datagrams are answered with one datagram each.
//!
//! The reply itself depends on [`EchoMode`].

use std::sync::Arc;

use bytes::Bytes;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{MemoryListener, MemoryRecvStream, PeerSession};
use crate::core::{TrackedCoordinate, TrackingError};

/// What the peer sends back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoMode {
    /// The received bytes, unchanged.
    Echo,
    /// The ASCII byte count of the received data.
    Count,
    /// Datagrams carrying a [`TrackedCoordinate`] are answered with the
    /// [`TrackingError`] against `center`; streams behave as [`EchoMode::Echo`].
    Tracking {
        /// Reference position the peer compares against.
        center: TrackedCoordinate,
    },
}

impl EchoMode {
    fn stream_reply(&self, data: &[u8]) -> Vec<u8> {
        match self {
            EchoMode::Count => data.len().to_string().into_bytes(),
            EchoMode::Echo | EchoMode::Tracking { .. } => data.to_vec(),
        }
    }

    fn datagram_reply(&self, data: &[u8]) -> Option<Vec<u8>> {
        match self {
            EchoMode::Echo => Some(data.to_vec()),
            EchoMode::Count => Some(data.len().to_string().into_bytes()),
            EchoMode::Tracking { center } => match TrackedCoordinate::decode(data) {
                Ok(coord) => match TrackingError::between(coord, *center) {
                    Some(error) => Some(error.encode()),
                    None => {
                        warn!("ignoring coordinate ({}, {}): out of range", coord.x, coord.y);
                        None
                    }
                },
                Err(e) => {
                    warn!("ignoring datagram that is not a coordinate: {}", e);
                    None
                }
            },
        }
    }
}

/// Accept every connection attempt on `listener` and serve it in `mode`.
pub async fn serve(mut listener: MemoryListener, mode: EchoMode) {
    while let Some(pending) = listener.accept().await {
        info!("accepted session for {}", pending.url());
        spawn_echo(pending.accept(), mode);
    }
    debug!("listener closed, no more sessions");
}

/// Serve one session until it closes.
pub fn spawn_echo(peer: PeerSession, mode: EchoMode) -> JoinHandle<()> {
    let peer = Arc::new(peer);
    tokio::spawn(async move {
        let datagrams = tokio::spawn(echo_datagrams(Arc::clone(&peer), mode));
        let bidi = tokio::spawn(echo_bidirectional(Arc::clone(&peer), mode));
        let uni = tokio::spawn(echo_unidirectional(Arc::clone(&peer), mode));
        let _ = tokio::join!(datagrams, bidi, uni);
        debug!("echo peer for {} finished", peer.url());
    })
}

async fn echo_datagrams(peer: Arc<PeerSession>, mode: EchoMode) {
    loop {
        let data = match peer.recv_datagram().await {
            Ok(Some(data)) => data,
            Ok(None) => break,
            Err(e) => {
                debug!("datagram echo stopped: {}", e);
                break;
            }
        };

        let Some(reply) = mode.datagram_reply(&data) else {
            continue;
        };
        if let Err(e) = peer.send_datagram(Bytes::from(reply)).await {
            debug!("datagram echo stopped: {}", e);
            break;
        }
    }
}

async fn echo_bidirectional(peer: Arc<PeerSession>, mode: EchoMode) {
    while let Some((mut send, mut recv)) = peer.accept_bi().await {
        tokio::spawn(async move {
            let data = match recv.read_to_end().await {
                Ok(data) => data,
                Err(e) => {
                    debug!("bidirectional stream failed before EOF: {}", e);
                    return;
                }
            };
            let reply = mode.stream_reply(&data);
            if let Err(e) = send.write(&reply).await {
                debug!("failed to answer bidirectional stream: {}", e);
                return;
            }
            if let Err(e) = send.finish().await {
                debug!("failed to finish bidirectional stream: {}", e);
            }
        });
    }
}

async fn echo_unidirectional(peer: Arc<PeerSession>, mode: EchoMode) {
    while let Some(recv) = peer.accept_uni().await {
        let peer = Arc::clone(&peer);
        tokio::spawn(answer_unidirectional(peer, recv, mode));
    }
}

async fn answer_unidirectional(peer: Arc<PeerSession>, mut recv: MemoryRecvStream, mode: EchoMode) {
    let data = match recv.read_to_end().await {
        Ok(data) => data,
        Err(e) => {
            debug!("unidirectional stream failed before EOF: {}", e);
            return;
        }
    };

    let mut send = match peer.open_uni() {
        Ok(send) => send,
        Err(e) => {
            debug!("cannot open reply stream: {}", e);
            return;
        }
    };
    let reply = mode.stream_reply(&data);
    if let Err(e) = send.write(&reply).await {
        debug!("failed to answer unidirectional stream: {}", e);
        return;
    }
    if let Err(e) = send.finish().await {
        debug!("failed to finish reply stream: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::{MemoryConfig, endpoint};
    use crate::transport::{
        Connector, DatagramSink, DatagramSource, RecvStream, SendStream, TransportSession,
    };

    async fn echo_session(mode: EchoMode) -> Box<dyn TransportSession> {
        let (connector, listener) = endpoint(MemoryConfig::default());
        tokio::spawn(serve(listener, mode));
        connector.connect("memory://echo").await.unwrap()
    }

    async fn read_all(mut recv: Box<dyn RecvStream>) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = recv.read_chunk().await.unwrap() {
            out.extend_from_slice(&chunk);
        }
        out
    }

    #[test]
    fn test_replies() {
        assert_eq!(EchoMode::Echo.stream_reply(b"abc"), b"abc");
        assert_eq!(EchoMode::Count.stream_reply(b"Hello, world!"), b"13");
        assert_eq!(EchoMode::Count.datagram_reply(b""), Some(b"0".to_vec()));

        let tracking = EchoMode::Tracking {
            center: TrackedCoordinate::new(100, 100),
        };
        let reply = tracking.datagram_reply(br#"{"x":110,"y":95}"#).unwrap();
        assert_eq!(reply, br#"{"error_x":10,"error_y":-5}"#);
        assert_eq!(tracking.datagram_reply(b"not json"), None);
        assert_eq!(tracking.datagram_reply(br#"{"x":-2147483648,"y":0}"#), None);
    }

    #[tokio::test]
    async fn test_out_of_range_coordinate_keeps_peer_answering() {
        let session = echo_session(EchoMode::Tracking {
            center: TrackedCoordinate::new(100, 100),
        })
        .await;
        let (mut sink, mut source) = session.take_datagrams().unwrap();

        sink.send(Bytes::from_static(br#"{"x":-2147483648,"y":0}"#))
            .await
            .unwrap();
        sink.send(Bytes::from_static(br#"{"x":1,"y":1}"#)).await.unwrap();

        let reply = tokio::time::timeout(std::time::Duration::from_secs(2), source.recv())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(reply, &br#"{"error_x":-99,"error_y":-99}"#[..]);
    }

    #[tokio::test]
    async fn test_bidirectional_echo() {
        let session = echo_session(EchoMode::Echo).await;
        let (mut send, recv) = session.open_bi().await.unwrap();
        send.write(b"hello").await.unwrap();
        send.finish().await.unwrap();
        assert_eq!(read_all(recv).await, b"hello");
    }

    #[tokio::test]
    async fn test_unidirectional_count() {
        let session = echo_session(EchoMode::Count).await;
        let mut send = session.open_uni().await.unwrap();
        send.write(b"four").await.unwrap();
        send.finish().await.unwrap();

        let reply = session.accept_uni().await.unwrap().unwrap();
        assert_eq!(read_all(reply).await, b"4");
    }

    #[tokio::test]
    async fn test_datagram_echo() {
        let session = echo_session(EchoMode::Echo).await;
        let (mut sink, mut source) = session.take_datagrams().unwrap();
        sink.send(Bytes::from_static(b"dg")).await.unwrap();
        assert_eq!(source.recv().await.unwrap().unwrap(), &b"dg"[..]);
    }
}
