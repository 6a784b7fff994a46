//! Discovery of peer-initiated unidirectional streams.

use std::sync::Arc;

use tracing::debug;

use super::events::{Events, SessionEvent};
use super::lifecycle::LifecycleWatch;
use super::reader::{StreamReader, StreamSource};
use super::registry::StreamRegistry;
use crate::core::StreamIoError;
use crate::transport::TransportSession;

/// How the accept loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptorOutcome {
    /// The peer will open no further streams, or the session ended.
    Finished {
        /// Streams accepted before the end.
        accepted: u64,
    },
    /// Accepting failed; no further streams are accepted.
    Failed(StreamIoError),
}

/// Accepts inbound unidirectional streams and hands each to its own reader.
pub(crate) struct IncomingStreamAcceptor {
    transport: Arc<dyn TransportSession>,
    registry: Arc<StreamRegistry>,
    reader: StreamReader,
    lifecycle: LifecycleWatch,
    events: Events,
}

impl IncomingStreamAcceptor {
    pub(crate) fn new(
        transport: Arc<dyn TransportSession>,
        registry: Arc<StreamRegistry>,
        reader: StreamReader,
        lifecycle: LifecycleWatch,
        events: Events,
    ) -> Self {
        Self {
            transport,
            registry,
            reader,
            lifecycle,
            events,
        }
    }

    /// Run until EOF, the first accept error or session end.
    ///
    /// Readers are spawned and never awaited here.
    pub(crate) async fn run(mut self) -> AcceptorOutcome {
        let mut accepted = 0;
        self.events.emit(SessionEvent::AcceptorStarted);

        loop {
            let next = tokio::select! {
                biased;

                state = self.lifecycle.terminated() => {
                    debug!("acceptor stopping, session {}", state);
                    self.events.emit(SessionEvent::AcceptorDone);
                    return AcceptorOutcome::Finished { accepted };
                }
                next = self.transport.accept_uni() => next,
            };

            match next {
                Ok(Some(stream)) => {
                    let id = self.registry.next_stream_id();
                    accepted += 1;
                    self.events.emit(SessionEvent::IncomingStream(id));
                    self.reader
                        .spawn(StreamSource::new(id, stream, self.lifecycle.clone()));
                }
                Ok(None) => {
                    self.events.emit(SessionEvent::AcceptorDone);
                    return AcceptorOutcome::Finished { accepted };
                }
                Err(e) => {
                    self.events.emit(SessionEvent::AcceptFailed(e.clone()));
                    return AcceptorOutcome::Failed(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TransportError;
    use crate::session::events::RecordingSink;
    use crate::session::lifecycle::{Lifecycle, SessionState};
    use crate::session::reader::StreamMessageKind;
    use crate::transport::{
        CloseOutcome, DatagramSink, DatagramSource, RecvStream, SendStream,
    };
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::VecDeque;
    use tokio::sync::{Mutex, broadcast};

    struct OneShot(Option<Bytes>);

    #[async_trait]
    impl RecvStream for OneShot {
        async fn read_chunk(&mut self) -> Result<Option<Bytes>, StreamIoError> {
            Ok(self.0.take())
        }
    }

    /// Hands out a scripted sequence of accept results.
    struct ScriptedTransport {
        accepts: Mutex<VecDeque<Result<Option<Box<dyn RecvStream>>, StreamIoError>>>,
    }

    #[async_trait]
    impl TransportSession for ScriptedTransport {
        fn take_datagrams(
            &self,
        ) -> Result<(Box<dyn DatagramSink>, Box<dyn DatagramSource>), TransportError> {
            Err(TransportError::Closed)
        }

        async fn open_uni(&self) -> Result<Box<dyn SendStream>, StreamIoError> {
            Err(StreamIoError::SessionClosed)
        }

        async fn open_bi(
            &self,
        ) -> Result<(Box<dyn SendStream>, Box<dyn RecvStream>), StreamIoError> {
            Err(StreamIoError::SessionClosed)
        }

        async fn accept_uni(&self) -> Result<Option<Box<dyn RecvStream>>, StreamIoError> {
            let next = self.accepts.lock().await.pop_front();
            match next {
                Some(next) => next,
                None => std::future::pending().await,
            }
        }

        async fn closed(&self) -> CloseOutcome {
            std::future::pending().await
        }

        fn close(&self) {}
    }

    fn stream(data: &'static [u8]) -> Result<Option<Box<dyn RecvStream>>, StreamIoError> {
        Ok(Some(Box::new(OneShot(Some(Bytes::from_static(data))))))
    }

    fn acceptor(
        script: Vec<Result<Option<Box<dyn RecvStream>>, StreamIoError>>,
        lifecycle: &Lifecycle,
        sink: Arc<RecordingSink>,
    ) -> (IncomingStreamAcceptor, broadcast::Receiver<crate::session::StreamMessage>) {
        let events = Events::new(sink);
        let (tx, rx) = broadcast::channel(16);
        let transport = Arc::new(ScriptedTransport {
            accepts: Mutex::new(script.into()),
        });
        (
            IncomingStreamAcceptor::new(
                transport,
                Arc::new(StreamRegistry::new()),
                StreamReader::new(events.clone(), tx),
                lifecycle.watch(),
                events,
            ),
            rx,
        )
    }

    fn ready() -> Lifecycle {
        let lifecycle = Lifecycle::new();
        lifecycle.transition(SessionState::Ready);
        lifecycle
    }

    #[tokio::test]
    async fn test_accepts_until_eof() {
        let lifecycle = ready();
        let sink = Arc::new(RecordingSink::new());
        let (acceptor, mut rx) =
            acceptor(vec![stream(b"a"), stream(b"b"), Ok(None)], &lifecycle, sink.clone());

        assert_eq!(acceptor.run().await, AcceptorOutcome::Finished { accepted: 2 });
        assert_eq!(sink.messages()[0], "Accepting unidirectional streams.");
        assert!(sink.contains("New incoming unidirectional stream #1"));
        assert!(sink.contains("New incoming unidirectional stream #2"));
        assert!(sink.contains("Done accepting unidirectional streams!"));

        let mut closed = 0;
        while closed < 2 {
            if rx.recv().await.unwrap().kind == StreamMessageKind::Closed {
                closed += 1;
            }
        }
    }

    #[tokio::test]
    async fn test_error_stops_accepting() {
        let lifecycle = ready();
        let sink = Arc::new(RecordingSink::new());
        let (acceptor, _rx) = acceptor(
            vec![Err(StreamIoError::ConnectionLost), stream(b"late")],
            &lifecycle,
            sink.clone(),
        );

        assert_eq!(
            acceptor.run().await,
            AcceptorOutcome::Failed(StreamIoError::ConnectionLost)
        );
        assert!(sink.contains("Error while accepting streams: connection lost"));
        assert!(!sink.contains("New incoming"));
    }

    #[tokio::test]
    async fn test_session_end_stops_acceptor() {
        let lifecycle = ready();
        let sink = Arc::new(RecordingSink::new());
        let (acceptor, _rx) = acceptor(Vec::new(), &lifecycle, sink);
        let task = tokio::spawn(acceptor.run());

        lifecycle.transition(SessionState::Closed(CloseOutcome::Normal));
        let outcome = tokio::time::timeout(std::time::Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, AcceptorOutcome::Finished { accepted: 0 });
    }
}
