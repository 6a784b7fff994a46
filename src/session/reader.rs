//! Per-stream reading and writing.
//!
//! Every stream read is bound to the session lifecycle: once the session is
//! terminal a pending read resolves with [`StreamIoError::SessionClosed`] or
//! [`StreamIoError::ConnectionLost`] instead of waiting on the transport.
//!
//! [`StreamReader`] is the per-stream read loop. Each runs as its own task
//! and reports only about its own stream, so a failing stream never takes
//! down another reader, the acceptor or the datagram loop.

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

use super::events::{Events, SessionEvent};
use super::lifecycle::LifecycleWatch;
use super::registry::StreamId;
use crate::core::{SessionError, StreamIoError};
use crate::transport::{RecvStream, SendStream};

/// Incremental UTF-8 decoder.
///
/// Sequences split across chunks are held back until complete. Invalid
/// sequences decode to U+FFFD, and so does an incomplete sequence left over
/// at [`finish`](Self::finish).
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    /// A decoder with nothing buffered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `chunk`, returning all text that is complete so far.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);

        let mut out = String::new();
        let mut input: &[u8] = &self.pending;
        loop {
            match std::str::from_utf8(input) {
                Ok(text) => {
                    out.push_str(text);
                    input = &[];
                    break;
                }
                Err(e) => {
                    let (valid, rest) = input.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            input = &rest[len..];
                        }
                        // Incomplete sequence at the end; wait for more bytes.
                        None => {
                            input = rest;
                            break;
                        }
                    }
                }
            }
        }

        self.pending = input.to_vec();
        out
    }

    /// Flush at EOF.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }
        self.pending.clear();
        char::REPLACEMENT_CHARACTER.to_string()
    }

    /// Whether bytes of an incomplete sequence are buffered.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// Readable half of a stream.
pub struct StreamSource {
    id: StreamId,
    inner: Box<dyn RecvStream>,
    lifecycle: LifecycleWatch,
}

impl StreamSource {
    pub(crate) fn new(id: StreamId, inner: Box<dyn RecvStream>, lifecycle: LifecycleWatch) -> Self {
        Self {
            id,
            inner,
            lifecycle,
        }
    }

    /// Identifier of this stream.
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Next raw chunk; `Ok(None)` at EOF.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, StreamIoError> {
        tokio::select! {
            biased;

            state = self.lifecycle.terminated() => Err(state.stream_error()),
            chunk = self.inner.read_chunk() => chunk,
        }
    }

    /// Raw chunks until EOF or the first error.
    pub fn chunks(self) -> BoxStream<'static, Result<Bytes, StreamIoError>> {
        stream::unfold(Some(self), |source| async move {
            let mut source = source?;
            match source.next_chunk().await {
                Ok(Some(chunk)) => Some((Ok(chunk), Some(source))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
        .boxed()
    }

    /// Decoded text until EOF or the first error.
    ///
    /// Chunks that decode to nothing (a lone partial sequence) are not
    /// yielded.
    pub fn text_chunks(self) -> BoxStream<'static, Result<String, StreamIoError>> {
        stream::unfold(Some((self, Utf8Decoder::new())), |state| async move {
            let (mut source, mut decoder) = state?;
            loop {
                match source.next_chunk().await {
                    Ok(Some(chunk)) => {
                        let text = decoder.decode(&chunk);
                        if !text.is_empty() {
                            return Some((Ok(text), Some((source, decoder))));
                        }
                    }
                    Ok(None) => {
                        let tail = decoder.finish();
                        if tail.is_empty() {
                            return None;
                        }
                        return Some((Ok(tail), None));
                    }
                    Err(e) => return Some((Err(e), None)),
                }
            }
        })
        .boxed()
    }

    /// Read every remaining byte.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>, StreamIoError> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next_chunk().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    /// Read and decode every remaining byte.
    pub async fn read_to_string(&mut self) -> Result<String, StreamIoError> {
        let mut decoder = Utf8Decoder::new();
        let mut out = String::new();
        while let Some(chunk) = self.next_chunk().await? {
            out.push_str(&decoder.decode(&chunk));
        }
        out.push_str(&decoder.finish());
        Ok(out)
    }
}

impl std::fmt::Debug for StreamSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSource")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Writable half of a stream.
pub struct StreamWriter {
    id: StreamId,
    inner: Box<dyn SendStream>,
    lifecycle: LifecycleWatch,
}

impl StreamWriter {
    pub(crate) fn new(id: StreamId, inner: Box<dyn SendStream>, lifecycle: LifecycleWatch) -> Self {
        Self {
            id,
            inner,
            lifecycle,
        }
    }

    /// Identifier of this stream.
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Append bytes.
    pub async fn write(&mut self, data: &[u8]) -> Result<(), SessionError> {
        self.lifecycle.ensure_open()?;
        self.inner.write(data).await.map_err(SessionError::from)
    }

    /// Append UTF-8 text.
    pub async fn write_text(&mut self, text: &str) -> Result<(), SessionError> {
        self.write(text.as_bytes()).await
    }

    /// End the stream; the peer reads EOF after the last byte written.
    pub async fn finish(&mut self) -> Result<(), SessionError> {
        self.lifecycle.ensure_open()?;
        self.inner.finish().await.map_err(SessionError::from)
    }
}

impl std::fmt::Debug for StreamWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamWriter")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// What a stream reader published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamMessageKind {
    /// Decoded text.
    Data(String),
    /// EOF.
    Closed,
    /// The stream failed; nothing follows.
    Errored(StreamIoError),
}

/// Output of a stream reader, tagged with its stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMessage {
    /// Source stream.
    pub id: StreamId,
    /// Payload.
    pub kind: StreamMessageKind,
}

/// How a stream reader ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Read to EOF.
    Closed,
    /// Stopped at a stream error.
    Errored(StreamIoError),
}

/// Spawns per-stream read loops.
#[derive(Debug, Clone)]
pub(crate) struct StreamReader {
    events: Events,
    messages: broadcast::Sender<StreamMessage>,
}

impl StreamReader {
    pub(crate) fn new(events: Events, messages: broadcast::Sender<StreamMessage>) -> Self {
        Self { events, messages }
    }

    /// Read `source` to its end, publishing every decoded chunk.
    pub(crate) async fn run(&self, source: StreamSource) -> StreamOutcome {
        let id = source.id();
        let mut chunks = source.text_chunks();

        while let Some(item) = chunks.next().await {
            match item {
                Ok(text) => {
                    self.events.emit(SessionEvent::StreamData {
                        id,
                        text: text.clone(),
                    });
                    self.publish(id, StreamMessageKind::Data(text));
                }
                Err(error) => {
                    debug!("stream {} failed: {}", id, error);
                    self.events.emit(SessionEvent::StreamFailed {
                        id,
                        error: error.clone(),
                    });
                    self.publish(id, StreamMessageKind::Errored(error.clone()));
                    return StreamOutcome::Errored(error);
                }
            }
        }

        self.events.emit(SessionEvent::StreamClosed(id));
        self.publish(id, StreamMessageKind::Closed);
        StreamOutcome::Closed
    }

    pub(crate) fn spawn(&self, source: StreamSource) -> JoinHandle<StreamOutcome> {
        let reader = self.clone();
        tokio::spawn(async move { reader.run(source).await })
    }

    fn publish(&self, id: StreamId, kind: StreamMessageKind) {
        // Nobody subscribed is not an error.
        let _ = self.messages.send(StreamMessage { id, kind });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::events::RecordingSink;
    use crate::session::lifecycle::{Lifecycle, SessionState};
    use crate::session::registry::StreamRegistry;
    use crate::transport::CloseOutcome;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Arc;

    struct ScriptedStream(VecDeque<Result<Option<Bytes>, StreamIoError>>);

    #[async_trait]
    impl RecvStream for ScriptedStream {
        async fn read_chunk(&mut self) -> Result<Option<Bytes>, StreamIoError> {
            match self.0.pop_front() {
                Some(next) => next,
                None => std::future::pending().await,
            }
        }
    }

    fn chunks(parts: &[&'static [u8]]) -> ScriptedStream {
        let mut script: VecDeque<_> = parts
            .iter()
            .map(|p| Ok(Some(Bytes::from_static(p))))
            .collect();
        script.push_back(Ok(None));
        ScriptedStream(script)
    }

    fn ready() -> Lifecycle {
        let lifecycle = Lifecycle::new();
        lifecycle.transition(SessionState::Ready);
        lifecycle
    }

    #[test]
    fn test_decoder_joins_split_sequence() {
        let bytes = "héllo €".as_bytes();
        let euro = bytes.len() - 3;

        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(&bytes[..2]), "h");
        assert!(decoder.has_pending());
        assert_eq!(decoder.decode(&bytes[2..euro + 1]), "éllo ");
        assert_eq!(decoder.decode(&bytes[euro + 1..]), "€");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn test_decoder_replaces_invalid_bytes() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(b"a\xffb"), "a\u{FFFD}b");
        assert!(!decoder.has_pending());
    }

    #[test]
    fn test_decoder_truncated_at_eof() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(&"€".as_bytes()[..2]), "");
        assert_eq!(decoder.finish(), "\u{FFFD}");
        assert_eq!(decoder.finish(), "");
    }

    #[tokio::test]
    async fn test_read_to_string_across_chunks() {
        let lifecycle = ready();
        let id = StreamRegistry::new().next_stream_id();
        let emoji = "🦀".as_bytes();
        let mut source = StreamSource::new(
            id,
            Box::new(chunks(&[&emoji[..1], &emoji[1..]])),
            lifecycle.watch(),
        );
        assert_eq!(source.read_to_string().await.unwrap(), "🦀");
    }

    #[tokio::test]
    async fn test_raw_chunks_keep_split_bytes() {
        let lifecycle = ready();
        let id = StreamRegistry::new().next_stream_id();
        let euro = "€".as_bytes();
        let source = StreamSource::new(
            id,
            Box::new(chunks(&[&euro[..1], &euro[1..]])),
            lifecycle.watch(),
        );

        let parts: Vec<_> = source.chunks().collect().await;
        assert_eq!(
            parts,
            vec![
                Ok(Bytes::from_static(&euro[..1])),
                Ok(Bytes::from_static(&euro[1..])),
            ]
        );
    }

    #[tokio::test]
    async fn test_read_to_end_keeps_invalid_bytes() {
        let lifecycle = ready();
        let id = StreamRegistry::new().next_stream_id();
        let mut source = StreamSource::new(
            id,
            Box::new(chunks(&[b"a\xff", b"b"])),
            lifecycle.watch(),
        );
        assert_eq!(source.read_to_end().await.unwrap(), b"a\xffb");
    }

    #[tokio::test]
    async fn test_text_chunks_stop_at_error() {
        let lifecycle = ready();
        let id = StreamRegistry::new().next_stream_id();
        let script = ScriptedStream(VecDeque::from(vec![
            Ok(Some(Bytes::from_static(b"partial"))),
            Err(StreamIoError::Reset),
            Ok(Some(Bytes::from_static(b"never read"))),
        ]));
        let source = StreamSource::new(id, Box::new(script), lifecycle.watch());

        let items: Vec<_> = source.text_chunks().collect().await;
        assert_eq!(
            items,
            vec![Ok("partial".to_string()), Err(StreamIoError::Reset)]
        );
    }

    #[tokio::test]
    async fn test_reader_publishes_and_reports() {
        let lifecycle = ready();
        let registry = StreamRegistry::new();
        let sink = Arc::new(RecordingSink::new());
        let (tx, mut rx) = broadcast::channel(16);
        let reader = StreamReader::new(Events::new(sink.clone()), tx);

        let id = registry.next_stream_id();
        let source = StreamSource::new(id, Box::new(chunks(&[b"hel", b"lo"])), lifecycle.watch());
        assert_eq!(reader.run(source).await, StreamOutcome::Closed);

        assert_eq!(rx.recv().await.unwrap().kind, StreamMessageKind::Data("hel".into()));
        assert_eq!(rx.recv().await.unwrap().kind, StreamMessageKind::Data("lo".into()));
        assert_eq!(
            rx.recv().await.unwrap(),
            StreamMessage {
                id,
                kind: StreamMessageKind::Closed
            }
        );
        assert!(sink.contains("Received data on stream #1: hel"));
        assert!(sink.contains("Stream #1 closed"));
    }

    #[tokio::test]
    async fn test_failing_stream_is_isolated() {
        let lifecycle = ready();
        let registry = StreamRegistry::new();
        let sink = Arc::new(RecordingSink::new());
        let (tx, _rx) = broadcast::channel(16);
        let reader = StreamReader::new(Events::new(sink.clone()), tx);

        let broken = ScriptedStream(VecDeque::from(vec![Err(StreamIoError::Reset)]));
        let bad = reader.spawn(StreamSource::new(
            registry.next_stream_id(),
            Box::new(broken),
            lifecycle.watch(),
        ));
        let good = reader.spawn(StreamSource::new(
            registry.next_stream_id(),
            Box::new(chunks(&[b"fine"])),
            lifecycle.watch(),
        ));

        assert_eq!(
            bad.await.unwrap(),
            StreamOutcome::Errored(StreamIoError::Reset)
        );
        assert_eq!(good.await.unwrap(), StreamOutcome::Closed);
        assert!(sink.contains("Error while reading from stream #1: stream reset by peer"));
        assert!(sink.contains("Stream #2 closed"));
    }

    #[tokio::test]
    async fn test_pending_read_ends_with_session() {
        let lifecycle = ready();
        let id = StreamRegistry::new().next_stream_id();
        let mut source = StreamSource::new(
            id,
            Box::new(ScriptedStream(VecDeque::new())),
            lifecycle.watch(),
        );

        let read = tokio::spawn(async move { source.next_chunk().await });
        tokio::task::yield_now().await;
        lifecycle.transition(SessionState::Closed(CloseOutcome::Normal));

        assert_eq!(read.await.unwrap(), Err(StreamIoError::SessionClosed));
    }
}
