//! Ordered in-process byte pipes backing memory streams.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use super::Link;
use crate::core::StreamIoError;
use crate::transport::{RecvStream, SendStream};

#[derive(Debug)]
enum Segment {
    Data(Bytes),
    Fin,
}

/// Create a connected writer/reader pair bound to `link`.
pub(crate) fn pipe(link: &Link) -> (MemorySendStream, MemoryRecvStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        MemorySendStream {
            tx: Some(tx),
            link: link.clone(),
        },
        MemoryRecvStream {
            rx,
            done: false,
            link: link.clone(),
        },
    )
}

/// Writing end of an in-memory stream.
///
/// Dropping it without calling [`finish`](Self::finish) resets the stream:
/// the reader sees [`StreamIoError::Reset`].
#[derive(Debug)]
pub struct MemorySendStream {
    tx: Option<mpsc::UnboundedSender<Segment>>,
    link: Link,
}

impl MemorySendStream {
    /// Append bytes to the stream.
    pub async fn write(&mut self, data: &[u8]) -> Result<(), StreamIoError> {
        self.link.check_open()?;
        let tx = self.tx.as_ref().ok_or(StreamIoError::Finished)?;
        if data.is_empty() {
            return Ok(());
        }
        tx.send(Segment::Data(Bytes::copy_from_slice(data)))
            .map_err(|_| StreamIoError::Stopped)
    }

    /// End the stream after the bytes written so far.
    pub async fn finish(&mut self) -> Result<(), StreamIoError> {
        self.link.check_open()?;
        let tx = self.tx.take().ok_or(StreamIoError::Finished)?;
        tx.send(Segment::Fin).map_err(|_| StreamIoError::Stopped)
    }

    /// Abandon the stream without finishing it.
    pub fn reset(mut self) {
        self.tx = None;
    }
}

/// Reading end of an in-memory stream.
#[derive(Debug)]
pub struct MemoryRecvStream {
    rx: mpsc::UnboundedReceiver<Segment>,
    done: bool,
    link: Link,
}

impl MemoryRecvStream {
    /// Next chunk in write order; `Ok(None)` once the writer finished.
    pub async fn read_chunk(&mut self) -> Result<Option<Bytes>, StreamIoError> {
        if self.done {
            return Ok(None);
        }

        tokio::select! {
            biased;

            segment = self.rx.recv() => match segment {
                Some(Segment::Data(bytes)) => Ok(Some(bytes)),
                Some(Segment::Fin) => {
                    self.done = true;
                    Ok(None)
                }
                None => Err(StreamIoError::Reset),
            },
            outcome = self.link.closed() => Err(Link::stream_error(outcome)),
        }
    }

    /// Read until EOF.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>, StreamIoError> {
        let mut out = Vec::new();
        while let Some(chunk) = self.read_chunk().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }
}

#[async_trait]
impl SendStream for MemorySendStream {
    async fn write(&mut self, data: &[u8]) -> Result<(), StreamIoError> {
        MemorySendStream::write(self, data).await
    }

    async fn finish(&mut self) -> Result<(), StreamIoError> {
        MemorySendStream::finish(self).await
    }
}

#[async_trait]
impl RecvStream for MemoryRecvStream {
    async fn read_chunk(&mut self) -> Result<Option<Bytes>, StreamIoError> {
        MemoryRecvStream::read_chunk(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::CloseOutcome;

    #[tokio::test]
    async fn test_pipe_preserves_order() {
        let link = Link::new();
        let (mut tx, mut rx) = pipe(&link);

        tx.write(b"one ").await.unwrap();
        tx.write(b"two").await.unwrap();
        tx.finish().await.unwrap();

        assert_eq!(rx.read_chunk().await.unwrap().unwrap(), &b"one "[..]);
        assert_eq!(rx.read_chunk().await.unwrap().unwrap(), &b"two"[..]);
        assert_eq!(rx.read_chunk().await.unwrap(), None);
        // EOF is sticky
        assert_eq!(rx.read_chunk().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_pipe_write_after_finish() {
        let link = Link::new();
        let (mut tx, _rx) = pipe(&link);
        tx.finish().await.unwrap();
        assert_eq!(tx.write(b"late").await, Err(StreamIoError::Finished));
    }

    #[tokio::test]
    async fn test_pipe_reset_on_drop() {
        let link = Link::new();
        let (mut tx, mut rx) = pipe(&link);
        tx.write(b"partial").await.unwrap();
        tx.reset();

        assert_eq!(rx.read_chunk().await.unwrap().unwrap(), &b"partial"[..]);
        assert_eq!(rx.read_chunk().await, Err(StreamIoError::Reset));
    }

    #[tokio::test]
    async fn test_pipe_reader_wakes_on_link_close() {
        let link = Link::new();
        let (_tx, mut rx) = pipe(&link);

        let reader = tokio::spawn(async move { rx.read_chunk().await });
        link.close(CloseOutcome::Abrupt);

        let result = reader.await.unwrap();
        assert_eq!(result, Err(StreamIoError::ConnectionLost));
    }
}
