//! The frame sampler.
//!
//! One tick per frame: detect, then hand the coordinate to a detached publish
//! task and move straight on to the next frame. Publishes in flight are
//! bounded by a semaphore; at the bound new coordinates are dropped rather
//! than queued.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tokio::sync::{Semaphore, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::{FrameDetector, FrameSource};
use crate::core::DEFAULT_MAX_IN_FLIGHT;
use crate::session::DatagramWriter;

/// Sampler configuration.
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Publishes allowed in flight at once.
    pub max_in_flight: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

impl SamplerConfig {
    /// Start building a configuration from the defaults.
    pub fn builder() -> SamplerConfigBuilder {
        SamplerConfigBuilder::new()
    }
}

/// Builder for [`SamplerConfig`].
#[derive(Debug, Default)]
pub struct SamplerConfigBuilder {
    config: SamplerConfig,
}

impl SamplerConfigBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the in-flight bound. Zero is raised to one.
    pub fn max_in_flight(mut self, max: usize) -> Self {
        self.config.max_in_flight = max.max(1);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> SamplerConfig {
        self.config
    }
}

/// Snapshot of sampler counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SamplerStats {
    /// Frames processed.
    pub ticks: u64,
    /// Frames with a detection.
    pub detections: u64,
    /// Publishes that completed.
    pub published: u64,
    /// Publishes that failed.
    pub failed: u64,
    /// Detections dropped at the in-flight bound.
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    ticks: AtomicU64,
    detections: AtomicU64,
    published: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> SamplerStats {
        SamplerStats {
            ticks: self.ticks.load(Ordering::Relaxed),
            detections: self.detections.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Periodic producer publishing detected coordinates as datagrams.
pub struct FrameSampler<S, D> {
    source: S,
    detector: D,
    writer: Option<DatagramWriter>,
    config: SamplerConfig,
}

impl<S, D> FrameSampler<S, D>
where
    S: FrameSource + 'static,
    D: FrameDetector + 'static,
{
    /// A sampler over `source`. Without a writer coordinates are detected
    /// and counted but not published.
    pub fn new(source: S, detector: D, writer: Option<DatagramWriter>) -> Self {
        Self {
            source,
            detector,
            writer,
            config: SamplerConfig::default(),
        }
    }

    /// Replace the configuration.
    pub fn with_config(mut self, config: SamplerConfig) -> Self {
        self.config = config;
        self
    }

    /// Start sampling on a background task.
    pub fn spawn(self) -> SamplerHandle {
        let counters = Arc::new(Counters::default());
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(self.run(stop_rx, Arc::clone(&counters)));
        SamplerHandle {
            stop: Some(stop_tx),
            task,
            counters,
        }
    }

    async fn run(mut self, mut stop: oneshot::Receiver<()>, counters: Arc<Counters>) {
        let permits = Arc::new(Semaphore::new(self.config.max_in_flight.max(1)));

        loop {
            let frame = tokio::select! {
                biased;

                _ = &mut stop => {
                    debug!("sampler stopped");
                    break;
                }
                frame = self.source.next_frame() => frame,
            };
            let Some(frame) = frame else {
                debug!("frame source ended");
                break;
            };
            Counters::bump(&counters.ticks);

            let Some(coord) = self.detector.detect(&frame.pixels, frame.width, frame.height) else {
                continue;
            };
            Counters::bump(&counters.detections);

            let Some(writer) = &self.writer else {
                continue;
            };
            let permit = match Arc::clone(&permits).try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    trace!("dropping coordinate ({}, {}): publishes in flight", coord.x, coord.y);
                    Counters::bump(&counters.dropped);
                    continue;
                }
            };

            let writer = writer.clone();
            let counters = Arc::clone(&counters);
            let payload = Bytes::from(coord.encode());
            tokio::spawn(async move {
                let _permit = permit;
                match writer.write(payload).await {
                    Ok(()) => Counters::bump(&counters.published),
                    Err(e) => {
                        trace!("coordinate publish failed: {}", e);
                        Counters::bump(&counters.failed);
                    }
                }
            });
        }
    }
}

/// Controls a running sampler. Dropping it stops the sampler.
#[derive(Debug)]
pub struct SamplerHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
    counters: Arc<Counters>,
}

impl SamplerHandle {
    /// Current counters.
    pub fn stats(&self) -> SamplerStats {
        self.counters.snapshot()
    }

    /// Whether the sampler task ended, by `stop` or because the source ended.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop after the current tick and return the final counters.
    ///
    /// Publishes already in flight are not awaited.
    pub async fn stop(mut self) -> SamplerStats {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(e) = (&mut self.task).await {
            warn!("sampler task ended abnormally: {}", e);
        }
        self.counters.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{TrackedCoordinate, TransportError};
    use crate::session::Lifecycle;
    use crate::session::SessionState;
    use crate::tracking::{ChannelFrameSource, Frame};
    use crate::transport::DatagramSink;
    use async_trait::async_trait;
    use std::time::Duration;

    struct StuckSink;

    #[async_trait]
    impl DatagramSink for StuckSink {
        async fn send(&mut self, _data: Bytes) -> Result<(), TransportError> {
            std::future::pending().await
        }
    }

    struct Collect(Arc<std::sync::Mutex<Vec<Bytes>>>);

    #[async_trait]
    impl DatagramSink for Collect {
        async fn send(&mut self, data: Bytes) -> Result<(), TransportError> {
            self.0.lock().unwrap().push(data);
            Ok(())
        }
    }

    fn always(_: &[u8], _: u32, _: u32) -> Option<TrackedCoordinate> {
        Some(TrackedCoordinate::new(7, 9))
    }

    fn blank() -> Frame {
        Frame::new(vec![0u8; 4], 1, 1).unwrap()
    }

    async fn wait_for_ticks(handle: &SamplerHandle, ticks: u64) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while handle.stats().ticks < ticks {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
    }

    fn ready() -> Lifecycle {
        let lifecycle = Lifecycle::new();
        lifecycle.transition(SessionState::Ready);
        lifecycle
    }

    #[tokio::test]
    async fn test_stuck_publish_does_not_block_ticks() {
        let lifecycle = ready();
        let writer = DatagramWriter::new(Box::new(StuckSink), lifecycle.watch());
        let (frames, source) = ChannelFrameSource::new(8);

        let handle = FrameSampler::new(source, always, Some(writer)).spawn();
        for _ in 0..3 {
            frames.send(blank()).await.unwrap();
        }
        wait_for_ticks(&handle, 3).await;

        let stats = handle.stop().await;
        assert_eq!(stats.ticks, 3);
        assert_eq!(stats.detections, 3);
        assert_eq!(stats.published, 0);
        assert_eq!(stats.dropped, 0);
    }

    #[tokio::test]
    async fn test_in_flight_bound_drops() {
        let lifecycle = ready();
        let writer = DatagramWriter::new(Box::new(StuckSink), lifecycle.watch());
        let (frames, source) = ChannelFrameSource::new(8);
        let config = SamplerConfig::builder().max_in_flight(1).build();

        let handle = FrameSampler::new(source, always, Some(writer))
            .with_config(config)
            .spawn();
        for _ in 0..3 {
            frames.send(blank()).await.unwrap();
        }
        wait_for_ticks(&handle, 3).await;

        let stats = handle.stop().await;
        assert_eq!(stats.detections, 3);
        assert_eq!(stats.dropped, 2);
    }

    #[tokio::test]
    async fn test_publishes_encoded_coordinates() {
        let lifecycle = ready();
        let sent = Arc::new(std::sync::Mutex::new(Vec::new()));
        let writer = DatagramWriter::new(Box::new(Collect(Arc::clone(&sent))), lifecycle.watch());
        let (frames, source) = ChannelFrameSource::new(8);

        let handle = FrameSampler::new(source, always, Some(writer)).spawn();
        frames.send(blank()).await.unwrap();
        drop(frames);

        tokio::time::timeout(Duration::from_secs(2), async {
            while handle.stats().published < 1 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(sent.lock().unwrap().as_slice(), [Bytes::from_static(br#"{"x":7,"y":9}"#)]);
        // The source ended, so the sampler finished by itself.
        let stats = handle.stop().await;
        assert_eq!(stats.ticks, 1);
    }

    #[tokio::test]
    async fn test_without_writer_only_counts() {
        let (frames, source) = ChannelFrameSource::new(8);
        let handle = FrameSampler::new(source, always, None).spawn();
        frames.send(blank()).await.unwrap();
        wait_for_ticks(&handle, 1).await;

        let stats = handle.stop().await;
        assert_eq!(stats.detections, 1);
        assert_eq!(stats.published + stats.dropped + stats.failed, 0);
    }

    #[tokio::test]
    async fn test_closed_session_counts_failures() {
        let lifecycle = ready();
        let writer = DatagramWriter::new(Box::new(StuckSink), lifecycle.watch());
        lifecycle.transition(SessionState::Closed(crate::transport::CloseOutcome::Normal));
        let (frames, source) = ChannelFrameSource::new(8);

        let handle = FrameSampler::new(source, always, Some(writer)).spawn();
        frames.send(blank()).await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while handle.stats().failed < 1 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
        handle.stop().await;
    }
}
