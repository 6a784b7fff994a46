//! wtmux loopback demo
//!
//! Runs an echo peer and a client in one process over the in-memory
//! transport: signaling, one send per channel, a round trip, then the
//! bouncing-ball sampler with the peer's tracking feedback.
//!
//! Environment variables:
//! - WTMUX_LOG: tracing filter (default "info")
//! - WTMUX_FRAMES: frames to sample (default 90)
//! - WTMUX_FPS: sampler frame rate (default 30)
//! - WTMUX_LOSS: simulated datagram loss in [0, 1] (default 0)

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wtmux::core::{DatagramPayload, Negotiator, TrackedCoordinate, TrackingError};
use wtmux::session::{SendKind, SessionHandle, StreamMessageKind, TracingSink};
use wtmux::tracking::{BouncingBall, ColorThresholdDetector, FrameSampler, SamplerConfig};
use wtmux::transport::memory::echo::{EchoMode, serve};
use wtmux::transport::memory::{MemoryConfig, endpoint};
use wtmux::ClientConfig;

#[derive(Debug, Error)]
#[error("peer answered with an empty description")]
struct EmptyAnswer;

/// Offers a fixed description and keeps whatever comes back.
struct LoopbackNegotiator {
    answer: Option<String>,
}

#[async_trait]
impl Negotiator for LoopbackNegotiator {
    type Error = EmptyAnswer;

    async fn create_offer(&mut self) -> Result<String, EmptyAnswer> {
        Ok("v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=wtmux-loopback\r\nt=0 0\r\n".to_string())
    }

    async fn accept_answer(&mut self, answer: String) -> Result<(), EmptyAnswer> {
        if answer.is_empty() {
            return Err(EmptyAnswer);
        }
        self.answer = Some(answer);
        Ok(())
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(value) => value
            .parse()
            .ok()
            .with_context(|| format!("{name} has an invalid value: {value}")),
        Err(_) => Ok(default),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("WTMUX_LOG")
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let frames: u64 = env_or("WTMUX_FRAMES", 90)?;
    let fps: u32 = env_or("WTMUX_FPS", 30)?;
    let loss: f64 = env_or("WTMUX_LOSS", 0.0)?;

    let ball = BouncingBall::new(fps).with_limit(frames);
    let center = TrackedCoordinate::new(200, 150);

    let (connector, listener) = endpoint(MemoryConfig::default().datagram_loss(loss));
    tokio::spawn(serve(listener, EchoMode::Tracking { center }));

    let config = ClientConfig::builder()
        .connect_timeout(Duration::from_secs(2))
        .build();
    let session =
        SessionHandle::connect(&connector, "memory://loopback", config, Arc::new(TracingSink))
            .await
            .context("connect failed")?;

    let mut negotiator = LoopbackNegotiator { answer: None };
    session
        .negotiate(&mut negotiator)
        .await
        .context("signaling failed")?;
    info!(
        "negotiated, answer has {} bytes",
        negotiator.answer.as_ref().map_or(0, String::len)
    );

    let mut messages = session.stream_messages();
    tokio::spawn(async move {
        while let Ok(message) = messages.recv().await {
            if let StreamMessageKind::Data(text) = message.kind {
                info!("stream {} says {:?}", message.id, text);
            }
        }
    });

    for kind in [SendKind::Unidirectional, SendKind::Bidirectional] {
        session.send_text(kind, "Hello, world!").await?;
    }
    let echoed = session.round_trip("abc").await?;
    info!("round trip returned {:?}", echoed);

    let mut feedback = session.datagram_reader()?;
    let feedback_task = tokio::spawn(async move {
        let mut received = 0u64;
        while let Some(payload) = feedback.recv().await {
            match payload.parse::<TrackingError>() {
                Ok(error) => {
                    received += 1;
                    info!("ball centre difference: ({}, {})", error.error_x, error.error_y);
                }
                Err(e) => {
                    if let DatagramPayload::Text(text) = payload {
                        info!("datagram: {}", text);
                    } else {
                        warn!("unexpected datagram: {}", e);
                    }
                }
            }
        }
        received
    });

    let sampler = FrameSampler::new(
        ball,
        ColorThresholdDetector::default(),
        Some(session.datagram_writer()?),
    )
    .with_config(SamplerConfig::builder().max_in_flight(4).build())
    .spawn();

    while !sampler.is_finished() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let stats = sampler.stop().await;
    info!(
        "sampler: {} ticks, {} detections, {} published, {} dropped, {} failed",
        stats.ticks, stats.detections, stats.published, stats.dropped, stats.failed
    );

    // Let the last replies arrive.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let closed = session.on_closed();
    session.close();
    info!("session {:?}", closed.await);

    let received = feedback_task.await.context("feedback task panicked")?;
    info!("{} feedback datagrams received", received);
    Ok(())
}
