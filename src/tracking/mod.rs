//! Frame-driven tracking producer.
//!
//! A [`FrameSource`] supplies one RGBA frame per tick, a [`FrameDetector`]
//! turns it into an optional [`TrackedCoordinate`], and the
//! [`FrameSampler`] publishes every detected coordinate as a datagram without
//! waiting for the write to finish.

mod detector;
mod frames;
mod sampler;

use async_trait::async_trait;
use bytes::Bytes;

pub use detector::ColorThresholdDetector;
pub use frames::{BouncingBall, ChannelFrameSource};
pub use sampler::{
    FrameSampler, SamplerConfig, SamplerConfigBuilder, SamplerHandle, SamplerStats,
};

use crate::core::{BYTES_PER_PIXEL, TrackedCoordinate};

/// One RGBA frame, row-major, four bytes per pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Pixel data.
    pub pixels: Bytes,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Frame {
    /// Wrap a pixel buffer. Returns `None` if its length does not match the
    /// dimensions.
    pub fn new(pixels: impl Into<Bytes>, width: u32, height: u32) -> Option<Self> {
        let pixels = pixels.into();
        let expected = (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(BYTES_PER_PIXEL)?;
        if pixels.len() != expected {
            return None;
        }
        Some(Self {
            pixels,
            width,
            height,
        })
    }
}

/// Supplies frames at an externally driven cadence.
#[async_trait]
pub trait FrameSource: Send {
    /// Wait for the next frame; `None` once the source ended.
    async fn next_frame(&mut self) -> Option<Frame>;
}

/// Locates the tracked object in one frame.
pub trait FrameDetector: Send + Sync {
    /// Detect the object in an RGBA buffer of `width` × `height` pixels.
    fn detect(&self, pixels: &[u8], width: u32, height: u32) -> Option<TrackedCoordinate>;
}

impl<F> FrameDetector for F
where
    F: Fn(&[u8], u32, u32) -> Option<TrackedCoordinate> + Send + Sync,
{
    fn detect(&self, pixels: &[u8], width: u32, height: u32) -> Option<TrackedCoordinate> {
        self(pixels, width, height)
    }
}
