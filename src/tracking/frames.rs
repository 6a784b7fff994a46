//! Frame sources.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};

use super::{Frame, FrameSource};
use crate::core::{
    BALL_DEFAULT_FPS, BALL_FRAME_HEIGHT, BALL_FRAME_WIDTH, BALL_RADIUS, BYTES_PER_PIXEL,
    TrackedCoordinate,
};

const WHITE: [u8; 4] = [255, 255, 255, 255];
const BLUE: [u8; 4] = [0, 0, 255, 255];

/// Synthetic source: a blue ball bouncing on a white background.
///
/// The ball starts at (100, 100), moves by (5, 4) per frame and reverses
/// along an axis once its edge passes the frame border.
#[derive(Debug)]
pub struct BouncingBall {
    position: TrackedCoordinate,
    velocity: (i32, i32),
    width: u32,
    height: u32,
    radius: i32,
    period: Duration,
    interval: Option<Interval>,
    remaining: Option<u64>,
}

impl BouncingBall {
    /// A 400×300 ball animation ticking at `fps` frames per second.
    pub fn new(fps: u32) -> Self {
        Self {
            position: TrackedCoordinate::new(100, 100),
            velocity: (5, 4),
            width: BALL_FRAME_WIDTH,
            height: BALL_FRAME_HEIGHT,
            radius: BALL_RADIUS,
            period: Duration::from_secs(1) / fps.max(1),
            interval: None,
            remaining: None,
        }
    }

    /// End the source after `frames` frames.
    pub fn with_limit(mut self, frames: u64) -> Self {
        self.remaining = Some(frames);
        self
    }

    /// Centre of the ball in the next rendered frame.
    pub fn position(&self) -> TrackedCoordinate {
        self.position
    }

    /// Render the current position.
    pub fn render(&self) -> Frame {
        let (w, h) = (self.width as usize, self.height as usize);
        let mut pixels = Vec::with_capacity(w * h * BYTES_PER_PIXEL);
        let r2 = self.radius * self.radius;

        for y in 0..self.height as i32 {
            let dy = y - self.position.y;
            for x in 0..self.width as i32 {
                let dx = x - self.position.x;
                let px = if dx * dx + dy * dy <= r2 { BLUE } else { WHITE };
                pixels.extend_from_slice(&px);
            }
        }

        Frame {
            pixels: pixels.into(),
            width: self.width,
            height: self.height,
        }
    }

    /// Advance one frame.
    pub fn step(&mut self) {
        self.position.x += self.velocity.0;
        self.position.y += self.velocity.1;

        let (x, y, r) = (self.position.x, self.position.y, self.radius);
        if x - r < 0 || x + r > self.width as i32 {
            self.velocity.0 = -self.velocity.0;
        }
        if y - r < 0 || y + r > self.height as i32 {
            self.velocity.1 = -self.velocity.1;
        }
    }
}

impl Default for BouncingBall {
    fn default() -> Self {
        Self::new(BALL_DEFAULT_FPS)
    }
}

#[async_trait]
impl FrameSource for BouncingBall {
    async fn next_frame(&mut self) -> Option<Frame> {
        if let Some(remaining) = self.remaining.as_mut() {
            if *remaining == 0 {
                return None;
            }
            *remaining -= 1;
        }

        let period = self.period;
        let interval = self.interval.get_or_insert_with(|| {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });
        interval.tick().await;

        let frame = self.render();
        self.step();
        Some(frame)
    }
}

/// Frames pushed by an external clock.
#[derive(Debug)]
pub struct ChannelFrameSource {
    rx: mpsc::Receiver<Frame>,
}

impl ChannelFrameSource {
    /// A source and the sender that feeds it. The source ends once every
    /// sender is dropped.
    pub fn new(capacity: usize) -> (mpsc::Sender<Frame>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self { rx })
    }
}

#[async_trait]
impl FrameSource for ChannelFrameSource {
    async fn next_frame(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::{ColorThresholdDetector, FrameDetector};

    #[test]
    fn test_detector_finds_ball() {
        let ball = BouncingBall::default();
        let frame = ball.render();
        assert_eq!(frame.pixels.len(), 400 * 300 * 4);

        let detected = ColorThresholdDetector::default().detect(&frame.pixels, frame.width, frame.height);
        assert_eq!(detected, Some(TrackedCoordinate::new(100, 100)));
    }

    #[test]
    fn test_ball_bounces_off_edges() {
        let mut ball = BouncingBall::default();
        for _ in 0..200 {
            ball.step();
            let p = ball.position();
            // One step of overshoot is allowed before the velocity flips.
            assert!(p.x >= -5 && p.x <= 405, "x out of range: {}", p.x);
            assert!(p.y >= -4 && p.y <= 304, "y out of range: {}", p.y);
        }
    }

    #[test]
    fn test_step_moves_by_velocity() {
        let mut ball = BouncingBall::default();
        ball.step();
        assert_eq!(ball.position(), TrackedCoordinate::new(105, 104));
    }

    #[tokio::test(start_paused = true)]
    async fn test_limited_source_ends() {
        let mut ball = BouncingBall::new(30).with_limit(2);
        assert!(ball.next_frame().await.is_some());
        assert!(ball.next_frame().await.is_some());
        assert!(ball.next_frame().await.is_none());
    }

    #[tokio::test]
    async fn test_channel_source() {
        let (tx, mut source) = ChannelFrameSource::new(2);
        let frame = Frame::new(vec![0u8; 4], 1, 1).unwrap();
        tx.send(frame.clone()).await.unwrap();
        drop(tx);

        assert_eq!(source.next_frame().await, Some(frame));
        assert_eq!(source.next_frame().await, None);
    }
}
