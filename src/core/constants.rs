//! Constants shared between the session layer, the transports and the
//! tracking producer.
//!
//! Values marked as wire values are part of the contract with the peer and
//! MUST NOT change without bumping [`TRACKING_WIRE_VERSION`].

use std::time::Duration;

// =============================================================================
// SESSION
// =============================================================================

/// First identifier handed out by a fresh stream registry.
pub const FIRST_STREAM_ID: u64 = 1;

/// Default upper bound on how long `connect` waits for readiness.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default capacity of the decoded-datagram broadcast channel.
///
/// Subscribers that fall further behind than this lose the oldest datagrams,
/// which matches the delivery guarantees of the datagram channel itself.
pub const DEFAULT_DATAGRAM_BUFFER: usize = 64;

/// Default capacity of the stream-message broadcast channel.
pub const DEFAULT_STREAM_BUFFER: usize = 256;

// =============================================================================
// TRACKING (wire values)
// =============================================================================

/// Version of the tracking datagram encoding.
///
/// Version 1 is a JSON object `{"x": <int>, "y": <int>}`.
pub const TRACKING_WIRE_VERSION: u8 = 1;

/// Default cap on tracking publishes that may be in flight at once.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 8;

// =============================================================================
// SYNTHETIC FRAMES
// =============================================================================

/// Width of the synthetic bouncing-ball frame in pixels.
pub const BALL_FRAME_WIDTH: u32 = 400;

/// Height of the synthetic bouncing-ball frame in pixels.
pub const BALL_FRAME_HEIGHT: u32 = 300;

/// Radius of the synthetic ball in pixels.
pub const BALL_RADIUS: i32 = 20;

/// Default frame rate of the synthetic source.
pub const BALL_DEFAULT_FPS: u32 = 30;

/// Bytes per pixel of every frame buffer (RGBA).
pub const BYTES_PER_PIXEL: usize = 4;

// =============================================================================
// IN-MEMORY TRANSPORT
// =============================================================================

/// Default depth of each in-memory datagram queue.
pub const DEFAULT_DATAGRAM_QUEUE: usize = 256;

/// Default maximum size of a single datagram on the in-memory transport.
pub const DEFAULT_MAX_DATAGRAM_SIZE: usize = 1200;
