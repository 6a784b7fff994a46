//! Datagram payloads.
//!
//! Datagrams are UTF-8 text. A datagram whose text is a JSON object is treated
//! as structured and parsed eagerly, so a malformed object is rejected at the
//! read loop rather than by whoever consumes it.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::error::DecodeError;

/// A coordinate detected in one sampled frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackedCoordinate {
    /// Horizontal pixel position.
    pub x: i32,
    /// Vertical pixel position.
    pub y: i32,
}

impl TrackedCoordinate {
    /// Create a new coordinate.
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Encode for the datagram channel.
    pub fn encode(&self) -> Vec<u8> {
        // A struct of two integers always serializes.
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Decode from a datagram.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Peer feedback on a published coordinate: detected minus reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingError {
    /// Horizontal difference.
    pub error_x: i32,
    /// Vertical difference.
    pub error_y: i32,
}

impl TrackingError {
    /// Difference between a detected coordinate and a reference point.
    ///
    /// `None` if either difference does not fit in an `i32`.
    pub fn between(detected: TrackedCoordinate, reference: TrackedCoordinate) -> Option<Self> {
        Some(Self {
            error_x: detected.x.checked_sub(reference.x)?,
            error_y: detected.y.checked_sub(reference.y)?,
        })
    }

    /// Encode for the datagram channel.
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

/// A decoded inbound datagram.
#[derive(Debug, Clone, PartialEq)]
pub enum DatagramPayload {
    /// Plain text.
    Text(String),
    /// A parsed JSON object.
    Structured(serde_json::Value),
}

impl DatagramPayload {
    /// Decode raw datagram bytes.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let text = std::str::from_utf8(data).map_err(|e| DecodeError::InvalidUtf8 {
            valid_up_to: e.valid_up_to(),
        })?;

        if text.trim_start().starts_with('{') {
            let value: serde_json::Value = serde_json::from_str(text)?;
            return Ok(DatagramPayload::Structured(value));
        }

        Ok(DatagramPayload::Text(text.to_owned()))
    }

    /// Interpret a structured payload as `T`.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, DecodeError> {
        match self {
            DatagramPayload::Structured(value) => Ok(T::deserialize(value)?),
            DatagramPayload::Text(text) => Ok(serde_json::from_str(text)?),
        }
    }
}

impl std::fmt::Display for DatagramPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatagramPayload::Text(text) => f.write_str(text),
            DatagramPayload::Structured(value) => write!(f, "{value}"),
        }
    }
}
