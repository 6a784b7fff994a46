//! Error types for the session multiplexing client.

use std::time::Duration;

use thiserror::Error;

/// The session never reached the ready state.
///
/// Terminal for the whole connection attempt; nothing was started.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// The peer refused the session.
    #[error("connection rejected: {0}")]
    Rejected(String),

    /// Nobody is listening at the endpoint.
    #[error("endpoint unreachable: {0}")]
    Unreachable(String),

    /// Readiness was not reported in time.
    #[error("connection timed out after {0:?}")]
    Timeout(Duration),
}

/// A capability the transport may lack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Unreliable datagrams.
    Datagrams,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Datagrams => f.write_str("datagrams"),
        }
    }
}

/// Errors reported by a transport below the session abstraction.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The transport session is closed.
    #[error("transport closed")]
    Closed,

    /// The transport session was lost abruptly.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// The transport does not offer the capability.
    #[error("{0} not supported by transport")]
    Unsupported(Capability),

    /// Payload exceeds what the transport can carry in one message.
    #[error("payload of {size} bytes exceeds limit of {limit}")]
    TooLarge {
        /// Offending payload size.
        size: usize,
        /// Largest size the transport accepts.
        limit: usize,
    },
}

/// A fault local to one stream.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StreamIoError {
    /// The peer reset the stream before finishing it.
    #[error("stream reset by peer")]
    Reset,

    /// The peer stopped reading from the stream.
    #[error("stream stopped by peer")]
    Stopped,

    /// Write attempted after the stream was finished.
    #[error("stream already finished")]
    Finished,

    /// The owning session closed while the stream was in use.
    #[error("session closed")]
    SessionClosed,

    /// The owning session was lost abruptly.
    #[error("connection lost")]
    ConnectionLost,
}

/// A payload that could not be decoded. Never fatal to a read loop.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Payload was not valid UTF-8.
    #[error("invalid UTF-8 at byte {valid_up_to}")]
    InvalidUtf8 {
        /// Length of the valid prefix.
        valid_up_to: usize,
    },

    /// Payload looked structured but did not parse.
    #[error("malformed JSON payload: {0}")]
    Json(String),
}

impl From<serde_json::Error> for DecodeError {
    fn from(e: serde_json::Error) -> Self {
        DecodeError::Json(e.to_string())
    }
}

/// Errors from operations on an established session.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The transport lacks the capability; terminal for that capability only.
    #[error("{0} not supported on this session")]
    UnsupportedCapability(Capability),

    /// The session reached a terminal state.
    #[error("session closed")]
    SessionClosed,

    /// A stream-local fault.
    #[error("stream error: {0}")]
    Stream(#[from] StreamIoError),

    /// Payload rejected by the transport.
    #[error("payload of {size} bytes exceeds limit of {limit}")]
    PayloadTooLarge {
        /// Offending payload size.
        size: usize,
        /// Largest size the transport accepts.
        limit: usize,
    },
}

impl From<TransportError> for SessionError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Closed | TransportError::ConnectionLost(_) => {
                SessionError::SessionClosed
            }
            TransportError::Unsupported(cap) => SessionError::UnsupportedCapability(cap),
            TransportError::TooLarge { size, limit } => {
                SessionError::PayloadTooLarge { size, limit }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_maps_to_session_error() {
        assert_eq!(
            SessionError::from(TransportError::Closed),
            SessionError::SessionClosed
        );
        assert_eq!(
            SessionError::from(TransportError::ConnectionLost("reset".into())),
            SessionError::SessionClosed
        );
        assert_eq!(
            SessionError::from(TransportError::Unsupported(Capability::Datagrams)),
            SessionError::UnsupportedCapability(Capability::Datagrams)
        );
    }

    #[test]
    fn test_error_display() {
        let err = SessionError::UnsupportedCapability(Capability::Datagrams);
        assert_eq!(err.to_string(), "datagrams not supported on this session");

        let err = SessionError::from(StreamIoError::Reset);
        assert_eq!(err.to_string(), "stream error: stream reset by peer");
    }
}
