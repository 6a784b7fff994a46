//! # wtmux
//!
//! A session multiplexing client. One transport session is split into
//! independently scheduled channels:
//!
//! - **Datagrams**: unreliable messages through one serialized writer and one
//!   decoding read loop
//! - **Unidirectional streams**: peer-initiated streams are accepted in the
//!   background, each read by its own task
//! - **Bidirectional streams**: opened on demand, write then read
//! - **Tracking**: a frame-driven producer publishing detected coordinates as
//!   datagrams without ever waiting on the network
//!
//! Every stream gets an identifier from one per-session counter, whichever
//! side opened it. A failing stream never affects another stream, the
//! acceptor or the datagram loop. Closing the session ends every loop.
//!
//! ## Feature Flags
//!
//! - `memory` (default): In-process transport and echo peer
//! - `tracking` (default): Frame sampler, detector and frame sources
//!
//! ## Modules
//!
//! - [`core`]: Constants, errors, payloads and collaborator traits
//! - [`transport`]: Transport traits the session runs over
//! - [`session`]: The session handle and its loops
//! - [`tracking`]: Frame sampling (requires `tracking` feature)
//!
//! ## Example Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use wtmux::prelude::*;
//! use wtmux::transport::memory::{self, MemoryConfig, echo::{self, EchoMode}};
//!
//! let (connector, listener) = memory::endpoint(MemoryConfig::default());
//! tokio::spawn(echo::serve(listener, EchoMode::Echo));
//!
//! let session = SessionHandle::connect(
//!     &connector,
//!     "memory://echo",
//!     ClientConfig::default(),
//!     Arc::new(TracingSink),
//! )
//! .await?;
//!
//! assert_eq!(session.round_trip("abc").await?, "abc");
//! session.send_text(SendKind::Datagram, "hello").await?;
//! session.close();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

pub mod config;
pub mod session;
pub mod transport;

// Frame sampling (feature-gated)
#[cfg(feature = "tracking")]
#[cfg_attr(docsrs, doc(cfg(feature = "tracking")))]
pub mod tracking;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::{ClientConfig, ClientConfigBuilder};
    pub use crate::core::*;
    pub use crate::session::{
        DatagramReader, DatagramWriter, Direction, OutgoingStream, SendKind, SessionHandle,
        SessionState, SignalingError, StreamId, StreamMessage, StreamMessageKind, TracingSink,
    };
    pub use crate::transport::{CloseOutcome, Connector, TransportSession};

    #[cfg(feature = "tracking")]
    pub use crate::tracking::{
        ColorThresholdDetector, Frame, FrameDetector, FrameSampler, FrameSource, SamplerConfig,
    };
}

// Re-export commonly used items at crate root
pub use crate::config::ClientConfig;
pub use crate::core::{ConnectError, SessionError, StreamIoError};
pub use crate::session::{SessionHandle, SessionState};
