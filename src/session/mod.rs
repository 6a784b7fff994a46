//! Session multiplexing core.
//!
//! One [`SessionHandle`] owns one transport session and splits it into:
//!
//! - a datagram channel ([`DatagramWriter`] / [`DatagramReader`]),
//! - peer-initiated unidirectional streams, accepted in the background,
//! - client-initiated streams ([`SessionHandle::create_outgoing_stream`]).
//!
//! Every loop started for the session observes the same lifecycle and ends
//! once it is terminal.

mod acceptor;
mod datagram;
mod events;
mod handle;
mod lifecycle;
mod reader;
mod registry;
mod signaling;

pub use acceptor::AcceptorOutcome;
pub use datagram::{DatagramLoopStats, DatagramReader, DatagramWriter};
pub use events::{RecordingSink, SessionEvent, TracingSink};
pub use handle::{OutgoingStream, SendKind, SessionHandle};
pub use lifecycle::{LifecycleWatch, SessionState};
pub use reader::{
    StreamMessage, StreamMessageKind, StreamOutcome, StreamSource, StreamWriter, Utf8Decoder,
};
pub use registry::{Direction, StreamId, StreamRegistry};
pub use signaling::SignalingError;

#[cfg(all(test, feature = "tracking"))]
pub(crate) use lifecycle::Lifecycle;
