//! Collaborator traits.
//!
//! The session core reports to, and pulls opaque payloads from, these
//! interfaces. Presentation of events and the content of signaling payloads
//! are left entirely to the implementor.

use async_trait::async_trait;

/// Severity attached to every reported event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    /// Normal lifecycle progress.
    Info,
    /// A fault, recoverable or not.
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => f.write_str("info"),
            Severity::Error => f.write_str("error"),
        }
    }
}

/// Receives human-readable session events.
///
/// Invoked on every lifecycle transition, every stream open/close/error and
/// every recoverable decode fault. Calls happen from whichever task observed
/// the event, so implementations must be cheap and must not block.
pub trait EventSink: Send + Sync {
    /// Record one event.
    fn record(&self, message: &str, severity: Severity);
}

/// Supplies an offer and consumes the matching answer.
///
/// Both payloads are opaque to the session: it writes the offer on a fresh
/// bidirectional stream, finishes it, and hands back whatever text the peer
/// replied with.
#[async_trait]
pub trait Negotiator: Send {
    /// Error raised by the negotiator itself.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Produce the outbound offer.
    async fn create_offer(&mut self) -> Result<String, Self::Error>;

    /// Consume the peer's answer.
    async fn accept_answer(&mut self, answer: String) -> Result<(), Self::Error>;
}
