//! Offer/answer exchange over one bidirectional stream.

use thiserror::Error;
use tracing::debug;

use super::events::SessionEvent;
use super::handle::{SessionHandle, session_error};
use crate::core::{Negotiator, SessionError};

/// Errors from [`SessionHandle::negotiate`].
#[derive(Debug, Error)]
pub enum SignalingError<E>
where
    E: std::error::Error + 'static,
{
    /// The negotiator failed to produce an offer or rejected the answer.
    #[error("negotiator failed: {0}")]
    Negotiator(#[source] E),

    /// The exchange failed on the session.
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl SessionHandle {
    /// Send the negotiator's offer on a fresh bidirectional stream and hand
    /// the peer's reply back to it as the answer.
    ///
    /// Both payloads are opaque text.
    pub async fn negotiate<N>(&self, negotiator: &mut N) -> Result<(), SignalingError<N::Error>>
    where
        N: Negotiator + ?Sized,
    {
        let offer = negotiator
            .create_offer()
            .await
            .map_err(SignalingError::Negotiator)?;

        let (mut writer, mut reader) = self.open_bi().await?;
        debug!("sending offer of {} bytes on stream {}", offer.len(), writer.id());
        writer.write_text(&offer).await?;
        writer.finish().await?;
        self.events().emit(SessionEvent::OfferSent);

        let answer = reader.read_to_string().await.map_err(session_error)?;
        self.events().emit(SessionEvent::AnswerReceived);

        negotiator
            .accept_answer(answer)
            .await
            .map_err(SignalingError::Negotiator)
    }
}
