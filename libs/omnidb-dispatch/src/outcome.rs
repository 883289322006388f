use crate::envelope::{Envelope, EnvelopeStatus};
use crate::error::TransportError;

/// Terminal state of one call.
#[derive(Debug)]
pub enum Outcome {
    /// `v_error` was false
    Success(Envelope),
    /// `v_error` was true with any id other than session loss
    AppError(Envelope),
    /// The server reported that the session object was destroyed
    SessionExpired(Envelope),
    /// No envelope could be obtained, aborts included
    Transport(TransportError),
}

impl Outcome {
    pub(crate) fn from_envelope(envelope: Envelope) -> Self {
        match envelope.status() {
            EnvelopeStatus::Success => Self::Success(envelope),
            EnvelopeStatus::Failed => Self::AppError(envelope),
            EnvelopeStatus::SessionDestroyed => Self::SessionExpired(envelope),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_aborted())
    }

    /// The envelope, for every outcome that has one.
    #[must_use]
    pub fn envelope(&self) -> Option<&Envelope> {
        match self {
            Self::Success(e) | Self::AppError(e) | Self::SessionExpired(e) => Some(e),
            Self::Transport(_) => None,
        }
    }

    /// Success payload, or the outcome itself as the error.
    ///
    /// # Errors
    /// Returns `self` unchanged for every outcome other than `Success`.
    pub fn into_result(self) -> Result<Envelope, Self> {
        match self {
            Self::Success(envelope) => Ok(envelope),
            other => Err(other),
        }
    }

    pub(crate) fn label(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::AppError(_) => "app_error",
            Self::SessionExpired(_) => "session_expired",
            Self::Transport(e) if e.is_aborted() => "aborted",
            Self::Transport(_) => "transport_error",
        }
    }
}
