use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConsultError {
    /// Token invalid, expired or scoped to another room. Spent tokens cannot be retried.
    #[error("credential rejected: {0}")]
    Credential(String),
    #[error("media permission denied: {0}")]
    MediaPermission(String),
    #[error("transport error: {0}")]
    Transport(String),
    /// Event referencing a participant that is no longer in the session.
    #[error("participant '{identity}' is not in the session")]
    ParticipantRace { identity: String },
    #[error("not connected")]
    NotConnected,
    #[error("no track '{0}' in the session")]
    UnknownTrack(String),
    #[error("connect abandoned: host is no longer interested")]
    Cancelled,
    #[error("http error: {0}")]
    Http(String),
    #[error("consultation API returned status {status}: {message}")]
    Api { status: u16, message: String },
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("device error: {0}")]
    Device(String),
}

impl ConsultError {
    /// Whether the user may re-join (with a freshly fetched token).
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConsultError::Transport(_) | ConsultError::Http(_))
    }

    /// Errors raised before a session exists.
    pub fn is_pre_connect(&self) -> bool {
        matches!(
            self,
            ConsultError::Credential(_) | ConsultError::MediaPermission(_)
        )
    }
}
