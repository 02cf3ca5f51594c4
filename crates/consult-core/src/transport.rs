//! Seam to the real-time media/signaling service.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::ConsultError;
use crate::media::MediaSource;

/// Room-level events delivered by the transport, in arrival order.
///
/// Participants already in the room at connect time are announced with
/// `ParticipantJoined` like late joiners.
#[derive(Clone)]
pub enum TransportEvent {
    ParticipantJoined { identity: String },
    ParticipantLeft { identity: String },
    TrackSubscribed { participant: String, source: Arc<dyn MediaSource> },
    TrackUnsubscribed { participant: String, track_id: String },
    /// `reason` is `Some` when the room dropped us because of an error.
    Disconnected { reason: Option<String> },
}

impl std::fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportEvent::ParticipantJoined { identity } => {
                write!(f, "ParticipantJoined({identity})")
            }
            TransportEvent::ParticipantLeft { identity } => write!(f, "ParticipantLeft({identity})"),
            TransportEvent::TrackSubscribed { participant, source } => {
                write!(f, "TrackSubscribed({participant}, {})", source.id())
            }
            TransportEvent::TrackUnsubscribed { participant, track_id } => {
                write!(f, "TrackUnsubscribed({participant}, {track_id})")
            }
            TransportEvent::Disconnected { reason } => write!(f, "Disconnected({reason:?})"),
        }
    }
}

/// An open room connection plus its event feed.
pub struct TransportLink {
    pub connection: Arc<dyn TransportConnection>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Join `room_name` with a single-use `token`, publishing `local` tracks.
    ///
    /// Rejected credentials must map to [`ConsultError::Credential`] and
    /// unreachable networks to [`ConsultError::Transport`].
    async fn connect(
        &self,
        token: &str,
        room_name: &str,
        local: &[Arc<dyn MediaSource>],
    ) -> Result<TransportLink, ConsultError>;
}

#[async_trait]
pub trait TransportConnection: Send + Sync {
    fn local_identity(&self) -> &str;

    /// Tell the room we are leaving on purpose. May be slow or never answer.
    async fn leave(&self) -> Result<(), ConsultError>;

    /// Release the connection handle. Called exactly once per session.
    fn close(&self);
}
