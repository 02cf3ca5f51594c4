use std::sync::Arc;

use chrono::{DateTime, Utc};
use consult_video::RendererRegistry;
use uuid::Uuid;

use crate::cleanup::TeardownReport;
use crate::errors::ConsultError;
use crate::events::{ConnectionState, SessionSnapshot, TrackOrigin};
use crate::media::{MediaSource, Track};
use crate::participants::{Participant, ParticipantRoster};
use crate::transport::{TransportConnection, TransportEvent};

/// What applying one transport event did to the session.
#[derive(Debug)]
pub enum Applied {
    Unchanged,
    Changed,
    /// The room disconnected us and the session has been torn down.
    Ended(TeardownReport),
}

/// One call: the local participant, the remote roster and the room connection.
///
/// All mutation goes through `&mut self`; the controller keeps the session
/// behind a single lock so events, controls and teardown never interleave.
pub struct Session {
    pub(crate) id: Uuid,
    pub(crate) room_name: String,
    pub(crate) state: ConnectionState,
    pub(crate) connected_at: Option<DateTime<Utc>>,
    pub(crate) local: Participant,
    pub(crate) remote: ParticipantRoster,
    pub(crate) connection: Option<Arc<dyn TransportConnection>>,
    pub(crate) renderers: RendererRegistry,
    pub(crate) torn_down: bool,
    /// Consultation this call was joined for; target of the end notice.
    pub(crate) consultation_id: Option<String>,
}

impl Session {
    /// A session that holds freshly captured local tracks but no room connection yet.
    pub fn connecting(room_name: &str, local: &[Arc<dyn MediaSource>], renderers: RendererRegistry) -> Self {
        let mut participant = Participant::new("");
        for source in local {
            participant.insert_track(Track::new(source.clone(), TrackOrigin::Local, renderers.clone()));
        }

        Self {
            id: Uuid::new_v4(),
            room_name: room_name.to_string(),
            state: ConnectionState::Connecting,
            connected_at: None,
            local: participant,
            remote: ParticipantRoster::new(""),
            connection: None,
            renderers,
            torn_down: false,
            consultation_id: None,
        }
    }

    /// Take ownership of the room connection and enter `Connected`.
    ///
    /// A session that was torn down in the meantime closes the handle instead.
    pub fn mark_connected(&mut self, connection: Arc<dyn TransportConnection>) -> Result<(), ConsultError> {
        if !self.state.can_transition_to(&ConnectionState::Connected) {
            connection.close();
            return Err(ConsultError::Cancelled);
        }

        let identity = connection.local_identity().to_string();
        self.local.set_identity(identity.clone());
        self.remote = ParticipantRoster::new(identity);
        self.connection = Some(connection);
        self.state = ConnectionState::Connected;
        self.connected_at = Some(Utc::now());

        tracing::info!(room = %self.room_name, identity = %self.local.identity(), "session connected");
        Ok(())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn room_name(&self) -> &str {
        &self.room_name
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn local(&self) -> &Participant {
        &self.local
    }

    pub fn remote(&self) -> &ParticipantRoster {
        &self.remote
    }

    pub fn consultation_id(&self) -> Option<&str> {
        self.consultation_id.as_deref()
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    pub(crate) fn connection(&self) -> Option<Arc<dyn TransportConnection>> {
        self.connection.clone()
    }

    /// Find a local or remote track by id.
    pub fn track_mut(&mut self, track_id: &str) -> Option<&mut Track> {
        if self.local.has_track(track_id) {
            return self.local.track_mut(track_id);
        }
        self.remote.find_track_mut(track_id)
    }

    /// Fold one transport event into the session.
    ///
    /// Events are applied strictly in the order they are passed in. Events
    /// that reference a participant no longer present return
    /// [`ConsultError::ParticipantRace`] and leave the session untouched.
    pub fn apply(&mut self, event: TransportEvent) -> Result<Applied, ConsultError> {
        if self.state.is_terminal() {
            tracing::debug!(room = %self.room_name, ?event, "event after teardown dropped");
            discard(event);
            return Ok(Applied::Unchanged);
        }

        match event {
            TransportEvent::ParticipantJoined { identity } => {
                if self.remote.add(&identity) {
                    tracing::info!(identity = %identity, "participant joined");
                    Ok(Applied::Changed)
                } else {
                    tracing::debug!(identity = %identity, "duplicate or local join ignored");
                    Ok(Applied::Unchanged)
                }
            }

            TransportEvent::ParticipantLeft { identity } => match self.remote.remove(&identity) {
                Some(mut participant) => {
                    let mut report = TeardownReport::default();
                    participant.release_tracks(&mut report);
                    report.log_failures();
                    tracing::info!(identity = %identity, released = report.tracks_released, "participant left");
                    Ok(Applied::Changed)
                }
                None => Ok(Applied::Unchanged),
            },

            TransportEvent::TrackSubscribed { participant, source } => {
                let Some(owner) = self.remote.get_mut(&participant) else {
                    if let Err(e) = source.stop() {
                        tracing::warn!(track_id = %source.id(), "stopping orphan track failed: {e}");
                    }
                    return Err(ConsultError::ParticipantRace { identity: participant });
                };
                let track = Track::new(source, TrackOrigin::Remote, self.renderers.clone());
                tracing::info!(identity = %participant, track_id = %track.id(), kind = ?track.kind(), "track subscribed");
                if let Some(mut previous) = owner.insert_track(track) {
                    let mut report = TeardownReport::default();
                    report.record(&mut previous);
                    report.log_failures();
                }
                Ok(Applied::Changed)
            }

            TransportEvent::TrackUnsubscribed { participant, track_id } => {
                let Some(owner) = self.remote.get_mut(&participant) else {
                    return Err(ConsultError::ParticipantRace { identity: participant });
                };
                match owner.remove_track(&track_id) {
                    Some(mut track) => {
                        let mut report = TeardownReport::default();
                        report.record(&mut track);
                        report.log_failures();
                        tracing::info!(identity = %participant, track_id = %track_id, "track unsubscribed");
                        Ok(Applied::Changed)
                    }
                    None => Ok(Applied::Unchanged),
                }
            }

            TransportEvent::Disconnected { reason } => {
                tracing::info!(room = %self.room_name, ?reason, "room disconnected");
                Ok(Applied::Ended(self.teardown(reason)))
            }
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let local = (!self.torn_down).then(|| self.local.info());
        SessionSnapshot {
            session_id: Some(self.id),
            room_name: Some(self.room_name.clone()),
            connection_state: self.state.clone(),
            connected_at: self.connected_at,
            local_participant: local,
            remote_participants: self.remote.infos(),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.torn_down {
            tracing::warn!(room = %self.room_name, "session dropped without teardown");
            self.teardown(None).log_failures();
        }
    }
}

/// Release whatever a stale event carries.
fn discard(event: TransportEvent) {
    if let TransportEvent::TrackSubscribed { source, .. } = event {
        if let Err(e) = source.stop() {
            tracing::warn!(track_id = %source.id(), "stopping stale track failed: {e}");
        }
    }
}
