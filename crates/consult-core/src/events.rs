use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Events emitted by the core to the hosting call view.
#[derive(Debug, Clone)]
pub enum ConsultEvent {
    /// Pushed after every state transition.
    StateChanged(SessionSnapshot),
    /// The call is over; the host should leave the call view.
    CallEnded(EndReason),
    /// A capture device could not be confirmed released during teardown.
    CheckDevices { failures: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Failed { reason: String },
}

impl ConnectionState {
    /// `Disconnected` and `Failed` are absorbing.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Failed { .. })
    }

    pub fn can_transition_to(&self, next: &ConnectionState) -> bool {
        match (self, next) {
            (ConnectionState::Connecting, ConnectionState::Connecting) => false,
            (ConnectionState::Connecting, _) => true,
            (ConnectionState::Connected, next) => next.is_terminal(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackOrigin {
    Local,
    Remote,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackInfo {
    pub id: String,
    pub kind: TrackKind,
    pub origin: TrackOrigin,
    pub enabled: bool,
    pub attached: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParticipantInfo {
    pub identity: String,
    /// Sorted by track id.
    pub audio_tracks: Vec<TrackInfo>,
    /// Sorted by track id.
    pub video_tracks: Vec<TrackInfo>,
}

impl ParticipantInfo {
    pub fn track_count(&self) -> usize {
        self.audio_tracks.len() + self.video_tracks.len()
    }
}

/// Read-only view of the current call, rebuilt on every transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: Option<Uuid>,
    pub room_name: Option<String>,
    pub connection_state: ConnectionState,
    pub connected_at: Option<DateTime<Utc>>,
    pub local_participant: Option<ParticipantInfo>,
    /// Sorted by identity.
    pub remote_participants: Vec<ParticipantInfo>,
}

impl SessionSnapshot {
    /// Snapshot of a controller with no session.
    pub fn idle() -> Self {
        Self {
            session_id: None,
            room_name: None,
            connection_state: ConnectionState::Disconnected,
            connected_at: None,
            local_participant: None,
            remote_participants: Vec::new(),
        }
    }

    pub fn remote(&self, identity: &str) -> Option<&ParticipantInfo> {
        self.remote_participants.iter().find(|p| p.identity == identity)
    }

    /// Tracks held by the local participant and every remote participant.
    pub fn track_count(&self) -> usize {
        self.local_participant.iter().map(ParticipantInfo::track_count).sum::<usize>()
            + self
                .remote_participants
                .iter()
                .map(ParticipantInfo::track_count)
                .sum::<usize>()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// The local user hung up.
    HungUp,
    /// The room closed the session without error.
    RemoteDisconnected,
    Failed(String),
}

/// Trait for receiving events from the core.
/// Implementations must be Send + Sync (called from tokio tasks).
pub trait ConsultEventListener: Send + Sync {
    fn on_event(&self, event: ConsultEvent);
}

/// Internal event emitter that dispatches to registered listeners.
#[derive(Clone, Default)]
pub struct EventEmitter {
    listeners: Arc<RwLock<Vec<Arc<dyn ConsultEventListener>>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn ConsultEventListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn emit(&self, event: ConsultEvent) {
        let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
        for listener in listeners.iter() {
            listener.on_event(event.clone());
        }
    }
}
