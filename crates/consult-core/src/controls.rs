use std::sync::Arc;

use crate::errors::ConsultError;
use crate::events::{EndReason, TrackKind};
use crate::room::CallShared;
use crate::session::Session;

impl Session {
    /// Flip every local track of `kind`. Tracks stay published.
    ///
    /// The new state is "enabled" if none is enabled right now. Returns the
    /// new state, or `false` when there is no such track.
    pub fn toggle_local(&mut self, kind: TrackKind) -> bool {
        let any_enabled = self.is_local_enabled(kind);
        self.set_local_enabled(kind, !any_enabled)
    }

    /// Returns the resulting state, `false` when there is no such track.
    pub fn set_local_enabled(&mut self, kind: TrackKind, enabled: bool) -> bool {
        let mut found = false;
        for track in self.local.tracks_mut(kind) {
            track.set_enabled(enabled);
            found = true;
        }
        found && enabled
    }

    pub fn is_local_enabled(&self, kind: TrackKind) -> bool {
        self.local.tracks(kind).any(|t| t.is_enabled())
    }
}

/// Mute, camera and hang-up controls for the active call.
///
/// Cheap to clone; every clone drives the same controller.
#[derive(Clone)]
pub struct CallControls {
    shared: Arc<CallShared>,
}

impl CallControls {
    pub(crate) fn new(shared: Arc<CallShared>) -> Self {
        Self { shared }
    }

    pub async fn toggle_local_audio(&self) -> Result<bool, ConsultError> {
        self.toggle(TrackKind::Audio).await
    }

    pub async fn toggle_local_video(&self) -> Result<bool, ConsultError> {
        self.toggle(TrackKind::Video).await
    }

    pub async fn set_local_audio_enabled(&self, enabled: bool) -> Result<bool, ConsultError> {
        self.set_local_enabled(TrackKind::Audio, enabled).await
    }

    pub async fn set_local_video_enabled(&self, enabled: bool) -> Result<bool, ConsultError> {
        self.set_local_enabled(TrackKind::Video, enabled).await
    }

    pub async fn is_local_audio_enabled(&self) -> bool {
        self.is_local_enabled(TrackKind::Audio).await
    }

    pub async fn is_local_video_enabled(&self) -> bool {
        self.is_local_enabled(TrackKind::Video).await
    }

    async fn toggle(&self, kind: TrackKind) -> Result<bool, ConsultError> {
        let mut slot = self.shared.session.lock().await;
        let session = slot.as_mut().ok_or(ConsultError::NotConnected)?;
        let enabled = session.toggle_local(kind);
        tracing::info!(?kind, enabled, "local track toggled");
        self.shared.publish(session.snapshot());
        Ok(enabled)
    }

    async fn set_local_enabled(
        &self,
        kind: TrackKind,
        enabled: bool,
    ) -> Result<bool, ConsultError> {
        let mut slot = self.shared.session.lock().await;
        let session = slot.as_mut().ok_or(ConsultError::NotConnected)?;
        let enabled = session.set_local_enabled(kind, enabled);
        self.shared.publish(session.snapshot());
        Ok(enabled)
    }

    async fn is_local_enabled(&self, kind: TrackKind) -> bool {
        let slot = self.shared.session.lock().await;
        slot.as_ref().is_some_and(|s| s.is_local_enabled(kind))
    }

    /// Leave the room and release everything.
    ///
    /// Waits at most the configured hang-up timeout for the room to
    /// acknowledge, then tears down regardless. Only the session that was
    /// active when hang-up started is ended. A no-op without a session.
    pub async fn hang_up(&self) -> Result<(), ConsultError> {
        let (session_id, connection, consultation_id) = {
            let slot = self.shared.session.lock().await;
            match slot.as_ref() {
                Some(session) => (
                    session.id(),
                    session.connection(),
                    session.consultation_id().map(str::to_string),
                ),
                None => return Ok(()),
            }
        };

        if let Some(connection) = connection {
            match tokio::time::timeout(self.shared.hangup_timeout, connection.leave()).await {
                Ok(Ok(())) => tracing::info!("left room"),
                Ok(Err(e)) => tracing::warn!("leave failed, tearing down anyway: {e}"),
                Err(_) => tracing::warn!(
                    timeout_ms = self.shared.hangup_timeout.as_millis() as u64,
                    "leave not acknowledged, tearing down anyway"
                ),
            }
        }

        let ended = self
            .shared
            .teardown(Some(session_id), Some(EndReason::HungUp))
            .await;
        if ended.is_none() {
            tracing::info!(session = %session_id, "session ended while leaving");
            return Ok(());
        }
        if let Some(consultation_id) = consultation_id {
            self.shared.notify_session_end(consultation_id);
        }
        Ok(())
    }
}
