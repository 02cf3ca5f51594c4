//! Session teardown.
//!
//! Every exit path (hang-up, remote disconnect, transport error, host
//! unmount, failed connect) ends up in [`Session::teardown`]. It is safe to
//! call any number of times: the first call releases everything, later
//! calls return an empty report.

use crate::events::ConnectionState;
use crate::media::Track;
use crate::session::Session;

/// What a teardown actually released.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TeardownReport {
    pub tracks_released: usize,
    pub connection_closed: bool,
    /// Tracks whose stop failed; their device may still be live.
    pub failures: Vec<String>,
}

impl TeardownReport {
    pub(crate) fn record(&mut self, track: &mut Track) {
        match track.release() {
            Ok(true) => self.tracks_released += 1,
            Ok(false) => {}
            Err(e) => self.failures.push(format!("{}: {e}", track.id())),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub(crate) fn log_failures(&self) {
        for failure in &self.failures {
            tracing::warn!("track release failed: {failure}");
        }
    }
}

impl Session {
    /// Release every local and remote track, close the room connection and
    /// enter a terminal state (`Failed` when `reason` is set).
    ///
    /// Legal from any state, including a session that never connected.
    pub fn teardown(&mut self, reason: Option<String>) -> TeardownReport {
        let mut report = TeardownReport::default();
        if self.torn_down {
            return report;
        }
        self.torn_down = true;

        // Local capture first.
        self.local.release_tracks(&mut report);
        for mut participant in self.remote.drain() {
            participant.release_tracks(&mut report);
        }

        let leftover = self.renderers.detach_all();
        if leftover > 0 {
            tracing::warn!(room = %self.room_name, leftover, "renderers still attached at teardown");
        }

        if let Some(connection) = self.connection.take() {
            connection.close();
            report.connection_closed = true;
        }

        self.state = match reason {
            Some(reason) => ConnectionState::Failed { reason },
            None => ConnectionState::Disconnected,
        };

        tracing::info!(
            room = %self.room_name,
            state = ?self.state,
            released = report.tracks_released,
            failures = report.failures.len(),
            "session torn down"
        );
        report
    }
}
