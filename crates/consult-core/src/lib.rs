//! Consultation call core.
//!
//! Owns the lifecycle of one video consultation: local media capture, the
//! room connection, the remote participant roster and a single teardown
//! path. Platform camera/microphone access and the media transport are
//! injected through the [`MediaDevices`] and [`Transport`] traits.

pub mod api;
pub mod cleanup;
pub mod controls;
pub mod errors;
pub mod events;
pub mod media;
pub mod participants;
pub mod room;
pub mod session;
pub mod settings;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use api::{ConsultationApi, VideoGrant};
pub use cleanup::TeardownReport;
pub use controls::CallControls;
pub use errors::ConsultError;
pub use events::{
    ConnectionState, ConsultEvent, ConsultEventListener, EndReason, ParticipantInfo,
    SessionSnapshot, TrackInfo, TrackKind, TrackOrigin,
};
pub use media::{MediaConstraints, MediaDevices, MediaSource, Track, VideoQuality};
pub use room::CallController;
pub use session::Session;
pub use settings::{Settings, SettingsStore};
pub use transport::{Transport, TransportConnection, TransportEvent, TransportLink};

/// Install the tracing subscriber once per process.
///
/// `RUST_LOG` overrides the default filter.
pub fn init_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("consult_core=debug,consult_video=info"));
        if let Err(e) = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .try_init()
        {
            eprintln!("logging already initialised: {e}");
        }
    });
}
