use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use consult_video::{RenderSurface, RendererRegistry};
use tokio::sync::{Mutex, MutexGuard, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::api::ConsultationApi;
use crate::cleanup::TeardownReport;
use crate::controls::CallControls;
use crate::errors::ConsultError;
use crate::events::{
    ConnectionState, ConsultEvent, ConsultEventListener, EndReason, EventEmitter, SessionSnapshot,
    TrackKind,
};
use crate::media::{MediaConstraints, MediaDevices};
use crate::session::{Applied, Session};
use crate::settings::Settings;
use crate::transport::{Transport, TransportEvent};

/// Reason recorded when the room's event feed closes without a disconnect.
const FEED_CLOSED: &str = "transport closed";

/// State shared between the controller, its controls and the event loop.
pub(crate) struct CallShared {
    pub(crate) session: Mutex<Option<Session>>,
    pub(crate) emitter: EventEmitter,
    pub(crate) api: Option<ConsultationApi>,
    pub(crate) hangup_timeout: Duration,
    snapshot: StdMutex<SessionSnapshot>,
    /// Bumped by every connect attempt and every teardown. A connect that
    /// resolves under a stale generation lost its host.
    generation: AtomicU64,
    event_task: StdMutex<Option<JoinHandle<()>>>,
}

impl CallShared {
    /// Record and broadcast a snapshot. Callers hold the session lock so
    /// snapshots go out in mutation order.
    pub(crate) fn publish(&self, snapshot: SessionSnapshot) {
        *self.snapshot.lock().unwrap_or_else(PoisonError::into_inner) = snapshot.clone();
        self.emitter.emit(ConsultEvent::StateChanged(snapshot));
    }

    fn snapshot(&self) -> SessionSnapshot {
        self.snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn report_devices(&self, report: &TeardownReport) {
        if !report.is_clean() {
            report.log_failures();
            self.emitter.emit(ConsultEvent::CheckDevices {
                failures: report.failures.clone(),
            });
        }
    }

    fn abort_event_task(&self) {
        if let Some(handle) = self
            .event_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }

    /// The single teardown entry point for hang-up, unmount and replacement.
    ///
    /// With `expected` set, only that session is torn down; a newer session
    /// in the slot is left alone. Safe to call any number of times; returns
    /// `None` when there was nothing to tear down.
    pub(crate) async fn teardown(
        &self,
        expected: Option<Uuid>,
        end: Option<EndReason>,
    ) -> Option<TeardownReport> {
        let report = {
            let mut slot = self.session.lock().await;
            if let Some(id) = expected {
                if slot.as_ref().map(Session::id) != Some(id) {
                    tracing::debug!(session = %id, "session already gone, nothing to tear down");
                    return None;
                }
            }
            self.generation.fetch_add(1, Ordering::SeqCst);
            self.abort_event_task();

            let mut session = slot.take()?;
            let report = session.teardown(None);
            self.publish(session.snapshot());
            report
        };

        self.report_devices(&report);
        if let Some(reason) = end {
            self.emitter.emit(ConsultEvent::CallEnded(reason));
        }
        Some(report)
    }

    /// Fire the best-effort end-of-session notice without waiting for it.
    pub(crate) fn notify_session_end(&self, consultation_id: String) {
        let Some(api) = self.api.clone() else {
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = api.end_session(&consultation_id).await {
                tracing::warn!(consultation = %consultation_id, "end-of-session notice failed: {e}");
            }
        });
    }

    /// Clear a session the room ended and tell the host.
    fn finish_remote_end(&self, mut slot: MutexGuard<'_, Option<Session>>, report: TeardownReport) {
        let Some(session) = slot.take() else {
            return;
        };
        let reason = match session.state() {
            ConnectionState::Failed { reason } => EndReason::Failed(reason.clone()),
            _ => EndReason::RemoteDisconnected,
        };
        self.publish(session.snapshot());
        drop(slot);
        drop(session);

        self.report_devices(&report);
        self.emitter.emit(ConsultEvent::CallEnded(reason));
    }

    async fn event_loop(
        self: Arc<Self>,
        session_id: Uuid,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        while let Some(event) = events.recv().await {
            let mut slot = self.session.lock().await;
            let Some(session) = slot.as_mut().filter(|s| s.id() == session_id) else {
                tracing::debug!(?event, "session gone, dropping event");
                return;
            };

            match session.apply(event) {
                Ok(Applied::Unchanged) => {}
                Ok(Applied::Changed) => self.publish(session.snapshot()),
                Ok(Applied::Ended(report)) => {
                    self.finish_remote_end(slot, report);
                    tracing::info!(session = %session_id, "session event loop ended");
                    return;
                }
                Err(ConsultError::ParticipantRace { identity }) => {
                    tracing::debug!(identity = %identity, "event for departed participant dropped");
                }
                Err(e) => tracing::warn!("event rejected: {e}"),
            }
        }

        let mut slot = self.session.lock().await;
        if let Some(session) = slot.as_mut().filter(|s| s.id() == session_id) {
            tracing::warn!(session = %session_id, room = %session.room_name(), "event feed closed without disconnect");
            let report = session.teardown(Some(FEED_CLOSED.to_string()));
            self.finish_remote_end(slot, report);
        }
    }
}

/// Enabled state the local tracks are published with.
#[derive(Debug, Clone, Copy)]
struct LocalStart {
    audio_enabled: bool,
    video_enabled: bool,
}

impl Default for LocalStart {
    fn default() -> Self {
        Self {
            audio_enabled: true,
            video_enabled: true,
        }
    }
}

/// Owns the one active consultation call of a host view.
///
/// Connecting replaces any previous session. Every exit path funnels into
/// a single idempotent teardown.
pub struct CallController {
    devices: Arc<dyn MediaDevices>,
    transport: Arc<dyn Transport>,
    settings: Settings,
    shared: Arc<CallShared>,
}

impl CallController {
    /// Build a controller. A consultation API client is created when
    /// `settings.api_base_url` is set.
    pub fn new(
        devices: Arc<dyn MediaDevices>,
        transport: Arc<dyn Transport>,
        settings: Settings,
    ) -> Result<Self, ConsultError> {
        let api = settings
            .api_base_url
            .as_deref()
            .map(ConsultationApi::new)
            .transpose()?;
        Ok(Self::build(devices, transport, settings, api))
    }

    /// Use `api` for token fetches and end-of-session notices.
    pub fn with_api(self, api: ConsultationApi) -> Self {
        let Self { devices, transport, settings, .. } = self;
        Self::build(devices, transport, settings, Some(api))
    }

    fn build(
        devices: Arc<dyn MediaDevices>,
        transport: Arc<dyn Transport>,
        settings: Settings,
        api: Option<ConsultationApi>,
    ) -> Self {
        let shared = Arc::new(CallShared {
            session: Mutex::new(None),
            emitter: EventEmitter::new(),
            api,
            hangup_timeout: settings.hangup_timeout(),
            snapshot: StdMutex::new(SessionSnapshot::idle()),
            generation: AtomicU64::new(0),
            event_task: StdMutex::new(None),
        });
        Self {
            devices,
            transport,
            settings,
            shared,
        }
    }

    /// Register a listener for call events.
    pub fn add_listener(&self, listener: Arc<dyn ConsultEventListener>) {
        self.shared.emitter.add_listener(listener);
    }

    /// Create CallControls bound to this controller.
    pub fn controls(&self) -> CallControls {
        CallControls::new(self.shared.clone())
    }

    /// Latest snapshot pushed to listeners.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.snapshot()
    }

    /// Fetch a room token for `consultation_id` and connect with it.
    ///
    /// Local tracks start muted or unmuted per the join preferences before
    /// the room ever sees them.
    pub async fn join(&self, consultation_id: &str) -> Result<SessionSnapshot, ConsultError> {
        let api = self
            .shared
            .api
            .as_ref()
            .ok_or_else(|| ConsultError::InvalidUrl("consultation API not configured".into()))?;

        let grant = api.request_token(consultation_id).await?;
        tracing::info!(consultation = %consultation_id, identity = %grant.identity, "video token granted");

        let start = LocalStart {
            audio_enabled: self.settings.mic_enabled_on_join,
            video_enabled: self.settings.camera_enabled_on_join,
        };
        self.open(
            &grant.token,
            &grant.room_name,
            self.settings.media_constraints(),
            start,
            Some(consultation_id.to_string()),
        )
        .await
    }

    /// Capture local media and join `room_name` with a single-use token.
    ///
    /// Resolves exactly once. On any failure every acquired device is
    /// released and no session is kept. Never retries: a spent token
    /// cannot succeed twice.
    pub async fn connect(
        &self,
        access_token: &str,
        room_name: &str,
        constraints: MediaConstraints,
    ) -> Result<SessionSnapshot, ConsultError> {
        self.open(access_token, room_name, constraints, LocalStart::default(), None)
            .await
    }

    async fn open(
        &self,
        access_token: &str,
        room_name: &str,
        constraints: MediaConstraints,
        start: LocalStart,
        consultation_id: Option<String>,
    ) -> Result<SessionSnapshot, ConsultError> {
        self.shared.teardown(None, None).await;
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;

        self.shared.publish(SessionSnapshot {
            room_name: Some(room_name.to_string()),
            connection_state: ConnectionState::Connecting,
            ..SessionSnapshot::idle()
        });
        tracing::info!(room = %room_name, ?constraints, ?start, "connecting");

        let sources = match self.devices.acquire(&constraints).await {
            Ok(sources) => sources,
            Err(e) => {
                tracing::warn!(room = %room_name, "local media unavailable: {e}");
                self.publish_failure(generation, room_name, &e).await;
                return Err(e);
            }
        };

        let mut session = Session::connecting(room_name, &sources, RendererRegistry::new());
        session.set_local_enabled(TrackKind::Audio, start.audio_enabled);
        session.set_local_enabled(TrackKind::Video, start.video_enabled);
        session.consultation_id = consultation_id;

        let link = match self.transport.connect(access_token, room_name, &sources).await {
            Ok(link) => link,
            Err(e) => {
                tracing::warn!(room = %room_name, "transport connect failed: {e}");
                let report = session.teardown(Some(e.to_string()));
                self.shared.report_devices(&report);
                self.publish_failure(generation, room_name, &e).await;
                return Err(e);
            }
        };

        let mut slot = self.shared.session.lock().await;
        if self.shared.generation.load(Ordering::SeqCst) != generation {
            drop(slot);
            tracing::info!(room = %room_name, "host lost interest while connecting, tearing down");
            session.mark_connected(link.connection)?;
            let report = session.teardown(None);
            self.shared.report_devices(&report);
            return Err(ConsultError::Cancelled);
        }

        session.mark_connected(link.connection)?;
        let snapshot = session.snapshot();
        let session_id = session.id();
        *slot = Some(session);
        self.shared.publish(snapshot.clone());

        let handle = tokio::spawn(self.shared.clone().event_loop(session_id, link.events));
        *self
            .shared
            .event_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        drop(slot);

        Ok(snapshot)
    }

    /// Push a `Failed` snapshot for a connect attempt the host still cares about.
    async fn publish_failure(&self, generation: u64, room_name: &str, error: &ConsultError) {
        let _slot = self.shared.session.lock().await;
        if self.shared.generation.load(Ordering::SeqCst) == generation {
            self.shared.publish(SessionSnapshot {
                room_name: Some(room_name.to_string()),
                connection_state: ConnectionState::Failed {
                    reason: error.to_string(),
                },
                ..SessionSnapshot::idle()
            });
        }
    }

    /// Tear down the current session, if any. Idempotent.
    pub async fn teardown(&self) -> Option<TeardownReport> {
        self.shared.teardown(None, None).await
    }

    /// The host view is going away. Any pending connect is routed into
    /// teardown when it resolves.
    pub async fn unmount(&self) {
        tracing::info!("call view unmounted");
        self.shared.teardown(None, None).await;
    }

    /// Feed a local or remote track into a UI surface.
    pub async fn attach_surface(
        &self,
        track_id: &str,
        surface: Arc<dyn RenderSurface>,
    ) -> Result<(), ConsultError> {
        let mut slot = self.shared.session.lock().await;
        let session = slot.as_mut().ok_or(ConsultError::NotConnected)?;
        session
            .track_mut(track_id)
            .ok_or_else(|| ConsultError::UnknownTrack(track_id.to_string()))?
            .attach(surface)?;
        self.shared.publish(session.snapshot());
        Ok(())
    }

    /// Returns `false` if the track had no surface.
    pub async fn detach_surface(&self, track_id: &str) -> Result<bool, ConsultError> {
        let mut slot = self.shared.session.lock().await;
        let session = slot.as_mut().ok_or(ConsultError::NotConnected)?;
        let detached = session
            .track_mut(track_id)
            .ok_or_else(|| ConsultError::UnknownTrack(track_id.to_string()))?
            .detach();
        if detached {
            self.shared.publish(session.snapshot());
        }
        Ok(detached)
    }
}
