//! In-memory devices and transport for unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use consult_video::{FrameStream, MediaFrame, RenderSurface};
use futures_util::StreamExt;
use futures_util::stream;
use tokio::sync::{Notify, mpsc};

use crate::errors::ConsultError;
use crate::events::{ConnectionState, ConsultEvent, ConsultEventListener, EndReason, TrackKind};
use crate::media::{MediaConstraints, MediaDevices, MediaSource};
use crate::transport::{Transport, TransportConnection, TransportEvent, TransportLink};

pub struct FakeSource {
    id: String,
    kind: TrackKind,
    enabled: AtomicBool,
    stops: AtomicUsize,
    fail_stop: bool,
}

impl FakeSource {
    pub fn new(id: &str, kind: TrackKind) -> Arc<Self> {
        Self::build(id, kind, false)
    }

    /// A source whose stop reports a device error.
    pub fn failing(id: &str, kind: TrackKind) -> Arc<Self> {
        Self::build(id, kind, true)
    }

    fn build(id: &str, kind: TrackKind, fail_stop: bool) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            kind,
            enabled: AtomicBool::new(true),
            stops: AtomicUsize::new(0),
            fail_stop,
        })
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

impl MediaSource for FakeSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn frames(&self) -> FrameStream {
        stream::pending().boxed()
    }

    fn stop(&self) -> Result<(), ConsultError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if self.fail_stop {
            return Err(ConsultError::Device("camera busy".into()));
        }
        Ok(())
    }
}

pub struct NullSurface;

impl RenderSurface for NullSurface {
    fn render(&self, _frame: &MediaFrame) {}
    fn clear(&self) {}
}

/// Camera/microphone that grants or denies every request.
pub struct FakeDevices {
    deny: bool,
    acquired: Mutex<Vec<Arc<FakeSource>>>,
}

impl FakeDevices {
    pub fn granting() -> Arc<Self> {
        Arc::new(Self { deny: false, acquired: Mutex::new(Vec::new()) })
    }

    pub fn denying() -> Arc<Self> {
        Arc::new(Self { deny: true, acquired: Mutex::new(Vec::new()) })
    }

    pub fn acquired(&self) -> Vec<Arc<FakeSource>> {
        self.acquired.lock().unwrap().clone()
    }

    /// Devices opened and not yet stopped.
    pub fn live_count(&self) -> usize {
        self.acquired().iter().filter(|s| s.stop_count() == 0).count()
    }

    pub fn source(&self, kind: TrackKind) -> Arc<FakeSource> {
        self.acquired().into_iter().rev().find(|s| s.kind() == kind).unwrap()
    }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn acquire(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<Vec<Arc<dyn MediaSource>>, ConsultError> {
        if self.deny {
            return Err(ConsultError::MediaPermission("camera access denied".into()));
        }
        let mut opened = Vec::new();
        let n = self.acquired.lock().unwrap().len();
        if constraints.audio {
            opened.push(FakeSource::new(&format!("local-mic-{n}"), TrackKind::Audio));
        }
        if constraints.video.is_some() {
            opened.push(FakeSource::new(&format!("local-cam-{n}"), TrackKind::Video));
        }
        self.acquired.lock().unwrap().extend(opened.iter().cloned());
        Ok(opened.into_iter().map(|s| s as Arc<dyn MediaSource>).collect())
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum LeaveBehavior {
    Ack,
    Fail,
    NeverAnswer,
}

pub struct FakeConnection {
    identity: String,
    leave: LeaveBehavior,
    closes: AtomicUsize,
    leaves: AtomicUsize,
}

impl FakeConnection {
    pub fn new(identity: &str) -> Arc<Self> {
        Self::with_leave(identity, LeaveBehavior::Ack)
    }

    pub fn with_leave(identity: &str, leave: LeaveBehavior) -> Arc<Self> {
        Arc::new(Self {
            identity: identity.to_string(),
            leave,
            closes: AtomicUsize::new(0),
            leaves: AtomicUsize::new(0),
        })
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn leave_count(&self) -> usize {
        self.leaves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportConnection for FakeConnection {
    fn local_identity(&self) -> &str {
        &self.identity
    }

    async fn leave(&self) -> Result<(), ConsultError> {
        self.leaves.fetch_add(1, Ordering::SeqCst);
        match self.leave {
            LeaveBehavior::Ack => Ok(()),
            LeaveBehavior::Fail => Err(ConsultError::Transport("socket closed".into())),
            LeaveBehavior::NeverAnswer => std::future::pending().await,
        }
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum ConnectBehavior {
    Accept,
    RejectCredential,
    RejectNetwork,
    /// Block until [`FakeTransport::release`] is called.
    Gated,
}

pub struct FakeTransport {
    behavior: ConnectBehavior,
    connection: Arc<FakeConnection>,
    events: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    connects: AtomicUsize,
    entered: Notify,
    gate: Notify,
}

impl FakeTransport {
    pub fn new(behavior: ConnectBehavior) -> Arc<Self> {
        Self::with_connection(behavior, FakeConnection::new("patient-7"))
    }

    pub fn with_connection(behavior: ConnectBehavior, connection: Arc<FakeConnection>) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            connection,
            events: Mutex::new(None),
            connects: AtomicUsize::new(0),
            entered: Notify::new(),
            gate: Notify::new(),
        })
    }

    pub fn connection(&self) -> Arc<FakeConnection> {
        self.connection.clone()
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Deliver an event on the most recent connection.
    pub fn send(&self, event: TransportEvent) -> bool {
        match self.events.lock().unwrap().as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Close the event feed of the current connection without a disconnect.
    pub fn close_feed(&self) {
        self.events.lock().unwrap().take();
    }

    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.gate.notify_one();
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(
        &self,
        token: &str,
        _room_name: &str,
        _local: &[Arc<dyn MediaSource>],
    ) -> Result<TransportLink, ConsultError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        match self.behavior {
            ConnectBehavior::RejectCredential => {
                return Err(ConsultError::Credential(format!("token {token} expired")));
            }
            ConnectBehavior::RejectNetwork => {
                return Err(ConsultError::Transport("network unreachable".into()));
            }
            ConnectBehavior::Gated => self.gate.notified().await,
            ConnectBehavior::Accept => {}
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.events.lock().unwrap() = Some(tx);
        Ok(TransportLink {
            connection: self.connection.clone(),
            events: rx,
        })
    }
}

#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<ConsultEvent>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<ConsultEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn states(&self) -> Vec<ConnectionState> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ConsultEvent::StateChanged(s) => Some(s.connection_state),
                _ => None,
            })
            .collect()
    }

    pub fn ended(&self) -> Vec<EndReason> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ConsultEvent::CallEnded(reason) => Some(reason),
                _ => None,
            })
            .collect()
    }
}

impl ConsultEventListener for RecordingListener {
    fn on_event(&self, event: ConsultEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Yield to spawned tasks until `check` holds.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}
