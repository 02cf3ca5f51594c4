use std::sync::Arc;

use async_trait::async_trait;
use consult_video::{FrameStream, RenderSurface, RendererRegistry};
use serde::{Deserialize, Serialize};

use crate::errors::ConsultError;
use crate::events::{TrackInfo, TrackKind, TrackOrigin};

/// One inbound or outbound media stream as handed over by the platform.
///
/// Local sources wrap a capture device; remote sources wrap a transport
/// subscription.
pub trait MediaSource: Send + Sync {
    fn id(&self) -> &str;
    fn kind(&self) -> TrackKind;
    /// A disabled local source keeps its device open but sends silence/black.
    fn set_enabled(&self, enabled: bool);
    fn frames(&self) -> FrameStream;
    /// Stop capture (local) or drop the subscription (remote).
    fn stop(&self) -> Result<(), ConsultError>;
}

/// Platform camera/microphone access.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Open the devices requested by `constraints`.
    ///
    /// Must fail with [`ConsultError::MediaPermission`] without holding any
    /// device when access is denied.
    async fn acquire(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<Vec<Arc<dyn MediaSource>>, ConsultError>;
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VideoQuality {
    Low,
    #[default]
    Standard,
    High,
}

impl VideoQuality {
    /// Capture resolution as (width, height).
    pub fn resolution(&self) -> (u32, u32) {
        match self {
            VideoQuality::Low => (320, 240),
            VideoQuality::Standard => (640, 480),
            VideoQuality::High => (1280, 720),
        }
    }
}

/// Which local devices to open and at what quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    /// `None` joins without a camera.
    pub video: Option<VideoQuality>,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: Some(VideoQuality::default()),
        }
    }
}

impl MediaConstraints {
    pub fn audio_only() -> Self {
        Self {
            audio: true,
            video: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.audio && self.video.is_none()
    }
}

/// A media stream owned by exactly one participant.
///
/// Releasing stops the source and detaches it from any render surface.
/// Release happens at most once; a track dropped without being released
/// releases itself.
pub struct Track {
    id: String,
    kind: TrackKind,
    origin: TrackOrigin,
    enabled: bool,
    released: bool,
    source: Arc<dyn MediaSource>,
    renderers: RendererRegistry,
}

impl Track {
    pub fn new(source: Arc<dyn MediaSource>, origin: TrackOrigin, renderers: RendererRegistry) -> Self {
        Self {
            id: source.id().to_string(),
            kind: source.kind(),
            origin,
            enabled: true,
            released: false,
            source,
            renderers,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn origin(&self) -> TrackOrigin {
        self.origin
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn is_attached(&self) -> bool {
        self.renderers.is_attached(&self.id)
    }

    /// Mute/unmute. The track stays published and attached.
    pub fn set_enabled(&mut self, enabled: bool) {
        if self.released || self.enabled == enabled {
            return;
        }
        self.enabled = enabled;
        self.source.set_enabled(enabled);
        self.renderers.set_enabled(&self.id, enabled);
    }

    /// Start feeding this track into `surface`, replacing any previous surface.
    pub fn attach(&mut self, surface: Arc<dyn RenderSurface>) -> Result<(), ConsultError> {
        if self.released {
            return Err(ConsultError::Device(format!("track {} already released", self.id)));
        }
        self.renderers
            .attach(&self.id, self.source.frames(), surface, self.enabled);
        Ok(())
    }

    pub fn detach(&mut self) -> bool {
        self.renderers.detach(&self.id)
    }

    /// Detach and stop. Returns `Ok(false)` if the track was already released.
    ///
    /// A failing stop still marks the track released so it is never stopped twice.
    pub fn release(&mut self) -> Result<bool, ConsultError> {
        if self.released {
            return Ok(false);
        }
        self.released = true;
        self.renderers.detach(&self.id);
        self.source.stop()?;
        tracing::debug!(track_id = %self.id, origin = ?self.origin, "track released");
        Ok(true)
    }

    pub fn info(&self) -> TrackInfo {
        TrackInfo {
            id: self.id.clone(),
            kind: self.kind,
            origin: self.origin,
            enabled: self.enabled,
            attached: self.is_attached(),
        }
    }
}

impl Drop for Track {
    fn drop(&mut self) {
        if !self.released {
            tracing::warn!(track_id = %self.id, "track dropped without release");
            if let Err(e) = self.release() {
                tracing::warn!(track_id = %self.id, "release on drop failed: {e}");
            }
        }
    }
}

impl std::fmt::Debug for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Track")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("origin", &self.origin)
            .field("enabled", &self.enabled)
            .field("released", &self.released)
            .finish()
    }
}
