//! Render pipeline for consultation media tracks.
//!
//! Feeds frames from a track's media stream into a platform rendering
//! surface. The UI owns the surface; this crate owns the per-track frame
//! loop that drives it.

pub mod frame;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub use frame::{AudioFrame, MediaFrame, VideoFrame};

/// Stream of decoded frames produced by one media track.
pub type FrameStream = BoxStream<'static, MediaFrame>;

/// A visual (or audio playout) surface created by the UI layer.
///
/// Implementations must be cheap to call from a tokio task.
pub trait RenderSurface: Send + Sync {
    fn render(&self, frame: &MediaFrame);

    /// Blank the surface. Called when the track is disabled or detached.
    fn clear(&self);
}

/// Per-track renderer handle. Dropping the sender cancels the frame loop.
struct TrackRenderer {
    /// Distinguishes a renderer from a later one attached under the same id.
    serial: u64,
    cancel_tx: watch::Sender<bool>,
    enabled_tx: watch::Sender<bool>,
    surface: Arc<dyn RenderSurface>,
    _handle: JoinHandle<()>,
}

/// Registry of active track renderers, keyed by track id.
///
/// One registry is shared by every track of a session so teardown can
/// check that nothing is left attached.
#[derive(Clone, Default)]
pub struct RendererRegistry {
    renderers: Arc<Mutex<HashMap<String, TrackRenderer>>>,
    next_serial: Arc<AtomicU64>,
}

impl RendererRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, TrackRenderer>> {
        self.renderers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start rendering `frames` onto `surface`.
    ///
    /// Any renderer already attached for `track_id` is detached first.
    /// Must be called from within a tokio runtime.
    pub fn attach(
        &self,
        track_id: &str,
        frames: FrameStream,
        surface: Arc<dyn RenderSurface>,
        enabled: bool,
    ) {
        self.detach(track_id);

        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (enabled_tx, enabled_rx) = watch::channel(enabled);
        let ended = StreamEnd {
            registry: self.clone(),
            track_id: track_id.to_string(),
            serial,
        };

        // Hold the lock across the spawn so a stream that ends at once finds its entry.
        let mut renderers = self.lock();
        let handle = tokio::spawn(frame_loop(
            track_id.to_string(),
            frames,
            surface.clone(),
            cancel_rx,
            enabled_rx,
            ended,
        ));
        renderers.insert(
            track_id.to_string(),
            TrackRenderer {
                serial,
                cancel_tx,
                enabled_tx,
                surface,
                _handle: handle,
            },
        );
        drop(renderers);
        tracing::debug!(track_id = %track_id, enabled, "renderer attached");
    }

    /// Stop and remove the renderer for `track_id`.
    ///
    /// Returns `false` if nothing was attached.
    pub fn detach(&self, track_id: &str) -> bool {
        let removed = self.lock().remove(track_id);
        match removed {
            Some(renderer) => {
                let _ = renderer.cancel_tx.send(true);
                renderer.surface.clear();
                tracing::debug!(track_id = %track_id, "renderer detached");
                true
            }
            None => false,
        }
    }

    /// Enable or disable rendering without detaching the surface.
    ///
    /// Returns `false` if nothing is attached for `track_id`.
    pub fn set_enabled(&self, track_id: &str, enabled: bool) -> bool {
        match self.lock().get(track_id) {
            Some(renderer) => {
                renderer.enabled_tx.send_replace(enabled);
                true
            }
            None => false,
        }
    }

    pub fn is_attached(&self, track_id: &str) -> bool {
        self.lock().contains_key(track_id)
    }

    pub fn attached_count(&self) -> usize {
        self.lock().len()
    }

    /// Drop the entry of a renderer whose stream ran dry, unless the track
    /// has been re-attached since.
    fn remove_ended(&self, track_id: &str, serial: u64) {
        let mut renderers = self.lock();
        if renderers.get(track_id).is_some_and(|r| r.serial == serial) {
            if let Some(renderer) = renderers.remove(track_id) {
                drop(renderers);
                renderer.surface.clear();
            }
        }
    }

    /// Detach every renderer. Returns how many were attached.
    pub fn detach_all(&self) -> usize {
        let ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.iter().filter(|id| self.detach(id)).count()
    }
}

/// Registry entry owned by one frame loop.
struct StreamEnd {
    registry: RendererRegistry,
    track_id: String,
    serial: u64,
}

async fn frame_loop(
    track_id: String,
    mut frames: FrameStream,
    surface: Arc<dyn RenderSurface>,
    mut cancel_rx: watch::Receiver<bool>,
    mut enabled_rx: watch::Receiver<bool>,
    ended: StreamEnd,
) {
    tracing::info!(track_id = %track_id, "frame_loop started");

    let mut enabled = *enabled_rx.borrow_and_update();
    let mut frame_count: u64 = 0;

    loop {
        tokio::select! {
            _ = cancel_rx.changed() => {
                tracing::info!(track_id = %track_id, "frame_loop cancelled");
                break;
            }
            changed = enabled_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let now = *enabled_rx.borrow_and_update();
                if enabled && !now {
                    surface.clear();
                }
                enabled = now;
            }
            frame_opt = frames.next() => {
                match frame_opt {
                    Some(frame) => {
                        // Disabled tracks stay attached but render nothing.
                        if !enabled {
                            continue;
                        }
                        frame_count += 1;
                        if frame_count == 1 {
                            tracing::info!(track_id = %track_id, "first frame received");
                        }
                        surface.render(&frame);
                    }
                    None => {
                        tracing::info!(track_id = %track_id, "media stream ended");
                        ended.registry.remove_ended(&ended.track_id, ended.serial);
                        break;
                    }
                }
            }
        }
    }

    tracing::info!(track_id = %track_id, frames = frame_count, "frame_loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSurface {
        rendered: AtomicUsize,
        cleared: AtomicUsize,
    }

    impl RenderSurface for CountingSurface {
        fn render(&self, _frame: &MediaFrame) {
            self.rendered.fetch_add(1, Ordering::SeqCst);
        }

        fn clear(&self) {
            self.cleared.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn video_frame(ts: u64) -> MediaFrame {
        MediaFrame::Video(VideoFrame {
            width: 2,
            height: 2,
            data: vec![0; 6],
            timestamp_ms: ts,
        })
    }

    /// Frames followed by a stream that never ends, like a live track.
    fn live_frames(n: u64) -> FrameStream {
        stream::iter((0..n).map(video_frame))
            .chain(stream::pending())
            .boxed()
    }

    async fn settle() {
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn attached_renderer_feeds_surface() {
        let registry = RendererRegistry::new();
        let surface = Arc::new(CountingSurface::default());

        registry.attach("t1", live_frames(3), surface.clone(), true);
        settle().await;

        assert!(registry.is_attached("t1"));
        assert_eq!(surface.rendered.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn disabled_renderer_stays_attached_but_renders_nothing() {
        let registry = RendererRegistry::new();
        let surface = Arc::new(CountingSurface::default());

        registry.attach("t1", live_frames(5), surface.clone(), false);
        settle().await;

        assert!(registry.is_attached("t1"));
        assert_eq!(surface.rendered.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn disabling_clears_surface() {
        let registry = RendererRegistry::new();
        let surface = Arc::new(CountingSurface::default());

        registry.attach("t1", live_frames(1), surface.clone(), true);
        settle().await;
        assert!(registry.set_enabled("t1", false));
        settle().await;

        assert_eq!(surface.cleared.load(Ordering::SeqCst), 1);
        assert!(registry.is_attached("t1"));
    }

    #[tokio::test]
    async fn detach_is_idempotent() {
        let registry = RendererRegistry::new();
        let surface = Arc::new(CountingSurface::default());

        registry.attach("t1", live_frames(0), surface.clone(), true);
        assert!(registry.detach("t1"));
        assert!(!registry.detach("t1"));
        assert!(!registry.is_attached("t1"));
        assert_eq!(surface.cleared.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reattach_replaces_previous_renderer() {
        let registry = RendererRegistry::new();
        let first = Arc::new(CountingSurface::default());
        let second = Arc::new(CountingSurface::default());

        registry.attach("t1", live_frames(0), first.clone(), true);
        registry.attach("t1", live_frames(2), second.clone(), true);
        settle().await;

        assert_eq!(registry.attached_count(), 1);
        assert_eq!(first.cleared.load(Ordering::SeqCst), 1);
        assert_eq!(second.rendered.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn ended_stream_releases_its_entry() {
        let registry = RendererRegistry::new();
        let surface = Arc::new(CountingSurface::default());

        registry.attach("t1", stream::iter((0..2).map(video_frame)).boxed(), surface.clone(), true);
        settle().await;

        assert!(!registry.is_attached("t1"));
        assert_eq!(registry.attached_count(), 0);
        assert_eq!(surface.rendered.load(Ordering::SeqCst), 2);
        assert_eq!(surface.cleared.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn ended_stream_keeps_newer_renderer() {
        let registry = RendererRegistry::new();
        let surface = Arc::new(CountingSurface::default());

        registry.attach("t1", stream::empty::<MediaFrame>().boxed(), surface.clone(), true);
        registry.attach("t1", live_frames(1), surface.clone(), true);
        settle().await;

        assert!(registry.is_attached("t1"));
    }

    #[tokio::test]
    async fn detach_all_empties_registry() {
        let registry = RendererRegistry::new();
        registry.attach("a", live_frames(0), Arc::new(CountingSurface::default()), true);
        registry.attach("b", live_frames(0), Arc::new(CountingSurface::default()), true);

        assert_eq!(registry.detach_all(), 2);
        assert_eq!(registry.attached_count(), 0);
        assert!(!registry.set_enabled("a", true));
    }
}
