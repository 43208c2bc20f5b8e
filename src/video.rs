//! Video playback sequencing.
//!
//! The coordinator drives an injected [`PlaybackSurface`] through
//! load → ready → play. A newer load always supersedes an older one: each
//! load hands out a [`PendingPlay`] ticket whose token is invalidated by the
//! next load or stop, so a stale deferred play never reaches the surface.

use crate::error::MediaError;
use crate::events::{EventSink, SlideshowEvent};
use anyhow::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Events a surface reports back about its current source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceEvent {
    /// The source is open and ready to play.
    Opened,
    /// Playback reached end of stream.
    Ended,
    /// The surface gave up on the source.
    Failed(String),
}

/// The rendering surface a video is played on.
///
/// All methods are called with the coordinator's lock held and must not call
/// back into the coordinator.
pub trait PlaybackSurface: Send + 'static {
    /// Assign (or with `None`, clear) the source URI.
    fn set_source(&mut self, source: Option<&str>) -> Result<()>;
    fn source(&self) -> Option<String>;
    fn play(&mut self) -> Result<()>;
    fn pause(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
    /// Release decode/render resources held for the current source.
    fn close(&mut self) -> Result<()>;
    fn seek(&mut self, position: Duration) -> Result<()>;
    fn position(&self) -> Option<Duration>;
    fn natural_duration(&self) -> Option<Duration>;
    fn natural_dimensions(&self) -> Option<(u32, u32)>;
    fn is_muted(&self) -> bool;
    fn set_muted(&mut self, muted: bool);
    fn set_visible(&mut self, visible: bool);

    /// Next queued event, for surfaces that buffer them.
    fn poll_event(&mut self) -> Option<SurfaceEvent> {
        None
    }
}

/// State of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Loading,
    Playing,
    Paused,
}

/// Identity of one load; stale tokens are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlayToken(u64);

/// The deferred half of [`VideoCoordinator::load_and_play`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPlay {
    token: PlayToken,
    source: String,
}

impl PendingPlay {
    pub fn token(&self) -> PlayToken {
        self.token
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Callbacks scoped to a single load.
#[derive(Default)]
pub struct PlayCallbacks {
    on_opened: Option<Callback>,
    on_ended: Option<Callback>,
}

impl PlayCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_opened(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_opened = Some(Box::new(f));
        self
    }

    pub fn on_ended(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_ended = Some(Box::new(f));
        self
    }
}

struct Playback<S> {
    surface: S,
    state: PlaybackState,
    token: Option<PlayToken>,
    source: Option<String>,
    video_ended: bool,
    disposed: bool,
    progress: f64,
    callbacks: PlayCallbacks,
}

impl<S: PlaybackSurface> Playback<S> {
    /// Full stop: halt, release, clear and hide. Safe to repeat.
    fn teardown(&mut self) {
        self.token = None;
        self.callbacks = PlayCallbacks::default();

        if self.source.is_some() || self.state != PlaybackState::Stopped {
            if let Err(e) = self.surface.stop() {
                tracing::debug!("Surface stop failed: {:#}", e);
            }
            if let Err(e) = self.surface.close() {
                tracing::debug!("Surface close failed: {:#}", e);
            }
            if let Err(e) = self.surface.set_source(None) {
                tracing::debug!("Surface source reset failed: {:#}", e);
            }
        }

        self.surface.set_visible(false);
        self.source = None;
        self.progress = 0.0;
        self.state = PlaybackState::Stopped;
    }

    fn ratio(&self) -> f64 {
        match (self.surface.position(), self.surface.natural_duration()) {
            (Some(position), Some(duration)) if !duration.is_zero() => {
                (position.as_secs_f64() / duration.as_secs_f64()).clamp(0.0, 1.0)
            }
            _ => 0.0,
        }
    }
}

struct Shared<S> {
    playback: Mutex<Playback<S>>,
    next_token: AtomicU64,
    events: EventSink,
    progress_interval: Duration,
}

/// Sequences video playback on a [`PlaybackSurface`].
pub struct VideoCoordinator<S> {
    shared: Arc<Shared<S>>,
}

impl<S> Clone for VideoCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: PlaybackSurface> VideoCoordinator<S> {
    pub fn new(surface: S, events: EventSink, progress_interval: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                playback: Mutex::new(Playback {
                    surface,
                    state: PlaybackState::Stopped,
                    token: None,
                    source: None,
                    video_ended: false,
                    disposed: false,
                    progress: 0.0,
                    callbacks: PlayCallbacks::default(),
                }),
                next_token: AtomicU64::new(1),
                events,
                progress_interval,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Playback<S>> {
        self.shared
            .playback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock, refusing once disposed.
    fn live(&self) -> Result<MutexGuard<'_, Playback<S>>, MediaError> {
        let playback = self.lock();
        if playback.disposed {
            return Err(MediaError::ResourceTornDown);
        }
        Ok(playback)
    }

    fn fresh_token(&self) -> PlayToken {
        PlayToken(self.shared.next_token.fetch_add(1, Ordering::Relaxed))
    }

    /// Stop whatever is playing, then load `source` and make it visible.
    ///
    /// Playback itself starts in the deferred step: pass the returned
    /// ticket to [`begin_playback`] (or [`spawn_deferred_play`]) once the
    /// surface had a chance to lay out. Returns `None` if the source could
    /// not be assigned or the coordinator is disposed.
    ///
    /// [`begin_playback`]: VideoCoordinator::begin_playback
    /// [`spawn_deferred_play`]: VideoCoordinator::spawn_deferred_play
    pub fn load_and_play(
        &self,
        source: impl Into<String>,
        callbacks: PlayCallbacks,
    ) -> Option<PendingPlay> {
        let source = source.into();
        let mut pb = match self.live() {
            Ok(pb) => pb,
            Err(e) => {
                tracing::trace!("Ignoring load of {}: {}", source, e);
                return None;
            }
        };

        pb.teardown();
        pb.callbacks = callbacks;
        pb.video_ended = false;

        if let Err(e) = pb.surface.set_source(Some(&source)) {
            tracing::warn!("Failed to open video {}: {:#}", source, e);
            pb.teardown();
            return None;
        }
        pb.surface.set_visible(true);
        pb.source = Some(source.clone());
        pb.state = PlaybackState::Loading;

        let token = self.fresh_token();
        pb.token = Some(token);
        tracing::debug!("Loading video {} ({:?})", source, token);

        Some(PendingPlay { token, source })
    }

    /// Run the deferred play step. A no-op returning `false` if a newer
    /// load or stop superseded `pending`.
    pub fn begin_playback(&self, pending: PendingPlay) -> bool {
        let Ok(mut pb) = self.live() else {
            return false;
        };

        let current = pb.token == Some(pending.token)
            && pb.surface.source().as_deref() == Some(pending.source.as_str());
        if !current {
            tracing::debug!(
                "Deferred play of {} dropped: {}",
                pending.source,
                MediaError::ConcurrencyRejected
            );
            return false;
        }

        if let Err(e) = pb.surface.play() {
            tracing::warn!("Failed to play {}: {:#}", pending.source, e);
            pb.teardown();
            return false;
        }
        pb.state = PlaybackState::Playing;
        drop(pb);

        tracing::debug!("Playing {}", pending.source);
        self.spawn_progress_poll(pending.token);
        true
    }

    /// Schedule [`begin_playback`] for the next runtime turn.
    ///
    /// [`begin_playback`]: VideoCoordinator::begin_playback
    pub fn spawn_deferred_play(&self, pending: PendingPlay) -> Option<JoinHandle<bool>> {
        let runtime = tokio::runtime::Handle::try_current().ok()?;
        let this = self.clone();
        Some(runtime.spawn(async move {
            tokio::task::yield_now().await;
            this.begin_playback(pending)
        }))
    }

    fn spawn_progress_poll(&self, token: PlayToken) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let this = self.clone();
        let period = self.shared.progress_interval;

        runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(ratio) = this.sample_progress(token) else {
                    break;
                };
                this.shared
                    .events
                    .emit(SlideshowEvent::ProgressUpdated(ratio));
            }
            tracing::trace!("Progress poll for {:?} finished", token);
        });
    }

    /// Refresh progress for `token`; `None` once it is no longer playing.
    fn sample_progress(&self, token: PlayToken) -> Option<f64> {
        let mut pb = self.live().ok()?;
        if pb.token != Some(token) || pb.state != PlaybackState::Playing || pb.source.is_none() {
            return None;
        }
        pb.progress = pb.ratio();
        Some(pb.progress)
    }

    /// Stop playback and release the surface's resources. Idempotent.
    pub fn stop(&self) {
        if let Ok(mut pb) = self.live() {
            pb.teardown();
        }
    }

    /// Feed a surface notification into the state machine.
    pub fn handle_surface_event(&self, event: SurfaceEvent) {
        match event {
            SurfaceEvent::Opened => self.on_opened(),
            SurfaceEvent::Ended => self.on_ended(),
            SurfaceEvent::Failed(reason) => {
                if let Ok(mut pb) = self.live() {
                    tracing::warn!(
                        "Playback of {:?} failed: {}",
                        pb.source.as_deref().unwrap_or("<none>"),
                        reason
                    );
                    pb.teardown();
                }
            }
        }
    }

    /// Drain events queued by the surface. Returns how many were handled.
    pub fn pump_surface_events(&self) -> usize {
        let mut handled = 0;
        loop {
            let event = match self.live() {
                Ok(mut pb) => pb.surface.poll_event(),
                Err(_) => None,
            };
            let Some(event) = event else {
                return handled;
            };
            self.handle_surface_event(event);
            handled += 1;
        }
    }

    fn on_opened(&self) {
        let callback = {
            let Ok(mut pb) = self.live() else {
                return;
            };
            if pb.source.is_none() {
                return;
            }
            pb.callbacks.on_opened.take()
        };

        self.shared.events.emit(SlideshowEvent::MediaOpened);
        if let Some(callback) = callback {
            callback();
        }
    }

    /// End of stream. State is cleared here directly rather than through
    /// [`stop`](VideoCoordinator::stop): the source stays loaded so
    /// [`replay`](VideoCoordinator::replay) can rewind it.
    fn on_ended(&self) {
        let callback = {
            let Ok(mut pb) = self.live() else {
                return;
            };
            if pb.source.is_none() || pb.state == PlaybackState::Stopped {
                return;
            }
            pb.state = PlaybackState::Stopped;
            pb.token = None;
            pb.video_ended = true;
            pb.progress = 1.0;
            pb.callbacks.on_opened = None;
            pb.callbacks.on_ended.take()
        };

        tracing::debug!("Video reached end of stream");
        self.shared.events.emit(SlideshowEvent::MediaEnded);
        if let Some(callback) = callback {
            callback();
        }
    }

    /// Rewind the loaded source and play it again.
    pub fn replay(&self) -> bool {
        let Ok(mut pb) = self.live() else {
            return false;
        };
        if pb.source.is_none() {
            return false;
        }

        let resumed = pb
            .surface
            .seek(Duration::ZERO)
            .and_then(|()| pb.surface.play());
        if let Err(e) = resumed {
            tracing::warn!("Replay failed: {:#}", e);
            pb.teardown();
            return false;
        }

        let token = self.fresh_token();
        pb.token = Some(token);
        pb.state = PlaybackState::Playing;
        pb.video_ended = false;
        pb.progress = 0.0;
        drop(pb);

        self.spawn_progress_poll(token);
        true
    }

    pub fn pause(&self) -> bool {
        let Ok(mut pb) = self.live() else {
            return false;
        };
        if pb.state != PlaybackState::Playing {
            return false;
        }
        if let Err(e) = pb.surface.pause() {
            tracing::warn!("Pause failed: {:#}", e);
            return false;
        }
        pb.state = PlaybackState::Paused;
        true
    }

    pub fn resume(&self) -> bool {
        let Ok(mut pb) = self.live() else {
            return false;
        };
        if pb.state != PlaybackState::Paused {
            return false;
        }
        if let Err(e) = pb.surface.play() {
            tracing::warn!("Resume failed: {:#}", e);
            pb.teardown();
            return false;
        }

        let token = self.fresh_token();
        pb.token = Some(token);
        pb.state = PlaybackState::Playing;
        drop(pb);

        self.spawn_progress_poll(token);
        true
    }

    /// Seek to `ratio` of the known duration. No-op without a duration.
    pub fn seek_to(&self, ratio: f64) {
        if !ratio.is_finite() {
            return;
        }
        let Ok(mut pb) = self.live() else {
            return;
        };
        if pb.source.is_none() {
            return;
        }
        let Some(duration) = pb.surface.natural_duration().filter(|d| !d.is_zero()) else {
            return;
        };

        let ratio = ratio.clamp(0.0, 1.0);
        match pb.surface.seek(duration.mul_f64(ratio)) {
            Ok(()) => pb.progress = ratio,
            Err(e) => tracing::debug!("Seek failed: {:#}", e),
        }
    }

    /// Current position as a ratio of the duration; 0 when unknown.
    pub fn progress(&self) -> f64 {
        match self.live() {
            Ok(pb) if pb.source.is_some() => pb.ratio(),
            _ => 0.0,
        }
    }

    pub fn set_muted(&self, muted: bool) {
        if let Ok(mut pb) = self.live() {
            pb.surface.set_muted(muted);
        }
    }

    pub fn is_muted(&self) -> bool {
        self.live().map(|pb| pb.surface.is_muted()).unwrap_or(false)
    }

    pub fn state(&self) -> PlaybackState {
        self.lock().state
    }

    pub fn video_ended(&self) -> bool {
        self.lock().video_ended
    }

    pub fn source(&self) -> Option<String> {
        self.lock().source.clone()
    }

    pub fn natural_dimensions(&self) -> Option<(u32, u32)> {
        self.live().ok()?.surface.natural_dimensions()
    }

    /// Tear down for good. Every later call is a silent no-op.
    pub fn dispose(&self) {
        let mut pb = self.lock();
        if pb.disposed {
            return;
        }
        pb.teardown();
        pb.disposed = true;
        tracing::debug!("Video coordinator disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.lock().disposed
    }
}
