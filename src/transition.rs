//! Navigation and auto-advance arbitration.
//!
//! Manual navigation, the auto-advance timer and video completion all move
//! the same playlist index. [`TransitionController`] funnels them through a
//! single guard that covers the index mutation and the resulting
//! `NavigateToIndex` event, but not the display work that follows.

use crate::error::MediaError;
use crate::events::{EventSink, SlideshowEvent};
use crate::media::MediaKind;
use crate::playlist::PlaylistStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Mutual exclusion for the index-mutation section.
#[derive(Debug, Default)]
pub struct TransitionGuard {
    lock: Mutex<()>,
    busy: AtomicBool,
}

/// Held while a navigation mutates the index.
#[derive(Debug)]
pub struct GuardTicket<'a> {
    _lock: MutexGuard<'a, ()>,
    busy: &'a AtomicBool,
}

impl Drop for GuardTicket<'_> {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

impl TransitionGuard {
    /// Wait for the guard.
    pub fn acquire(&self) -> GuardTicket<'_> {
        let lock = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.ticket(lock)
    }

    /// Take the guard only if it is idle.
    pub fn try_acquire(&self) -> Result<GuardTicket<'_>, MediaError> {
        match self.lock.try_lock() {
            Ok(lock) => Ok(self.ticket(lock)),
            Err(TryLockError::Poisoned(poisoned)) => Ok(self.ticket(poisoned.into_inner())),
            Err(TryLockError::WouldBlock) => Err(MediaError::ConcurrencyRejected),
        }
    }

    fn ticket<'a>(&'a self, lock: MutexGuard<'a, ()>) -> GuardTicket<'a> {
        self.busy.store(true, Ordering::Release);
        GuardTicket {
            _lock: lock,
            busy: &self.busy,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
struct AdvanceState {
    running: bool,
    delay: Duration,
    media_start: Instant,
    current_kind: Option<MediaKind>,
    video_ended: bool,
}

struct ControllerInner {
    playlist: Arc<Mutex<PlaylistStore>>,
    guard: TransitionGuard,
    state: Mutex<AdvanceState>,
    events: EventSink,
    tick_interval: Duration,
    timer: Mutex<Option<JoinHandle<()>>>,
}

/// Arbitrates navigation between user actions, the timer and video end.
#[derive(Clone)]
pub struct TransitionController {
    inner: Arc<ControllerInner>,
}

impl TransitionController {
    pub fn new(
        playlist: Arc<Mutex<PlaylistStore>>,
        events: EventSink,
        delay: Duration,
        tick_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                playlist,
                guard: TransitionGuard::default(),
                state: Mutex::new(AdvanceState {
                    running: false,
                    delay,
                    media_start: Instant::now(),
                    current_kind: None,
                    video_ended: false,
                }),
                events,
                tick_interval,
                timer: Mutex::new(None),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, AdvanceState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_playlist(&self) -> MutexGuard<'_, PlaylistStore> {
        self.inner
            .playlist
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Shared playlist handle for the composition layer.
    pub fn playlist(&self) -> Arc<Mutex<PlaylistStore>> {
        Arc::clone(&self.inner.playlist)
    }

    pub fn navigate_next(&self) -> Option<usize> {
        let ticket = self.inner.guard.acquire();
        self.navigate(ticket, |playlist| {
            playlist.next();
        })
    }

    pub fn navigate_previous(&self) -> Option<usize> {
        let ticket = self.inner.guard.acquire();
        self.navigate(ticket, |playlist| {
            playlist.previous();
        })
    }

    pub fn navigate_to(&self, index: usize) -> Option<usize> {
        let ticket = self.inner.guard.acquire();
        self.navigate(ticket, |playlist| playlist.set_index(index))
    }

    /// Advance only if no other navigation is in progress.
    fn try_navigate_next(&self) -> Result<Option<usize>, MediaError> {
        let ticket = self.inner.guard.try_acquire()?;
        Ok(self.navigate(ticket, |playlist| {
            playlist.next();
        }))
    }

    /// Critical section: mutate the index, restart the media clock, announce
    /// the new index. `_ticket` is released on return.
    fn navigate(
        &self,
        _ticket: GuardTicket<'_>,
        mutate: impl FnOnce(&mut PlaylistStore),
    ) -> Option<usize> {
        let (index, kind) = {
            let mut playlist = self.lock_playlist();
            mutate(&mut playlist);
            (playlist.current_index()?, playlist.current_kind())
        };

        {
            let mut state = self.state();
            state.media_start = Instant::now();
            state.current_kind = kind;
            state.video_ended = false;
        }

        tracing::debug!("Navigating to index {}", index);
        self.inner
            .events
            .emit(SlideshowEvent::NavigateToIndex(index));
        Some(index)
    }

    /// The presentation layer finished showing an entry of `kind`.
    pub fn on_media_displayed(&self, kind: MediaKind) {
        let mut state = self.state();
        state.current_kind = Some(kind);
        state.video_ended = false;
    }

    /// The current video finished. While running, advances on the next
    /// runtime turn unless something else moved on first.
    pub fn on_video_ended(&self) -> Option<JoinHandle<()>> {
        let running = {
            let mut state = self.state();
            state.video_ended = true;
            state.running
        };
        if !running {
            return None;
        }

        let runtime = tokio::runtime::Handle::try_current().ok()?;
        let this = self.clone();
        Some(runtime.spawn(async move {
            tokio::task::yield_now().await;

            let still_due = {
                let state = this.state();
                state.running && state.video_ended
            };
            if !still_due {
                tracing::trace!("Video-end advance no longer needed");
                return;
            }
            if let Err(e) = this.try_navigate_next() {
                tracing::debug!("Video-end advance skipped: {}", e);
            }
        }))
    }

    /// Evaluate auto-advance now.
    pub fn tick(&self) -> bool {
        self.tick_at(Instant::now())
    }

    /// Evaluate auto-advance as of `now`. Returns whether it advanced.
    pub fn tick_at(&self, now: Instant) -> bool {
        let due = {
            let state = self.state();
            let elapsed = now.saturating_duration_since(state.media_start);
            let gated = state.current_kind == Some(MediaKind::Video) && !state.video_ended;
            state.running && elapsed >= state.delay && !gated
        };
        if !due || self.lock_playlist().is_empty() {
            return false;
        }

        match self.try_navigate_next() {
            Ok(index) => index.is_some(),
            Err(e) => {
                tracing::trace!("Auto-advance skipped: {}", e);
                false
            }
        }
    }

    /// Begin auto-advancing. The timer task needs a Tokio runtime; without
    /// one, callers drive [`tick`](TransitionController::tick) themselves.
    pub fn start(&self) {
        {
            let mut state = self.state();
            state.running = true;
            state.media_start = Instant::now();
        }

        let mut timer = self.inner.timer.lock().unwrap_or_else(PoisonError::into_inner);
        if timer.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("No runtime, auto-advance timer not started");
            return;
        };

        let this = self.clone();
        let period = self.inner.tick_interval;
        *timer = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if !this.is_running() {
                    break;
                }
                this.tick();
            }
        }));
        tracing::info!("Slideshow started");
    }

    pub fn stop(&self) {
        self.state().running = false;
        if let Some(handle) = self
            .inner
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
            tracing::info!("Slideshow stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.state().running
    }

    /// Whether a navigation currently holds the guard.
    pub fn is_busy(&self) -> bool {
        self.inner.guard.is_busy()
    }

    pub fn set_delay(&self, delay: Duration) {
        self.state().delay = delay;
    }

    pub fn delay(&self) -> Duration {
        self.state().delay
    }

    pub fn video_ended(&self) -> bool {
        self.state().video_ended
    }
}
