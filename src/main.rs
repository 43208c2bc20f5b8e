use anyhow::{Context, Result};
use slideshow_core::events::DEFAULT_EVENT_CAPACITY;
use slideshow_core::video::PlaybackSurface;
use slideshow_core::{
    DecoderProbe, EventSink, FfmpegBackend, MediaKind, MediaLoader, PlayCallbacks, PlaylistStore,
    SlideshowConfig, SlideshowEvent, ThumbnailCache, ThumbnailSettings, TransitionController,
    VideoCoordinator, VideoFrameBackend, VisibleRangeLoader,
};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
#[cfg(not(feature = "gstreamer"))]
use {slideshow_core::SurfaceEvent, std::time::Instant};

const DEFAULT_CONFIG_PATH: &str = "slideshow.toml";
/// Thumbnails requested up front for the first screen of a list view.
const INITIAL_THUMBNAILS: usize = 24;
const SURFACE_PUMP_INTERVAL: Duration = Duration::from_millis(50);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = SlideshowConfig::load(Some(&config_path))
        .with_context(|| format!("Failed to load {:?}", config_path))?;

    #[cfg(feature = "gstreamer")]
    {
        slideshow_core::gst_surface::GstSurface::init()?;
        run(config, slideshow_core::gst_surface::GstSurface::new()).await
    }
    #[cfg(not(feature = "gstreamer"))]
    {
        run(config, HeadlessSurface::default()).await
    }
}

async fn run<S: PlaybackSurface>(config: SlideshowConfig, surface: S) -> Result<()> {
    let (events, mut event_rx) = EventSink::channel(DEFAULT_EVENT_CAPACITY);

    let mut store = PlaylistStore::new(events.clone());
    store.load_entries(&config.folders, config.include_videos);
    store.sort(config.sort_mode);
    if store.is_empty() {
        tracing::warn!("No media found in {:?}", config.folders);
        return Ok(());
    }
    tracing::info!("Loaded {} media entries", store.len());
    let initial_paths: Vec<PathBuf> = store.paths().into_iter().take(INITIAL_THUMBNAILS).collect();
    let playlist = Arc::new(Mutex::new(store));

    let controller = TransitionController::new(
        Arc::clone(&playlist),
        events.clone(),
        config.slide_delay(),
        config.tick_interval(),
    );
    let loader = MediaLoader::new(config.image_cache_capacity, config.max_decode_dimension);
    let video = VideoCoordinator::new(surface, events.clone(), config.progress_interval());

    let backend: Arc<dyn VideoFrameBackend> =
        Arc::new(FfmpegBackend::new(config.ffmpeg_path.clone()));
    let thumbnails = ThumbnailCache::new(
        ThumbnailSettings::from(&config),
        Some(backend),
        Arc::new(DecoderProbe::new()),
    );
    let (visible_range, mut thumbnail_rx) =
        VisibleRangeLoader::new(thumbnails.clone(), config.visible_range_debounce());
    visible_range.request(initial_paths);

    controller.start();
    controller.navigate_next();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut pump = tokio::time::interval(SURFACE_PUMP_INTERVAL);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Shutting down");
                break;
            }
            Some(event) = event_rx.recv() => {
                handle_event(event, &playlist, &controller, &loader, &video).await;
            }
            Some(ready) = thumbnail_rx.recv() => {
                let (w, h) = ready.thumbnail.dimensions();
                tracing::debug!("Thumbnail ready for {:?} ({}x{})", ready.path, w, h);
            }
            _ = pump.tick() => {
                video.pump_surface_events();
            }
        }
    }

    controller.stop();
    visible_range.cancel();
    video.dispose();

    let stats = loader.cache_stats();
    tracing::info!(
        "Image cache: {} hits, {} misses, {} evictions",
        stats.hits,
        stats.misses,
        stats.evictions
    );
    tracing::info!("Thumbnail backend: {}", thumbnails.probe().get());
    Ok(())
}

async fn handle_event<S: PlaybackSurface>(
    event: SlideshowEvent,
    playlist: &Arc<Mutex<PlaylistStore>>,
    controller: &TransitionController,
    loader: &MediaLoader,
    video: &VideoCoordinator<S>,
) {
    let index = match event {
        SlideshowEvent::NavigateToIndex(index) => index,
        SlideshowEvent::ProgressUpdated(ratio) => {
            tracing::trace!("Video progress {:.1}%", ratio * 100.0);
            return;
        }
        other => {
            tracing::debug!("Event: {:?}", other);
            return;
        }
    };

    let (entry, entries) = {
        let playlist = playlist.lock().unwrap_or_else(PoisonError::into_inner);
        (playlist.entry(index).cloned(), playlist.entries().to_vec())
    };
    let Some(entry) = entry else {
        return;
    };
    tracing::info!("Showing [{}] {:?} ({})", index, entry.path(), entry.kind());

    match entry.kind() {
        MediaKind::Image => {
            video.stop();
            match loader.load_image(entry.path(), None).await {
                Some(image) => tracing::debug!("Decoded {}x{}", image.width(), image.height()),
                None => tracing::warn!("Could not display {:?}", entry.path()),
            }
            controller.on_media_displayed(MediaKind::Image);
            loader.preload_neighbors(&entries, index, None);
        }
        MediaKind::AnimatedImage => {
            video.stop();
            match loader.load_animated_image(entry.path(), None).await {
                Some(animation) => {
                    let (w, h) = animation.dimensions();
                    tracing::debug!("Animation {}x{}", w, h);
                }
                None => tracing::warn!("Could not display {:?}", entry.path()),
            }
            controller.on_media_displayed(MediaKind::AnimatedImage);
            loader.preload_neighbors(&entries, index, None);
        }
        MediaKind::Video => {
            controller.on_media_displayed(MediaKind::Video);
            let on_end = controller.clone();
            let callbacks = PlayCallbacks::new().on_ended(move || {
                on_end.on_video_ended();
            });
            match video.load_and_play(entry.path().to_string_lossy(), callbacks) {
                Some(pending) => {
                    video.spawn_deferred_play(pending);
                }
                None => {
                    // Unplayable: let auto-advance move past it.
                    controller.on_video_ended();
                }
            }
        }
    }
}

/// Length every clip pretends to have on the headless surface.
#[cfg(not(feature = "gstreamer"))]
const HEADLESS_CLIP_LENGTH: Duration = Duration::from_secs(8);

/// Surface without a decoder: reports open immediately and ends after a
/// fixed clip length.
#[cfg(not(feature = "gstreamer"))]
#[derive(Default)]
struct HeadlessSurface {
    source: Option<String>,
    started: Option<Instant>,
    offset: Duration,
    opened_reported: bool,
    ended_reported: bool,
    muted: bool,
    visible: bool,
}

#[cfg(not(feature = "gstreamer"))]
impl PlaybackSurface for HeadlessSurface {
    fn set_source(&mut self, source: Option<&str>) -> Result<()> {
        *self = Self {
            source: source.map(str::to_string),
            muted: self.muted,
            visible: self.visible,
            ..Self::default()
        };
        Ok(())
    }

    fn source(&self) -> Option<String> {
        self.source.clone()
    }

    fn play(&mut self) -> Result<()> {
        self.started.get_or_insert_with(Instant::now);
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        if let Some(started) = self.started.take() {
            self.offset += started.elapsed();
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.started = None;
        self.offset = Duration::ZERO;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.stop()
    }

    fn seek(&mut self, position: Duration) -> Result<()> {
        self.offset = position.min(HEADLESS_CLIP_LENGTH);
        if self.started.is_some() {
            self.started = Some(Instant::now());
        }
        self.ended_reported = false;
        Ok(())
    }

    fn position(&self) -> Option<Duration> {
        self.source.as_ref()?;
        let running = self.started.map(|s| s.elapsed()).unwrap_or_default();
        Some((self.offset + running).min(HEADLESS_CLIP_LENGTH))
    }

    fn natural_duration(&self) -> Option<Duration> {
        self.source.as_ref().map(|_| HEADLESS_CLIP_LENGTH)
    }

    fn natural_dimensions(&self) -> Option<(u32, u32)> {
        None
    }

    fn is_muted(&self) -> bool {
        self.muted
    }

    fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    fn poll_event(&mut self) -> Option<SurfaceEvent> {
        self.source.as_ref()?;
        if !self.opened_reported {
            self.opened_reported = true;
            return Some(SurfaceEvent::Opened);
        }
        let finished = self.started.is_some() && self.position() >= Some(HEADLESS_CLIP_LENGTH);
        if finished && !self.ended_reported {
            self.ended_reported = true;
            return Some(SurfaceEvent::Ended);
        }
        None
    }
}
