//! Fixed-size previews for list views.
//!
//! Images are decoded straight to thumbnail size. Videos go through the
//! optional frame backend, one extraction at a time; once the backend is
//! known to be unusable every video gets a flat placeholder without another
//! attempt.

use crate::backend::{BackendError, DecoderProbe, VideoFrame, VideoFrameBackend};
use crate::cache::{CacheStats, MediaCache};
use crate::config::SlideshowConfig;
use crate::error::MediaError;
use crate::loader::decode_bounded;
use crate::media::{path_key, MediaKind};
use anyhow::Result;
use image::imageops::FilterType;
use image::{DynamicImage, Rgba, RgbaImage};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Fill color of generated placeholders.
pub const PLACEHOLDER_COLOR: Rgba<u8> = Rgba([48, 48, 48, 255]);

/// A preview image.
#[derive(Debug, Clone)]
pub struct Thumbnail {
    image: RgbaImage,
    placeholder: bool,
}

impl Thumbnail {
    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Whether this is a generated stand-in rather than real content.
    pub fn is_placeholder(&self) -> bool {
        self.placeholder
    }
}

/// Sizing knobs for [`ThumbnailCache`].
#[derive(Debug, Clone, Copy)]
pub struct ThumbnailSettings {
    pub capacity: usize,
    /// Length of the longer output axis.
    pub size: u32,
    /// Per-axis cap on extracted video frames.
    pub max_video_frame_dimension: u32,
}

impl Default for ThumbnailSettings {
    fn default() -> Self {
        Self::from(&SlideshowConfig::default())
    }
}

impl From<&SlideshowConfig> for ThumbnailSettings {
    fn from(cfg: &SlideshowConfig) -> Self {
        Self {
            capacity: cfg.thumbnail_cache_capacity,
            size: cfg.thumbnail_size,
            max_video_frame_dimension: cfg.max_video_frame_dimension,
        }
    }
}

struct ThumbnailInner {
    cache: Mutex<MediaCache<Arc<Thumbnail>>>,
    backend: Option<Arc<dyn VideoFrameBackend>>,
    probe: Arc<DecoderProbe>,
    /// Serializes native extractions.
    extraction: Semaphore,
    settings: ThumbnailSettings,
    placeholder: OnceLock<Arc<Thumbnail>>,
}

/// LRU cache of thumbnails keyed by normalized path.
#[derive(Clone)]
pub struct ThumbnailCache {
    inner: Arc<ThumbnailInner>,
}

impl ThumbnailCache {
    pub fn new(
        settings: ThumbnailSettings,
        backend: Option<Arc<dyn VideoFrameBackend>>,
        probe: Arc<DecoderProbe>,
    ) -> Self {
        let settings = ThumbnailSettings {
            size: settings.size.max(1),
            max_video_frame_dimension: settings.max_video_frame_dimension.max(1),
            ..settings
        };
        Self {
            inner: Arc::new(ThumbnailInner {
                cache: Mutex::new(MediaCache::new("thumbnail", settings.capacity)),
                backend,
                probe,
                extraction: Semaphore::new(1),
                settings,
                placeholder: OnceLock::new(),
            }),
        }
    }

    fn cache(&self) -> MutexGuard<'_, MediaCache<Arc<Thumbnail>>> {
        self.inner.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn probe(&self) -> &Arc<DecoderProbe> {
        &self.inner.probe
    }

    /// Get the thumbnail for `path`.
    ///
    /// Returns `None` when the file is missing or undecodable, and also when
    /// another load for the same path is still in flight.
    pub async fn load_thumbnail(&self, path: &Path) -> Option<Arc<Thumbnail>> {
        let key = path_key(path);
        {
            let mut cache = self.cache();
            if let Some(hit) = cache.get(&key) {
                return Some(hit);
            }
            if !cache.begin_load(&key) {
                tracing::trace!("Thumbnail for {:?} already loading", path);
                return None;
            }
        }
        let mark = LoadingMark {
            thumbnails: self,
            key: Some(key),
        };

        let produced = self.produce(path).await;

        let key = mark.settle();
        let mut cache = self.cache();
        match produced {
            Some(thumb) if !thumb.is_placeholder() => {
                cache.insert(key, thumb.clone());
                Some(thumb)
            }
            other => {
                cache.finish_load(&key);
                other
            }
        }
    }

    async fn produce(&self, path: &Path) -> Option<Arc<Thumbnail>> {
        let kind = MediaKind::from_path(path)?;
        if !path.exists() {
            tracing::debug!("{}", MediaError::NotFound(path.to_path_buf()));
            return None;
        }

        match kind {
            MediaKind::Image | MediaKind::AnimatedImage => self.image_thumbnail(path).await,
            MediaKind::Video => Some(self.video_thumbnail(path).await),
        }
    }

    async fn image_thumbnail(&self, path: &Path) -> Option<Arc<Thumbnail>> {
        let size = self.inner.settings.size;
        let owned = path.to_path_buf();
        match tokio::task::spawn_blocking(move || decode_thumbnail(&owned, size)).await {
            Ok(Ok(image)) => Some(Arc::new(Thumbnail {
                image,
                placeholder: false,
            })),
            Ok(Err(e)) => {
                tracing::warn!("{}", MediaError::decode(path, format!("{e:#}")));
                None
            }
            Err(e) => {
                tracing::warn!("Thumbnail task for {:?} failed: {}", path, e);
                None
            }
        }
    }

    async fn video_thumbnail(&self, path: &Path) -> Arc<Thumbnail> {
        let probe = &self.inner.probe;
        if probe.is_unavailable() {
            return self.placeholder();
        }
        let Some(backend) = self.inner.backend.clone() else {
            probe.mark_unavailable(BackendError::MissingPath.to_string());
            return self.placeholder();
        };

        let Ok(_permit) = self.inner.extraction.acquire().await else {
            return self.placeholder();
        };
        // Another extraction may have settled the probe while we waited.
        if probe.is_unavailable() {
            return self.placeholder();
        }

        let settings = self.inner.settings;
        let owned = path.to_path_buf();
        let extracted = tokio::task::spawn_blocking(move || {
            extract_frame(backend.as_ref(), &owned, settings.max_video_frame_dimension)
        })
        .await
        .unwrap_or_else(|e| Err(BackendError::Failed(format!("extraction task failed: {e}"))));

        match extracted {
            Ok(frame) => {
                probe.mark_available(None);
                let image = scale_to_target(
                    DynamicImage::ImageRgba8(frame.image),
                    settings.size,
                );
                Arc::new(Thumbnail {
                    image,
                    placeholder: false,
                })
            }
            Err(e) => {
                if probe.mark_unavailable(e.to_string()) {
                    tracing::warn!(
                        "{}, using placeholders for video thumbnails",
                        MediaError::BackendUnavailable(e.to_string())
                    );
                } else {
                    tracing::debug!("Frame extraction for {:?} failed: {}", path, e);
                }
                self.placeholder()
            }
        }
    }

    /// The shared flat-color placeholder.
    pub fn placeholder(&self) -> Arc<Thumbnail> {
        self.inner
            .placeholder
            .get_or_init(|| {
                let width = self.inner.settings.size;
                let height = (width * 3 / 4).max(1);
                Arc::new(Thumbnail {
                    image: RgbaImage::from_pixel(width, height, PLACEHOLDER_COLOR),
                    placeholder: true,
                })
            })
            .clone()
    }

    /// Load up to `max_count` thumbnails in the background, discarding
    /// results. Nothing is spawned outside a tokio runtime.
    pub fn preload_thumbnails(&self, paths: &[PathBuf], max_count: usize) -> Vec<JoinHandle<()>> {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return Vec::new();
        };

        paths
            .iter()
            .filter(|p| !self.is_cached(p))
            .take(max_count)
            .map(|path| {
                let cache = self.clone();
                let path = path.clone();
                runtime.spawn(async move {
                    let _ = cache.load_thumbnail(&path).await;
                })
            })
            .collect()
    }

    pub fn clear_cache(&self) {
        self.cache().clear();
    }

    pub fn is_cached(&self, path: &Path) -> bool {
        self.cache().contains(&path_key(path))
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache().stats()
    }
}

/// In-flight mark for one key. Clears the mark if the load is dropped
/// before it settles.
struct LoadingMark<'a> {
    thumbnails: &'a ThumbnailCache,
    key: Option<String>,
}

impl LoadingMark<'_> {
    /// Hand the key back to the completing load, which clears the mark.
    fn settle(mut self) -> String {
        self.key.take().unwrap_or_default()
    }
}

impl Drop for LoadingMark<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            tracing::trace!("Thumbnail load for {} abandoned", key);
            self.thumbnails.cache().finish_load(&key);
        }
    }
}

impl std::fmt::Debug for ThumbnailCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThumbnailCache")
            .field("settings", &self.inner.settings)
            .field("backend", &self.inner.backend.is_some())
            .field("probe", &self.inner.probe.get())
            .field("cache", &self.cache_stats())
            .finish()
    }
}

fn scale_to_target(img: DynamicImage, size: u32) -> RgbaImage {
    img.resize(size, size, FilterType::Triangle).into_rgba8()
}

fn decode_thumbnail(path: &Path, size: u32) -> Result<RgbaImage> {
    let (img, _) = decode_bounded(path, (size, size))?;
    Ok(scale_to_target(img, size))
}

/// Pull the first frame through the backend, always closing the handle.
fn extract_frame(
    backend: &dyn VideoFrameBackend,
    path: &Path,
    max_dimension: u32,
) -> Result<VideoFrame, BackendError> {
    let handle = backend.open(path)?;
    let frame = backend.frame_at(&handle, Duration::ZERO, max_dimension);
    backend.close(handle);

    let frame = frame?;
    let (width, height) = frame.dimensions();
    if width <= max_dimension && height <= max_dimension {
        return Ok(frame);
    }

    tracing::debug!(
        "Capping {}x{} frame from {:?} to {}",
        width,
        height,
        path,
        max_dimension
    );
    let image = DynamicImage::ImageRgba8(frame.image)
        .resize(max_dimension, max_dimension, FilterType::Triangle)
        .into_rgba8();
    Ok(VideoFrame { image })
}

/// A thumbnail that finished loading for a visible-range request.
#[derive(Debug, Clone)]
pub struct ThumbnailReady {
    pub path: PathBuf,
    pub thumbnail: Arc<Thumbnail>,
}

/// Loads thumbnails for whatever a scrolling list currently shows.
///
/// Each request cancels the previous batch and waits out a debounce window
/// first, so fast scrolling does not stack extraction waves. Dropping the
/// loader cancels the batch in flight.
pub struct VisibleRangeLoader {
    thumbnails: ThumbnailCache,
    debounce: Duration,
    current: Mutex<Option<CancellationToken>>,
    ready: mpsc::Sender<ThumbnailReady>,
}

impl VisibleRangeLoader {
    pub fn new(
        thumbnails: ThumbnailCache,
        debounce: Duration,
    ) -> (Self, mpsc::Receiver<ThumbnailReady>) {
        let (ready, rx) = mpsc::channel(64);
        let loader = Self {
            thumbnails,
            debounce,
            current: Mutex::new(None),
            ready,
        };
        (loader, rx)
    }

    fn current(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the pending batch with `paths`. Outside a tokio runtime
    /// nothing is spawned and the pending batch is left alone.
    pub fn request(&self, paths: Vec<PathBuf>) -> Option<JoinHandle<()>> {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("No runtime available, skipping visible range");
            return None;
        };
        let token = CancellationToken::new();
        if let Some(previous) = self.current().replace(token.clone()) {
            previous.cancel();
        }

        let thumbnails = self.thumbnails.clone();
        let ready = self.ready.clone();
        let debounce = self.debounce;

        Some(runtime.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(debounce) => {}
            }

            tracing::debug!("Loading {} visible thumbnails", paths.len());
            for path in paths {
                if token.is_cancelled() {
                    tracing::trace!("Visible range superseded");
                    return;
                }
                let Some(thumbnail) = thumbnails.load_thumbnail(&path).await else {
                    continue;
                };
                if token.is_cancelled() {
                    return;
                }
                if ready.send(ThumbnailReady { path, thumbnail }).await.is_err() {
                    return;
                }
            }
        }))
    }

    /// Cancel the batch in flight, e.g. on resize or window close.
    pub fn cancel(&self) {
        if let Some(token) = self.current().take() {
            token.cancel();
        }
    }
}

impl Drop for VisibleRangeLoader {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Backend double counting calls; fails or returns a fixed frame.
    struct SpyBackend {
        opens: AtomicUsize,
        closes: AtomicUsize,
        frame: Option<(u32, u32)>,
        delay: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        entered: AtomicBool,
        requested_cap: AtomicUsize,
    }

    impl SpyBackend {
        fn failing() -> Self {
            Self::new(None, Duration::ZERO)
        }

        fn new(frame: Option<(u32, u32)>, delay: Duration) -> Self {
            Self {
                opens: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
                frame,
                delay,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                entered: AtomicBool::new(false),
                requested_cap: AtomicUsize::new(0),
            }
        }
    }

    impl VideoFrameBackend for SpyBackend {
        fn open(&self, path: &Path) -> Result<crate::backend::VideoHandle, BackendError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if self.frame.is_none() {
                return Err(BackendError::MissingEntryPoint(PathBuf::from("/opt/ffmpeg")));
            }
            Ok(crate::backend::VideoHandle {
                id: 1,
                path: path.to_path_buf(),
            })
        }

        fn frame_at(
            &self,
            _handle: &crate::backend::VideoHandle,
            _timestamp: Duration,
            max_dimension: u32,
        ) -> Result<VideoFrame, BackendError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.entered.store(true, Ordering::SeqCst);
            self.requested_cap
                .store(max_dimension as usize, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let (w, h) = self.frame.unwrap_or((1, 1));
            Ok(VideoFrame {
                image: RgbaImage::from_pixel(w, h, Rgba([200, 10, 10, 255])),
            })
        }

        fn close(&self, _handle: crate::backend::VideoHandle) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn settings(size: u32, cap: u32) -> ThumbnailSettings {
        ThumbnailSettings {
            capacity: 200,
            size,
            max_video_frame_dimension: cap,
        }
    }

    fn touch(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, b"not really a video").unwrap();
        path
    }

    fn write_png(dir: &TempDir, name: &str, width: u32, height: u32) -> PathBuf {
        let path = dir.path().join(name);
        RgbaImage::from_pixel(width, height, Rgba([1, 2, 3, 255]))
            .save(&path)
            .unwrap();
        path
    }

    #[tokio::test]
    async fn image_thumbnail_keeps_aspect_ratio() {
        let dir = tempfile::tempdir().unwrap();
        let wide = write_png(&dir, "wide.png", 320, 160);
        let tall = write_png(&dir, "tall.png", 100, 400);
        let cache = ThumbnailCache::new(settings(160, 4096), None, Arc::new(DecoderProbe::new()));

        let thumb = cache.load_thumbnail(&wide).await.unwrap();
        assert_eq!(thumb.dimensions(), (160, 80));
        assert!(!thumb.is_placeholder());

        let thumb = cache.load_thumbnail(&tall).await.unwrap();
        assert_eq!(thumb.dimensions(), (40, 160));
        assert!(cache.is_cached(&wide));
    }

    #[tokio::test]
    async fn cached_thumbnail_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(&dir, "a.png", 32, 32);
        let cache = ThumbnailCache::new(settings(16, 4096), None, Arc::new(DecoderProbe::new()));

        let a = cache.load_thumbnail(&path).await.unwrap();
        let b = cache.load_thumbnail(&path).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.cache_stats().hits, 1);
    }

    #[tokio::test]
    async fn missing_or_unsupported_files_yield_none() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ThumbnailCache::new(settings(16, 4096), None, Arc::new(DecoderProbe::new()));
        assert!(cache.load_thumbnail(&dir.path().join("gone.png")).await.is_none());

        let text = touch(&dir, "notes.txt");
        assert!(cache.load_thumbnail(&text).await.is_none());

        let corrupt = touch(&dir, "corrupt.jpg");
        assert!(cache.load_thumbnail(&corrupt).await.is_none());
        assert!(!cache.cache().is_loading(&path_key(&corrupt)));
    }

    #[tokio::test]
    async fn unavailable_backend_is_probed_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let spy = Arc::new(SpyBackend::failing());
        let probe = Arc::new(DecoderProbe::new());
        let cache = ThumbnailCache::new(settings(64, 4096), Some(spy.clone()), probe.clone());

        for i in 0..6 {
            let path = touch(&dir, &format!("clip{i}.mp4"));
            let thumb = cache.load_thumbnail(&path).await.unwrap();
            assert!(thumb.is_placeholder());
        }

        assert_eq!(spy.opens.load(Ordering::SeqCst), 1);
        assert!(probe.is_unavailable());
    }

    #[tokio::test]
    async fn reset_probe_allows_a_new_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let spy = Arc::new(SpyBackend::failing());
        let probe = Arc::new(DecoderProbe::new());
        let cache = ThumbnailCache::new(settings(64, 4096), Some(spy.clone()), probe.clone());
        let path = touch(&dir, "clip.mp4");

        cache.load_thumbnail(&path).await.unwrap();
        cache.load_thumbnail(&path).await.unwrap();
        assert_eq!(spy.opens.load(Ordering::SeqCst), 1);

        probe.reset();
        cache.load_thumbnail(&path).await.unwrap();
        assert_eq!(spy.opens.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn missing_backend_marks_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let probe = Arc::new(DecoderProbe::new());
        let cache = ThumbnailCache::new(settings(64, 4096), None, probe.clone());

        let thumb = cache.load_thumbnail(&touch(&dir, "clip.mkv")).await.unwrap();
        assert!(thumb.is_placeholder());
        assert_eq!(thumb.dimensions(), (64, 48));
        assert!(probe.is_unavailable());
    }

    #[tokio::test]
    async fn video_frames_are_capped_then_scaled() {
        let dir = tempfile::tempdir().unwrap();
        let spy = Arc::new(SpyBackend::new(Some((400, 200)), Duration::ZERO));
        let probe = Arc::new(DecoderProbe::new());
        let cache = ThumbnailCache::new(settings(50, 100), Some(spy.clone()), probe.clone());
        let path = touch(&dir, "clip.mp4");

        let thumb = cache.load_thumbnail(&path).await.unwrap();
        assert!(!thumb.is_placeholder());
        assert_eq!(thumb.dimensions(), (50, 25));
        assert_eq!(spy.requested_cap.load(Ordering::SeqCst), 100);
        assert_eq!(spy.closes.load(Ordering::SeqCst), 1);
        assert!(matches!(
            probe.get(),
            crate::backend::DecoderAvailability::Available(_)
        ));
        assert!(cache.is_cached(&path));
    }

    #[test]
    fn oversized_frames_are_capped() {
        let spy = SpyBackend::new(Some((300, 150)), Duration::ZERO);
        let frame = extract_frame(&spy, Path::new("/clip.mp4"), 100).unwrap();
        assert_eq!(frame.dimensions(), (100, 50));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn extractions_run_one_at_a_time() {
        let dir = tempfile::tempdir().unwrap();
        let spy = Arc::new(SpyBackend::new(Some((16, 16)), Duration::from_millis(20)));
        let cache = ThumbnailCache::new(
            settings(8, 4096),
            Some(spy.clone()),
            Arc::new(DecoderProbe::new()),
        );

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let cache = cache.clone();
                let path = touch(&dir, &format!("clip{i}.mp4"));
                tokio::spawn(async move { cache.load_thumbnail(&path).await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().is_some());
        }

        assert_eq!(spy.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(spy.opens.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn duplicate_request_in_flight_is_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let spy = Arc::new(SpyBackend::new(Some((16, 16)), Duration::from_millis(200)));
        let cache = ThumbnailCache::new(
            settings(8, 4096),
            Some(spy.clone()),
            Arc::new(DecoderProbe::new()),
        );
        let path = touch(&dir, "clip.mp4");

        let first = {
            let cache = cache.clone();
            let path = path.clone();
            tokio::spawn(async move { cache.load_thumbnail(&path).await })
        };
        while !spy.entered.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        assert!(cache.load_thumbnail(&path).await.is_none());
        assert!(first.await.unwrap().is_some());
        assert!(cache.load_thumbnail(&path).await.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn abandoned_load_does_not_block_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let spy = Arc::new(SpyBackend::new(Some((16, 16)), Duration::from_millis(200)));
        let cache = ThumbnailCache::new(
            settings(8, 4096),
            Some(spy.clone()),
            Arc::new(DecoderProbe::new()),
        );
        let path = touch(&dir, "clip.mp4");

        let abandoned = {
            let cache = cache.clone();
            let path = path.clone();
            tokio::spawn(async move { cache.load_thumbnail(&path).await })
        };
        while !spy.entered.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        abandoned.abort();
        assert!(abandoned.await.unwrap_err().is_cancelled());
        assert!(!cache.cache().is_loading(&path_key(&path)));

        let thumb = cache.load_thumbnail(&path).await.unwrap();
        assert!(!thumb.is_placeholder());
        assert_eq!(spy.opens.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn preload_respects_max_count() {
        let dir = tempfile::tempdir().unwrap();
        let paths: Vec<_> = (0..5)
            .map(|i| write_png(&dir, &format!("p{i}.png"), 8, 8))
            .collect();
        let cache = ThumbnailCache::new(settings(4, 4096), None, Arc::new(DecoderProbe::new()));

        for handle in cache.preload_thumbnails(&paths, 3) {
            handle.await.unwrap();
        }
        assert_eq!(cache.cache_stats().item_count, 3);

        cache.clear_cache();
        assert_eq!(cache.cache_stats().item_count, 0);
    }

    #[tokio::test]
    async fn newer_visible_range_supersedes_older() {
        let dir = tempfile::tempdir().unwrap();
        let old: Vec<_> = (0..3)
            .map(|i| write_png(&dir, &format!("old{i}.png"), 8, 8))
            .collect();
        let new: Vec<_> = (0..2)
            .map(|i| write_png(&dir, &format!("new{i}.png"), 8, 8))
            .collect();
        let cache = ThumbnailCache::new(settings(4, 4096), None, Arc::new(DecoderProbe::new()));
        let (loader, mut rx) = VisibleRangeLoader::new(cache.clone(), Duration::from_millis(30));

        let stale = loader.request(old.clone()).unwrap();
        let fresh = loader.request(new.clone()).unwrap();
        stale.await.unwrap();
        fresh.await.unwrap();

        let mut delivered = Vec::new();
        while let Ok(ready) = rx.try_recv() {
            delivered.push(ready.path);
        }
        assert_eq!(delivered, new);
        assert!(old.iter().all(|p| !cache.is_cached(p)));
    }

    #[tokio::test]
    async fn cancel_stops_pending_batch() {
        let dir = tempfile::tempdir().unwrap();
        let paths = vec![write_png(&dir, "a.png", 8, 8)];
        let cache = ThumbnailCache::new(settings(4, 4096), None, Arc::new(DecoderProbe::new()));
        let (loader, mut rx) = VisibleRangeLoader::new(cache.clone(), Duration::from_millis(30));

        let handle = loader.request(paths.clone()).unwrap();
        loader.cancel();
        handle.await.unwrap();

        assert!(rx.try_recv().is_err());
        assert!(!cache.is_cached(&paths[0]));
    }

    #[test]
    fn visible_range_outside_runtime_spawns_nothing() {
        let cache = ThumbnailCache::new(settings(4, 4096), None, Arc::new(DecoderProbe::new()));
        let (loader, _rx) = VisibleRangeLoader::new(cache, Duration::from_millis(30));
        assert!(loader.request(vec![PathBuf::from("/a.png")]).is_none());
    }
}
