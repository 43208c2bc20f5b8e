//! Background image and animated-image loading.
//!
//! Still images are decoded off the async runtime, bounded in size, and kept
//! in a small LRU cache so neighbor preloads make navigation instant.
//! Animated images are never cached: they are handed out as a streaming
//! frame source instead.

use crate::cache::{CacheStats, MediaCache};
use crate::error::MediaError;
use crate::media::{path_key, MediaEntry, MediaKind};
use crate::orientation::{read_orientation, Orientation};
use crate::playlist::neighbor_indices;
use anyhow::{Context, Result};
use image::codecs::gif::GifDecoder;
use image::imageops::FilterType;
use image::{AnimationDecoder, DynamicImage, ImageDecoder, ImageReader, Limits, RgbaImage};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

/// A decoded still image. Immutable once built; shared through `Arc`.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    image: RgbaImage,
    orientation: Orientation,
    source_dimensions: (u32, u32),
}

impl LoadedImage {
    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// EXIF orientation the presentation layer should apply.
    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    /// Dimensions of the file before any downscaling.
    pub fn source_dimensions(&self) -> (u32, u32) {
        self.source_dimensions
    }

    /// Pixels with the orientation baked in.
    pub fn oriented(&self) -> RgbaImage {
        self.orientation.apply(&self.image)
    }
}

/// One frame of an animated image.
#[derive(Debug, Clone)]
pub struct AnimationFrame {
    pub image: RgbaImage,
    pub delay: Duration,
}

/// An animated image opened for progressive playback.
///
/// Only the first frame is decoded up front; [`AnimatedImage::frames`]
/// streams the rest straight from the file on each pass.
#[derive(Debug, Clone)]
pub struct AnimatedImage {
    path: PathBuf,
    width: u32,
    height: u32,
    bound: (u32, u32),
    first_frame: AnimationFrame,
}

impl AnimatedImage {
    fn open(path: &Path, bound: (u32, u32)) -> Result<Self> {
        let (width, height) = gif_decoder(path)?.dimensions();
        let first_frame = stream_frames(path, bound)?
            .next()
            .with_context(|| format!("{:?} contains no frames", path))?;

        Ok(Self {
            path: path.to_path_buf(),
            width,
            height,
            bound,
            first_frame,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Logical screen size of the animation as stored in the file.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn first_frame(&self) -> &AnimationFrame {
        &self.first_frame
    }

    /// Start a fresh pass over the frames. Decoding happens lazily as the
    /// iterator advances; a corrupt frame ends the pass.
    pub fn frames(&self) -> Result<impl Iterator<Item = AnimationFrame>> {
        stream_frames(&self.path, self.bound)
    }
}

fn gif_decoder(path: &Path) -> Result<GifDecoder<BufReader<File>>> {
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    GifDecoder::new(BufReader::new(file)).with_context(|| format!("Failed to read {:?}", path))
}

fn stream_frames(path: &Path, bound: (u32, u32)) -> Result<impl Iterator<Item = AnimationFrame>> {
    let frames: image::Frames<'static> = gif_decoder(path)?.into_frames();
    Ok(frames.map_while(|frame| frame.ok()).map(move |frame| {
        let delay = Duration::from(frame.delay());
        let image = fit_within(DynamicImage::ImageRgba8(frame.into_buffer()), bound).into_rgba8();
        AnimationFrame { image, delay }
    }))
}

/// Bytes per pixel of the widest integer layout a decoder may produce (RGBA16).
const DECODE_BYTES_PER_PIXEL: u64 = 8;
/// Ceiling on a single decode allocation, whatever the source claims.
const MAX_DECODE_ALLOC: u64 = 4 * 1024 * 1024 * 1024;

/// Shrink `image` to fit `bound`, keeping its pixel layout.
fn fit_within(image: DynamicImage, (max_w, max_h): (u32, u32)) -> DynamicImage {
    if image.width() <= max_w && image.height() <= max_h {
        return image;
    }
    // Resampling filters keep a float copy at source width; box-filter
    // large reductions down first.
    let (pre_w, pre_h) = (max_w.saturating_mul(2), max_h.saturating_mul(2));
    let image = if image.width() > pre_w || image.height() > pre_h {
        image.thumbnail(pre_w, pre_h)
    } else {
        image
    };
    image.resize(max_w, max_h, FilterType::Triangle)
}

fn open_reader(path: &Path) -> Result<ImageReader<BufReader<File>>> {
    ImageReader::open(path)
        .with_context(|| format!("Failed to open {:?}", path))?
        .with_guessed_format()
        .context("Failed to detect image format")
}

/// Decoder limits sized to the source instead of the crate defaults, so
/// large originals still decode. The output side is bounded by the resize.
fn decode_limits((width, height): (u32, u32)) -> Limits {
    let needed = u64::from(width) * u64::from(height) * DECODE_BYTES_PER_PIXEL;
    let mut limits = Limits::default();
    limits.max_image_width = Some(width);
    limits.max_image_height = Some(height);
    limits.max_alloc = Some(needed.max(limits.max_alloc.unwrap_or(0)).min(MAX_DECODE_ALLOC));
    limits
}

/// Decode `path` and downscale it to fit `bound` before any format
/// conversion. Returns the image and the source dimensions.
pub(crate) fn decode_bounded(
    path: &Path,
    bound: (u32, u32),
) -> Result<(DynamicImage, (u32, u32))> {
    let source_dimensions = open_reader(path)?
        .into_dimensions()
        .context("Failed to read image header")?;

    let mut reader = open_reader(path)?;
    reader.limits(decode_limits(source_dimensions));
    let img = reader.decode().context("Failed to decode image")?;

    Ok((fit_within(img, bound), source_dimensions))
}

/// Decode a still image, downscaling to fit `bound`.
fn decode_image(path: &Path, bound: (u32, u32)) -> Result<LoadedImage> {
    let orientation = read_orientation(path);
    let (img, source_dimensions) = decode_bounded(path, bound)?;
    let image = img.into_rgba8();

    tracing::debug!(
        "Decoded {:?}: {}x{} -> {}x{} ({:?})",
        path,
        source_dimensions.0,
        source_dimensions.1,
        image.width(),
        image.height(),
        orientation
    );

    Ok(LoadedImage {
        image,
        orientation,
        source_dimensions,
    })
}

struct LoaderInner {
    cache: Mutex<MediaCache<Arc<LoadedImage>>>,
    orientations: Mutex<HashMap<String, Orientation>>,
    /// Per-axis ceiling applied to every decode.
    hard_max: u32,
}

/// Loads images for display and keeps the recent ones decoded.
#[derive(Clone)]
pub struct MediaLoader {
    inner: Arc<LoaderInner>,
}

impl MediaLoader {
    pub fn new(cache_capacity: usize, hard_max: u32) -> Self {
        Self {
            inner: Arc::new(LoaderInner {
                cache: Mutex::new(MediaCache::new("image", cache_capacity)),
                orientations: Mutex::new(HashMap::new()),
                hard_max: hard_max.max(1),
            }),
        }
    }

    fn cache(&self) -> MutexGuard<'_, MediaCache<Arc<LoadedImage>>> {
        self.inner.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn orientations(&self) -> MutexGuard<'_, HashMap<String, Orientation>> {
        self.inner
            .orientations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn decode_bound(&self, max_decode_width: Option<u32>) -> (u32, u32) {
        let hard = self.inner.hard_max;
        let width = max_decode_width.map_or(hard, |w| w.clamp(1, hard));
        (width, hard)
    }

    /// Load a still image, from cache when possible.
    ///
    /// Returns `None` if the file is missing or cannot be decoded.
    pub async fn load_image(
        &self,
        path: &Path,
        max_decode_width: Option<u32>,
    ) -> Option<Arc<LoadedImage>> {
        let key = path_key(path);
        if let Some(hit) = self.cache().get(&key) {
            return Some(hit);
        }

        if !path.exists() {
            tracing::debug!("{}", MediaError::NotFound(path.to_path_buf()));
            return None;
        }

        let bound = self.decode_bound(max_decode_width);
        let owned = path.to_path_buf();
        let decoded = tokio::task::spawn_blocking(move || decode_image(&owned, bound)).await;

        match decoded {
            Ok(Ok(image)) => {
                let image = Arc::new(image);
                self.orientations().insert(key.clone(), image.orientation());
                self.cache().insert(key, image.clone());
                Some(image)
            }
            Ok(Err(e)) => {
                tracing::warn!("{}", MediaError::decode(path, format!("{e:#}")));
                None
            }
            Err(e) => {
                tracing::warn!("Decode task for {:?} failed: {}", path, e);
                None
            }
        }
    }

    /// Open an animated image for streaming playback. Not cached.
    pub async fn load_animated_image(
        &self,
        path: &Path,
        max_decode_width: Option<u32>,
    ) -> Option<AnimatedImage> {
        if !path.exists() {
            tracing::debug!("{}", MediaError::NotFound(path.to_path_buf()));
            return None;
        }

        let bound = self.decode_bound(max_decode_width);
        let owned = path.to_path_buf();
        match tokio::task::spawn_blocking(move || AnimatedImage::open(&owned, bound)).await {
            Ok(Ok(animation)) => Some(animation),
            Ok(Err(e)) => {
                tracing::warn!("{}", MediaError::decode(path, format!("{e:#}")));
                None
            }
            Err(e) => {
                tracing::warn!("Decode task for {:?} failed: {}", path, e);
                None
            }
        }
    }

    /// Warm the cache for the circular neighbors of `current_index`.
    ///
    /// Loads run in the background and their outcome is discarded; dropping
    /// the returned handles does not cancel them. Must be called from within
    /// a tokio runtime, otherwise nothing is spawned.
    pub fn preload_neighbors(
        &self,
        entries: &[MediaEntry],
        current_index: usize,
        max_decode_width: Option<u32>,
    ) -> Vec<JoinHandle<()>> {
        let Some((next, previous)) = neighbor_indices(entries.len(), current_index) else {
            return Vec::new();
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("No runtime available, skipping preload");
            return Vec::new();
        };

        let mut targets = vec![next];
        if previous != next {
            targets.push(previous);
        }

        targets
            .into_iter()
            .filter(|&i| i != current_index)
            .map(|i| &entries[i])
            .filter(|entry| entry.kind() == MediaKind::Image)
            .map(|entry| {
                let loader = self.clone();
                let path = entry.path().to_path_buf();
                tracing::debug!("Preloading media: {:?}", path);
                runtime.spawn(async move {
                    let _ = loader.load_image(&path, max_decode_width).await;
                })
            })
            .collect()
    }

    /// Drop every cached image.
    pub fn clear_cache(&self) {
        self.cache().clear();
    }

    /// Whether `path` is cached, without touching recency.
    pub fn is_cached(&self, path: &Path) -> bool {
        self.cache().contains(&path_key(path))
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache().stats()
    }

    /// Orientation recorded for `path`, `Normal` if unknown.
    pub fn orientation(&self, path: &Path) -> Orientation {
        self.orientations()
            .get(&path_key(path))
            .copied()
            .unwrap_or_default()
    }

    pub fn set_orientation(&self, path: &Path, orientation: Orientation) {
        self.orientations().insert(path_key(path), orientation);
    }
}

impl std::fmt::Debug for MediaLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaLoader")
            .field("hard_max", &self.inner.hard_max)
            .field("cache", &self.cache_stats())
            .finish()
    }
}
